//! Wires a configuration's output options to a run of every selected protocol

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use vanet_rust::vn_report::{write_text_report, write_yaml_report};
use vanet_rust::{ProtocolKind, RunResult, SimConfig, SimError, Simulation};

use super::{ConsoleEventSink, CsvEventSink, CsvPositionSink, MultiEventSink};

/// "trace/events.csv" -> "trace/events-AODV.csv"
pub fn with_protocol_suffix(path: &str, kind: ProtocolKind) -> PathBuf {
    let path = Path::new(path);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("trace");
    let name = match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}-{}.{}", stem, kind.name(), ext),
        None => format!("{}-{}", stem, kind.name()),
    };
    path.with_file_name(name)
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn run_one(config: &SimConfig, kind: ProtocolKind) -> Result<RunResult, SimError> {
    let output = &config.output;
    let mut simulation = Simulation::new(config, kind)?;

    let mut sinks = MultiEventSink::new();
    if output.verbose {
        sinks.add_sink(Box::new(ConsoleEventSink::new(true)));
    }
    if let Some(ref csv) = output.event_csv {
        let path = with_protocol_suffix(csv, kind);
        create_parent(&path)?;
        sinks.add_sink(Box::new(CsvEventSink::new(&path)?));
        info!("events for {} go to {}", kind, path.display());
    }
    if !sinks.is_empty() {
        simulation = simulation.with_event_sink(Box::new(sinks));
    }

    if let Some(ref trace) = output.position_trace {
        let path = with_protocol_suffix(trace, kind);
        create_parent(&path)?;
        simulation = simulation.with_position_sink(Box::new(CsvPositionSink::new(&path)?));
    }

    // sinks are dropped (and flushed) with the simulation
    let result = simulation.run();
    result.print_summary();

    if let Some(ref dir) = output.results_dir {
        let dir = Path::new(dir);
        let text = write_text_report(dir, &result)?;
        let yaml = write_yaml_report(dir, &result)?;
        println!("Results for {} have been saved to {}", kind, text.display());
        println!("  Full run data: {}", yaml.display());
    }

    Ok(result)
}

/// One independent run per selected protocol, same seed for each
pub fn run_protocols(config: &SimConfig) -> Result<Vec<RunResult>, SimError> {
    config
        .protocol
        .kinds()
        .into_iter()
        .map(|kind| run_one(config, kind))
        .collect()
}

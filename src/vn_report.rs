// Result files: the plain-text per-protocol summary and a YAML dump of the
// full run result.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::vn_config::ProtocolKind;
use crate::vn_error::SimError;
use crate::vn_simulation::RunResult;

/// vanet-<PROTOCOL>-results.<extension>
pub fn report_file_name(kind: ProtocolKind, extension: &str) -> String {
    format!("vanet-{}-results.{}", kind.name(), extension)
}

/// Per-flow blocks followed by the aggregate statistics
pub fn render_text(result: &RunResult) -> String {
    let mut out = String::new();
    // a String sink never fails
    let _ = write_text(&mut out, result);
    out
}

fn write_text<W: fmt::Write>(out: &mut W, result: &RunResult) -> fmt::Result {
    for (i, flow) in result.report.flows.iter().enumerate() {
        writeln!(out, "Flow {} (V{} -> V{})", i + 1, flow.flow.source, flow.flow.dest)?;
        writeln!(out, "  Tx Packets: {}", flow.tx_packets)?;
        writeln!(out, "  Rx Packets: {}", flow.rx_packets)?;
        writeln!(out, "  Lost Packets: {}", flow.lost_packets)?;
        match flow.pdr {
            Some(pdr) => writeln!(out, "  Packet Delivery Ratio: {:.2}%", pdr)?,
            None => writeln!(out, "  Packet Delivery Ratio: N/A")?,
        }
        match flow.avg_delay_ms {
            Some(delay) => writeln!(out, "  Average Delay: {:.3} ms", delay)?,
            None => writeln!(out, "  Average Delay: N/A")?,
        }
        writeln!(out, "  Throughput: {:.3} Kbps\n", flow.throughput_kbps)?;
    }

    let aggregate = &result.report.aggregate;
    writeln!(out, "===== Aggregate Statistics =====")?;
    writeln!(out, "Total Throughput: {:.3} Kbps", aggregate.total_throughput_kbps)?;
    match aggregate.average_delay_ms {
        Some(delay) => writeln!(out, "Average Delay: {:.3} ms", delay)?,
        None => writeln!(out, "Average Delay: N/A (no packets received)")?,
    }
    match (aggregate.pdr, aggregate.loss_ratio) {
        (Some(pdr), Some(loss)) => {
            writeln!(out, "Packet Delivery Ratio: {:.2}%", pdr)?;
            writeln!(out, "Packet Loss Ratio: {:.2}%", loss)
        }
        _ => {
            writeln!(out, "Packet Delivery Ratio: N/A (no packets transmitted)")?;
            writeln!(out, "Packet Loss Ratio: N/A (no packets transmitted)")
        }
    }
}

pub fn write_text_report(dir: &Path, result: &RunResult) -> Result<PathBuf, SimError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(result.protocol, "txt"));
    fs::write(&path, render_text(result))?;
    info!("results for {} saved to {}", result.protocol, path.display());
    Ok(path)
}

pub fn write_yaml_report(dir: &Path, result: &RunResult) -> Result<PathBuf, SimError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(result.protocol, "yaml"));
    fs::write(&path, serde_yaml::to_string(result)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vn_config::SimConfig;
    use crate::vn_simulation::Simulation;

    fn short_run(kind: ProtocolKind) -> RunResult {
        let mut config = SimConfig::default();
        config.num_nodes = 4;
        config.sim_time = 20.0;
        config.traffic.data_start = 2.0;
        config.traffic.data_end = 10.0;
        Simulation::new(&config, kind).unwrap().run()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(report_file_name(ProtocolKind::Reactive, "txt"), "vanet-AODV-results.txt");
        assert_eq!(report_file_name(ProtocolKind::Proactive, "yaml"), "vanet-DSDV-results.yaml");
    }

    #[test]
    fn test_text_layout() {
        let text = render_text(&short_run(ProtocolKind::Reactive));
        assert!(text.starts_with("Flow 1 (V0 -> V2)\n  Tx Packets: "));
        assert!(text.contains("Flow 2 (V1 -> V3)"));
        assert!(text.contains("===== Aggregate Statistics =====\nTotal Throughput: "));
        assert!(text.contains("Packet Loss Ratio: "));
    }

    #[test]
    fn test_no_traffic_is_not_applicable() {
        let mut result = short_run(ProtocolKind::Proactive);
        result.report.flows.clear();
        result.report.aggregate = Default::default();

        let text = render_text(&result);
        assert!(text.contains("Average Delay: N/A (no packets received)"));
        assert!(text.contains("Packet Delivery Ratio: N/A (no packets transmitted)"));
    }

    #[test]
    fn test_reports_written_to_disk() {
        let dir = std::env::temp_dir().join(format!("vanet-report-test-{}", std::process::id()));
        let result = short_run(ProtocolKind::Proactive);

        let text = write_text_report(&dir, &result).unwrap();
        let yaml = write_yaml_report(&dir, &result).unwrap();
        assert!(fs::read_to_string(&text).unwrap().contains("===== Aggregate Statistics ====="));
        assert!(fs::read_to_string(&yaml).unwrap().contains("protocol: Proactive"));

        let _ = fs::remove_dir_all(&dir);
    }
}

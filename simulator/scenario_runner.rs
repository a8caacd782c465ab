// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/highway.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/highway.yaml --seed 42 --protocol aodv

mod vanet;

use std::env;
use std::fs;
use std::path::Path;

use simple_logger::SimpleLogger;
use vanet_rust::{ProtocolChoice, RunResult, SimConfig};

/// Scenario file format
#[derive(Debug, serde::Deserialize)]
struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    meta: ScenarioMeta,

    /// Configuration; anything left out keeps its default
    #[serde(default)]
    config: SimConfig,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ScenarioMeta {
    name: Option<String>,
    description: Option<String>,
    hypothesis: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Overrides {
    seed: Option<u64>,
    protocol: Option<ProtocolChoice>,
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap_or_else(|e| eprintln!("logger already set: {}", e));

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed N] [--protocol aodv|dsdv|all]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/highway.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/highway.yaml --seed 7 --protocol dsdv", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let overrides = parse_overrides(&args[2..]);

    if path.is_file() {
        run_scenario_file(path, overrides);
    } else if path.is_dir() {
        run_scenario_directory(path, overrides);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn parse_overrides(args: &[String]) -> Overrides {
    let mut overrides = Overrides::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter.next().unwrap_or_else(|| {
            eprintln!("Missing value for {}", flag);
            std::process::exit(1);
        });
        match flag.as_str() {
            "--seed" => {
                let seed: u64 = value.parse().unwrap_or_else(|e| {
                    eprintln!("Invalid seed {}: {}", value, e);
                    std::process::exit(1);
                });
                overrides.seed = Some(seed);
            }
            "--protocol" => {
                let protocol: ProtocolChoice = value.parse().unwrap_or_else(|e| {
                    eprintln!("{}", e);
                    std::process::exit(1);
                });
                overrides.protocol = Some(protocol);
            }
            other => {
                eprintln!("Unknown option: {}", other);
                std::process::exit(1);
            }
        }
    }
    overrides
}

fn run_scenario_directory(dir: &Path, overrides: Overrides) {
    let mut scenarios = Vec::new();

    // Find all .yaml files
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if matches!(path.extension().and_then(|s| s.to_str()), Some("yaml") | Some("yml")) {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                  ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, overrides);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
}

fn run_scenario_file(path: &Path, overrides: Overrides) {
    println!("Loading scenario from: {}", path.display());

    let yaml_content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let scenario: ScenarioFile = serde_yaml::from_str(&yaml_content).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", path.display(), e);
        std::process::exit(1);
    });

    // Print scenario header
    let name = scenario
        .meta
        .name
        .clone()
        .or_else(|| path.file_stem().and_then(|s| s.to_str()).map(String::from))
        .unwrap_or_default();
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  {}{}║", name, " ".repeat(54_usize.saturating_sub(name.chars().count())));
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }

    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let mut config = scenario.config;
    if let Some(seed) = overrides.seed {
        config.seed = seed;
    }
    if let Some(protocol) = overrides.protocol {
        config.protocol = protocol;
    }

    println!("Configuration:");
    println!("  Vehicles: {}", config.num_nodes);
    println!("  Simulation Time: {:.1}s", config.sim_time);
    println!("  Protocols: {:?}", config.protocol);
    println!("  Seed: {}", config.seed);
    println!(
        "  Traffic: {} packets of {} bytes every {:.2}s in [{:.1}s, {:.1}s)",
        config.traffic.num_packets,
        config.traffic.packet_size,
        config.traffic.packet_interval,
        config.traffic.data_start,
        config.traffic.data_end
    );
    println!("  Scheduled Events: {}", config.events.len());
    println!("\nStarting simulation...\n");

    let results = vanet::run_protocols(&config).unwrap_or_else(|e| {
        eprintln!("Scenario {} failed: {}", path.display(), e);
        std::process::exit(1);
    });

    if results.len() > 1 {
        print_comparison(&results);
    }

    println!("\n✓ Scenario complete!\n");
}

fn print_comparison(results: &[RunResult]) {
    println!("═══ Comparison ═══");
    println!("  {:<6} {:>10} {:>12} {:>14} {:>10}", "", "PDR", "Delay", "Throughput", "Control");
    for result in results {
        let aggregate = &result.report.aggregate;
        println!(
            "  {:<6} {:>9}% {:>9} ms {:>9.2} Kbps {:>10}",
            result.protocol.name(),
            aggregate.pdr.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v)),
            aggregate
                .average_delay_ms
                .map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v)),
            aggregate.total_throughput_kbps,
            result.control.total_sent()
        );
    }
}

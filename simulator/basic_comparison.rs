// Basic Comparison Example
//
// Runs both protocols on the default highway: 20 vehicles on a 1 km road,
// half driving each way at 20 m/s, ten constant-rate flows.

mod vanet;

use log::info;
use simple_logger::SimpleLogger;
use vanet_rust::{ProtocolChoice, SimConfig};

fn main() {
    SimpleLogger::new().with_level(log::LevelFilter::Info).init().unwrap();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║    VANET Routing Comparison: AODV vs. DSDV             ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let mut config = SimConfig::default();
    config.protocol = ProtocolChoice::All;
    config.output.results_dir = Some("results".to_string());

    info!("Configuration:");
    info!("  Vehicles: {}", config.num_nodes);
    info!("  Simulation Time: {:.0}s", config.sim_time);
    info!("  Speed: {:.0} m/s, range {:.0} m", config.mobility.node_speed, config.channel.range);
    info!(
        "  Data: {} packets x {} bytes from {:.0}s to {:.0}s",
        config.traffic.num_packets, config.traffic.packet_size, config.traffic.data_start, config.traffic.data_end
    );

    let results = vanet::run_protocols(&config).unwrap_or_else(|e| {
        eprintln!("Simulation failed: {}", e);
        std::process::exit(1);
    });

    for result in &results {
        let aggregate = &result.report.aggregate;
        info!(
            "{}: pdr {:?}%, delay {:?} ms, {} control messages",
            result.protocol,
            aggregate.pdr,
            aggregate.average_delay_ms,
            result.control.total_sent()
        );
    }

    println!("\n✓ Simulation complete!");
}

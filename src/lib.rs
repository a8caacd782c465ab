//! # vanet-routing - Reactive vs. Proactive Routing in Vehicular Networks
//!
//! A discrete-event simulator comparing an on-demand routing protocol (AODV
//! style) with a table-driven one (DSDV style) on a population of moving
//! vehicles. Both protocols run over the same abstract channel, mobility and
//! traffic, so their delivery ratio, delay, throughput and control overhead can
//! be compared for a given seed.
//!
//! ## Core Components
//!
//! - **Scheduler**: deterministic event queue ordered by time, then insertion
//! - **Channel**: range-based reachability and fixed propagation delay
//! - **Node / RoutingProtocol**: per-vehicle state driven by a protocol that
//!   reacts to sends, control messages, timers and link changes
//! - **FlowMonitor**: per-flow accounting and end-of-run statistics
//!
//! ```no_run
//! use vanet_rust::{run_comparison, SimConfig};
//!
//! let config = SimConfig::default();
//! for result in run_comparison(&config).unwrap() {
//!     result.print_summary();
//! }
//! ```
//!
//! ## Scenarios
//!
//! The `scenario_runner` binary in `simulator/` loads YAML scenario files and
//! writes the per-protocol result files.

// Foundations
pub mod vn_config;
pub mod vn_error;
pub mod vn_interface;
pub mod vn_scheduler;

// Environment
pub mod vn_channel;
pub mod vn_mobility;
pub mod vn_traffic;

// Routing
pub mod vn_aodv;
pub mod vn_dsdv;
pub mod vn_node;
pub mod vn_routing;
pub mod vn_routing_table;

// Measurement and orchestration
pub mod vn_flow_monitor;
pub mod vn_report;
pub mod vn_simulation;

// Re-export commonly used types
pub use vn_config::{NetworkEvent, ProtocolChoice, ProtocolKind, ScheduledNetworkEvent, SimConfig};
pub use vn_error::{ConfigError, ProtocolError, ScheduleError, SimError};
pub use vn_interface::{
    CollectorEventSink, ControlKind, DropReason, Event, EventRecord, EventSink, FlowKey, NoOpSink, NodeId,
    Position, PositionSink, SimTime,
};
pub use vn_routing::{RouteStatus, RoutingProtocol};
pub use vn_simulation::{run_comparison, RunResult, Simulation};

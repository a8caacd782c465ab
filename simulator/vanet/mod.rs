// VANET Scenario Support Module
//
// Sinks and run helpers shared by the simulator binaries.

pub mod event_sinks;
pub mod position_sink;
pub mod runner;

// Re-export commonly used types
pub use event_sinks::{ConsoleEventSink, CsvEventSink, MultiEventSink};
pub use position_sink::CsvPositionSink;
pub use runner::{run_protocols, with_protocol_suffix};

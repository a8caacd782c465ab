//! Error types for the simulator.

use thiserror::Error;

use crate::vn_interface::{ControlKind, NodeId, SimTime};

/// Invalid parameter combination, detected before the first event is scheduled
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("need at least 2 nodes for the simulation, got {0}")]
    TooFewNodes(usize),

    #[error("simulation time must be positive, got {0}")]
    NonPositiveSimTime(f64),

    #[error("data window is empty: start {start} >= end {end}")]
    EmptyDataWindow { start: f64, end: f64 },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Scheduling into the past is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule: event at {at} is before current time {now}")]
    InvalidSchedule { at: i128, now: SimTime },
}

/// A control message that can not be processed. Dropped and counted, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed {kind:?} from {from}: {reason}")]
    Malformed {
        kind: ControlKind,
        from: NodeId,
        reason: &'static str,
    },

    #[error("no reverse route to {origin} for reply from {from}")]
    NoReverseRoute { origin: NodeId, from: NodeId },
}

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization failed: {0}")]
    Report(#[from] serde_yaml::Error),
}

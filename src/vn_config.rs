// Simulation Configuration
//
// One immutable value handed to every component at construction. Every field
// has a default, so scenario files only list what they change.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::vn_error::ConfigError;
use crate::vn_interface::{secs, NodeId};

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration for a routing comparison run
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of vehicles (minimum 2)
    pub num_nodes: usize,

    /// Simulation time in seconds
    pub sim_time: f64,

    /// Random seed for reproducibility
    pub seed: u64,

    /// Which protocol(s) to run
    pub protocol: ProtocolChoice,

    pub traffic: TrafficConfig,
    pub mobility: MobilityConfig,
    pub channel: ChannelConfig,
    pub reactive: ReactiveConfig,
    pub proactive: ProactiveConfig,
    pub monitor: MonitorConfig,

    /// Scheduled link / node events
    pub events: Vec<ScheduledNetworkEvent>,

    pub output: OutputConfig,
}

// ============================================================================
// Protocol Selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProtocolChoice {
    #[serde(alias = "reactive", alias = "aodv", alias = "AODV")]
    Reactive,
    #[serde(alias = "proactive", alias = "dsdv", alias = "DSDV")]
    Proactive,
    #[serde(alias = "all")]
    All,
}

impl ProtocolChoice {
    /// Protocols to run, in order
    pub fn kinds(&self) -> Vec<ProtocolKind> {
        match self {
            ProtocolChoice::Reactive => vec![ProtocolKind::Reactive],
            ProtocolChoice::Proactive => vec![ProtocolKind::Proactive],
            ProtocolChoice::All => vec![ProtocolKind::Reactive, ProtocolKind::Proactive],
        }
    }
}

impl FromStr for ProtocolChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reactive" | "aodv" | "1" => Ok(ProtocolChoice::Reactive),
            "proactive" | "dsdv" | "2" => Ok(ProtocolChoice::Proactive),
            "all" | "0" => Ok(ProtocolChoice::All),
            other => Err(ConfigError::InvalidParameter {
                name: "protocol",
                reason: format!("unknown protocol '{}'", other),
            }),
        }
    }
}

/// A single protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProtocolKind {
    Reactive,
    Proactive,
}

impl ProtocolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolKind::Reactive => "AODV",
            ProtocolKind::Proactive => "DSDV",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Traffic
// ============================================================================

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// UDP payload size in bytes
    pub packet_size: u32,

    /// Maximum packets per flow
    pub num_packets: u64,

    /// Destination port of flow i is port_base + i
    pub port_base: u16,

    /// Seconds between two packets of a flow
    pub packet_interval: f64,

    /// Start of data transmission (seconds)
    pub data_start: f64,

    /// End of data transmission (seconds, exclusive)
    pub data_end: f64,

    /// Only generate the first N flows of the pairing
    pub max_flows: Option<usize>,
}

// ============================================================================
// Mobility
// ============================================================================

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MobilityConfig {
    pub source: MobilitySource,

    /// Road length in meters, spreads the grid columns
    pub road_length: f64,

    /// Node speed in m/s
    pub node_speed: f64,

    /// Distance between grid rows in meters
    pub lane_spacing: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum MobilitySource {
    /// Grid placement plus constant velocity, direction alternating by parity
    Synthetic,

    /// Waypoints per node, already imported by the caller
    Trace { waypoints: BTreeMap<NodeId, Vec<Waypoint>> },
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Waypoint {
    pub time: f64,
    pub x: f64,
    pub y: f64,
}

// ============================================================================
// Channel
// ============================================================================

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Transmission range in meters
    pub range: f64,

    /// Fixed per-hop delay in seconds
    pub propagation_delay: f64,

    /// How often neighbor sets are re-evaluated (seconds)
    pub link_check_interval: f64,

    /// Nodes that are never reachable
    pub isolated_nodes: Vec<NodeId>,
}

// ============================================================================
// Protocols
// ============================================================================

/// AODV-style parameters
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Wait for a reply before retrying (seconds)
    pub discovery_timeout: f64,

    /// Rebroadcasts after the first request
    pub max_retries: u32,

    /// Lifetime of an unused route (seconds)
    pub active_route_timeout: f64,

    /// Window in which a seen request id suppresses re-processing (seconds)
    pub path_discovery_time: f64,

    /// Requests with more hops are malformed
    pub net_diameter: u32,

    /// Pending-packet buffer capacity
    pub buffer_capacity: usize,
}

/// DSDV-style parameters
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProactiveConfig {
    /// Periodic full-table advertisement (seconds)
    pub advertisement_interval: f64,

    /// Hold-down for worse-metric updates (seconds)
    pub settling_time: f64,

    /// Routes not refreshed for hold_times * interval are unreachable
    pub hold_times: u32,

    /// Pending-packet buffer capacity
    pub buffer_capacity: usize,
}

// ============================================================================
// Monitor / Output
// ============================================================================

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Packets outstanding longer than this at run end count as lost (seconds)
    pub max_delay: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for vanet-<PROTOCOL>-results.txt / .yaml
    pub results_dir: Option<String>,

    /// CSV event trace path (protocol name is appended)
    pub event_csv: Option<String>,

    /// CSV node position trace path (protocol name is appended)
    pub position_trace: Option<String>,

    /// Seconds between two position samples
    pub position_interval: Option<f64>,

    /// Log every event to the console
    pub verbose: bool,
}

// ============================================================================
// Scheduled Network Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScheduledNetworkEvent {
    /// Seconds
    pub at: f64,
    pub event: NetworkEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum NetworkEvent {
    /// Sever the link between two nodes regardless of distance
    LinkDown { a: NodeId, b: NodeId },
    LinkUp { a: NodeId, b: NodeId },
    /// Make a node unreachable for everybody
    Isolate { node: NodeId },
    Rejoin { node: NodeId },
}

impl NetworkEvent {
    fn nodes(&self) -> [NodeId; 2] {
        match *self {
            NetworkEvent::LinkDown { a, b } | NetworkEvent::LinkUp { a, b } => [a, b],
            NetworkEvent::Isolate { node } | NetworkEvent::Rejoin { node } => [node, node],
        }
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_nodes: 20,
            sim_time: 90.0,
            seed: 12345,
            protocol: ProtocolChoice::All,
            traffic: TrafficConfig::default(),
            mobility: MobilityConfig::default(),
            channel: ChannelConfig::default(),
            reactive: ReactiveConfig::default(),
            proactive: ProactiveConfig::default(),
            monitor: MonitorConfig::default(),
            events: Vec::new(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            packet_size: 512,
            num_packets: 100,
            port_base: 9,
            packet_interval: 0.5,
            data_start: 30.0,
            data_end: 80.0,
            max_flows: None,
        }
    }
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            source: MobilitySource::Synthetic,
            road_length: 1000.0,
            node_speed: 20.0,
            lane_spacing: 5.0,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            range: 250.0,
            propagation_delay: 0.001,
            link_check_interval: 1.0,
            isolated_nodes: Vec::new(),
        }
    }
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: 2.8,
            max_retries: 2,
            active_route_timeout: 3.0,
            path_discovery_time: 5.6,
            net_diameter: 35,
            buffer_capacity: 64,
        }
    }
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            advertisement_interval: 2.0,
            settling_time: 6.0,
            hold_times: 3,
            buffer_capacity: 64,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { max_delay: 10.0 }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SimConfig {
    /// Check parameter combinations and return the configuration a run uses.
    ///
    /// A data window reaching past the end of the simulation is clamped with a
    /// warning; every other inconsistency is an error.
    pub fn validated(&self) -> Result<SimConfig, ConfigError> {
        let mut config = self.clone();

        if config.num_nodes < 2 {
            return Err(ConfigError::TooFewNodes(config.num_nodes));
        }
        if !(config.sim_time > 0.0) || !config.sim_time.is_finite() {
            return Err(ConfigError::NonPositiveSimTime(config.sim_time));
        }

        let traffic = &mut config.traffic;
        if !(traffic.data_start < traffic.data_end) {
            return Err(ConfigError::EmptyDataWindow {
                start: traffic.data_start,
                end: traffic.data_end,
            });
        }
        if traffic.data_end > config.sim_time {
            warn!(
                "data end {} is past simulation time {} - adjusting",
                traffic.data_end, config.sim_time
            );
            traffic.data_end = config.sim_time;
            if !(traffic.data_start < traffic.data_end) {
                return Err(ConfigError::EmptyDataWindow {
                    start: traffic.data_start,
                    end: traffic.data_end,
                });
            }
        }
        if traffic.data_start < 0.0 {
            return Err(invalid("traffic.data_start", "must not be negative"));
        }

        interval("traffic.packet_interval", traffic.packet_interval)?;
        if traffic.packet_size == 0 {
            return Err(invalid("traffic.packet_size", "must be at least 1 byte"));
        }

        positive("channel.range", config.channel.range)?;
        interval("channel.link_check_interval", config.channel.link_check_interval)?;
        if !(config.channel.propagation_delay >= 0.0) {
            return Err(invalid("channel.propagation_delay", "must not be negative"));
        }

        interval("reactive.discovery_timeout", config.reactive.discovery_timeout)?;
        interval("reactive.active_route_timeout", config.reactive.active_route_timeout)?;
        interval("proactive.advertisement_interval", config.proactive.advertisement_interval)?;
        if !(config.proactive.settling_time >= 0.0) {
            return Err(invalid("proactive.settling_time", "must not be negative"));
        }
        if let Some(every) = config.output.position_interval {
            interval("output.position_interval", every)?;
        }
        if config.reactive.buffer_capacity == 0 || config.proactive.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity", "must hold at least one packet"));
        }
        if !config.mobility.node_speed.is_finite() || !(config.mobility.road_length >= 0.0) {
            return Err(invalid("mobility", "speed and road length must be finite, road length non-negative"));
        }

        let num_nodes = config.num_nodes;
        let known = |id: NodeId| (id as usize) < num_nodes;

        if let Some(&node) = config.channel.isolated_nodes.iter().find(|&&n| !known(n)) {
            return Err(invalid("channel.isolated_nodes", format!("unknown node {}", node)));
        }

        if let MobilitySource::Trace { waypoints } = &config.mobility.source {
            for id in 0..num_nodes as NodeId {
                match waypoints.get(&id) {
                    Some(points) if !points.is_empty() => {
                        if points.windows(2).any(|w| w[1].time < w[0].time) {
                            return Err(invalid(
                                "mobility.waypoints",
                                format!("waypoints of node {} are not in time order", id),
                            ));
                        }
                    }
                    _ => {
                        return Err(invalid(
                            "mobility.waypoints",
                            format!("node {} has no waypoints", id),
                        ))
                    }
                }
            }
        }

        for scheduled in &config.events {
            if !(scheduled.at >= 0.0) || scheduled.at > config.sim_time {
                return Err(invalid("events", format!("event time {} outside the run", scheduled.at)));
            }
            if let Some(node) = scheduled.event.nodes().iter().find(|&&n| !known(n)) {
                return Err(invalid("events", format!("unknown node {}", node)));
            }
        }

        Ok(config)
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(name, format!("must be positive, got {}", value)))
    }
}

/// Positive and at least one clock tick, so re-arming timers always advance time
fn interval(name: &'static str, value: f64) -> Result<(), ConfigError> {
    positive(name, value)?;
    if secs(value) == 0 {
        return Err(invalid(name, format!("{} s is below the 1 us clock resolution", value)));
    }
    Ok(())
}

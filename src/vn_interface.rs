use std::cell::RefCell;
use std::rc::Rc;

// all node-scoped identifiers are small integers - nodes live in an arena indexed by id
pub type NodeId = u32;
pub type SeqNo = u32;
pub type RequestId = u32;
pub type HopCount = u32;

/// Simulated time in microseconds since the start of the run
pub type SimTime = u64;

pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Hop count advertised for a destination that can not be reached
pub const INFINITE_HOPS: HopCount = HopCount::MAX;

pub const UDP_PROTOCOL: u8 = 17;

/// Data packets relayed more often than this are discarded (routing loop)
pub const MAX_PACKET_HOPS: u32 = 64;

/// Convert seconds (as found in configuration) to simulated time
pub fn secs(seconds: f64) -> SimTime {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * MICROS_PER_SEC as f64).round() as SimTime
    } else {
        0
    }
}

pub fn as_secs(time: SimTime) -> f64 {
    time as f64 / MICROS_PER_SEC as f64
}

// ============================================================================
// Geometry
// ============================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

// ============================================================================
// Data Packets
// ============================================================================

/// Flow identity: the classic 5-tuple
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct FlowKey {
    pub source: NodeId,
    pub dest: NodeId,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub flow: FlowKey,
    /// Payload size in bytes
    pub size: u32,
    /// Per-flow sequence number, starts at 0
    pub seq: u64,
    pub sent_at: SimTime,
    /// Links crossed so far
    pub hops: u32,
}

impl Packet {
    pub fn dest(&self) -> NodeId {
        self.flow.dest
    }
}

// ============================================================================
// Control Messages
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AdvertisedRoute {
    pub dest: NodeId,
    pub hop_count: HopCount,
    pub seq: SeqNo,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    RouteRequest {
        origin: NodeId,
        dest: NodeId,
        request_id: RequestId,
        hop_count: HopCount,
        origin_seq: SeqNo,
        /// Last seq the originator knew for `dest`, 0 if none
        dest_seq: SeqNo,
    },
    RouteReply {
        origin: NodeId, // the node that asked - the reply travels back towards it
        dest: NodeId,
        hop_count: HopCount,
        dest_seq: SeqNo,
    },
    RouteError {
        unreachable: Vec<(NodeId, SeqNo)>,
    },
    Advertisement {
        origin: NodeId,
        entries: Vec<AdvertisedRoute>,
    },
}

impl ControlMessage {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlMessage::RouteRequest { .. } => ControlKind::RouteRequest,
            ControlMessage::RouteReply { .. } => ControlKind::RouteReply,
            ControlMessage::RouteError { .. } => ControlKind::RouteError,
            ControlMessage::Advertisement { .. } => ControlKind::Advertisement,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum ControlKind {
    RouteRequest,
    RouteReply,
    RouteError,
    Advertisement,
}

/// What travels over the channel
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Data(Packet),
    Control(ControlMessage),
}

// ============================================================================
// Timers and Losses
// ============================================================================

/// Per-node timer identity. A node holds at most one armed timer per id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    Discovery(NodeId),
    PeriodicUpdate,
    Settling(NodeId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum DropReason {
    /// Pending-packet buffer was full, the oldest packet made room
    BufferOverflow,
    /// Route discovery exhausted its retries
    DiscoveryFailed,
    /// No route and the protocol does not buffer
    NoRoute,
    /// Next hop out of range when the frame was sent
    ChannelLoss,
    /// Relayed more than MAX_PACKET_HOPS times
    HopLimit,
    /// Still outstanding when the monitor swept at run end
    Expired,
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Events emitted by the simulation for debugging and analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PacketSent {
        flow: FlowKey,
        seq: u64,
    },
    PacketForwarded {
        flow: FlowKey,
        seq: u64,
        next_hop: NodeId,
    },
    PacketDelivered {
        flow: FlowKey,
        seq: u64,
        delay: SimTime,
    },
    PacketDropped {
        flow: FlowKey,
        seq: u64,
        reason: DropReason,
    },
    ControlSent {
        kind: ControlKind,
        to: Option<NodeId>, // None => broadcast
    },
    DiscoveryStarted {
        dest: NodeId,
        request_id: RequestId,
        attempt: u32,
    },
    DiscoveryCompleted {
        dest: NodeId,
        hop_count: HopCount,
        latency: SimTime,
    },
    DiscoveryFailed {
        dest: NodeId,
        dropped: usize,
    },
    RouteInstalled {
        dest: NodeId,
        next_hop: NodeId,
        hop_count: HopCount,
        seq: SeqNo,
    },
    RouteInvalidated {
        dest: NodeId,
        seq: SeqNo,
        unreachable: bool,
    },
    LinkChanged {
        neighbor: NodeId,
        reachable: bool,
    },
    TriggeredUpdate {
        entries: usize,
    },
    MalformedMessage {
        kind: ControlKind,
        from: NodeId,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PacketSent { .. } => "PacketSent",
            Event::PacketForwarded { .. } => "PacketForwarded",
            Event::PacketDelivered { .. } => "PacketDelivered",
            Event::PacketDropped { .. } => "PacketDropped",
            Event::ControlSent { .. } => "ControlSent",
            Event::DiscoveryStarted { .. } => "DiscoveryStarted",
            Event::DiscoveryCompleted { .. } => "DiscoveryCompleted",
            Event::DiscoveryFailed { .. } => "DiscoveryFailed",
            Event::RouteInstalled { .. } => "RouteInstalled",
            Event::RouteInvalidated { .. } => "RouteInvalidated",
            Event::LinkChanged { .. } => "LinkChanged",
            Event::TriggeredUpdate { .. } => "TriggeredUpdate",
            Event::MalformedMessage { .. } => "MalformedMessage",
        }
    }
}

/// Trait for consuming events from the simulation
pub trait EventSink {
    fn log(&mut self, time: SimTime, node: NodeId, event: Event);
}

/// No-op event sink (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _time: SimTime, _node: NodeId, _event: Event) {}
}

// lets a caller keep a handle on a sink it hands to the simulation
impl<S: EventSink> EventSink for Rc<RefCell<S>> {
    fn log(&mut self, time: SimTime, node: NodeId, event: Event) {
        self.borrow_mut().log(time, node, event);
    }
}

/// Write-only visualization output. Nothing flows back into the simulation.
pub trait PositionSink {
    fn update(&mut self, time: SimTime, node: NodeId, position: Position, label: &str, color: [u8; 3]);
}

impl<S: PositionSink> PositionSink for Rc<RefCell<S>> {
    fn update(&mut self, time: SimTime, node: NodeId, position: Position, label: &str, color: [u8; 3]) {
        self.borrow_mut().update(time, node, position, label, color);
    }
}

// ============================================================================
// Collector Event Sink (In-Memory)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: SimTime,
    pub node: NodeId,
    pub event: Event,
}

/// Collects events in memory for programmatic analysis
#[derive(Default)]
pub struct CollectorEventSink {
    pub events: Vec<EventRecord>,
}

impl CollectorEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn for_node(&self, node: NodeId) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().filter(move |e| e.node == node)
    }

    pub fn in_time_range(&self, start: SimTime, end: SimTime) -> impl Iterator<Item = &EventRecord> {
        self.events
            .iter()
            .filter(move |e| e.time >= start && e.time <= end)
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.events.iter().filter(|e| e.event.name() == name).count()
    }
}

impl EventSink for CollectorEventSink {
    fn log(&mut self, time: SimTime, node: NodeId, event: Event) {
        self.events.push(EventRecord { time, node, event });
    }
}

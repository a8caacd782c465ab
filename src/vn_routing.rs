// Routing Protocol Interface
//
// The capability set every routing variant implements, and the factory that
// picks one when the simulation is set up. The engine only talks to this trait.

use crate::vn_aodv::Aodv;
use crate::vn_config::{ProtocolKind, SimConfig};
use crate::vn_dsdv::Dsdv;
use crate::vn_error::ProtocolError;
use crate::vn_interface::{ControlMessage, NodeId, Packet, SimTime, TimerId};
use crate::vn_node::NodeCtx;
use crate::vn_routing_table::RoutingTable;

/// Per-destination route status as seen by the protocol
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RouteStatus {
    Unknown,
    Discovering,
    Active,
    Stale,
}

/// One node's protocol instance. Handlers run to completion and only touch
/// the state reachable through the context.
pub trait RoutingProtocol {
    fn name(&self) -> &'static str;

    /// Initial timers, called once before the first event
    fn start(&mut self, ctx: &mut NodeCtx);

    /// Originate or relay a data packet
    fn on_send(&mut self, ctx: &mut NodeCtx, dest: NodeId, packet: Packet);

    fn on_control_message(&mut self, ctx: &mut NodeCtx, msg: ControlMessage, from: NodeId) -> Result<(), ProtocolError>;

    fn on_timer(&mut self, ctx: &mut NodeCtx, timer: TimerId);

    fn on_link_change(&mut self, ctx: &mut NodeCtx, neighbor: NodeId, now_reachable: bool);

    fn route_status(&self, table: &RoutingTable, dest: NodeId, now: SimTime) -> RouteStatus;
}

/// Instantiate the protocol for one node
pub fn build(kind: ProtocolKind, config: &SimConfig) -> Box<dyn RoutingProtocol> {
    match kind {
        ProtocolKind::Reactive => Box::new(Aodv::new(&config.reactive)),
        ProtocolKind::Proactive => Box::new(Dsdv::new(&config.proactive)),
    }
}

/// Pending-buffer size used by a protocol kind
pub fn buffer_capacity(kind: ProtocolKind, config: &SimConfig) -> usize {
    match kind {
        ProtocolKind::Reactive => config.reactive.buffer_capacity,
        ProtocolKind::Proactive => config.proactive.buffer_capacity,
    }
}

// A vehicle: owned routing state plus the protocol that drives it.
//
// Protocol handlers never touch the channel or the scheduler. They mutate the
// node's own state through a NodeCtx and leave Actions behind, which the
// simulation engine carries out after the handler returns.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;

use crate::vn_interface::{ControlMessage, DropReason, Event, NodeId, Packet, SeqNo, SimTime, TimerId};
use crate::vn_routing::{RouteStatus, RoutingProtocol};
use crate::vn_routing_table::{RouteEntry, RouteUpdate, RoutingTable};
use crate::vn_scheduler::EventHandle;

// ============================================================================
// Actions
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Broadcast(ControlMessage),
    Unicast { to: NodeId, msg: ControlMessage },
    Forward { next_hop: NodeId, packet: Packet },
    /// Packet given up by this node, reported to the flow monitor
    Drop { packet: Packet, reason: DropReason },
    /// Arm (or re-arm) a timer, replacing any pending one with the same id
    SetTimer { timer: TimerId, delay: SimTime },
    CancelTimer(TimerId),
    Emit(Event),
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct NodeCounters {
    pub data_forwarded: u64,
    /// Packets this node gave up on, for any reason
    pub data_dropped: u64,
    pub buffer_overflows: u64,
    pub control_sent: u64,
    pub control_received: u64,
    pub protocol_errors: u64,
    pub duplicate_requests: u64,
    pub route_requests: u64,
    pub discoveries_failed: u64,
    pub triggered_updates: u64,
}

// ============================================================================
// Pending-Packet Buffer
// ============================================================================

/// Bounded FIFO of packets waiting for a route
#[derive(Clone, Debug)]
pub struct PacketBuffer {
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Queue a packet. On overflow the oldest packet is evicted and returned.
    pub fn push(&mut self, packet: Packet) -> Option<Packet> {
        let evicted = if self.packets.len() >= self.capacity {
            self.packets.pop_front()
        } else {
            None
        };
        self.packets.push_back(packet);
        evicted
    }

    /// Every packet for `dest`, oldest first
    pub fn drain_for(&mut self, dest: NodeId) -> Vec<Packet> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.packets.len());
        for packet in self.packets.drain(..) {
            if packet.dest() == dest {
                taken.push(packet);
            } else {
                kept.push_back(packet);
            }
        }
        self.packets = kept;
        taken
    }

    pub fn destinations(&self) -> BTreeSet<NodeId> {
        self.packets.iter().map(|p| p.dest()).collect()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

// ============================================================================
// Handler Context
// ============================================================================

/// Everything a protocol handler may touch while it runs
pub struct NodeCtx<'a> {
    pub id: NodeId,
    pub now: SimTime,
    pub table: &'a mut RoutingTable,
    pub buffer: &'a mut PacketBuffer,
    pub counters: &'a mut NodeCounters,
    pub rng: &'a mut StdRng,
    out: &'a mut Vec<Action>,
}

impl<'a> NodeCtx<'a> {
    pub fn new(
        id: NodeId,
        now: SimTime,
        table: &'a mut RoutingTable,
        buffer: &'a mut PacketBuffer,
        counters: &'a mut NodeCounters,
        rng: &'a mut StdRng,
        out: &'a mut Vec<Action>,
    ) -> Self {
        Self {
            id,
            now,
            table,
            buffer,
            counters,
            rng,
            out,
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.out.push(Action::Emit(event));
    }

    pub fn broadcast(&mut self, msg: ControlMessage) {
        self.counters.control_sent += 1;
        self.emit(Event::ControlSent { kind: msg.kind(), to: None });
        self.out.push(Action::Broadcast(msg));
    }

    pub fn unicast(&mut self, to: NodeId, msg: ControlMessage) {
        self.counters.control_sent += 1;
        self.emit(Event::ControlSent {
            kind: msg.kind(),
            to: Some(to),
        });
        self.out.push(Action::Unicast { to, msg });
    }

    pub fn forward(&mut self, next_hop: NodeId, packet: Packet) {
        self.counters.data_forwarded += 1;
        self.emit(Event::PacketForwarded {
            flow: packet.flow,
            seq: packet.seq,
            next_hop,
        });
        self.out.push(Action::Forward { next_hop, packet });
    }

    pub fn drop_packet(&mut self, packet: Packet, reason: DropReason) {
        self.counters.data_dropped += 1;
        self.emit(Event::PacketDropped {
            flow: packet.flow,
            seq: packet.seq,
            reason,
        });
        self.out.push(Action::Drop { packet, reason });
    }

    /// Queue a packet until a route shows up; overflow drops the oldest
    pub fn buffer_packet(&mut self, packet: Packet) {
        if let Some(evicted) = self.buffer.push(packet) {
            self.counters.buffer_overflows += 1;
            self.drop_packet(evicted, DropReason::BufferOverflow);
        }
    }

    /// Forward everything buffered for `dest` if an active route exists.
    /// Returns the number of packets sent.
    pub fn flush_buffer(&mut self, dest: NodeId) -> usize {
        let next_hop = match self.table.active_route(dest, self.now) {
            Some(entry) => entry.next_hop,
            None => return 0,
        };
        let packets = self.buffer.drain_for(dest);
        let sent = packets.len();
        for packet in packets {
            self.forward(next_hop, packet);
        }
        sent
    }

    pub fn set_timer(&mut self, timer: TimerId, delay: SimTime) {
        self.out.push(Action::SetTimer { timer, delay });
    }

    pub fn cancel_timer(&mut self, timer: TimerId) {
        self.out.push(Action::CancelTimer(timer));
    }

    /// Table update that reports new or changed routes
    pub fn install_route(&mut self, entry: RouteEntry) -> RouteUpdate {
        let outcome = self.table.update(entry);
        if outcome.changed() && entry.is_valid() {
            self.emit(Event::RouteInstalled {
                dest: entry.dest,
                next_hop: entry.next_hop,
                hop_count: entry.hop_count,
                seq: entry.seq,
            });
        }
        outcome
    }

    pub fn mark_stale(&mut self, dest: NodeId) -> bool {
        if !self.table.mark_stale(dest) {
            return false;
        }
        let seq = self.table.get(dest).map_or(0, |entry| entry.seq);
        self.emit(Event::RouteInvalidated {
            dest,
            seq,
            unreachable: false,
        });
        true
    }

    pub fn mark_unreachable(&mut self, dest: NodeId) -> Option<SeqNo> {
        let seq = self.table.mark_unreachable(dest)?;
        self.emit(Event::RouteInvalidated {
            dest,
            seq,
            unreachable: true,
        });
        Some(seq)
    }
}

// ============================================================================
// Node
// ============================================================================

pub struct Node {
    pub id: NodeId,
    pub table: RoutingTable,
    pub buffer: PacketBuffer,
    pub protocol: Box<dyn RoutingProtocol>,
    /// Armed timers and the scheduler events behind them
    pub timers: BTreeMap<TimerId, EventHandle>,
    /// Neighbors as of the last link check
    pub neighbors: BTreeSet<NodeId>,
    pub counters: NodeCounters,
}

impl Node {
    pub fn new(id: NodeId, protocol: Box<dyn RoutingProtocol>, buffer_capacity: usize) -> Self {
        Self {
            id,
            table: RoutingTable::new(),
            buffer: PacketBuffer::new(buffer_capacity),
            protocol,
            timers: BTreeMap::new(),
            neighbors: BTreeSet::new(),
            counters: NodeCounters::default(),
        }
    }

    pub fn route_status(&self, dest: NodeId, now: SimTime) -> RouteStatus {
        self.protocol.route_status(&self.table, dest, now)
    }

    /// Run one protocol handler against this node's state and collect what it asks for
    pub fn handle<R, F>(&mut self, now: SimTime, rng: &mut StdRng, handler: F) -> (R, Vec<Action>)
    where
        F: FnOnce(&mut dyn RoutingProtocol, &mut NodeCtx) -> R,
    {
        let mut out = Vec::new();
        let mut ctx = NodeCtx::new(
            self.id,
            now,
            &mut self.table,
            &mut self.buffer,
            &mut self.counters,
            rng,
            &mut out,
        );
        let result = handler(self.protocol.as_mut(), &mut ctx);
        (result, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vn_interface::{FlowKey, UDP_PROTOCOL};
    use rand::SeedableRng;

    fn packet(dest: NodeId, seq: u64) -> Packet {
        Packet {
            flow: FlowKey {
                source: 0,
                dest,
                source_port: 49153,
                dest_port: 9,
                protocol: UDP_PROTOCOL,
            },
            size: 512,
            seq,
            sent_at: 0,
            hops: 0,
        }
    }

    #[test]
    fn test_buffer_drops_oldest_on_overflow() {
        let mut buffer = PacketBuffer::new(2);
        assert!(buffer.push(packet(1, 0)).is_none());
        assert!(buffer.push(packet(1, 1)).is_none());
        let evicted = buffer.push(packet(1, 2)).unwrap();
        assert_eq!(evicted.seq, 0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_buffer_drain_keeps_other_destinations() {
        let mut buffer = PacketBuffer::new(8);
        buffer.push(packet(1, 0));
        buffer.push(packet(2, 1));
        buffer.push(packet(1, 2));

        let drained: Vec<u64> = buffer.drain_for(1).iter().map(|p| p.seq).collect();
        assert_eq!(drained, vec![0, 2]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain_for(2)[0].seq, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ctx_overflow_reports_drop() {
        let mut table = RoutingTable::new();
        let mut buffer = PacketBuffer::new(1);
        let mut counters = NodeCounters::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut out = Vec::new();
        {
            let mut ctx = NodeCtx::new(0, 0, &mut table, &mut buffer, &mut counters, &mut rng, &mut out);
            ctx.buffer_packet(packet(3, 0));
            ctx.buffer_packet(packet(3, 1));
        }

        assert_eq!(counters.buffer_overflows, 1);
        assert_eq!(counters.data_dropped, 1);
        assert!(out.iter().any(|a| matches!(
            a,
            Action::Drop { packet, reason: DropReason::BufferOverflow } if packet.seq == 0
        )));
    }

    #[test]
    fn test_ctx_flush_needs_active_route() {
        let mut table = RoutingTable::new();
        let mut buffer = PacketBuffer::new(4);
        let mut counters = NodeCounters::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut out = Vec::new();
        {
            let mut ctx = NodeCtx::new(0, 10, &mut table, &mut buffer, &mut counters, &mut rng, &mut out);
            ctx.buffer_packet(packet(3, 0));
            assert_eq!(ctx.flush_buffer(3), 0);

            ctx.install_route(RouteEntry::valid(3, 1, 2, 4, 100));
            assert_eq!(ctx.flush_buffer(3), 1);
        }

        assert_eq!(counters.data_forwarded, 1);
        assert!(out.contains(&Action::Forward {
            next_hop: 1,
            packet: packet(3, 0)
        }));
    }
}

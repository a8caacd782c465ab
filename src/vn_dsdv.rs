// Proactive routing, DSDV style.
//
// Every node keeps a route to every destination it has heard of and dumps its
// whole table to its neighbors every advertisement interval. Even sequence
// numbers come from the destination itself, odd ones mark a broken route.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};
use rand::Rng;

use crate::vn_config::ProactiveConfig;
use crate::vn_error::ProtocolError;
use crate::vn_interface::{
    secs, AdvertisedRoute, ControlKind, ControlMessage, DropReason, Event, HopCount, NodeId, Packet, SeqNo, SimTime,
    TimerId, INFINITE_HOPS,
};
use crate::vn_node::NodeCtx;
use crate::vn_routing::{RouteStatus, RoutingProtocol};
use crate::vn_routing_table::{RouteEntry, RouteState, RoutingTable};

/// A worse route waiting out the settling time
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct HeldUpdate {
    next_hop: NodeId,
    hop_count: HopCount,
    seq: SeqNo,
}

pub struct Dsdv {
    advertisement_interval: SimTime,
    settling_time: SimTime,
    /// Routes not refreshed for this long are unreachable
    hold_time: SimTime,

    own_seq: SeqNo,
    held: BTreeMap<NodeId, HeldUpdate>,
}

impl Dsdv {
    pub fn new(config: &ProactiveConfig) -> Self {
        let advertisement_interval = secs(config.advertisement_interval);
        Self {
            advertisement_interval,
            settling_time: secs(config.settling_time),
            hold_time: advertisement_interval * config.hold_times.max(1) as u64,
            own_seq: 0,
            held: BTreeMap::new(),
        }
    }

    fn install_self(&self, ctx: &mut NodeCtx) {
        ctx.table.update(RouteEntry::valid(ctx.id, ctx.id, 0, self.own_seq, SimTime::MAX));
    }

    fn advertised(entry: &RouteEntry) -> AdvertisedRoute {
        AdvertisedRoute {
            dest: entry.dest,
            hop_count: if entry.is_valid() { entry.hop_count } else { INFINITE_HOPS },
            seq: entry.seq,
        }
    }

    fn periodic_update(&mut self, ctx: &mut NodeCtx) {
        self.own_seq = self.own_seq.wrapping_add(2);
        self.install_self(ctx);

        let now = ctx.now;
        let expired: Vec<NodeId> = ctx
            .table
            .iter()
            .filter(|entry| entry.dest != ctx.id && entry.is_valid() && entry.expires_at <= now)
            .map(|entry| entry.dest)
            .collect();
        for dest in expired {
            trace!("node {}: route to {} timed out", ctx.id, dest);
            ctx.mark_unreachable(dest);
        }

        let entries = ctx.table.iter().map(Self::advertised).collect();
        ctx.broadcast(ControlMessage::Advertisement { origin: ctx.id, entries });
        ctx.set_timer(TimerId::PeriodicUpdate, self.advertisement_interval);
    }

    /// Out-of-cycle advertisement carrying only what changed
    fn triggered_update(&mut self, ctx: &mut NodeCtx, entries: Vec<AdvertisedRoute>) {
        if entries.is_empty() {
            return;
        }
        ctx.counters.triggered_updates += 1;
        ctx.emit(Event::TriggeredUpdate { entries: entries.len() });
        ctx.broadcast(ControlMessage::Advertisement { origin: ctx.id, entries });
    }

    fn validate(ctx: &NodeCtx, origin: NodeId, entries: &[AdvertisedRoute], from: NodeId) -> Result<(), ProtocolError> {
        let malformed = |reason| ProtocolError::Malformed {
            kind: ControlKind::Advertisement,
            from,
            reason,
        };
        if from == ctx.id {
            return Err(malformed("advertisement from self"));
        }
        if origin != from {
            return Err(malformed("origin differs from sender"));
        }
        let mut seen = BTreeSet::new();
        if !entries.iter().all(|entry| seen.insert(entry.dest)) {
            return Err(malformed("duplicate destination"));
        }
        Ok(())
    }

    fn drop_hold(&mut self, ctx: &mut NodeCtx, dest: NodeId) {
        if self.held.remove(&dest).is_some() {
            ctx.cancel_timer(TimerId::Settling(dest));
        }
    }

    fn adopt(&mut self, ctx: &mut NodeCtx, dest: NodeId, next_hop: NodeId, hop_count: HopCount, seq: SeqNo) {
        self.drop_hold(ctx, dest);
        let expires_at = ctx.now + self.hold_time;
        ctx.install_route(RouteEntry::valid(dest, next_hop, hop_count, seq, expires_at));
    }

    /// Returns the entry to re-advertise immediately, if any
    fn process_entry(&mut self, ctx: &mut NodeCtx, from: NodeId, route: AdvertisedRoute) -> Option<AdvertisedRoute> {
        let AdvertisedRoute { dest, hop_count, seq } = route;

        if dest == ctx.id {
            if seq > self.own_seq {
                // somebody announced us broken with a newer number than ours
                self.own_seq = if seq % 2 == 0 { seq.wrapping_add(2) } else { seq.wrapping_add(1) };
                self.install_self(ctx);
                return Some(AdvertisedRoute {
                    dest,
                    hop_count: 0,
                    seq: self.own_seq,
                });
            }
            return None;
        }

        let existing = ctx.table.get(dest).copied();

        if hop_count == INFINITE_HOPS {
            let entry = existing?;
            if entry.next_hop != from || seq <= entry.seq {
                return None;
            }
            let was_valid = entry.is_valid();
            self.drop_hold(ctx, dest);
            ctx.table.update(RouteEntry {
                hop_count: INFINITE_HOPS,
                seq,
                state: RouteState::Unreachable,
                expires_at: ctx.now,
                ..entry
            });
            if !was_valid {
                return None;
            }
            ctx.emit(Event::RouteInvalidated {
                dest,
                seq,
                unreachable: true,
            });
            return Some(AdvertisedRoute {
                dest,
                hop_count: INFINITE_HOPS,
                seq,
            });
        }

        let hops = hop_count.saturating_add(1);
        match existing {
            None => self.adopt(ctx, dest, from, hops, seq),
            Some(entry) if seq > entry.seq => {
                if entry.is_valid() && hops > entry.hop_count && entry.next_hop != from {
                    self.hold(ctx, dest, HeldUpdate {
                        next_hop: from,
                        hop_count: hops,
                        seq,
                    });
                } else {
                    self.adopt(ctx, dest, from, hops, seq);
                }
            }
            Some(entry) if seq == entry.seq => {
                if hops < entry.hop_count || !entry.is_valid() {
                    self.adopt(ctx, dest, from, hops, seq);
                } else if entry.next_hop == from && hops == entry.hop_count {
                    ctx.table.refresh(dest, ctx.now + self.hold_time);
                }
            }
            Some(_) => {}
        }
        None
    }

    fn hold(&mut self, ctx: &mut NodeCtx, dest: NodeId, update: HeldUpdate) {
        match self.held.get(&dest) {
            None => {
                trace!("node {}: holding worse route to {} via {}", ctx.id, dest, update.next_hop);
                self.held.insert(dest, update);
                ctx.set_timer(TimerId::Settling(dest), self.settling_time);
            }
            Some(current) if update.seq > current.seq || (update.seq == current.seq && update.hop_count < current.hop_count) => {
                // keep the running timer
                self.held.insert(dest, update);
            }
            Some(_) => {}
        }
    }

    fn settled(&mut self, ctx: &mut NodeCtx, dest: NodeId) {
        let update = match self.held.remove(&dest) {
            Some(update) => update,
            None => return,
        };
        let still_newer = match ctx.table.get(dest) {
            None => true,
            Some(entry) => update.seq > entry.seq || (update.seq == entry.seq && (update.hop_count < entry.hop_count || !entry.is_valid())),
        };
        if still_newer {
            let expires_at = ctx.now + self.hold_time;
            ctx.install_route(RouteEntry::valid(dest, update.next_hop, update.hop_count, update.seq, expires_at));
            ctx.flush_buffer(dest);
        }
    }

    fn flush_routable(ctx: &mut NodeCtx) {
        for dest in ctx.buffer.destinations() {
            ctx.flush_buffer(dest);
        }
    }
}

impl RoutingProtocol for Dsdv {
    fn name(&self) -> &'static str {
        "DSDV"
    }

    fn start(&mut self, ctx: &mut NodeCtx) {
        self.install_self(ctx);
        // spread the first dumps so neighbors do not all talk at once
        let first = if self.advertisement_interval > 0 {
            ctx.rng.gen_range(0..self.advertisement_interval)
        } else {
            0
        };
        ctx.set_timer(TimerId::PeriodicUpdate, first);
    }

    fn on_send(&mut self, ctx: &mut NodeCtx, dest: NodeId, packet: Packet) {
        match ctx.table.active_route(dest, ctx.now) {
            Some(entry) => {
                let next_hop = entry.next_hop;
                ctx.forward(next_hop, packet);
            }
            // only the source waits for a route to appear
            None if packet.flow.source == ctx.id => ctx.buffer_packet(packet),
            None => {
                trace!("node {}: no route to {}, dropping relayed packet", ctx.id, dest);
                ctx.drop_packet(packet, DropReason::NoRoute);
            }
        }
    }

    fn on_control_message(&mut self, ctx: &mut NodeCtx, msg: ControlMessage, from: NodeId) -> Result<(), ProtocolError> {
        let (origin, entries) = match msg {
            ControlMessage::Advertisement { origin, entries } => (origin, entries),
            other => {
                return Err(ProtocolError::Malformed {
                    kind: other.kind(),
                    from,
                    reason: "not understood",
                })
            }
        };
        Self::validate(ctx, origin, &entries, from)?;

        let mut changed = Vec::new();
        for route in entries {
            if let Some(update) = self.process_entry(ctx, from, route) {
                changed.push(update);
            }
        }
        self.triggered_update(ctx, changed);
        Self::flush_routable(ctx);
        Ok(())
    }

    fn on_timer(&mut self, ctx: &mut NodeCtx, timer: TimerId) {
        match timer {
            TimerId::PeriodicUpdate => self.periodic_update(ctx),
            TimerId::Settling(dest) => self.settled(ctx, dest),
            TimerId::Discovery(_) => {}
        }
    }

    fn on_link_change(&mut self, ctx: &mut NodeCtx, neighbor: NodeId, now_reachable: bool) {
        if now_reachable {
            return;
        }

        let held_via: Vec<NodeId> = self
            .held
            .iter()
            .filter(|(_, update)| update.next_hop == neighbor)
            .map(|(dest, _)| *dest)
            .collect();
        for dest in held_via {
            self.drop_hold(ctx, dest);
        }

        let mut broken = Vec::new();
        for dest in ctx.table.entries_via(neighbor) {
            if dest == ctx.id || !ctx.table.get(dest).is_some_and(|entry| entry.is_valid()) {
                continue;
            }
            if let Some(seq) = ctx.mark_unreachable(dest) {
                broken.push(AdvertisedRoute {
                    dest,
                    hop_count: INFINITE_HOPS,
                    seq,
                });
            }
        }

        if !broken.is_empty() {
            debug!("node {}: link to {} lost, {} routes unreachable", ctx.id, neighbor, broken.len());
        }
        self.triggered_update(ctx, broken);
    }

    fn route_status(&self, table: &RoutingTable, dest: NodeId, now: SimTime) -> RouteStatus {
        match table.get(dest) {
            Some(entry) if entry.is_active(now) => RouteStatus::Active,
            Some(entry) if entry.is_valid() => RouteStatus::Stale,
            _ => RouteStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vn_interface::{FlowKey, UDP_PROTOCOL};
    use crate::vn_node::{Action, Node};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn node(id: NodeId) -> Node {
        Node::new(id, Box::new(Dsdv::new(&ProactiveConfig::default())), 64)
    }

    fn started(id: NodeId, rng: &mut StdRng) -> Node {
        let mut n = node(id);
        n.handle(0, rng, |p, ctx| p.start(ctx));
        n
    }

    fn adv(origin: NodeId, entries: &[(NodeId, HopCount, SeqNo)]) -> ControlMessage {
        ControlMessage::Advertisement {
            origin,
            entries: entries
                .iter()
                .map(|&(dest, hop_count, seq)| AdvertisedRoute { dest, hop_count, seq })
                .collect(),
        }
    }

    fn route(n: &Node, dest: NodeId) -> (NodeId, HopCount, SeqNo, RouteState) {
        let entry = n.table.get(dest).unwrap();
        (entry.next_hop, entry.hop_count, entry.seq, entry.state)
    }

    fn triggered(actions: &[Action]) -> Vec<AdvertisedRoute> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast(ControlMessage::Advertisement { entries, .. }) => Some(entries.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_start_installs_self_and_timer() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(4);
        let (_, actions) = n.handle(0, &mut rng, |p, ctx| p.start(ctx));

        assert_eq!(route(&n, 4), (4, 0, 0, RouteState::Valid));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SetTimer { timer: TimerId::PeriodicUpdate, delay } if *delay < secs(2.0))));
    }

    #[test]
    fn test_periodic_update_dumps_table_with_even_seq() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (2, 1, 4)]), 1)).0.unwrap();

        let (_, actions) = n.handle(20, &mut rng, |p, ctx| p.on_timer(ctx, TimerId::PeriodicUpdate));
        let dumped = triggered(&actions);

        assert_eq!(dumped.len(), 3);
        assert!(dumped.contains(&AdvertisedRoute { dest: 0, hop_count: 0, seq: 2 }));
        assert!(dumped.contains(&AdvertisedRoute { dest: 2, hop_count: 2, seq: 4 }));
        assert!(actions.contains(&Action::SetTimer {
            timer: TimerId::PeriodicUpdate,
            delay: secs(2.0)
        }));
    }

    #[test]
    fn test_newer_or_shorter_routes_win() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);

        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (5, 3, 10)]), 1)).0.unwrap();
        assert_eq!(route(&n, 5), (1, 4, 10, RouteState::Valid));

        // same seq, fewer hops
        n.handle(20, &mut rng, |p, ctx| p.on_control_message(ctx, adv(2, &[(2, 0, 2), (5, 1, 10)]), 2)).0.unwrap();
        assert_eq!(route(&n, 5), (2, 2, 10, RouteState::Valid));

        // older seq ignored
        n.handle(30, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(5, 0, 8)]), 1)).0.unwrap();
        assert_eq!(route(&n, 5), (2, 2, 10, RouteState::Valid));

        // newer seq from the current next hop is taken right away
        n.handle(40, &mut rng, |p, ctx| p.on_control_message(ctx, adv(2, &[(5, 3, 12)]), 2)).0.unwrap();
        assert_eq!(route(&n, 5), (2, 4, 12, RouteState::Valid));
    }

    #[test]
    fn test_worse_route_waits_for_settling_time() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (5, 1, 10)]), 1)).0.unwrap();

        let (_, actions) = n.handle(20, &mut rng, |p, ctx| p.on_control_message(ctx, adv(3, &[(5, 4, 12)]), 3));
        assert!(actions.contains(&Action::SetTimer {
            timer: TimerId::Settling(5),
            delay: secs(6.0)
        }));
        assert_eq!(route(&n, 5), (1, 2, 10, RouteState::Valid));

        n.handle(secs(6.0), &mut rng, |p, ctx| p.on_timer(ctx, TimerId::Settling(5)));
        assert_eq!(route(&n, 5), (3, 5, 12, RouteState::Valid));
    }

    #[test]
    fn test_better_update_discards_hold() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (5, 1, 10)]), 1)).0.unwrap();
        n.handle(20, &mut rng, |p, ctx| p.on_control_message(ctx, adv(3, &[(5, 4, 12)]), 3)).0.unwrap();

        let (_, actions) = n.handle(30, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(5, 1, 12)]), 1));
        assert!(actions.contains(&Action::CancelTimer(TimerId::Settling(5))));
        assert_eq!(route(&n, 5), (1, 2, 12, RouteState::Valid));

        // a stray timer finds nothing to install
        n.handle(secs(6.0), &mut rng, |p, ctx| p.on_timer(ctx, TimerId::Settling(5)));
        assert_eq!(route(&n, 5), (1, 2, 12, RouteState::Valid));
    }

    #[test]
    fn test_link_loss_forces_odd_seq_and_triggers() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (5, 1, 10)]), 1)).0.unwrap();

        let (_, actions) = n.handle(20, &mut rng, |p, ctx| p.on_link_change(ctx, 1, false));

        assert_eq!(route(&n, 1), (1, INFINITE_HOPS, 3, RouteState::Unreachable));
        assert_eq!(route(&n, 5), (1, INFINITE_HOPS, 11, RouteState::Unreachable));
        let update = triggered(&actions);
        assert_eq!(update.len(), 2);
        assert!(update.iter().all(|r| r.hop_count == INFINITE_HOPS && r.seq % 2 == 1));
        assert_eq!(n.counters.triggered_updates, 1);
        assert_eq!(n.route_status(5, 20), RouteStatus::Unknown);
    }

    #[test]
    fn test_broken_route_propagates_from_next_hop() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (5, 1, 10)]), 1)).0.unwrap();

        // from a neighbor that is not our next hop: ignored
        n.handle(15, &mut rng, |p, ctx| p.on_control_message(ctx, adv(2, &[(5, INFINITE_HOPS, 11)]), 2)).0.unwrap();
        assert_eq!(route(&n, 5).3, RouteState::Valid);

        let (_, actions) =
            n.handle(20, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(5, INFINITE_HOPS, 11)]), 1));
        assert_eq!(route(&n, 5), (1, INFINITE_HOPS, 11, RouteState::Unreachable));
        assert_eq!(triggered(&actions), vec![AdvertisedRoute { dest: 5, hop_count: INFINITE_HOPS, seq: 11 }]);
    }

    #[test]
    fn test_own_seq_jumps_past_broken_announcement() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (0, INFINITE_HOPS, 7)]), 1)).0.unwrap();
        assert_eq!(route(&n, 0), (0, 0, 8, RouteState::Valid));
    }

    #[test]
    fn test_buffered_packets_leave_once_route_appears() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);
        let packet = Packet {
            flow: FlowKey {
                source: 0,
                dest: 5,
                source_port: 49153,
                dest_port: 9,
                protocol: UDP_PROTOCOL,
            },
            size: 512,
            seq: 0,
            sent_at: 0,
            hops: 0,
        };

        n.handle(5, &mut rng, |p, ctx| p.on_send(ctx, 5, packet.clone()));
        assert_eq!(n.buffer.len(), 1);

        let (_, actions) = n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(1, 0, 2), (5, 1, 10)]), 1));
        assert!(actions.contains(&Action::Forward { next_hop: 1, packet }));
        assert!(n.buffer.is_empty());
    }

    #[test]
    fn test_relayed_packet_without_route_is_dropped() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(2, &mut rng);
        let relayed = Packet {
            flow: FlowKey {
                source: 0,
                dest: 5,
                source_port: 49153,
                dest_port: 9,
                protocol: UDP_PROTOCOL,
            },
            size: 512,
            seq: 3,
            sent_at: 0,
            hops: 1,
        };

        let (_, actions) = n.handle(5, &mut rng, |p, ctx| p.on_send(ctx, 5, relayed.clone()));
        assert!(actions.contains(&Action::Drop {
            packet: relayed,
            reason: DropReason::NoRoute
        }));
        assert!(n.buffer.is_empty());
        assert_eq!(n.counters.data_dropped, 1);
    }

    #[test]
    fn test_malformed_advertisement_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = started(0, &mut rng);

        let (result, _) = n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(2, &[(2, 0, 2)]), 1));
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));

        let (result, _) = n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, adv(1, &[(3, 1, 2), (3, 2, 2)]), 1));
        assert!(result.is_err());
        assert_eq!(n.table.len(), 1);
    }
}

// Reactive routing, AODV style.
//
// Routes are found on demand: a flooded RouteRequest is answered by the
// destination (or a node with a fresh route) with a RouteReply that travels
// back along the reverse path the request left behind.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::{debug, trace};
use rand::Rng;

use crate::vn_config::ReactiveConfig;
use crate::vn_error::ProtocolError;
use crate::vn_interface::{
    secs, ControlKind, ControlMessage, DropReason, Event, HopCount, NodeId, Packet, RequestId, SeqNo, SimTime,
    TimerId,
};
use crate::vn_node::NodeCtx;
use crate::vn_routing::{RouteStatus, RoutingProtocol};
use crate::vn_routing_table::{RouteEntry, RouteState, RoutingTable};

struct Discovery {
    /// Rebroadcasts so far
    retries: u32,
    started_at: SimTime,
}

pub struct Aodv {
    discovery_timeout: SimTime,
    max_retries: u32,
    active_route_timeout: SimTime,
    path_discovery_time: SimTime,
    net_diameter: HopCount,

    own_seq: SeqNo,
    next_request_id: RequestId,
    discoveries: BTreeMap<NodeId, Discovery>,
    // (origin, request id) -> when it was first seen
    seen_requests: HashMap<(NodeId, RequestId), SimTime>,
}

impl Aodv {
    pub fn new(config: &ReactiveConfig) -> Self {
        Self {
            discovery_timeout: secs(config.discovery_timeout),
            max_retries: config.max_retries,
            active_route_timeout: secs(config.active_route_timeout),
            path_discovery_time: secs(config.path_discovery_time),
            net_diameter: config.net_diameter,
            own_seq: 0,
            next_request_id: 0,
            discoveries: BTreeMap::new(),
            seen_requests: HashMap::new(),
        }
    }

    fn lifetime(&self, now: SimTime) -> SimTime {
        now + self.active_route_timeout
    }

    /// Timeout * 2^attempt, plus jitter in [0, timeout/10) for retries
    fn backoff(&self, ctx: &mut NodeCtx, attempt: u32) -> SimTime {
        let base = self.discovery_timeout.saturating_mul(1u64 << attempt.min(16));
        let spread = self.discovery_timeout / 10;
        if attempt == 0 || spread == 0 {
            base
        } else {
            base + ctx.rng.gen_range(0..spread)
        }
    }

    fn start_discovery(&mut self, ctx: &mut NodeCtx, dest: NodeId) {
        self.own_seq = self.own_seq.wrapping_add(1);
        self.discoveries.insert(
            dest,
            Discovery {
                retries: 0,
                started_at: ctx.now,
            },
        );
        self.send_request(ctx, dest, 0);
    }

    fn send_request(&mut self, ctx: &mut NodeCtx, dest: NodeId, attempt: u32) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        // our own flood will echo back from the neighbors
        self.seen_requests.insert((ctx.id, request_id), ctx.now);

        ctx.counters.route_requests += 1;
        ctx.emit(Event::DiscoveryStarted {
            dest,
            request_id,
            attempt,
        });
        let known_seq = ctx.table.get(dest).map_or(0, |entry| entry.seq);
        ctx.broadcast(ControlMessage::RouteRequest {
            origin: ctx.id,
            dest,
            request_id,
            hop_count: 0,
            origin_seq: self.own_seq,
            dest_seq: known_seq,
        });

        let delay = self.backoff(ctx, attempt);
        ctx.set_timer(TimerId::Discovery(dest), delay);
    }

    fn discovery_timeout(&mut self, ctx: &mut NodeCtx, dest: NodeId) {
        let retries = match self.discoveries.get(&dest) {
            Some(discovery) => discovery.retries,
            None => return,
        };

        if ctx.table.active_route(dest, ctx.now).is_some() {
            // learned from someone else's flood meanwhile
            self.discoveries.remove(&dest);
            ctx.flush_buffer(dest);
            return;
        }

        if retries < self.max_retries {
            if let Some(discovery) = self.discoveries.get_mut(&dest) {
                discovery.retries += 1;
            }
            self.send_request(ctx, dest, retries + 1);
            return;
        }

        self.discoveries.remove(&dest);
        let dropped = ctx.buffer.drain_for(dest);
        debug!(
            "node {}: discovery for {} failed after {} retries, dropping {} packets",
            ctx.id,
            dest,
            retries,
            dropped.len()
        );
        ctx.counters.discoveries_failed += 1;
        ctx.emit(Event::DiscoveryFailed {
            dest,
            dropped: dropped.len(),
        });
        for packet in dropped {
            ctx.drop_packet(packet, DropReason::DiscoveryFailed);
        }
        ctx.mark_unreachable(dest);
    }

    /// Install `dest via next_hop` if it is fresher than what we hold: newer
    /// sequence number, or equal with fewer hops, or ours is no longer usable.
    fn offer_route(&self, ctx: &mut NodeCtx, dest: NodeId, next_hop: NodeId, hop_count: HopCount, seq: SeqNo) -> bool {
        let expires_at = self.lifetime(ctx.now);
        let fresher = match ctx.table.get(dest) {
            None => true,
            Some(entry) if seq > entry.seq => true,
            Some(entry) if seq == entry.seq => hop_count < entry.hop_count || !entry.is_active(ctx.now),
            Some(_) => false,
        };

        if fresher {
            ctx.install_route(RouteEntry::valid(dest, next_hop, hop_count, seq, expires_at));
        } else if let Some(entry) = ctx.table.get(dest) {
            // only the same route at the same seq keeps an entry alive
            if entry.seq == seq && entry.next_hop == next_hop && entry.hop_count == hop_count {
                ctx.table.refresh(dest, expires_at);
            }
        }
        fresher
    }

    fn touch_neighbor(&self, ctx: &mut NodeCtx, neighbor: NodeId) {
        let seq = ctx.table.get(neighbor).map_or(0, |entry| entry.seq);
        self.offer_route(ctx, neighbor, neighbor, 1, seq);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_request(
        &mut self,
        ctx: &mut NodeCtx,
        from: NodeId,
        origin: NodeId,
        dest: NodeId,
        request_id: RequestId,
        hop_count: HopCount,
        origin_seq: SeqNo,
        dest_seq: SeqNo,
    ) -> Result<(), ProtocolError> {
        if from == ctx.id {
            return Err(malformed(ControlKind::RouteRequest, from, "request from self"));
        }
        if hop_count > self.net_diameter {
            return Err(malformed(ControlKind::RouteRequest, from, "hop count beyond network diameter"));
        }

        let now = ctx.now;
        let window = self.path_discovery_time;
        self.seen_requests.retain(|_, seen_at| *seen_at + window > now);

        if self.seen_requests.contains_key(&(origin, request_id)) {
            ctx.counters.duplicate_requests += 1;
            trace!("node {}: duplicate request {}:{} from {}", ctx.id, origin, request_id, from);
            return Ok(());
        }
        self.seen_requests.insert((origin, request_id), now);

        // reverse route towards the originator
        self.offer_route(ctx, origin, from, hop_count.saturating_add(1), origin_seq);
        if from != origin {
            self.touch_neighbor(ctx, from);
        }

        if dest == ctx.id {
            self.own_seq = self.own_seq.max(dest_seq).wrapping_add(1);
            ctx.unicast(
                from,
                ControlMessage::RouteReply {
                    origin,
                    dest,
                    hop_count: 0,
                    dest_seq: self.own_seq,
                },
            );
            return Ok(());
        }

        let cached = ctx
            .table
            .active_route(dest, now)
            .filter(|entry| entry.next_hop != from && entry.seq >= dest_seq)
            .copied();
        match cached {
            Some(entry) => ctx.unicast(
                from,
                ControlMessage::RouteReply {
                    origin,
                    dest,
                    hop_count: entry.hop_count,
                    dest_seq: entry.seq,
                },
            ),
            None => ctx.broadcast(ControlMessage::RouteRequest {
                origin,
                dest,
                request_id,
                hop_count: hop_count.saturating_add(1),
                origin_seq,
                dest_seq,
            }),
        }
        Ok(())
    }

    fn on_reply(
        &mut self,
        ctx: &mut NodeCtx,
        from: NodeId,
        origin: NodeId,
        dest: NodeId,
        hop_count: HopCount,
        dest_seq: SeqNo,
    ) -> Result<(), ProtocolError> {
        if from == ctx.id {
            return Err(malformed(ControlKind::RouteReply, from, "reply from self"));
        }
        if dest == ctx.id {
            return Err(malformed(ControlKind::RouteReply, from, "reply about the receiver"));
        }

        let hops = hop_count.saturating_add(1);
        if from != dest {
            self.touch_neighbor(ctx, from);
        }
        if !self.offer_route(ctx, dest, from, hops, dest_seq) {
            debug!(
                "node {}: reply for {} via {} (seq {}, {} hops) not fresher than ours",
                ctx.id, dest, from, dest_seq, hops
            );
        }

        // a rejected reply leaves the discovery and its timer running
        let installed = ctx.table.active_route(dest, ctx.now).map(|entry| entry.hop_count);
        if let Some(route_hops) = installed {
            if let Some(discovery) = self.discoveries.remove(&dest) {
                ctx.cancel_timer(TimerId::Discovery(dest));
                ctx.emit(Event::DiscoveryCompleted {
                    dest,
                    hop_count: route_hops,
                    latency: ctx.now.saturating_sub(discovery.started_at),
                });
            }
            ctx.flush_buffer(dest);
        }

        if origin == ctx.id {
            return Ok(());
        }

        let next_hop = match ctx.table.active_route(origin, ctx.now) {
            Some(entry) => entry.next_hop,
            None => return Err(ProtocolError::NoReverseRoute { origin, from }),
        };
        ctx.table.refresh(origin, self.lifetime(ctx.now));
        ctx.unicast(
            next_hop,
            ControlMessage::RouteReply {
                origin,
                dest,
                hop_count: hops,
                dest_seq,
            },
        );
        Ok(())
    }

    fn on_route_error(&mut self, ctx: &mut NodeCtx, from: NodeId, unreachable: Vec<(NodeId, SeqNo)>) {
        let mut lost = Vec::new();
        for (dest, seq) in unreachable {
            let known = match ctx.table.get(dest) {
                Some(entry) if entry.next_hop == from && entry.is_valid() => entry.seq,
                _ => continue,
            };
            ctx.mark_stale(dest);
            lost.push((dest, known.max(seq)));
        }

        if !lost.is_empty() {
            ctx.broadcast(ControlMessage::RouteError { unreachable: lost });
        }
    }
}

impl RoutingProtocol for Aodv {
    fn name(&self) -> &'static str {
        "AODV"
    }

    fn start(&mut self, _ctx: &mut NodeCtx) {}

    fn on_send(&mut self, ctx: &mut NodeCtx, dest: NodeId, packet: Packet) {
        if let Some(entry) = ctx.table.active_route(dest, ctx.now).copied() {
            let expires_at = self.lifetime(ctx.now);
            ctx.table.refresh(dest, expires_at);
            ctx.table.refresh(entry.next_hop, expires_at);
            ctx.forward(entry.next_hop, packet);
            return;
        }

        ctx.buffer_packet(packet);
        if !self.discoveries.contains_key(&dest) {
            self.start_discovery(ctx, dest);
        }
    }

    fn on_control_message(&mut self, ctx: &mut NodeCtx, msg: ControlMessage, from: NodeId) -> Result<(), ProtocolError> {
        match msg {
            ControlMessage::RouteRequest {
                origin,
                dest,
                request_id,
                hop_count,
                origin_seq,
                dest_seq,
            } => self.on_request(ctx, from, origin, dest, request_id, hop_count, origin_seq, dest_seq),
            ControlMessage::RouteReply {
                origin,
                dest,
                hop_count,
                dest_seq,
            } => self.on_reply(ctx, from, origin, dest, hop_count, dest_seq),
            ControlMessage::RouteError { unreachable } => {
                self.on_route_error(ctx, from, unreachable);
                Ok(())
            }
            ControlMessage::Advertisement { .. } => Err(malformed(ControlKind::Advertisement, from, "not understood")),
        }
    }

    fn on_timer(&mut self, ctx: &mut NodeCtx, timer: TimerId) {
        if let TimerId::Discovery(dest) = timer {
            self.discovery_timeout(ctx, dest);
        }
    }

    fn on_link_change(&mut self, ctx: &mut NodeCtx, neighbor: NodeId, now_reachable: bool) {
        if now_reachable {
            return;
        }

        let mut lost = Vec::new();
        for dest in ctx.table.entries_via(neighbor) {
            if ctx.mark_stale(dest) {
                let seq = ctx.table.get(dest).map_or(0, |entry| entry.seq);
                lost.push((dest, seq));
            }
        }
        if !lost.is_empty() {
            debug!("node {}: link to {} lost, {} routes broken", ctx.id, neighbor, lost.len());
            ctx.broadcast(ControlMessage::RouteError { unreachable: lost });
        }
    }

    fn route_status(&self, table: &RoutingTable, dest: NodeId, now: SimTime) -> RouteStatus {
        if self.discoveries.contains_key(&dest) {
            return RouteStatus::Discovering;
        }
        match table.get(dest) {
            Some(entry) if entry.is_active(now) => RouteStatus::Active,
            Some(entry) if entry.state != RouteState::Unreachable => RouteStatus::Stale,
            _ => RouteStatus::Unknown,
        }
    }
}

fn malformed(kind: ControlKind, from: NodeId, reason: &'static str) -> ProtocolError {
    ProtocolError::Malformed { kind, from, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vn_interface::{FlowKey, UDP_PROTOCOL};
    use crate::vn_node::{Action, Node};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn node(id: NodeId) -> Node {
        Node::new(id, Box::new(Aodv::new(&ReactiveConfig::default())), 64)
    }

    fn packet(source: NodeId, dest: NodeId, seq: u64) -> Packet {
        Packet {
            flow: FlowKey {
                source,
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

    fn requests(actions: &[Action]) -> Vec<ControlMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast(msg @ ControlMessage::RouteRequest { .. }) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_send_without_route_starts_one_discovery() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);

        let (_, first) = n.handle(0, &mut rng, |p, ctx| p.on_send(ctx, 3, packet(0, 3, 0)));
        let (_, second) = n.handle(10, &mut rng, |p, ctx| p.on_send(ctx, 3, packet(0, 3, 1)));

        assert_eq!(requests(&first).len(), 1);
        assert!(requests(&second).is_empty());
        assert_eq!(n.buffer.len(), 2);
        assert_eq!(n.route_status(3, 10), RouteStatus::Discovering);
        assert!(first.contains(&Action::SetTimer {
            timer: TimerId::Discovery(3),
            delay: secs(2.8)
        }));
    }

    #[test]
    fn test_retries_back_off_then_give_up() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);
        let timeout = secs(2.8);

        n.handle(0, &mut rng, |p, ctx| p.on_send(ctx, 3, packet(0, 3, 0)));

        let (_, retry) = n.handle(timeout, &mut rng, |p, ctx| p.on_timer(ctx, TimerId::Discovery(3)));
        assert_eq!(requests(&retry).len(), 1);
        let delay = retry
            .iter()
            .find_map(|a| match a {
                Action::SetTimer { delay, .. } => Some(*delay),
                _ => None,
            })
            .unwrap();
        assert!(delay >= 2 * timeout && delay < 2 * timeout + timeout / 10);

        n.handle(3 * timeout, &mut rng, |p, ctx| p.on_timer(ctx, TimerId::Discovery(3)));
        let (_, give_up) = n.handle(8 * timeout, &mut rng, |p, ctx| p.on_timer(ctx, TimerId::Discovery(3)));

        assert!(requests(&give_up).is_empty());
        assert!(give_up.iter().any(|a| matches!(
            a,
            Action::Drop {
                reason: DropReason::DiscoveryFailed,
                ..
            }
        )));
        assert!(n.buffer.is_empty());
        assert_eq!(n.counters.route_requests, 3);
        assert_eq!(n.counters.discoveries_failed, 1);
        assert_eq!(n.route_status(3, 8 * timeout), RouteStatus::Unknown);
    }

    #[test]
    fn test_duplicate_request_is_not_rebroadcast() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(1);
        let rreq = ControlMessage::RouteRequest {
            origin: 0,
            dest: 3,
            request_id: 7,
            hop_count: 0,
            origin_seq: 1,
            dest_seq: 0,
        };

        let (result, first) = n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rreq.clone(), 0));
        assert!(result.is_ok());
        assert_eq!(
            requests(&first),
            vec![ControlMessage::RouteRequest {
                origin: 0,
                dest: 3,
                request_id: 7,
                hop_count: 1,
                origin_seq: 1,
                dest_seq: 0,
            }]
        );

        let (_, second) = n.handle(5, &mut rng, |p, ctx| p.on_control_message(ctx, rreq.clone(), 2));
        assert!(second.is_empty());
        assert_eq!(n.counters.duplicate_requests, 1);

        // reverse route to the originator
        let reverse = n.table.get(0).unwrap();
        assert_eq!((reverse.next_hop, reverse.hop_count, reverse.seq), (0, 1, 1));
    }

    #[test]
    fn test_destination_replies_with_fresh_seq() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(3);
        let rreq = ControlMessage::RouteRequest {
            origin: 0,
            dest: 3,
            request_id: 0,
            hop_count: 1,
            origin_seq: 1,
            dest_seq: 0,
        };

        let (_, actions) = n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rreq, 1));
        assert!(actions.contains(&Action::Unicast {
            to: 1,
            msg: ControlMessage::RouteReply {
                origin: 0,
                dest: 3,
                hop_count: 0,
                dest_seq: 1,
            }
        }));
        assert_eq!(n.table.get(0).unwrap().hop_count, 2);
        assert_eq!(n.table.get(1).unwrap().hop_count, 1);
    }

    #[test]
    fn test_malformed_request_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(1);
        let rreq = ControlMessage::RouteRequest {
            origin: 0,
            dest: 3,
            request_id: 0,
            hop_count: 99,
            origin_seq: 1,
            dest_seq: 0,
        };

        let (result, actions) = n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rreq, 0));
        assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
        assert!(actions.is_empty());
        assert!(n.table.is_empty());
    }

    #[test]
    fn test_reply_completes_discovery_and_flushes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);
        n.handle(0, &mut rng, |p, ctx| p.on_send(ctx, 3, packet(0, 3, 0)));

        let rrep = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 1,
            dest_seq: 4,
        };
        let (result, actions) = n.handle(1_000, &mut rng, |p, ctx| p.on_control_message(ctx, rrep, 1));

        assert!(result.is_ok());
        assert!(actions.contains(&Action::CancelTimer(TimerId::Discovery(3))));
        assert!(actions.contains(&Action::Forward {
            next_hop: 1,
            packet: packet(0, 3, 0)
        }));
        assert_eq!(n.route_status(3, 1_000), RouteStatus::Active);

        // a cached route is reused without a new request
        let (_, later) = n.handle(2_000, &mut rng, |p, ctx| p.on_send(ctx, 3, packet(0, 3, 1)));
        assert!(requests(&later).is_empty());
    }

    #[test]
    fn test_reply_with_older_seq_is_ignored() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);
        let newer = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 2,
            dest_seq: 6,
        };
        let older = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 0,
            dest_seq: 5,
        };

        n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, newer, 1));
        n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, older, 2));

        let entry = n.table.get(3).unwrap();
        assert_eq!((entry.next_hop, entry.hop_count, entry.seq), (1, 3, 6));
    }

    #[test]
    fn test_rejected_reply_keeps_discovery_running() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);
        // 3's own flood teaches 0 a route at seq 6
        let flood = ControlMessage::RouteRequest {
            origin: 3,
            dest: 9,
            request_id: 0,
            hop_count: 0,
            origin_seq: 6,
            dest_seq: 0,
        };
        n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, flood, 3)).0.unwrap();

        // long expired by now
        let now = secs(10.0);
        let (_, started) = n.handle(now, &mut rng, |p, ctx| p.on_send(ctx, 3, packet(0, 3, 0)));
        assert!(matches!(
            requests(&started).as_slice(),
            [ControlMessage::RouteRequest { dest: 3, dest_seq: 6, .. }]
        ));

        let cached = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 2,
            dest_seq: 4,
        };
        let (result, actions) = n.handle(now + 1_000, &mut rng, |p, ctx| p.on_control_message(ctx, cached, 1));
        assert!(result.is_ok());
        assert!(!actions.contains(&Action::CancelTimer(TimerId::Discovery(3))));
        assert!(!actions.iter().any(|a| matches!(a, Action::Forward { .. })));
        assert_eq!(n.buffer.len(), 1);
        assert_eq!(n.route_status(3, now + 1_000), RouteStatus::Discovering);

        let entry = n.table.get(3).unwrap();
        assert_eq!(entry.seq, 6);
        assert!(!entry.is_active(now + 1_000));

        // the timer is still armed and retries
        let (_, retry) = n.handle(now + secs(2.8), &mut rng, |p, ctx| p.on_timer(ctx, TimerId::Discovery(3)));
        assert_eq!(requests(&retry).len(), 1);
    }

    #[test]
    fn test_cached_reply_needs_a_fresh_enough_route() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(1);
        let learned = ControlMessage::RouteReply {
            origin: 1,
            dest: 3,
            hop_count: 1,
            dest_seq: 4,
        };
        n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, learned, 2)).0.unwrap();

        let wants_newer = ControlMessage::RouteRequest {
            origin: 0,
            dest: 3,
            request_id: 0,
            hop_count: 0,
            origin_seq: 1,
            dest_seq: 6,
        };
        let (_, actions) = n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, wants_newer, 0));
        assert!(matches!(
            requests(&actions).as_slice(),
            [ControlMessage::RouteRequest { hop_count: 1, dest_seq: 6, .. }]
        ));
        assert!(!actions.iter().any(|a| matches!(a, Action::Unicast { .. })));

        let any_route = ControlMessage::RouteRequest {
            origin: 0,
            dest: 3,
            request_id: 1,
            hop_count: 0,
            origin_seq: 1,
            dest_seq: 4,
        };
        let (_, actions) = n.handle(20, &mut rng, |p, ctx| p.on_control_message(ctx, any_route, 0));
        assert!(actions.contains(&Action::Unicast {
            to: 0,
            msg: ControlMessage::RouteReply {
                origin: 0,
                dest: 3,
                hop_count: 2,
                dest_seq: 4,
            }
        }));
        assert!(requests(&actions).is_empty());
    }

    #[test]
    fn test_intermediate_node_forwards_reply_along_reverse_route() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(1);
        let rreq = ControlMessage::RouteRequest {
            origin: 0,
            dest: 3,
            request_id: 0,
            hop_count: 0,
            origin_seq: 1,
            dest_seq: 0,
        };
        n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rreq, 0)).0.unwrap();

        let rrep = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 0,
            dest_seq: 5,
        };
        let (result, actions) = n.handle(1_000, &mut rng, |p, ctx| p.on_control_message(ctx, rrep, 3));
        assert!(result.is_ok());
        assert!(actions.contains(&Action::Unicast {
            to: 0,
            msg: ControlMessage::RouteReply {
                origin: 0,
                dest: 3,
                hop_count: 1,
                dest_seq: 5,
            }
        }));

        let forward = n.table.get(3).unwrap();
        assert_eq!((forward.next_hop, forward.hop_count, forward.seq), (3, 1, 5));
        // the reverse route lives on while replies use it
        assert_eq!(n.table.get(0).unwrap().expires_at, 1_000 + secs(3.0));
    }

    #[test]
    fn test_route_error_from_next_hop_is_propagated() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);
        let rrep = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 1,
            dest_seq: 4,
        };
        n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rrep, 1)).0.unwrap();

        // 2 is not our next hop towards 3
        let elsewhere = ControlMessage::RouteError {
            unreachable: vec![(3, 5)],
        };
        let (_, ignored) = n.handle(10, &mut rng, |p, ctx| p.on_control_message(ctx, elsewhere, 2));
        assert!(ignored.is_empty());
        assert_eq!(n.route_status(3, 10), RouteStatus::Active);

        let rerr = ControlMessage::RouteError {
            unreachable: vec![(3, 5), (7, 1)],
        };
        let (result, actions) = n.handle(20, &mut rng, |p, ctx| p.on_control_message(ctx, rerr, 1));
        assert!(result.is_ok());
        assert!(actions.contains(&Action::Broadcast(ControlMessage::RouteError {
            unreachable: vec![(3, 5)]
        })));
        assert_eq!(n.route_status(3, 20), RouteStatus::Stale);
        assert_eq!(n.route_status(1, 20), RouteStatus::Active);
    }

    #[test]
    fn test_reply_without_reverse_route_is_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(1);
        let rrep = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 0,
            dest_seq: 2,
        };

        let (result, _) = n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rrep, 3));
        assert_eq!(result, Err(ProtocolError::NoReverseRoute { origin: 0, from: 3 }));
    }

    #[test]
    fn test_link_loss_breaks_routes_and_reports() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut n = node(0);
        let rrep = ControlMessage::RouteReply {
            origin: 0,
            dest: 3,
            hop_count: 1,
            dest_seq: 4,
        };
        n.handle(0, &mut rng, |p, ctx| p.on_control_message(ctx, rrep, 1));

        let (_, actions) = n.handle(10, &mut rng, |p, ctx| p.on_link_change(ctx, 1, false));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast(ControlMessage::RouteError { unreachable }) if unreachable.contains(&(3, 4))
        )));
        assert_eq!(n.route_status(3, 10), RouteStatus::Stale);
    }
}

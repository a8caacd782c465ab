// Channel Model
//
// Abstract reachability / delivery primitive. No radio propagation or MAC
// contention: a transmission succeeds iff the receiver is within range at
// send time, and arrives after a fixed propagation delay.

use std::collections::BTreeSet;

use log::debug;

use crate::vn_config::{NetworkEvent, SimConfig};
use crate::vn_error::ScheduleError;
use crate::vn_interface::{secs, Frame, NodeId, Position, SimTime};
use crate::vn_mobility::MobilityModel;
use crate::vn_scheduler::Scheduler;

/// A frame that made it across the channel
#[derive(Clone, Debug, PartialEq)]
pub struct Arrival {
    pub from: NodeId,
    pub frame: Frame,
}

pub struct Channel {
    mobility: Box<dyn MobilityModel>,
    range: f64,
    propagation_delay: SimTime,
    isolated: BTreeSet<NodeId>,
    /// Severed links, stored as (low id, high id)
    severed: BTreeSet<(NodeId, NodeId)>,
}

impl Channel {
    pub fn new(config: &SimConfig, mobility: Box<dyn MobilityModel>) -> Self {
        Self {
            mobility,
            range: config.channel.range,
            propagation_delay: secs(config.channel.propagation_delay),
            isolated: config.channel.isolated_nodes.iter().copied().collect(),
            severed: BTreeSet::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.mobility.node_count()
    }

    pub fn position(&self, node: NodeId, time: SimTime) -> Position {
        self.mobility.position(node, time)
    }

    pub fn propagation_delay(&self) -> SimTime {
        self.propagation_delay
    }

    pub fn is_isolated(&self, node: NodeId) -> bool {
        self.isolated.contains(&node)
    }

    pub fn reachable(&self, a: NodeId, b: NodeId, time: SimTime) -> bool {
        if a == b || self.is_isolated(a) || self.is_isolated(b) {
            return false;
        }
        if self.severed.contains(&link(a, b)) {
            return false;
        }
        let distance = self.position(a, time).distance(&self.position(b, time));
        distance <= self.range
    }

    /// Every node currently reachable from `node`, ascending
    pub fn neighbors(&self, node: NodeId, time: SimTime) -> BTreeSet<NodeId> {
        (0..self.node_count() as NodeId)
            .filter(|&other| self.reachable(node, other, time))
            .collect()
    }

    /// Schedule an arrival at `to` if it is reachable now. Otherwise the frame
    /// is lost without any feedback to the sender.
    pub fn deliver_unicast<P: From<Arrival>>(
        &self,
        sched: &mut Scheduler<P>,
        frame: Frame,
        from: NodeId,
        to: NodeId,
    ) -> Result<bool, ScheduleError> {
        let now = sched.now();
        if !self.reachable(from, to, now) {
            debug!("channel: {} -> {} out of reach at {}", from, to, now);
            return Ok(false);
        }
        sched.schedule_at(now + self.propagation_delay, to, P::from(Arrival { from, frame }))?;
        Ok(true)
    }

    /// Independent unicast attempt to every reachable neighbor. Returns the receivers.
    pub fn deliver_broadcast<P: From<Arrival>>(
        &self,
        sched: &mut Scheduler<P>,
        frame: &Frame,
        from: NodeId,
    ) -> Result<Vec<NodeId>, ScheduleError> {
        let receivers: Vec<NodeId> = self.neighbors(from, sched.now()).into_iter().collect();
        for &to in &receivers {
            self.deliver_unicast(sched, frame.clone(), from, to)?;
        }
        Ok(receivers)
    }

    /// Apply a scenario link / node event
    pub fn apply(&mut self, event: &NetworkEvent) {
        match *event {
            NetworkEvent::LinkDown { a, b } => {
                self.severed.insert(link(a, b));
            }
            NetworkEvent::LinkUp { a, b } => {
                self.severed.remove(&link(a, b));
            }
            NetworkEvent::Isolate { node } => {
                self.isolated.insert(node);
            }
            NetworkEvent::Rejoin { node } => {
                self.isolated.remove(&node);
            }
        }
    }
}

fn link(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vn_config::{MobilitySource, Waypoint};
    use crate::vn_interface::ControlMessage;
    use crate::vn_mobility;
    use std::collections::BTreeMap;

    // static chain at x = 0, 200, 400
    fn chain_config() -> SimConfig {
        let mut config = SimConfig::default();
        config.num_nodes = 3;
        let mut waypoints = BTreeMap::new();
        for id in 0..3u32 {
            waypoints.insert(id, vec![Waypoint { time: 0.0, x: 200.0 * id as f64, y: 0.0 }]);
        }
        config.mobility.source = MobilitySource::Trace { waypoints };
        config
    }

    fn chain_channel(config: &SimConfig) -> Channel {
        Channel::new(config, vn_mobility::build(config))
    }

    fn probe() -> Frame {
        Frame::Control(ControlMessage::RouteError { unreachable: vec![] })
    }

    #[test]
    fn test_reachability_by_range() {
        let channel = chain_channel(&chain_config());
        assert!(channel.reachable(0, 1, 0));
        assert!(channel.reachable(1, 2, 0));
        assert!(!channel.reachable(0, 2, 0));
        assert!(!channel.reachable(1, 1, 0));
        assert_eq!(channel.neighbors(1, 0).into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_isolated_and_severed() {
        let mut config = chain_config();
        config.channel.isolated_nodes = vec![0];
        let mut channel = chain_channel(&config);

        assert!(!channel.reachable(0, 1, 0));
        channel.apply(&NetworkEvent::LinkDown { a: 2, b: 1 });
        assert!(!channel.reachable(1, 2, 0));
        assert!(channel.neighbors(1, 0).is_empty());

        channel.apply(&NetworkEvent::LinkUp { a: 1, b: 2 });
        channel.apply(&NetworkEvent::Rejoin { node: 0 });
        assert_eq!(channel.neighbors(1, 0).len(), 2);
    }

    #[test]
    fn test_unicast_arrives_after_propagation_delay() {
        let channel = chain_channel(&chain_config());
        let mut sched: Scheduler<Arrival> = Scheduler::new();

        assert!(channel.deliver_unicast(&mut sched, probe(), 0, 1).unwrap());
        assert!(!channel.deliver_unicast(&mut sched, probe(), 0, 2).unwrap());

        let event = sched.pop_until(u64::MAX).unwrap();
        assert_eq!(event.time, 1_000);
        assert_eq!(event.target, 1);
        assert_eq!(event.payload.from, 0);
        assert!(sched.pop_until(u64::MAX).is_none());
    }

    #[test]
    fn test_broadcast_reaches_neighbors_in_order() {
        let channel = chain_channel(&chain_config());
        let mut sched: Scheduler<Arrival> = Scheduler::new();

        let receivers = channel.deliver_broadcast(&mut sched, &probe(), 1).unwrap();
        assert_eq!(receivers, vec![0, 2]);
        assert_eq!(sched.pending(), 2);
        assert_eq!(sched.pop_until(u64::MAX).unwrap().target, 0);
    }
}

// Simulation Engine
//
// Owns the scheduler, the channel, the node arena, traffic and the flow
// monitor, and wires them together: every scheduled event is dispatched to
// the owning component, protocol handlers run against their node, and the
// actions they leave behind are carried out through the channel.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::vn_channel::{Arrival, Channel};
use crate::vn_config::{NetworkEvent, ProtocolKind, SimConfig};
use crate::vn_error::{ConfigError, ScheduleError, SimError};
use crate::vn_flow_monitor::{FlowMonitor, FlowReport};
use crate::vn_interface::{
    as_secs, secs, ControlKind, DropReason, Event, EventSink, Frame, NodeId, NoOpSink, Packet, PositionSink,
    SimTime, TimerId, MAX_PACKET_HOPS,
};
use crate::vn_mobility;
use crate::vn_node::{Action, Node, NodeCtx, NodeCounters};
use crate::vn_routing::{self, RoutingProtocol};
use crate::vn_scheduler::{ScheduledEvent, Scheduler};
use crate::vn_traffic::TrafficGenerator;

const VEHICLE_COLOR: [u8; 3] = [255, 0, 0];
const ISOLATED_COLOR: [u8; 3] = [128, 128, 128];

// ============================================================================
// Events
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum SimEvent {
    /// Next packet of a traffic flow (index into the generator)
    AppSend { flow: usize },
    Arrival(Arrival),
    Timer(TimerId),
    /// Periodic neighbor re-evaluation for every node
    LinkCheck,
    Network(NetworkEvent),
    PositionSample,
}

impl From<Arrival> for SimEvent {
    fn from(arrival: Arrival) -> Self {
        SimEvent::Arrival(arrival)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Control-message overhead of one run
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ControlStats {
    /// Transmissions; a broadcast counts once
    pub sent: BTreeMap<ControlKind, u64>,
    pub received: BTreeMap<ControlKind, u64>,
    pub malformed: u64,
}

impl ControlStats {
    pub fn total_sent(&self) -> u64 {
        self.sent.values().sum()
    }

    pub fn total_received(&self) -> u64 {
        self.received.values().sum()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    /// Valid entries, own entry excluded
    pub valid_routes: usize,
    pub buffered: usize,
    pub counters: NodeCounters,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct RunResult {
    pub protocol: ProtocolKind,
    pub seed: u64,
    pub num_nodes: usize,
    /// Seconds simulated
    pub sim_time: f64,
    pub report: FlowReport,
    pub control: ControlStats,
    pub nodes: Vec<NodeSummary>,
    pub events_processed: u64,
}

impl RunResult {
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║    VANET ROUTING RESULTS: {:<29}║", self.protocol.name());
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration: {} vehicles, {:.1}s, seed {}", self.num_nodes, self.sim_time, self.seed);
        println!("Events processed: {}", self.events_processed);
        println!();

        println!("═══ Flows ═══");
        for (i, flow) in self.report.flows.iter().enumerate() {
            println!(
                "  Flow {} (V{} -> V{}): tx={} rx={} lost={} pdr={} delay={} tput={:.2} Kbps",
                i + 1,
                flow.flow.source,
                flow.flow.dest,
                flow.tx_packets,
                flow.rx_packets,
                flow.lost_packets,
                fmt_percent(flow.pdr),
                fmt_ms(flow.avg_delay_ms),
                flow.throughput_kbps
            );
        }
        println!();

        let aggregate = &self.report.aggregate;
        println!("═══ Aggregate ═══");
        println!("  Total Throughput: {:.2} Kbps", aggregate.total_throughput_kbps);
        println!("  Average Delay: {}", fmt_ms(aggregate.average_delay_ms));
        println!("  Packet Delivery Ratio: {}", fmt_percent(aggregate.pdr));
        println!("  Packet Loss Ratio: {}", fmt_percent(aggregate.loss_ratio));
        if self.report.in_flight > 0 {
            println!("  Still in flight: {}", self.report.in_flight);
        }
        println!();

        println!("═══ Routing Overhead ═══");
        println!("  Control Messages Sent: {}", self.control.total_sent());
        for (kind, count) in &self.control.sent {
            println!("    {:?}: {}", kind, count);
        }
        println!("  Control Messages Received: {}", self.control.total_received());
        println!("  Malformed / Rejected: {}", self.control.malformed);
        let overflows: u64 = self.nodes.iter().map(|n| n.counters.buffer_overflows).sum();
        let failed: u64 = self.nodes.iter().map(|n| n.counters.discoveries_failed).sum();
        println!("  Buffer Overflows: {}", overflows);
        println!("  Failed Discoveries: {}", failed);
        println!();
    }
}

fn fmt_percent(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}%", v))
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.3} ms", v))
}

// ============================================================================
// World: everything but the scheduler
// ============================================================================

struct World {
    config: SimConfig,
    channel: Channel,
    nodes: Vec<Node>,
    traffic: TrafficGenerator,
    monitor: FlowMonitor,
    rng: StdRng,
    control: ControlStats,
    sink: Box<dyn EventSink>,
    positions: Option<Box<dyn PositionSink>>,
    link_check_interval: SimTime,
    position_interval: SimTime,
}

impl World {
    fn dispatch(&mut self, sched: &mut Scheduler<SimEvent>, event: ScheduledEvent<SimEvent>) {
        let node = event.target;
        let result = match event.payload {
            SimEvent::AppSend { flow } => self.app_send(sched, node, flow),
            SimEvent::Arrival(arrival) => self.arrival(sched, node, arrival),
            SimEvent::Timer(timer) => self.timer(sched, node, timer),
            SimEvent::LinkCheck => self.link_check(sched),
            SimEvent::Network(change) => self.network_event(sched, change),
            SimEvent::PositionSample => self.sample_positions(sched),
        };

        // the loop never unwinds on a single bad event
        if let Err(err) = result {
            warn!("t={:.6}s node {}: {}", as_secs(sched.now()), node, err);
        }
    }

    fn run_handler<R, F>(&mut self, sched: &mut Scheduler<SimEvent>, id: NodeId, handler: F) -> Result<R, ScheduleError>
    where
        F: FnOnce(&mut dyn RoutingProtocol, &mut NodeCtx) -> R,
    {
        let node = &mut self.nodes[id as usize];
        let (result, actions) = node.handle(sched.now(), &mut self.rng, handler);
        self.apply(sched, id, actions)?;
        Ok(result)
    }

    fn apply(&mut self, sched: &mut Scheduler<SimEvent>, id: NodeId, actions: Vec<Action>) -> Result<(), ScheduleError> {
        let now = sched.now();
        for action in actions {
            match action {
                Action::Broadcast(msg) => {
                    *self.control.sent.entry(msg.kind()).or_insert(0) += 1;
                    self.channel.deliver_broadcast(sched, &Frame::Control(msg), id)?;
                }
                Action::Unicast { to, msg } => {
                    *self.control.sent.entry(msg.kind()).or_insert(0) += 1;
                    self.channel.deliver_unicast(sched, Frame::Control(msg), id, to)?;
                }
                Action::Forward { next_hop, mut packet } => {
                    packet.hops += 1;
                    if packet.hops > MAX_PACKET_HOPS {
                        self.lose(now, id, packet, DropReason::HopLimit);
                    } else if self.channel.reachable(id, next_hop, now) {
                        self.channel.deliver_unicast(sched, Frame::Data(packet), id, next_hop)?;
                    } else {
                        self.lose(now, id, packet, DropReason::ChannelLoss);
                    }
                }
                Action::Drop { packet, reason } => {
                    self.monitor.on_loss(&packet, reason);
                }
                Action::SetTimer { timer, delay } => {
                    let node = &mut self.nodes[id as usize];
                    if let Some(handle) = node.timers.remove(&timer) {
                        sched.cancel(handle);
                    }
                    let handle = sched.schedule_at(now.saturating_add(delay), id, SimEvent::Timer(timer))?;
                    node.timers.insert(timer, handle);
                }
                Action::CancelTimer(timer) => {
                    if let Some(handle) = self.nodes[id as usize].timers.remove(&timer) {
                        sched.cancel(handle);
                    }
                }
                Action::Emit(event) => self.sink.log(now, id, event),
            }
        }
        Ok(())
    }

    /// A packet lost after the protocol let go of it
    fn lose(&mut self, now: SimTime, id: NodeId, packet: Packet, reason: DropReason) {
        self.nodes[id as usize].counters.data_dropped += 1;
        self.sink.log(
            now,
            id,
            Event::PacketDropped {
                flow: packet.flow,
                seq: packet.seq,
                reason,
            },
        );
        self.monitor.on_loss(&packet, reason);
    }

    fn app_send(&mut self, sched: &mut Scheduler<SimEvent>, id: NodeId, flow: usize) -> Result<(), ScheduleError> {
        let now = sched.now();
        let packet = match self.traffic.emit(flow, now) {
            Some(packet) => packet,
            None => return Ok(()),
        };
        if let Some(next) = self.traffic.next_send(flow, now) {
            sched.schedule_at(next, id, SimEvent::AppSend { flow })?;
        }

        self.monitor.on_transmit(&packet, now);
        self.sink.log(
            now,
            id,
            Event::PacketSent {
                flow: packet.flow,
                seq: packet.seq,
            },
        );
        let dest = packet.dest();
        self.run_handler(sched, id, |protocol, ctx| protocol.on_send(ctx, dest, packet))
    }

    fn arrival(&mut self, sched: &mut Scheduler<SimEvent>, id: NodeId, arrival: Arrival) -> Result<(), ScheduleError> {
        let now = sched.now();
        let Arrival { from, frame } = arrival;

        match frame {
            Frame::Data(packet) if packet.dest() == id => {
                if self.monitor.on_receive(&packet, now) {
                    self.sink.log(
                        now,
                        id,
                        Event::PacketDelivered {
                            flow: packet.flow,
                            seq: packet.seq,
                            delay: now.saturating_sub(packet.sent_at),
                        },
                    );
                }
                Ok(())
            }
            Frame::Data(packet) => {
                let dest = packet.dest();
                self.run_handler(sched, id, |protocol, ctx| protocol.on_send(ctx, dest, packet))
            }
            Frame::Control(msg) => {
                let kind = msg.kind();
                self.nodes[id as usize].counters.control_received += 1;
                *self.control.received.entry(kind).or_insert(0) += 1;

                let outcome = self.run_handler(sched, id, |protocol, ctx| protocol.on_control_message(ctx, msg, from))?;
                if let Err(err) = outcome {
                    debug!("t={:.6}s node {}: dropped control message: {}", as_secs(now), id, err);
                    self.nodes[id as usize].counters.protocol_errors += 1;
                    self.control.malformed += 1;
                    self.sink.log(now, id, Event::MalformedMessage { kind, from });
                }
                Ok(())
            }
        }
    }

    fn timer(&mut self, sched: &mut Scheduler<SimEvent>, id: NodeId, timer: TimerId) -> Result<(), ScheduleError> {
        self.nodes[id as usize].timers.remove(&timer);
        self.run_handler(sched, id, |protocol, ctx| protocol.on_timer(ctx, timer))
    }

    /// Re-evaluate the neighbor sets of `ids` and tell the protocols what changed
    fn refresh_links(&mut self, sched: &mut Scheduler<SimEvent>, ids: &BTreeSet<NodeId>) -> Result<(), ScheduleError> {
        let now = sched.now();
        for &id in ids {
            let current = self.channel.neighbors(id, now);
            let previous = std::mem::replace(&mut self.nodes[id as usize].neighbors, current.clone());

            let lost: Vec<NodeId> = previous.difference(&current).copied().collect();
            let gained: Vec<NodeId> = current.difference(&previous).copied().collect();
            for neighbor in lost {
                self.link_change(sched, id, neighbor, false)?;
            }
            for neighbor in gained {
                self.link_change(sched, id, neighbor, true)?;
            }
        }
        Ok(())
    }

    fn link_change(
        &mut self,
        sched: &mut Scheduler<SimEvent>,
        id: NodeId,
        neighbor: NodeId,
        reachable: bool,
    ) -> Result<(), ScheduleError> {
        self.sink.log(sched.now(), id, Event::LinkChanged { neighbor, reachable });
        self.run_handler(sched, id, |protocol, ctx| protocol.on_link_change(ctx, neighbor, reachable))
    }

    fn link_check(&mut self, sched: &mut Scheduler<SimEvent>) -> Result<(), ScheduleError> {
        let all: BTreeSet<NodeId> = (0..self.nodes.len() as NodeId).collect();
        self.refresh_links(sched, &all)?;
        sched.schedule_at(sched.now() + self.link_check_interval, 0, SimEvent::LinkCheck)?;
        Ok(())
    }

    fn network_event(&mut self, sched: &mut Scheduler<SimEvent>, change: NetworkEvent) -> Result<(), ScheduleError> {
        info!("t={:.3}s network event {:?}", as_secs(sched.now()), change);

        let mut affected = BTreeSet::new();
        match change {
            NetworkEvent::LinkDown { a, b } | NetworkEvent::LinkUp { a, b } => {
                affected.insert(a);
                affected.insert(b);
            }
            NetworkEvent::Isolate { node } | NetworkEvent::Rejoin { node } => {
                affected.insert(node);
                affected.extend(self.nodes[node as usize].neighbors.iter().copied());
                affected.extend(self.channel.neighbors(node, sched.now()));
            }
        }

        self.channel.apply(&change);
        if let NetworkEvent::Rejoin { node } = change {
            affected.extend(self.channel.neighbors(node, sched.now()));
        }
        self.refresh_links(sched, &affected)
    }

    fn sample_positions(&mut self, sched: &mut Scheduler<SimEvent>) -> Result<(), ScheduleError> {
        let now = sched.now();
        if let Some(sink) = self.positions.as_mut() {
            for id in 0..self.nodes.len() as NodeId {
                let color = if self.channel.is_isolated(id) {
                    ISOLATED_COLOR
                } else {
                    VEHICLE_COLOR
                };
                sink.update(now, id, self.channel.position(id, now), &format!("V{}", id), color);
            }
            sched.schedule_at(now + self.position_interval, 0, SimEvent::PositionSample)?;
        }
        Ok(())
    }
}

// ============================================================================
// Simulation
// ============================================================================

pub struct Simulation {
    kind: ProtocolKind,
    end: SimTime,
    scheduler: Scheduler<SimEvent>,
    world: World,
}

impl Simulation {
    /// Validate the configuration and set up a run. Nothing is scheduled when
    /// the configuration is rejected.
    pub fn new(config: &SimConfig, kind: ProtocolKind) -> Result<Self, SimError> {
        let config = config.validated()?;
        let num_nodes = config.num_nodes;

        let channel = Channel::new(&config, vn_mobility::build(&config));
        if channel.node_count() != num_nodes {
            return Err(ConfigError::InvalidParameter {
                name: "mobility",
                reason: format!("model covers {} nodes, expected {}", channel.node_count(), num_nodes),
            }
            .into());
        }

        let capacity = vn_routing::buffer_capacity(kind, &config);
        let mut nodes: Vec<Node> = (0..num_nodes as NodeId)
            .map(|id| Node::new(id, vn_routing::build(kind, &config), capacity))
            .collect();
        for node in nodes.iter_mut() {
            node.neighbors = channel.neighbors(node.id, 0);
        }

        let traffic = TrafficGenerator::new(&config);
        let mut monitor = FlowMonitor::new();
        for flow in traffic.flows() {
            monitor.register(*flow);
        }

        let link_check_interval = secs(config.channel.link_check_interval);
        let position_interval = secs(config.output.position_interval.unwrap_or(1.0));
        let end = secs(config.sim_time);

        let mut world = World {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            channel,
            nodes,
            traffic,
            monitor,
            control: ControlStats::default(),
            sink: Box::new(NoOpSink),
            positions: None,
            link_check_interval,
            position_interval,
        };

        let mut scheduler = Scheduler::new();

        for id in 0..num_nodes as NodeId {
            world.run_handler(&mut scheduler, id, |protocol, ctx| protocol.start(ctx))?;
        }

        if let Some(start) = world.traffic.first_send() {
            for index in 0..world.traffic.flow_count() {
                if let Some(flow) = world.traffic.flow(index) {
                    scheduler.schedule_at(start, flow.source, SimEvent::AppSend { flow: index })?;
                }
            }
        }

        scheduler.schedule_at(link_check_interval, 0, SimEvent::LinkCheck)?;

        for scheduled in &world.config.events {
            let target = match scheduled.event {
                NetworkEvent::LinkDown { a, .. } | NetworkEvent::LinkUp { a, .. } => a,
                NetworkEvent::Isolate { node } | NetworkEvent::Rejoin { node } => node,
            };
            scheduler.schedule_at(secs(scheduled.at), target, SimEvent::Network(scheduled.event))?;
        }

        info!(
            "{}: {} vehicles, {} flows, {:.1}s",
            kind.name(),
            num_nodes,
            world.traffic.flow_count(),
            as_secs(end)
        );

        Ok(Self {
            kind,
            end,
            scheduler,
            world,
        })
    }

    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.world.sink = sink;
        self
    }

    /// Sample every node's position from now on
    pub fn with_position_sink(mut self, sink: Box<dyn PositionSink>) -> Self {
        if self.world.positions.is_none() {
            let now = self.scheduler.now();
            // cannot fail: never in the past
            let _ = self.scheduler.schedule_at(now, 0, SimEvent::PositionSample);
        }
        self.world.positions = Some(sink);
        self
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.world.nodes.get(id as usize)
    }

    pub fn channel(&self) -> &Channel {
        &self.world.channel
    }

    /// Process events up to `time` (never past the end of the run)
    pub fn run_until(&mut self, time: SimTime) -> u64 {
        let stop = time.min(self.end);
        let world = &mut self.world;
        self.scheduler.run_until(stop, |sched, event| world.dispatch(sched, event))
    }

    /// Close the run at the current time and compute the results
    pub fn finish(mut self) -> RunResult {
        let now = self.scheduler.now();
        let world = &mut self.world;
        let report = world.monitor.finalize(now, world.config.monitor.max_delay);

        let nodes = world
            .nodes
            .iter()
            .map(|node| NodeSummary {
                id: node.id,
                valid_routes: node.table.iter().filter(|e| e.is_valid() && e.dest != node.id).count(),
                buffered: node.buffer.len(),
                counters: node.counters.clone(),
            })
            .collect();

        RunResult {
            protocol: self.kind,
            seed: world.config.seed,
            num_nodes: world.config.num_nodes,
            sim_time: as_secs(now),
            report,
            control: world.control.clone(),
            nodes,
            events_processed: self.scheduler.processed(),
        }
    }

    /// Run to the configured simulation time; unfired events are discarded
    pub fn run(mut self) -> RunResult {
        self.run_until(self.end);
        self.finish()
    }
}

/// Run every selected protocol from a fresh state with the same seed
pub fn run_comparison(config: &SimConfig) -> Result<Vec<RunResult>, SimError> {
    let mut results = Vec::new();
    for kind in config.protocol.kinds() {
        let simulation = Simulation::new(config, kind)?;
        results.push(simulation.run());
    }
    Ok(results)
}

// Mobility Models
//
// Position providers consumed by the channel. Synthetic mobility places
// vehicles on a grid and moves them at constant velocity; trace mobility
// interpolates waypoints supplied by the scenario.

use std::collections::BTreeMap;

use crate::vn_config::{MobilitySource, SimConfig, Waypoint};
use crate::vn_interface::{as_secs, NodeId, Position, SimTime};

pub trait MobilityModel {
    fn position(&self, node: NodeId, time: SimTime) -> Position;
    fn node_count(&self) -> usize;
}

/// Build the model selected by the configuration
pub fn build(config: &SimConfig) -> Box<dyn MobilityModel> {
    let mobility = &config.mobility;
    match &mobility.source {
        MobilitySource::Synthetic => Box::new(SyntheticMobility::new(
            config.num_nodes,
            mobility.road_length,
            mobility.node_speed,
            mobility.lane_spacing,
        )),
        MobilitySource::Trace { waypoints } => Box::new(TraceMobility::new(config.num_nodes, waypoints.clone())),
    }
}

// ============================================================================
// Synthetic: grid placement + constant velocity
// ============================================================================

pub struct SyntheticMobility {
    initial: Vec<Position>,
    /// Velocity along x in m/s
    velocity: Vec<f64>,
}

impl SyntheticMobility {
    /// Row-first grid of width max(1, N/2), columns spread over the road.
    /// Even ids drive towards +x, odd ids towards -x.
    pub fn new(num_nodes: usize, road_length: f64, node_speed: f64, lane_spacing: f64) -> Self {
        let width = (num_nodes / 2).max(1);
        let dx = road_length / width as f64;

        let initial = (0..num_nodes)
            .map(|i| {
                let column = (i % width) as f64;
                let row = (i / width) as f64;
                Position::new(column * dx, row * lane_spacing)
            })
            .collect();

        let velocity = (0..num_nodes)
            .map(|i| if i % 2 == 0 { node_speed } else { -node_speed })
            .collect();

        Self { initial, velocity }
    }
}

impl MobilityModel for SyntheticMobility {
    fn position(&self, node: NodeId, time: SimTime) -> Position {
        let index = node as usize;
        match self.initial.get(index) {
            Some(start) => Position::new(start.x + self.velocity[index] * as_secs(time), start.y),
            None => Position::default(),
        }
    }

    fn node_count(&self) -> usize {
        self.initial.len()
    }
}

// ============================================================================
// Trace: waypoint interpolation
// ============================================================================

pub struct TraceMobility {
    num_nodes: usize,
    waypoints: BTreeMap<NodeId, Vec<Waypoint>>,
}

impl TraceMobility {
    pub fn new(num_nodes: usize, waypoints: BTreeMap<NodeId, Vec<Waypoint>>) -> Self {
        Self { num_nodes, waypoints }
    }
}

impl MobilityModel for TraceMobility {
    /// Linear interpolation, held at the first / last waypoint outside the trace
    fn position(&self, node: NodeId, time: SimTime) -> Position {
        let points = match self.waypoints.get(&node) {
            Some(points) if !points.is_empty() => points,
            _ => return Position::default(),
        };

        let t = as_secs(time);
        let first = points[0];
        if t <= first.time {
            return Position::new(first.x, first.y);
        }

        // first waypoint strictly after t
        let next = points.partition_point(|w| w.time <= t);
        if next == points.len() {
            let last = points[points.len() - 1];
            return Position::new(last.x, last.y);
        }

        let a = points[next - 1];
        let b = points[next];
        let span = b.time - a.time;
        if span <= 0.0 {
            return Position::new(b.x, b.y);
        }
        let f = (t - a.time) / span;
        Position::new(a.x + (b.x - a.x) * f, a.y + (b.y - a.y) * f)
    }

    fn node_count(&self) -> usize {
        self.num_nodes
    }
}

// Traffic Generator
//
// Constant-bitrate UDP traffic between fixed vehicle pairs: the first half of
// the vehicles each send to the vehicle half the fleet away.

use crate::vn_config::SimConfig;
use crate::vn_interface::{secs, FlowKey, NodeId, Packet, SimTime, UDP_PROTOCOL};

/// First ephemeral source port, flow i sends from SOURCE_PORT_BASE + i
pub const SOURCE_PORT_BASE: u16 = 49153;

struct FlowState {
    key: FlowKey,
    sent: u64,
}

pub struct TrafficGenerator {
    flows: Vec<FlowState>,
    packet_size: u32,
    num_packets: u64,
    interval: SimTime,
    start: SimTime,
    end: SimTime,
}

/// Node i sends to node (i + N/2) mod N, for i in [0, N/2)
pub fn pairs(num_nodes: usize, max_flows: Option<usize>) -> Vec<(NodeId, NodeId)> {
    let half = num_nodes / 2;
    let count = max_flows.map_or(half, |max| max.min(half));
    (0..count)
        .map(|i| (i as NodeId, ((i + half) % num_nodes) as NodeId))
        .collect()
}

impl TrafficGenerator {
    pub fn new(config: &SimConfig) -> Self {
        let traffic = &config.traffic;
        let flows = pairs(config.num_nodes, traffic.max_flows)
            .into_iter()
            .enumerate()
            .map(|(i, (source, dest))| FlowState {
                key: FlowKey {
                    source,
                    dest,
                    source_port: SOURCE_PORT_BASE.wrapping_add(i as u16),
                    dest_port: traffic.port_base.wrapping_add(i as u16),
                    protocol: UDP_PROTOCOL,
                },
                sent: 0,
            })
            .collect();

        Self {
            flows,
            packet_size: traffic.packet_size,
            num_packets: traffic.num_packets,
            interval: secs(traffic.packet_interval),
            start: secs(traffic.data_start),
            end: secs(traffic.data_end),
        }
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowKey> {
        self.flows.iter().map(|flow| &flow.key)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn flow(&self, index: usize) -> Option<&FlowKey> {
        self.flows.get(index).map(|flow| &flow.key)
    }

    /// Time of the first packet of every flow, if the window allows any
    pub fn first_send(&self) -> Option<SimTime> {
        (self.num_packets > 0 && self.start < self.end).then_some(self.start)
    }

    /// Stamp the next packet of a flow, or None once the flow is done
    pub fn emit(&mut self, index: usize, now: SimTime) -> Option<Packet> {
        let (num_packets, end, size) = (self.num_packets, self.end, self.packet_size);
        let flow = self.flows.get_mut(index)?;
        if flow.sent >= num_packets || now >= end {
            return None;
        }

        let packet = Packet {
            flow: flow.key,
            size,
            seq: flow.sent,
            sent_at: now,
            hops: 0,
        };
        flow.sent += 1;
        Some(packet)
    }

    /// When the flow sends again after a packet at `now`
    pub fn next_send(&self, index: usize, now: SimTime) -> Option<SimTime> {
        let flow = self.flows.get(index)?;
        let next = now + self.interval;
        (flow.sent < self.num_packets && next < self.end).then_some(next)
    }
}

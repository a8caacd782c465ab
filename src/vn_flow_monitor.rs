// Flow Monitor
//
// Per-flow packet accounting keyed by the 5-tuple, plus the end-of-run
// statistics. A packet is counted as received or lost at most once, so the
// number of received packets can never exceed the number sent.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::vn_interface::{as_secs, secs, DropReason, FlowKey, Packet, SimTime};

/// Lower bound on a flow's duration when computing throughput (seconds)
pub const MIN_FLOW_DURATION: f64 = 0.001;

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    /// Sum of end-to-end delays in microseconds
    pub delay_sum: SimTime,
    pub first_tx: Option<SimTime>,
    pub last_rx: Option<SimTime>,
    pub losses: BTreeMap<DropReason, u64>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct FlowResult {
    pub flow: FlowKey,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    /// Percent, None without transmissions
    pub pdr: Option<f64>,
    /// None without receptions
    pub avg_delay_ms: Option<f64>,
    pub throughput_kbps: f64,
    pub losses: BTreeMap<DropReason, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct AggregateResult {
    pub total_throughput_kbps: f64,
    pub average_delay_ms: Option<f64>,
    pub pdr: Option<f64>,
    pub loss_ratio: Option<f64>,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct FlowReport {
    pub flows: Vec<FlowResult>,
    pub aggregate: AggregateResult,
    /// Packets neither received nor counted lost when the run ended
    pub in_flight: u64,
}

#[derive(Default)]
pub struct FlowMonitor {
    flows: IndexMap<FlowKey, FlowStats>,
    // (flow, packet seq) -> send time
    outstanding: HashMap<(FlowKey, u64), SimTime>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a flow show up in the report even if it never sends
    pub fn register(&mut self, flow: FlowKey) {
        self.flows.entry(flow).or_default();
    }

    pub fn on_transmit(&mut self, packet: &Packet, now: SimTime) {
        let stats = self.flows.entry(packet.flow).or_default();
        stats.tx_packets += 1;
        stats.tx_bytes += packet.size as u64;
        stats.first_tx.get_or_insert(now);
        self.outstanding.insert((packet.flow, packet.seq), packet.sent_at);
    }

    /// Record a delivery. Returns false for a packet that is not outstanding.
    pub fn on_receive(&mut self, packet: &Packet, now: SimTime) -> bool {
        let sent_at = match self.outstanding.remove(&(packet.flow, packet.seq)) {
            Some(sent_at) => sent_at,
            None => return false,
        };
        let stats = self.flows.entry(packet.flow).or_default();
        stats.rx_packets += 1;
        stats.rx_bytes += packet.size as u64;
        stats.delay_sum += now.saturating_sub(sent_at);
        stats.last_rx = Some(now);
        true
    }

    /// Record a loss. Returns false for a packet that is not outstanding.
    pub fn on_loss(&mut self, packet: &Packet, reason: DropReason) -> bool {
        if self.outstanding.remove(&(packet.flow, packet.seq)).is_none() {
            return false;
        }
        let stats = self.flows.entry(packet.flow).or_default();
        stats.lost_packets += 1;
        *stats.losses.entry(reason).or_insert(0) += 1;
        true
    }

    /// Sweep packets older than `max_delay` into the lost counters and compute
    /// per-flow and aggregate statistics.
    pub fn finalize(&mut self, end: SimTime, max_delay: f64) -> FlowReport {
        let cutoff = end.saturating_sub(secs(max_delay));
        let mut expired: Vec<(FlowKey, u64)> = self
            .outstanding
            .iter()
            .filter(|(_, &sent_at)| sent_at <= cutoff)
            .map(|(key, _)| *key)
            .collect();
        expired.sort();
        for (flow, seq) in expired {
            self.outstanding.remove(&(flow, seq));
            let stats = self.flows.entry(flow).or_default();
            stats.lost_packets += 1;
            *stats.losses.entry(DropReason::Expired).or_insert(0) += 1;
        }

        let flows: Vec<FlowResult> = self.flows.iter().map(|(key, stats)| flow_result(key, stats)).collect();

        let mut aggregate = AggregateResult::default();
        let mut delay_sum: SimTime = 0;
        for (result, stats) in flows.iter().zip(self.flows.values()) {
            aggregate.total_throughput_kbps += result.throughput_kbps;
            aggregate.tx_packets += stats.tx_packets;
            aggregate.rx_packets += stats.rx_packets;
            aggregate.lost_packets += stats.lost_packets;
            delay_sum += stats.delay_sum;
        }
        aggregate.pdr = percent(aggregate.rx_packets, aggregate.tx_packets);
        aggregate.loss_ratio = percent(aggregate.lost_packets, aggregate.tx_packets);
        aggregate.average_delay_ms =
            (aggregate.rx_packets > 0).then(|| as_secs(delay_sum) / aggregate.rx_packets as f64 * 1000.0);

        FlowReport {
            flows,
            aggregate,
            in_flight: self.outstanding.len() as u64,
        }
    }
}

fn percent(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

fn flow_result(key: &FlowKey, stats: &FlowStats) -> FlowResult {
    let throughput_kbps = match (stats.first_tx, stats.last_rx) {
        (Some(first), Some(last)) if stats.rx_packets > 0 => {
            let duration = (as_secs(last) - as_secs(first)).max(MIN_FLOW_DURATION);
            stats.rx_bytes as f64 * 8.0 / duration / 1000.0
        }
        _ => 0.0,
    };

    FlowResult {
        flow: *key,
        tx_packets: stats.tx_packets,
        rx_packets: stats.rx_packets,
        lost_packets: stats.lost_packets,
        pdr: percent(stats.rx_packets, stats.tx_packets),
        avg_delay_ms: (stats.rx_packets > 0)
            .then(|| as_secs(stats.delay_sum) / stats.rx_packets as f64 * 1000.0),
        throughput_kbps,
        losses: stats.losses.clone(),
    }
}

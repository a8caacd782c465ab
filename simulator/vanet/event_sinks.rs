//! Event sinks for scenario runs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use vanet_rust::vn_interface::as_secs;
use vanet_rust::{Event, EventSink, NodeId, SimTime};

// ============================================================================
// Console Logging Sink
// ============================================================================

/// Writes every event through the logger
pub struct ConsoleEventSink {
    enabled: bool,
}

impl ConsoleEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for ConsoleEventSink {
    fn log(&mut self, time: SimTime, node: NodeId, event: Event) {
        if !self.enabled {
            return;
        }

        // Format: time node event_type event_details
        let t = as_secs(time);
        match event {
            Event::PacketSent { flow, seq } => {
                info!("{:>10.6} V{:<3} PacketSent        {}->{} #{}", t, node, flow.source, flow.dest, seq);
            }
            Event::PacketForwarded { flow, seq, next_hop } => {
                info!(
                    "{:>10.6} V{:<3} PacketForwarded   {}->{} #{} via:{}",
                    t, node, flow.source, flow.dest, seq, next_hop
                );
            }
            Event::PacketDelivered { flow, seq, delay } => {
                info!(
                    "{:>10.6} V{:<3} PacketDelivered   {}->{} #{} delay:{:.3}ms",
                    t,
                    node,
                    flow.source,
                    flow.dest,
                    seq,
                    as_secs(delay) * 1000.0
                );
            }
            Event::PacketDropped { flow, seq, reason } => {
                info!(
                    "{:>10.6} V{:<3} PacketDropped     {}->{} #{} {:?}",
                    t, node, flow.source, flow.dest, seq, reason
                );
            }
            Event::ControlSent { kind, to } => match to {
                Some(to) => info!("{:>10.6} V{:<3} ControlSent       {:?} to:{}", t, node, kind, to),
                None => info!("{:>10.6} V{:<3} ControlSent       {:?} broadcast", t, node, kind),
            },
            Event::DiscoveryStarted { dest, request_id, attempt } => {
                info!(
                    "{:>10.6} V{:<3} DiscoveryStarted  dest:{} id:{} attempt:{}",
                    t, node, dest, request_id, attempt
                );
            }
            Event::DiscoveryCompleted { dest, hop_count, latency } => {
                info!(
                    "{:>10.6} V{:<3} DiscoveryDone     dest:{} hops:{} after:{:.3}ms",
                    t,
                    node,
                    dest,
                    hop_count,
                    as_secs(latency) * 1000.0
                );
            }
            Event::DiscoveryFailed { dest, dropped } => {
                info!("{:>10.6} V{:<3} DiscoveryFailed   dest:{} dropped:{}", t, node, dest, dropped);
            }
            Event::RouteInstalled {
                dest,
                next_hop,
                hop_count,
                seq,
            } => {
                info!(
                    "{:>10.6} V{:<3} RouteInstalled    dest:{} via:{} hops:{} seq:{}",
                    t, node, dest, next_hop, hop_count, seq
                );
            }
            Event::RouteInvalidated { dest, seq, unreachable } => {
                info!(
                    "{:>10.6} V{:<3} RouteInvalidated  dest:{} seq:{} {}",
                    t,
                    node,
                    dest,
                    seq,
                    if unreachable { "unreachable" } else { "stale" }
                );
            }
            Event::LinkChanged { neighbor, reachable } => {
                info!(
                    "{:>10.6} V{:<3} LinkChanged       {} {}",
                    t,
                    node,
                    neighbor,
                    if reachable { "up" } else { "down" }
                );
            }
            Event::TriggeredUpdate { entries } => {
                info!("{:>10.6} V{:<3} TriggeredUpdate   entries:{}", t, node, entries);
            }
            Event::MalformedMessage { kind, from } => {
                info!("{:>10.6} V{:<3} Malformed         {:?} from:{}", t, node, kind, from);
            }
        }
    }
}

// ============================================================================
// CSV Event Sink
// ============================================================================

/// CSV event sink for structured data export
pub struct CsvEventSink {
    writer: BufWriter<File>,
}

impl CsvEventSink {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "time,node,event_type,related_node,value1,value2,details")?;

        Ok(Self { writer })
    }
}

impl EventSink for CsvEventSink {
    fn log(&mut self, time: SimTime, node: NodeId, event: Event) {
        let t = as_secs(time);
        let name = event.name();
        let result = match event {
            Event::PacketSent { flow, seq } => {
                writeln!(self.writer, "{:.6},{},{},{},{},0,flow", t, node, name, flow.dest, seq)
            }
            Event::PacketForwarded { flow, seq, next_hop } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},{},next_hop",
                t, node, name, next_hop, seq, flow.dest
            ),
            Event::PacketDelivered { flow, seq, delay } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},{},delay_us",
                t, node, name, flow.source, seq, delay
            ),
            Event::PacketDropped { flow, seq, reason } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},0,{:?}",
                t, node, name, flow.dest, seq, reason
            ),
            Event::ControlSent { kind, to } => match to {
                Some(to) => writeln!(self.writer, "{:.6},{},{},{},0,0,{:?}", t, node, name, to, kind),
                None => writeln!(self.writer, "{:.6},{},{},,0,0,{:?}", t, node, name, kind),
            },
            Event::DiscoveryStarted { dest, request_id, attempt } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},{},request_attempt",
                t, node, name, dest, request_id, attempt
            ),
            Event::DiscoveryCompleted { dest, hop_count, latency } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},{},hops_latency_us",
                t, node, name, dest, hop_count, latency
            ),
            Event::DiscoveryFailed { dest, dropped } => {
                writeln!(self.writer, "{:.6},{},{},{},{},0,dropped", t, node, name, dest, dropped)
            }
            Event::RouteInstalled {
                dest,
                next_hop,
                hop_count,
                seq,
            } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},{},via={}",
                t, node, name, dest, hop_count, seq, next_hop
            ),
            Event::RouteInvalidated { dest, seq, unreachable } => writeln!(
                self.writer,
                "{:.6},{},{},{},{},0,unreachable={}",
                t, node, name, dest, seq, unreachable
            ),
            Event::LinkChanged { neighbor, reachable } => writeln!(
                self.writer,
                "{:.6},{},{},{},0,0,reachable={}",
                t, node, name, neighbor, reachable
            ),
            Event::TriggeredUpdate { entries } => {
                writeln!(self.writer, "{:.6},{},{},,{},0,entries", t, node, name, entries)
            }
            Event::MalformedMessage { kind, from } => {
                writeln!(self.writer, "{:.6},{},{},{},0,0,{:?}", t, node, name, from, kind)
            }
        };

        if let Err(e) = result {
            eprintln!("Error writing to CSV: {}", e);
        }
    }
}

impl Drop for CsvEventSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ============================================================================
// Multi Sink (Combine Multiple Sinks)
// ============================================================================

/// Combines multiple event sinks
#[derive(Default)]
pub struct MultiEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for MultiEventSink {
    fn log(&mut self, time: SimTime, node: NodeId, event: Event) {
        for sink in &mut self.sinks {
            sink.log(time, node, event.clone());
        }
    }
}

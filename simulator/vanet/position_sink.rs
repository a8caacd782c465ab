//! Node position trace for external visualization

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use vanet_rust::vn_interface::as_secs;
use vanet_rust::{NodeId, Position, PositionSink, SimTime};

/// One CSV row per node and sample: time,node,label,x,y,r,g,b
pub struct CsvPositionSink {
    writer: BufWriter<File>,
}

impl CsvPositionSink {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "time,node,label,x,y,r,g,b")?;
        Ok(Self { writer })
    }
}

impl PositionSink for CsvPositionSink {
    fn update(&mut self, time: SimTime, node: NodeId, position: Position, label: &str, color: [u8; 3]) {
        let result = writeln!(
            self.writer,
            "{:.3},{},{},{:.2},{:.2},{},{},{}",
            as_secs(time),
            node,
            label,
            position.x,
            position.y,
            color[0],
            color[1],
            color[2]
        );
        if let Err(e) = result {
            eprintln!("Error writing position trace: {}", e);
        }
    }
}

impl Drop for CsvPositionSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

//! Scalar metric sinks
//!
//! The trainer reports every scalar as `(tag, value, step)`. Tags follow the
//! `group/name` convention (`losses/qf1_loss`, `charts/episodic_return`, ...).

use std::{fs::File, path::Path};

use csv::Writer;
use serde::Serialize;

use crate::error::Result;

/// Receives scalar metrics
pub trait MetricsSink {
    fn emit(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    /// Push buffered records to their destination
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn emit(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        (**self).emit(tag, value, step)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Writes every metric through the `log` facade at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn emit(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        log::info!(target: "metrics", "step={step} {tag}={value:.6}");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Record<'a> {
    step: usize,
    tag: &'a str,
    value: f64,
}

/// Appends `step,tag,value` rows to a CSV file
pub struct CsvSink {
    writer: Writer<File>,
}

impl CsvSink {
    /// Create (or truncate) the file at `path`; the header is written with the first row
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            writer: Writer::from_path(path)?,
        })
    }
}

impl MetricsSink for CsvSink {
    fn emit(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.writer.serialize(Record { step, tag, value })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<(String, f64, usize)>,
}

impl MemorySink {
    pub fn records(&self) -> &[(String, f64, usize)] {
        &self.records
    }

    /// Values of one tag, in emission order
    pub fn values(&self, tag: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, v, _)| *v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.records.push((tag.to_string(), value, step));
        Ok(())
    }
}

/// Forwards every metric to several sinks
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricsSink for FanOut {
    fn emit(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.emit(tag, value, step)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_filters_by_tag() {
        let mut sink = MemorySink::default();
        sink.emit("losses/qf1_loss", 1.0, 100).unwrap();
        sink.emit("charts/SPS", 50.0, 100).unwrap();
        sink.emit("losses/qf1_loss", 0.5, 200).unwrap();

        assert_eq!(sink.values("losses/qf1_loss"), vec![1.0, 0.5]);
        assert_eq!(sink.records().len(), 3);
    }

    #[test]
    fn csv_sink_writes_header_and_rows() {
        let path = std::env::temp_dir().join(format!("ddpg_metrics_{}.csv", std::process::id()));
        {
            let mut sink = FanOut::new().with(CsvSink::create(&path).unwrap()).with(LogSink);
            sink.emit("charts/episodic_return", -120.5, 200).unwrap();
            sink.emit("charts/episodic_length", 200.0, 200).unwrap();
            sink.flush().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "step,tag,value");
        assert_eq!(lines[1], "200,charts/episodic_return,-120.5");
        assert_eq!(lines[2], "200,charts/episodic_length,200.0");
    }
}

//! Optional layer diagnostics reported by worker threads.
//!
//! When debug charts are enabled, each successful batch may carry seven layer
//! statistics (four conv stages, then three fc stages). A worker folds them
//! into running means and every `send_every` observations hands one averaged
//! [`LayerReport`] to a [`MetricsSink`], then starts over.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

pub const CONV_STAGES: usize = 4;
pub const FC_STAGES: usize = 3;
pub const DEFAULT_SEND_EVERY: usize = 100;

/// Running mean of one scalar stream.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatCounter {
    sum: f64,
    count: usize,
}

impl StatCounter {
    pub fn feed(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One averaged diagnostics event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerReport {
    pub label: &'static str,
    pub conv: [f64; CONV_STAGES],
    pub fc: [f64; FC_STAGES],
}

/// Receiver of diagnostics events. Fire-and-forget: an error is logged by the
/// worker and never affects result delivery.
pub trait MetricsSink: Send + Sync {
    fn send(&self, worker_id: &str, report: LayerReport) -> anyhow::Result<()>;
}

/// Writes reports to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn send(&self, worker_id: &str, report: LayerReport) -> anyhow::Result<()> {
        info!(
            worker_id,
            label = report.label,
            conv = ?report.conv,
            fc = ?report.fc,
            "layer statistics"
        );
        Ok(())
    }
}

impl MetricsSink for mpsc::UnboundedSender<(String, LayerReport)> {
    fn send(&self, worker_id: &str, report: LayerReport) -> anyhow::Result<()> {
        mpsc::UnboundedSender::send(self, (worker_id.to_string(), report))
            .map_err(|_| anyhow::anyhow!("metrics receiver dropped"))
    }
}

/// Per-worker accumulator for the seven layer streams.
#[derive(Debug, Clone)]
pub struct LayerStats {
    conv: [StatCounter; CONV_STAGES],
    fc: [StatCounter; FC_STAGES],
    send_every: usize,
}

impl LayerStats {
    pub fn new(send_every: usize) -> Self {
        Self {
            conv: Default::default(),
            fc: Default::default(),
            send_every,
        }
    }

    /// Feeds one batch's statistics. Values beyond the seventh are ignored,
    /// missing ones leave their stream untouched.
    ///
    /// Returns the averaged report, and resets, once the first conv stream
    /// has seen `send_every` values.
    pub fn observe(&mut self, stats: &[f64]) -> Option<LayerReport> {
        let (conv_values, fc_values) = stats.split_at(stats.len().min(CONV_STAGES));
        for (counter, value) in self.conv.iter_mut().zip(conv_values) {
            counter.feed(*value);
        }
        for (counter, value) in self.fc.iter_mut().zip(fc_values) {
            counter.feed(*value);
        }

        if self.conv[0].count() < self.send_every {
            return None;
        }

        let report = LayerReport {
            label: "layers",
            conv: self.conv.each_ref().map(|c| c.average().unwrap_or(0.0)),
            fc: self.fc.each_ref().map(|c| c.average().unwrap_or(0.0)),
        };
        self.conv.iter_mut().for_each(StatCounter::reset);
        self.fc.iter_mut().for_each(StatCounter::reset);
        Some(report)
    }
}

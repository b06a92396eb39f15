//! Wall-clock timeslice snapshots

use crate::results::TimesliceReport;
use crate::stats::summarize;
use std::collections::BTreeMap;
use velobench_records::{MetricRegistry, MetricValue};

/// Buckets finalized profiling records into fixed windows by request
/// `end_ns`. The anchor is the profiling window start; first and last
/// slices may be partial.
pub struct TimesliceTracker {
    slice_ns: u64,
    anchor_ns: Option<u64>,
    slices: BTreeMap<u64, BTreeMap<String, Vec<f64>>>,
}

impl TimesliceTracker {
    pub fn new(slice_ns: u64) -> Self {
        debug_assert!(slice_ns > 0);
        Self {
            slice_ns,
            anchor_ns: None,
            slices: BTreeMap::new(),
        }
    }

    pub fn set_anchor(&mut self, anchor_ns: u64) {
        self.anchor_ns.get_or_insert(anchor_ns);
    }

    /// Slice index a record with this `end_ns` belongs to.
    pub fn index_of(&self, end_ns: u64) -> u64 {
        let anchor = self.anchor_ns.unwrap_or(end_ns);
        end_ns.saturating_sub(anchor) / self.slice_ns
    }

    pub fn observe(&mut self, end_ns: u64, metrics: &BTreeMap<String, MetricValue>) {
        self.set_anchor(end_ns);
        let index = self.index_of(end_ns);
        let slice = self.slices.entry(index).or_default();
        for (tag, value) in metrics {
            slice
                .entry(tag.clone())
                .or_default()
                .extend_from_slice(value.values());
        }
    }

    pub fn finalize(self, registry: &MetricRegistry) -> Vec<TimesliceReport> {
        let anchor = self.anchor_ns.unwrap_or(0);
        self.slices
            .into_iter()
            .map(|(index, metrics)| {
                let metrics = metrics
                    .iter()
                    .filter_map(|(tag, values)| summarize(tag, registry.unit_of(tag), values))
                    .collect();
                TimesliceReport {
                    index,
                    start_ns: anchor + index * self.slice_ns,
                    end_ns: anchor + (index + 1) * self.slice_ns,
                    metrics,
                }
            })
            .collect()
    }
}

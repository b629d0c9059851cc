//! Metrics emitted by the loss engine
//!
//! Every `compute` call produces a fresh [`MetricsRecord`] of detached
//! scalars, namespaced by split name ("train/total_loss"). The optional
//! [`MetricsHistory`] accumulates records across steps so an external
//! harness can persist them.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

/// A single call's worth of scalar metrics, keyed as `"{split}/{name}"`.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecord {
    split: String,
    values: BTreeMap<String, f64>,
}

impl MetricsRecord {
    /// Create an empty record for the given split ("train", "val", ...).
    pub fn new(split: &str) -> Self {
        Self {
            split: split.to_string(),
            values: BTreeMap::new(),
        }
    }

    /// Insert a value under the split-namespaced key.
    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(format!("{}/{}", self.split, name), value);
    }

    /// Insert a value under an already fully-qualified key.
    pub fn insert_raw(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    /// Look up a value by fully-qualified key, e.g. `"train/g_loss"`.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Split name this record belongs to.
    pub fn split(&self) -> &str {
        &self.split
    }

    /// Iterate over (key, value) pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of recorded values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Accumulated records across training steps.
#[derive(Debug, Clone, Default)]
pub struct MetricsHistory {
    records: Vec<MetricsRecord>,
}

impl MetricsHistory {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record.
    pub fn push(&mut self, record: MetricsRecord) {
        self.records.push(record);
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the history is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[MetricsRecord] {
        &self.records
    }

    /// Latest value recorded under `key`, if any.
    pub fn latest(&self, key: &str) -> Option<f64> {
        self.records.iter().rev().find_map(|r| r.get(key))
    }

    /// Mean of the last `window` values recorded under `key`.
    pub fn mean(&self, key: &str, window: usize) -> f64 {
        let values: Vec<f64> = self
            .records
            .iter()
            .rev()
            .filter_map(|r| r.get(key))
            .take(window)
            .collect();
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Union of keys across all records, sorted.
    fn keys(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for record in &self.records {
            for (key, _) in record.iter() {
                keys.insert(key.to_string());
            }
        }
        keys.into_iter().collect()
    }

    /// Save the history to a CSV file, one row per record. Keys missing from
    /// a record are left blank.
    pub fn save_csv(&self, path: &str) -> Result<()> {
        let keys = self.keys();
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["step".to_string()];
        header.extend(keys.iter().cloned());
        writer.write_record(&header)?;

        for (step, record) in self.records.iter().enumerate() {
            let mut row = vec![step.to_string()];
            for key in &keys {
                row.push(record.get(key).map(|v| v.to_string()).unwrap_or_default());
            }
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load a history previously written by [`MetricsHistory::save_csv`].
    pub fn load_csv(path: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let keys: Vec<String> = reader
            .headers()?
            .iter()
            .skip(1)
            .map(|h| h.to_string())
            .collect();

        let mut history = Self::new();
        for row in reader.records() {
            let row = row?;
            let split = keys
                .first()
                .and_then(|k| k.split_once('/'))
                .map(|(split, _)| split)
                .unwrap_or_default();
            let mut record = MetricsRecord::new(split);
            for (key, field) in keys.iter().zip(row.iter().skip(1)) {
                if !field.is_empty() {
                    record.insert_raw(key, field.parse()?);
                }
            }
            history.push(record);
        }

        Ok(history)
    }
}

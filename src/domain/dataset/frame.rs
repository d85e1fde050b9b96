//! Column store keyed by (symbol, timestamp).
//!
//! The set of feature columns depends on configuration, so a `Frame` keeps
//! the two key columns structurally and every other column by name, in
//! insertion order.

use crate::domain::errors::{PipelineError, Result};
use chrono::{DateTime, FixedOffset};
use std::collections::{BTreeMap, BTreeSet};

pub type Timestamp = DateTime<FixedOffset>;

#[derive(Debug, Clone)]
pub enum ColumnData {
    /// NaN marks a missing value.
    Float(Vec<f64>),
    Flag(Vec<bool>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Flag(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, indices: &[usize]) -> Self {
        match self {
            ColumnData::Float(v) => ColumnData::Float(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Flag(v) => ColumnData::Flag(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    fn missing(&self, len: usize) -> Self {
        match self {
            ColumnData::Float(_) => ColumnData::Float(vec![f64::NAN; len]),
            ColumnData::Flag(_) => ColumnData::Flag(vec![false; len]),
        }
    }

    fn extend_from(&mut self, other: &ColumnData) -> bool {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => {
                a.extend_from_slice(b);
                true
            }
            (ColumnData::Flag(a), ColumnData::Flag(b)) => {
                a.extend_from_slice(b);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    timestamps: Vec<Timestamp>,
    symbols: Vec<String>,
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(timestamps: Vec<Timestamp>, symbols: Vec<String>) -> Result<Self> {
        if timestamps.len() != symbols.len() {
            return Err(PipelineError::Validation(format!(
                "key columns differ in length: {} timestamps vs {} symbols",
                timestamps.len(),
                symbols.len()
            )));
        }
        Ok(Self {
            timestamps,
            symbols,
            columns: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    pub fn float(&self, name: &str) -> Option<&[f64]> {
        match self.column(name) {
            Some(ColumnData::Float(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<&[bool]> {
        match self.column(name) {
            Some(ColumnData::Flag(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn float_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .and_then(|c| match &mut c.data {
                ColumnData::Float(v) => Some(v),
                ColumnData::Flag(_) => None,
            })
    }

    /// Returns a float column or a schema error naming the calling stage.
    pub fn require_float(&self, stage: &'static str, name: &str) -> Result<&[f64]> {
        self.float(name)
            .ok_or_else(|| PipelineError::schema(stage, vec![name.to_string()]))
    }

    pub fn require_columns(&self, stage: &'static str, names: &[&str]) -> Result<()> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .map(|n| n.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::schema(stage, missing))
        }
    }

    /// Inserts a column, replacing any existing column with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, data: ColumnData) -> Result<()> {
        let name = name.into();
        if data.len() != self.len() {
            return Err(PipelineError::Validation(format!(
                "column {} has {} values, frame has {} rows",
                name,
                data.len(),
                self.len()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.data = data,
            None => self.columns.push(Column { name, data }),
        }
        Ok(())
    }

    pub fn insert_float(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.insert(name, ColumnData::Float(values))
    }

    pub fn insert_flag(&mut self, name: impl Into<String>, values: Vec<bool>) -> Result<()> {
        self.insert(name, ColumnData::Flag(values))
    }

    pub fn remove_column(&mut self, name: &str) -> Option<ColumnData> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(pos).data)
    }

    /// Builds a new frame from the given row indices, in that order.
    pub fn take(&self, indices: &[usize]) -> Frame {
        Frame {
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
            symbols: indices.iter().map(|&i| self.symbols[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(indices),
                })
                .collect(),
        }
    }

    pub fn filter(&self, keep: &[bool]) -> Frame {
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(i, _)| i)
            .collect();
        self.take(&indices)
    }

    /// Canonical storage order: (timestamp, symbol). Stable for equal keys.
    pub fn sorted_by_time_symbol(&self) -> Frame {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.sort_by(|&a, &b| {
            self.timestamps[a]
                .cmp(&self.timestamps[b])
                .then_with(|| self.symbols[a].cmp(&self.symbols[b]))
        });
        self.take(&indices)
    }

    /// Order used by any per-symbol windowed computation: (symbol, timestamp).
    pub fn sorted_by_symbol_time(&self) -> Frame {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.sort_by(|&a, &b| {
            self.symbols[a]
                .cmp(&self.symbols[b])
                .then_with(|| self.timestamps[a].cmp(&self.timestamps[b]))
        });
        self.take(&indices)
    }

    /// Splits the frame into one partition per symbol, each sorted by timestamp.
    pub fn partition_by_symbol(&self) -> Vec<(String, Frame)> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, symbol) in self.symbols.iter().enumerate() {
            groups.entry(symbol.as_str()).or_default().push(i);
        }
        groups
            .into_iter()
            .map(|(symbol, mut indices)| {
                indices.sort_by(|&a, &b| self.timestamps[a].cmp(&self.timestamps[b]));
                (symbol.to_string(), self.take(&indices))
            })
            .collect()
    }

    /// Concatenates partitions. Columns are unioned in first-seen order and
    /// filled with missing values where a partition lacks them.
    pub fn concat(parts: Vec<Frame>) -> Result<Frame> {
        let mut out = Frame::default();
        for part in parts {
            let offset = out.len();
            let added = part.len();
            for column in &part.columns {
                if !out.has_column(&column.name) {
                    out.columns.push(Column {
                        name: column.name.clone(),
                        data: column.data.missing(offset),
                    });
                }
            }
            for column in out.columns.iter_mut() {
                match part.columns.iter().find(|c| c.name == column.name) {
                    Some(source) => {
                        if !column.data.extend_from(&source.data) {
                            return Err(PipelineError::Validation(format!(
                                "column {} changes type between partitions",
                                column.name
                            )));
                        }
                    }
                    None => {
                        let filler = column.data.missing(added);
                        column.data.extend_from(&filler);
                    }
                }
            }
            out.timestamps.extend(part.timestamps);
            out.symbols.extend(part.symbols);
        }
        Ok(out)
    }

    pub fn distinct_symbols(&self) -> Vec<String> {
        self.symbols
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn symbol_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for symbol in &self.symbols {
            *counts.entry(symbol.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn ts(day: u32) -> Timestamp {
        let utc = FixedOffset::east_opt(0).unwrap();
        utc.from_local_datetime(
            &NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
        .unwrap()
    }

    fn sample() -> Frame {
        let mut frame = Frame::new(
            vec![ts(2), ts(1), ts(1), ts(2)],
            vec!["B".into(), "B".into(), "A".into(), "A".into()],
        )
        .unwrap();
        frame
            .insert_float("close", vec![11.0, 10.0, 20.0, 21.0])
            .unwrap();
        frame
    }

    #[test]
    fn test_sort_by_time_symbol() {
        let sorted = sample().sorted_by_time_symbol();
        assert_eq!(sorted.symbols(), &["A", "B", "A", "B"]);
        assert_eq!(sorted.float("close").unwrap(), &[20.0, 10.0, 21.0, 11.0]);
    }

    #[test]
    fn test_partition_sorts_each_symbol_by_time() {
        let parts = sample().partition_by_symbol();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, "A");
        assert_eq!(parts[1].1.float("close").unwrap(), &[10.0, 11.0]);
    }

    #[test]
    fn test_concat_fills_missing_columns() {
        let parts = sample().partition_by_symbol();
        let mut a = parts[0].1.clone();
        a.insert_flag("flag", vec![true, false]).unwrap();
        let b = parts[1].1.clone();

        let joined = Frame::concat(vec![b, a]).unwrap();
        assert_eq!(joined.len(), 4);
        assert_eq!(joined.flag("flag").unwrap(), &[false, false, true, false]);
    }

    #[test]
    fn test_insert_rejects_length_mismatch() {
        let mut frame = sample();
        assert!(frame.insert_float("bad", vec![1.0]).is_err());
    }

    #[test]
    fn test_require_columns_lists_missing() {
        let err = sample()
            .require_columns("features", &["close", "volume", "high"])
            .unwrap_err();
        match err {
            PipelineError::Schema { missing, .. } => {
                assert_eq!(missing, vec!["volume".to_string(), "high".to_string()])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

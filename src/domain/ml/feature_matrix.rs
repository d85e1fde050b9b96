use crate::domain::dataset::frame::Frame;
use crate::domain::errors::{PipelineError, Result};

/// Column-major numeric matrix with ordered column names.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(PipelineError::Validation(format!(
                "{} feature names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        let n_rows = columns.first().map_or(0, Vec::len);
        if let Some((name, col)) = names
            .iter()
            .zip(&columns)
            .find(|(_, col)| col.len() != n_rows)
        {
            return Err(PipelineError::Validation(format!(
                "feature {} has {} rows, expected {}",
                name,
                col.len(),
                n_rows
            )));
        }
        Ok(Self {
            names,
            columns,
            n_rows,
        })
    }

    /// Extracts the named float columns from a frame, in the given order.
    pub fn from_frame(frame: &Frame, names: &[String]) -> Result<Self> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| frame.float(n).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::schema("feature matrix", missing));
        }
        let columns = names
            .iter()
            .filter_map(|n| frame.float(n).map(<[f64]>::to_vec))
            .collect();
        let mut matrix = Self::new(names.to_vec(), columns)?;
        matrix.n_rows = frame.len();
        Ok(matrix)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, index: usize) -> &[f64] {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.columns
    }

    pub fn value(&self, row: usize, feature: usize) -> f64 {
        self.columns[feature][row]
    }

    /// Returns a matrix whose columns follow `order`. Extra columns are dropped.
    pub fn reindex(&self, order: &[String]) -> Result<Self> {
        let mut columns = Vec::with_capacity(order.len());
        let mut missing = Vec::new();
        for name in order {
            match self.names.iter().position(|n| n == name) {
                Some(idx) => columns.push(self.columns[idx].clone()),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::schema("inference", missing));
        }
        Ok(Self {
            names: order.to_vec(),
            columns,
            n_rows: self.n_rows,
        })
    }

    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| rows.iter().map(|&r| col[r]).collect())
                .collect(),
            n_rows: rows.len(),
        }
    }

    pub fn has_missing(&self) -> bool {
        self.columns.iter().any(|c| c.iter().any(|v| !v.is_finite()))
    }
}

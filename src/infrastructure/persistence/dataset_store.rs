use super::write_atomic;
use crate::domain::dataset::frame::{ColumnData, Frame};
use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::ohlcv::{SYMBOL, TIMESTAMP};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

/// Sidecar listing model-input columns, one per line, in training order.
pub fn features_path(dataset_path: &Path) -> PathBuf {
    let stem = dataset_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    dataset_path.with_file_name(format!("{}.features.txt", stem))
}

/// CSV persistence for frames.
///
/// Layout: `timestamp` (RFC 3339 with offset), `symbol`, then every column in
/// frame order. Missing floats are written as empty cells, flags as
/// `true`/`false`.
pub struct DatasetStore;

impl DatasetStore {
    pub fn save(frame: &Frame, path: &Path, feature_names: &[String]) -> Result<()> {
        write_atomic(path, &Self::encode(frame, path)?)?;
        let mut listing = feature_names.join("\n");
        listing.push('\n');
        let sidecar = features_path(path);
        write_atomic(&sidecar, listing.as_bytes())?;
        info!(
            "Saved dataset ({} rows, {} columns) to {:?} with {} model inputs in {:?}",
            frame.len(),
            frame.columns().len(),
            path,
            feature_names.len(),
            sidecar
        );
        Ok(())
    }

    /// Writes the raw combined loader output as `ohlcv_<YYYYMMDD_HHMMSS>.csv`.
    pub fn save_raw(frame: &Frame, dir: &Path) -> Result<PathBuf> {
        let name = format!("ohlcv_{}.csv", Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        write_atomic(&path, &Self::encode(frame, &path)?)?;
        info!("Saved raw OHLCV ({} rows) to {:?}", frame.len(), path);
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<(Frame, Vec<String>)> {
        let frame = Self::load_frame(path)?;
        let sidecar = features_path(path);
        let listing =
            std::fs::read_to_string(&sidecar).map_err(|e| PipelineError::io(&sidecar, e))?;
        let feature_names: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        info!(
            "Loaded dataset ({} rows) from {:?} with {} model inputs",
            frame.len(),
            path,
            feature_names.len()
        );
        Ok((frame, feature_names))
    }

    pub fn load_frame(path: &Path) -> Result<Frame> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut reader = csv::Reader::from_reader(file);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.len() < 2 || headers[0] != TIMESTAMP || headers[1] != SYMBOL {
            return Err(PipelineError::schema(
                "dataset file",
                vec![TIMESTAMP.to_string(), SYMBOL.to_string()],
            ));
        }

        let mut timestamps = Vec::new();
        let mut symbols = Vec::new();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len() - 2];
        for record in reader.records() {
            let record = record?;
            let raw_ts = record.get(0).unwrap_or_default();
            let ts = DateTime::parse_from_rfc3339(raw_ts).map_err(|_| PipelineError::Parse {
                what: "dataset timestamp",
                value: raw_ts.to_string(),
            })?;
            timestamps.push(ts);
            symbols.push(record.get(1).unwrap_or_default().to_string());
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(record.get(i + 2).unwrap_or_default().to_string());
            }
        }

        let mut frame = Frame::new(timestamps, symbols)?;
        for (name, values) in headers.into_iter().skip(2).zip(cells) {
            frame.insert(name, decode_column(&values)?)?;
        }
        Ok(frame)
    }

    fn encode(frame: &Frame, path: &Path) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![TIMESTAMP.to_string(), SYMBOL.to_string()];
        header.extend(frame.column_names());
        writer.write_record(&header)?;

        for row in 0..frame.len() {
            let mut record = Vec::with_capacity(header.len());
            record.push(frame.timestamps()[row].to_rfc3339());
            record.push(frame.symbols()[row].clone());
            for column in frame.columns() {
                record.push(match &column.data {
                    ColumnData::Float(v) if v[row].is_nan() => String::new(),
                    ColumnData::Float(v) => v[row].to_string(),
                    ColumnData::Flag(v) => v[row].to_string(),
                });
            }
            writer.write_record(&record)?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::io(path, e.into_error()))
    }
}

/// A column whose non-empty cells are all `true`/`false` is a flag column.
fn decode_column(values: &[String]) -> Result<ColumnData> {
    let is_flag = values.iter().any(|v| !v.is_empty())
        && values.iter().all(|v| v == "true" || v == "false");
    if is_flag {
        return Ok(ColumnData::Flag(values.iter().map(|v| v == "true").collect()));
    }
    values
        .iter()
        .map(|v| {
            if v.is_empty() || v.eq_ignore_ascii_case("nan") {
                Ok(f64::NAN)
            } else {
                v.parse::<f64>().map_err(|_| PipelineError::Parse {
                    what: "dataset value",
                    value: v.clone(),
                })
            }
        })
        .collect::<Result<Vec<f64>>>()
        .map(ColumnData::Float)
}

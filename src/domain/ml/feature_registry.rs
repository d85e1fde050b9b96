use crate::domain::dataset::frame::{ColumnData, Frame};

/// Forward one-day return. Label material, never a model input.
pub const NEXT_RET: &str = "next_ret";
/// Binary direction label.
pub const Y_UP: &str = "y_up";
/// Warm-up flag set by the feature builder.
pub const CONTAINS_LEADING_NAN: &str = "contains_leading_nan";

/// Columns that must never reach the model as inputs.
pub const TARGET_COLUMNS: &[&str] = &[NEXT_RET, Y_UP];

pub fn is_target_column(name: &str) -> bool {
    TARGET_COLUMNS.contains(&name)
}

/// Model-input columns of a dataset, in storage order.
///
/// Every float column except the targets qualifies, OHLCV included; flag
/// columns (such as `contains_leading_nan`) are row filters, not inputs.
/// This list is what gets persisted next to the dataset so training and
/// inference agree on the exact order.
pub fn model_input_columns(frame: &Frame) -> Vec<String> {
    frame
        .columns()
        .iter()
        .filter(|c| matches!(c.data, ColumnData::Float(_)))
        .filter(|c| !is_target_column(&c.name))
        .map(|c| c.name.clone())
        .collect()
}

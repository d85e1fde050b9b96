pub mod frame;

pub use frame::{Column, ColumnData, Frame, Timestamp};

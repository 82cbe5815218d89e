//! Domain types for RollFit

pub mod dataset;
pub mod month;

pub use dataset::{Dataset, DatasetError, Observation};
pub use month::{Month, MonthError};

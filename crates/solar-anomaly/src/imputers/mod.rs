//! Imputation module for handling missing values.
//!
//! Sensor readings are time-ordered, so gaps are filled from the previous
//! reading rather than from column statistics.

mod forward_fill;

pub use forward_fill::ForwardFillImputer;

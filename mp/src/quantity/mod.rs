//! QuantityEngine - guest-count scaling and unit handling
//!
//! Scaling is a pure function of (category, adults, children). Quantities stay
//! unrounded until they are displayed.

mod table;
pub mod units;

pub use table::{FALLBACK_CATEGORY, Portion, QuantityTable, Scale, scale_quantity};

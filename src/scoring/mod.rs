//! Judge response scoring and benchmark statistics.

mod scorer;
mod stats;

pub use scorer::*;
pub use stats::*;

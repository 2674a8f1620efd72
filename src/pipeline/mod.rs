//! Pipeline stages and the checkpointed runner that drives them.

mod judge;
mod plots;
mod runner;
mod tasks;

pub use judge::*;
pub use plots::*;
#[cfg(test)]
pub(crate) use runner::testing;
pub use runner::*;
pub use tasks::*;

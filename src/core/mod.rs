pub mod checks;
pub mod client;
pub mod executor;
pub mod flows;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod thresholds;

pub use crate::domain::ports::{Flow, Storage};
pub use crate::utils::error::Result;

//! Stage execution and the end-to-end driver.

mod driver;
mod runner;

pub use driver::{run_pipeline, RunReport};
pub use runner::{Outcome, RunPipeline};

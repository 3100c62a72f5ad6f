//! National-team strength ratings from a hierarchical Poisson score model,
//! fit by gradient-based MCMC over historical results and in-progress
//! tournament schedules.

pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod match_data;
pub mod model;
pub mod pipeline;
pub mod posterior;
pub mod ratings;
pub mod registry;
pub mod results_file;
pub mod sampler;
pub mod schedule_file;
pub mod weighting;

pub use error::{PipelineError, Result};

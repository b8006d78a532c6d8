pub mod climatology;
pub mod config;
pub mod corpus;
pub mod data_io;
pub mod error;
pub mod logging;
pub mod math;
pub mod normalize;
pub mod parallel;
pub mod stage;

pub use error::PipelineError;

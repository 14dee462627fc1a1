pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod reaper;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use engine::Engine;
pub use error::{ErrorCode, ForgeError, JobError, Result};

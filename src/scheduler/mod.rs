pub mod admission;
pub mod job;
pub mod store;

pub use admission::AdmissionController;
pub use job::{AppSpec, Job, JobResult, JobStatus, JobView, TOTAL_STEPS};
pub use store::{Admitted, CancelOutcome, JobStats, JobStore, TransitionError};

//! External process execution.
//!
//! Both executors run third-party tools under a wall-clock limit and a job
//! cancellation token, then map whatever happened onto the job error taxonomy:
//! - [`BuildExecutor`]: runs the project's build entry point and checks for the package
//! - [`DeployExecutor`]: installs a package on a connected device via the bridge utility
//!
//! Failure text is classified by ordered rule tables (see [`classifier`]); each
//! executor keeps its own table.

pub mod build;
pub mod classifier;
pub mod deploy;
pub mod process;

pub use build::{BuildExecutor, BuildFailureKind, BuildOutcome};
pub use deploy::{DeployExecutor, DeviceTarget, InstallFailureKind, InstallOutcome, SharePackage};
pub use process::Cancelled;

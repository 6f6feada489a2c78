pub mod lifecycle;
pub mod platform;
pub mod topology;

use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(
        "the platform does not admit more than {max} servers: {existing} exist, {requested} more requested"
    )]
    CapacityExceeded {
        existing: usize,
        requested: usize,
        max: usize,
    },
    #[error("bridge '{name}' is in use by {used_by:?} and cannot be deleted")]
    BridgeInUse { name: String, used_by: Vec<String> },
    #[error("the platform has not been deployed yet")]
    NotDeployed,
    #[error("the platform is already deployed; destroy it before deploying a new one")]
    AlreadyDeployed,
    #[error("machine '{0}' is not registered")]
    UnknownMachine(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Per-batch outcome of a lifecycle transition. Failures are collected per
/// entity and never abort the rest of the batch; the registry reflects
/// exactly the successful subset.
#[derive(Debug, Default)]
pub struct Batch {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, PlatformError)>,
}

impl Batch {
    pub fn success(&mut self, name: impl Into<String>) {
        self.succeeded.push(name.into());
    }

    pub fn failure(&mut self, name: impl Into<String>, error: impl Into<PlatformError>) {
        self.failed.push((name.into(), error.into()));
    }

    pub fn fully_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: Batch) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

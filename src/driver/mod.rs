pub mod lxd;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::resources::{bridge::Bridge, machine::VirtualMachine};

/// Per-resource failure reported by the hypervisor. The message is whatever
/// diagnostic the concrete backend produced; callers only rely on the
/// success/failure outcome.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type DriverResult = Result<(), DriverError>;

/// Contract the core requires from the hypervisor. Implementations perform
/// no retries; retry policy, if any, belongs to the caller.
#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    async fn create_machine(&self, machine: &VirtualMachine) -> DriverResult;
    async fn start_machine(&self, name: &str) -> DriverResult;
    async fn stop_machine(&self, name: &str) -> DriverResult;
    async fn pause_machine(&self, name: &str) -> DriverResult;
    async fn delete_machine(&self, name: &str) -> DriverResult;

    async fn create_bridge(&self, bridge: &Bridge) -> DriverResult;
    async fn delete_bridge(&self, name: &str) -> DriverResult;

    async fn attach(&self, bridge_name: &str, machine_name: &str, ethernet: &str) -> DriverResult;
}

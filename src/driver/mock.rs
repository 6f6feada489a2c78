use std::{
    collections::HashSet,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    driver::{DriverError, DriverResult, HypervisorDriver},
    resources::{bridge::Bridge, machine::VirtualMachine},
};

/// Test driver that records every call and fails on demand for specific
/// resource names.
#[derive(Default)]
pub struct MockDriver {
    fail_for: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, name: &str) {
        self.fail_for.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, name: &str) -> DriverResult {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
        if self.fail_for.lock().unwrap().contains(name) {
            return Err(DriverError::new(format!("injected failure for '{}'", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl HypervisorDriver for MockDriver {
    async fn create_machine(&self, machine: &VirtualMachine) -> DriverResult {
        self.record("create-machine", &machine.name)
    }

    async fn start_machine(&self, name: &str) -> DriverResult {
        self.record("start-machine", name)
    }

    async fn stop_machine(&self, name: &str) -> DriverResult {
        self.record("stop-machine", name)
    }

    async fn pause_machine(&self, name: &str) -> DriverResult {
        self.record("pause-machine", name)
    }

    async fn delete_machine(&self, name: &str) -> DriverResult {
        self.record("delete-machine", name)
    }

    async fn create_bridge(&self, bridge: &Bridge) -> DriverResult {
        self.record("create-bridge", &bridge.name)
    }

    async fn delete_bridge(&self, name: &str) -> DriverResult {
        self.record("delete-bridge", name)
    }

    async fn attach(&self, bridge_name: &str, machine_name: &str, _ethernet: &str) -> DriverResult {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach {} {}", bridge_name, machine_name));
        if self.fail_for.lock().unwrap().contains(machine_name) {
            return Err(DriverError::new(format!(
                "injected failure for '{}'",
                machine_name
            )));
        }
        Ok(())
    }
}

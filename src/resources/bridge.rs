use serde::{Deserialize, Serialize};

use crate::resources::subnet::Subnet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    pub name: String,
    /// Interface label the hypervisor binds to this bridge at creation time.
    /// Depends on creation order, not on the bridge name.
    pub ethernet: String,
    pub subnet: Subnet,
    /// Names of the machines currently attached. Non-empty `used_by` blocks
    /// deletion of the bridge.
    pub used_by: Vec<String>,
}

impl Bridge {
    pub fn new(name: impl Into<String>, ethernet: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            name: name.into(),
            ethernet: ethernet.into(),
            subnet,
            used_by: Vec::new(),
        }
    }

    pub fn in_use(&self) -> bool {
        !self.used_by.is_empty()
    }

    pub fn mark_attached(&mut self, machine_name: &str) {
        if !self.used_by.iter().any(|n| n == machine_name) {
            self.used_by.push(machine_name.to_string());
        }
    }
}

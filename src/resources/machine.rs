use std::{collections::BTreeMap, net::Ipv4Addr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineRole {
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "load-balancer")]
    LoadBalancer,
    #[serde(rename = "client")]
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    #[serde(rename = "not-created")]
    NotCreated,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "frozen")]
    Frozen,
    #[serde(rename = "deleted")]
    Deleted,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::NotCreated => "not-created",
            MachineState::Stopped => "stopped",
            MachineState::Running => "running",
            MachineState::Frozen => "frozen",
            MachineState::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub name: String,
    pub role: MachineRole,
    pub image: String,
    pub state: MachineState,
    /// Ethernet interface id -> assigned address. Empty until topology
    /// allocation has processed the machine.
    pub networks: BTreeMap<String, Ipv4Addr>,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>, image: impl Into<String>, role: MachineRole) -> Self {
        Self {
            name: name.into(),
            role,
            image: image.into(),
            state: MachineState::NotCreated,
            networks: BTreeMap::new(),
        }
    }

    /// A machine with any networks entry has been processed by the allocator.
    pub fn is_connected(&self) -> bool {
        !self.networks.is_empty()
    }
}

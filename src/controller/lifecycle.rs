use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    constants::{BRIDGES_PAGE, MACHINES_PAGE, MAX_SERVER_MACHINES, SERVER_NAME_PREFIX},
    controller::{Batch, PlatformError},
    driver::HypervisorDriver,
    machinery::registry::{Registry, UpdateMode},
    resources::{
        bridge::Bridge,
        machine::{MachineRole, MachineState, VirtualMachine},
    },
};

#[derive(Debug, Clone, Copy)]
enum MachineTransition {
    Start,
    Stop,
    Pause,
}

impl MachineTransition {
    fn target_state(self) -> MachineState {
        match self {
            MachineTransition::Start => MachineState::Running,
            MachineTransition::Stop => MachineState::Stopped,
            MachineTransition::Pause => MachineState::Frozen,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            MachineTransition::Start => "start",
            MachineTransition::Stop => "stop",
            MachineTransition::Pause => "pause",
        }
    }
}

/// Drives batched lifecycle transitions against the hypervisor, persisting
/// only the entities whose driver call succeeded. One failed entity never
/// aborts the rest of its batch.
pub struct LifecycleController {
    registry: Arc<Registry>,
    driver: Arc<dyn HypervisorDriver>,
}

impl LifecycleController {
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn HypervisorDriver>) -> Self {
        Self { registry, driver }
    }

    /// Creates the given machines. The whole batch is rejected with
    /// `CapacityExceeded` before any driver call if it would push the number
    /// of registered servers past the platform limit.
    pub async fn create_machines(&self, machines: Vec<VirtualMachine>) -> Result<Batch> {
        let registered = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?;

        let existing = registered
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|m| m.role == MachineRole::Server)
            .count();
        let requested = machines
            .iter()
            .filter(|m| m.role == MachineRole::Server)
            .count();
        if existing + requested > MAX_SERVER_MACHINES {
            return Err(PlatformError::CapacityExceeded {
                existing,
                requested,
                max: MAX_SERVER_MACHINES,
            }
            .into());
        }

        let mut batch = Batch::default();
        let mut created = Vec::new();
        for mut machine in machines {
            match self.driver.create_machine(&machine).await {
                Ok(()) => {
                    machine.state = MachineState::Stopped;
                    info!("machine '{}' created", machine.name);
                    batch.success(&machine.name);
                    created.push(machine);
                }
                Err(e) => {
                    warn!("failed to create machine '{}': {}", machine.name, e);
                    batch.failure(&machine.name, e);
                }
            }
        }

        match registered {
            Some(mut list) => {
                list.extend(created);
                self.registry
                    .update(MACHINES_PAGE, &list, UpdateMode::Replace)?;
            }
            None if !created.is_empty() => {
                self.registry.add(MACHINES_PAGE, &created)?;
            }
            None => {}
        }

        Ok(batch)
    }

    pub async fn start_machines(&self, names: &[String]) -> Result<Batch> {
        self.transition_machines(names, MachineTransition::Start)
            .await
    }

    pub async fn stop_machines(&self, names: &[String]) -> Result<Batch> {
        self.transition_machines(names, MachineTransition::Stop)
            .await
    }

    pub async fn pause_machines(&self, names: &[String]) -> Result<Batch> {
        self.transition_machines(names, MachineTransition::Pause)
            .await
    }

    async fn transition_machines(
        &self,
        names: &[String],
        transition: MachineTransition,
    ) -> Result<Batch> {
        let Some(mut machines) = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
        else {
            return Ok(Batch::default());
        };

        let mut batch = Batch::default();
        for machine in machines.iter_mut() {
            if !names.contains(&machine.name) {
                continue;
            }
            // Already in the target state: nothing to ask of the hypervisor.
            if machine.state == transition.target_state() {
                batch.success(&machine.name);
                continue;
            }

            let result = match transition {
                MachineTransition::Start => self.driver.start_machine(&machine.name).await,
                MachineTransition::Stop => self.driver.stop_machine(&machine.name).await,
                MachineTransition::Pause => self.driver.pause_machine(&machine.name).await,
            };

            match result {
                Ok(()) => {
                    machine.state = transition.target_state();
                    info!("machine '{}' is now {}", machine.name, machine.state.as_str());
                    batch.success(&machine.name);
                }
                Err(e) => {
                    warn!(
                        "failed to {} machine '{}': {}",
                        transition.verb(),
                        machine.name,
                        e
                    );
                    batch.failure(&machine.name, e);
                }
            }
        }

        self.registry
            .update(MACHINES_PAGE, &machines, UpdateMode::Replace)?;
        Ok(batch)
    }

    /// Deletes machines, dropping each from the registry only after the
    /// hypervisor confirmed the deletion. Deleting the last machine removes
    /// the machines page entirely.
    pub async fn delete_machines(&self, names: &[String]) -> Result<Batch> {
        let machines = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
            .unwrap_or_default();

        let mut batch = Batch::default();
        let mut remaining = Vec::new();
        for machine in machines {
            if !names.contains(&machine.name) {
                remaining.push(machine);
                continue;
            }
            match self.driver.delete_machine(&machine.name).await {
                Ok(()) => {
                    info!("machine '{}' deleted", machine.name);
                    batch.success(&machine.name);
                }
                Err(e) => {
                    warn!("failed to delete machine '{}': {}", machine.name, e);
                    batch.failure(&machine.name, e);
                    remaining.push(machine);
                }
            }
        }

        if remaining.is_empty() {
            if self.registry.load(MACHINES_PAGE)?.is_some() {
                self.registry.remove(Some(MACHINES_PAGE))?;
            }
        } else {
            self.registry
                .update(MACHINES_PAGE, &remaining, UpdateMode::Replace)?;
        }
        Ok(batch)
    }

    pub async fn create_bridges(&self, bridges: Vec<Bridge>) -> Result<Batch> {
        let registered = self.registry.load_as::<Vec<Bridge>>(BRIDGES_PAGE)?;

        let mut batch = Batch::default();
        let mut created = Vec::new();
        for bridge in bridges {
            match self.driver.create_bridge(&bridge).await {
                Ok(()) => {
                    info!("bridge '{}' created", bridge.name);
                    batch.success(&bridge.name);
                    created.push(bridge);
                }
                Err(e) => {
                    warn!("failed to create bridge '{}': {}", bridge.name, e);
                    batch.failure(&bridge.name, e);
                }
            }
        }

        match registered {
            Some(mut list) => {
                list.extend(created);
                self.registry
                    .update(BRIDGES_PAGE, &list, UpdateMode::Replace)?;
            }
            None if !created.is_empty() => {
                self.registry.add(BRIDGES_PAGE, &created)?;
            }
            None => {}
        }
        Ok(batch)
    }

    /// Deletes bridges. A bridge that still has machines attached is excluded
    /// from the batch with `BridgeInUse`; dependent machines must be deleted
    /// (and connections reconciled) first.
    pub async fn delete_bridges(&self, names: &[String]) -> Result<Batch> {
        let bridges = self
            .registry
            .load_as::<Vec<Bridge>>(BRIDGES_PAGE)?
            .unwrap_or_default();

        let mut batch = Batch::default();
        let mut remaining = Vec::new();
        for bridge in bridges {
            if !names.contains(&bridge.name) {
                remaining.push(bridge);
                continue;
            }
            if bridge.in_use() {
                warn!(
                    "bridge '{}' is still used by {:?}, not deleting",
                    bridge.name, bridge.used_by
                );
                batch.failed.push((
                    bridge.name.clone(),
                    PlatformError::BridgeInUse {
                        name: bridge.name.clone(),
                        used_by: bridge.used_by.clone(),
                    },
                ));
                remaining.push(bridge);
                continue;
            }
            match self.driver.delete_bridge(&bridge.name).await {
                Ok(()) => {
                    info!("bridge '{}' deleted", bridge.name);
                    batch.success(&bridge.name);
                }
                Err(e) => {
                    warn!("failed to delete bridge '{}': {}", bridge.name, e);
                    batch.failure(&bridge.name, e);
                    remaining.push(bridge);
                }
            }
        }

        if remaining.is_empty() {
            if self.registry.load(BRIDGES_PAGE)?.is_some() {
                self.registry.remove(Some(BRIDGES_PAGE))?;
            }
        } else {
            self.registry
                .update(BRIDGES_PAGE, &remaining, UpdateMode::Replace)?;
        }
        Ok(batch)
    }

    /// Picks names for new servers: explicit names first, then generated
    /// `s<N>` names with increasing N, skipping names that are already
    /// registered or already chosen earlier in the same batch.
    pub fn allocate_server_names(&self, count: usize, explicit: &[String]) -> Result<Vec<String>> {
        let registered: Vec<String> = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect();

        let mut names = Vec::with_capacity(count);
        let mut next = 1usize;
        for i in 0..count {
            if let Some(name) = explicit.get(i) {
                names.push(name.clone());
                continue;
            }
            let mut candidate = format!("{}{}", SERVER_NAME_PREFIX, next);
            next += 1;
            while names.contains(&candidate) || registered.contains(&candidate) {
                candidate = format!("{}{}", SERVER_NAME_PREFIX, next);
                next += 1;
            }
            names.push(candidate);
        }
        Ok(names)
    }
}

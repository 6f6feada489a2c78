use std::{collections::HashSet, net::Ipv4Addr, sync::Arc};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::{
    constants::{BRIDGES_PAGE, CLIENT_SIDE_BRIDGE, FIRST_HOST_OFFSET, MACHINES_PAGE, SERVER_SIDE_BRIDGE},
    driver::HypervisorDriver,
    machinery::registry::{Registry, UpdateMode},
    resources::machine::{MachineRole, VirtualMachine},
};

use crate::resources::bridge::Bridge;

/// Static role -> target bridge table. The load balancer is the only role
/// attached to both sides of the topology.
pub fn target_bridges(role: MachineRole) -> &'static [&'static str] {
    match role {
        MachineRole::Server => &[SERVER_SIDE_BRIDGE],
        MachineRole::Client => &[CLIENT_SIDE_BRIDGE],
        MachineRole::LoadBalancer => &[SERVER_SIDE_BRIDGE, CLIENT_SIDE_BRIDGE],
    }
}

/// Assigns bridge attachments and addresses to machines the allocator has
/// not processed yet, and prunes stale attachments after deletions.
pub struct TopologyAllocator {
    registry: Arc<Registry>,
    driver: Arc<dyn HypervisorDriver>,
}

impl TopologyAllocator {
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn HypervisorDriver>) -> Self {
        Self { registry, driver }
    }

    /// Connects every machine with an empty networks map to its role's target
    /// bridges, allocating host addresses in strictly increasing order from
    /// offset 10 within each bridge subnet. Machines whose role resolves to no
    /// registered bridge get a local fallback entry so they are not picked up
    /// again on a later pass.
    pub async fn connect_machines(&self) -> Result<()> {
        let Some(mut bridges) = self.registry.load_as::<Vec<Bridge>>(BRIDGES_PAGE)? else {
            return Ok(());
        };
        let Some(mut machines) = self.registry.load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
        else {
            return Ok(());
        };

        let mut in_use: HashSet<Ipv4Addr> = machines
            .iter()
            .flat_map(|m| m.networks.values().copied())
            .collect();

        let mut offset = 0u32;
        for machine in machines.iter_mut() {
            if machine.is_connected() {
                continue;
            }

            let mut had_target = false;
            for bridge_name in target_bridges(machine.role) {
                let Some(bridge) = bridges.iter_mut().find(|b| b.name == *bridge_name) else {
                    continue;
                };
                had_target = true;

                let mut address = bridge.subnet.host(FIRST_HOST_OFFSET + offset)?;
                while in_use.contains(&address) {
                    offset += 1;
                    address = bridge.subnet.host(FIRST_HOST_OFFSET + offset)?;
                }
                in_use.insert(address);

                match self
                    .driver
                    .attach(&bridge.name, &machine.name, &bridge.ethernet)
                    .await
                {
                    Ok(()) => {
                        bridge.mark_attached(&machine.name);
                        machine.networks.insert(bridge.ethernet.clone(), address);
                        info!(
                            "machine '{}' attached to '{}' with address {}",
                            machine.name, bridge.name, address
                        );
                    }
                    Err(e) => {
                        // The machine stays eligible for a later pass.
                        warn!(
                            "failed to attach machine '{}' to bridge '{}': {}",
                            machine.name, bridge.name, e
                        );
                    }
                }
            }

            if !had_target {
                // Role-appropriate local configuration only; marks the
                // machine as processed without a remote attachment.
                debug!(
                    "machine '{}' has no registered target bridge, configuring loopback only",
                    machine.name
                );
                machine
                    .networks
                    .insert("lo".to_string(), Ipv4Addr::LOCALHOST);
            }
        }

        self.registry
            .update(MACHINES_PAGE, &machines, UpdateMode::Replace)?;
        self.registry
            .update(BRIDGES_PAGE, &bridges, UpdateMode::Replace)?;
        Ok(())
    }

    /// Drops from every bridge's used_by list the machines that no longer
    /// exist in the registry. Pure set difference; running it twice with no
    /// intervening deletions is a no-op.
    pub async fn reconcile(&self) -> Result<()> {
        let Some(mut bridges) = self.registry.load_as::<Vec<Bridge>>(BRIDGES_PAGE)? else {
            return Ok(());
        };
        let machine_names: HashSet<String> = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect();

        for bridge in bridges.iter_mut() {
            let before = bridge.used_by.len();
            bridge.used_by.retain(|name| machine_names.contains(name));
            if bridge.used_by.len() != before {
                info!(
                    "pruned {} stale attachment(s) from bridge '{}'",
                    before - bridge.used_by.len(),
                    bridge.name
                );
            }
        }

        self.registry
            .update(BRIDGES_PAGE, &bridges, UpdateMode::Replace)?;
        Ok(())
    }
}

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    constants::{
        BRIDGES_PAGE, CLIENT_NAME, CLIENT_SIDE_BRIDGE, CLIENT_SIDE_SUBNET, DEFAULT_IMAGE,
        LOAD_BALANCER_NAME, MACHINES_PAGE, SERVER_SIDE_BRIDGE, SERVER_SIDE_SUBNET,
    },
    controller::{Batch, PlatformError, lifecycle::LifecycleController, topology::TopologyAllocator},
    driver::HypervisorDriver,
    machinery::registry::Registry,
    resources::{
        bridge::Bridge,
        machine::{MachineRole, VirtualMachine},
        subnet::Subnet,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Destroyed,
    PartiallyDestroyed,
}

/// Images used when deploying the fixed topology.
#[derive(Debug, Clone)]
pub struct DeployImages {
    pub server: String,
    pub load_balancer: String,
    pub client: String,
}

impl Default for DeployImages {
    fn default() -> Self {
        Self {
            server: DEFAULT_IMAGE.to_string(),
            load_balancer: DEFAULT_IMAGE.to_string(),
            client: DEFAULT_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeployReport {
    pub bridges: Batch,
    pub machines: Batch,
}

/// Entry point for the platform commands: resolves target sets against the
/// registry, drives the lifecycle controller, and keeps the topology
/// reconciled after every deletion pass.
pub struct Platform {
    registry: Arc<Registry>,
    lifecycle: LifecycleController,
    topology: TopologyAllocator,
}

impl Platform {
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn HypervisorDriver>) -> Self {
        Self {
            lifecycle: LifecycleController::new(registry.clone(), driver.clone()),
            topology: TopologyAllocator::new(registry.clone(), driver),
            registry,
        }
    }

    fn fixed_bridges() -> Result<Vec<Bridge>> {
        Ok(vec![
            Bridge::new(
                SERVER_SIDE_BRIDGE,
                "eth0",
                Subnet::from_cidr(SERVER_SIDE_SUBNET)?,
            ),
            Bridge::new(
                CLIENT_SIDE_BRIDGE,
                "eth1",
                Subnet::from_cidr(CLIENT_SIDE_SUBNET)?,
            ),
        ])
    }

    /// Deploys the whole platform: the two fixed bridges, the load balancer,
    /// the client, and the requested number of servers, then wires up the
    /// topology for everything that was created successfully.
    pub async fn deploy(
        &self,
        servers: usize,
        server_names: &[String],
        images: DeployImages,
    ) -> Result<DeployReport> {
        if self.registry.load(BRIDGES_PAGE)?.is_some() {
            return Err(PlatformError::AlreadyDeployed.into());
        }

        info!("deploying the platform");
        let mut report = DeployReport::default();
        report.bridges = self.lifecycle.create_bridges(Self::fixed_bridges()?).await?;

        let mut machines = vec![
            VirtualMachine::new(
                LOAD_BALANCER_NAME,
                &images.load_balancer,
                MachineRole::LoadBalancer,
            ),
            VirtualMachine::new(CLIENT_NAME, &images.client, MachineRole::Client),
        ];
        for name in self.lifecycle.allocate_server_names(servers, server_names)? {
            machines.push(VirtualMachine::new(name, &images.server, MachineRole::Server));
        }

        report.machines = self.lifecycle.create_machines(machines).await?;
        if !report.machines.succeeded.is_empty() {
            self.topology.connect_machines().await?;
        }
        info!("platform deployed");
        Ok(report)
    }

    /// Adds servers to an already deployed platform.
    pub async fn add_servers(
        &self,
        count: usize,
        names: &[String],
        image: Option<&str>,
    ) -> Result<Batch> {
        if self.registry.load(BRIDGES_PAGE)?.is_none() {
            return Err(PlatformError::NotDeployed.into());
        }

        let image = image.unwrap_or(DEFAULT_IMAGE);
        let machines = self
            .lifecycle
            .allocate_server_names(count, names)?
            .into_iter()
            .map(|name| VirtualMachine::new(name, image, MachineRole::Server))
            .collect();

        let batch = self.lifecycle.create_machines(machines).await?;
        if !batch.succeeded.is_empty() {
            self.topology.connect_machines().await?;
        }
        Ok(batch)
    }

    pub async fn start_machines(&self, names: &[String]) -> Result<Batch> {
        let (known, mut batch) = self.resolve(names)?;
        batch.merge(self.lifecycle.start_machines(&known).await?);
        Ok(batch)
    }

    pub async fn stop_machines(&self, names: &[String]) -> Result<Batch> {
        let (known, mut batch) = self.resolve(names)?;
        batch.merge(self.lifecycle.stop_machines(&known).await?);
        Ok(batch)
    }

    pub async fn pause_machines(&self, names: &[String]) -> Result<Batch> {
        let (known, mut batch) = self.resolve(names)?;
        batch.merge(self.lifecycle.pause_machines(&known).await?);
        Ok(batch)
    }

    /// Deletes machines and reconciles bridge attachments afterwards, even
    /// when some deletions failed. By default only servers are deleted; the
    /// load balancer and client fall only with the whole platform.
    pub async fn remove_machines(&self, names: &[String], servers_only: bool) -> Result<Batch> {
        let (known, mut batch) = self.resolve(names)?;

        let targets: Vec<String> = if servers_only {
            let machines = self
                .registry
                .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
                .unwrap_or_default();
            known
                .into_iter()
                .filter(|name| {
                    let server = machines
                        .iter()
                        .any(|m| &m.name == name && m.role == MachineRole::Server);
                    if !server {
                        warn!("machine '{}' is not a server, skipping", name);
                    }
                    server
                })
                .collect()
        } else {
            known
        };

        let deleted = self.lifecycle.delete_machines(&targets).await?;
        batch.merge(deleted);
        // Reconciliation runs even after partial failure so the bridges never
        // reference machines that no longer exist.
        self.topology.reconcile().await?;
        Ok(batch)
    }

    /// Tears the platform down: machines first, then bridges, then the store
    /// itself once both pages are gone.
    pub async fn destroy(&self) -> Result<TeardownOutcome> {
        if self.registry.load(BRIDGES_PAGE)?.is_none()
            && self.registry.load(MACHINES_PAGE)?.is_none()
        {
            return Err(PlatformError::NotDeployed.into());
        }

        info!("destroying the platform");
        let machine_names: Vec<String> = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.name)
            .collect();
        if !machine_names.is_empty() {
            self.remove_machines(&machine_names, false).await?;
        }

        let bridge_names: Vec<String> = self
            .registry
            .load_as::<Vec<Bridge>>(BRIDGES_PAGE)?
            .unwrap_or_default()
            .into_iter()
            .map(|b| b.name)
            .collect();
        if !bridge_names.is_empty() {
            self.lifecycle.delete_bridges(&bridge_names).await?;
        }

        if self.registry.load(MACHINES_PAGE)?.is_none()
            && self.registry.load(BRIDGES_PAGE)?.is_none()
        {
            self.registry.remove(None)?;
            info!("platform destroyed");
            Ok(TeardownOutcome::Destroyed)
        } else {
            warn!("platform destroyed only partially");
            Ok(TeardownOutcome::PartiallyDestroyed)
        }
    }

    /// Current registry view, for reporting.
    pub fn state(&self) -> Result<(Vec<VirtualMachine>, Vec<Bridge>)> {
        let machines = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
            .unwrap_or_default();
        let bridges = self
            .registry
            .load_as::<Vec<Bridge>>(BRIDGES_PAGE)?
            .unwrap_or_default();
        Ok((machines, bridges))
    }

    /// Splits a requested target set into registered names and failures for
    /// the names the registry does not know.
    fn resolve(&self, names: &[String]) -> Result<(Vec<String>, Batch)> {
        let machines = self
            .registry
            .load_as::<Vec<VirtualMachine>>(MACHINES_PAGE)?
            .unwrap_or_default();

        let mut known = Vec::new();
        let mut batch = Batch::default();
        for name in names {
            if machines.iter().any(|m| &m.name == name) {
                known.push(name.clone());
            } else {
                warn!("machine '{}' is not registered", name);
                batch
                    .failed
                    .push((name.clone(), PlatformError::UnknownMachine(name.clone())));
            }
        }
        Ok((known, batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{driver::mock::MockDriver, resources::machine::MachineState};

    fn fixture(dir: &tempfile::TempDir) -> (Arc<Registry>, Arc<MockDriver>, Platform) {
        let registry = Arc::new(Registry::new(dir.path().join("registry.json")));
        let driver = Arc::new(MockDriver::new());
        let platform = Platform::new(registry.clone(), driver.clone());
        (registry, driver, platform)
    }

    #[tokio::test]
    async fn test_deploy_builds_connected_topology() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        let report = platform
            .deploy(2, &[], DeployImages::default())
            .await
            .unwrap();
        assert_eq!(report.bridges.succeeded.len(), 2);
        assert_eq!(
            report.machines.succeeded,
            vec![
                "lb".to_string(),
                "cl".to_string(),
                "s1".to_string(),
                "s2".to_string()
            ]
        );

        let (machines, bridges) = platform.state().unwrap();
        assert!(machines.iter().all(|m| m.is_connected()));
        assert!(machines.iter().all(|m| m.state == MachineState::Stopped));
        // lb + s1 + s2 on the server side, lb + cl on the client side.
        assert_eq!(bridges[0].used_by.len(), 3);
        assert_eq!(bridges[1].used_by.len(), 2);
    }

    #[tokio::test]
    async fn test_deploy_twice_fails() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        platform
            .deploy(1, &[], DeployImages::default())
            .await
            .unwrap();
        let err = platform
            .deploy(1, &[], DeployImages::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlatformError>(),
            Some(PlatformError::AlreadyDeployed)
        ));
    }

    #[tokio::test]
    async fn test_add_requires_deployed_platform() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        let err = platform.add_servers(1, &[], None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlatformError>(),
            Some(PlatformError::NotDeployed)
        ));
    }

    #[tokio::test]
    async fn test_remove_server_prunes_bridge_usage() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        platform
            .deploy(1, &[], DeployImages::default())
            .await
            .unwrap();

        let batch = platform
            .remove_machines(&["s1".to_string()], true)
            .await
            .unwrap();
        assert_eq!(batch.succeeded, vec!["s1".to_string()]);

        let (machines, bridges) = platform.state().unwrap();
        assert!(machines.iter().all(|m| m.name != "s1"));
        assert!(bridges.iter().all(|b| !b.used_by.contains(&"s1".to_string())));
    }

    #[tokio::test]
    async fn test_remove_skips_non_servers_by_default() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        platform
            .deploy(1, &[], DeployImages::default())
            .await
            .unwrap();

        let batch = platform
            .remove_machines(&["lb".to_string()], true)
            .await
            .unwrap();
        assert!(batch.succeeded.is_empty());
        let (machines, _) = platform.state().unwrap();
        assert!(machines.iter().any(|m| m.name == "lb"));
    }

    #[tokio::test]
    async fn test_unknown_machine_is_reported_not_fatal() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        platform
            .deploy(1, &[], DeployImages::default())
            .await
            .unwrap();

        let batch = platform
            .start_machines(&["s1".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.succeeded, vec!["s1".to_string()]);
        assert!(matches!(
            batch.failed[0].1,
            PlatformError::UnknownMachine(_)
        ));
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (registry, _driver, platform) = fixture(&dir);

        platform
            .deploy(2, &[], DeployImages::default())
            .await
            .unwrap();

        let outcome = platform.destroy().await.unwrap();
        assert_eq!(outcome, TeardownOutcome::Destroyed);
        assert!(!registry.path().exists());

        let err = platform.destroy().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlatformError>(),
            Some(PlatformError::NotDeployed)
        ));
    }

    #[tokio::test]
    async fn test_destroy_is_partial_when_a_machine_survives() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, driver, platform) = fixture(&dir);

        platform
            .deploy(1, &[], DeployImages::default())
            .await
            .unwrap();

        driver.fail_on("s1");
        let outcome = platform.destroy().await.unwrap();
        assert_eq!(outcome, TeardownOutcome::PartiallyDestroyed);

        let (machines, bridges) = platform.state().unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].name, "s1");
        // The server-side bridge still carries s1 and therefore survived.
        assert!(bridges.iter().any(|b| b.used_by.contains(&"s1".to_string())));
    }

    #[tokio::test]
    async fn test_add_servers_after_deploy_follows_capacity() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let (_registry, _driver, platform) = fixture(&dir);

        platform
            .deploy(4, &[], DeployImages::default())
            .await
            .unwrap();

        let batch = platform.add_servers(1, &[], None).await.unwrap();
        assert_eq!(batch.succeeded, vec!["s5".to_string()]);

        let err = platform.add_servers(1, &[], None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlatformError>(),
            Some(PlatformError::CapacityExceeded { .. })
        ));
    }
}

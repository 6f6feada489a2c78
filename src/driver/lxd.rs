use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    driver::{DriverError, DriverResult, HypervisorDriver},
    resources::{bridge::Bridge, machine::VirtualMachine},
};

/// Drives a local LXD daemon through the `lxc` client. All of the CLI
/// compatibility (argument shapes, stderr scraping) lives here; the core
/// only ever sees the structured result.
pub struct LxdDriver;

impl LxdDriver {
    async fn lxc(&self, args: &[&str]) -> DriverResult {
        debug!("running lxc {}", args.join(" "));
        let output = Command::new("lxc")
            .args(args)
            .output()
            .await
            .map_err(|e| DriverError::new(format!("failed to spawn lxc: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr
            .trim()
            .strip_prefix("Error:")
            .unwrap_or(stderr.trim())
            .trim()
            .to_string();
        Err(DriverError::new(message))
    }
}

#[async_trait]
impl HypervisorDriver for LxdDriver {
    async fn create_machine(&self, machine: &VirtualMachine) -> DriverResult {
        self.lxc(&["init", &machine.image, &machine.name, "-q"]).await
    }

    async fn start_machine(&self, name: &str) -> DriverResult {
        self.lxc(&["start", name, "-q"]).await
    }

    async fn stop_machine(&self, name: &str) -> DriverResult {
        self.lxc(&["stop", name, "-q"]).await
    }

    async fn pause_machine(&self, name: &str) -> DriverResult {
        self.lxc(&["pause", name, "-q"]).await
    }

    async fn delete_machine(&self, name: &str) -> DriverResult {
        self.lxc(&["delete", name, "--force", "-q"]).await
    }

    async fn create_bridge(&self, bridge: &Bridge) -> DriverResult {
        self.lxc(&["network", "create", &bridge.name, "-q"]).await?;

        let address = format!("{}/{}", bridge.subnet.gateway(), bridge.subnet.prefix_len());
        self.lxc(&["network", "set", &bridge.name, "ipv4.address", &address])
            .await?;
        self.lxc(&["network", "set", &bridge.name, "ipv4.nat", "true"])
            .await?;
        self.lxc(&["network", "set", &bridge.name, "ipv6.address", "none"])
            .await
    }

    async fn delete_bridge(&self, name: &str) -> DriverResult {
        self.lxc(&["network", "delete", name, "-q"]).await
    }

    async fn attach(&self, bridge_name: &str, machine_name: &str, ethernet: &str) -> DriverResult {
        self.lxc(&["network", "attach", bridge_name, machine_name, ethernet])
            .await
    }
}

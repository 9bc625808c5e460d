//! Deployer SPI
//!
//! The engine never talks to a platform directly. Each platform is reached
//! through a [`Deployer`] registered under the platform's name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::analyzer::DeployableUnit;
use crate::error::{ReleaseError, Result};

/// Everything a platform needs to start one unit
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub release_name: String,
    pub release_version: u32,
    pub unit: DeployableUnit,
}

/// Live state of a unit, or of one of its instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Deploying,
    Deployed,
    /// Some instances are deployed, others are not
    Partial,
    Failed,
    Undeployed,
    Unknown,
    /// The platform could not report a state
    Error,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Deploying => "deploying",
            UnitState::Deployed => "deployed",
            UnitState::Partial => "partial",
            UnitState::Failed => "failed",
            UnitState::Undeployed => "undeployed",
            UnitState::Unknown => "unknown",
            UnitState::Error => "error",
        }
    }

    /// Combine instance states into a unit state
    pub fn aggregate(states: impl IntoIterator<Item = UnitState>) -> UnitState {
        let states: HashSet<UnitState> = states.into_iter().collect();
        if states.is_empty() {
            return UnitState::Unknown;
        }
        if states.len() == 1 {
            return states.into_iter().next().unwrap_or(UnitState::Unknown);
        }
        if states.contains(&UnitState::Error) {
            UnitState::Error
        } else if states.contains(&UnitState::Deploying) {
            UnitState::Deploying
        } else if states.contains(&UnitState::Deployed) {
            UnitState::Partial
        } else if states.contains(&UnitState::Failed) {
            UnitState::Failed
        } else {
            UnitState::Unknown
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one running instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: String,
    pub state: UnitState,
}

/// Status reported by a platform for one deployment id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    pub platform_id: String,
    pub state: UnitState,
    #[serde(default)]
    pub instances: Vec<InstanceStatus>,
}

impl UnitStatus {
    /// Build a status whose state is aggregated from its instances
    pub fn from_instances(platform_id: impl Into<String>, instances: Vec<InstanceStatus>) -> Self {
        Self {
            platform_id: platform_id.into(),
            state: UnitState::aggregate(instances.iter().map(|i| i.state)),
            instances,
        }
    }
}

/// Platform deployer
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Start a unit, returning the platform-assigned deployment id
    async fn deploy(&self, request: &DeployRequest) -> Result<String>;

    async fn undeploy(&self, platform_id: &str) -> Result<()>;

    async fn status(&self, platform_id: &str) -> Result<UnitStatus>;

    /// Change the number of running instances
    async fn scale(&self, platform_id: &str, count: u32) -> Result<()>;
}

/// Deployers by platform name
#[derive(Clone, Default)]
pub struct DeployerRegistry {
    deployers: HashMap<String, Arc<dyn Deployer>>,
}

impl DeployerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: impl Into<String>, deployer: Arc<dyn Deployer>) -> Self {
        self.register(platform, deployer);
        self
    }

    pub fn register(&mut self, platform: impl Into<String>, deployer: Arc<dyn Deployer>) {
        self.deployers.insert(platform.into(), deployer);
    }

    pub fn get(&self, platform: &str) -> Result<Arc<dyn Deployer>> {
        self.deployers
            .get(platform)
            .cloned()
            .ok_or_else(|| ReleaseError::PlatformNotFound(platform.to_string()))
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.deployers.contains_key(platform)
    }

    /// Registered platform names, sorted
    pub fn platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.deployers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A call received by an [`InMemoryDeployer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployerCall {
    Deploy { unit: String, platform_id: String },
    Undeploy { platform_id: String },
    Scale { platform_id: String, count: u32 },
}

#[derive(Debug, Clone)]
struct RunningUnit {
    unit: String,
    count: u32,
}

#[derive(Debug, Default)]
struct InMemoryState {
    running: BTreeMap<String, RunningUnit>,
    journal: Vec<DeployerCall>,
    failing_deploys: HashSet<String>,
    failing_undeploys: HashSet<String>,
    forced_states: HashMap<String, UnitState>,
}

/// Deployer that keeps units in memory
///
/// Supports failure injection per unit name and records every mutating
/// call, which makes it suitable for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryDeployer {
    state: Mutex<InMemoryState>,
    latency: Option<Duration>,
}

impl InMemoryDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to keep transitions in flight
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| ReleaseError::Deployer("in-memory deployer lock poisoned".to_string()))
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Make deploys of `unit` fail until cleared
    pub fn fail_deploys_of(&self, unit: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_deploys.insert(unit.to_string());
        }
    }

    /// Make undeploys of `unit` fail until cleared
    pub fn fail_undeploys_of(&self, unit: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_undeploys.insert(unit.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.lock() {
            state.failing_deploys.clear();
            state.failing_undeploys.clear();
        }
    }

    /// Report `state` for every running instance of `unit`
    pub fn set_state(&self, unit: &str, unit_state: UnitState) {
        if let Ok(mut state) = self.lock() {
            state.forced_states.insert(unit.to_string(), unit_state);
        }
    }

    /// Every mutating call received, in order
    pub fn calls(&self) -> Vec<DeployerCall> {
        self.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    /// Running platform ids with their unit names
    pub fn running(&self) -> BTreeMap<String, String> {
        self.lock()
            .map(|s| {
                s.running
                    .iter()
                    .map(|(id, unit)| (id.clone(), unit.unit.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current instance count of a platform id
    pub fn instances(&self, platform_id: &str) -> Option<u32> {
        self.lock()
            .ok()?
            .running
            .get(platform_id)
            .map(|u| u.count)
    }
}

#[async_trait]
impl Deployer for InMemoryDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<String> {
        self.pause().await;
        let mut state = self.lock()?;
        let unit = &request.unit.name;

        if state.failing_deploys.contains(unit) {
            return Err(ReleaseError::Deployer(format!("deployment of '{}' rejected", unit)));
        }

        let base = format!("{}-{}-v{}", request.release_name, unit, request.release_version);
        let mut platform_id = base.clone();
        let mut suffix = 1;
        while state.running.contains_key(&platform_id) {
            suffix += 1;
            platform_id = format!("{}-{}", base, suffix);
        }

        state.running.insert(
            platform_id.clone(),
            RunningUnit {
                unit: unit.clone(),
                count: request.unit.count(),
            },
        );
        state.journal.push(DeployerCall::Deploy {
            unit: unit.clone(),
            platform_id: platform_id.clone(),
        });
        debug!(unit = %unit, platform_id = %platform_id, "In-memory deploy");
        Ok(platform_id)
    }

    async fn undeploy(&self, platform_id: &str) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;

        if let Some(running) = state.running.get(platform_id)
            && state.failing_undeploys.contains(&running.unit)
        {
            return Err(ReleaseError::Deployer(format!(
                "undeployment of '{}' rejected",
                platform_id
            )));
        }

        state.running.remove(platform_id);
        state.journal.push(DeployerCall::Undeploy {
            platform_id: platform_id.to_string(),
        });
        Ok(())
    }

    async fn status(&self, platform_id: &str) -> Result<UnitStatus> {
        let state = self.lock()?;
        let Some(running) = state.running.get(platform_id) else {
            return Ok(UnitStatus {
                platform_id: platform_id.to_string(),
                state: UnitState::Undeployed,
                instances: Vec::new(),
            });
        };

        let instance_state = state
            .forced_states
            .get(&running.unit)
            .copied()
            .unwrap_or(UnitState::Deployed);
        let instances = (0..running.count)
            .map(|i| InstanceStatus {
                id: format!("{}-{}", platform_id, i),
                state: instance_state,
            })
            .collect();

        Ok(UnitStatus::from_instances(platform_id, instances))
    }

    async fn scale(&self, platform_id: &str, count: u32) -> Result<()> {
        self.pause().await;
        let mut state = self.lock()?;
        let running = state
            .running
            .get_mut(platform_id)
            .ok_or_else(|| ReleaseError::Deployer(format!("'{}' is not deployed", platform_id)))?;
        running.count = count;
        state.journal.push(DeployerCall::Scale {
            platform_id: platform_id.to_string(),
            count,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::parse_units;

    fn request(name: &str) -> DeployRequest {
        let manifest = format!(
            "kind: Application\nmetadata:\n  name: {}\nspec:\n  deploymentProperties:\n    deployer.count: 2\n",
            name
        );
        let unit = parse_units(&manifest).unwrap().remove(name).unwrap();
        DeployRequest {
            release_name: "ticktock".to_string(),
            release_version: 1,
            unit,
        }
    }

    #[test]
    fn test_aggregate() {
        use UnitState::*;
        assert_eq!(UnitState::aggregate([]), Unknown);
        assert_eq!(UnitState::aggregate([Deployed, Deployed]), Deployed);
        assert_eq!(UnitState::aggregate([Deployed, Failed]), Partial);
        assert_eq!(UnitState::aggregate([Deploying, Deployed]), Deploying);
        assert_eq!(UnitState::aggregate([Failed, Undeployed]), Failed);
        assert_eq!(UnitState::aggregate([Deployed, Error]), Error);
    }

    #[tokio::test]
    async fn test_in_memory_lifecycle() {
        let deployer = InMemoryDeployer::new();
        let id = deployer.deploy(&request("log")).await.unwrap();
        assert_eq!(id, "ticktock-log-v1");

        let status = deployer.status(&id).await.unwrap();
        assert_eq!(status.state, UnitState::Deployed);
        assert_eq!(status.instances.len(), 2);

        deployer.scale(&id, 4).await.unwrap();
        assert_eq!(deployer.instances(&id), Some(4));

        deployer.set_state("log", UnitState::Failed);
        assert_eq!(deployer.status(&id).await.unwrap().state, UnitState::Failed);

        deployer.undeploy(&id).await.unwrap();
        assert_eq!(deployer.status(&id).await.unwrap().state, UnitState::Undeployed);
        assert_eq!(deployer.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let deployer = InMemoryDeployer::new();
        deployer.fail_deploys_of("log");
        assert!(deployer.deploy(&request("log")).await.is_err());
        assert!(deployer.running().is_empty());

        deployer.clear_failures();
        let id = deployer.deploy(&request("log")).await.unwrap();
        deployer.fail_undeploys_of("log");
        assert!(deployer.undeploy(&id).await.is_err());
        assert_eq!(deployer.running().len(), 1);
    }

    #[test]
    fn test_registry() {
        let registry = DeployerRegistry::new()
            .with("local", Arc::new(InMemoryDeployer::new()))
            .with("cloud", Arc::new(InMemoryDeployer::new()));

        assert_eq!(registry.platforms(), vec!["cloud", "local"]);
        assert!(registry.get("local").is_ok());
        assert!(matches!(
            registry.get("mars"),
            Err(ReleaseError::PlatformNotFound(_))
        ));
    }
}

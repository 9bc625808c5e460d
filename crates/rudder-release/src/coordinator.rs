//! Deployment coordination
//!
//! Executes one release transition: values are merged and rendered into a
//! candidate manifest, the manifest is diffed against the baseline and the
//! resulting unit changes are applied through the platform's [`Deployer`].
//! Apply failures end up on the release record, never as errors.

use futures::future::join_all;
use rudder_core::{ConfigValues, Package, merge_config};
use rudder_engine::ManifestRenderer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::analyzer::{self, DeployableUnit, UnitChange};
use crate::deployer::{DeployRequest, Deployer, DeployerRegistry, UnitState};
use crate::error::{ReleaseError, Result, UnitFailure};
use crate::release::{AppDeployerData, Release, StatusCode, UnitHealth};
use crate::storage::ReleaseStore;

/// Description recorded on a release whose apply was cancelled
pub const CANCELLED: &str = "cancelled";

enum Step {
    Deploy(DeployableUnit),
    Update(UnitChange),
    Delete(DeployableUnit),
}

impl Step {
    fn unit(&self) -> &str {
        match self {
            Step::Deploy(unit) | Step::Delete(unit) => &unit.name,
            Step::Update(change) => change.name(),
        }
    }
}

fn failure(unit: &str, operation: &str, error: &ReleaseError) -> UnitFailure {
    UnitFailure {
        unit: unit.to_string(),
        operation: operation.to_string(),
        message: error.to_string(),
    }
}

fn health(name: &str, platform_id: Option<&str>, state: UnitState, detail: Option<String>) -> UnitHealth {
    UnitHealth {
        name: name.to_string(),
        platform_id: platform_id.map(String::from),
        state,
        detail,
    }
}

/// Tracks what an apply leaves behind
struct ApplyState {
    data: AppDeployerData,
    units: Vec<UnitHealth>,
    failures: Vec<UnitFailure>,
}

impl ApplyState {
    fn record(&mut self, name: &str, platform_id: Option<&str>, state: UnitState, detail: Option<String>) {
        if let Some(id) = platform_id {
            self.data.insert(name, id);
        }
        self.units.push(health(name, platform_id, state, detail));
    }

    fn fail(&mut self, unit: &str, operation: &str, error: &ReleaseError) {
        warn!(unit = %unit, operation, error = %error, "Unit operation failed");
        self.failures.push(failure(unit, operation, error));
    }
}

/// Runs release transitions against the store and the registered platforms
pub struct DeploymentCoordinator {
    store: Arc<dyn ReleaseStore>,
    deployers: DeployerRegistry,
    renderer: ManifestRenderer,
}

impl DeploymentCoordinator {
    pub fn new(store: Arc<dyn ReleaseStore>, deployers: DeployerRegistry) -> Self {
        Self {
            store,
            deployers,
            renderer: ManifestRenderer::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> {
        &self.store
    }

    pub fn deployers(&self) -> &DeployerRegistry {
        &self.deployers
    }

    // ========== Prepare ==========

    /// Build the pending record of a transition
    ///
    /// Every failure here is a caller error and is returned synchronously:
    /// unknown platform, invalid package, non-mapping values, template
    /// errors and unsupported manifest kinds.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        &self,
        name: &str,
        version: u32,
        package: Package,
        config_values: ConfigValues,
        platform: &str,
        status: StatusCode,
    ) -> Result<Release> {
        if !self.deployers.contains(platform) {
            return Err(ReleaseError::PlatformNotFound(platform.to_string()));
        }
        package.validate()?;

        let values = merge_config(&package, &config_values)?;
        let manifest = self.renderer.render(&package, &values)?;
        let units = analyzer::parse_units(&manifest)?;
        debug!(release = %name, version, units = units.len(), "Rendered manifest");

        Ok(Release::pending(
            name,
            version,
            package,
            config_values,
            values,
            manifest,
            platform,
            status,
        ))
    }

    // ========== Apply ==========

    /// Move the platform from `baseline` to `release` and persist the outcome
    ///
    /// Deploys new units, replaces changed units new-before-old and removes
    /// dropped units. The unit to platform id mapping is saved whatever
    /// happens; the release ends DEPLOYED, or FAILED with per-unit detail.
    /// Errors are only returned when the store itself fails.
    pub async fn apply(
        &self,
        release: &mut Release,
        baseline: Option<&Release>,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let baseline = baseline.filter(|b| b.status() != StatusCode::Deleted);
        let previous_manifest = baseline.map(|b| b.manifest.as_str()).unwrap_or_default();
        let previous_data = match baseline {
            Some(b) => self.store.deployer_data(&b.name, b.version).await?,
            None => None,
        }
        .unwrap_or_default();

        let mut state = ApplyState {
            data: AppDeployerData::new(&release.name, release.version),
            units: Vec::new(),
            failures: Vec::new(),
        };

        let plan = analyzer::analyze(previous_manifest, &release.manifest)
            .and_then(|report| Ok((report, self.deployers.get(&release.platform)?)));
        let (report, deployer) = match plan {
            Ok(plan) => plan,
            Err(e) => {
                // Nothing was touched; the previous units are still the live ones
                state.data.units = previous_data.units;
                self.store.save_deployer_data(&state.data).await?;
                release.mark_failed(e.to_string());
                self.store.update(release).await?;
                return Ok(());
            }
        };
        info!(
            release = %release.name,
            version = release.version,
            changes = %report.summary(),
            "Applying release"
        );

        for name in &report.unchanged {
            state.record(name, previous_data.platform_id(name), UnitState::Deployed, None);
        }

        let steps = report
            .to_deploy
            .into_iter()
            .map(Step::Deploy)
            .chain(report.to_update.into_iter().map(Step::Update))
            .chain(report.to_delete.into_iter().map(Step::Delete));

        let mut cancelled = false;
        for step in steps {
            if !cancelled && cancel.load(Ordering::SeqCst) {
                info!(release = %release.name, version = release.version, "Apply cancelled");
                cancelled = true;
            }
            if cancelled {
                // Units left alone keep their previous deployment
                let unit = step.unit().to_string();
                if let Some(id) = previous_data.platform_id(&unit) {
                    state.record(&unit, Some(id), UnitState::Unknown, Some(CANCELLED.to_string()));
                }
                continue;
            }

            match step {
                Step::Deploy(unit) => {
                    self.deploy_unit(deployer.as_ref(), release, unit, &mut state).await;
                }
                Step::Update(change) => {
                    let old_id = previous_data.platform_id(change.name()).map(String::from);
                    self.update_unit(deployer.as_ref(), release, change, old_id, &mut state)
                        .await;
                }
                Step::Delete(unit) => {
                    if let Some(id) = previous_data.platform_id(&unit.name) {
                        if let Err(e) = deployer.undeploy(id).await {
                            state.fail(&unit.name, "undeploy", &e);
                            state.record(&unit.name, Some(id), UnitState::Unknown, Some(e.to_string()));
                        } else {
                            debug!(unit = %unit.name, platform_id = %id, "Undeployed unit");
                        }
                    }
                }
            }
        }

        self.store.save_deployer_data(&state.data).await?;

        if cancelled {
            let mut description = CANCELLED.to_string();
            if !state.failures.is_empty() {
                description = format!(
                    "{}: {}",
                    description,
                    ReleaseError::DeploymentApply { failures: state.failures }
                );
            }
            release.mark_failed(description);
        } else if state.failures.is_empty() {
            release.mark_deployed();
        } else {
            release.mark_failed(
                ReleaseError::DeploymentApply {
                    failures: state.failures,
                }
                .to_string(),
            );
        }
        release.info.units = state.units;
        self.store.update(release).await?;

        info!(
            release = %release.name,
            version = release.version,
            status = %release.status(),
            "Release applied"
        );
        Ok(())
    }

    async fn deploy_unit(
        &self,
        deployer: &dyn Deployer,
        release: &Release,
        unit: DeployableUnit,
        state: &mut ApplyState,
    ) {
        let name = unit.name.clone();
        match deployer.deploy(&request(release, unit)).await {
            Ok(id) => {
                debug!(unit = %name, platform_id = %id, "Deployed unit");
                state.record(&name, Some(id.as_str()), UnitState::Deployed, None);
            }
            Err(e) => {
                state.fail(&name, "deploy", &e);
                state.record(&name, None, UnitState::Failed, Some(e.to_string()));
            }
        }
    }

    async fn update_unit(
        &self,
        deployer: &dyn Deployer,
        release: &Release,
        change: UnitChange,
        old_id: Option<String>,
        state: &mut ApplyState,
    ) {
        let name = change.name().to_string();
        let new_id = match deployer.deploy(&request(release, change.candidate)).await {
            Ok(id) => id,
            Err(e) => {
                // The old deployment keeps serving
                state.fail(&name, "deploy", &e);
                state.record(&name, old_id.as_deref(), UnitState::Failed, Some(e.to_string()));
                return;
            }
        };
        debug!(unit = %name, platform_id = %new_id, "Deployed replacement unit");

        let Some(old_id) = old_id else {
            state.record(&name, Some(new_id.as_str()), UnitState::Deployed, None);
            return;
        };
        match deployer.undeploy(&old_id).await {
            Ok(()) => state.record(&name, Some(new_id.as_str()), UnitState::Deployed, None),
            Err(e) => {
                state.fail(&name, "undeploy", &e);
                state.record(
                    &name,
                    Some(new_id.as_str()),
                    UnitState::Deployed,
                    Some(format!("previous deployment {} still running: {}", old_id, e)),
                );
            }
        }
    }

    // ========== Teardown ==========

    /// Undeploy every unit recorded for the given releases
    ///
    /// Platform ids are de-duplicated across releases, so a unit carried
    /// over between versions is undeployed once.
    pub async fn teardown(&self, releases: &[&Release]) -> Result<Vec<UnitFailure>> {
        let mut targets: BTreeMap<String, (String, String)> = BTreeMap::new();
        for release in releases {
            if let Some(data) = self.store.deployer_data(&release.name, release.version).await? {
                for (unit, id) in data.units {
                    targets
                        .entry(id)
                        .or_insert_with(|| (unit, release.platform.clone()));
                }
            }
        }

        let mut failures = Vec::new();
        for (id, (unit, platform)) in targets {
            let result = match self.deployers.get(&platform) {
                Ok(deployer) => deployer.undeploy(&id).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(unit = %unit, platform_id = %id, "Undeployed unit"),
                Err(e) => {
                    warn!(unit = %unit, platform_id = %id, error = %e, "Undeploy failed");
                    failures.push(failure(&unit, "undeploy", &e));
                }
            }
        }
        Ok(failures)
    }

    // ========== Scale ==========

    /// Change instance counts of units of a deployed release
    ///
    /// Unknown unit names are rejected before any platform call. Only
    /// `release.info` is touched; the caller persists it.
    pub async fn scale(
        &self,
        release: &mut Release,
        counts: &BTreeMap<String, u32>,
    ) -> Result<Vec<UnitFailure>> {
        let data = self
            .store
            .deployer_data(&release.name, release.version)
            .await?
            .unwrap_or_default();

        let mut targets = Vec::with_capacity(counts.len());
        for (unit, count) in counts {
            let id = data.platform_id(unit).ok_or_else(|| {
                ReleaseError::InvalidRequest(format!(
                    "release '{}' has no deployed unit '{}'",
                    release.name, unit
                ))
            })?;
            targets.push((unit.as_str(), id, *count));
        }

        let deployer = self.deployers.get(&release.platform)?;
        let mut failures = Vec::new();
        let mut scaled = Vec::new();
        for (unit, id, count) in targets {
            match deployer.scale(id, count).await {
                Ok(()) => {
                    info!(release = %release.name, unit = %unit, count, "Scaled unit");
                    scaled.push(format!("{}={}", unit, count));
                }
                Err(e) => {
                    warn!(release = %release.name, unit = %unit, error = %e, "Scale failed");
                    failures.push(failure(unit, "scale", &e));
                }
            }
        }

        for unit in &mut release.info.units {
            if let Some(f) = failures.iter().find(|f| f.unit == unit.name) {
                unit.detail = Some(f.message.clone());
            } else if let Some(count) = counts.get(&unit.name) {
                unit.detail = Some(format!("scaled to {}", count));
            }
        }
        if !scaled.is_empty() {
            release.info.description = format!("Scaled {}", scaled.join(", "));
        }
        Ok(failures)
    }

    // ========== Status ==========

    /// Query live health of every unit recorded for a release
    ///
    /// Returns `None` when the release never reached the apply phase.
    pub async fn unit_health(&self, release: &Release) -> Result<Option<Vec<UnitHealth>>> {
        let Some(data) = self
            .store
            .deployer_data(&release.name, release.version)
            .await?
        else {
            return Ok(None);
        };
        let deployer = self.deployers.get(&release.platform)?;

        let queries = data.units.iter().map(|(unit, id)| {
            let deployer = Arc::clone(&deployer);
            async move {
                match deployer.status(id).await {
                    Ok(status) => health(unit, Some(id.as_str()), status.state, None),
                    Err(e) => health(unit, Some(id.as_str()), UnitState::Error, Some(e.to_string())),
                }
            }
        });
        Ok(Some(join_all(queries).await))
    }
}

fn request(release: &Release, unit: DeployableUnit) -> DeployRequest {
    DeployRequest {
        release_name: release.name.clone(),
        release_version: release.version,
        unit,
    }
}

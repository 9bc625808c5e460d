//! Release lifecycle controller
//!
//! Public entry point of the engine. Every mutating operation holds the
//! release name's guard for its whole duration, so transitions on one name
//! never interleave while different names proceed independently.
//!
//! Install, upgrade and rollback return as soon as the pending record is
//! stored; the platform work continues on a background task that keeps
//! the guard until the release settles. Callers poll [`ReleaseController::status`]
//! or wait with [`ReleaseController::await_idle`].

use rudder_core::{Package, Redactor};
use rudder_repo::PackageCatalog;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info};

use crate::actions::{InstallRequest, PackageRef, ScaleRequest, UpgradeRequest};
use crate::analyzer::{self, AnalysisReport};
use crate::coordinator::DeploymentCoordinator;
use crate::deployer::DeployerRegistry;
use crate::error::{ReleaseError, Result};
use crate::locks::{ReleaseGuard, ReleaseLocks};
use crate::reconciler::StatusReconciler;
use crate::release::{AppDeployerData, Release, StatusCode};
use crate::storage::ReleaseStore;

const MAX_NAME_LEN: usize = 63;

struct Inner {
    store: Arc<dyn ReleaseStore>,
    catalog: Arc<dyn PackageCatalog>,
    coordinator: Arc<DeploymentCoordinator>,
    locks: Arc<ReleaseLocks>,
    redactor: Redactor,
}

/// The release state machine
#[derive(Clone)]
pub struct ReleaseController {
    inner: Arc<Inner>,
}

/// Builder for [`ReleaseController`]
pub struct ReleaseControllerBuilder {
    store: Arc<dyn ReleaseStore>,
    catalog: Arc<dyn PackageCatalog>,
    deployers: DeployerRegistry,
    redactor: Redactor,
}

impl ReleaseControllerBuilder {
    /// Patterns used by the redacting queries
    pub fn redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn build(self) -> ReleaseController {
        let coordinator = DeploymentCoordinator::new(Arc::clone(&self.store), self.deployers);
        ReleaseController {
            inner: Arc::new(Inner {
                store: self.store,
                catalog: self.catalog,
                coordinator: Arc::new(coordinator),
                locks: Arc::new(ReleaseLocks::new()),
                redactor: self.redactor,
            }),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with(['.', '-'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ReleaseError::InvalidRequest(format!(
            "invalid release name '{}': use at most {} letters, digits, '-', '_' or '.'",
            name, MAX_NAME_LEN
        )))
    }
}

impl ReleaseController {
    pub fn builder(
        store: Arc<dyn ReleaseStore>,
        catalog: Arc<dyn PackageCatalog>,
        deployers: DeployerRegistry,
    ) -> ReleaseControllerBuilder {
        ReleaseControllerBuilder {
            store,
            catalog,
            deployers,
            redactor: Redactor::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> {
        &self.inner.store
    }

    pub fn catalog(&self) -> &Arc<dyn PackageCatalog> {
        &self.inner.catalog
    }

    /// Reconciler sharing this controller's guards
    pub fn reconciler(&self) -> StatusReconciler {
        StatusReconciler::new(
            Arc::clone(&self.inner.coordinator),
            Arc::clone(&self.inner.locks),
        )
    }

    async fn resolve(&self, package: PackageRef) -> Result<Package> {
        match package {
            PackageRef::Inline(package) => Ok(package),
            PackageRef::Catalog { name, version } => {
                Ok(self.inner.catalog.fetch(&name, version.as_ref()).await?)
            }
        }
    }

    async fn next_version(&self, name: &str) -> Result<u32> {
        match self.inner.store.latest(name).await {
            Ok(latest) => Ok(latest.version + 1),
            Err(e) if e.is_not_found() => Ok(1),
            Err(e) => Err(e),
        }
    }

    /// Store the pending record and hand the apply to a background task
    async fn launch(
        &self,
        guard: ReleaseGuard,
        release: Release,
        baseline: Option<Release>,
    ) -> Result<Release> {
        self.inner.store.create(&release).await?;
        info!(
            release = %release.name,
            version = release.version,
            status = %release.status(),
            package = %release.package_coordinates(),
            "Release transition started"
        );

        let inner = Arc::clone(&self.inner);
        let mut pending = release.clone();
        tokio::spawn(async move {
            let cancel = guard.cancel_flag();
            if let Err(e) = inner
                .coordinator
                .apply(&mut pending, baseline.as_ref(), &cancel)
                .await
            {
                error!(
                    release = %pending.name,
                    version = pending.version,
                    error = %e,
                    "Release transition aborted"
                );
                pending.mark_failed(e.to_string());
                if let Err(e) = inner.store.update(&pending).await {
                    error!(release = %pending.name, error = %e, "Could not record failure");
                }
            }
            drop(guard);
        });

        Ok(release)
    }

    // ========== Install ==========

    /// Install a package under a name that is unused or whose latest
    /// version is DELETED
    pub async fn install(&self, request: InstallRequest) -> Result<Release> {
        validate_name(&request.name)?;
        let guard = self.inner.locks.try_acquire(&request.name)?;

        if let Some(latest) = self.inner.store.history(&request.name).await?.first()
            && latest.status() != StatusCode::Deleted
        {
            return Err(ReleaseError::ReleaseAlreadyExists {
                name: request.name,
                status: latest.status().to_string(),
            });
        }

        let version = self.next_version(&request.name).await?;
        let package = self.resolve(request.package).await?;
        let release = self.inner.coordinator.prepare(
            &request.name,
            version,
            package,
            request.config_values,
            &request.platform,
            StatusCode::PendingInstall,
        )?;

        self.launch(guard, release, None).await
    }

    // ========== Upgrade ==========

    /// Upgrade to a new package or new overrides, diffing against the
    /// latest DEPLOYED or DELETED version
    pub async fn upgrade(&self, request: UpgradeRequest) -> Result<Release> {
        validate_name(&request.name)?;
        let guard = self.inner.locks.try_acquire(&request.name)?;

        let baseline = self.inner.store.latest_for_update(&request.name).await?;
        let version = self.next_version(&request.name).await?;
        let package = self.resolve(request.package).await?;
        let release = self.inner.coordinator.prepare(
            &request.name,
            version,
            package,
            request.config_values,
            &baseline.platform,
            StatusCode::PendingUpgrade,
        )?;

        self.launch(guard, release, Some(baseline)).await
    }

    // ========== Rollback ==========

    /// Redeploy the package and overrides of an earlier version as a new
    /// version
    ///
    /// A `version` of 0 selects the rollback target: the highest DEPLOYED
    /// or DELETED version below the current baseline.
    pub async fn rollback(&self, name: &str, version: u32) -> Result<Release> {
        validate_name(name)?;
        let guard = self.inner.locks.try_acquire(name)?;

        let target = if version == 0 {
            self.inner.store.rollback_target(name).await?
        } else {
            self.inner.store.get(name, version).await?
        };
        let baseline = self.inner.store.latest_for_update(name).await?;
        let next = self.next_version(name).await?;

        info!(release = %name, target = target.version, "Rolling back");
        let release = self.inner.coordinator.prepare(
            name,
            next,
            target.package,
            target.config_values,
            &target.platform,
            StatusCode::PendingRollback,
        )?;

        self.launch(guard, release, Some(baseline)).await
    }

    // ========== Scale ==========

    /// Change instance counts of the latest DEPLOYED version in place
    pub async fn scale(&self, name: &str, counts: ScaleRequest) -> Result<Release> {
        validate_name(name)?;
        if counts.is_empty() {
            return Err(ReleaseError::InvalidRequest(
                "scale needs at least one unit".to_string(),
            ));
        }
        let _guard = self.inner.locks.try_acquire(name)?;

        let mut release = self.inner.store.latest_deployed(name).await?;
        let failures = self.inner.coordinator.scale(&mut release, &counts).await?;
        self.inner.store.update(&release).await?;

        if failures.is_empty() {
            Ok(release)
        } else {
            Err(ReleaseError::DeploymentApply { failures })
        }
    }

    // ========== Delete ==========

    /// Undeploy a release and mark its latest version DELETED
    ///
    /// Earlier versions still marked DEPLOYED become DELETED as well, so
    /// nothing is left pointing at undeployed units.
    ///
    /// With `delete_package`, the package is then removed from the catalog;
    /// the call is refused up front when another release still uses it.
    pub async fn delete(&self, name: &str, delete_package: bool) -> Result<Release> {
        validate_name(name)?;
        let guard = self.inner.locks.try_acquire(name)?;
        let store = &self.inner.store;

        let mut target = store.latest(name).await?;
        if target.status() == StatusCode::Deleted {
            return Err(ReleaseError::InvalidRequest(format!(
                "release '{}' is already deleted",
                name
            )));
        }

        if delete_package {
            self.check_package_unused(name, target.package.name(), target.package.version())
                .await?;
            self.inner
                .catalog
                .check_deletable(target.package.name(), target.package.version())
                .await?;
        }

        target.set_status(StatusCode::Deleting, "Delete in progress");
        store.update(&target).await?;
        info!(release = %name, version = target.version, "Deleting release");

        // Earlier versions still marked DEPLOYED, highest first
        let mut superseded: Vec<Release> = store
            .history(name)
            .await?
            .into_iter()
            .filter(|r| r.version != target.version && r.status() == StatusCode::Deployed)
            .collect();

        // A version that never reached the apply phase left the platform
        // as the latest DEPLOYED version had it
        let applied = store.deployer_data(name, target.version).await?.is_some();
        let teardown_from = match superseded.first() {
            Some(deployed) if !applied => deployed,
            _ => &target,
        };
        let failures = self.inner.coordinator.teardown(&[teardown_from]).await?;

        if !failures.is_empty() {
            let err = ReleaseError::DeploymentApply { failures };
            target.mark_failed(err.to_string());
            store.update(&target).await?;
            return Err(err);
        }

        target.mark_deleted();
        target.info.units.clear();
        store.update(&target).await?;

        for deployed in &mut superseded {
            deployed.mark_deleted();
            deployed.info.units.clear();
            store.update(deployed).await?;
        }

        if delete_package {
            let removed = self
                .inner
                .catalog
                .delete(target.package.name(), target.package.version())
                .await?;
            info!(
                release = %name,
                package = %target.package_coordinates(),
                removed = removed.len(),
                "Deleted package"
            );
        }

        drop(guard);
        Ok(target)
    }

    /// Other names still relying on a package: their latest non-FAILED
    /// version uses it and is not DELETED
    async fn check_package_unused(&self, name: &str, package: &str, version: &semver::Version) -> Result<()> {
        let mut users = Vec::new();
        for other in self.inner.store.names().await? {
            if other == name {
                continue;
            }
            let history = self.inner.store.history(&other).await?;
            let Some(current) = history.iter().find(|r| r.status() != StatusCode::Failed) else {
                continue;
            };
            if current.status() != StatusCode::Deleted
                && current.package.name() == package
                && current.package.version() == version
            {
                users.push(other);
            }
        }

        if users.is_empty() {
            Ok(())
        } else {
            Err(ReleaseError::PackageInUse {
                package: format!("{}:{}", package, version),
                releases: users,
            })
        }
    }

    // ========== Cancel ==========

    /// Ask the in-flight transition of `name` to stop before its next
    /// platform call
    ///
    /// Returns whether a transition was in flight. Calls already issued
    /// are not interrupted.
    pub fn cancel(&self, name: &str) -> bool {
        let cancelled = self.inner.locks.cancel(name);
        if cancelled {
            info!(release = %name, "Cancellation requested");
        }
        cancelled
    }

    /// Wait until no transition holds `name`
    pub async fn await_idle(&self, name: &str) -> Result<Release> {
        self.inner.locks.wait_idle(name).await?;
        self.inner.store.latest(name).await
    }

    // ========== Query Operations ==========

    /// A specific version, or the latest when `version` is `None`
    pub async fn status(&self, name: &str, version: Option<u32>) -> Result<Release> {
        match version {
            Some(version) => self.inner.store.get(name, version).await,
            None => self.inner.store.latest(name).await,
        }
    }

    /// The `max` most recent versions, highest first; 0 returns all
    pub async fn history(&self, name: &str, max: u32) -> Result<Vec<Release>> {
        if max == 0 {
            let history = self.inner.store.history(name).await?;
            if history.is_empty() {
                return Err(ReleaseError::ReleaseNotFound {
                    name: name.to_string(),
                    version: None,
                });
            }
            return Ok(history);
        }
        self.inner.store.revision_range(name, max).await
    }

    /// Latest version of every name matching `filter`
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<Release>> {
        self.inner.store.list(filter).await
    }

    /// Latest DEPLOYED or FAILED version of every name matching `filter`
    pub async fn deployed_or_failed(&self, filter: Option<&str>) -> Result<Vec<Release>> {
        self.inner.store.deployed_or_failed(filter).await
    }

    /// Rendered manifest, optionally with sensitive values masked
    pub async fn manifest(&self, name: &str, version: Option<u32>, redact: bool) -> Result<String> {
        let release = self.status(name, version).await?;
        if redact {
            Ok(self.inner.redactor.redact_yaml(&release.manifest)?)
        } else {
            Ok(release.manifest)
        }
    }

    /// Effective values, optionally with sensitive values masked
    pub async fn values(&self, name: &str, version: Option<u32>, redact: bool) -> Result<JsonValue> {
        let release = self.status(name, version).await?;
        let values = release.values.into_inner();
        if redact {
            Ok(self.inner.redactor.redact(&values))
        } else {
            Ok(values)
        }
    }

    pub async fn deployer_data(&self, name: &str, version: u32) -> Result<Option<AppDeployerData>> {
        self.inner.store.deployer_data(name, version).await
    }

    /// Unit changes between two stored versions
    pub async fn diff(&self, name: &str, from: u32, to: u32) -> Result<AnalysisReport> {
        let from = self.inner.store.get(name, from).await?;
        let to = self.inner.store.get(name, to).await?;
        analyzer::analyze(&from.manifest, &to.manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ticktock").is_ok());
        assert!(validate_name("tick_tock.v2-a").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-flag").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("with space").is_err());
        assert!(validate_name(&"x".repeat(64)).is_err());
    }
}

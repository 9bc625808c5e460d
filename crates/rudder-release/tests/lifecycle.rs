//! End-to-end release lifecycle against the in-memory store, a local
//! catalog and the in-memory deployer

use rudder_core::{Package, PackageInfo, Repository, Template};
use rudder_release::{
    DeployerRegistry, InMemoryDeployer, InstallRequest, MemoryReleaseStore, PackageRef,
    ReleaseController, ReleaseError, ReleaseStore, StatusCode, UnitState, UpgradeRequest,
};
use rudder_repo::{LocalCatalog, PackageCatalog};
use semver::Version;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const APP: &str = "\
kind: Application
metadata:
  name: {{ name }}
spec:
  resource: maven://org.example:{{ name }}
  version: {{ version }}
  applicationProperties:
    level: {{ level }}
    password: {{ password }}
";

fn unit(name: &str) -> Package {
    Package::new(PackageInfo::new(name, Version::new(1, 0, 0)))
        .with_template(Template::new(format!("{}.yml", name), APP))
        .with_values(format!(
            "name: {}\nversion: 1.0.0\nlevel: info\npassword: changeme\n",
            name
        ))
}

fn ticktock(version: Version) -> Package {
    Package::new(PackageInfo::new("ticktock", version))
        .with_dependency(unit("time"))
        .with_dependency(unit("log"))
}

struct Harness {
    controller: ReleaseController,
    deployer: Arc<InMemoryDeployer>,
    store: Arc<MemoryReleaseStore>,
    catalog: Arc<LocalCatalog>,
}

async fn harness_with(deployer: InMemoryDeployer) -> Harness {
    let store = Arc::new(MemoryReleaseStore::new());
    let deployer = Arc::new(deployer);
    let catalog = Arc::new(LocalCatalog::new([Repository::local("local")]).unwrap());
    catalog
        .add_package("local", ticktock(Version::new(1, 0, 0)))
        .await
        .unwrap();

    let controller = ReleaseController::builder(
        store.clone(),
        catalog.clone(),
        DeployerRegistry::new().with("default", deployer.clone()),
    )
    .build();

    Harness {
        controller,
        deployer,
        store,
        catalog,
    }
}

async fn harness() -> Harness {
    harness_with(InMemoryDeployer::new()).await
}

fn install_request(name: &str) -> InstallRequest {
    InstallRequest::new(name, PackageRef::catalog("ticktock", None), "default")
}

impl Harness {
    async fn install(&self, name: &str) -> StatusCode {
        self.controller.install(install_request(name)).await.unwrap();
        self.controller.await_idle(name).await.unwrap().status()
    }
}

#[tokio::test]
async fn test_install_upgrade_rollback_delete() {
    let h = harness().await;

    let pending = h
        .controller
        .install(install_request("ticktock").with_values("log:\n  level: error\n"))
        .await
        .unwrap();
    assert_eq!(pending.version, 1);
    assert_eq!(pending.status(), StatusCode::PendingInstall);

    let v1 = h.controller.await_idle("ticktock").await.unwrap();
    assert_eq!(v1.status(), StatusCode::Deployed);
    assert_eq!(v1.values.get("log.level").unwrap(), "error");
    assert_eq!(v1.values.get("time.level").unwrap(), "info");
    assert_eq!(v1.manifest.matches("# Source: ").count(), 2);
    assert!(v1.manifest.contains("---\n# Source: time.yml\n"));
    assert!(v1.manifest.contains("---\n# Source: log.yml\n"));
    assert_eq!(h.deployer.running().len(), 2);

    // Upgrade changes only the log unit
    let v2 = h
        .controller
        .upgrade(
            UpgradeRequest::new("ticktock", ticktock(Version::new(1, 0, 0)))
                .with_values("log:\n  version: 2.0.0\n"),
        )
        .await
        .unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.status(), StatusCode::PendingUpgrade);
    let v2 = h.controller.await_idle("ticktock").await.unwrap();
    assert_eq!(v2.status(), StatusCode::Deployed);

    let data = h.controller.deployer_data("ticktock", 2).await.unwrap().unwrap();
    assert_eq!(data.platform_id("log"), Some("ticktock-log-v2"));
    assert_eq!(data.platform_id("time"), Some("ticktock-time-v1"));

    let report = h.controller.diff("ticktock", 1, 2).await.unwrap();
    assert_eq!(report.to_update.len(), 1);
    assert_eq!(report.to_update[0].name(), "log");

    // Rollback picks v1 and allocates v3
    let v3 = h.controller.rollback("ticktock", 0).await.unwrap();
    assert_eq!(v3.version, 3);
    assert_eq!(v3.status(), StatusCode::PendingRollback);
    let v3 = h.controller.await_idle("ticktock").await.unwrap();
    assert_eq!(v3.status(), StatusCode::Deployed);
    assert_eq!(v3.manifest, v1.manifest);
    assert_eq!(
        h.deployer.running().keys().cloned().collect::<Vec<_>>(),
        vec!["ticktock-log-v3", "ticktock-time-v1"]
    );

    let versions: Vec<u32> = h
        .controller
        .history("ticktock", 0)
        .await
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![3, 2, 1]);
    assert_eq!(h.controller.history("ticktock", 2).await.unwrap().len(), 2);

    let deleted = h.controller.delete("ticktock", false).await.unwrap();
    assert_eq!(deleted.version, 3);
    assert_eq!(deleted.status(), StatusCode::Deleted);
    assert!(h.deployer.running().is_empty());
    assert!(h.controller.delete("ticktock", false).await.is_err());
    assert!(h.store.latest_deployed("ticktock").await.unwrap_err().is_not_found());
    assert!(h.store.rollback_target("ticktock").await.is_ok());

    // Versions keep increasing across deletes
    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);
    assert_eq!(h.store.latest("ticktock").await.unwrap().version, 4);
}

#[tokio::test]
async fn test_second_transition_is_rejected_while_in_flight() {
    let h = harness_with(InMemoryDeployer::new().with_latency(Duration::from_millis(50))).await;

    h.controller.install(install_request("ticktock")).await.unwrap();
    let err = h
        .controller
        .upgrade(UpgradeRequest::new("ticktock", ticktock(Version::new(1, 0, 0))))
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::ConcurrentModification { .. }));

    // Other names are unaffected
    h.controller.install(install_request("other")).await.unwrap();

    assert_eq!(
        h.controller.await_idle("ticktock").await.unwrap().status(),
        StatusCode::Deployed
    );
    assert_eq!(
        h.controller.await_idle("other").await.unwrap().status(),
        StatusCode::Deployed
    );
    assert!(!h.controller.cancel("ticktock"));
}

#[tokio::test]
async fn test_cancel_stops_remaining_units() {
    let h = harness_with(InMemoryDeployer::new().with_latency(Duration::from_millis(50))).await;

    h.controller.install(install_request("ticktock")).await.unwrap();
    assert!(h.controller.cancel("ticktock"));

    let release = h.controller.await_idle("ticktock").await.unwrap();
    assert_eq!(release.status(), StatusCode::Failed);
    assert!(release.info.description.starts_with("cancelled"));
    assert!(h.deployer.running().len() < 2);

    // Whatever was started can still be cleaned up
    h.controller.delete("ticktock", false).await.unwrap();
    assert!(h.deployer.running().is_empty());
}

#[tokio::test]
async fn test_failed_install_is_recorded_and_cleaned_up() {
    let h = harness().await;
    h.deployer.fail_deploys_of("time");

    assert_eq!(h.install("ticktock").await, StatusCode::Failed);
    let release = h.controller.status("ticktock", None).await.unwrap();
    assert!(release.info.description.contains("deploy time"));
    let time = release.info.units.iter().find(|u| u.name == "time").unwrap();
    assert_eq!(time.state, UnitState::Failed);

    assert!(matches!(
        h.controller.install(install_request("ticktock")).await,
        Err(ReleaseError::ReleaseAlreadyExists { .. })
    ));
    assert!(
        h.controller
            .upgrade(UpgradeRequest::new("ticktock", ticktock(Version::new(1, 0, 0))))
            .await
            .unwrap_err()
            .is_not_found()
    );

    // The log unit that did start is undeployed by delete
    assert_eq!(h.deployer.running().len(), 1);
    h.controller.delete("ticktock", false).await.unwrap();
    assert!(h.deployer.running().is_empty());
}

#[tokio::test]
async fn test_delete_after_failed_upgrade_leaves_nothing_deployed() {
    let h = harness().await;
    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);

    h.deployer.fail_deploys_of("log");
    h.controller
        .upgrade(
            UpgradeRequest::new("ticktock", ticktock(Version::new(1, 0, 0)))
                .with_values("log:\n  version: 2.0.0\n"),
        )
        .await
        .unwrap();
    let v2 = h.controller.await_idle("ticktock").await.unwrap();
    assert_eq!(v2.status(), StatusCode::Failed);
    assert_eq!(h.deployer.running().len(), 2);

    let deleted = h.controller.delete("ticktock", false).await.unwrap();
    assert_eq!(deleted.version, 2);
    assert!(h.deployer.running().is_empty());

    let v1 = h.controller.status("ticktock", Some(1)).await.unwrap();
    assert_eq!(v1.status(), StatusCode::Deleted);
    assert!(v1.info.units.is_empty());
    assert!(h.store.latest_deployed("ticktock").await.unwrap_err().is_not_found());

    let counts = BTreeMap::from([("log".to_string(), 2)]);
    assert!(h.controller.scale("ticktock", counts).await.unwrap_err().is_not_found());

    // The name is free for a fresh install
    h.deployer.clear_failures();
    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);
    assert_eq!(h.store.latest("ticktock").await.unwrap().version, 3);
}

#[tokio::test]
async fn test_synchronous_errors() {
    let h = harness().await;

    assert!(matches!(
        h.controller.install(install_request("")).await,
        Err(ReleaseError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.controller
            .install(InstallRequest::new("ticktock", PackageRef::catalog("missing", None), "default"))
            .await,
        Err(ReleaseError::PackageNotFound { .. })
    ));
    assert!(matches!(
        h.controller
            .install(InstallRequest::new("ticktock", PackageRef::catalog("ticktock", None), "mars"))
            .await,
        Err(ReleaseError::PlatformNotFound(_))
    ));
    assert!(matches!(
        h.controller
            .install(install_request("ticktock").with_values("[1, 2]"))
            .await,
        Err(ReleaseError::ConfigFormat(_))
    ));
    assert!(h.controller.list(None).await.unwrap().is_empty());

    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);
    assert!(matches!(
        h.controller.rollback("ticktock", 0).await,
        Err(ReleaseError::RollbackTargetNotFound { .. })
    ));
    assert!(
        h.controller
            .rollback("ticktock", 9)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_delete_package_in_use() {
    let h = harness().await;
    assert_eq!(h.install("a").await, StatusCode::Deployed);
    assert_eq!(h.install("b").await, StatusCode::Deployed);

    match h.controller.delete("a", true).await {
        Err(ReleaseError::PackageInUse { package, releases }) => {
            assert_eq!(package, "ticktock:1.0.0");
            assert_eq!(releases, vec!["b"]);
        }
        other => panic!("expected PackageInUse, got {:?}", other.map(|r| r.storage_key())),
    }
    // Nothing was undeployed
    assert_eq!(h.deployer.running().len(), 4);
    assert_eq!(
        h.controller.status("a", None).await.unwrap().status(),
        StatusCode::Deployed
    );

    h.controller.delete("b", false).await.unwrap();
    h.controller.delete("a", true).await.unwrap();
    assert!(h.deployer.running().is_empty());
    assert!(h.catalog.fetch("ticktock", None).await.is_err());
}

#[tokio::test]
async fn test_scale_keeps_version() {
    let h = harness().await;
    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);

    let scaled = h
        .controller
        .scale("ticktock", BTreeMap::from([("log".to_string(), 3)]))
        .await
        .unwrap();
    assert_eq!(scaled.version, 1);
    assert_eq!(h.deployer.instances("ticktock-log-v1"), Some(3));
    assert_eq!(h.store.release_count(), 1);

    assert!(matches!(
        h.controller
            .scale("ticktock", BTreeMap::from([("nope".to_string(), 1)]))
            .await,
        Err(ReleaseError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_reconciler_marks_failed_units() {
    let h = harness().await;
    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);

    let reconciler = h.controller.reconciler();
    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.checked, 1);
    assert!(report.changes.is_empty());

    h.deployer.set_state("log", UnitState::Failed);
    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].to, StatusCode::Failed);

    let release = h.controller.status("ticktock", None).await.unwrap();
    assert_eq!(release.status(), StatusCode::Failed);
    assert_eq!(release.info.description, "Unhealthy units: log is failed");
}

#[tokio::test]
async fn test_redacted_queries() {
    let h = harness().await;
    assert_eq!(h.install("ticktock").await, StatusCode::Deployed);

    let values = h.controller.values("ticktock", None, true).await.unwrap();
    assert_eq!(values["log"]["password"], "******");
    assert_eq!(values["log"]["level"], "info");

    let manifest = h.controller.manifest("ticktock", None, true).await.unwrap();
    assert!(manifest.contains("password: '******'") || manifest.contains("password: ******"));
    assert!(!manifest.contains("changeme"));

    let plain = h.controller.manifest("ticktock", Some(1), false).await.unwrap();
    assert!(plain.contains("changeme"));

    let listed = h.controller.deployed_or_failed(Some("TICK")).await.unwrap();
    assert_eq!(listed.len(), 1);
}

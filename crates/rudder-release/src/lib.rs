//! Rudder Release - Release lifecycle management
//!
//! This crate provides:
//! - **Release Model**: Versioned releases with status, unit health and deployer data
//! - **Storage Drivers**: In-memory and file-based release history with shared queries
//! - **Release Analysis**: Manifest diffing into units to deploy, update and delete
//! - **Deployer SPI**: Platform abstraction with an in-memory implementation
//! - **Coordination**: Applying a transition new-before-old through a deployer
//! - **Lifecycle Controller**: Install, upgrade, rollback, scale, delete and cancel,
//!   serialized per release name
//! - **Status Reconciliation**: Background polling of live unit health

pub mod actions;
pub mod analyzer;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod deployer;
pub mod error;
pub mod locks;
pub mod reconciler;
pub mod release;
pub mod storage;

pub use actions::{InstallRequest, PackageRef, ScaleRequest, UpgradeRequest};
pub use analyzer::{AnalysisReport, DeployableUnit, UnitChange, UnitKind, analyze, parse_units};
pub use config::{EngineConfig, RedactionConfig, StorageSettings};
pub use controller::{ReleaseController, ReleaseControllerBuilder};
pub use coordinator::DeploymentCoordinator;
pub use deployer::{
    DeployRequest, Deployer, DeployerCall, DeployerRegistry, InMemoryDeployer, InstanceStatus,
    UnitState, UnitStatus,
};
pub use error::{ReleaseError, Result, UnitFailure};
pub use locks::{ReleaseGuard, ReleaseLocks};
pub use reconciler::{
    ReconcileReport, ReconcilerHandle, StatusChange, StatusReconciler, aggregate_status,
};
pub use release::{AppDeployerData, Info, Release, StatusCode, UnitHealth};
pub use storage::{
    CompressionMethod, FileReleaseStore, MemoryReleaseStore, OperationCounts, ReleaseStore,
};

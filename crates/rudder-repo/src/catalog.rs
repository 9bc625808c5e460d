//! Package catalog
//!
//! Resolves packages by name and optional version across the configured
//! repositories, accepts uploads into local repositories and removes
//! packages on request.

use async_trait::async_trait;
use rudder_core::{ArchiveFormat, Package, PackageMetadata, Repository, read_package, sha256_hex};
use semver::Version;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::RepositoryConfig;
use crate::error::{RepoError, Result};

/// A package archive offered for storage in a local repository
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target repository
    pub repo_name: String,
    pub name: String,
    pub version: String,
    /// `zip`, `tgz` or `tar.gz`
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Lookup and mutation of packages across repositories
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    /// Configured repositories in registration order
    async fn repositories(&self) -> Result<Vec<Repository>>;

    /// Resolve a package's index entry; the highest version wins when none is given
    async fn metadata(&self, name: &str, version: Option<&Version>) -> Result<PackageMetadata>;

    /// Resolve a package's full content
    async fn fetch(&self, name: &str, version: Option<&Version>) -> Result<Package>;

    /// Case-insensitive search over names, descriptions and tags
    async fn search(&self, query: &str) -> Result<Vec<PackageMetadata>>;

    /// Store and index an uploaded archive
    async fn upload(&self, request: UploadRequest) -> Result<PackageMetadata>;

    /// Fail unless `delete` would succeed
    async fn check_deletable(&self, name: &str, version: &Version) -> Result<()>;

    /// Remove a package version from every local repository holding it
    async fn delete(&self, name: &str, version: &Version) -> Result<Vec<PackageMetadata>>;
}

#[derive(Debug, Clone)]
struct Entry {
    metadata: PackageMetadata,
    package: Package,
    archive: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct CatalogState {
    repositories: Vec<(u64, Repository)>,
    entries: Vec<Entry>,
    next_repository_id: u64,
}

impl CatalogState {
    fn repository(&self, name: &str) -> Result<&(u64, Repository)> {
        self.repositories
            .iter()
            .find(|(_, r)| r.name == name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    fn add_repository(&mut self, repository: Repository) -> Result<u64> {
        if self.repositories.iter().any(|(_, r)| r.name == repository.name) {
            return Err(RepoError::RepositoryAlreadyExists {
                name: repository.name,
            });
        }
        self.next_repository_id += 1;
        let id = self.next_repository_id;
        self.repositories.push((id, repository));
        Ok(id)
    }

    /// Highest version, then highest repository order; the first
    /// registered repository wins a full tie
    fn resolve(&self, name: &str, version: Option<&Version>) -> Result<&Entry> {
        let mut best: Option<&Entry> = None;
        for entry in self.ordered() {
            let meta = &entry.metadata;
            if meta.name != name || version.is_some_and(|v| &meta.version != v) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    (&meta.version, meta.repository_order)
                        > (&current.metadata.version, current.metadata.repository_order)
                }
            };
            if better {
                best = Some(entry);
            }
        }

        best.ok_or_else(|| RepoError::PackageNotFound {
            name: name.to_string(),
            version: version.map(|v| v.to_string()),
        })
    }

    /// Entries by repository registration order
    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.metadata.repository_id);
        entries
    }

    fn local_matches(&self, name: &str, version: &Version) -> Result<Vec<usize>> {
        let matching: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.metadata.name == name && &e.metadata.version == version)
            .map(|(i, _)| i)
            .collect();

        if matching.is_empty() {
            return Err(RepoError::PackageNotFound {
                name: name.to_string(),
                version: Some(version.to_string()),
            });
        }

        let local: Vec<usize> = matching
            .iter()
            .copied()
            .filter(|&i| self.is_local(self.entries[i].metadata.repository_id))
            .collect();

        if local.is_empty() {
            return Err(RepoError::RemoteRepository {
                name: self.entries[matching[0]].metadata.repository_name.clone(),
            });
        }
        Ok(local)
    }

    fn is_local(&self, repository_id: u64) -> bool {
        self.repositories
            .iter()
            .any(|(id, r)| *id == repository_id && r.local)
    }
}

/// In-process catalog, optionally persisting uploaded archives to disk
///
/// Archives are written to `<dir>/<repo>/<name>/<name>-<version>.<ext>`.
#[derive(Debug, Default)]
pub struct LocalCatalog {
    state: RwLock<CatalogState>,
    archive_dir: Option<PathBuf>,
}

impl LocalCatalog {
    /// Create a catalog over `repositories`, in registration order
    pub fn new(repositories: impl IntoIterator<Item = Repository>) -> Result<Self> {
        let mut state = CatalogState::default();
        for repository in repositories {
            state.add_repository(repository)?;
        }
        Ok(Self {
            state: RwLock::new(state),
            archive_dir: None,
        })
    }

    /// Create a catalog from a repository configuration file
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        Self::new(config.repositories.iter().cloned())
    }

    /// Persist uploaded archives under `dir`
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Register another repository
    pub async fn add_repository(&self, repository: Repository) -> Result<()> {
        let name = repository.name.clone();
        self.state.write().await.add_repository(repository)?;
        info!(repository = %name, "Registered repository");
        Ok(())
    }

    /// Index an already materialized package in any repository
    ///
    /// Used to mirror packages of remote repositories, which cannot receive
    /// uploads.
    pub async fn add_package(&self, repo_name: &str, package: Package) -> Result<PackageMetadata> {
        package.validate()?;
        let mut state = self.state.write().await;
        let (id, repository) = state.repository(repo_name)?.clone();
        ensure_unique(&state, id, &repository, package.name(), package.version())?;

        let metadata = PackageMetadata::from_info(&package.metadata, id, &repository);
        state.entries.push(Entry {
            metadata: metadata.clone(),
            package,
            archive: None,
        });
        debug!(package = %metadata.coordinates(), repository = %repo_name, "Indexed package");
        Ok(metadata)
    }

    fn archive_path(&self, repository: &str, name: &str, version: &Version, format: ArchiveFormat) -> Option<PathBuf> {
        self.archive_dir.as_ref().map(|dir| {
            dir.join(repository)
                .join(name)
                .join(format!("{}-{}.{}", name, version, format.extension()))
        })
    }
}

fn ensure_unique(
    state: &CatalogState,
    repository_id: u64,
    repository: &Repository,
    name: &str,
    version: &Version,
) -> Result<()> {
    let exists = state.entries.iter().any(|e| {
        e.metadata.repository_id == repository_id
            && e.metadata.name == name
            && &e.metadata.version == version
    });
    if exists {
        return Err(RepoError::PackageAlreadyExists {
            name: name.to_string(),
            version: version.to_string(),
            repo: repository.name.clone(),
        });
    }
    Ok(())
}

async fn write_archive(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Check the request fields before touching the bytes
fn validate_request(request: &UploadRequest) -> Result<(Version, ArchiveFormat)> {
    if request.name.trim().is_empty() {
        return Err(RepoError::invalid_upload("package name must not be empty"));
    }
    if request.version.trim().is_empty() {
        return Err(RepoError::invalid_upload("package version must not be empty"));
    }
    let version = Version::parse(request.version.trim()).map_err(|e| {
        RepoError::invalid_upload(format!(
            "version '{}' is not a semantic version: {}",
            request.version, e
        ))
    })?;
    let format = ArchiveFormat::from_extension(&request.extension)
        .map_err(|e| RepoError::invalid_upload(e.to_string()))?;
    if request.bytes.is_empty() {
        return Err(RepoError::invalid_upload("package archive is empty"));
    }
    Ok((version, format))
}

#[async_trait]
impl PackageCatalog for LocalCatalog {
    async fn repositories(&self) -> Result<Vec<Repository>> {
        let state = self.state.read().await;
        Ok(state.repositories.iter().map(|(_, r)| r.clone()).collect())
    }

    async fn metadata(&self, name: &str, version: Option<&Version>) -> Result<PackageMetadata> {
        let state = self.state.read().await;
        Ok(state.resolve(name, version)?.metadata.clone())
    }

    async fn fetch(&self, name: &str, version: Option<&Version>) -> Result<Package> {
        let state = self.state.read().await;
        let entry = state.resolve(name, version)?;
        debug!(
            package = %entry.metadata.coordinates(),
            repository = %entry.metadata.repository_name,
            "Resolved package"
        );
        Ok(entry.package.clone())
    }

    async fn search(&self, query: &str) -> Result<Vec<PackageMetadata>> {
        let query = query.trim().to_lowercase();
        let state = self.state.read().await;

        let mut results: Vec<PackageMetadata> = state
            .entries
            .iter()
            .map(|e| &e.metadata)
            .filter(|meta| {
                query.is_empty()
                    || meta.name.to_lowercase().contains(&query)
                    || meta
                        .description
                        .as_ref()
                        .is_some_and(|d| d.to_lowercase().contains(&query))
                    || meta.tags.iter().any(|t| t.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| b.version.cmp(&a.version))
                .then_with(|| a.repository_id.cmp(&b.repository_id))
        });
        Ok(results)
    }

    async fn upload(&self, request: UploadRequest) -> Result<PackageMetadata> {
        {
            let state = self.state.read().await;
            let (_, repository) = state.repository(&request.repo_name)?;
            if !repository.local {
                return Err(RepoError::RemoteRepository {
                    name: repository.name.clone(),
                });
            }
        }

        let (version, format) = validate_request(&request)?;
        let name = request.name.trim();

        let mut package = read_package(&request.bytes, format)
            .map_err(|e| RepoError::invalid_upload(format!("cannot read package archive: {}", e)))?;
        if package.name() != name || package.version() != &version {
            return Err(RepoError::invalid_upload(format!(
                "archive contains {}:{} but the upload names {}:{}",
                package.name(),
                package.version(),
                name,
                version
            )));
        }
        package.validate()?;
        package.metadata.sha256 = Some(sha256_hex(&request.bytes));

        let mut state = self.state.write().await;
        let (id, repository) = state.repository(&request.repo_name)?.clone();
        ensure_unique(&state, id, &repository, name, &version)?;

        let archive = self.archive_path(&repository.name, name, &version, format);
        if let Some(path) = &archive {
            write_archive(path, &request.bytes).await?;
        }

        let metadata = PackageMetadata::from_info(&package.metadata, id, &repository);
        state.entries.push(Entry {
            metadata: metadata.clone(),
            package,
            archive,
        });

        info!(
            package = %metadata.coordinates(),
            repository = %repository.name,
            sha256 = metadata.sha256.as_deref().unwrap_or_default(),
            "Uploaded package"
        );
        Ok(metadata)
    }

    async fn check_deletable(&self, name: &str, version: &Version) -> Result<()> {
        let state = self.state.read().await;
        state.local_matches(name, version).map(|_| ())
    }

    async fn delete(&self, name: &str, version: &Version) -> Result<Vec<PackageMetadata>> {
        let mut state = self.state.write().await;
        let mut indices = state.local_matches(name, version)?;
        indices.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = Vec::with_capacity(indices.len());
        for index in indices {
            // An entry leaves the index only once its archive is gone
            if let Some(path) = &state.entries[index].archive {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            let entry = state.entries.remove(index);
            info!(
                package = %entry.metadata.coordinates(),
                repository = %entry.metadata.repository_name,
                "Deleted package"
            );
            removed.push(entry.metadata);
        }
        removed.reverse();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{PackageInfo, Template, write_package};
    use tempfile::TempDir;

    fn package(name: &str, version: &str) -> Package {
        let mut info = PackageInfo::new(name, Version::parse(version).unwrap());
        info.description = Some(format!("{} application", name));
        info.tags = vec!["stream".to_string()];
        Package::new(info)
            .with_values("spec:\n  count: 1\n")
            .with_template(Template::new("app.yml", "kind: Application\n"))
    }

    fn upload_of(repo: &str, pkg: &Package, format: ArchiveFormat) -> UploadRequest {
        UploadRequest {
            repo_name: repo.to_string(),
            name: pkg.name().to_string(),
            version: pkg.version().to_string(),
            extension: format.extension().to_string(),
            bytes: write_package(pkg, format).unwrap(),
        }
    }

    fn catalog() -> LocalCatalog {
        LocalCatalog::new([
            Repository::local("local"),
            Repository::new("remote", "https://packages.example.com").with_order(10),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_fetch() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog().with_archive_dir(dir.path());
        let pkg = package("log", "1.0.0");

        let request = upload_of("local", &pkg, ArchiveFormat::TarGz);
        let expected_sha = sha256_hex(&request.bytes);
        let meta = catalog.upload(request).await.unwrap();

        assert_eq!(meta.coordinates(), "log:1.0.0");
        assert_eq!(meta.repository_name, "local");
        assert_eq!(meta.sha256.as_deref(), Some(expected_sha.as_str()));
        assert!(dir.path().join("local/log/log-1.0.0.tgz").exists());

        let fetched = catalog.fetch("log", None).await.unwrap();
        assert_eq!(fetched.templates, pkg.templates);
        assert_eq!(fetched.metadata.sha256, Some(expected_sha));
    }

    #[tokio::test]
    async fn test_highest_version_wins() {
        let catalog = catalog();
        for version in ["1.0.0", "1.10.0", "1.2.0"] {
            let pkg = package("time", version);
            catalog.upload(upload_of("local", &pkg, ArchiveFormat::Zip)).await.unwrap();
        }

        let latest = catalog.metadata("time", None).await.unwrap();
        assert_eq!(latest.version, Version::new(1, 10, 0));

        let pinned = catalog.metadata("time", Some(&Version::new(1, 2, 0))).await.unwrap();
        assert_eq!(pinned.version, Version::new(1, 2, 0));
    }

    #[tokio::test]
    async fn test_repository_order_breaks_version_tie() {
        let catalog = catalog();
        catalog.add_package("local", package("log", "1.0.0")).await.unwrap();
        catalog.add_package("remote", package("log", "1.0.0")).await.unwrap();

        let meta = catalog.metadata("log", None).await.unwrap();
        assert_eq!(meta.repository_name, "remote");
    }

    #[tokio::test]
    async fn test_equal_order_prefers_first_registered() {
        let catalog = LocalCatalog::new([Repository::local("first"), Repository::local("second")]).unwrap();
        catalog.add_package("second", package("log", "1.0.0")).await.unwrap();
        catalog.add_package("first", package("log", "1.0.0")).await.unwrap();

        let meta = catalog.metadata("log", Some(&Version::new(1, 0, 0))).await.unwrap();
        assert_eq!(meta.repository_name, "first");
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let catalog = catalog();
        let pkg = package("log", "1.0.0");

        let err = catalog
            .upload(upload_of("remote", &pkg, ArchiveFormat::Zip))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RemoteRepository { .. }));

        let err = catalog
            .upload(upload_of("missing", &pkg, ArchiveFormat::Zip))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RepositoryNotFound { .. }));

        let mut bad_version = upload_of("local", &pkg, ArchiveFormat::Zip);
        bad_version.version = "one".to_string();
        assert!(matches!(
            catalog.upload(bad_version).await,
            Err(RepoError::InvalidUpload { .. })
        ));

        let mut bad_extension = upload_of("local", &pkg, ArchiveFormat::Zip);
        bad_extension.extension = "rar".to_string();
        assert!(matches!(
            catalog.upload(bad_extension).await,
            Err(RepoError::InvalidUpload { .. })
        ));

        let mut empty = upload_of("local", &pkg, ArchiveFormat::Zip);
        empty.bytes.clear();
        assert!(matches!(
            catalog.upload(empty).await,
            Err(RepoError::InvalidUpload { .. })
        ));

        let mut mismatched = upload_of("local", &pkg, ArchiveFormat::Zip);
        mismatched.version = "2.0.0".to_string();
        assert!(matches!(
            catalog.upload(mismatched).await,
            Err(RepoError::InvalidUpload { .. })
        ));

        catalog.upload(upload_of("local", &pkg, ArchiveFormat::Zip)).await.unwrap();
        let err = catalog
            .upload(upload_of("local", &pkg, ArchiveFormat::TarGz))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::PackageAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_search() {
        let catalog = catalog();
        catalog.add_package("local", package("log", "1.0.0")).await.unwrap();
        catalog.add_package("local", package("log", "2.0.0")).await.unwrap();
        catalog.add_package("remote", package("time", "1.0.0")).await.unwrap();

        let results = catalog.search("LOG").await.unwrap();
        let found: Vec<String> = results.iter().map(|m| m.coordinates()).collect();
        assert_eq!(found, vec!["log:2.0.0", "log:1.0.0"]);

        assert_eq!(catalog.search("stream").await.unwrap().len(), 3);
        assert!(catalog.search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog().with_archive_dir(dir.path());
        let pkg = package("log", "1.0.0");
        catalog.upload(upload_of("local", &pkg, ArchiveFormat::Zip)).await.unwrap();
        catalog.add_package("remote", package("time", "1.0.0")).await.unwrap();

        let version = Version::new(1, 0, 0);
        catalog.check_deletable("log", &version).await.unwrap();
        assert!(matches!(
            catalog.check_deletable("time", &version).await,
            Err(RepoError::RemoteRepository { .. })
        ));

        let removed = catalog.delete("log", &version).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!dir.path().join("local/log/log-1.0.0.zip").exists());
        assert!(matches!(
            catalog.fetch("log", None).await,
            Err(RepoError::PackageNotFound { .. })
        ));
        assert!(matches!(
            catalog.delete("log", &version).await,
            Err(RepoError::PackageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_archive_removal_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog().with_archive_dir(dir.path());
        let pkg = package("log", "1.0.0");
        catalog.upload(upload_of("local", &pkg, ArchiveFormat::Zip)).await.unwrap();

        // A directory in place of the archive cannot be removed as a file
        let archive = dir.path().join("local/log/log-1.0.0.zip");
        std::fs::remove_file(&archive).unwrap();
        std::fs::create_dir(&archive).unwrap();
        std::fs::write(archive.join("keep"), b"x").unwrap();

        let version = Version::new(1, 0, 0);
        assert!(matches!(
            catalog.delete("log", &version).await,
            Err(RepoError::Io(_))
        ));
        assert_eq!(catalog.fetch("log", None).await.unwrap().templates, pkg.templates);
        catalog.check_deletable("log", &version).await.unwrap();
    }
}

//! Package archives
//!
//! Layout (zip or tar.gz):
//!
//! ```text
//! <name>-<version>/
//!   package.yml
//!   values.yml            (optional)
//!   templates/*.yml
//!   packages/<dep>/...    (same layout, recursive)
//! ```

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use tar::{Archive, Builder, Header};

use crate::error::{CoreError, Result};
use crate::package::{ConfigValues, Package, PackageInfo, Template};

const DESCRIPTOR_NAMES: [&str; 2] = ["package.yml", "package.yaml"];
const VALUES_NAMES: [&str; 2] = ["values.yml", "values.yaml"];

/// Supported archive encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Pick the format from a file extension (`zip`, `tgz`, `tar.gz`)
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tgz" | "tar.gz" => Ok(Self::TarGz),
            other => Err(CoreError::Archive {
                message: format!("unsupported package extension '{}', expected zip or tgz", other),
            }),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tgz",
        }
    }
}

/// Hex encoded SHA-256 of archive bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Load a package tree from archive bytes
pub fn read_package(bytes: &[u8], format: ArchiveFormat) -> Result<Package> {
    let files = match format {
        ArchiveFormat::Zip => read_zip(bytes)?,
        ArchiveFormat::TarGz => read_tar_gz(bytes)?,
    };

    let root = files
        .keys()
        .filter_map(|path| descriptor_prefix(path))
        .min_by_key(|prefix| (prefix.matches('/').count(), prefix.len()))
        .ok_or_else(|| CoreError::Archive {
            message: "archive does not contain a package.yml".to_string(),
        })?
        .to_string();

    load_package(&files, &root)
}

/// Encode a package tree as an archive
pub fn write_package(package: &Package, format: ArchiveFormat) -> Result<Vec<u8>> {
    let mut files = BTreeMap::new();
    collect_files(package, &package_dir(package), &mut files)?;

    match format {
        ArchiveFormat::Zip => write_zip(&files),
        ArchiveFormat::TarGz => write_tar_gz(&files),
    }
}

fn package_dir(package: &Package) -> String {
    format!("{}-{}/", package.name(), package.version())
}

/// Directory prefix of a descriptor path, if `path` is one
fn descriptor_prefix(path: &str) -> Option<&str> {
    DESCRIPTOR_NAMES
        .iter()
        .find_map(|name| path.strip_suffix(name))
        .filter(|prefix| prefix.is_empty() || prefix.ends_with('/'))
}

fn load_package(files: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Result<Package> {
    let descriptor = DESCRIPTOR_NAMES
        .iter()
        .find_map(|name| files.get(&format!("{}{}", prefix, name)))
        .ok_or_else(|| CoreError::Archive {
            message: format!("missing package.yml under '{}'", prefix),
        })?;
    let metadata = PackageInfo::from_yaml(&utf8(descriptor, "package.yml")?)?;

    let config_values = match VALUES_NAMES
        .iter()
        .find_map(|name| files.get(&format!("{}{}", prefix, name)))
    {
        Some(data) => ConfigValues::new(utf8(data, "values.yml")?),
        None => ConfigValues::default(),
    };

    let templates_dir = format!("{}templates/", prefix);
    let mut templates = Vec::new();
    for (path, data) in files.range(templates_dir.clone()..) {
        let Some(name) = path.strip_prefix(&templates_dir) else {
            break;
        };
        if name.ends_with(".yml") || name.ends_with(".yaml") {
            templates.push(Template::new(name, utf8(data, path)?));
        }
    }

    let packages_dir = format!("{}packages/", prefix);
    let mut dependency_dirs: Vec<String> = files
        .keys()
        .filter_map(|path| path.strip_prefix(&packages_dir))
        .filter_map(descriptor_prefix)
        .filter(|rest| rest.matches('/').count() == 1)
        .map(|rest| format!("{}{}", packages_dir, rest))
        .collect();
    dependency_dirs.dedup();

    let dependencies = dependency_dirs
        .iter()
        .map(|dir| load_package(files, dir))
        .collect::<Result<Vec<_>>>()?;

    Ok(Package {
        metadata,
        templates,
        config_values,
        dependencies,
    })
}

fn collect_files(package: &Package, prefix: &str, files: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    files.insert(
        format!("{}package.yml", prefix),
        serde_yaml::to_string(&package.metadata)?.into_bytes(),
    );
    if let Some(raw) = &package.config_values.raw {
        files.insert(format!("{}values.yml", prefix), raw.clone().into_bytes());
    }
    for template in &package.templates {
        files.insert(
            format!("{}templates/{}", prefix, template.name),
            template.data.clone().into_bytes(),
        );
    }
    for dependency in &package.dependencies {
        let dir = format!("{}packages/{}", prefix, package_dir(dependency));
        collect_files(dependency, &dir, files)?;
    }
    Ok(())
}

fn utf8(data: &[u8], what: &str) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|e| CoreError::Archive {
        message: format!("invalid UTF-8 in {}: {}", what, e),
    })
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches("./").to_string()
}

fn read_zip(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files = BTreeMap::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let path = normalize_path(file.name());
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        files.insert(path, data);
    }

    Ok(files)
}

fn read_tar_gz(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut files = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = normalize_path(&entry.path()?.to_string_lossy());
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.insert(path, data);
    }

    Ok(files)
}

fn write_zip(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();

    for (path, data) in files {
        writer.start_file(path.as_str(), options)?;
        writer.write_all(data)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn write_tar_gz(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for (path, data) in files {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_slice())?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn ticktock() -> Package {
        let dep = |name: &str| {
            Package::new(PackageInfo::new(name, Version::new(1, 0, 0)))
                .with_values(format!("spec:\n  resource: maven://{}\n", name))
                .with_template(Template::new(format!("{}.yml", name), "kind: Application\n"))
        };
        Package::new(PackageInfo::new("ticktock", Version::new(1, 0, 0)))
            .with_dependency(dep("log"))
            .with_dependency(dep("time"))
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ArchiveFormat::from_extension("zip").unwrap(), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::from_extension(".tgz").unwrap(), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::from_extension("TAR.GZ").unwrap(), ArchiveFormat::TarGz);
        assert!(ArchiveFormat::from_extension("rar").is_err());
    }

    #[test]
    fn test_tar_gz_preserves_tree() {
        let package = ticktock();
        let bytes = write_package(&package, ArchiveFormat::TarGz).unwrap();
        let loaded = read_package(&bytes, ArchiveFormat::TarGz).unwrap();
        assert_eq!(loaded, package);
    }

    #[test]
    fn test_zip_preserves_tree() {
        let package = ticktock();
        let bytes = write_package(&package, ArchiveFormat::Zip).unwrap();
        let loaded = read_package(&bytes, ArchiveFormat::Zip).unwrap();
        assert_eq!(loaded.dependencies.len(), 2);
        assert_eq!(loaded.dependencies[0].name(), "log");
        assert_eq!(loaded.dependencies[1].templates[0].name, "time.yml");
    }

    #[test]
    fn test_missing_descriptor() {
        let mut files = BTreeMap::new();
        files.insert("readme.txt".to_string(), b"hello".to_vec());
        let bytes = write_zip(&files).unwrap();
        let err = read_package(&bytes, ArchiveFormat::Zip).unwrap_err();
        assert!(matches!(err, CoreError::Archive { .. }));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(read_package(b"definitely not an archive", ArchiveFormat::Zip).is_err());
        assert!(read_package(b"definitely not an archive", ArchiveFormat::TarGz).is_err());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

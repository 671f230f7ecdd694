//! Site naming conventions and on-disk layout.
//!
//! A site exists when `<site>.integrit.conf` exists in the config directory.
//! Its baseline lives in the database directory as `<site>.integrit.known.cdb`.
//! Site state is derived from artifact presence each time it is needed and is
//! never cached across invocations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

pub const CONFIG_SUFFIX: &str = ".integrit.conf";
pub const KNOWN_DB_SUFFIX: &str = ".integrit.known.cdb";
pub const CURRENT_DB_SUFFIX: &str = ".integrit.current.cdb";

const HOST_LINE_PREFIX: &str = "# Host:";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid site name: {0:?}")]
    InvalidSiteName(String),
    #[error("No config file for site {site} (expected {})", path.display())]
    MissingConfig { site: String, path: PathBuf },
    #[error("Malformed config {}: no '# Host: <user>@<host>' line", path.display())]
    MissingHost { path: PathBuf },
    #[error("Malformed config {}: conflicting host lines ({first} and {second})", path.display())]
    AmbiguousHost {
        path: PathBuf,
        first: String,
        second: String,
    },
    #[error("Malformed config {}: invalid host descriptor {descriptor:?}", path.display())]
    InvalidHost { path: PathBuf, descriptor: String },
}

fn io_error(e: std::io::Error, path: &Path) -> RegistryError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        RegistryError::PermissionDenied(path.to_path_buf())
    } else {
        RegistryError::Io(e)
    }
}

/// A `user@host` address used as the target of every remote operation for a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor(String);

impl HostDescriptor {
    /// Parses a `user@host` string.
    ///
    /// Rejects empty parts, whitespace, and a leading `-` (which ssh would
    /// read as an option).
    pub fn parse(descriptor: &str) -> Option<Self> {
        let (user, host) = descriptor.split_once('@')?;
        let valid = !user.is_empty()
            && !host.is_empty()
            && !host.contains('@')
            && !descriptor.starts_with('-')
            && !descriptor.chars().any(char::is_whitespace);
        valid.then(|| HostDescriptor(descriptor.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts the host descriptor from config file content.
///
/// Every line starting with `# Host:` is considered. Repeats of the same
/// descriptor are tolerated; differing descriptors are rejected.
pub fn resolve_host(config_content: &str, path: &Path) -> Result<HostDescriptor, RegistryError> {
    let mut found: Option<&str> = None;

    for line in config_content.lines() {
        let Some(rest) = line.trim_start().strip_prefix(HOST_LINE_PREFIX) else {
            continue;
        };
        let descriptor = rest.trim();

        match found {
            Some(first) if first != descriptor => {
                return Err(RegistryError::AmbiguousHost {
                    path: path.to_path_buf(),
                    first: first.to_string(),
                    second: descriptor.to_string(),
                });
            }
            _ => found = Some(descriptor),
        }
    }

    let descriptor = found.ok_or_else(|| RegistryError::MissingHost {
        path: path.to_path_buf(),
    })?;

    HostDescriptor::parse(descriptor).ok_or_else(|| RegistryError::InvalidHost {
        path: path.to_path_buf(),
        descriptor: descriptor.to_string(),
    })
}

/// Whether a site has an established baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    Uninitialized,
    Baselined,
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteState::Uninitialized => f.write_str("no baseline"),
            SiteState::Baselined => f.write_str("baselined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteListing {
    pub name: String,
    /// Modification time of the site's config file.
    pub modified: SystemTime,
    pub state: SiteState,
}

/// Resolves site names to their config and database artifacts.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    config_dir: PathBuf,
    database_dir: PathBuf,
}

impl SiteRegistry {
    pub fn new(config_dir: impl Into<PathBuf>, database_dir: impl Into<PathBuf>) -> Self {
        SiteRegistry {
            config_dir: config_dir.into(),
            database_dir: database_dir.into(),
        }
    }

    /// Rejects names that would escape the naming convention or confuse the
    /// remote shell.
    pub fn validate_site_name(site: &str) -> Result<(), RegistryError> {
        let valid = !site.is_empty()
            && !site.starts_with(['-', '.'])
            && site
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if valid {
            Ok(())
        } else {
            Err(RegistryError::InvalidSiteName(site.to_string()))
        }
    }

    /// File name of the site's config, locally and on the remote host.
    pub fn config_name(site: &str) -> String {
        format!("{site}{CONFIG_SUFFIX}")
    }

    /// File name of the baseline, locally and when staged on the remote host.
    pub fn known_db_name(site: &str) -> String {
        format!("{site}{KNOWN_DB_SUFFIX}")
    }

    /// File name of the database the remote run writes.
    pub fn current_db_name(site: &str) -> String {
        format!("{site}{CURRENT_DB_SUFFIX}")
    }

    /// Expected config location. Existence is not checked.
    pub fn config_path(&self, site: &str) -> PathBuf {
        self.config_dir.join(Self::config_name(site))
    }

    pub fn known_db_path(&self, site: &str) -> PathBuf {
        self.database_dir.join(Self::known_db_name(site))
    }

    /// Reads the site's config file.
    pub fn read_config(&self, site: &str) -> Result<String, RegistryError> {
        Self::validate_site_name(site)?;

        let path = self.config_path(site);
        std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RegistryError::MissingConfig {
                    site: site.to_string(),
                    path: path.clone(),
                }
            } else {
                io_error(e, &path)
            }
        })
    }

    /// Reads the site's config and extracts its host descriptor.
    pub fn host_for(&self, site: &str) -> Result<HostDescriptor, RegistryError> {
        let content = self.read_config(site)?;
        resolve_host(&content, &self.config_path(site))
    }

    pub fn state(&self, site: &str) -> SiteState {
        if self.known_db_path(site).is_file() {
            SiteState::Baselined
        } else {
            SiteState::Uninitialized
        }
    }

    /// Enumerates every site with a config file, sorted by name.
    ///
    /// Reads the directory afresh on every call.
    pub fn list_sites(&self) -> Result<Vec<SiteListing>, RegistryError> {
        let read_dir =
            std::fs::read_dir(&self.config_dir).map_err(|e| io_error(e, &self.config_dir))?;

        let mut sites = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(RegistryError::Io)?;
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(CONFIG_SUFFIX))
            else {
                continue;
            };
            if Self::validate_site_name(name).is_err() {
                continue;
            }

            // Follows symlinks, so linked configs are listed too.
            let path = entry.path();
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            sites.push(SiteListing {
                name: name.to_string(),
                modified: metadata.modified().map_err(RegistryError::Io)?,
                state: self.state(name),
            });
        }

        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }
}

//! Optional `integrit-remote.toml` in the base directory.
//!
//! Every key has a default, so a missing file is the same as an empty one.
//! Relative paths are resolved against the base directory.

use crate::notify::MailOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILENAME: &str = "integrit-remote.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub database_dir: PathBuf,
    /// The integrit binary uploaded to every host before it is run.
    pub binary: PathBuf,
    pub ssh: SshSettings,
    pub mail: MailSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshSettings {
    pub ssh_program: String,
    pub scp_program: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailSettings {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub template: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_dir: PathBuf::from("config-files"),
            database_dir: PathBuf::from("databases"),
            binary: PathBuf::from("bin/integrit"),
            ssh: SshSettings::default(),
            mail: MailSettings::default(),
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        SshSettings {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads settings from `base_dir`, with paths made absolute against it.
    pub fn load(base_dir: &Path) -> Result<Self, SettingsError> {
        let path = base_dir.join(SETTINGS_FILENAME);

        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(source) => return Err(SettingsError::Io { path, source }),
        };

        Ok(settings.rooted_at(base_dir))
    }

    fn rooted_at(mut self, base_dir: &Path) -> Self {
        self.config_dir = base_dir.join(&self.config_dir);
        self.database_dir = base_dir.join(&self.database_dir);
        self.binary = base_dir.join(&self.binary);
        self.mail.template = self.mail.template.map(|t| base_dir.join(t));
        self
    }

    /// Mail options from this file, with any command line values taking precedence.
    pub fn mail_options(&self, overrides: MailOptions) -> MailOptions {
        MailOptions {
            server: overrides.server.or_else(|| self.mail.server.clone()),
            port: overrides.port.or(self.mail.port),
            from: overrides.from.or_else(|| self.mail.from.clone()),
            to: overrides.to.or_else(|| self.mail.to.clone()),
            template: overrides.template.or_else(|| self.mail.template.clone()),
        }
    }
}

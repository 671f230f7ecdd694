//! Per-site init, update and check.
//!
//! Every operation uploads a fresh copy of the integrit binary and the site
//! config before running anything remotely, so a tampered copy left on the
//! host is never reused. A failure at any step aborts that one operation and
//! leaves the local baseline exactly as it was.
//!
//! A check that detects changes sends one alert and then immediately
//! re-baselines the site, so the same change is never alerted twice.

use crate::baseline::{self, BaselineError, StagedBaseline};
use crate::notify::{MailOptions, Notifier, NotifyError};
use crate::registry::{HostDescriptor, RegistryError, SiteRegistry, SiteState};
use crate::remote::{Endpoint, RemoteError, RemoteExecutor};
use crate::report::{ReportClass, changed_lines, classify_report};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Name of the integrit binary in the remote working directory.
pub const REMOTE_BINARY: &str = "integrit";

#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("Config error: {0}")]
    Config(#[from] RegistryError),
    #[error("Transfer error: {0}")]
    Transfer(RemoteError),
    #[error("Remote execution error: {0}")]
    RemoteExec(RemoteError),
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
    #[error("Baseline error: {0}")]
    Baseline(#[from] BaselineError),
    #[error("integrit binary not found at {}", .0.display())]
    MissingBinary(PathBuf),
    #[error("Site {0} has no baseline (use --init first)")]
    NotInitialized(String),
    #[error("Site {0} already has a baseline (use --update instead)")]
    AlreadyInitialized(String),
    #[error(
        "{changes} change(s) detected on {site} but the alert was not sent; baseline kept so the next check alerts again: {source}"
    )]
    AlertFailed {
        site: String,
        changes: usize,
        report: String,
        source: NotifyError,
    },
    #[error("Alert sent for {site} but re-baselining failed (the next check will alert again): {source}")]
    Rebaseline {
        site: String,
        report: String,
        source: Box<SiteError>,
    },
}

impl SiteError {
    /// The integrit report of a check that detected changes but did not
    /// complete.
    pub fn change_report(&self) -> Option<&str> {
        match self {
            SiteError::AlertFailed { report, .. } | SiteError::Rebaseline { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub site: String,
    pub host: HostDescriptor,
    /// Fingerprint of the baseline before the update, if there was one.
    pub previous: Option<String>,
    pub fingerprint: String,
}

impl UpdateSummary {
    pub fn baseline_changed(&self) -> bool {
        self.previous.as_deref() != Some(self.fingerprint.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Clean {
        host: HostDescriptor,
        report: String,
    },
    /// Changes were alerted and absorbed into a new baseline.
    Changed {
        host: HostDescriptor,
        report: String,
        changes: usize,
        rebaseline: UpdateSummary,
    },
}

impl CheckOutcome {
    pub fn report(&self) -> &str {
        match self {
            CheckOutcome::Clean { report, .. } | CheckOutcome::Changed { report, .. } => report,
        }
    }
}

/// Drives the lifecycle of individual sites.
pub struct SiteController<E, N> {
    registry: SiteRegistry,
    /// Local integrit binary uploaded before every remote run.
    binary: PathBuf,
    executor: E,
    notifier: N,
}

impl<E: RemoteExecutor, N: Notifier> SiteController<E, N> {
    pub fn new(registry: SiteRegistry, binary: PathBuf, executor: E, notifier: N) -> Self {
        SiteController {
            registry,
            binary,
            executor,
            notifier,
        }
    }

    /// Creates the first baseline for a site.
    ///
    /// The site's config must exist and name a host, and the site must not
    /// have a baseline yet.
    pub fn init(&self, site: &str) -> Result<UpdateSummary, SiteError> {
        self.registry.host_for(site)?;

        if self.registry.state(site) == SiteState::Baselined {
            return Err(SiteError::AlreadyInitialized(site.to_string()));
        }

        self.update(site)
    }

    /// Replaces the site's baseline with a database of its current remote state.
    pub fn update(&self, site: &str) -> Result<UpdateSummary, SiteError> {
        let host = self.registry.host_for(site)?;
        let known_db = self.registry.known_db_path(site);

        let previous = match self.registry.state(site) {
            SiteState::Baselined => Some(baseline::fingerprint(&known_db)?),
            SiteState::Uninitialized => None,
        };

        info!("Updating baseline for {} on {}", site, host);

        self.upload_binary_and_config(site, &host)?;

        let config_name = SiteRegistry::config_name(site);
        self.executor
            .exec(&host, &format!("./{REMOTE_BINARY} -u -C {config_name}"))
            .map_err(SiteError::RemoteExec)?;

        let staged = StagedBaseline::new_for(&known_db)?;
        self.executor
            .transfer(
                &Endpoint::remote(&host, SiteRegistry::current_db_name(site)),
                &Endpoint::local(staged.path()),
            )
            .map_err(SiteError::Transfer)?;

        let fingerprint = staged.install(&known_db)?;
        info!("Installed baseline {} ({})", known_db.display(), fingerprint);

        Ok(UpdateSummary {
            site: site.to_string(),
            host,
            previous,
            fingerprint,
        })
    }

    /// Compares the site's remote state with its baseline.
    ///
    /// Mail settings are validated before anything else happens. When changes
    /// are found an alert is sent and, only once it has been accepted by the
    /// relay, the site is re-baselined.
    pub fn check(&self, site: &str, mail: &MailOptions) -> Result<CheckOutcome, SiteError> {
        let mail = mail.validate()?;
        let host = self.registry.host_for(site)?;

        if self.registry.state(site) == SiteState::Uninitialized {
            return Err(SiteError::NotInitialized(site.to_string()));
        }

        let known_db = self.registry.known_db_path(site);
        let known_fingerprint = baseline::fingerprint(&known_db)?;
        debug!(
            "Checking {} on {} against baseline {}",
            site, host, known_fingerprint
        );

        self.upload_binary_and_config(site, &host)?;
        self.executor
            .transfer(
                &Endpoint::local(&known_db),
                &Endpoint::remote(&host, SiteRegistry::known_db_name(site)),
            )
            .map_err(SiteError::Transfer)?;

        let config_name = SiteRegistry::config_name(site);
        let report = self
            .executor
            .exec(&host, &format!("./{REMOTE_BINARY} -c -C {config_name}"))
            .map_err(SiteError::RemoteExec)?;

        if classify_report(&report) == ReportClass::Clean {
            info!("No changes on {} ({})", site, host);
            return Ok(CheckOutcome::Clean { host, report });
        }

        let changes = changed_lines(&report).count();
        warn!("{} change(s) detected on {} ({})", changes, site, host);

        let message = mail.template.render(site, &host, &report);
        self.notifier
            .send(&mail, &message)
            .map_err(|source| SiteError::AlertFailed {
                site: site.to_string(),
                changes,
                report: report.clone(),
                source,
            })?;

        let rebaseline = self.update(site).map_err(|e| SiteError::Rebaseline {
            site: site.to_string(),
            report: report.clone(),
            source: Box::new(e),
        })?;

        Ok(CheckOutcome::Changed {
            host,
            report,
            changes,
            rebaseline,
        })
    }

    fn upload_binary_and_config(&self, site: &str, host: &HostDescriptor) -> Result<(), SiteError> {
        if !self.binary.is_file() {
            return Err(SiteError::MissingBinary(self.binary.clone()));
        }

        self.executor
            .transfer(
                &Endpoint::local(&self.binary),
                &Endpoint::remote(host, REMOTE_BINARY),
            )
            .map_err(SiteError::Transfer)?;

        self.executor
            .transfer(
                &Endpoint::local(self.registry.config_path(site)),
                &Endpoint::remote(host, SiteRegistry::config_name(site)),
            )
            .map_err(SiteError::Transfer)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;

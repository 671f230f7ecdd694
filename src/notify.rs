//! Change alerts.
//!
//! Mail settings are validated up front, before a check touches any remote
//! host, so a misconfigured alert path is reported before work is done
//! rather than after a change has already been detected.

use crate::registry::HostDescriptor;
use crate::report::changed_lines;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_FROM_ADDRESS: &str = "integrit@test.com";
pub const DEFAULT_SMTP_PORT: u16 = 25;

const DEFAULT_TEMPLATE: &str = "\
Subject: Changes detected on {host}

This is a message from the remote file integrity checker.
This service has detected changes on a site that it monitors.
Such changes may be indicative of malicious activity.

Site: {site}
Host: {host}
Changes: {changes}

Following is a list of the changes detected:

{report}";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Cannot check without {0}")]
    Precondition(&'static str),
    #[error("Invalid {field} address {value:?}: {source}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        source: lettre::address::AddressError,
    },
    #[error("Cannot read alert template {}: {source}", path.display())]
    Template {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to build alert message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Failed to send alert via {server}: {source}")]
    Dispatch {
        server: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Mail settings as collected from the command line and settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailOptions {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub template: Option<PathBuf>,
}

/// Mail settings that are complete enough to send an alert.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub from: Mailbox,
    pub to: Mailbox,
    pub template: AlertTemplate,
}

fn parse_mailbox(field: &'static str, value: &str) -> Result<Mailbox, NotifyError> {
    value
        .parse::<Mailbox>()
        .map_err(|source| NotifyError::InvalidAddress {
            field,
            value: value.to_string(),
            source,
        })
}

impl MailOptions {
    /// Checks that an alert could be sent, without contacting the relay.
    pub fn validate(&self) -> Result<MailConfig, NotifyError> {
        let server = self
            .server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::Precondition("a mailserver (--mailserver)"))?;

        let to = self
            .to
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::Precondition("a to-address (--to)"))?;

        let from = self.from.as_deref().unwrap_or(DEFAULT_FROM_ADDRESS);

        let template = match &self.template {
            Some(path) => AlertTemplate::load(path)?,
            None => AlertTemplate::default(),
        };

        Ok(MailConfig {
            server: server.to_string(),
            port: self.port.unwrap_or(DEFAULT_SMTP_PORT),
            from: parse_mailbox("from", from)?,
            to: parse_mailbox("to", to)?,
            template,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

/// Alert text with `{site}`, `{host}`, `{changes}` and `{report}` placeholders.
///
/// A leading `Subject:` line followed by a blank line sets the subject;
/// everything else is the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTemplate {
    text: String,
}

impl Default for AlertTemplate {
    fn default() -> Self {
        AlertTemplate {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl AlertTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        AlertTemplate { text: text.into() }
    }

    pub fn load(path: &Path) -> Result<Self, NotifyError> {
        let text = std::fs::read_to_string(path).map_err(|source| NotifyError::Template {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(text))
    }

    pub fn render(&self, site: &str, host: &HostDescriptor, report: &str) -> AlertMessage {
        // The report is substituted last so its content is never expanded.
        let fill = |s: &str| {
            s.replace("{site}", site)
                .replace("{host}", host.as_str())
                .replace("{changes}", &changed_lines(report).count().to_string())
                .replace("{report}", report)
        };

        let (subject, body) = match self.text.strip_prefix("Subject:") {
            Some(rest) => {
                let (line, body) = rest.split_once('\n').unwrap_or((rest, ""));
                let body = body
                    .strip_prefix("\r\n")
                    .or_else(|| body.strip_prefix('\n'))
                    .unwrap_or(body);
                (line.trim().to_string(), body)
            }
            None => (format!("Changes detected on {host}"), self.text.as_str()),
        };

        AlertMessage {
            subject: fill(&subject),
            body: fill(body),
        }
    }
}

/// Delivers an alert to the configured recipient.
pub trait Notifier {
    fn send(&self, mail: &MailConfig, message: &AlertMessage) -> Result<(), NotifyError>;
}

impl<T: Notifier + ?Sized> Notifier for &T {
    fn send(&self, mail: &MailConfig, message: &AlertMessage) -> Result<(), NotifyError> {
        (**self).send(mail, message)
    }
}

/// Sends alerts through an SMTP relay without TLS or authentication.
pub struct SmtpNotifier;

impl Notifier for SmtpNotifier {
    fn send(&self, mail: &MailConfig, message: &AlertMessage) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(mail.from.clone())
            .to(mail.to.clone())
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())?;

        let transport = SmtpTransport::builder_dangerous(mail.server.as_str())
            .port(mail.port)
            .build();

        transport
            .send(&email)
            .map_err(|e| NotifyError::Dispatch {
                server: format!("{}:{}", mail.server, mail.port),
                source: Box::new(e),
            })?;

        info!("Sent alert to {} via {}", mail.to, mail.server);
        Ok(())
    }
}

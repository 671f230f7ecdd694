use crate::notify::MailOptions;
use crate::settings::Settings;
use clap::{ArgAction, ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

mod help_text;

/// Run integrit on remote sites and alert when their files change
#[derive(Parser, Debug)]
#[command(
    name = "integrit-remote",
    version,
    about,
    long_about = help_text::ROOT_LONG_ABOUT,
    after_help = help_text::AFTER_HELP
)]
#[command(group(ArgGroup::new("mode").args(["init", "update", "check"])))]
pub struct Cli {
    /// Run as if started in DIRECTORY (holds config-files/, databases/, bin/)
    #[arg(short = 'C', value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). Takes precedence over RUST_LOG.
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "log_level")]
    pub verbose: u8,

    /// Set the log level explicitly. Takes precedence over RUST_LOG.
    #[arg(long, value_name = "LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Create the first known-good database for SITE
    #[arg(short, long, value_name = "SITE")]
    pub init: Option<String>,

    /// Update SITE's known-good database from its current state
    #[arg(short, long, value_name = "SITE")]
    pub update: Option<String>,

    /// Check SITE against its known-good database and alert on changes
    #[arg(short, long, value_name = "SITE")]
    pub check: Option<String>,

    /// SMTP relay used for alerts (required for --check)
    #[arg(short, long, value_name = "ADDR")]
    pub mailserver: Option<String>,

    /// From-address of alerts [default: integrit@test.com]
    #[arg(short, long, value_name = "ADDR")]
    pub from: Option<String>,

    /// Recipient of alerts (required for --check)
    #[arg(short, long, value_name = "ADDR")]
    pub to: Option<String>,

    /// Alert template file ({site}, {host}, {changes} and {report} are substituted)
    #[arg(long, value_name = "FILE")]
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// What a single run of the program does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    List,
    Init { site: String },
    Update { site: String },
    Check { site: String, mail: MailOptions },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Resolves the requested mode, merging mail options with `settings`.
    pub fn invocation(&self, settings: &Settings) -> Invocation {
        if let Some(site) = &self.init {
            return Invocation::Init { site: site.clone() };
        }
        if let Some(site) = &self.update {
            return Invocation::Update { site: site.clone() };
        }
        if let Some(site) = &self.check {
            let mail = settings.mail_options(MailOptions {
                server: self.mailserver.clone(),
                port: None,
                from: self.from.clone(),
                to: self.to.clone(),
                template: self.template.clone(),
            });
            return Invocation::Check {
                site: site.clone(),
                mail,
            };
        }
        Invocation::List
    }
}

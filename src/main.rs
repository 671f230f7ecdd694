mod baseline;
mod cli;
mod lifecycle;
mod notify;
mod registry;
mod remote;
mod report;
mod settings;

use anyhow::Context;
use chrono::{DateTime, Local};
use cli::{Cli, Invocation, LogLevel};
use lifecycle::{CheckOutcome, SiteController};
use notify::{MailOptions, Notifier, SmtpNotifier};
use registry::SiteRegistry;
use remote::{RemoteExecutor, SshExecutor};
use settings::Settings;
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, error, info};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

struct RemoteExitCode;

impl RemoteExitCode {
    /// Exit code used when a check found (and alerted on) changes.
    fn changes_detected() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (I/O errors, remote failures, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_level);

    // Change working directory if -C was specified
    if let Some(directory) = &cli.directory
        && let Err(e) = std::env::set_current_dir(directory)
    {
        error!(
            "Failed to change directory to {}: {}",
            directory.display(),
            e
        );
        return RemoteExitCode::any_error();
    }

    match run(&cli) {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err}");
            RemoteExitCode::any_error()
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let base_dir = std::env::current_dir().context("Cannot determine working directory")?;
    let settings = Settings::load(&base_dir)?;

    let registry = SiteRegistry::new(&settings.config_dir, &settings.database_dir);
    let controller = SiteController::new(
        registry.clone(),
        settings.binary.clone(),
        SshExecutor {
            ssh_program: settings.ssh.ssh_program.clone(),
            scp_program: settings.ssh.scp_program.clone(),
            connect_timeout_secs: settings.ssh.connect_timeout_secs,
        },
        SmtpNotifier,
    );

    match cli.invocation(&settings) {
        Invocation::List => handle_list(&registry),
        Invocation::Init { site } => handle_init(&controller, &site),
        Invocation::Update { site } => handle_update(&controller, &site),
        Invocation::Check { site, mail } => handle_check(&controller, &site, &mail),
    }
}

fn handle_list(registry: &SiteRegistry) -> anyhow::Result<ExitCode> {
    let sites = registry.list_sites()?;

    println!("Config files exist for the following sites:");
    for site in &sites {
        let modified: DateTime<Local> = site.modified.into();
        println!(
            "\t{}\t{}\t{}",
            site.name,
            modified.format("%Y-%m-%d %H:%M:%S"),
            site.state
        );
    }
    println!();
    println!("Usage: integrit-remote [--init|--update|--check] SITE");

    info!("Found {} site(s)", sites.len());
    Ok(ExitCode::SUCCESS)
}

fn handle_init<E: RemoteExecutor, N: Notifier>(
    controller: &SiteController<E, N>,
    site: &str,
) -> anyhow::Result<ExitCode> {
    let summary = controller.init(site)?;
    info!(
        "Initialized {} ({}): baseline {}",
        summary.site, summary.host, summary.fingerprint
    );
    Ok(ExitCode::SUCCESS)
}

fn handle_update<E: RemoteExecutor, N: Notifier>(
    controller: &SiteController<E, N>,
    site: &str,
) -> anyhow::Result<ExitCode> {
    let summary = controller.update(site)?;
    if summary.baseline_changed() {
        info!(
            "Updated {} ({}): baseline {}",
            summary.site, summary.host, summary.fingerprint
        );
    } else {
        info!(
            "Updated {} ({}): baseline unchanged",
            summary.site, summary.host
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_check<E: RemoteExecutor, N: Notifier>(
    controller: &SiteController<E, N>,
    site: &str,
    mail: &MailOptions,
) -> anyhow::Result<ExitCode> {
    let outcome = match controller.check(site, mail) {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(report) = err.change_report() {
                print!("{report}");
            }
            return Err(err.into());
        }
    };

    print!("{}", outcome.report());

    match outcome {
        CheckOutcome::Clean { host, .. } => {
            info!("No changes detected on {} ({})", site, host);
            Ok(ExitCode::SUCCESS)
        }
        CheckOutcome::Changed {
            host,
            changes,
            rebaseline,
            ..
        } => {
            info!(
                "Alert sent for {} change(s) on {} ({}); new baseline {}",
                changes, site, host, rebaseline.fingerprint
            );
            Ok(RemoteExitCode::changes_detected())
        }
    }
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    // Explicit flags win over RUST_LOG; without them RUST_LOG applies.
    let filter = match (log_level, verbose) {
        (Some(level), _) => EnvFilter::new(level.as_filter()),
        (None, 0) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
        }
        (None, 1) => EnvFilter::new("info"),
        (None, _) => EnvFilter::new("debug"),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

//! `weightsync` command-line entrypoint.
//!
//! Fetches single model artifacts, mirrors Hugging Face directories, and
//! replays the provenance ledger. Status and progress go to stderr; `list`
//! and the final path of `fetch` go to stdout.

mod cli;
mod config;
mod error;
mod output;

use std::io::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use weightsync_common::{RelativeSubpath, TreeLocation};
use weightsync_fetcher::auth::Credentials;
use weightsync_fetcher::ledger::Ledger;
use weightsync_fetcher::listing::{HubTreeLister, TreeLister};
use weightsync_fetcher::mirror::{DirectoryMirror, MirrorError, MirrorOrigin, MirrorRequest};
use weightsync_fetcher::reconcile::{ReconcileOptions, ReconciliationRunner, SectionOutcome};
use weightsync_fetcher::report::status_pair;
use weightsync_fetcher::retry::{FetchRequest, Fetcher};
use weightsync_fetcher::transfer::{HttpTransport, Transport};

use crate::cli::{Cli, Command, FetchArgs, ListArgs, MirrorArgs, ReconcileArgs};
use crate::config::SharedConfig;
use crate::error::{CliError, Result};
use crate::output::{
    TerminalProgress, install_logging, level_filter, write_stderr_line, write_stdout_line,
};

/// Settings resolved once per invocation.
struct RunContext {
    config: SharedConfig,
    models_dir: Utf8PathBuf,
    credentials: Credentials,
    quiet: bool,
}

/// The network seams a command runs against.
struct Services<'a> {
    transport: &'a dyn Transport,
    lister: &'a dyn TreeLister,
}

/// Output streams for one invocation.
struct Streams<'a> {
    stdout: &'a mut dyn Write,
    stderr: &'a mut dyn Write,
}

impl RunContext {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let config = SharedConfig::load(cli.config.as_deref())?;
        let models_dir = config.models_dir(cli.models_dir.as_deref())?;
        let credentials = config.credentials(|name| std::env::var(name).ok());
        Ok(Self {
            config,
            models_dir,
            credentials,
            quiet: cli.quiet,
        })
    }

    fn ledger(&self, cli_override: Option<&Utf8Path>) -> Ledger {
        Ledger::new(self.config.ledger_path(cli_override, &self.models_dir))
    }

    fn transport(&self) -> HttpTransport {
        let transport = HttpTransport::new(self.credentials.clone());
        if self.quiet {
            transport
        } else {
            transport.with_progress(Arc::new(TerminalProgress::default()))
        }
    }

    fn lister(&self) -> HubTreeLister {
        HubTreeLister::new(
            self.config.huggingface_endpoint(),
            self.credentials.huggingface.clone(),
            self.config.listing_timeout(),
        )
    }

    /// Print a non-error status line unless `--quiet` is set.
    fn say(&self, stderr: &mut dyn Write, message: impl std::fmt::Display) {
        if !self.quiet {
            write_stderr_line(stderr, message);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    install_logging(level_filter(cli.quiet, cli.verbosity));
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let run_result = run(
        &cli,
        &mut Streams {
            stdout: &mut stdout,
            stderr: &mut stderr,
        },
    );
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(cli: &Cli, streams: &mut Streams<'_>) -> Result<()> {
    let context = RunContext::from_cli(cli)?;
    let transport = context.transport();
    let lister = context.lister();
    let services = Services {
        transport: &transport,
        lister: &lister,
    };
    dispatch(&context, &services, &cli.command, streams)
}

fn dispatch(
    context: &RunContext,
    services: &Services<'_>,
    command: &Command,
    streams: &mut Streams<'_>,
) -> Result<()> {
    match command {
        Command::Fetch(args) => run_fetch(context, services, args, streams),
        Command::Mirror(args) => run_mirror(context, services, args, streams.stderr),
        Command::Reconcile(args) => run_reconcile(context, services, args, streams.stderr),
        Command::List(args) => run_list(context, args, streams.stdout),
    }
}

/// Fetches one artifact, or mirrors a `/tree/` URL into
/// `<subdirectory>/<directory name>`.
fn run_fetch(
    context: &RunContext,
    services: &Services<'_>,
    args: &FetchArgs,
    streams: &mut Streams<'_>,
) -> Result<()> {
    let attempts = context.config.attempts(args.attempts);
    if let Some(location) = TreeLocation::parse(&args.url) {
        let parent = RelativeSubpath::parse(&args.subdirectory).map_err(MirrorError::from)?;
        let destination = format!("{}/{}", parent.as_str(), location.display_name());
        let request = MirrorRequest::new(&location.repo_id, &destination)
            .with_revision(&location.revision)
            .with_subpath(&location.path)
            .with_max_attempts(attempts)
            .with_origin(MirrorOrigin::TreeUrl(args.url.trim().to_owned()));
        return mirror_and_report(
            context,
            services,
            &request,
            location.display_name(),
            streams.stderr,
        );
    }

    let ledger = context.ledger(None);
    let fetcher = Fetcher::new(services.transport, &context.models_dir).with_ledger(&ledger);
    let mut request = FetchRequest::new(&args.url, &args.subdirectory).with_max_attempts(attempts);
    if let Some(filename) = args
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        request = request.with_filename(filename);
    }
    if let Some(hash) = &args.sha256 {
        request = request.with_expected_hash(hash);
    }

    let result = fetcher.fetch(&request);
    let (status, path) = status_pair(&result);
    match result {
        Ok(outcome) => {
            context.say(streams.stderr, status);
            if let Some(warning) = outcome.ledger_warning {
                write_stderr_line(
                    streams.stderr,
                    format!("Warning: ledger not updated: {warning}"),
                );
            }
            write_stdout_line(streams.stdout, path);
            Ok(())
        }
        Err(_) => {
            write_stderr_line(streams.stderr, status);
            Err(CliError::Incomplete { failed: 1 })
        }
    }
}

fn run_mirror(
    context: &RunContext,
    services: &Services<'_>,
    args: &MirrorArgs,
    stderr: &mut dyn Write,
) -> Result<()> {
    let mut exclude = context.config.exclude.clone();
    exclude.extend(args.exclude.iter().cloned());
    let request = MirrorRequest::new(&args.repo_id, args.destination())
        .with_revision(&args.revision)
        .with_subpath(&args.subpath)
        .with_exclusions(exclude)
        .with_max_attempts(context.config.attempts(args.attempts))
        .recording(!args.no_record);
    mirror_and_report(context, services, &request, &args.repo_id, stderr)
}

fn mirror_and_report(
    context: &RunContext,
    services: &Services<'_>,
    request: &MirrorRequest,
    name: &str,
    stderr: &mut dyn Write,
) -> Result<()> {
    let ledger = context.ledger(None);
    let mirror = DirectoryMirror::new(services.lister, services.transport, &context.models_dir)
        .with_ledger(&ledger);
    let report = mirror.mirror(request)?;

    if report.is_success() {
        context.say(stderr, report.status_line(name));
    } else {
        write_stderr_line(stderr, report.status_line(name));
    }
    for path in &report.failed {
        write_stderr_line(stderr, format!("  failed: {path}"));
    }
    if let Some(section) = report.ledger_section.as_deref().filter(|_| report.ledger_updated) {
        context.say(stderr, format!("Recorded [{section}] in {}", ledger.path()));
    }
    if let Some(warning) = &report.ledger_warning {
        write_stderr_line(stderr, format!("Warning: ledger not updated: {warning}"));
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::Incomplete {
            failed: report.failed.len(),
        })
    }
}

fn run_reconcile(
    context: &RunContext,
    services: &Services<'_>,
    args: &ReconcileArgs,
    stderr: &mut dyn Write,
) -> Result<()> {
    let ledger = context.ledger(args.ledger.as_deref());
    let runner = ReconciliationRunner::new(
        services.transport,
        services.lister,
        &context.models_dir,
        &ledger,
    );
    let options = ReconcileOptions {
        max_attempts: context.config.attempts(args.attempts),
        skip_existing: context.config.skip_existing && !args.no_skip_existing,
    };
    let quiet = context.quiet;
    let report = runner.run_with(options, &mut |section, outcome| match outcome {
        SectionOutcome::Succeeded(status) | SectionOutcome::Skipped(status) => {
            if !quiet {
                write_stderr_line(stderr, format!("[{section}] {status}"));
            }
        }
        SectionOutcome::Failed(status) => {
            write_stderr_line(stderr, format!("[{section}] {status}"));
        }
    })?;

    write_stderr_line(stderr, report.summary());
    if !report.failed_sections.is_empty() {
        write_stderr_line(
            stderr,
            format!("Failed sections: {}", report.failed_sections.join(", ")),
        );
    }
    write_stderr_line(stderr, report.status_line());

    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::Incomplete {
            failed: report.failed,
        })
    }
}

fn run_list(context: &RunContext, args: &ListArgs, stdout: &mut dyn Write) -> Result<()> {
    let ledger = context.ledger(args.ledger.as_deref());
    if !ledger.exists() {
        return Err(CliError::LedgerMissing {
            path: ledger.path().to_owned(),
        });
    }
    for section in ledger.all()? {
        let line = match &section.entry {
            Ok(entry) => format!(
                "[{}] {} {} ({})",
                section.name,
                entry.kind(),
                entry.source_key(),
                entry.timestamp.as_deref().unwrap_or("no timestamp")
            ),
            Err(err) => format!("[{}] invalid: {err}", section.name),
        };
        write_stdout_line(stdout, line);
    }
    Ok(())
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) if err.already_reported() => 1,
        Err(err) => {
            write_stderr_line(stderr, format!("Error: {err}"));
            1
        }
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

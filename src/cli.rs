//! Command-line interface definitions.
//!
//! Kept apart from `main` so argument parsing can be tested without running
//! any transfers.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use weightsync_common::DEFAULT_SUBDIRECTORY;

/// Fetch, verify, and reconcile model weights against a provenance ledger.
#[derive(Parser, Debug)]
#[command(name = "weightsync")]
#[command(version, about)]
#[command(long_about = concat!(
    "Fetch, verify, and reconcile model weights against a provenance ledger.\n\n",
    "Every artifact lands beneath a single models directory. Each successful ",
    "download is recorded in an INI ledger (models.ini by default) so the same ",
    "set of weights can be restored later with `weightsync reconcile`.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Fetch a single file into loras/SDXL:\n",
    "    $ weightsync fetch https://huggingface.co/org/repo/resolve/main/model.safetensors -d loras/SDXL\n\n",
    "  Mirror a repository, skipping the README:\n",
    "    $ weightsync mirror org/repo -d diffusers/repo -x README.md\n\n",
    "  Restore everything recorded in the ledger:\n",
    "    $ weightsync reconcile\n\n",
    "ENVIRONMENT:\n",
    "  HF_TOKEN            Bearer token for the Hugging Face Hub\n",
    "  CIVITAI_API_TOKEN   Bearer token for CivitAI",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file [default: platform config dir/weightsync.toml].
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Root directory for downloaded models.
    #[arg(long, global = true, value_name = "DIR")]
    pub models_dir: Option<Utf8PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download one file, or a Hugging Face `/tree/` URL as a directory.
    Fetch(FetchArgs),

    /// Mirror a Hugging Face repository directory.
    Mirror(MirrorArgs),

    /// Re-fetch everything recorded in the ledger.
    Reconcile(ReconcileArgs),

    /// Show the sections recorded in the ledger.
    List(ListArgs),
}

/// Arguments for `fetch`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct FetchArgs {
    /// Source URL (Hugging Face or CivitAI).
    pub url: String,

    /// Destination subdirectory under the models directory.
    #[arg(short = 'd', long, value_name = "SUBDIR", default_value = DEFAULT_SUBDIRECTORY)]
    pub subdirectory: String,

    /// Override the filename derived from the URL.
    #[arg(short, long, value_name = "NAME")]
    pub filename: Option<String>,

    /// Expected SHA-256 of the file (hex, any case).
    #[arg(long, value_name = "HASH")]
    pub sha256: Option<String>,

    /// Transfer attempts before giving up [default: from config, 3].
    #[arg(long, value_name = "N")]
    pub attempts: Option<u32>,
}

/// Arguments for `mirror`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct MirrorArgs {
    /// Repository identifier, `owner/name`.
    pub repo_id: String,

    /// Branch, tag, or commit to mirror.
    #[arg(long, default_value = "main")]
    pub revision: String,

    /// Remote directory to mirror [default: repository root].
    #[arg(long = "path", value_name = "PATH", default_value = "")]
    pub subpath: String,

    /// Destination under the models directory [default: repository name].
    #[arg(short = 'd', long, value_name = "DEST")]
    pub destination: Option<String>,

    /// Base filename to skip (repeatable).
    #[arg(short = 'x', long = "exclude", value_name = "NAME")]
    pub exclude: Vec<String>,

    /// Do not record the mirror in the ledger.
    #[arg(long)]
    pub no_record: bool,

    /// Transfer attempts per file [default: from config, 3].
    #[arg(long, value_name = "N")]
    pub attempts: Option<u32>,
}

impl MirrorArgs {
    /// The destination, defaulting to the repository name.
    #[must_use]
    pub fn destination(&self) -> &str {
        match self.destination.as_deref().map(str::trim) {
            Some(dest) if !dest.is_empty() => dest,
            _ => self
                .repo_id
                .trim_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(self.repo_id.as_str()),
        }
    }
}

/// Arguments for `reconcile`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct ReconcileArgs {
    /// Ledger file [default: models.ini in the models directory].
    #[arg(long, value_name = "FILE")]
    pub ledger: Option<Utf8PathBuf>,

    /// Transfer attempts per file [default: from config, 3].
    #[arg(long, value_name = "N")]
    pub attempts: Option<u32>,

    /// Re-fetch file entries even when their target already exists.
    #[arg(long)]
    pub no_skip_existing: bool,
}

/// Arguments for `list`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
pub struct ListArgs {
    /// Ledger file [default: models.ini in the models directory].
    #[arg(long, value_name = "FILE")]
    pub ledger: Option<Utf8PathBuf>,
}

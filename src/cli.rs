//! Command-line interface for jailconf
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// jailconf - slot-numbered FreeBSD jail configurations
#[derive(Parser)]
#[command(name = "jailconf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path [default: /usr/local/etc/jailconf.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Prepare directories and the main jail.conf include
    Init,

    /// Create a jail from a base archive
    Create {
        /// Jail name
        name: String,

        /// Base version to extract (e.g., 14.1-RELEASE)
        #[arg(long)]
        version: String,

        /// Use this slot instead of the lowest free one
        #[arg(long)]
        slot: Option<u32>,

        /// Extra template fields (KEY=VALUE)
        #[arg(long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },

    /// Delete a jail's config and root
    Delete {
        /// Jail name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,

        /// Version the jail was created from
        #[arg(long)]
        version: Option<String>,

        /// Roster that declared the jail (supplies version and extra fields)
        #[arg(long)]
        roster: Option<PathBuf>,
    },

    /// List managed jails
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Compare configs on disk with their rendered template
    Verify {
        /// Roster with declared versions and fields
        #[arg(long)]
        roster: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Create every jail declared in a roster file (.toml or .json)
    Apply {
        /// Roster file
        file: PathBuf,

        /// Only apply this jail
        #[arg(long)]
        only: Option<String>,
    },

    /// Download a base archive
    Fetch {
        /// Release to download from the mirror (e.g., 14.1-RELEASE)
        version: Option<String>,

        /// Download from this URL instead of the mirror
        #[arg(long, conflicts_with = "version", required_unless_present = "version")]
        source: Option<String>,

        /// Expected SHA256 of the archive
        #[arg(long)]
        sha256: Option<String>,

        /// Download again even if the archive is present
        #[arg(short, long)]
        force: bool,
    },

    /// List downloaded base archives
    Bases,

    /// Print the slot the next create would use
    NextSlot,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse key=value pairs for template fields
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "jailconf", &mut std::io::stdout());
    }
}

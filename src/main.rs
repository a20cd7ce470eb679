//! jailconf - slot-numbered jail.conf.d manager
//!
//! Allocates a numeric slot per jail, derives its VNET identity from the
//! slot, renders one config fragment per jail and refuses to overwrite or
//! delete fragments that no longer match their render.

mod cli;
mod error;
mod host;
mod jail;
mod lifecycle;
mod manifest;
mod network;
mod provision;
mod reconcile;
mod release;
mod roster;
mod setup;
mod slot;
mod supply;
mod template;

use cli::{Cli, Commands};
use error::{Error, Result};
use host::SystemHost;
use lifecycle::{
    CreateOutcome, CreateRequest, DeleteOutcome, DeleteRequest, Lifecycle, SlotRequest,
    VerifyStatus,
};
use provision::{BaseStore, FetchOutcome, FetchSource};
use release::ReleaseTag;
use roster::Roster;
use setup::IncludeChange;
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        tracing::debug!(class = ?e.class(), "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let config = manifest::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            let report = setup::init(&config)?;
            println!("Confirmed directory exists: {}", report.conf_dir.display());
            match report.include {
                IncludeChange::Created => {
                    println!("Created {} with include directive.", report.main_conf.display())
                }
                IncludeChange::Appended => {
                    println!("Added include directive to {}.", report.main_conf.display())
                }
                IncludeChange::Present => println!(
                    "{} already contains include directive.",
                    report.main_conf.display()
                ),
            }
            for dir in &report.created_dirs {
                println!("Created directory: {}", dir.display());
            }
            println!("jailconf initialized successfully.");
        }

        Commands::Create {
            name,
            version,
            slot,
            set,
        } => {
            let lifecycle = Lifecycle::from_config(&config, SystemHost)?;
            let request = CreateRequest {
                name,
                version,
                slot: slot.map_or(SlotRequest::Allocate, SlotRequest::Declared),
                extra: set.into_iter().collect(),
            };

            match lifecycle.create(&request)? {
                CreateOutcome::Created(record) => {
                    println!("Jail '{}' created successfully.", record.name);
                    println!("  Slot:   {}", record.slot);
                    println!("  Config: {}", record.conf_path.display());
                    println!("  Root:   {}", record.root_path.display());
                    println!("  IP:     {}", record.identity.ip_addr);
                    println!("\nTo start the jail:");
                    println!("  jail -c {}", record.name);
                    println!("  # or");
                    println!("  service jail start {}", record.name);
                }
                CreateOutcome::AlreadySatisfied(record) => {
                    println!(
                        "Jail '{}' already exists with slot {} and matching config; nothing to do.",
                        record.name, record.slot
                    );
                }
            }
        }

        Commands::Delete {
            name,
            force,
            version,
            roster,
        } => {
            let lifecycle = Lifecycle::from_config(&config, SystemHost)?;
            let mut request = DeleteRequest {
                name,
                force,
                version,
                extra: BTreeMap::new(),
            };

            if let Some(path) = roster {
                let roster = Roster::load(&path)?;
                let spec = roster
                    .find(&request.name)
                    .ok_or_else(|| Error::JailNotFound(request.name.clone()))?;
                if request.version.is_none() {
                    request.version = Some(spec.version.clone());
                }
                request.extra = spec.extra.clone();
            }

            match lifecycle.delete(&request)? {
                DeleteOutcome::Deleted(record) => {
                    println!("Deleted: {}", record.conf_path.display());
                    println!("Deleted: {}", record.root_path.display());
                    println!("Jail '{}' has been successfully deleted.", record.name);
                }
                DeleteOutcome::Cancelled(_) => println!("Jail deletion cancelled."),
            }
        }

        Commands::List { json } => {
            let lifecycle = Lifecycle::from_config(&config, SystemHost)?;
            let records = lifecycle.list()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No jails configured.");
            } else {
                println!("{:<6} {:<20} {:<16} {:<10} ROOT", "SLOT", "NAME", "IP", "EPAIR");
                for r in &records {
                    println!(
                        "{:<6} {:<20} {:<16} {:<10} {}",
                        r.slot,
                        r.name,
                        r.identity.ip_addr,
                        r.identity.epair.base(),
                        r.root_path.display()
                    );
                }
            }
        }

        Commands::Verify { roster, json } => {
            let lifecycle = Lifecycle::from_config(&config, SystemHost)?;
            let roster = roster.as_deref().map(Roster::load).transpose()?;
            let reports = lifecycle.verify(roster.as_ref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    let status = match report.status {
                        VerifyStatus::Match => "ok",
                        VerifyStatus::Drift => "DRIFT",
                        VerifyStatus::Missing => "MISSING",
                        VerifyStatus::Unverifiable => "UNVERIFIABLE",
                    };
                    match &report.detail {
                        Some(detail) => println!(
                            "{:<6} {:<20} {:<13} {}",
                            report.slot, report.name, status, detail
                        ),
                        None => println!("{:<6} {:<20} {}", report.slot, report.name, status),
                    }
                }
            }

            let bad = reports
                .iter()
                .filter(|r| r.status != VerifyStatus::Match)
                .count();
            if bad > 0 {
                return Err(Error::Validation(format!(
                    "{} of {} jails do not match their rendered config",
                    bad,
                    reports.len()
                )));
            }
        }

        Commands::Apply { file, only } => {
            let lifecycle = Lifecycle::from_config(&config, SystemHost)?;
            let mut roster = Roster::load(&file)?;
            if let Some(name) = only {
                roster = roster.only(&name)?;
            }

            for outcome in lifecycle.apply(&roster)? {
                match outcome {
                    CreateOutcome::Created(r) => {
                        println!("created   {} (slot {}, {})", r.name, r.slot, r.identity.ip_addr)
                    }
                    CreateOutcome::AlreadySatisfied(r) => {
                        println!("unchanged {} (slot {})", r.name, r.slot)
                    }
                }
            }
        }

        Commands::Fetch {
            version,
            source,
            sha256,
            force,
        } => {
            let store = BaseStore::from_config(&config);
            let source = match (source, version) {
                (Some(url), _) => FetchSource::Url(url),
                (None, Some(version)) => FetchSource::Release(ReleaseTag::parse(&version)?),
                (None, None) => {
                    return Err(Error::Validation("give a version or --source URL".into()));
                }
            };

            match store.fetch(&source, sha256.as_deref(), force)? {
                FetchOutcome::Downloaded { version, path } => println!(
                    "Base system for FreeBSD {} downloaded successfully to {}",
                    version,
                    path.display()
                ),
                FetchOutcome::AlreadyPresent { version, path } => println!(
                    "Base system for FreeBSD {} already present at {} (use --force to download again)",
                    version,
                    path.display()
                ),
            }
        }

        Commands::Bases => {
            let store = BaseStore::from_config(&config);
            let bases = store.list()?;
            if bases.is_empty() {
                println!("No base archives downloaded.");
            } else {
                for base in &bases {
                    println!(
                        "{:<20} {:>8.1} MB  {}",
                        base.version,
                        base.size as f64 / 1_048_576.0,
                        base.path.display()
                    );
                }
            }
        }

        Commands::NextSlot => {
            let lifecycle = Lifecycle::from_config(&config, SystemHost)?;
            println!("{}", lifecycle.next_slot()?);
        }

        Commands::Completion { .. } => {}
    }

    Ok(())
}

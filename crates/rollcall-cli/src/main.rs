mod config;
mod replay;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_core::policy::DEFAULT_POLICY_TOML;
use rollcall_core::{AttendanceStatus, AttendanceStore, IdentityAttributes, IdentityStore};
use rollcall_scan::{ScanConfig, ScanMode};
use rollcall_store::SqliteStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::replay::{Recording, ReplayOptions};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance register")]
struct Cli {
    /// Database path (overrides ROLLCALL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities
    List {
        #[arg(long)]
        json: bool,
    },
    /// Change an identity's attributes or label
    ///
    /// A rename is applied first; if it fails nothing is changed.
    Edit {
        label: String,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        roll_no: Option<String>,
        /// New label; attendance history moves with it
        #[arg(long)]
        rename: Option<String>,
    },
    /// Remove an identity, its images and its attendance
    Remove { label: String },
    /// Show one identity's status for a day
    Status {
        label: String,
        /// Day to query (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show every identity's status for a day
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Show one identity's status for each day in a range
    History {
        label: String,
        #[arg(long)]
        from: NaiveDate,
        /// Last day of the range (default: today)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Record a status by hand
    Mark {
        label: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Present, Absent or Leave
        #[arg(long, default_value = "Present")]
        status: AttendanceStatus,
    },
    /// Run a recorded detection stream through the scan loop
    Replay {
        /// JSON lines file, one array of detections per frame
        file: PathBuf,
        #[arg(long, value_enum)]
        mode: ReplayMode,
        /// Save a completed enrollment under this label
        #[arg(long)]
        label: Option<String>,
        #[arg(long, default_value = "")]
        class: String,
        #[arg(long, default_value = "")]
        roll_no: String,
        /// Attendance day to mark (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Also print overlays and per-step prompts
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the built-in reference policy
    Policy,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReplayMode {
    Enroll,
    Attend,
}

impl From<ReplayMode> for ScanMode {
    fn from(mode: ReplayMode) -> Self {
        match mode {
            ReplayMode::Enroll => ScanMode::Enrollment,
            ReplayMode::Attend => ScanMode::Attendance,
        }
    }
}

#[derive(Serialize)]
struct IdentityRow<'a> {
    label: &'a str,
    class: &'a str,
    roll_no: &'a str,
    images: usize,
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Apply an edit and return the identity's label afterwards.
async fn edit_identity<S: IdentityStore + ?Sized>(
    store: &S,
    label: &str,
    class: Option<String>,
    roll_no: Option<String>,
    rename: Option<String>,
) -> Result<String> {
    if class.is_none() && roll_no.is_none() && rename.is_none() {
        bail!("nothing to change: pass --class, --roll-no or --rename");
    }
    let attributes = if class.is_some() || roll_no.is_some() {
        let current = store
            .list_identities()
            .await?
            .into_iter()
            .find(|i| i.label == label)
            .with_context(|| format!("identity not found: {label}"))?;
        Some(IdentityAttributes {
            class: class.unwrap_or(current.attributes.class),
            roll_no: roll_no.unwrap_or(current.attributes.roll_no),
        })
    } else {
        None
    };

    let label = match rename {
        Some(new_label) => {
            let new_label = new_label.trim().to_string();
            store.rename_identity(label, &new_label).await?;
            new_label
        }
        None => label.to_string(),
    };
    if let Some(attributes) = attributes {
        store.update_identity(&label, attributes).await?;
    }
    Ok(label)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Policy = cli.command {
        print!("{DEFAULT_POLICY_TOML}");
        return Ok(());
    }

    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let policy = config.load_policy().context("failed to load policy")?;
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.db_path, policy.calendar.clone())
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    match cli.command {
        Commands::List { json } => {
            let identities = store.list_identities().await?;
            if json {
                let rows: Vec<IdentityRow> = identities
                    .iter()
                    .map(|i| IdentityRow {
                        label: &i.label,
                        class: &i.attributes.class,
                        roll_no: &i.attributes.roll_no,
                        images: i.images.len(),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if identities.is_empty() {
                println!("No identities enrolled");
            } else {
                for i in &identities {
                    println!(
                        "{}\tclass={}\troll_no={}\timages={}",
                        i.label,
                        i.attributes.class,
                        i.attributes.roll_no,
                        i.images.len()
                    );
                }
            }
        }
        Commands::Edit {
            label,
            class,
            roll_no,
            rename,
        } => {
            let label_now = edit_identity(&store, &label, class, roll_no, rename).await?;
            if label_now != label {
                println!("Renamed {label} to {label_now}");
            } else {
                println!("Updated {label}");
            }
        }
        Commands::Remove { label } => {
            store.delete_identity(&label).await?;
            println!("Removed {label}");
        }
        Commands::Status { label, date } => {
            let date = date.unwrap_or_else(today);
            let status = store.attendance_status(&label, date).await?;
            match store.calendar().holiday(date) {
                Some(holiday) if status == AttendanceStatus::Holiday => {
                    println!("{label} {date}: {status} ({})", holiday.name)
                }
                _ => println!("{label} {date}: {status}"),
            }
        }
        Commands::Report { date, json } => {
            let date = date.unwrap_or_else(today);
            let report = store.attendance_for_date(date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Attendance for {date}");
                for (label, status) in &report {
                    println!("  {label}\t{status}");
                }
            }
        }
        Commands::History { label, from, to } => {
            let to = to.unwrap_or_else(today);
            for (day, status) in store.attendance_history(&label, from, to).await? {
                println!("{day}\t{status}");
            }
        }
        Commands::Mark {
            label,
            date,
            status,
        } => {
            let date = date.unwrap_or_else(today);
            store.mark_attendance(&label, date, status).await?;
            println!("Marked {label} {status} on {date}");
        }
        Commands::Replay {
            file,
            mode,
            label,
            class,
            roll_no,
            date,
            verbose,
        } => {
            let mode = ScanMode::from(mode);
            if label.is_some() && mode != ScanMode::Enrollment {
                bail!("--label only applies to enrollment replays");
            }
            let recording = Recording::load(&file)?;
            if recording.is_empty() {
                bail!("{} contains no frames", file.display());
            }
            let options = ReplayOptions {
                mode,
                enroll_as: label.map(|l| (l, IdentityAttributes { class, roll_no })),
                date,
                verbose,
            };
            let scan_config = ScanConfig::from_env(policy.enrollment);
            let mut out = std::io::stdout().lock();
            let summary =
                replay::replay(&recording, Arc::new(store), scan_config, options, &mut out).await?;
            tracing::info!(
                frames = summary.frames,
                processed = summary.processed,
                captures = summary.captures,
                marked = summary.marked.len(),
                failures = summary.failures,
                "replay finished"
            );
            if summary.failures > 0 {
                bail!("{} operation(s) failed during replay", summary.failures);
            }
        }
        Commands::Policy => {}
    }

    Ok(())
}

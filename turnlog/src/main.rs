//! turnlog - tutoring turn log aggregation and session analytics
//!
//! Ingests posted turns into the aggregate store and reports on students,
//! lessons, classes and per-attempt session rollups.

mod render;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use turnlog_core::db::schema;
use turnlog_core::{Catalog, Config, Database, TurnIngestor};

#[derive(Parser)]
#[command(name = "turnlog")]
#[command(about = "Aggregate tutoring turn logs and analyze sessions")]
#[command(version)]
struct Args {
    /// Config file to use instead of the XDG default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the database and its indexes
    Migrate,

    /// Ingest newline-delimited JSON turns
    Ingest {
        /// Input file; `-` or omitted reads stdin
        file: Option<PathBuf>,
    },

    /// Record that a student opened some reading material
    Read {
        /// Student user id
        user: String,
        /// URL of the reading material
        url: String,
    },

    /// List lessons
    Lessons {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List students
    Students {
        /// Only students in classes held at this location
        #[arg(short, long)]
        location: Option<String>,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List classes
    Classes {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List sessions, optionally filtered by lesson and/or student
    Sessions {
        #[arg(long)]
        lesson: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Per-attempt rollup of one student's session in one lesson
    Rollup {
        lesson: String,
        user: String,

        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Correct / incorrect answer totals per lesson
    Totals {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

/// Output format for query commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    // Initialize logging
    let _log_guard =
        turnlog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database and provision it once, before any ingest or query
    let db_path = config.resolved_database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Migrate => {
            let version = schema::get_schema_version(&*db.connection()?)
                .context("failed to read schema version")?;
            println!("Database ready: {}", db_path.display());
            println!("Schema version: {}", version);
        }
        Command::Ingest { file } => ingest(&db, &config, file)?,
        Command::Read { user, url } => {
            let user_key = TurnIngestor::new(&db, config.rules.clone())
                .save_reading_visit(&user, &url, chrono::Utc::now())
                .context("failed to save reading visit")?;
            println!("Recorded reading visit for {}", user_key);
        }
        Command::Lessons { format } => {
            let catalog = Catalog::new(&db);
            let lessons = catalog.find_lessons().context("failed to load lessons")?;
            match format {
                Format::Json => render::json(&lessons)?,
                Format::Text => {
                    let names = catalog
                        .find_lesson_names()
                        .context("failed to load lesson names")?;
                    render::lessons(&lessons, &names);
                }
            }
        }
        Command::Students { location, format } => {
            let catalog = Catalog::new(&db);
            let students = match location.as_deref() {
                Some(location) => catalog.find_students_by_location(location),
                None => catalog.find_students(),
            }
            .context("failed to load students")?;
            match format {
                Format::Json => render::json(&students)?,
                Format::Text => render::students(&students),
            }
        }
        Command::Classes { format } => {
            let classes = Catalog::new(&db)
                .find_classes()
                .context("failed to load classes")?;
            match format {
                Format::Json => render::json(&classes)?,
                Format::Text => render::classes(&classes),
            }
        }
        Command::Sessions { lesson, user, format } => {
            let catalog = Catalog::new(&db);
            match format {
                Format::Json => {
                    let sessions = catalog
                        .find_sessions_raw(lesson.as_deref(), user.as_deref())
                        .context("failed to load sessions")?;
                    render::json(&sessions)?;
                }
                Format::Text => {
                    let sessions = catalog
                        .find_sessions(lesson.as_deref(), user.as_deref())
                        .context("failed to load sessions")?;
                    render::sessions(&sessions);
                }
            }
        }
        Command::Rollup { lesson, user, format } => {
            let session = Catalog::new(&db)
                .find_session(&lesson, &user)
                .context("failed to load session")?;
            let rollup = session.rollup(&config.rules);
            match format {
                Format::Json => render::json(&rollup)?,
                Format::Text => render::rollup(&session, &rollup),
            }
        }
        Command::Totals { format } => {
            let totals = Catalog::new(&db)
                .find_lesson_answer_totals()
                .context("failed to load answer totals")?;
            match format {
                Format::Json => render::json(&render::totals_rows(&totals))?,
                Format::Text => render::totals(&totals),
            }
        }
    }

    Ok(())
}

fn ingest(db: &Database, config: &Config, file: Option<PathBuf>) -> Result<()> {
    let ingestor = TurnIngestor::new(db, config.rules.clone());

    let report = match file {
        Some(path) if path.as_os_str() != "-" => {
            let reader = File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            ingestor
                .ingest_batch(BufReader::new(reader))
                .with_context(|| format!("failed to ingest {}", path.display()))?
        }
        _ => ingestor
            .ingest_batch(io::stdin().lock())
            .context("failed to ingest stdin")?,
    };

    println!("Ingest complete:");
    println!("  Turns ingested: {}", report.turns_ingested);
    println!("  Lines rejected: {}", report.rejected.len());
    for (line, reason) in &report.rejected {
        eprintln!("  line {}: {}", line, reason);
    }

    Ok(())
}

//! # turnlog-core
//!
//! Core library for turnlog - a tutoring turn aggregation and session
//! analytics engine.
//!
//! This library provides:
//! - Domain types for turns, students, lessons, classes and sessions
//! - Key derivation and turn classification
//! - Aggregate updates and the SQLite document store they land in
//! - Session timeline analytics (attempts, reading time, lesson path)
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Raw:** Posted turns, stored verbatim in each session's log
//! - **Aggregate:** Counters and membership sets updated per turn
//! - **Derived:** Timeline analytics computed from a log snapshot on demand
//!
//! ## Example
//!
//! ```rust,no_run
//! use turnlog_core::{Catalog, Config, Database, TurnIngestor};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&config.resolved_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let ingestor = TurnIngestor::new(&db, config.rules.clone());
//! ingestor
//!     .ingest_json(r#"{"LessonID": "lesson1", "UserID": "alice", "TurnID": 1}"#)
//!     .expect("failed to ingest");
//!
//! let session = Catalog::new(&db).find_session("lesson1", "alice").expect("missing session");
//! println!("{} turns", session.turn_count);
//! ```

// Re-export commonly used items at the crate root
pub use aggregate::{replay_counters, AggregateIntent, SessionCounters};
pub use classify::TurnFacts;
pub use config::{Config, TurnRules};
pub use db::{Collection, Database, DocUpdate, DocumentStore};
pub use error::{Error, Result};
pub use ingest::{IngestReport, IngestedTurn, TurnIngestor};
pub use keys::DerivedKeys;
pub use query::Catalog;
pub use timeline::{AttemptRollup, SessionTimeline, TotalTimeMode};
pub use types::*;

// Public modules
pub mod aggregate;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod ingest;
pub mod keys;
pub mod logging;
pub mod query;
pub mod timeline;
pub mod types;

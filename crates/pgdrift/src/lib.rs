//! Postgres schema migrations and drift validation.
//!
//! This crate provides:
//! - Versioned changesets applied exactly once, each change in its own
//!   transaction, tracked in a history table
//! - Schema introspection from the Postgres catalogs
//! - Drift detection between an expected schema and the live one
//!
//! # Migrations
//!
//! A changeset is an ordered slice of [`Change`] values. Each change carries
//! a version string and either a list of SQL commands or a Rust function:
//!
//! ```ignore
//! let changeset = vec![
//!     Change::commands("1.0.1", ["CREATE TABLE account (id SERIAL PRIMARY KEY)"]),
//!     Change::function("1.0.2", |ctx| Box::pin(async move {
//!         ctx.execute("ALTER TABLE account ADD COLUMN email VARCHAR(255)").await?;
//!         Ok(())
//!     })),
//! ];
//!
//! let migrator = Migrator::new(Target::new("public"));
//! let outcome = migrator.update(&mut client, &changeset).await?;
//! ```
//!
//! Already-applied versions are skipped; a failed change rolls back alone
//! while earlier changes stay committed.
//!
//! # Validation
//!
//! [`Inspector::validate`] loads the live schema and compares it against an
//! expected [`Schema`], returning one diagnostic string per discrepancy.
//! Lenient mode only flags missing objects and type mismatches; strict mode
//! also flags anything extra and compares column attributes, indexes, and
//! foreign keys.

mod changeset;
mod diff;
mod error;
mod introspect;
mod migrate;
mod schema;
mod traced;

pub use changeset::{Change, ChangeContext, ChangeFn, ChangesetIssue, Payload, check_changeset};
pub use diff::diff_schemas;
pub use error::Error;
pub use introspect::Inspector;
pub use migrate::{DEFAULT_TIMEOUT, HistoryRecord, Migrator, UpdateOutcome};
pub use schema::{Column, ForeignKey, Index, Schema, Table};
pub use traced::TracedClient;

pub type Result<T> = std::result::Result<T, Error>;

/// Where migrations and validation look: a Postgres schema plus the name of
/// the table recording applied versions.
///
/// The history table is excluded from introspection so it never shows up as
/// drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub schema: String,
    pub history_table: String,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            schema: "public".into(),
            history_table: "schema_history".into(),
        }
    }
}

impl Target {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Self::default()
        }
    }

    pub fn history_table(mut self, name: impl Into<String>) -> Self {
        self.history_table = name.into();
        self
    }
}

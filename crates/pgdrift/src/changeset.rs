//! Versioned changesets and their static validation.
//!
//! A changeset is an ordered list of [`Change`]s, each applied at most once.
//! Versions are opaque ordering keys: they are compared only for equality
//! against the history table, never parsed or ordered numerically.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_postgres::Transaction;
use tracing::Instrument;

/// One versioned, irreversible unit of structural change.
#[derive(Debug, Clone)]
pub struct Change {
    /// Non-empty, unique within a changeset.
    pub version: String,
    pub payload: Payload,
    /// Per-change transaction deadline; zero means "use the migrator default".
    pub timeout: Duration,
}

impl Change {
    /// A change made of raw SQL statements, executed in order.
    pub fn commands<I, S>(version: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            payload: Payload::Commands(commands.into_iter().map(Into::into).collect()),
            timeout: Duration::ZERO,
        }
    }

    /// A change driven by an async callback running inside the transaction.
    pub fn function(version: impl Into<String>, function: ChangeFn) -> Self {
        Self {
            version: version.into(),
            payload: Payload::Function(function),
            timeout: Duration::ZERO,
        }
    }

    /// Override the transaction deadline for this change.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What a change executes: raw statements or a transaction callback.
///
/// The variant makes "neither commands nor function" unrepresentable; the
/// only degenerate state left is an empty command list, which
/// [`check_changeset`] rejects.
#[derive(Debug, Clone)]
pub enum Payload {
    Commands(Vec<String>),
    Function(ChangeFn),
}

/// An async change callback. Receives the transaction the change runs in;
/// returning an error rolls it back.
pub type ChangeFn = for<'a, 'b> fn(
    &'a mut ChangeContext<'b>,
) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>>;

/// The transaction a change executes in, with traced statement helpers.
pub struct ChangeContext<'a> {
    tx: Transaction<'a>,
}

impl<'a> ChangeContext<'a> {
    pub(crate) fn new(tx: Transaction<'a>) -> Self {
        Self { tx }
    }

    /// Execute one statement in the change's transaction.
    pub async fn execute(&self, sql: &str) -> Result<u64, tokio_postgres::Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            affected = tracing::field::Empty,
        );
        let affected = self.tx.execute(sql, &[]).instrument(span.clone()).await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// The underlying transaction, for parameterized queries.
    pub fn transaction(&self) -> &Transaction<'a> {
        &self.tx
    }

    pub(crate) fn into_inner(self) -> Transaction<'a> {
        self.tx
    }
}

/// One rule violation found by [`check_changeset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetIssue {
    /// The changeset contains no entries at all.
    Empty,
    /// The entry at `index` has an empty version.
    MissingVersion { index: usize },
    /// The entry at `index` repeats a version seen earlier in the changeset.
    DuplicateVersion { index: usize, version: String },
    /// The entry at `index` carries an empty command list.
    NoCommands { index: usize, version: String },
}

impl fmt::Display for ChangesetIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangesetIssue::Empty => write!(f, "changeset is empty"),
            ChangesetIssue::MissingVersion { index } => {
                write!(f, "entry {index} is missing a version")
            }
            ChangesetIssue::DuplicateVersion { index, version } => {
                write!(f, "entry {index} duplicates version {version}")
            }
            ChangesetIssue::NoCommands { index, version } => {
                write!(f, "entry {index} (version {version}) has no commands")
            }
        }
    }
}

/// Check a changeset against the static rules, reporting every violation
/// rather than stopping at the first.
pub fn check_changeset(changeset: &[Change]) -> Vec<ChangesetIssue> {
    let mut issues = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for (index, change) in changeset.iter().enumerate() {
        if change.version.is_empty() {
            issues.push(ChangesetIssue::MissingVersion { index });
            continue;
        }
        if !seen.insert(&change.version) {
            issues.push(ChangesetIssue::DuplicateVersion {
                index,
                version: change.version.clone(),
            });
        }
        if let Payload::Commands(commands) = &change.payload
            && commands.is_empty()
        {
            issues.push(ChangesetIssue::NoCommands {
                index,
                version: change.version.clone(),
            });
        }
    }
    if changeset.is_empty() {
        issues.push(ChangesetIssue::Empty);
    }
    issues
}

//! Changeset application and migration history tracking.
//!
//! The [`Migrator`] owns the bookkeeping table: it creates it on first use,
//! records one row per applied change, and skips any changeset entry whose
//! version is already recorded. Each pending change runs in its own
//! transaction so a failure rolls back only itself; changes committed earlier
//! in the same call stay applied.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::Client;
use tracing::{debug, error, info, warn};

use crate::changeset::{Change, ChangeContext, Payload, check_changeset};
use crate::error::Error;
use crate::traced::TracedClient;
use crate::{Result, Target};

/// Deadline applied to every operation that does not carry its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const QUERY_HISTORY_TABLE_EXISTS: &str =
    "SELECT EXISTS (SELECT FROM pg_tables WHERE schemaname = $1 AND tablename = $2)";

/// One row of the bookkeeping table, newest first when loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Store-assigned, monotonically increasing.
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

/// What an [`Migrator::update`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Version recorded before this call; `None` on an unmigrated database.
    pub from_version: Option<String>,
    /// Version of the changeset head.
    pub to_version: String,
    /// Versions newly applied by this call, in application order.
    pub applied: Vec<String>,
}

/// Applies changesets and tracks which versions have been applied.
pub struct Migrator {
    target: Target,
    default_timeout: Duration,
    queries: HistoryQueries,
}

impl Migrator {
    pub fn new(target: Target) -> Self {
        let queries = HistoryQueries::new(&target);
        Self {
            target,
            default_timeout: DEFAULT_TIMEOUT,
            queries,
        }
    }

    /// Override the default per-operation deadline.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Apply every changeset entry whose version is not yet recorded.
    ///
    /// Entries run in changeset order, each in its own transaction that also
    /// inserts the history row. On failure the failing transaction rolls back
    /// and the error propagates; earlier changes stay committed, leaving the
    /// database at the last successfully applied version.
    pub async fn update(&self, client: &mut Client, changeset: &[Change]) -> Result<UpdateOutcome> {
        let issues = check_changeset(changeset);
        if !issues.is_empty() {
            for issue in &issues {
                error!(%issue, "changeset rejected");
            }
            return Err(Error::InvalidChangeset { issues });
        }

        self.ensure_history_table(client).await?;

        let history = self.load_history(client).await?;
        let from_version = history.first().map(|record| record.version.clone());
        let recorded: HashSet<&str> = history.iter().map(|record| record.version.as_str()).collect();
        debug!(
            version = from_version.as_deref().unwrap_or("<none>"),
            "current database version"
        );

        let to_version = changeset
            .last()
            .map(|change| change.version.clone())
            .unwrap_or_default();

        let mut applied = Vec::new();
        for change in pending(changeset, &recorded) {
            self.apply_change(client, change).await?;
            applied.push(change.version.clone());
        }

        if applied.is_empty() {
            info!(version = %to_version, "database already up to date");
        } else {
            info!(
                from = from_version.as_deref().unwrap_or("<none>"),
                to = %to_version,
                count = applied.len(),
                "database upgraded"
            );
        }

        Ok(UpdateOutcome {
            from_version,
            to_version,
            applied,
        })
    }

    /// Create the bookkeeping table if it does not exist yet.
    pub async fn ensure_history_table(&self, client: &Client) -> Result<()> {
        let db = TracedClient::new(client);
        let work = async {
            let row = db
                .query_one(
                    QUERY_HISTORY_TABLE_EXISTS,
                    &[&self.target.schema, &self.target.history_table],
                )
                .await
                .map_err(Error::query("history table existence check"))?;
            let exists: bool = row
                .try_get(0)
                .map_err(Error::query("history table existence scan"))?;
            if exists {
                return Ok(());
            }
            db.execute(&self.queries.create_table, &[])
                .await
                .map_err(Error::query("create history table"))?;
            info!(table = %self.target.history_table, "history table created");
            Ok(())
        };
        self.bounded("ensure history table", work).await
    }

    /// All history records, most recently applied first.
    pub async fn load_history(&self, client: &Client) -> Result<Vec<HistoryRecord>> {
        let db = TracedClient::new(client);
        let work = async {
            let rows = db
                .query(&self.queries.load_history, &[])
                .await
                .map_err(Error::query("load history"))?;
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let created_at: NaiveDateTime =
                    row.try_get(1).map_err(Error::query("scan history row"))?;
                records.push(HistoryRecord {
                    id: row.try_get(0).map_err(Error::query("scan history row"))?,
                    created_at: created_at.and_utc(),
                    version: row.try_get(2).map_err(Error::query("scan history row"))?,
                });
            }
            Ok(records)
        };
        self.bounded("load history", work).await
    }

    /// Version of the most recently applied change; `None` means the
    /// database has never been migrated, which is not an error.
    pub async fn current_version(&self, client: &Client) -> Result<Option<String>> {
        let db = TracedClient::new(client);
        let work = async {
            let row = db
                .query_opt(&self.queries.last_version, &[])
                .await
                .map_err(Error::query("current version query"))?;
            match row {
                Some(row) => {
                    let version = row
                        .try_get(0)
                        .map_err(Error::query("current version scan"))?;
                    Ok(Some(version))
                }
                None => Ok(None),
            }
        };
        self.bounded("current version", work).await
    }

    async fn apply_change(&self, client: &mut Client, change: &Change) -> Result<()> {
        info!(version = %change.version, "applying change");
        let timeout = if change.timeout.is_zero() {
            self.default_timeout
        } else {
            change.timeout
        };
        match tokio::time::timeout(timeout, self.run_change(client, change)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("apply change {}", change.version),
                timeout,
            }),
        }
    }

    async fn run_change(&self, client: &mut Client, change: &Change) -> Result<()> {
        let tx = client
            .transaction()
            .await
            .map_err(Error::query(format!("begin transaction for {}", change.version)))?;
        debug!("transaction begin");
        let mut ctx = ChangeContext::new(tx);

        let result = async {
            match &change.payload {
                Payload::Commands(commands) => {
                    for command in commands {
                        ctx.execute(command).await.map_err(|source| Error::Exec {
                            version: change.version.clone(),
                            source,
                        })?;
                    }
                }
                Payload::Function(function) => {
                    // Bare driver errors escaping the callback get tagged
                    // with the failing version like command errors are.
                    function(&mut ctx).await.map_err(|err| match err {
                        Error::Postgres(source) => Error::Exec {
                            version: change.version.clone(),
                            source,
                        },
                        other => other,
                    })?;
                }
            }
            let now = Utc::now().naive_utc();
            ctx.transaction()
                .execute(&self.queries.insert_version, &[&now, &change.version])
                .await
                .map_err(Error::query(format!("record history for {}", change.version)))?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                ctx.into_inner()
                    .commit()
                    .await
                    .map_err(Error::query(format!("commit change {}", change.version)))?;
                info!(version = %change.version, "database schema upgraded");
                Ok(())
            }
            Err(err) => {
                debug!(version = %change.version, "transaction failed, rolling back");
                if let Err(rollback_err) = ctx.into_inner().rollback().await {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.default_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                timeout: self.default_timeout,
            }),
        }
    }
}

/// Walk the changeset in order, keeping entries whose version is not yet
/// recorded. A recorded version is skipped wherever it occurs, so a database
/// whose history is not a prefix of the changeset still converges.
fn pending<'a>(changeset: &'a [Change], recorded: &HashSet<&str>) -> Vec<&'a Change> {
    changeset
        .iter()
        .filter(|change| {
            if recorded.contains(change.version.as_str()) {
                debug!(version = %change.version, "skipping already applied change");
                false
            } else {
                true
            }
        })
        .collect()
}

/// SQL for the bookkeeping table, built once per [`Migrator`] so the table
/// name is configuration rather than a process-wide constant.
struct HistoryQueries {
    create_table: String,
    last_version: String,
    insert_version: String,
    load_history: String,
}

impl HistoryQueries {
    fn new(target: &Target) -> Self {
        // Schema-qualified so the statements resolve against the target
        // schema whatever the connection's search_path says.
        let table = format!("{}.{}", target.schema, target.history_table);
        Self {
            create_table: format!(
                "CREATE TABLE {table} (\n\
                 \tid SERIAL,\n\
                 \tcreated_at TIMESTAMP(3) WITHOUT TIME ZONE,\n\
                 \tversion VARCHAR(255),\n\
                 \tPRIMARY KEY (id)\n\
                 )"
            ),
            last_version: format!(
                "SELECT version FROM {table} WHERE id = (SELECT MAX(id) FROM {table})"
            ),
            insert_version: format!("INSERT INTO {table}(created_at, version) VALUES($1, $2)"),
            load_history: format!("SELECT id, created_at, version FROM {table} ORDER BY id DESC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_skips_recorded_versions_wherever_they_occur() {
        let changeset = [
            Change::commands("1.0.1", ["a"]),
            Change::commands("1.0.2", ["b"]),
            Change::commands("1.0.3", ["c"]),
        ];

        // Recorded history is not a prefix of the changeset: 1.0.2 was
        // applied but 1.0.1 was not.
        let recorded: HashSet<&str> = ["1.0.2"].into_iter().collect();
        let remaining: Vec<&str> = pending(&changeset, &recorded)
            .iter()
            .map(|change| change.version.as_str())
            .collect();
        assert_eq!(remaining, vec!["1.0.1", "1.0.3"]);
    }

    #[test]
    fn pending_is_empty_when_everything_is_recorded() {
        let changeset = [
            Change::commands("1.0.1", ["a"]),
            Change::commands("1.0.2", ["b"]),
        ];
        let recorded: HashSet<&str> = ["1.0.1", "1.0.2"].into_iter().collect();
        assert!(pending(&changeset, &recorded).is_empty());
    }

    #[test]
    fn history_queries_are_schema_qualified() {
        let target = Target::new("app").history_table("app_history");
        let queries = HistoryQueries::new(&target);
        assert!(queries.create_table.starts_with("CREATE TABLE app.app_history"));
        assert_eq!(
            queries.load_history,
            "SELECT id, created_at, version FROM app.app_history ORDER BY id DESC"
        );
        assert!(queries.last_version.contains("FROM app.app_history"));
        assert!(queries.insert_version.starts_with("INSERT INTO app.app_history"));
    }

    #[test]
    fn history_queries_default_to_public_schema() {
        let queries = HistoryQueries::new(&Target::default());
        assert!(queries.create_table.starts_with("CREATE TABLE public.schema_history"));
    }

    #[test]
    fn target_defaults() {
        let target = Target::default();
        assert_eq!(target.schema, "public");
        assert_eq!(target.history_table, "schema_history");
    }
}

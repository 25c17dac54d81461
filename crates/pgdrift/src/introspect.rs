//! Live schema introspection from the Postgres catalogs.
//!
//! Five serial passes, each filling one facet of a [`Schema`] snapshot:
//! tables, sequences, columns, indexes, foreign keys. Every query is
//! parameterized by the target namespace and the bookkeeping table name so
//! the migration machinery never shows up in the snapshot.

use std::time::Duration;

use tokio_postgres::Client;
use tracing::{error, info};

use crate::diff::diff_schemas;
use crate::error::Error;
use crate::migrate::DEFAULT_TIMEOUT;
use crate::schema::{Column, ForeignKey, Index, Schema, Table};
use crate::traced::TracedClient;
use crate::{Result, Target};

const QUERY_TABLES: &str =
    "SELECT tablename FROM pg_tables WHERE schemaname = $1 AND tablename != $2";

const QUERY_SEQUENCES: &str = "SELECT sequencename FROM pg_sequences \
     WHERE schemaname = $1 AND sequencename != $2 || '_id_seq' \
     ORDER BY sequencename";

const QUERY_COLUMNS: &str = "\
SELECT c.table_name, c.column_name, c.udt_name, c.character_maximum_length, c.numeric_precision,
       CASE
           WHEN c.is_nullable = 'YES' THEN true
           WHEN c.is_nullable = 'NO' THEN false
       END AS is_nullable,
       CASE
           WHEN tc.constraint_type = 'UNIQUE' THEN true
           ELSE false
       END AS is_unique
FROM information_schema.columns c LEFT JOIN
    information_schema.key_column_usage kcu ON c.table_name = kcu.table_name AND c.column_name = kcu.column_name LEFT JOIN
    information_schema.table_constraints tc ON kcu.constraint_name = tc.constraint_name
WHERE c.table_schema = $1 AND c.table_name != $2
ORDER BY c.table_name, c.ordinal_position";

const QUERY_INDEXES: &str = "\
SELECT
    t.relname AS table_name,
    i.relname AS index_name,
    a.attname AS column_name,
    ix.indisunique AS is_unique
FROM
    pg_class t
        JOIN pg_index ix ON t.oid = ix.indrelid
        JOIN pg_class i ON ix.indexrelid = i.oid
        JOIN pg_attribute a ON t.oid = a.attrelid AND a.attnum = ANY(ix.indkey)
        JOIN pg_namespace n ON t.relnamespace = n.oid
WHERE
    t.relkind = 'r'
    AND n.nspname = $1
    AND i.relname != $2 || '_pkey'
ORDER BY n.nspname, t.relname, i.relname";

const QUERY_FOREIGN_KEYS: &str = "\
SELECT
    tc.table_name AS table_name,
    tc.constraint_name AS key_name,
    kcu.column_name AS column_name,
    ccu.table_name AS foreign_table_name,
    ccu.column_name AS foreign_column_name
FROM
    information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name AND kcu.table_schema = $1
        JOIN information_schema.constraint_column_usage ccu
            ON tc.constraint_name = ccu.constraint_name AND ccu.table_schema = $1
WHERE
    tc.constraint_type = 'FOREIGN KEY'
    AND tc.table_schema = $1";

/// Loads schema snapshots and validates them against expectations.
pub struct Inspector {
    target: Target,
    timeout: Duration,
}

impl Inspector {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the deadline that bounds a whole load.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compare the live schema against `expected`, returning one diagnostic
    /// per discrepancy. An empty list means the database is compliant.
    /// Loading failures are errors; structural differences are not.
    pub async fn validate(
        &self,
        client: &Client,
        expected: &Schema,
        strict: bool,
    ) -> Result<Vec<String>> {
        info!(schema = %self.target.schema, strict, "validating database schema");
        let actual = self.load_schema(client).await?;
        Ok(diff_schemas(expected, &actual, strict))
    }

    /// Build a fresh snapshot of the live schema. The caller owns the result;
    /// nothing is cached across calls.
    pub async fn load_schema(&self, client: &Client) -> Result<Schema> {
        let db = TracedClient::new(client);
        let mut schema = Schema::new(self.target.schema.clone());
        let work = async {
            self.load_tables(&db, &mut schema).await?;
            self.load_sequences(&db, &mut schema).await?;
            self.load_columns(&db, &mut schema).await?;
            self.load_indexes(&db, &mut schema).await?;
            self.load_foreign_keys(&db, &mut schema).await?;
            Ok::<(), Error>(())
        };
        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    operation: "load schema".into(),
                    timeout: self.timeout,
                });
            }
        }
        Ok(schema)
    }

    fn params(&self) -> [&(dyn tokio_postgres::types::ToSql + Sync); 2] {
        [&self.target.schema, &self.target.history_table]
    }

    async fn load_tables(&self, db: &TracedClient<'_>, schema: &mut Schema) -> Result<()> {
        let rows = db
            .query(QUERY_TABLES, &self.params())
            .await
            .map_err(Error::query("failed to query tables"))?;
        for row in rows {
            let name: String = row.try_get(0).map_err(scan("tables"))?;
            schema.tables.insert(name, Table::new());
        }
        Ok(())
    }

    async fn load_sequences(&self, db: &TracedClient<'_>, schema: &mut Schema) -> Result<()> {
        let rows = db
            .query(QUERY_SEQUENCES, &self.params())
            .await
            .map_err(Error::query("failed to query sequences"))?;
        for row in rows {
            let name: String = row.try_get(0).map_err(scan("sequences"))?;
            schema.sequences.insert(name);
        }
        Ok(())
    }

    async fn load_columns(&self, db: &TracedClient<'_>, schema: &mut Schema) -> Result<()> {
        let rows = db
            .query(QUERY_COLUMNS, &self.params())
            .await
            .map_err(Error::query("failed to query columns"))?;
        for row in rows {
            let table_name: String = row.try_get(0).map_err(scan("columns"))?;
            let column_name: String = row.try_get(1).map_err(scan("columns"))?;
            let data_type: String = row.try_get(2).map_err(scan("columns"))?;
            let char_length: Option<i32> = row.try_get(3).map_err(scan("columns"))?;
            let num_precision: Option<i32> = row.try_get(4).map_err(scan("columns"))?;
            let is_nullable: bool = row.try_get(5).map_err(scan("columns"))?;
            let unique: bool = row.try_get(6).map_err(scan("columns"))?;

            // A column row whose table was not seen by the tables pass is a
            // transient catalog inconsistency: report it and keep loading.
            match schema.tables.get_mut(&table_name) {
                Some(table) => {
                    table.columns.insert(
                        column_name,
                        Column {
                            data_type,
                            char_length: char_length.unwrap_or(0),
                            num_precision: num_precision.unwrap_or(0),
                            not_null: !is_nullable,
                            unique,
                        },
                    );
                }
                None => {
                    error!(table = %table_name, column = %column_name, "table not found for column");
                }
            }
        }
        Ok(())
    }

    async fn load_indexes(&self, db: &TracedClient<'_>, schema: &mut Schema) -> Result<()> {
        let rows = db
            .query(QUERY_INDEXES, &self.params())
            .await
            .map_err(Error::query("failed to query indexes"))?;
        for row in rows {
            let table_name: String = row.try_get(0).map_err(scan("indexes"))?;
            let index_name: String = row.try_get(1).map_err(scan("indexes"))?;
            let column_name: String = row.try_get(2).map_err(scan("indexes"))?;
            let is_unique: bool = row.try_get(3).map_err(scan("indexes"))?;

            match schema.tables.get_mut(&table_name) {
                Some(table) => {
                    // One row per indexed column; accumulate into the index.
                    let index = table.indexes.entry(index_name).or_insert_with(Index::default);
                    index.unique = is_unique;
                    index.columns.push(column_name);
                }
                None => {
                    error!(table = %table_name, index = %index_name, "table not found for index");
                }
            }
        }
        Ok(())
    }

    async fn load_foreign_keys(&self, db: &TracedClient<'_>, schema: &mut Schema) -> Result<()> {
        // The bookkeeping table has no foreign keys, so this pass filters on
        // the namespace alone.
        let rows = db
            .query(QUERY_FOREIGN_KEYS, &[&self.target.schema])
            .await
            .map_err(Error::query("failed to query foreign keys"))?;
        for row in rows {
            let table_name: String = row.try_get(0).map_err(scan("foreign keys"))?;
            let key_name: String = row.try_get(1).map_err(scan("foreign keys"))?;
            let column_name: String = row.try_get(2).map_err(scan("foreign keys"))?;
            let foreign_table: String = row.try_get(3).map_err(scan("foreign keys"))?;
            let foreign_column: String = row.try_get(4).map_err(scan("foreign keys"))?;

            match schema.tables.get_mut(&table_name) {
                Some(table) => {
                    // One row per column pair; accumulate into the constraint.
                    let fk = table
                        .foreign_keys
                        .entry(key_name)
                        .or_insert_with(|| ForeignKey::new(foreign_table));
                    fk.columns.insert(column_name, foreign_column);
                }
                None => {
                    error!(table = %table_name, key = %key_name, "table not found for foreign key");
                }
            }
        }
        Ok(())
    }
}

fn scan(pass: &'static str) -> impl FnOnce(tokio_postgres::Error) -> Error {
    move |source| Error::Query {
        operation: format!("failed to scan {pass} row"),
        source,
    }
}

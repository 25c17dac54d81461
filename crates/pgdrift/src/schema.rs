//! In-memory model of a database schema.
//!
//! Name-keyed maps are the single source of truth for identity: a table is
//! "the entry under key `user`", and the value types carry no redundant name
//! field. The same model describes both the expected schema an application
//! declares and the actual schema loaded from the catalogs, so the two sides
//! of a [`diff_schemas`](crate::diff_schemas) call are always comparable.

use std::collections::BTreeSet;

use indexmap::IndexMap;

/// A complete schema snapshot: one namespace's tables and sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Namespace (Postgres schema) name.
    pub name: String,
    /// Tables in the schema, keyed by name.
    pub tables: IndexMap<String, Table>,
    /// Sequence names in the schema.
    pub sequences: BTreeSet<String>,
}

impl Schema {
    /// Create an empty schema for the given namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a table.
    pub fn table(mut self, name: impl Into<String>, table: Table) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    /// Add a sequence.
    pub fn sequence(mut self, name: impl Into<String>) -> Self {
        self.sequences.insert(name.into());
        self
    }
}

/// A database table: columns, indexes, and foreign keys, all keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: IndexMap<String, Column>,
    pub indexes: IndexMap<String, Index>,
    pub foreign_keys: IndexMap<String, ForeignKey>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column.
    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    /// Add an index.
    pub fn index(mut self, name: impl Into<String>, index: Index) -> Self {
        self.indexes.insert(name.into(), index);
        self
    }

    /// Add a foreign key constraint.
    pub fn foreign_key(mut self, name: impl Into<String>, fk: ForeignKey) -> Self {
        self.foreign_keys.insert(name.into(), fk);
        self
    }
}

/// A table column as the driver reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    /// Driver-reported type tag (`udt_name`), e.g. `varchar`, `int4`.
    pub data_type: String,
    /// Character maximum length; 0 when not applicable.
    pub char_length: i32,
    /// Numeric precision; 0 when not applicable.
    pub num_precision: i32,
    pub not_null: bool,
    /// Whether the column participates in a UNIQUE constraint.
    pub unique: bool,
}

impl Column {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            ..Default::default()
        }
    }

    pub fn char_length(mut self, length: i32) -> Self {
        self.char_length = length;
        self
    }

    pub fn num_precision(mut self, precision: i32) -> Self {
        self.num_precision = precision;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A database index.
///
/// Column order is not significant for matching; comparison treats `columns`
/// as a set, built on the fly rather than stored alongside the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Index {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A foreign key constraint: local columns mapped to referenced columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKey {
    /// The referenced table.
    pub foreign_table: String,
    /// Local column name -> referenced column name.
    pub columns: IndexMap<String, String>,
}

impl ForeignKey {
    pub fn new(foreign_table: impl Into<String>) -> Self {
        Self {
            foreign_table: foreign_table.into(),
            columns: IndexMap::new(),
        }
    }

    /// Map a local column to the column it references.
    pub fn column(mut self, local: impl Into<String>, referenced: impl Into<String>) -> Self {
        self.columns.insert(local.into(), referenced.into());
        self
    }
}

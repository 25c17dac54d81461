//! Drift detection between an expected schema and a loaded one.
//!
//! Each entity kind is compared independently. In lenient mode only missing
//! expected objects (and column type mismatches, which are never tolerated)
//! are reported; in strict mode the comparison is symmetric and extends to
//! column attributes, indexes, and foreign keys.
//!
//! Diagnostics accumulate in iteration order over name-keyed maps; treat the
//! result as an unordered multiset.

use std::collections::HashSet;

use crate::schema::{Column, ForeignKey, Index, Schema, Table};

/// Compare `expected` against `actual`, returning one human-readable
/// diagnostic per discrepancy. Empty means compliant.
pub fn diff_schemas(expected: &Schema, actual: &Schema, strict: bool) -> Vec<String> {
    let mut findings = diff_sequences(expected, actual, strict);
    findings.extend(diff_tables(expected, actual, strict));
    findings
}

fn diff_sequences(expected: &Schema, actual: &Schema, strict: bool) -> Vec<String> {
    let mut findings = Vec::new();
    for sequence in &expected.sequences {
        if !actual.sequences.contains(sequence) {
            findings.push(format!("sequence {sequence} is missing"));
        }
    }
    if strict {
        for sequence in &actual.sequences {
            if !expected.sequences.contains(sequence) {
                findings.push(format!("Unexpected sequence: {sequence}"));
            }
        }
    }
    findings
}

fn diff_tables(expected: &Schema, actual: &Schema, strict: bool) -> Vec<String> {
    let mut findings = Vec::new();
    for (name, expected_table) in &expected.tables {
        match actual.tables.get(name) {
            Some(actual_table) => {
                findings.extend(diff_table(name, expected_table, actual_table, strict));
            }
            None => findings.push(format!("table {name} is missing")),
        }
    }
    if strict {
        for name in actual.tables.keys() {
            if !expected.tables.contains_key(name) {
                findings.push(format!("Unexpected table: {name}"));
            }
        }
    }
    findings
}

fn diff_table(table: &str, expected: &Table, actual: &Table, strict: bool) -> Vec<String> {
    let mut findings = Vec::new();

    for (name, expected_column) in &expected.columns {
        match actual.columns.get(name) {
            Some(actual_column) => {
                findings.extend(diff_column(table, name, expected_column, actual_column, strict));
            }
            None => findings.push(format!("column {table}.{name} is missing")),
        }
    }
    if strict {
        for name in actual.columns.keys() {
            if !expected.columns.contains_key(name) {
                findings.push(format!("Unexpected column: {table}.{name}"));
            }
        }
    }

    // Indexes and foreign keys participate only in strict comparisons.
    if strict {
        for (name, expected_index) in &expected.indexes {
            match actual.indexes.get(name) {
                Some(actual_index) => {
                    findings.extend(diff_index(table, name, expected_index, actual_index));
                }
                None => findings.push(format!("index {table}.{name} is missing")),
            }
        }
        for name in actual.indexes.keys() {
            if !expected.indexes.contains_key(name) {
                findings.push(format!("Unexpected index: {table}.{name}"));
            }
        }

        for (name, expected_fk) in &expected.foreign_keys {
            match actual.foreign_keys.get(name) {
                Some(actual_fk) => {
                    findings.extend(diff_foreign_key(table, name, expected_fk, actual_fk));
                }
                None => findings.push(format!("foreign key {table}.{name} is missing")),
            }
        }
        for name in actual.foreign_keys.keys() {
            if !expected.foreign_keys.contains_key(name) {
                findings.push(format!("Unexpected foreign key: {table}.{name}"));
            }
        }
    }

    findings
}

fn diff_column(
    table: &str,
    name: &str,
    expected: &Column,
    actual: &Column,
    strict: bool,
) -> Vec<String> {
    let mut findings = Vec::new();

    // A type mismatch is never tolerated, whatever the mode.
    if expected.data_type != actual.data_type {
        findings.push(format!(
            "invalid column type: {table}.{name}, expected {}, actual {}",
            expected.data_type, actual.data_type
        ));
    }

    if strict {
        if expected.char_length != actual.char_length {
            findings.push(format!(
                "invalid column char length: {table}.{name}, expected {}, actual {}",
                expected.char_length, actual.char_length
            ));
        }
        if expected.num_precision != actual.num_precision {
            findings.push(format!(
                "invalid column num precision: {table}.{name}, expected {}, actual {}",
                expected.num_precision, actual.num_precision
            ));
        }
        if expected.not_null != actual.not_null {
            findings.push(format!(
                "invalid column not null: {table}.{name}, expected {}, actual {}",
                expected.not_null, actual.not_null
            ));
        }
        if expected.unique != actual.unique {
            findings.push(format!(
                "invalid column unique: {table}.{name}, expected {}, actual {}",
                expected.unique, actual.unique
            ));
        }
    }

    findings
}

fn diff_index(table: &str, name: &str, expected: &Index, actual: &Index) -> Vec<String> {
    let mut findings = Vec::new();

    if expected.unique != actual.unique {
        findings.push(format!(
            "invalid index uniqueness: {table}.{name}, expected {}, actual {}",
            expected.unique, actual.unique
        ));
    }

    // Column order never matters for an index match, only membership.
    let expected_columns: HashSet<&str> = expected.columns.iter().map(String::as_str).collect();
    let actual_columns: HashSet<&str> = actual.columns.iter().map(String::as_str).collect();

    for column in &expected_columns {
        if !actual_columns.contains(column) {
            findings.push(format!("invalid index {table}.{name}, missing column: {column}"));
        }
    }
    for column in &actual_columns {
        if !expected_columns.contains(column) {
            findings.push(format!("invalid index {table}.{name}, extra column: {column}"));
        }
    }

    findings
}

fn diff_foreign_key(
    table: &str,
    name: &str,
    expected: &ForeignKey,
    actual: &ForeignKey,
) -> Vec<String> {
    let mut findings = Vec::new();

    if expected.foreign_table != actual.foreign_table {
        findings.push(format!(
            "invalid foreign key table: {table}.{name}, expected {}, actual {}",
            expected.foreign_table, actual.foreign_table
        ));
    }

    for (column, expected_target) in &expected.columns {
        match actual.columns.get(column) {
            None => findings.push(format!(
                "invalid foreign key {table}.{name}, missing column: {column} => {expected_target}"
            )),
            Some(actual_target) if actual_target != expected_target => findings.push(format!(
                "invalid foreign key {table}.{name}, wrong column mapping, \
                 expected: {column} => {expected_target}, actual: {column} => {actual_target}"
            )),
            Some(_) => {}
        }
    }
    for (column, actual_target) in &actual.columns {
        if !expected.columns.contains_key(column) {
            findings.push(format!(
                "invalid foreign key {table}.{name}, extra column: {column} => {actual_target}"
            ));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut findings: Vec<String>) -> Vec<String> {
        findings.sort();
        findings
    }

    fn account_table() -> Table {
        Table::new()
            .column("id", Column::new("int4").not_null())
            .column("email", Column::new("varchar").char_length(255).not_null().unique())
            .column("balance", Column::new("numeric").num_precision(12))
            .index("account_email_idx", Index::new(["email"]).unique())
    }

    fn order_table() -> Table {
        Table::new()
            .column("id", Column::new("int4").not_null())
            .column("account_id", Column::new("int4").not_null())
            .foreign_key(
                "order_account_fkey",
                ForeignKey::new("account").column("account_id", "id"),
            )
    }

    fn full_schema() -> Schema {
        Schema::new("public")
            .table("account", account_table())
            .table("order", order_table())
            .sequence("account_id_seq")
            .sequence("order_id_seq")
    }

    #[test]
    fn identical_schemas_are_compliant_in_strict_mode() {
        let schema = full_schema();
        assert!(diff_schemas(&schema, &schema, true).is_empty());
        assert!(diff_schemas(&schema, &schema, false).is_empty());
    }

    #[test]
    fn missing_table_is_reported_in_both_modes() {
        let expected = Schema::new("public").table("account", account_table());
        let actual = Schema::new("public");
        for strict in [false, true] {
            assert_eq!(
                diff_schemas(&expected, &actual, strict),
                vec!["table account is missing".to_string()]
            );
        }
    }

    #[test]
    fn extra_table_only_matters_when_strict() {
        let expected = Schema::new("public");
        let actual = Schema::new("public").table("audit_log", Table::new());
        assert!(diff_schemas(&expected, &actual, false).is_empty());
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec!["Unexpected table: audit_log".to_string()]
        );
    }

    #[test]
    fn missing_and_extra_sequences() {
        let expected = Schema::new("public").sequence("account_id_seq");
        let actual = Schema::new("public").sequence("stray_seq");
        assert_eq!(
            diff_schemas(&expected, &actual, false),
            vec!["sequence account_id_seq is missing".to_string()]
        );
        assert_eq!(
            sorted(diff_schemas(&expected, &actual, true)),
            vec![
                "Unexpected sequence: stray_seq".to_string(),
                "sequence account_id_seq is missing".to_string(),
            ]
        );
    }

    #[test]
    fn column_type_mismatch_is_reported_even_when_lenient() {
        let expected =
            Schema::new("public").table("account", Table::new().column("id", Column::new("varchar")));
        let actual =
            Schema::new("public").table("account", Table::new().column("id", Column::new("int4")));
        for strict in [false, true] {
            assert_eq!(
                diff_schemas(&expected, &actual, strict),
                vec!["invalid column type: account.id, expected varchar, actual int4".to_string()]
            );
        }
    }

    #[test]
    fn extra_column_is_tolerated_when_lenient() {
        let expected =
            Schema::new("public").table("account", Table::new().column("id", Column::new("int4")));
        let actual = Schema::new("public").table(
            "account",
            Table::new()
                .column("id", Column::new("int4"))
                .column("legacy_flag", Column::new("bool")),
        );
        assert!(diff_schemas(&expected, &actual, false).is_empty());
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec!["Unexpected column: account.legacy_flag".to_string()]
        );
    }

    #[test]
    fn missing_column_is_reported_when_lenient() {
        let expected = Schema::new("public").table(
            "account",
            Table::new()
                .column("id", Column::new("int4"))
                .column("email", Column::new("varchar")),
        );
        let actual =
            Schema::new("public").table("account", Table::new().column("id", Column::new("int4")));
        assert_eq!(
            diff_schemas(&expected, &actual, false),
            vec!["column account.email is missing".to_string()]
        );
    }

    #[test]
    fn strict_mode_checks_column_attributes() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().column(
                "email",
                Column::new("varchar").char_length(255).not_null().unique(),
            ),
        );
        let actual = Schema::new("public").table(
            "account",
            Table::new().column("email", Column::new("varchar").char_length(100)),
        );

        // Lenient mode tolerates attribute drift as long as the type matches.
        assert!(diff_schemas(&expected, &actual, false).is_empty());

        assert_eq!(
            sorted(diff_schemas(&expected, &actual, true)),
            vec![
                "invalid column char length: account.email, expected 255, actual 100".to_string(),
                "invalid column not null: account.email, expected true, actual false".to_string(),
                "invalid column unique: account.email, expected true, actual false".to_string(),
            ]
        );
    }

    #[test]
    fn strict_mode_checks_num_precision() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().column("balance", Column::new("numeric").num_precision(12)),
        );
        let actual = Schema::new("public").table(
            "account",
            Table::new().column("balance", Column::new("numeric").num_precision(10)),
        );
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec!["invalid column num precision: account.balance, expected 12, actual 10".to_string()]
        );
    }

    #[test]
    fn index_column_sets_match_regardless_of_order() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["a", "b"])),
        );
        let actual = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["b", "a"])),
        );
        assert!(diff_schemas(&expected, &actual, true).is_empty());
    }

    #[test]
    fn index_missing_column_is_reported_per_column() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["a", "b"])),
        );
        let actual = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["a"])),
        );
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec!["invalid index account.account_idx, missing column: b".to_string()]
        );
    }

    #[test]
    fn index_extra_column_and_uniqueness_mismatch() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["a"]).unique()),
        );
        let actual = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["a", "c"])),
        );
        assert_eq!(
            sorted(diff_schemas(&expected, &actual, true)),
            vec![
                "invalid index account.account_idx, extra column: c".to_string(),
                "invalid index uniqueness: account.account_idx, expected true, actual false"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn indexes_are_ignored_when_lenient() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().index("account_idx", Index::new(["a"]).unique()),
        );
        let actual = Schema::new("public").table("account", Table::new());
        assert!(diff_schemas(&expected, &actual, false).is_empty());
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec!["index account.account_idx is missing".to_string()]
        );
    }

    #[test]
    fn foreign_key_wrong_mapping_names_both_targets() {
        let expected = Schema::new("public").table(
            "order",
            Table::new().foreign_key(
                "order_account_fkey",
                ForeignKey::new("account").column("account_id", "id"),
            ),
        );
        let actual = Schema::new("public").table(
            "order",
            Table::new().foreign_key(
                "order_account_fkey",
                ForeignKey::new("account").column("account_id", "legacy_id"),
            ),
        );
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec![
                "invalid foreign key order.order_account_fkey, wrong column mapping, \
                 expected: account_id => id, actual: account_id => legacy_id"
                    .to_string()
            ]
        );
    }

    #[test]
    fn foreign_key_missing_extra_and_wrong_table() {
        let expected = Schema::new("public").table(
            "order",
            Table::new().foreign_key(
                "order_account_fkey",
                ForeignKey::new("account")
                    .column("account_id", "id")
                    .column("region", "region"),
            ),
        );
        let actual = Schema::new("public").table(
            "order",
            Table::new().foreign_key(
                "order_account_fkey",
                ForeignKey::new("customer")
                    .column("account_id", "id")
                    .column("tenant", "tenant"),
            ),
        );
        assert_eq!(
            sorted(diff_schemas(&expected, &actual, true)),
            sorted(vec![
                "invalid foreign key table: order.order_account_fkey, expected account, actual customer"
                    .to_string(),
                "invalid foreign key order.order_account_fkey, missing column: region => region"
                    .to_string(),
                "invalid foreign key order.order_account_fkey, extra column: tenant => tenant"
                    .to_string(),
            ])
        );
    }

    #[test]
    fn foreign_keys_are_ignored_when_lenient() {
        let expected = Schema::new("public").table("order", order_table());
        let actual = Schema::new("public").table(
            "order",
            Table::new()
                .column("id", Column::new("int4").not_null())
                .column("account_id", Column::new("int4").not_null()),
        );
        assert!(diff_schemas(&expected, &actual, false).is_empty());
        assert_eq!(
            diff_schemas(&expected, &actual, true),
            vec!["foreign key order.order_account_fkey is missing".to_string()]
        );
    }

    #[test]
    fn whole_missing_and_unexpected_indexes_are_named() {
        let expected = Schema::new("public").table(
            "account",
            Table::new().index("wanted_idx", Index::new(["a"])),
        );
        let actual = Schema::new("public").table(
            "account",
            Table::new().index("stray_idx", Index::new(["a"])),
        );
        assert_eq!(
            sorted(diff_schemas(&expected, &actual, true)),
            vec![
                "Unexpected index: account.stray_idx".to_string(),
                "index account.wanted_idx is missing".to_string(),
            ]
        );
    }
}

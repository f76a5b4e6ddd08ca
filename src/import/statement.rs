//! SQL text for the load path.
//!
//! Every identifier reaching SQL passes through [`quote_ident`]; row data only
//! travels through COPY, never through statement text.

use super::catalog::TableRef;
use super::coerce::Value;
use std::fmt::Write;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn prefixed_list(prefix: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| format!("{prefix}.{}", quote_ident(column)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `COPY ... FROM STDIN` in text format for an already quoted relation.
pub fn copy_statement(relation: &str, columns: &[String]) -> String {
    format!("COPY {relation} ({}) FROM STDIN", column_list(columns))
}

/// Empty session-local table shaped like the mapped destination columns.
///
/// Dropped on commit; a rollback discards it too.
pub fn create_staging_statement(staging: &str, table: &TableRef, columns: &[String]) -> String {
    format!(
        "CREATE TEMPORARY TABLE {} ON COMMIT DROP AS SELECT {} FROM {} WITH NO DATA",
        quote_ident(staging),
        column_list(columns),
        table.quoted()
    )
}

pub fn drop_staging_statement(staging: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(staging))
}

/// Plain insert from staging, used when identity values must be forced.
pub fn insert_from_staging_statement(
    table: &TableRef,
    staging: &str,
    columns: &[String],
    overriding_system_value: bool,
) -> String {
    format!(
        "INSERT INTO {} ({}){} SELECT {} FROM {}",
        table.quoted(),
        column_list(columns),
        if overriding_system_value {
            " OVERRIDING SYSTEM VALUE"
        } else {
            ""
        },
        column_list(columns),
        quote_ident(staging)
    )
}

/// Moves the current maximum of an identity column into its sequence.
///
/// Binds: `$1` quoted table name, `$2` column name.
pub fn identity_resync_statement(table: &TableRef, column: &str) -> String {
    format!(
        "SELECT setval(pg_get_serial_sequence($1, $2), bounds.max_value) \
         FROM (SELECT MAX({}) AS max_value FROM {}) AS bounds \
         WHERE bounds.max_value IS NOT NULL",
        quote_ident(column),
        table.quoted()
    )
}

/// Key-matched merge from a staging table into the destination.
#[derive(Debug, Clone)]
pub struct MergeStatement<'a> {
    pub target: &'a TableRef,
    pub source: &'a str,
    pub columns: &'a [String],
    pub key_columns: &'a [String],
    pub overriding_system_value: bool,
}

impl MergeStatement<'_> {
    pub fn render(&self) -> String {
        let on = self
            .key_columns
            .iter()
            .map(|key| {
                let key = quote_ident(key);
                format!("target.{key} = source.{key}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        let updates = self
            .columns
            .iter()
            .filter(|column| !self.key_columns.contains(*column))
            .map(|column| {
                let column = quote_ident(column);
                format!("{column} = source.{column}")
            })
            .collect::<Vec<_>>();

        let mut sql = format!(
            "MERGE INTO {} AS target USING {} AS source ON {}",
            self.target.quoted(),
            quote_ident(self.source),
            on
        );

        if !updates.is_empty() {
            let _ = write!(sql, " WHEN MATCHED THEN UPDATE SET {}", updates.join(", "));
        }

        let _ = write!(
            sql,
            " WHEN NOT MATCHED THEN INSERT ({}){} VALUES ({})",
            column_list(self.columns),
            if self.overriding_system_value {
                " OVERRIDING SYSTEM VALUE"
            } else {
                ""
            },
            prefixed_list("source", self.columns)
        );

        sql
    }
}

/// Append one row in COPY text format (tab separated, newline terminated).
pub fn encode_copy_row(row: &[Value], out: &mut String) {
    for (index, value) in row.iter().enumerate() {
        if index > 0 {
            out.push('\t');
        }
        encode_copy_value(value, out);
    }
    out.push('\n');
}

fn encode_copy_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("\\N"),
        Value::Integer(int) => {
            let _ = write!(out, "{int}");
        }
        Value::Float { literal, .. } => escape_copy_text(literal, out),
        Value::Boolean(flag) => out.push(if *flag { 't' } else { 'f' }),
        Value::Timestamp(ts) => {
            let _ = write!(out, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f"));
        }
        Value::Text(text) | Value::Fallback(text) => escape_copy_text(text, out),
    }
}

fn escape_copy_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

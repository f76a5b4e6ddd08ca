//! Destination table discovery through `information_schema`.

use super::coerce::TypeClass;
use super::error::SchemaError;
use super::statement::quote_ident;
use serde::Serialize;
use sqlx::PgPool;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Upper bound for every catalog round trip.
pub const CATALOG_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_SCHEMA: &str = "public";

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table` or a bare `table` (schema `public`).
    ///
    /// Each part may be wrapped in double quotes. Only the first dot splits.
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let invalid = || SchemaError::InvalidTableName(raw.to_string());

        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (unquote(schema), unquote(name)),
            None => (DEFAULT_SCHEMA.to_string(), unquote(raw)),
        };

        if schema.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        Ok(Self { schema, name })
    }

    /// Quoted form safe to splice into SQL text.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn unquote(part: &str) -> String {
    let part = part.trim();
    match part
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => part.to_string(),
    }
}

/// One destination column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub ordinal: i32,
    pub is_identity: bool,
}

impl ColumnDescriptor {
    pub fn type_class(&self) -> TypeClass {
        TypeClass::of(&self.data_type)
    }
}

/// Read-only view of the destination database's schema.
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
    timeout: Duration,
}

impl Catalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: CATALOG_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Find the stored spelling of `table`.
    ///
    /// An exact match wins; otherwise the first case-insensitive match is used,
    /// so `dbo.Shipping` resolves to a table created unquoted as `dbo.shipping`.
    pub async fn resolve_table(&self, table: &TableRef) -> Result<TableRef, SchemaError> {
        let found: Option<(String, String)> = self
            .bounded(
                sqlx::query_as(
                    "SELECT table_schema::text, table_name::text
                     FROM information_schema.tables
                     WHERE lower(table_schema) = lower($1) AND lower(table_name) = lower($2)
                     ORDER BY (table_schema = $1 AND table_name = $2) DESC, table_schema, table_name
                     LIMIT 1",
                )
                .bind(&table.schema)
                .bind(&table.name)
                .fetch_optional(&self.pool),
            )
            .await?;

        found
            .map(|(schema, name)| TableRef { schema, name })
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))
    }

    /// Writable columns of `table` in ordinal order.
    ///
    /// Generated columns are left out since they cannot be loaded.
    pub async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnDescriptor>, SchemaError> {
        let rows: Vec<(String, String, bool, i32, bool)> = self
            .bounded(
                sqlx::query_as(
                    "SELECT column_name::text,
                            data_type::text,
                            (is_nullable = 'YES') AS nullable,
                            ordinal_position::int4,
                            (is_identity = 'YES') AS is_identity
                     FROM information_schema.columns
                     WHERE table_schema = $1 AND table_name = $2
                       AND is_generated <> 'ALWAYS'
                     ORDER BY ordinal_position",
                )
                .bind(&table.schema)
                .bind(&table.name)
                .fetch_all(&self.pool),
            )
            .await?;

        if rows.is_empty() {
            return Err(SchemaError::TableNotFound(table.to_string()));
        }

        log::debug!("catalog: {} has {} columns", table, rows.len());

        Ok(rows
            .into_iter()
            .map(
                |(name, data_type, nullable, ordinal, is_identity)| ColumnDescriptor {
                    name,
                    data_type,
                    nullable,
                    ordinal,
                    is_identity,
                },
            )
            .collect())
    }

    /// Primary key columns in key order. Empty when the table has no primary key.
    pub async fn key_columns(&self, table: &TableRef) -> Result<Vec<String>, SchemaError> {
        let rows: Vec<(String,)> = self
            .bounded(
                sqlx::query_as(
                    "SELECT kcu.column_name::text
                     FROM information_schema.table_constraints tc
                     JOIN information_schema.key_column_usage kcu
                       ON tc.constraint_name = kcu.constraint_name
                      AND tc.table_schema = kcu.table_schema
                      AND tc.table_name = kcu.table_name
                     WHERE tc.constraint_type = 'PRIMARY KEY'
                       AND tc.table_schema = $1
                       AND tc.table_name = $2
                     ORDER BY kcu.ordinal_position",
                )
                .bind(&table.schema)
                .bind(&table.name)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Every user table, ordered by schema then name.
    pub async fn list_tables(&self) -> Result<Vec<TableRef>, SchemaError> {
        let rows: Vec<(String, String)> = self
            .bounded(
                sqlx::query_as(
                    "SELECT table_schema::text, table_name::text
                     FROM information_schema.tables
                     WHERE table_type = 'BASE TABLE'
                       AND table_schema NOT IN ('pg_catalog', 'information_schema')
                     ORDER BY table_schema, table_name",
                )
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(schema, name)| TableRef { schema, name })
            .collect())
    }

    async fn bounded<T, F>(&self, query: F) -> Result<T, SchemaError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, query).await {
            Ok(result) => result.map_err(SchemaError::from),
            Err(_) => Err(SchemaError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_qualified_name() {
        let table = TableRef::parse("dbo.Shipping").unwrap();
        assert_eq!(table, TableRef::new("dbo", "Shipping"));
        assert_eq!(table.to_string(), "dbo.Shipping");
    }

    #[test]
    fn parse_bare_name_defaults_to_public() {
        let table = TableRef::parse("orders").unwrap();
        assert_eq!(table.schema, "public");
        assert_eq!(table.name, "orders");
    }

    #[test]
    fn parse_splits_on_first_dot_only() {
        let table = TableRef::parse("sales.order.lines").unwrap();
        assert_eq!(table.schema, "sales");
        assert_eq!(table.name, "order.lines");
    }

    #[test]
    fn parse_strips_identifier_quotes() {
        let table = TableRef::parse("\"Sales\".\"Order \"\"Lines\"\"\"").unwrap();
        assert_eq!(table.schema, "Sales");
        assert_eq!(table.name, "Order \"Lines\"");
    }

    #[test]
    fn parse_rejects_empty_parts() {
        for raw in ["", ".orders", "sales.", "  .  "] {
            assert!(
                matches!(TableRef::parse(raw), Err(SchemaError::InvalidTableName(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn quoted_escapes_embedded_quotes() {
        let table = TableRef::new("public", "we\"ird");
        assert_eq!(table.quoted(), "\"public\".\"we\"\"ird\"");
    }

    #[test]
    fn descriptor_classifies_declared_type() {
        let column = ColumnDescriptor {
            name: "created".to_string(),
            data_type: "timestamp without time zone".to_string(),
            nullable: true,
            ordinal: 3,
            is_identity: false,
        };
        assert_eq!(column.type_class(), TypeClass::Temporal);
    }
}

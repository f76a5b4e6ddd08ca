//! Pairing of source headers with destination columns.

use super::catalog::ColumnDescriptor;
use super::coerce::TypeClass;
use super::error::MappingError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A source column position bound to the destination column it feeds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMapping {
    pub source_index: usize,
    pub source_name: String,
    pub column: ColumnDescriptor,
    pub type_class: TypeClass,
}

impl ColumnMapping {
    pub fn new(source_index: usize, source_name: String, column: ColumnDescriptor) -> Self {
        let type_class = column.type_class();
        Self {
            source_index,
            source_name,
            column,
            type_class,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapOutcome {
    /// In source header order.
    pub mapped: Vec<ColumnMapping>,
    /// Source headers with no destination column, as written in the source.
    pub skipped: Vec<String>,
    /// Non-nullable destination columns no header covers, in ordinal order.
    pub unmatched_required: Vec<String>,
}

impl MapOutcome {
    /// Destination column names in write order.
    pub fn destination_columns(&self) -> Vec<String> {
        self.mapped
            .iter()
            .map(|mapping| mapping.column.name.clone())
            .collect()
    }

    /// Destination columns fed by more than one source header.
    pub fn duplicate_targets(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();

        for mapping in &self.mapped {
            let name = mapping.column.name.as_str();
            if !seen.insert(name) && reported.insert(name) {
                duplicates.push(name.to_string());
            }
        }

        duplicates
    }

    /// Return the key columns (as spelled in the destination) or fail naming
    /// the ones no source header feeds.
    pub fn resolve_keys(&self, keys: &[String]) -> Result<Vec<String>, MappingError> {
        let mut resolved = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();

        for key in keys {
            let wanted = normalize(key);
            match self
                .mapped
                .iter()
                .find(|mapping| normalize(&mapping.column.name) == wanted)
            {
                Some(mapping) => resolved.push(mapping.column.name.clone()),
                None => missing.push(key.clone()),
            }
        }

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(MappingError::KeyNotMapped { columns: missing })
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Match source headers to destination columns by case-insensitive name.
///
/// Headers without a destination column are skipped. A non-nullable column
/// without a header fails the mapping; the error carries the full outcome.
pub fn map_columns(
    headers: &[String],
    columns: &[ColumnDescriptor],
) -> Result<MapOutcome, MappingError> {
    let lookup: HashMap<String, &ColumnDescriptor> = columns
        .iter()
        .map(|column| (normalize(&column.name), column))
        .collect();

    let mut outcome = MapOutcome::default();
    let mut covered = HashSet::new();

    for (index, header) in headers.iter().enumerate() {
        let key = normalize(header);
        match lookup.get(&key) {
            Some(column) => {
                outcome
                    .mapped
                    .push(ColumnMapping::new(index, header.clone(), (*column).clone()));
                covered.insert(key);
            }
            None => outcome.skipped.push(header.clone()),
        }
    }

    outcome.unmatched_required = columns
        .iter()
        .filter(|column| !column.nullable && !covered.contains(&normalize(&column.name)))
        .map(|column| column.name.clone())
        .collect();

    if !outcome.unmatched_required.is_empty() {
        return Err(MappingError::UnmatchedRequired {
            columns: outcome.unmatched_required.clone(),
            outcome: Box::new(outcome),
        });
    }

    if outcome.mapped.is_empty() {
        return Err(MappingError::NoMappedColumns);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, nullable: bool, ordinal: i32) -> ColumnDescriptor {
        ColumnDescriptor {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable,
            ordinal,
            is_identity: false,
        }
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn maps_case_insensitively_and_skips_unknown_headers() {
        let columns = vec![column("ID", false, 1), column("NAME", false, 2)];
        let outcome = map_columns(&headers(&["id", "Name", "extra"]), &columns).unwrap();

        let pairs: Vec<(usize, &str)> = outcome
            .mapped
            .iter()
            .map(|m| (m.source_index, m.column.name.as_str()))
            .collect();
        assert_eq!(pairs, vec![(0, "ID"), (1, "NAME")]);
        assert_eq!(outcome.skipped, vec!["extra".to_string()]);
        assert!(outcome.unmatched_required.is_empty());
        assert_eq!(outcome.destination_columns(), vec!["ID", "NAME"]);
    }

    #[test]
    fn headers_are_trimmed_before_lookup() {
        let columns = vec![column("sku", false, 1)];
        let outcome = map_columns(&headers(&["  SKU "]), &columns).unwrap();

        assert_eq!(outcome.mapped[0].source_name, "  SKU ");
        assert_eq!(outcome.mapped[0].column.name, "sku");
    }

    #[test]
    fn missing_required_column_fails_with_outcome() {
        let columns = vec![
            column("ID", false, 1),
            column("NOTES", true, 2),
            column("CREATED", false, 3),
        ];

        let err = map_columns(&headers(&["id", "bogus"]), &columns).unwrap_err();

        match err {
            MappingError::UnmatchedRequired { columns, outcome } => {
                assert_eq!(columns, vec!["CREATED".to_string()]);
                assert_eq!(outcome.skipped, vec!["bogus".to_string()]);
                assert_eq!(outcome.mapped.len(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn nullable_columns_may_be_absent() {
        let columns = vec![column("ID", false, 1), column("NOTES", true, 2)];
        let outcome = map_columns(&headers(&["ID"]), &columns).unwrap();
        assert_eq!(outcome.mapped.len(), 1);
    }

    #[test]
    fn no_overlap_is_rejected() {
        let columns = vec![column("NOTES", true, 1)];
        assert!(matches!(
            map_columns(&headers(&["other"]), &columns),
            Err(MappingError::NoMappedColumns)
        ));
    }

    #[test]
    fn duplicate_headers_keep_both_mappings() {
        let columns = vec![column("code", false, 1)];
        let outcome = map_columns(&headers(&["CODE", "code", "Code"]), &columns).unwrap();

        assert_eq!(outcome.mapped.len(), 3);
        assert_eq!(outcome.duplicate_targets(), vec!["code".to_string()]);
    }

    #[test]
    fn resolve_keys_uses_destination_spelling() {
        let columns = vec![column("OrderId", false, 1), column("Qty", true, 2)];
        let outcome = map_columns(&headers(&["orderid", "qty"]), &columns).unwrap();

        assert_eq!(
            outcome.resolve_keys(&["ORDERID".to_string()]).unwrap(),
            vec!["OrderId".to_string()]
        );

        match outcome.resolve_keys(&["LineNo".to_string()]) {
            Err(MappingError::KeyNotMapped { columns }) => {
                assert_eq!(columns, vec!["LineNo".to_string()])
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

use super::keys::compare_op_name;
use crate::filter::ComparisonOp;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Server-side row filter.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnFilter {
    /// Every inner filter must pass.
    All(Vec<ColumnFilter>),
    /// Compare one cell's bytes against `value`. Rows without the column pass
    /// unless `filter_if_missing`.
    SingleColumnValue {
        column: String,
        op: ComparisonOp,
        value: Vec<u8>,
        filter_if_missing: bool,
    },
    /// Row key must match the regex.
    RowRegex(String),
}

impl ColumnFilter {
    /// Combine filters, flattening the trivial cases.
    pub fn all(mut filters: Vec<ColumnFilter>) -> Option<ColumnFilter> {
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(ColumnFilter::All(filters)),
        }
    }

    pub fn matches(&self, row_key: &str, cells: &BTreeMap<String, Vec<u8>>) -> bool {
        match self {
            ColumnFilter::All(inner) => inner.iter().all(|f| f.matches(row_key, cells)),
            ColumnFilter::SingleColumnValue {
                column,
                op,
                value,
                filter_if_missing,
            } => match cells.get(column) {
                Some(actual) => op.matches(actual.as_slice().cmp(value.as_slice())),
                None => !filter_if_missing,
            },
            ColumnFilter::RowRegex(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(row_key))
                .unwrap_or(false),
        }
    }

    /// JSON filter document understood by the HBase REST gateway.
    pub fn to_rest_json(&self) -> Value {
        match self {
            ColumnFilter::All(inner) => json!({
                "type": "FilterList",
                "op": "MUST_PASS_ALL",
                "filters": inner.iter().map(ColumnFilter::to_rest_json).collect::<Vec<_>>(),
            }),
            ColumnFilter::SingleColumnValue {
                column,
                op,
                value,
                filter_if_missing,
            } => {
                let (family, qualifier) = column.split_once(':').unwrap_or((column, ""));
                json!({
                    "type": "SingleColumnValueFilter",
                    "op": compare_op_name(*op),
                    "family": STANDARD.encode(family),
                    "qualifier": STANDARD.encode(qualifier),
                    "latestVersion": true,
                    "ifMissing": filter_if_missing,
                    "comparator": {
                        "type": "BinaryComparator",
                        "value": STANDARD.encode(value),
                    },
                })
            }
            ColumnFilter::RowRegex(pattern) => json!({
                "type": "RowFilter",
                "op": "EQUAL",
                "comparator": {
                    "type": "RegexStringComparator",
                    "value": pattern,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn missing_columns_follow_filter_if_missing() {
        let scoped = ColumnFilter::SingleColumnValue {
            column: "f:project_id:1".into(),
            op: ComparisonOp::Eq,
            value: b"a".to_vec(),
            filter_if_missing: false,
        };
        assert!(scoped.matches("k", &cells(&[])));
        assert!(scoped.matches("k", &cells(&[("f:project_id:1", b"a")])));
        assert!(!scoped.matches("k", &cells(&[("f:project_id:1", b"b")])));

        let strict = ColumnFilter::SingleColumnValue {
            column: "f:trait_A:1".into(),
            op: ComparisonOp::Ne,
            value: b"x".to_vec(),
            filter_if_missing: true,
        };
        assert!(!strict.matches("k", &cells(&[])));
    }

    #[test]
    fn rest_json_uses_hbase_names() {
        let filter = ColumnFilter::all(vec![
            ColumnFilter::RowRegex("^x$".into()),
            ColumnFilter::SingleColumnValue {
                column: "f:event_type".into(),
                op: ComparisonOp::Ge,
                value: b"Foo".to_vec(),
                filter_if_missing: true,
            },
        ])
        .unwrap();
        let doc = filter.to_rest_json();
        assert_eq!(doc["type"], "FilterList");
        assert_eq!(doc["filters"][1]["op"], "GREATER_OR_EQUAL");
        assert_eq!(doc["filters"][1]["ifMissing"], true);
        assert_eq!(doc["filters"][1]["family"], STANDARD.encode("f"));
    }
}

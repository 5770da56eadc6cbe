//! EventFilter to row-range scan translation.

use super::filter::ColumnFilter;
use super::keys::{
    encode_timestamp, encode_value, key_space_op, message_id_regex, trait_column, COL_EVENT_TYPE,
};
use crate::filter::{ComparisonOp, EventFilter};
use crate::model::TraitType;
use crate::StorageResult;
use chrono::{DateTime, Utc};

/// A bounded row scan. `row_stop` is exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSpec {
    pub row_start: Option<String>,
    pub row_stop: Option<String>,
    pub filter: Option<ColumnFilter>,
}

impl ScanSpec {
    pub fn contains_key(&self, key: &str) -> bool {
        self.row_start.as_deref().map_or(true, |s| key >= s)
            && self.row_stop.as_deref().map_or(true, |s| key < s)
    }

    /// Skip every key before `key`, keeping a later start if one is set.
    pub fn start_at(&mut self, key: String) {
        self.tighten(RowBound::Start(key));
    }

    /// Continue a paged scan after `last_key`. `\0` is the smallest suffix,
    /// so the next scan begins at the key right after it.
    pub fn resume_after(&mut self, last_key: &str) {
        self.row_start = Some(format!("{last_key}\0"));
    }

    fn tighten(&mut self, bound: RowBound) {
        match bound {
            RowBound::Start(s) => {
                if self.row_start.as_ref().map_or(true, |cur| &s > cur) {
                    self.row_start = Some(s);
                }
            }
            RowBound::Stop(s) => {
                if self.row_stop.as_ref().map_or(true, |cur| &s < cur) {
                    self.row_stop = Some(s);
                }
            }
        }
    }
}

enum RowBound {
    Start(String),
    Stop(String),
}

/// Turn `generated {op} ts` into a key range bound. Keys are `{ts}:{id}`, and
/// `;` sorts right after `:`, so `{ts};` bounds every key carrying `ts`.
fn timestamp_bound(ts: DateTime<Utc>, op: ComparisonOp, reverse: bool) -> StorageResult<RowBound> {
    let encoded = encode_timestamp(ts, reverse)?;
    Ok(match key_space_op(op, reverse) {
        ComparisonOp::Ge => RowBound::Start(encoded),
        ComparisonOp::Gt => RowBound::Start(format!("{encoded};")),
        ComparisonOp::Le => RowBound::Stop(format!("{encoded};")),
        // `Lt`; eq/ne never reach here after validation.
        _ => RowBound::Stop(encoded),
    })
}

/// Build the scan answering `filter` against a table keyed in `reverse` order.
pub fn make_scan(filter: &EventFilter, reverse: bool) -> StorageResult<ScanSpec> {
    filter.validate()?;
    let mut spec = ScanSpec::default();

    if let Some(start) = filter.start_timestamp {
        spec.tighten(timestamp_bound(start, filter.start_timestamp_op, reverse)?);
    }
    if let Some(end) = filter.end_timestamp {
        spec.tighten(timestamp_bound(end, filter.end_timestamp_op, reverse)?);
    }

    let mut filters = Vec::new();
    if let Some(message_id) = &filter.message_id {
        filters.push(ColumnFilter::RowRegex(message_id_regex(message_id)));
    }
    if let Some(event_type) = &filter.event_type {
        filters.push(ColumnFilter::SingleColumnValue {
            column: COL_EVENT_TYPE.to_string(),
            op: ComparisonOp::Eq,
            value: event_type.as_bytes().to_vec(),
            filter_if_missing: true,
        });
    }
    for clause in &filter.traits_filter {
        filters.push(ColumnFilter::SingleColumnValue {
            column: trait_column(&clause.key, clause.dtype()),
            op: clause.op,
            value: encode_value(&clause.value),
            filter_if_missing: true,
        });
    }
    if let Some(project) = &filter.admin_proj {
        filters.push(ColumnFilter::SingleColumnValue {
            column: trait_column("project_id", TraitType::Text),
            op: ComparisonOp::Eq,
            value: project.as_bytes().to_vec(),
            filter_if_missing: false,
        });
    }
    spec.filter = ColumnFilter::all(filters);
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TraitFilter;
    use crate::hbase::keys::row_key;
    use crate::model::TraitValue;
    use chrono::{Duration, TimeZone};

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 12, 31, 5, 0, 0).unwrap() + Duration::hours(h)
    }

    fn hours_in_range(spec: &ScanSpec, reverse: bool) -> Vec<i64> {
        (0..6)
            .filter(|h| spec.contains_key(&row_key(hour(*h), "id", reverse).unwrap()))
            .collect()
    }

    #[test]
    fn bounds_agree_in_both_key_orders() {
        let cases = [
            (ComparisonOp::Ge, ComparisonOp::Lt, vec![1, 2, 3]),
            (ComparisonOp::Gt, ComparisonOp::Lt, vec![2, 3]),
            (ComparisonOp::Ge, ComparisonOp::Le, vec![1, 2, 3, 4]),
            (ComparisonOp::Gt, ComparisonOp::Le, vec![2, 3, 4]),
        ];
        for (start_op, end_op, expected) in cases {
            let filter = EventFilter::new().start(hour(1), start_op).end(hour(4), end_op);
            for reverse in [false, true] {
                let spec = make_scan(&filter, reverse).unwrap();
                assert_eq!(
                    hours_in_range(&spec, reverse),
                    expected,
                    "{start_op}/{end_op} reverse={reverse}"
                );
            }
        }
    }

    #[test]
    fn resuming_skips_exactly_the_last_key() {
        let last = row_key(hour(2), "b", false).unwrap();
        let tied = row_key(hour(2), "c", false).unwrap();
        let mut spec = make_scan(&EventFilter::new().end(hour(4), ComparisonOp::Lt), false).unwrap();
        spec.resume_after(&last);
        assert!(!spec.contains_key(&last));
        assert!(spec.contains_key(&tied));
        assert!(spec.contains_key(&row_key(hour(3), "a", false).unwrap()));

        let mut spec = make_scan(&EventFilter::new().start(hour(3), ComparisonOp::Ge), false).unwrap();
        spec.start_at(row_key(hour(1), "a", false).unwrap());
        assert_eq!(hours_in_range(&spec, false), vec![3, 4, 5]);
    }

    #[test]
    fn unbounded_filter_scans_everything() {
        let spec = make_scan(&EventFilter::new(), true).unwrap();
        assert_eq!(spec, ScanSpec::default());
    }

    #[test]
    fn trait_and_scope_clauses_become_column_filters() {
        let filter = EventFilter::new()
            .trait_filter(TraitFilter::new("trait_B", TraitValue::Int(101)).with_op(ComparisonOp::Le))
            .admin_proj("p1");
        let Some(ColumnFilter::All(filters)) = make_scan(&filter, false).unwrap().filter else {
            panic!("expected a filter list");
        };
        assert_eq!(filters.len(), 2);
        assert!(matches!(
            &filters[0],
            ColumnFilter::SingleColumnValue { column, op: ComparisonOp::Le, filter_if_missing: true, .. }
                if column == "f:trait_B:2"
        ));
        assert!(matches!(
            &filters[1],
            ColumnFilter::SingleColumnValue { filter_if_missing: false, .. }
        ));
    }
}

//! EventFilter to SQL translation.

use super::dialect::{Dialect, SqlBuilder, SqlParam};
use super::schema::trait_table;
use crate::filter::{ComparisonOp, EventFilter};
use crate::model::TraitValue;
use crate::pagination::{SortDir, SortKey, SortSpec};
use crate::{StorageError, StorageResult};
use chrono::{DateTime, Utc};

/// Keyset position of the last event already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub generated: i64,
    pub message_id: String,
}

pub fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub fn from_micros(micros: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp {micros} is out of range")))
}

fn sql_op(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "=",
        ComparisonOp::Ne => "<>",
        ComparisonOp::Lt => "<",
        ComparisonOp::Le => "<=",
        ComparisonOp::Gt => ">",
        ComparisonOp::Ge => ">=",
    }
}

pub fn value_param(value: &TraitValue) -> SqlParam {
    match value {
        TraitValue::None => SqlParam::NullText,
        TraitValue::Text(s) => SqlParam::Text(s.clone()),
        TraitValue::Int(i) => SqlParam::Int(*i),
        TraitValue::Float(f) => SqlParam::Float(*f),
        TraitValue::Datetime(dt) => SqlParam::Int(to_micros(*dt)),
    }
}

fn sort_column(key: SortKey) -> &'static str {
    match key {
        SortKey::Generated => "e.generated",
        SortKey::MessageId => "e.message_id",
    }
}

fn marker_param(key: SortKey, marker: &Marker) -> SqlParam {
    match key {
        SortKey::Generated => SqlParam::Int(marker.generated),
        SortKey::MessageId => SqlParam::Text(marker.message_id.clone()),
    }
}

/// `SELECT e.id, e.message_id, e.generated, e.raw, et.name` for every event
/// matching `filter`, ordered by `sort` and starting after `marker`.
///
/// Each trait clause is its own semi-join against the trait table for its
/// dtype, so repeated clauses on one trait name stay independent.
pub fn select_events(
    dialect: Dialect,
    filter: &EventFilter,
    sort: &[SortSpec],
    marker: Option<&Marker>,
    limit: Option<usize>,
) -> StorageResult<SqlBuilder> {
    filter.validate()?;
    let mut q = SqlBuilder::new(dialect);
    q.push(
        "SELECT e.id, e.message_id, e.generated, e.raw, et.name \
         FROM event e JOIN event_type et ON et.id = e.event_type_id WHERE 1 = 1",
    );

    if let Some(event_type) = &filter.event_type {
        q.push(" AND et.name = ").bind(event_type.as_str());
    }
    if let Some(message_id) = &filter.message_id {
        q.push(" AND e.message_id = ").bind(message_id.as_str());
    }
    if let Some(start) = filter.start_timestamp {
        q.push(&format!(" AND e.generated {} ", sql_op(filter.start_timestamp_op)))
            .bind(to_micros(start));
    }
    if let Some(end) = filter.end_timestamp {
        q.push(&format!(" AND e.generated {} ", sql_op(filter.end_timestamp_op)))
            .bind(to_micros(end));
    }

    for (n, clause) in filter.traits_filter.iter().enumerate() {
        let table = trait_table(clause.dtype());
        q.push(&format!(
            " AND EXISTS (SELECT 1 FROM {table} t{n} WHERE t{n}.event_id = e.id AND t{n}.name = "
        ))
        .bind(clause.key.as_str())
        .push(&format!(" AND t{n}.value {} ", sql_op(clause.op)))
        .bind(value_param(&clause.value))
        .push(")");
    }

    if let Some(project) = &filter.admin_proj {
        q.push(
            " AND (NOT EXISTS (SELECT 1 FROM trait_text p WHERE p.event_id = e.id \
             AND p.name = 'project_id') \
             OR EXISTS (SELECT 1 FROM trait_text p WHERE p.event_id = e.id \
             AND p.name = 'project_id' AND p.value = ",
        )
        .bind(project.as_str())
        .push("))");
    }

    if let Some(marker) = marker {
        q.push(" AND (");
        for i in 0..sort.len() {
            if i > 0 {
                q.push(" OR ");
            }
            q.push("(");
            for prefix in &sort[..i] {
                q.push(&format!("{} = ", sort_column(prefix.key)))
                    .bind(marker_param(prefix.key, marker))
                    .push(" AND ");
            }
            let spec = sort[i];
            let op = match spec.dir {
                SortDir::Asc => ">",
                SortDir::Desc => "<",
            };
            q.push(&format!("{} {op} ", sort_column(spec.key)))
                .bind(marker_param(spec.key, marker))
                .push(")");
        }
        q.push(")");
    }

    q.push(" ORDER BY ");
    let order = sort
        .iter()
        .map(|s| {
            let dir = match s.dir {
                SortDir::Asc => "ASC",
                SortDir::Desc => "DESC",
            };
            format!("{} {dir}", sort_column(s.key))
        })
        .collect::<Vec<_>>()
        .join(", ");
    q.push(&order);

    if let Some(limit) = limit {
        q.push(&format!(" LIMIT {limit}"));
    }
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TraitFilter;
    use crate::pagination::DEFAULT_SORT;

    #[test]
    fn unfiltered_query_matches_everything() {
        let q = select_events(Dialect::Sqlite, &EventFilter::new(), &DEFAULT_SORT, None, None).unwrap();
        assert!(q.params().is_empty());
        assert!(q.sql().ends_with("ORDER BY e.generated ASC, e.message_id ASC"));
    }

    #[test]
    fn trait_clauses_are_independent_semi_joins() {
        let filter = EventFilter::new()
            .trait_filter(TraitFilter::new("trait_B", TraitValue::Int(100)).with_op(ComparisonOp::Gt))
            .trait_filter(TraitFilter::new("trait_B", TraitValue::Int(400)).with_op(ComparisonOp::Lt));
        let q = select_events(Dialect::Postgres, &filter, &DEFAULT_SORT, None, Some(10)).unwrap();
        assert!(q.sql().contains("FROM trait_int t0 WHERE t0.event_id = e.id AND t0.name = $1 AND t0.value > $2"));
        assert!(q.sql().contains("FROM trait_int t1 WHERE t1.event_id = e.id AND t1.name = $3 AND t1.value < $4"));
        assert!(q.sql().ends_with("LIMIT 10"));
        assert_eq!(q.params()[1], SqlParam::Int(100));
    }

    #[test]
    fn marker_expands_to_keyset_predicate() {
        let marker = Marker {
            generated: 42,
            message_id: "id_Foo_0".into(),
        };
        let q = select_events(Dialect::Sqlite, &EventFilter::new(), &DEFAULT_SORT, Some(&marker), None).unwrap();
        assert!(q
            .sql()
            .contains("AND ((e.generated > ?) OR (e.generated = ? AND e.message_id > ?))"));
        assert_eq!(
            q.params(),
            &[
                SqlParam::Int(42),
                SqlParam::Int(42),
                SqlParam::Text("id_Foo_0".into())
            ]
        );
    }

    #[test]
    fn invalid_filters_are_rejected_before_sql() {
        let filter = EventFilter::new().start(Utc::now(), ComparisonOp::Eq);
        assert!(matches!(
            select_events(Dialect::Sqlite, &filter, &DEFAULT_SORT, None, None),
            Err(StorageError::InvalidQuery(_))
        ));
    }
}

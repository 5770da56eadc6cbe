//! EventFilter to query-document translation.

use crate::filter::{ComparisonOp, EventFilter};
use crate::model::{Event, TraitValue};
use crate::pagination::{SortDir, SortKey, SortSpec};
use crate::StorageResult;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};

fn operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "$eq",
        ComparisonOp::Ne => "$ne",
        ComparisonOp::Lt => "$lt",
        ComparisonOp::Le => "$lte",
        ComparisonOp::Gt => "$gt",
        ComparisonOp::Ge => "$gte",
    }
}

fn field(key: SortKey) -> &'static str {
    match key {
        SortKey::Generated => "generated_us",
        SortKey::MessageId => "_id",
    }
}

/// Microsecond timestamp stored beside the millisecond BSON date.
pub(crate) fn micros(dt: DateTime<Utc>) -> Bson {
    Bson::Int64(dt.timestamp_micros())
}

pub fn value_to_bson(value: &TraitValue) -> Bson {
    match value {
        TraitValue::None => Bson::Null,
        TraitValue::Text(s) => Bson::String(s.clone()),
        TraitValue::Int(i) => Bson::Int64(*i),
        TraitValue::Float(f) => Bson::Double(*f),
        TraitValue::Datetime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
    }
}

/// Predicate for `filter`, AND-ed with an optional keyset clause.
pub fn make_query(filter: &EventFilter, keyset: Option<Document>) -> StorageResult<Document> {
    filter.validate()?;
    let mut clauses = Vec::new();

    let mut range = Document::new();
    if let Some(start) = filter.start_timestamp {
        range.insert(operator(filter.start_timestamp_op), micros(start));
    }
    if let Some(end) = filter.end_timestamp {
        range.insert(operator(filter.end_timestamp_op), micros(end));
    }
    if !range.is_empty() {
        clauses.push(doc! { field(SortKey::Generated): range });
    }
    if let Some(event_type) = &filter.event_type {
        clauses.push(doc! { "event_type": event_type.as_str() });
    }
    if let Some(message_id) = &filter.message_id {
        clauses.push(doc! { "_id": message_id.as_str() });
    }
    for clause in &filter.traits_filter {
        let value = value_to_bson(&clause.value);
        let value = match clause.op {
            ComparisonOp::Eq => value,
            op => Bson::Document(doc! { operator(op): value }),
        };
        clauses.push(doc! {
            "traits": { "$elemMatch": {
                "trait_name": clause.key.as_str(),
                "trait_type": i32::from(clause.dtype().ordinal()),
                "trait_value": value,
            }}
        });
    }
    if let Some(project) = &filter.admin_proj {
        clauses.push(doc! { "$or": [
            { "traits": { "$not": { "$elemMatch": { "trait_name": "project_id" } } } },
            { "traits": { "$elemMatch": { "trait_name": "project_id", "trait_value": project.as_str() } } },
        ]});
    }
    clauses.extend(keyset);

    Ok(match clauses.len() {
        0 => Document::new(),
        _ => doc! { "$and": clauses },
    })
}

pub fn make_sort(sort: &[SortSpec]) -> Document {
    sort.iter()
        .map(|s| {
            let dir = match s.dir {
                SortDir::Asc => 1,
                SortDir::Desc => -1,
            };
            (field(s.key).to_string(), Bson::Int32(dir))
        })
        .collect()
}

/// Documents strictly after `marker` in `sort` order.
pub fn keyset_clause(marker: &Event, sort: &[SortSpec]) -> Document {
    let value = |key: SortKey| match key {
        SortKey::Generated => micros(marker.generated),
        SortKey::MessageId => Bson::String(marker.message_id.clone()),
    };
    let branches: Vec<Document> = (0..sort.len())
        .map(|i| {
            let mut branch = Document::new();
            for tied in &sort[..i] {
                branch.insert(field(tied.key), value(tied.key));
            }
            let op = match sort[i].dir {
                SortDir::Asc => "$gt",
                SortDir::Desc => "$lt",
            };
            branch.insert(field(sort[i].key), doc! { op: value(sort[i].key) });
            branch
        })
        .collect();
    doc! { "$or": branches }
}

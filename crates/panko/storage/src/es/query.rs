//! EventFilter to query DSL translation.
//!
//! Every clause lands in a `bool.filter`, so nothing is scored. Trait clauses
//! are `nested` queries over the `traits` array, matching name, dtype and
//! value on the same element.

use crate::filter::{ComparisonOp, EventFilter, TraitFilter};
use crate::model::{Event, TraitType, TraitValue};
use crate::pagination::{SortDir, SortKey, SortSpec};
use crate::{StorageError, StorageResult};
use serde_json::{json, Value};

pub const FIELD_MESSAGE_ID: &str = "message_id";
pub const FIELD_EVENT_TYPE: &str = "event_type";
pub const FIELD_GENERATED: &str = "generated_us";
pub const TRAITS_PATH: &str = "traits";

fn field(key: SortKey) -> &'static str {
    match key {
        SortKey::Generated => FIELD_GENERATED,
        SortKey::MessageId => FIELD_MESSAGE_ID,
    }
}

fn range_op(op: ComparisonOp) -> Option<&'static str> {
    match op {
        ComparisonOp::Lt => Some("lt"),
        ComparisonOp::Le => Some("lte"),
        ComparisonOp::Gt => Some("gt"),
        ComparisonOp::Ge => Some("gte"),
        ComparisonOp::Eq | ComparisonOp::Ne => None,
    }
}

/// Trait sub-field holding values of `dtype`. `None` traits carry no value.
pub fn trait_value_field(dtype: TraitType) -> Option<&'static str> {
    match dtype {
        TraitType::None => None,
        TraitType::Text => Some("text"),
        TraitType::Int => Some("int"),
        TraitType::Float => Some("float"),
        TraitType::Datetime => Some("datetime"),
    }
}

/// JSON form of a trait value as indexed. Datetimes are microseconds since
/// the epoch so range queries keep full precision.
pub fn value_to_json(value: &TraitValue) -> StorageResult<Value> {
    Ok(match value {
        TraitValue::None => Value::Null,
        TraitValue::Text(s) => json!(s),
        TraitValue::Int(i) => json!(i),
        TraitValue::Float(f) if f.is_finite() => json!(f),
        TraitValue::Float(f) => {
            return Err(StorageError::InvalidInput(format!(
                "float {f} cannot be indexed"
            )))
        }
        TraitValue::Datetime(dt) => json!(dt.timestamp_micros()),
    })
}

fn trait_clause(clause: &TraitFilter) -> StorageResult<Value> {
    let dtype = clause.dtype();
    let Some(value_field) = trait_value_field(dtype) else {
        return Err(StorageError::InvalidQuery(format!(
            "trait filter `{}` carries no value",
            clause.key
        )));
    };
    let value_field = format!("{TRAITS_PATH}.{value_field}");
    let value = value_to_json(&clause.value).map_err(|e| StorageError::InvalidQuery(e.to_string()))?;

    let mut inner = json!({
        "filter": [
            { "term": { "traits.name": clause.key } },
            { "term": { "traits.dtype": dtype.ordinal() } },
        ]
    });
    let value_clause = match range_op(clause.op) {
        Some(op) => json!({ "range": { value_field: { op: value } } }),
        None => json!({ "term": { value_field: value } }),
    };
    match clause.op {
        ComparisonOp::Ne => inner["must_not"] = json!([value_clause]),
        _ => {
            if let Some(filters) = inner["filter"].as_array_mut() {
                filters.push(value_clause);
            }
        }
    }
    Ok(nested(json!({ "bool": inner })))
}

fn nested(query: Value) -> Value {
    json!({ "nested": { "path": TRAITS_PATH, "query": query } })
}

/// Events with no `project_id` trait, or one equal to `project`.
fn project_scope(project: &str) -> Value {
    let named = json!({ "term": { "traits.name": "project_id" } });
    json!({
        "bool": {
            "should": [
                { "bool": { "must_not": [nested(named.clone())] } },
                nested(json!({ "bool": { "filter": [
                    named,
                    { "term": { "traits.text": project } },
                ]}})),
            ],
            "minimum_should_match": 1,
        }
    })
}

/// Query answering `filter`.
pub fn make_query(filter: &EventFilter) -> StorageResult<Value> {
    filter.validate()?;
    let mut clauses = Vec::new();

    let mut range = serde_json::Map::new();
    if let Some(start) = filter.start_timestamp {
        if let Some(op) = range_op(filter.start_timestamp_op) {
            range.insert(op.to_string(), json!(start.timestamp_micros()));
        }
    }
    if let Some(end) = filter.end_timestamp {
        if let Some(op) = range_op(filter.end_timestamp_op) {
            range.insert(op.to_string(), json!(end.timestamp_micros()));
        }
    }
    if !range.is_empty() {
        clauses.push(json!({ "range": { FIELD_GENERATED: range } }));
    }
    if let Some(event_type) = &filter.event_type {
        clauses.push(json!({ "term": { FIELD_EVENT_TYPE: event_type } }));
    }
    if let Some(message_id) = &filter.message_id {
        clauses.push(json!({ "term": { FIELD_MESSAGE_ID: message_id } }));
    }
    for clause in &filter.traits_filter {
        clauses.push(trait_clause(clause)?);
    }
    if let Some(project) = &filter.admin_proj {
        clauses.push(project_scope(project));
    }

    Ok(if clauses.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "filter": clauses } })
    })
}

pub fn make_sort(sort: &[SortSpec]) -> Value {
    Value::Array(
        sort.iter()
            .map(|s| {
                let order = match s.dir {
                    SortDir::Asc => "asc",
                    SortDir::Desc => "desc",
                };
                json!({ field(s.key): { "order": order } })
            })
            .collect(),
    )
}

/// `search_after` values resuming right after `marker` under `sort`.
pub fn search_after(marker: &Event, sort: &[SortSpec]) -> Value {
    Value::Array(
        sort.iter()
            .map(|s| match s.key {
                SortKey::Generated => json!(marker.generated.timestamp_micros()),
                SortKey::MessageId => json!(marker.message_id),
            })
            .collect(),
    )
}

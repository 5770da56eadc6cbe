//! In-process search engine selected by the `__test__` host.
//!
//! Evaluates the subset of the query DSL the event layout emits: `match_all`,
//! `bool`, `term`, `range` and `nested`, with `sort`, `search_after`, `size`
//! and single-source `composite` aggregations.

use super::{BulkCreate, BulkItem, SearchClient};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

type Index = BTreeMap<String, Value>;

const DEFAULT_SIZE: usize = 10;

#[derive(Default)]
pub struct MemorySearchStore {
    templates: RwLock<HashMap<String, Value>>,
    indices: RwLock<HashMap<String, Index>>,
}

impl MemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(&self, name: &str) -> Option<Value> {
        self.templates.read().ok()?.get(name).cloned()
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("search store lock poisoned".to_string())
}

fn unsupported(what: &str, query: &Value) -> StorageError {
    StorageError::InvalidQuery(format!("unsupported {what}: {query}"))
}

#[async_trait]
impl SearchClient for MemorySearchStore {
    async fn put_index_template(&self, name: &str, template: &Value) -> StorageResult<()> {
        let mut guard = self.templates.write().map_err(|_| poisoned())?;
        guard.insert(name.to_string(), template.clone());
        Ok(())
    }

    async fn create_index(&self, index: &str) -> StorageResult<()> {
        let mut guard = self.indices.write().map_err(|_| poisoned())?;
        guard.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> StorageResult<()> {
        let mut guard = self.indices.write().map_err(|_| poisoned())?;
        guard.remove(index);
        Ok(())
    }

    async fn bulk_create(
        &self,
        index: &str,
        actions: &[BulkCreate],
        _refresh: bool,
    ) -> StorageResult<Vec<BulkItem>> {
        let mut guard = self.indices.write().map_err(|_| poisoned())?;
        let docs = guard.entry(index.to_string()).or_default();
        Ok(actions
            .iter()
            .map(|action| {
                if docs.contains_key(&action.id) {
                    BulkItem {
                        id: action.id.clone(),
                        status: 409,
                        error: Some("version_conflict_engine_exception".into()),
                    }
                } else {
                    docs.insert(action.id.clone(), action.source.clone());
                    BulkItem {
                        id: action.id.clone(),
                        status: 201,
                        error: None,
                    }
                }
            })
            .collect())
    }

    async fn search(&self, index: &str, body: &Value) -> StorageResult<Value> {
        let guard = self.indices.read().map_err(|_| poisoned())?;
        let Some(docs) = guard.get(index) else {
            return Ok(json!({ "hits": { "hits": [] } }));
        };
        let query = body.get("query").unwrap_or(&Value::Null);
        let mut matched = Vec::new();
        for (id, doc) in docs {
            if query.is_null() || matches(query, doc)? {
                matched.push((id, doc));
            }
        }

        let mut response = json!({ "hits": { "hits": [] } });
        if let Some(aggs) = body.get("aggs").and_then(Value::as_object) {
            let mut results = Map::new();
            for (name, agg) in aggs {
                let docs: Vec<&Value> = matched.iter().map(|(_, doc)| *doc).collect();
                results.insert(name.clone(), composite(agg, &docs)?);
            }
            response["aggregations"] = Value::Object(results);
        }

        let sort = parse_sort(body.get("sort"))?;
        let mut keyed: Vec<(Vec<Value>, &String, &Value)> = matched
            .into_iter()
            .map(|(id, doc)| (sort_values(doc, &sort), id, doc))
            .collect();
        keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, &sort));
        if let Some(after) = body.get("search_after").and_then(Value::as_array) {
            keyed.retain(|(key, _, _)| compare_keys(key, after, &sort) == Ordering::Greater);
        }
        let size = body
            .get("size")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_SIZE, |n| n as usize);
        let hits: Vec<Value> = keyed
            .into_iter()
            .take(size)
            .map(|(key, id, doc)| json!({ "_id": id, "_source": doc, "sort": key }))
            .collect();
        response["hits"]["hits"] = Value::Array(hits);
        Ok(response)
    }

    async fn delete_by_query(
        &self,
        index: &str,
        query: &Value,
        max_docs: Option<u64>,
    ) -> StorageResult<u64> {
        let mut guard = self.indices.write().map_err(|_| poisoned())?;
        let Some(docs) = guard.get_mut(index) else {
            return Ok(0);
        };
        let mut doomed = Vec::new();
        for (id, doc) in docs.iter() {
            if max_docs.is_some_and(|cap| doomed.len() as u64 >= cap) {
                break;
            }
            if matches(query, doc)? {
                doomed.push(id.clone());
            }
        }
        for id in &doomed {
            docs.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

/// Every value at a dotted `path`, flattening arrays on the way.
fn field_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value.get(segment) {
                Some(Value::Array(items)) => next.extend(items.iter()),
                Some(Value::Null) | None => {}
                Some(found) => next.push(found),
            }
        }
        current = next;
    }
    current
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Clauses of a `bool` occurrence type, which may be one object or a list.
fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single],
    }
}

/// The single `{field: operand}` entry of a leaf query.
fn leaf(body: &Value) -> Option<(&String, &Value)> {
    body.as_object().filter(|o| o.len() == 1)?.iter().next()
}

fn matches(query: &Value, doc: &Value) -> StorageResult<bool> {
    let Some((kind, body)) = leaf(query) else {
        return Err(unsupported("query", query));
    };
    match kind.as_str() {
        "match_all" => Ok(true),
        "term" => {
            let (field, expected) = leaf(body).ok_or_else(|| unsupported("term", body))?;
            let expected = expected.get("value").unwrap_or(expected);
            Ok(field_values(doc, field)
                .into_iter()
                .any(|v| compare_values(v, expected) == Some(Ordering::Equal)))
        }
        "range" => {
            let (field, bounds) = leaf(body).ok_or_else(|| unsupported("range", body))?;
            let bounds = bounds.as_object().ok_or_else(|| unsupported("range", body))?;
            for v in field_values(doc, field) {
                let mut inside = true;
                for (op, bound) in bounds {
                    let ordering = compare_values(v, bound);
                    inside &= match op.as_str() {
                        "lt" => ordering == Some(Ordering::Less),
                        "lte" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                        "gt" => ordering == Some(Ordering::Greater),
                        "gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                        _ => return Err(unsupported("range operator", body)),
                    };
                }
                if inside {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "nested" => {
            let path = body["path"].as_str().ok_or_else(|| unsupported("nested", body))?;
            let inner = &body["query"];
            for element in field_values(doc, path) {
                // Inner field names keep the path prefix.
                if matches(inner, &json!({ path: element }))? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "bool" => {
            for clause in clauses(body.get("filter"))
                .into_iter()
                .chain(clauses(body.get("must")))
            {
                if !matches(clause, doc)? {
                    return Ok(false);
                }
            }
            for clause in clauses(body.get("must_not")) {
                if matches(clause, doc)? {
                    return Ok(false);
                }
            }
            let should = clauses(body.get("should"));
            if should.is_empty() {
                return Ok(true);
            }
            let scoring = body.get("filter").is_some() || body.get("must").is_some();
            let needed = body
                .get("minimum_should_match")
                .and_then(Value::as_u64)
                .unwrap_or(if scoring { 0 } else { 1 });
            let mut hits = 0;
            for clause in should {
                if matches(clause, doc)? {
                    hits += 1;
                }
            }
            Ok(hits >= needed)
        }
        _ => Err(unsupported("query", query)),
    }
}

#[derive(Debug)]
struct SortField {
    field: String,
    descending: bool,
}

fn parse_sort(sort: Option<&Value>) -> StorageResult<Vec<SortField>> {
    clauses(sort)
        .into_iter()
        .map(|spec| match spec {
            Value::String(field) => Ok(SortField {
                field: field.clone(),
                descending: false,
            }),
            _ => {
                let (field, options) = leaf(spec).ok_or_else(|| unsupported("sort", spec))?;
                Ok(SortField {
                    field: field.clone(),
                    descending: options["order"] == "desc",
                })
            }
        })
        .collect()
}

fn sort_values(doc: &Value, sort: &[SortField]) -> Vec<Value> {
    sort.iter()
        .map(|s| {
            field_values(doc, &s.field)
                .first()
                .map_or(Value::Null, |v| (*v).clone())
        })
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value], sort: &[SortField]) -> Ordering {
    for ((x, y), spec) in a.iter().zip(b).zip(sort) {
        let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
        let ordering = if spec.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// A `composite` aggregation with one `terms` source.
fn composite(agg: &Value, docs: &[&Value]) -> StorageResult<Value> {
    let spec = &agg["composite"];
    let source = spec["sources"]
        .get(0)
        .and_then(leaf)
        .filter(|_| spec["sources"].as_array().map_or(0, Vec::len) == 1)
        .ok_or_else(|| unsupported("aggregation", agg))?;
    let (name, terms) = source;
    let field = terms["terms"]["field"]
        .as_str()
        .ok_or_else(|| unsupported("aggregation", agg))?;
    let size = spec["size"].as_u64().map_or(DEFAULT_SIZE, |n| n as usize);
    let after = spec.get("after").map(|a| &a[name.as_str()]);

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for doc in docs {
        let distinct: BTreeSet<&str> = field_values(doc, field)
            .into_iter()
            .filter_map(Value::as_str)
            .collect();
        for term in distinct {
            *counts.entry(term.to_string()).or_default() += 1;
        }
    }
    let buckets: Vec<Value> = counts
        .into_iter()
        .filter(|(term, _)| after.and_then(Value::as_str).map_or(true, |a| term.as_str() > a))
        .take(size)
        .map(|(term, count)| json!({ "key": { name.as_str(): term }, "doc_count": count }))
        .collect();

    let mut result = json!({ "buckets": buckets });
    if let Some(last) = buckets.last() {
        result["after_key"] = last["key"].clone();
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, generated: i64, traits: Value) -> BulkCreate {
        BulkCreate {
            id: id.into(),
            source: json!({
                "message_id": id,
                "event_type": "Foo",
                "generated_us": generated,
                "traits": traits,
            }),
        }
    }

    async fn seeded() -> MemorySearchStore {
        let store = MemorySearchStore::new();
        store
            .bulk_create(
                "events",
                &[
                    doc("a", 10, json!([{ "name": "x", "dtype": 2, "int": 1 }, { "name": "y", "dtype": 2, "int": 9 }])),
                    doc("b", 20, json!([{ "name": "x", "dtype": 2, "int": 9 }])),
                    doc("c", 20, json!([])),
                ],
                false,
            )
            .await
            .unwrap();
        store
    }

    async fn ids(store: &MemorySearchStore, body: Value) -> Vec<String> {
        let response = store.search("events", &body).await.unwrap();
        response["hits"]["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn creates_refuse_existing_ids() {
        let store = seeded().await;
        let items = store
            .bulk_create("events", &[doc("a", 0, json!([])), doc("d", 0, json!([]))], false)
            .await
            .unwrap();
        assert!(items[0].is_conflict());
        assert!(items[1].is_success());
    }

    #[tokio::test]
    async fn nested_clauses_match_within_one_element() {
        let store = seeded().await;
        // `a` has x=1 and y=9 on different elements.
        let x_is_nine = json!({ "query": { "nested": { "path": "traits", "query": { "bool": { "filter": [
            { "term": { "traits.name": "x" } },
            { "term": { "traits.int": 9 } },
        ]}}}}});
        assert_eq!(ids(&store, x_is_nine).await, ["b"]);
    }

    #[tokio::test]
    async fn sort_and_search_after_page_through_ties() {
        let store = seeded().await;
        let sort = json!([{ "generated_us": { "order": "desc" } }, { "message_id": { "order": "asc" } }]);
        let first = json!({ "sort": sort, "size": 2 });
        assert_eq!(ids(&store, first).await, ["b", "c"]);
        let rest = json!({ "sort": sort, "size": 2, "search_after": [20, "c"] });
        assert_eq!(ids(&store, rest).await, ["a"]);
    }

    #[tokio::test]
    async fn should_needs_one_match_without_filters() {
        let store = seeded().await;
        let either = json!({ "query": { "bool": { "should": [
            { "term": { "message_id": "a" } },
            { "range": { "generated_us": { "gt": 15, "lte": 20 } } },
        ]}}, "sort": ["message_id"] });
        assert_eq!(ids(&store, either).await, ["a", "b", "c"]);
        let neither = json!({ "query": { "bool": { "should": [{ "term": { "message_id": "z" } }] } } });
        assert!(ids(&store, neither).await.is_empty());
    }

    #[tokio::test]
    async fn missing_index_searches_empty_and_deletes_nothing() {
        let store = MemorySearchStore::new();
        assert!(ids(&store, json!({})).await.is_empty());
        assert_eq!(
            store.delete_by_query("events", &json!({ "match_all": {} }), None).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn delete_by_query_honours_max_docs() {
        let store = seeded().await;
        let all = json!({ "match_all": {} });
        assert_eq!(store.delete_by_query("events", &all, Some(2)).await.unwrap(), 2);
        assert_eq!(ids(&store, json!({})).await, ["c"]);
    }

    #[tokio::test]
    async fn unknown_queries_are_rejected() {
        let store = seeded().await;
        let err = store
            .search("events", &json!({ "query": { "fuzzy": { "event_type": "Fo" } } }))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery(_)));
    }
}

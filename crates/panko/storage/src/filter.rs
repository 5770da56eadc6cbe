use crate::model::{parse_timestamp, TraitType, TraitValue};
use crate::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Comparison operators accepted by trait and timestamp predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    #[default]
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Ne => "ne",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Le => "le",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Ge => "ge",
        }
    }

    /// Evaluate the operator against an ordering of `actual` relative to the
    /// filter's operand.
    pub fn matches(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ComparisonOp::Eq => ordering == Equal,
            ComparisonOp::Ne => ordering != Equal,
            ComparisonOp::Lt => ordering == Less,
            ComparisonOp::Le => ordering != Greater,
            ComparisonOp::Gt => ordering == Greater,
            ComparisonOp::Ge => ordering != Less,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOp {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(ComparisonOp::Eq),
            "ne" => Ok(ComparisonOp::Ne),
            "lt" => Ok(ComparisonOp::Lt),
            "le" => Ok(ComparisonOp::Le),
            "gt" => Ok(ComparisonOp::Gt),
            "ge" => Ok(ComparisonOp::Ge),
            other => Err(StorageError::InvalidQuery(format!(
                "operator {other} is not supported. the supported operators are: \
                 eq, ne, lt, le, gt, ge"
            ))),
        }
    }
}

/// One trait predicate; clauses in a filter are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitFilter {
    pub key: String,
    pub value: TraitValue,
    #[serde(default)]
    pub op: ComparisonOp,
}

impl TraitFilter {
    pub fn new(key: impl Into<String>, value: TraitValue) -> Self {
        Self {
            key: key.into(),
            value,
            op: ComparisonOp::Eq,
        }
    }

    pub fn with_op(mut self, op: ComparisonOp) -> Self {
        self.op = op;
        self
    }

    pub fn dtype(&self) -> TraitType {
        self.value.dtype()
    }
}

/// Query specification over stored events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub start_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp_op: ComparisonOp,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp_op: ComparisonOp,
    pub event_type: Option<String>,
    pub message_id: Option<String>,
    pub traits_filter: Vec<TraitFilter>,
    pub admin_proj: Option<String>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            start_timestamp: None,
            start_timestamp_op: ComparisonOp::Ge,
            end_timestamp: None,
            end_timestamp_op: ComparisonOp::Lt,
            event_type: None,
            message_id: None,
            traits_filter: Vec::new(),
            admin_proj: None,
        }
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(mut self, ts: DateTime<Utc>, op: ComparisonOp) -> Self {
        self.start_timestamp = Some(ts);
        self.start_timestamp_op = op;
        self
    }

    pub fn end(mut self, ts: DateTime<Utc>, op: ComparisonOp) -> Self {
        self.end_timestamp = Some(ts);
        self.end_timestamp_op = op;
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn trait_filter(mut self, clause: TraitFilter) -> Self {
        self.traits_filter.push(clause);
        self
    }

    pub fn admin_proj(mut self, project: impl Into<String>) -> Self {
        self.admin_proj = Some(project.into());
        self
    }

    /// Check operator/field combinations every backend relies on.
    ///
    /// Programmatic filters may pick either bound flavour: `ge`/`gt` for
    /// `start_timestamp` and `lt`/`le` for `end_timestamp`. Query-string
    /// filters are narrower; [`EventFilter::from_query`] only admits `ge` and
    /// `le` and rejects a `gt` start before a backend ever sees it.
    pub fn validate(&self) -> StorageResult<()> {
        if !matches!(self.start_timestamp_op, ComparisonOp::Ge | ComparisonOp::Gt) {
            return Err(StorageError::unsupported_operator(
                self.start_timestamp_op,
                "start_timestamp",
            ));
        }
        if !matches!(self.end_timestamp_op, ComparisonOp::Lt | ComparisonOp::Le) {
            return Err(StorageError::unsupported_operator(
                self.end_timestamp_op,
                "end_timestamp",
            ));
        }
        for clause in &self.traits_filter {
            if clause.value == TraitValue::None {
                return Err(StorageError::InvalidQuery(format!(
                    "trait filter `{}` carries no value",
                    clause.key
                )));
            }
        }
        Ok(())
    }

    /// True when `generated` falls inside the filter's time window.
    pub fn time_window_contains(&self, generated: DateTime<Utc>) -> bool {
        let after_start = self
            .start_timestamp
            .map_or(true, |s| self.start_timestamp_op.matches(generated.cmp(&s)));
        let before_end = self
            .end_timestamp
            .map_or(true, |e| self.end_timestamp_op.matches(generated.cmp(&e)));
        after_start && before_end
    }

    /// Build a filter from API-style query clauses.
    ///
    /// `event_type` and `message_id` only accept `eq`, `start_timestamp` only
    /// `ge` and `end_timestamp` only `le`. Any other field is a trait clause.
    /// `all_tenants=true` lifts the admin scope and is never a trait clause.
    pub fn from_query(clauses: &[QueryClause], admin_proj: Option<String>) -> StorageResult<Self> {
        let mut filter = EventFilter {
            admin_proj,
            ..EventFilter::default()
        };
        for clause in clauses {
            let op = match clause.op.as_deref() {
                None | Some("") => ComparisonOp::Eq,
                Some(op) => op.parse()?,
            };
            let only = |allowed: ComparisonOp| {
                if op == allowed {
                    Ok(())
                } else {
                    Err(StorageError::unsupported_operator(op, &clause.field))
                }
            };
            match clause.field.as_str() {
                "event_type" => {
                    only(ComparisonOp::Eq)?;
                    filter.event_type = Some(clause.value.clone());
                }
                "message_id" => {
                    only(ComparisonOp::Eq)?;
                    filter.message_id = Some(clause.value.clone());
                }
                "start_timestamp" => {
                    only(ComparisonOp::Ge)?;
                    filter.start_timestamp = Some(parse_query_timestamp(&clause.value)?);
                    filter.start_timestamp_op = ComparisonOp::Ge;
                }
                "end_timestamp" => {
                    only(ComparisonOp::Le)?;
                    filter.end_timestamp = Some(parse_query_timestamp(&clause.value)?);
                    filter.end_timestamp_op = ComparisonOp::Le;
                }
                "all_tenants" => {
                    if parse_bool(&clause.value) {
                        filter.admin_proj = None;
                    }
                }
                field => {
                    let dtype = match clause.r#type.as_deref() {
                        None | Some("") => TraitType::Text,
                        Some(name) => TraitType::from_query_name(name)?,
                    };
                    let value = TraitValue::convert(dtype, &Value::String(clause.value.clone()))
                        .map_err(|e| StorageError::InvalidQuery(e.to_string()))?;
                    filter
                        .traits_filter
                        .push(TraitFilter::new(field, value).with_op(op));
                }
            }
        }
        Ok(filter)
    }
}

/// A `field op value [type]` clause as received by a query API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryClause {
    pub field: String,
    #[serde(default)]
    pub op: Option<String>,
    pub value: String,
    #[serde(default, rename = "type")]
    pub r#type: Option<String>,
}

impl QueryClause {
    pub fn new(field: impl Into<String>, op: &str, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: Some(op.to_string()),
            value: value.into(),
            r#type: None,
        }
    }

    pub fn typed(mut self, type_name: &str) -> Self {
        self.r#type = Some(type_name.to_string());
        self
    }
}

fn parse_query_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    parse_timestamp(raw).map_err(|e| StorageError::InvalidQuery(e.to_string()))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "on" | "y" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2013, 12, 31, 5, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2013, 12, 31, 7, 0, 0).unwrap();
        let filter = EventFilter::new()
            .start(start, ComparisonOp::Ge)
            .end(end, ComparisonOp::Lt);
        assert!(filter.time_window_contains(start));
        assert!(!filter.time_window_contains(end));
        assert!(EventFilter::new().time_window_contains(end));
    }

    #[test]
    fn validate_rejects_wrong_timestamp_ops() {
        let now = Utc::now();
        let err = EventFilter::new()
            .start(now, ComparisonOp::Lt)
            .validate()
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(EventFilter::new().end(now, ComparisonOp::Ge).validate().is_err());
        assert!(EventFilter::new().end(now, ComparisonOp::Le).validate().is_ok());
    }

    #[test]
    fn exclusive_start_is_programmatic_only() {
        let start = Utc.with_ymd_and_hms(2013, 12, 31, 6, 0, 0).unwrap();
        assert!(EventFilter::new()
            .start(start, ComparisonOp::Gt)
            .validate()
            .is_ok());

        let err = EventFilter::from_query(
            &[QueryClause::new("start_timestamp", "gt", "2013-12-31T06:00:00")],
            None,
        )
        .unwrap_err();
        assert!(err.is_client_error());
        let err = EventFilter::from_query(
            &[QueryClause::new("end_timestamp", "lt", "2013-12-31T06:00:00")],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery(_)));
    }

    #[test]
    fn from_query_applies_field_operator_rules() {
        let err = EventFilter::from_query(
            &[QueryClause::new("start_timestamp", "gt", "2013-12-31T06:00:00")],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery(_)));

        assert!(EventFilter::from_query(&[QueryClause::new("event_type", "ne", "Foo")], None).is_err());
        assert!(EventFilter::from_query(&[QueryClause::new("trait_A", "like", "x")], None).is_err());

        let filter = EventFilter::from_query(
            &[
                QueryClause::new("event_type", "eq", "Foo"),
                QueryClause::new("end_timestamp", "le", "2013-12-31T07:00:00"),
                QueryClause::new("trait_B", "gt", "101").typed("integer"),
                QueryClause {
                    field: "trait_A".into(),
                    op: None,
                    value: "my_Foo_text".into(),
                    r#type: None,
                },
            ],
            None,
        )
        .unwrap();
        assert_eq!(filter.event_type.as_deref(), Some("Foo"));
        assert_eq!(filter.end_timestamp_op, ComparisonOp::Le);
        assert_eq!(
            filter.traits_filter,
            vec![
                TraitFilter::new("trait_B", TraitValue::Int(101)).with_op(ComparisonOp::Gt),
                TraitFilter::new("trait_A", TraitValue::Text("my_Foo_text".into())),
            ]
        );
    }

    #[test]
    fn all_tenants_lifts_admin_scope() {
        let filter = EventFilter::from_query(
            &[QueryClause::new("all_tenants", "eq", "True")],
            Some("project-a".into()),
        )
        .unwrap();
        assert!(filter.admin_proj.is_none());
        assert!(filter.traits_filter.is_empty());

        let filter = EventFilter::from_query(
            &[QueryClause::new("all_tenants", "eq", "false")],
            Some("project-a".into()),
        )
        .unwrap();
        assert_eq!(filter.admin_proj.as_deref(), Some("project-a"));
    }

    #[test]
    fn bad_trait_value_is_a_query_error() {
        let err = EventFilter::from_query(
            &[QueryClause::new("trait_B", "eq", "abc").typed("integer")],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery(_)));
    }
}

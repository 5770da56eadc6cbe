use crate::{StorageError, StorageResult};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Longest text trait value any backend keeps.
pub const MAX_TEXT_LEN: usize = 255;

/// Trait data types. The ordinals are what backends persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum TraitType {
    None = 0,
    Text = 1,
    Int = 2,
    Float = 3,
    Datetime = 4,
}

impl TraitType {
    pub const ALL: [TraitType; 5] = [
        TraitType::None,
        TraitType::Text,
        TraitType::Int,
        TraitType::Float,
        TraitType::Datetime,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: i64) -> StorageResult<Self> {
        match ordinal {
            0 => Ok(TraitType::None),
            1 => Ok(TraitType::Text),
            2 => Ok(TraitType::Int),
            3 => Ok(TraitType::Float),
            4 => Ok(TraitType::Datetime),
            other => Err(StorageError::TypeConversion(format!(
                "unknown trait type ordinal {other}"
            ))),
        }
    }

    /// Parse the names used by query strings (`string`, `integer`, ...).
    pub fn from_query_name(name: &str) -> StorageResult<Self> {
        match name {
            "string" => Ok(TraitType::Text),
            "integer" => Ok(TraitType::Int),
            "float" => Ok(TraitType::Float),
            "datetime" => Ok(TraitType::Datetime),
            other => Err(StorageError::InvalidQuery(format!(
                "trait type `{other}` is not supported"
            ))),
        }
    }
}

impl From<TraitType> for u8 {
    fn from(value: TraitType) -> Self {
        value.ordinal()
    }
}

impl TryFrom<u8> for TraitType {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TraitType::from_ordinal(i64::from(value))
    }
}

impl fmt::Display for TraitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraitType::None => "none",
            TraitType::Text => "string",
            TraitType::Int => "integer",
            TraitType::Float => "float",
            TraitType::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// Typed trait payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TraitValue {
    None,
    Text(String),
    Int(i64),
    Float(f64),
    Datetime(DateTime<Utc>),
}

impl TraitValue {
    pub fn dtype(&self) -> TraitType {
        match self {
            TraitValue::None => TraitType::None,
            TraitValue::Text(_) => TraitType::Text,
            TraitValue::Int(_) => TraitType::Int,
            TraitValue::Float(_) => TraitType::Float,
            TraitValue::Datetime(_) => TraitType::Datetime,
        }
    }

    /// Convert a loosely-typed value into the payload for `dtype`.
    pub fn convert(dtype: TraitType, raw: &Value) -> StorageResult<Self> {
        let mismatch = || {
            StorageError::TypeConversion(format!("cannot convert {raw} to a {dtype} trait value"))
        };
        match dtype {
            TraitType::None => Ok(TraitValue::None),
            TraitType::Text => {
                let text = match raw {
                    Value::String(s) => s.clone(),
                    Value::Null => return Err(mismatch()),
                    other => other.to_string(),
                };
                Ok(TraitValue::Text(crop_text(text)))
            }
            TraitType::Int => match raw {
                Value::Number(n) if n.is_u64() => n
                    .as_i64()
                    .map(TraitValue::Int)
                    .ok_or_else(mismatch),
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(integral_f64))
                    .map(TraitValue::Int)
                    .ok_or_else(mismatch),
                Value::String(s) => s.trim().parse().map(TraitValue::Int).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            TraitType::Float => match raw {
                Value::Number(n) => n.as_f64().map(TraitValue::Float).ok_or_else(mismatch),
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(TraitValue::Float)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            TraitType::Datetime => match raw {
                Value::String(s) => parse_timestamp(s).map(TraitValue::Datetime),
                _ => Err(mismatch()),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TraitValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraitValue::None => f.write_str("None"),
            TraitValue::Text(s) => f.write_str(s),
            TraitValue::Int(i) => write!(f, "{i}"),
            TraitValue::Float(v) => write!(f, "{v}"),
            TraitValue::Datetime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

/// One typed attribute of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trait {
    pub name: String,
    pub dtype: TraitType,
    pub value: TraitValue,
}

impl Trait {
    /// Build a trait whose dtype follows the value.
    pub fn new(name: impl Into<String>, value: TraitValue) -> Self {
        let value = match value {
            TraitValue::Text(s) => TraitValue::Text(crop_text(s)),
            TraitValue::Datetime(dt) => TraitValue::Datetime(dt.trunc_subsecs(6)),
            other => other,
        };
        Self {
            name: name.into(),
            dtype: value.dtype(),
            value,
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, TraitValue::Text(value.into()))
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, TraitValue::Int(value))
    }

    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, TraitValue::Float(value))
    }

    pub fn datetime(name: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self::new(name, TraitValue::Datetime(value))
    }

    /// Build a trait from a (name, ordinal, raw value) triple.
    pub fn convert(name: impl Into<String>, dtype: TraitType, raw: &Value) -> StorageResult<Self> {
        let value = TraitValue::convert(dtype, raw)?;
        Ok(Self {
            name: name.into(),
            dtype,
            value,
        })
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.name.is_empty() {
            return Err(StorageError::InvalidInput("trait name is empty".into()));
        }
        if self.value.dtype() != self.dtype {
            return Err(StorageError::InvalidInput(format!(
                "trait `{}` declares {} but carries a {} value",
                self.name,
                self.dtype,
                self.value.dtype()
            )));
        }
        Ok(())
    }
}

/// Distinct (name, dtype) pair observed for an event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraitDescriptor {
    pub name: String,
    pub dtype: TraitType,
}

/// One immutable, timestamped occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message_id: String,
    pub event_type: String,
    pub generated: DateTime<Utc>,
    pub traits: Vec<Trait>,
    #[serde(default = "empty_raw")]
    pub raw: Value,
}

impl Event {
    pub fn new(
        message_id: impl Into<String>,
        event_type: impl Into<String>,
        generated: DateTime<Utc>,
        traits: Vec<Trait>,
        raw: Value,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            event_type: event_type.into(),
            generated: generated.trunc_subsecs(6),
            traits,
            raw,
        }
    }

    /// Reject events a backend cannot persist faithfully.
    pub fn validate(&self) -> StorageResult<()> {
        if self.message_id.is_empty() {
            return Err(StorageError::InvalidInput("event has no message_id".into()));
        }
        if self.event_type.is_empty() {
            return Err(StorageError::InvalidInput(format!(
                "event {} has no event_type",
                self.message_id
            )));
        }
        for t in &self.traits {
            t.validate()
                .map_err(|e| StorageError::InvalidInput(format!("event {}: {e}", self.message_id)))?;
        }
        Ok(())
    }

    pub fn trait_value(&self, name: &str) -> Option<&TraitValue> {
        self.traits.iter().find(|t| t.name == name).map(|t| &t.value)
    }
}

pub(crate) fn empty_raw() -> Value {
    Value::Object(Default::default())
}

/// Whole floats inside the i64 range. `i64::MAX as f64` rounds up to 2^63,
/// so the upper bound is exclusive.
fn integral_f64(f: f64) -> Option<i64> {
    const LOWER: f64 = i64::MIN as f64;
    const UPPER: f64 = -(i64::MIN as f64);
    (f.is_finite() && f.fract() == 0.0 && (LOWER..UPPER).contains(&f)).then(|| f as i64)
}

fn crop_text(mut text: String) -> String {
    if let Some((idx, _)) = text.char_indices().nth(MAX_TEXT_LEN) {
        text.truncate(idx);
    }
    text
}

/// Parse an ISO-8601 timestamp, normalising to UTC. Naive inputs are UTC.
pub fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).trunc_subsecs(6));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc().trunc_subsecs(6));
        }
    }
    Err(StorageError::TypeConversion(format!(
        "`{raw}` is not an ISO-8601 timestamp"
    )))
}

/// `{"events": {"query": {"simple": ..}}}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub events: EventCapabilities,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCapabilities {
    pub query: QueryCapabilities,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCapabilities {
    pub simple: bool,
}

impl Capabilities {
    pub fn simple_query(simple: bool) -> Self {
        Self {
            events: EventCapabilities {
                query: QueryCapabilities { simple },
            },
        }
    }
}

/// `{"storage": {"production_ready": ..}}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCapabilities {
    pub storage: StorageFlags,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFlags {
    pub production_ready: bool,
}

impl StorageCapabilities {
    pub fn production_ready(production_ready: bool) -> Self {
        Self {
            storage: StorageFlags { production_ready },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn ordinals_are_stable() {
        assert_eq!(serde_json::to_value(TraitType::Datetime).unwrap(), json!(4));
        assert_eq!(
            serde_json::from_value::<TraitType>(json!(2)).unwrap(),
            TraitType::Int
        );
        assert!(serde_json::from_value::<TraitType>(json!(9)).is_err());
    }

    #[test]
    fn convert_accepts_loose_values() {
        assert_eq!(
            TraitValue::convert(TraitType::Int, &json!("4294967296")).unwrap(),
            TraitValue::Int(4_294_967_296)
        );
        assert_eq!(
            TraitValue::convert(TraitType::Float, &json!(1)).unwrap(),
            TraitValue::Float(1.0)
        );
        assert_eq!(
            TraitValue::convert(TraitType::Text, &json!(42)).unwrap(),
            TraitValue::Text("42".into())
        );
        assert_eq!(
            TraitValue::convert(TraitType::Datetime, &json!("2013-12-31T05:00:00+02:00")).unwrap(),
            TraitValue::Datetime(Utc.with_ymd_and_hms(2013, 12, 31, 3, 0, 0).unwrap())
        );
    }

    #[test]
    fn convert_rejects_incompatible_pairs() {
        let err = TraitValue::convert(TraitType::Int, &json!("forty")).unwrap_err();
        assert!(matches!(err, StorageError::TypeConversion(_)));
        assert!(TraitValue::convert(TraitType::Datetime, &json!(17)).is_err());
    }

    #[test]
    fn int_conversion_rejects_out_of_range_numbers() {
        assert!(TraitValue::convert(TraitType::Int, &json!(1e30)).is_err());
        assert!(TraitValue::convert(TraitType::Int, &json!(-1e30)).is_err());
        assert!(TraitValue::convert(TraitType::Int, &json!(u64::MAX)).is_err());
        assert!(TraitValue::convert(TraitType::Int, &json!(9.223372036854775807e18)).is_err());
        assert!(TraitValue::convert(TraitType::Int, &json!(12.5)).is_err());
        assert!(TraitValue::convert(TraitType::Int, &json!("18446744073709551615")).is_err());

        assert_eq!(
            TraitValue::convert(TraitType::Int, &json!(i64::MAX as u64)).unwrap(),
            TraitValue::Int(i64::MAX)
        );
        assert_eq!(
            TraitValue::convert(TraitType::Int, &json!(-9.223372036854775808e18)).unwrap(),
            TraitValue::Int(i64::MIN)
        );
        assert_eq!(
            TraitValue::convert(TraitType::Int, &json!(3.0)).unwrap(),
            TraitValue::Int(3)
        );
    }

    #[test]
    fn text_is_cropped() {
        let t = Trait::text("long", "x".repeat(400));
        assert_eq!(t.value.as_text().map(str::len), Some(MAX_TEXT_LEN));
    }

    #[test]
    fn validate_catches_dtype_mismatch() {
        let bad = Event::new(
            "id",
            "compute.instance.create.end",
            Utc::now(),
            vec![Trait {
                name: "size".into(),
                dtype: TraitType::Int,
                value: TraitValue::Text("big".into()),
            }],
            empty_raw(),
        );
        assert!(matches!(bad.validate(), Err(StorageError::InvalidInput(_))));

        let missing_id = Event::new("", "foo", Utc::now(), vec![], empty_raw());
        assert!(missing_id.validate().is_err());
    }

    #[test]
    fn capability_reports_serialize_to_nested_documents() {
        assert_eq!(
            serde_json::to_value(Capabilities::simple_query(true)).unwrap(),
            json!({"events": {"query": {"simple": true}}})
        );
        assert_eq!(
            serde_json::to_value(StorageCapabilities::production_ready(false)).unwrap(),
            json!({"storage": {"production_ready": false}})
        );
    }
}

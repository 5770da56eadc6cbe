//! Row keys, column names and order-preserving cell encodings.
//!
//! Row keys are `{timestamp}:{quoted message_id}` where the timestamp is the
//! event's microseconds since the epoch, zero-padded to 19 digits so that
//! lexicographic order is time order. Reversed tables store
//! `i64::MAX - micros` instead, turning a descending-time scan into a forward
//! one; comparisons against reversed keys go through [`key_space_op`].

use crate::filter::ComparisonOp;
use crate::model::{TraitType, TraitValue};
use crate::{StorageError, StorageResult};
use chrono::{DateTime, Utc};

pub const FAMILY: &str = "f";
pub const COL_EVENT_TYPE: &str = "f:event_type";
pub const COL_MESSAGE_ID: &str = "f:message_id";
pub const COL_TIMESTAMP: &str = "f:timestamp";
pub const COL_RAW: &str = "f:raw";
/// Index-table cell naming the event row that claimed a message id.
pub const COL_ROW: &str = "f:row";

const KEY_WIDTH: usize = 19;

/// Encode `dt` as a fixed-width row-key prefix.
pub fn encode_timestamp(dt: DateTime<Utc>, reverse: bool) -> StorageResult<String> {
    let micros = dt.timestamp_micros();
    if micros < 0 {
        return Err(StorageError::InvalidInput(format!(
            "timestamp {dt} predates the epoch and cannot key a row"
        )));
    }
    let value = if reverse { i64::MAX - micros } else { micros };
    Ok(format!("{value:0width$}", width = KEY_WIDTH))
}

pub fn decode_timestamp(encoded: &str, reverse: bool) -> StorageResult<DateTime<Utc>> {
    let bad = || StorageError::Serialization(format!("malformed row timestamp `{encoded}`"));
    if encoded.len() != KEY_WIDTH {
        return Err(bad());
    }
    let value: i64 = encoded.parse().map_err(|_| bad())?;
    let micros = if reverse { i64::MAX - value } else { value };
    DateTime::from_timestamp_micros(micros).ok_or_else(bad)
}

/// Operator to apply to encoded keys for a wall-clock comparison `op`.
pub fn key_space_op(op: ComparisonOp, reverse: bool) -> ComparisonOp {
    if !reverse {
        return op;
    }
    match op {
        ComparisonOp::Eq => ComparisonOp::Eq,
        ComparisonOp::Ne => ComparisonOp::Ne,
        ComparisonOp::Lt => ComparisonOp::Gt,
        ComparisonOp::Le => ComparisonOp::Ge,
        ComparisonOp::Gt => ComparisonOp::Lt,
        ComparisonOp::Ge => ComparisonOp::Le,
    }
}

/// HBase `CompareOp` name for `op`.
pub fn compare_op_name(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "EQUAL",
        ComparisonOp::Ne => "NOT_EQUAL",
        ComparisonOp::Lt => "LESS",
        ComparisonOp::Le => "LESS_OR_EQUAL",
        ComparisonOp::Gt => "GREATER",
        ComparisonOp::Ge => "GREATER_OR_EQUAL",
    }
}

pub fn quote(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

pub fn unquote(s: &str) -> StorageResult<String> {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .map_err(|e| StorageError::Serialization(format!("bad quoted name `{s}`: {e}")))
}

pub fn row_key(generated: DateTime<Utc>, message_id: &str, reverse: bool) -> StorageResult<String> {
    Ok(format!(
        "{}:{}",
        encode_timestamp(generated, reverse)?,
        quote(message_id)
    ))
}

/// Regex matching the row of `message_id` whatever its timestamp.
pub fn message_id_regex(message_id: &str) -> String {
    format!(r"^\d{{{KEY_WIDTH}}}:{}$", regex::escape(&quote(message_id)))
}

/// `f:{quoted name}:{dtype ordinal}`
pub fn trait_column(name: &str, dtype: TraitType) -> String {
    format!("{FAMILY}:{}:{}", quote(name), dtype.ordinal())
}

/// Split a trait column back into (name, dtype). Non-trait columns yield `None`.
pub fn parse_trait_column(column: &str) -> StorageResult<Option<(String, TraitType)>> {
    let Some(rest) = column.strip_prefix("f:") else {
        return Ok(None);
    };
    let Some((name, dtype)) = rest.rsplit_once(':') else {
        return Ok(None);
    };
    let Ok(ordinal) = dtype.parse::<i64>() else {
        return Ok(None);
    };
    Ok(Some((unquote(name)?, TraitType::from_ordinal(ordinal)?)))
}

const SIGN_BIT: u64 = 1 << 63;

/// Bytes whose lexicographic order matches the order of the values.
pub fn encode_value(value: &TraitValue) -> Vec<u8> {
    match value {
        TraitValue::None => Vec::new(),
        TraitValue::Text(s) => s.as_bytes().to_vec(),
        TraitValue::Int(i) => ((*i as u64) ^ SIGN_BIT).to_be_bytes().to_vec(),
        TraitValue::Datetime(dt) => ((dt.timestamp_micros() as u64) ^ SIGN_BIT)
            .to_be_bytes()
            .to_vec(),
        TraitValue::Float(f) => {
            let bits = f.to_bits();
            let sortable = if bits & SIGN_BIT != 0 { !bits } else { bits | SIGN_BIT };
            sortable.to_be_bytes().to_vec()
        }
    }
}

pub fn decode_value(dtype: TraitType, bytes: &[u8]) -> StorageResult<TraitValue> {
    let word = || -> StorageResult<u64> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| {
            StorageError::Serialization(format!("expected 8 bytes for a {dtype} cell, got {}", bytes.len()))
        })?;
        Ok(u64::from_be_bytes(arr))
    };
    Ok(match dtype {
        TraitType::None => TraitValue::None,
        TraitType::Text => TraitValue::Text(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        ),
        TraitType::Int => TraitValue::Int((word()? ^ SIGN_BIT) as i64),
        TraitType::Datetime => {
            let micros = (word()? ^ SIGN_BIT) as i64;
            TraitValue::Datetime(DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                StorageError::Serialization(format!("datetime cell {micros} out of range"))
            })?)
        }
        TraitType::Float => {
            let sortable = word()?;
            let bits = if sortable & SIGN_BIT != 0 {
                sortable & !SIGN_BIT
            } else {
                !sortable
            };
            TraitValue::Float(f64::from_bits(bits))
        }
    })
}

//! Conversion of loosely-typed pipeline records into events.

use crate::model::{empty_raw, parse_timestamp, Event, Trait, TraitType};
use crate::traits::Connection;
use crate::{StorageError, StorageResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct WireEvent {
    message_id: String,
    event_type: String,
    generated: String,
    traits: Vec<(String, i64, Value)>,
    #[serde(default)]
    raw: Option<Value>,
}

fn convert(record: &Value) -> StorageResult<Event> {
    let wire: WireEvent = serde_json::from_value(record.clone())
        .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
    let generated = parse_timestamp(&wire.generated)?;
    let traits = wire
        .traits
        .iter()
        .map(|(name, dtype, value)| Trait::convert(name.as_str(), TraitType::from_ordinal(*dtype)?, value))
        .collect::<StorageResult<Vec<_>>>()?;
    let event = Event::new(
        wire.message_id,
        wire.event_type,
        generated,
        traits,
        wire.raw.unwrap_or_else(empty_raw),
    );
    event.validate()?;
    Ok(event)
}

/// Convert wire records, dropping (and logging) the ones that do not parse.
pub fn events_from_records(records: &[Value]) -> Vec<Event> {
    records
        .iter()
        .filter_map(|record| match convert(record) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, %record, "error processing event, dropping it");
                None
            }
        })
        .collect()
}

/// Convert `records` and hand the survivors to `conn`. Returns how many
/// events were submitted.
pub async fn record_raw_events<C>(conn: &C, records: &[Value]) -> StorageResult<usize>
where
    C: Connection + ?Sized,
{
    let events = events_from_records(records);
    debug!(
        received = records.len(),
        accepted = events.len(),
        "recording events"
    );
    conn.record_events(&events).await?;
    Ok(events.len())
}

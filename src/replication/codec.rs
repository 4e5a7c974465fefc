//! Fact encoding for log records

use super::log::LogRecord;
use super::ReplicationError;
use crate::game::{Concern, DomainEvent, EventPayload};

/// Encode a fact's payload. Tombstones have no value.
pub fn encode(event: &DomainEvent) -> Result<Option<Vec<u8>>, ReplicationError> {
    event
        .payload
        .as_ref()
        .map(|payload| serde_json::to_vec(payload).map_err(ReplicationError::Encode))
        .transpose()
}

/// Rebuild a fact from a record read off `concern`'s log
pub fn decode(concern: Concern, record: &LogRecord) -> Result<DomainEvent, ReplicationError> {
    let Some(bytes) = &record.value else {
        return Ok(DomainEvent::tombstone(concern, record.key, record.timestamp));
    };

    let payload: EventPayload =
        serde_json::from_slice(bytes).map_err(|source| ReplicationError::Decode {
            concern,
            offset: record.offset,
            source,
        })?;

    let found = payload.concern();
    if found != concern {
        return Err(ReplicationError::WrongConcern {
            concern,
            offset: record.offset,
            found,
        });
    }

    Ok(DomainEvent::new(record.key, record.timestamp, payload))
}

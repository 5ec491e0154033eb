use chrono::{TimeZone, Utc};
use tracing::trace;

use super::types::{Envelope, Event, Operation, Payload};
use crate::{Error, Result};

/// Decodes a raw record value into a validated [`Event`].
///
/// The operation code decides which row images must be present:
///
/// | op  | after | before |
/// |-----|-------|--------|
/// | `c` | yes   | no     |
/// | `r` | yes   | no     |
/// | `u` | yes   | yes    |
/// | `d` | no    | yes    |
///
/// Images the operation does not carry are dropped from the event.
/// Decoding is pure and may run concurrently.
pub fn decode(data: &[u8]) -> Result<Event> {
    let envelope: Envelope = serde_json::from_slice(data)?;
    Event::try_from(envelope.payload)
}

impl TryFrom<Payload> for Event {
    type Error = Error;

    fn try_from(payload: Payload) -> Result<Self> {
        if payload.op.is_empty() {
            return Err(Error::MissingOperation);
        }

        let operation = Operation::from_code(&payload.op)
            .ok_or_else(|| Error::UnknownOperation(payload.op.clone()))?;

        if operation.requires_before() && payload.before.is_none() {
            return Err(Error::MissingField {
                field: "before",
                op: operation,
            });
        }
        if operation.requires_after() && payload.after.is_none() {
            return Err(Error::MissingField {
                field: "after",
                op: operation,
            });
        }

        let timestamp = Utc
            .timestamp_millis_opt(payload.ts_ms)
            .single()
            .ok_or_else(|| Error::InvalidMessage {
                message: format!("timestamp out of range: {}", payload.ts_ms),
            })?;

        trace!(
            "Decoded {} event for {}.{}",
            operation,
            payload.source.schema,
            payload.source.table
        );

        Ok(Event {
            operation,
            before: payload.before.filter(|_| operation.requires_before()),
            after: payload.after.filter(|_| operation.requires_after()),
            source: payload.source,
            timestamp,
        })
    }
}

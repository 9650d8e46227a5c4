//! Event and conversion tracking
//!
//! Both operations mutate an existing participant through an atomic upsert
//! and never create one: a participant that was not bucketed by the
//! assignment engine would skew the per-variant statistics.

use crate::error::StorageError;
use crate::storage::{with_timeout, Storage, Upsert};
use crate::types::{Participant, ParticipantEvent, ParticipantKey, CONVERSION_EVENT};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of [`Tracker::track_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Event appended to the log
    Recorded,
    /// No participant for the key; event dropped
    UnknownParticipant,
}

/// Outcome of [`Tracker::record_conversion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// This call converted the participant
    Recorded,
    /// Participant had already converted; value untouched
    AlreadyConverted,
    /// No participant for the key; conversion dropped
    UnknownParticipant,
}

/// Append `event`, dropping the oldest entries beyond `cap`
fn push_capped(participant: &mut Participant, event: ParticipantEvent, cap: usize) {
    participant.events.push(event);
    if participant.events.len() > cap {
        let excess = participant.events.len() - cap;
        participant.events.drain(..excess);
    }
}

/// Per-participant event log and idempotent conversions
#[derive(Debug)]
pub struct Tracker {
    storage: Arc<dyn Storage>,
    timeout: Duration,
    max_events: usize,
}

impl Tracker {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, timeout: Duration, max_events: usize) -> Self {
        Self {
            storage,
            timeout,
            max_events: max_events.max(1),
        }
    }

    /// Append an event to a participant's log
    ///
    /// # Errors
    /// Returns `StorageError` if persistence fails or times out
    pub async fn track_event(
        &self,
        key: &ParticipantKey,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<TrackOutcome, StorageError> {
        let event = ParticipantEvent::new(event_type, data);
        let cap = self.max_events;

        let result = with_timeout(
            self.timeout,
            self.storage.upsert_participant(
                key,
                Box::new(move |existing| match existing {
                    None => Upsert::Keep,
                    Some(current) => {
                        let mut updated = current.clone();
                        push_capped(&mut updated, event, cap);
                        Upsert::Put(updated)
                    }
                }),
            ),
        )
        .await?;

        if result.written {
            Ok(TrackOutcome::Recorded)
        } else {
            tracing::warn!(
                participant = %key,
                event_type,
                "Dropping event for unknown participant"
            );
            Ok(TrackOutcome::UnknownParticipant)
        }
    }

    /// Mark a participant converted, at most once
    ///
    /// The first accepted call wins; later calls observe `converted` and
    /// leave the stored value alone.
    ///
    /// # Errors
    /// Returns `StorageError` if persistence fails or times out
    pub async fn record_conversion(
        &self,
        key: &ParticipantKey,
        conversion_type: &str,
        value: f64,
        metadata: serde_json::Value,
    ) -> Result<ConversionOutcome, StorageError> {
        let event = ParticipantEvent::new(
            CONVERSION_EVENT,
            serde_json::json!({
                "conversion_type": conversion_type,
                "value": value,
                "metadata": metadata,
            }),
        );
        let cap = self.max_events;

        let result = with_timeout(
            self.timeout,
            self.storage.upsert_participant(
                key,
                Box::new(move |existing| match existing {
                    Some(current) if !current.converted => {
                        let mut updated = current.clone();
                        updated.converted = true;
                        updated.conversion_value = value;
                        updated.converted_at = Some(Utc::now());
                        push_capped(&mut updated, event, cap);
                        Upsert::Put(updated)
                    }
                    _ => Upsert::Keep,
                }),
            ),
        )
        .await?;

        match (result.written, result.participant) {
            (true, _) => {
                tracing::debug!(participant = %key, value, "Conversion recorded");
                Ok(ConversionOutcome::Recorded)
            }
            (false, Some(_)) => {
                tracing::debug!(participant = %key, "Conversion already recorded");
                Ok(ConversionOutcome::AlreadyConverted)
            }
            (false, None) => {
                tracing::warn!(participant = %key, "Dropping conversion for unknown participant");
                Ok(ConversionOutcome::UnknownParticipant)
            }
        }
    }
}

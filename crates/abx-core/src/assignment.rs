//! Assignment engine
//!
//! Buckets a session into a variant by weighted random draw and persists the
//! participant through an atomic upsert. A session that already has a
//! participant record always gets the same variant back.

use crate::error::StorageError;
use crate::storage::{with_timeout, Storage, Upsert};
use crate::types::{
    ExperimentDefinition, Participant, ParticipantEvent, ParticipantKey, SessionContext,
    SessionId, Targeting, Variant, VARIANT_ASSIGNED_EVENT,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// Result of a successful assignment
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Variant to render, including its content transforms
    pub variant: Variant,
    /// Whether this call created the participant
    pub newly_assigned: bool,
}

/// Whether a session passes a test's targeting rules
///
/// Empty allow-lists admit everyone. A non-empty list requires the
/// session to carry a listed value (case-insensitive).
#[must_use]
pub fn matches_targeting(targeting: &Targeting, context: &SessionContext) -> bool {
    fn allowed(list: &[String], value: Option<&String>) -> bool {
        list.is_empty()
            || value.is_some_and(|v| list.iter().any(|item| item.eq_ignore_ascii_case(v)))
    }

    allowed(&targeting.devices, context.device.as_ref())
        && allowed(&targeting.sources, context.source.as_ref())
        && allowed(&targeting.countries, context.country.as_ref())
        && targeting
            .custom_rules
            .iter()
            .all(|rule| context.attributes.get(&rule.condition) == Some(&rule.value))
}

/// Pick a variant for a draw `roll` in [0, 100)
///
/// Walks variants in definition order accumulating weight and returns the
/// first whose cumulative weight reaches `roll`, falling back to the first
/// variant.
#[must_use]
pub fn pick_variant(variants: &[Variant], roll: f64) -> Option<&Variant> {
    let mut cumulative = 0.0;
    variants
        .iter()
        .find(|v| {
            cumulative += v.weight;
            cumulative >= roll
        })
        .or_else(|| variants.first())
}

/// Weighted, sticky bucketing backed by [`Storage`]
#[derive(Debug)]
pub struct Assigner {
    storage: Arc<dyn Storage>,
    rng: Mutex<StdRng>,
    timeout: Duration,
}

impl Assigner {
    /// Create assigner; a seed makes draws reproducible
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, timeout: Duration, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            storage,
            rng: Mutex::new(rng),
            timeout,
        }
    }

    fn roll(&self) -> f64 {
        self.rng.lock().random_range(0.0..100.0)
    }

    /// Assign `session` to a variant of a running `definition`
    ///
    /// Returns `Ok(None)` if the session fails targeting. The caller is
    /// responsible for checking that the test is active.
    ///
    /// # Errors
    /// Returns `StorageError` if persistence fails or times out
    pub async fn assign(
        &self,
        definition: &ExperimentDefinition,
        session_id: &SessionId,
        context: &SessionContext,
    ) -> Result<Option<Assignment>, StorageError> {
        if !matches_targeting(&definition.targeting, context) {
            tracing::debug!(
                test_id = %definition.id,
                session_id = %session_id,
                "Session excluded by targeting"
            );
            return Ok(None);
        }

        let key = ParticipantKey::new(session_id.clone(), definition.id.clone());
        let Some(candidate) = pick_variant(&definition.variants, self.roll()) else {
            return Ok(None);
        };

        let fresh = {
            let mut participant = Participant::new(key.clone(), candidate.id.clone());
            participant.events.push(ParticipantEvent::new(
                VARIANT_ASSIGNED_EVENT,
                serde_json::json!({ "variant_id": candidate.id }),
            ));
            participant
        };

        let result = with_timeout(
            self.timeout,
            self.storage.upsert_participant(
                &key,
                Box::new(move |existing| match existing {
                    Some(_) => Upsert::Keep,
                    None => Upsert::Put(fresh),
                }),
            ),
        )
        .await?;

        let Some(participant) = result.participant else {
            return Ok(None);
        };

        // A participant pointing at a variant no longer in the definition
        // cannot be rendered.
        let Some(variant) = definition.variant(&participant.variant_id) else {
            tracing::warn!(
                test_id = %definition.id,
                session_id = %session_id,
                variant_id = %participant.variant_id,
                "Participant references unknown variant"
            );
            return Ok(None);
        };

        if result.written {
            tracing::debug!(
                test_id = %definition.id,
                session_id = %session_id,
                variant_id = %variant.id,
                "Variant assigned"
            );
        }

        Ok(Some(Assignment {
            variant: variant.clone(),
            newly_assigned: result.written,
        }))
    }
}

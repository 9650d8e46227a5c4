//! Experiment definition validation and sample-size planning
//!
//! [`build_definition`] turns an [`ExperimentConfig`] into a draft
//! [`ExperimentDefinition`] or rejects it as a whole.

use crate::error::ValidationError;
use crate::types::{ExperimentConfig, ExperimentDefinition, TestId, TestStatus};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Tolerance on the variant weight sum
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Two-sided z for alpha = 0.05
pub const Z_ALPHA: f64 = 1.96;

/// z for power = 0.8
pub const Z_BETA: f64 = 0.84;

/// Check a config against the definition invariants
///
/// # Errors
/// Returns the first violated invariant, in this order: variant count,
/// per-variant weight range, duplicate variant ids, weight sum, control
/// count, metric count, primary metric count.
pub fn validate_config(config: &ExperimentConfig) -> Result<(), ValidationError> {
    if config.variants.len() < 2 {
        return Err(ValidationError::TooFewVariants(config.variants.len()));
    }

    if let Some(variant) = config
        .variants
        .iter()
        .find(|v| !(0.0..=100.0).contains(&v.weight))
    {
        return Err(ValidationError::WeightOutOfRange {
            variant_id: variant.id.clone(),
            weight: variant.weight,
        });
    }

    let mut seen = HashSet::new();
    if let Some(variant) = config.variants.iter().find(|v| !seen.insert(v.id.as_str())) {
        return Err(ValidationError::DuplicateVariantId(variant.id.clone()));
    }

    let weight_sum: f64 = config.variants.iter().map(|v| v.weight).sum();
    if !((weight_sum - 100.0).abs() <= WEIGHT_SUM_TOLERANCE) {
        return Err(ValidationError::WeightSumInvalid(weight_sum));
    }

    match config.variants.iter().filter(|v| v.is_control).count() {
        0 => return Err(ValidationError::MissingControl),
        1 => {}
        n => return Err(ValidationError::MultipleControls(n)),
    }

    if config.metrics.is_empty() {
        return Err(ValidationError::NoMetrics);
    }

    let primaries = config.metrics.iter().filter(|m| m.is_primary).count();
    if primaries != 1 {
        return Err(ValidationError::MultiplePrimaryMetrics(primaries));
    }

    Ok(())
}

/// Minimum participants for a two-proportion test at alpha 0.05, power 0.8
///
/// `n = ceil((z_a + z_b)^2 * 2p(1-p) / (delta * p)^2)` with
/// `delta = |target - baseline| / baseline`.
///
/// Returns `None` when `baseline` is not a proportion in (0, 1) or the
/// effect size is zero.
#[must_use]
pub fn sample_size_for(baseline: f64, target: f64) -> Option<u64> {
    if !(baseline > 0.0 && baseline < 1.0) || !target.is_finite() {
        return None;
    }
    let delta = (target - baseline).abs() / baseline;
    let effect = delta * baseline;
    if effect <= 0.0 {
        return None;
    }

    let z = Z_ALPHA + Z_BETA;
    let n = (z * z * 2.0 * baseline * (1.0 - baseline) / (effect * effect)).ceil();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(n as u64)
}

/// Validate a config and produce a draft definition
///
/// The planned minimum sample size is derived from the primary metric when
/// it is a proportion; otherwise a caller-provided minimum is kept.
///
/// # Errors
/// Returns `ValidationError` without creating anything
pub fn build_definition(
    config: ExperimentConfig,
    now: DateTime<Utc>,
) -> Result<ExperimentDefinition, ValidationError> {
    validate_config(&config)?;

    let mut schedule = config.schedule;
    let planned = config
        .metrics
        .iter()
        .find(|m| m.is_primary)
        .and_then(|m| sample_size_for(m.baseline, m.target));
    if planned.is_some() {
        schedule.min_sample_size = planned;
    }

    Ok(ExperimentDefinition {
        id: config.id.unwrap_or_else(TestId::generate),
        name: config.name,
        description: config.description,
        owner_id: config.owner_id,
        status: TestStatus::Draft,
        hypothesis: config.hypothesis,
        variants: config.variants,
        metrics: config.metrics,
        targeting: config.targeting,
        schedule,
        created_at: now,
        updated_at: now,
        created_by: config.created_by,
        results: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Metric, MetricType, Variant};
    use proptest::prelude::*;

    fn base_config() -> ExperimentConfig {
        ExperimentConfig::new("Hero headline", "technique-1")
            .with_variant(Variant::control("control", "Control", 50.0))
            .with_variant(Variant::new("b", "Benefit headline", 50.0))
            .with_metric(
                Metric::new("signup", "Signups", MetricType::Conversion, 0.10, 0.15).primary(),
            )
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn single_variant_rejected() {
        let mut config = base_config();
        config.variants.truncate(1);
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::TooFewVariants(1))
        );
    }

    #[test]
    fn missing_control_rejected() {
        let mut config = base_config();
        config.variants[0].is_control = false;
        assert_eq!(validate_config(&config), Err(ValidationError::MissingControl));
    }

    #[test]
    fn multiple_controls_rejected() {
        let mut config = base_config();
        config.variants[1].is_control = true;
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MultipleControls(2))
        );
    }

    #[test]
    fn no_metrics_rejected() {
        let mut config = base_config();
        config.metrics.clear();
        assert_eq!(validate_config(&config), Err(ValidationError::NoMetrics));
    }

    #[test]
    fn two_primary_metrics_rejected() {
        let config = base_config().with_metric(
            Metric::new("rev", "Revenue", MetricType::Revenue, 10.0, 12.0).primary(),
        );
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MultiplePrimaryMetrics(2))
        );
    }

    #[test]
    fn zero_primary_metrics_rejected() {
        let mut config = base_config();
        config.metrics[0].is_primary = false;
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::MultiplePrimaryMetrics(0))
        );
    }

    #[test]
    fn weight_sum_within_tolerance_accepted() {
        let mut config = base_config();
        config.variants[1].weight = 50.005;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn nan_weight_rejected() {
        let mut config = base_config();
        config.variants[1].weight = f64::NAN;
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::WeightOutOfRange { ref variant_id, .. }) if variant_id == "b"
        ));
    }

    #[test]
    fn negative_weight_rejected_even_if_sum_is_100() {
        let mut config = base_config();
        config.variants[0].weight = -50.0;
        config.variants[1].weight = 150.0;
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::WeightOutOfRange {
                variant_id: "control".to_string(),
                weight: -50.0,
            })
        );
    }

    #[test]
    fn duplicate_variant_ids_rejected() {
        let mut config = base_config();
        config.variants[1].id = "control".to_string();
        assert_eq!(
            validate_config(&config),
            Err(ValidationError::DuplicateVariantId("control".to_string()))
        );
    }

    #[test]
    fn sample_size_worked_example() {
        assert_eq!(sample_size_for(0.10, 0.15), Some(565));
    }

    #[test]
    fn sample_size_undefined_cases() {
        assert_eq!(sample_size_for(0.0, 0.1), None);
        assert_eq!(sample_size_for(1.0, 0.1), None);
        assert_eq!(sample_size_for(12.0, 15.0), None);
        assert_eq!(sample_size_for(0.2, 0.2), None);
    }

    #[test]
    fn build_definition_plans_sample_size() {
        let def = build_definition(base_config().with_id("t-1"), Utc::now()).unwrap();
        assert_eq!(def.id, TestId::from("t-1"));
        assert_eq!(def.status, TestStatus::Draft);
        assert_eq!(def.schedule.min_sample_size, Some(565));
        assert!(def.results.is_none());
    }

    #[test]
    fn build_definition_keeps_caller_minimum_for_non_proportion() {
        let mut config = base_config();
        config.metrics[0] = Metric::new("rev", "Revenue", MetricType::Revenue, 40.0, 50.0).primary();
        config.schedule.min_sample_size = Some(2000);
        let def = build_definition(config, Utc::now()).unwrap();
        assert_eq!(def.schedule.min_sample_size, Some(2000));
    }

    proptest! {
        #[test]
        fn prop_out_of_range_weight_rejected(
            bad in prop_oneof![-1.0e6f64..-0.001, 100.001f64..1.0e6],
            position in 0usize..3,
        ) {
            // Remaining weights keep the sum at 100 so only the range check can fire.
            let rest = (100.0 - bad) / 2.0;
            let mut weights = [rest, rest, rest];
            weights[position] = bad;

            let config = ExperimentConfig::new("weights", "owner")
                .with_variant(Variant::control("a", "A", weights[0]))
                .with_variant(Variant::new("b", "B", weights[1]))
                .with_variant(Variant::new("c", "C", weights[2]))
                .with_metric(Metric::new("m", "M", MetricType::Conversion, 0.1, 0.2).primary());

            prop_assert!(matches!(
                validate_config(&config),
                Err(ValidationError::WeightOutOfRange { .. })
            ), "expected WeightOutOfRange error");
        }

        #[test]
        fn prop_duplicate_ids_rejected(
            ids in proptest::collection::vec("[a-c]", 3..6),
        ) {
            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            prop_assume!(unique.len() < ids.len());

            let weight = 100.0 / ids.len() as f64;
            let mut config = ExperimentConfig::new("ids", "owner")
                .with_metric(Metric::new("m", "M", MetricType::Conversion, 0.1, 0.2).primary());
            for (i, id) in ids.iter().enumerate() {
                config = config.with_variant(if i == 0 {
                    Variant::control(id.as_str(), "Control", weight)
                } else {
                    Variant::new(id.as_str(), "Treatment", weight)
                });
            }

            prop_assert!(matches!(
                validate_config(&config),
                Err(ValidationError::DuplicateVariantId(_))
            ));
        }

        #[test]
        fn prop_bad_weight_sum_rejected(a in 0.0f64..100.0, b in 0.0f64..100.0, c in 0.0f64..100.0) {
            let sum = a + b + c;
            prop_assume!((sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE);

            let config = ExperimentConfig::new("weights", "owner")
                .with_variant(Variant::control("a", "A", a))
                .with_variant(Variant::new("b", "B", b))
                .with_variant(Variant::new("c", "C", c))
                .with_metric(Metric::new("m", "M", MetricType::Conversion, 0.1, 0.2).primary());

            prop_assert!(matches!(
                validate_config(&config),
                Err(ValidationError::WeightSumInvalid(_))
            ));
        }

        #[test]
        fn prop_control_count_enforced(controls in proptest::collection::vec(any::<bool>(), 2..6)) {
            let weight = 100.0 / controls.len() as f64;
            let mut config = ExperimentConfig::new("controls", "owner")
                .with_metric(Metric::new("m", "M", MetricType::Conversion, 0.1, 0.2).primary());
            for (i, is_control) in controls.iter().enumerate() {
                let mut v = Variant::new(format!("v{i}"), format!("V{i}"), weight);
                v.is_control = *is_control;
                config = config.with_variant(v);
            }

            let count = controls.iter().filter(|c| **c).count();
            let result = validate_config(&config);
            match count {
                0 => prop_assert_eq!(result, Err(ValidationError::MissingControl)),
                1 => prop_assert!(result.is_ok()),
                n => prop_assert_eq!(result, Err(ValidationError::MultipleControls(n))),
            }
        }
    }
}

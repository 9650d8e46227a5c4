//! Statistics engine
//!
//! Per-variant aggregates and a two-proportion z-test of every treatment
//! against control. All routines return neutral values for empty groups
//! instead of dividing by zero.
//!
//! The standard normal CDF uses the Abramowitz & Stegun 7.1.26 closed-form
//! erf approximation (max absolute error 1.5e-7).

use crate::config::EngineConfig;
use crate::types::{
    ExperimentDefinition, ExperimentResults, Metric, MetricType, Participant, RecommendedAction,
    VariantResult, Winner,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Upper bound applied to reported confidence
pub const MAX_REPORTED_CONFIDENCE: f64 = 95.0;

/// Decision thresholds, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub significance_threshold: f64,
    pub implement_min_confidence: f64,
    pub implement_min_improvement: f64,
    pub test_further_min_confidence: f64,
    pub test_further_min_improvement: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            significance_threshold: 95.0,
            implement_min_confidence: 95.0,
            implement_min_improvement: 10.0,
            test_further_min_confidence: 80.0,
            test_further_min_improvement: 5.0,
        }
    }
}

impl From<&EngineConfig> for DecisionPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            significance_threshold: config.significance_threshold,
            implement_min_confidence: config.significance_threshold,
            implement_min_improvement: config.implement_min_improvement,
            test_further_min_confidence: config.test_further_min_confidence,
            test_further_min_improvement: config.test_further_min_improvement,
        }
    }
}

/// Successes out of trials for one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Proportion {
    pub conversions: u64,
    pub participants: u64,
}

impl Proportion {
    #[inline]
    #[must_use]
    pub fn new(conversions: u64, participants: u64) -> Self {
        Self {
            conversions,
            participants,
        }
    }

    /// Rate as a fraction; 0 for an empty group
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> f64 {
        if self.participants == 0 {
            0.0
        } else {
            self.conversions as f64 / self.participants as f64
        }
    }
}

/// Outcome of a two-proportion z-test
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZTest {
    pub pooled_rate: f64,
    pub standard_error: f64,
    pub z: f64,
    /// Percent, clamped to 0-95
    pub confidence: f64,
    /// Relative change of the variant over control, percent
    pub improvement: f64,
}

/// Error function, Abramowitz & Stegun 7.1.26
#[must_use]
pub fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal CDF
#[inline]
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Two-sided confidence (percent) for a z-score, clamped to 0-95
#[must_use]
pub fn confidence_from_z(z: f64) -> f64 {
    let p_two_sided = 2.0 * (1.0 - normal_cdf(z.abs()));
    ((1.0 - p_two_sided) * 100.0).clamp(0.0, MAX_REPORTED_CONFIDENCE)
}

/// Relative improvement (percent); 0 when the control rate is 0
#[inline]
#[must_use]
pub fn improvement(control_rate: f64, variant_rate: f64) -> f64 {
    if control_rate > 0.0 {
        (variant_rate - control_rate) / control_rate * 100.0
    } else {
        0.0
    }
}

/// Pooled two-proportion z-test of `variant` against `control`
///
/// Empty groups and a zero standard error yield confidence 0. Improvement
/// is reported whenever both groups are non-empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn two_proportion_z_test(control: Proportion, variant: Proportion) -> ZTest {
    if control.participants == 0 || variant.participants == 0 {
        return ZTest::default();
    }

    let rate_control = control.rate();
    let rate_variant = variant.rate();
    let n_control = control.participants as f64;
    let n_variant = variant.participants as f64;

    let pooled_rate =
        (control.conversions + variant.conversions) as f64 / (n_control + n_variant);
    let standard_error =
        (pooled_rate * (1.0 - pooled_rate) * (1.0 / n_control + 1.0 / n_variant)).sqrt();
    let improvement = improvement(rate_control, rate_variant);

    if !(standard_error > 0.0) {
        return ZTest {
            pooled_rate,
            standard_error: 0.0,
            z: 0.0,
            confidence: 0.0,
            improvement,
        };
    }

    let z = (rate_variant - rate_control).abs() / standard_error;
    ZTest {
        pooled_rate,
        standard_error,
        z,
        confidence: confidence_from_z(z),
        improvement,
    }
}

/// Action for a variant given its confidence and improvement
#[must_use]
pub fn recommended_action(
    confidence: f64,
    improvement: f64,
    policy: &DecisionPolicy,
) -> RecommendedAction {
    if confidence >= policy.implement_min_confidence
        && improvement >= policy.implement_min_improvement
    {
        RecommendedAction::Implement
    } else if confidence >= policy.test_further_min_confidence
        && improvement >= policy.test_further_min_improvement
    {
        RecommendedAction::TestFurther
    } else {
        RecommendedAction::Abandon
    }
}

/// Aggregate of one metric over one variant's participants
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn metric_value(metric: &Metric, participants: &[&Participant]) -> f64 {
    let n = participants.len();
    if n == 0 {
        return 0.0;
    }
    match metric.metric_type {
        MetricType::Conversion => {
            let conversions = participants.iter().filter(|p| p.converted).count();
            conversions as f64 / n as f64 * 100.0
        }
        MetricType::Revenue => revenue(participants),
        MetricType::Engagement => {
            let events: usize = participants.iter().map(|p| p.interaction_count()).sum();
            events as f64 / n as f64
        }
        MetricType::Custom => {
            let events = participants
                .iter()
                .flat_map(|p| p.events.iter())
                .filter(|e| e.event_type == metric.id)
                .count();
            events as f64 / n as f64
        }
    }
}

fn revenue(participants: &[&Participant]) -> f64 {
    participants
        .iter()
        .filter(|p| p.converted)
        .map(|p| p.conversion_value)
        .sum()
}

/// Compute results for a definition over a participant snapshot
///
/// The winner is the non-control variant with the highest improvement among
/// those that are significant *and* improve on the control
/// (`improvement > 0`). A variant that is significantly worse than the
/// control is never the winner, so a test can end with no winner even when
/// a difference was detected.
///
/// Insights and recommendations are left empty; see [`crate::report`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_results(
    definition: &ExperimentDefinition,
    participants: &[Participant],
    policy: &DecisionPolicy,
    now: DateTime<Utc>,
) -> ExperimentResults {
    let mut groups: BTreeMap<&str, Vec<&Participant>> = definition
        .variants
        .iter()
        .map(|v| (v.id.as_str(), Vec::new()))
        .collect();
    for participant in participants {
        if let Some(group) = groups.get_mut(participant.variant_id.as_str()) {
            group.push(participant);
        }
    }

    let proportion_of = |id: &str| {
        groups.get(id).map_or_else(Proportion::default, |g| {
            Proportion::new(g.iter().filter(|p| p.converted).count() as u64, g.len() as u64)
        })
    };
    let control = definition
        .control()
        .map_or_else(Proportion::default, |c| proportion_of(&c.id));

    let mut variants: Vec<VariantResult> = definition
        .variants
        .iter()
        .map(|variant| {
            let group = groups.get(variant.id.as_str()).map_or(&[][..], Vec::as_slice);
            let own = proportion_of(&variant.id);
            let test = if variant.is_control {
                ZTest::default()
            } else {
                two_proportion_z_test(control, own)
            };

            VariantResult {
                variant_id: variant.id.clone(),
                participants: own.participants,
                conversions: own.conversions,
                conversion_rate: own.rate() * 100.0,
                revenue: revenue(group),
                metrics: definition
                    .metrics
                    .iter()
                    .map(|m| (m.id.clone(), metric_value(m, group)))
                    .collect(),
                confidence: test.confidence,
                improvement: test.improvement,
                is_winner: false,
                is_statistically_significant: !variant.is_control
                    && test.confidence >= policy.significance_threshold,
            }
        })
        .collect();

    let winner_index = variants
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_statistically_significant && v.improvement > 0.0)
        .max_by(|(_, a), (_, b)| a.improvement.total_cmp(&b.improvement))
        .map(|(i, _)| i);

    let winner = winner_index.map(|i| {
        let row = &mut variants[i];
        row.is_winner = true;
        Winner {
            variant_id: row.variant_id.clone(),
            confidence: row.confidence,
            improvement: row.improvement,
            recommended_action: recommended_action(row.confidence, row.improvement, policy),
        }
    });

    ExperimentResults {
        test_id: definition.id.clone(),
        computed_at: now,
        variants,
        winner,
        insights: Vec::new(),
        recommendations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ExperimentConfig, ParticipantEvent, ParticipantKey, Variant, CONVERSION_EVENT,
    };
    use crate::validation::build_definition;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn erf_reference_points() {
        assert!(approx(erf(0.0), 0.0, 1e-7));
        assert!(approx(erf(1.0), 0.842_700_79, 1e-6));
        assert!(approx(erf(-1.0), -0.842_700_79, 1e-6));
        assert!(approx(normal_cdf(1.96), 0.975, 1e-4));
    }

    #[test]
    fn worked_example_is_significant() {
        let test = two_proportion_z_test(Proportion::new(100, 1000), Proportion::new(150, 1000));

        assert!(approx(test.improvement, 50.0, 1e-9));
        assert!(approx(test.pooled_rate, 0.125, 1e-12));
        // sqrt(0.125 * 0.875 * (1/1000 + 1/1000))
        assert!(approx(test.standard_error, 0.014_79, 1e-5));
        assert!(approx(test.z, 3.38, 0.01));
        assert_eq!(test.confidence, MAX_REPORTED_CONFIDENCE);

        let policy = DecisionPolicy::default();
        assert_eq!(
            recommended_action(test.confidence, test.improvement, &policy),
            RecommendedAction::Implement
        );
    }

    #[test]
    fn empty_variant_is_neutral() {
        let test = two_proportion_z_test(Proportion::new(100, 1000), Proportion::new(0, 0));
        assert_eq!(test.confidence, 0.0);
        assert_eq!(test.improvement, 0.0);
    }

    #[test]
    fn no_conversions_anywhere_is_neutral() {
        let test = two_proportion_z_test(Proportion::new(0, 50), Proportion::new(0, 50));
        assert_eq!(test.confidence, 0.0);
        assert_eq!(test.improvement, 0.0);
        assert_eq!(test.standard_error, 0.0);
    }

    #[test]
    fn zero_control_rate_reports_zero_improvement() {
        let test = two_proportion_z_test(Proportion::new(0, 100), Proportion::new(10, 100));
        assert_eq!(test.improvement, 0.0);
        assert!(test.confidence > 0.0);
    }

    #[test]
    fn small_difference_not_significant() {
        let test = two_proportion_z_test(Proportion::new(100, 1000), Proportion::new(105, 1000));
        assert!(test.confidence < 95.0);
    }

    #[test]
    fn recommended_action_thresholds() {
        let policy = DecisionPolicy::default();
        assert_eq!(recommended_action(95.0, 10.0, &policy), RecommendedAction::Implement);
        assert_eq!(recommended_action(95.0, 9.9, &policy), RecommendedAction::TestFurther);
        assert_eq!(recommended_action(80.0, 5.0, &policy), RecommendedAction::TestFurther);
        assert_eq!(recommended_action(79.9, 50.0, &policy), RecommendedAction::Abandon);
        assert_eq!(recommended_action(95.0, 4.0, &policy), RecommendedAction::Abandon);
    }

    fn definition() -> ExperimentDefinition {
        let config = ExperimentConfig::new("Stats", "owner")
            .with_id("t-stats")
            .with_variant(Variant::control("control", "Control", 50.0))
            .with_variant(Variant::new("b", "B", 50.0))
            .with_metric(Metric::new("signup", "Signups", MetricType::Conversion, 0.1, 0.15).primary())
            .with_metric(Metric::new("rev", "Revenue", MetricType::Revenue, 10.0, 12.0))
            .with_metric(Metric::new("eng", "Engagement", MetricType::Engagement, 1.0, 2.0))
            .with_metric(Metric::new("scroll", "Scroll", MetricType::Custom, 1.0, 2.0));
        build_definition(config, Utc::now()).unwrap()
    }

    fn population(variant: &str, total: usize, converted: usize, value: f64) -> Vec<Participant> {
        (0..total)
            .map(|i| {
                let mut p = Participant::new(
                    ParticipantKey::new(format!("{variant}-{i}"), "t-stats"),
                    variant,
                );
                if i < converted {
                    p.converted = true;
                    p.conversion_value = value;
                    p.events
                        .push(ParticipantEvent::new(CONVERSION_EVENT, serde_json::Value::Null));
                }
                p
            })
            .collect()
    }

    #[test]
    fn compute_results_selects_winner() {
        let def = definition();
        let mut participants = population("control", 1000, 100, 20.0);
        participants.extend(population("b", 1000, 150, 20.0));

        let results = compute_results(&def, &participants, &DecisionPolicy::default(), Utc::now());

        let control = results.variant("control").unwrap();
        assert_eq!(control.participants, 1000);
        assert!(approx(control.conversion_rate, 10.0, 1e-9));
        assert!(!control.is_statistically_significant);

        let b = results.variant("b").unwrap();
        assert!(approx(b.conversion_rate, 15.0, 1e-9));
        assert!(approx(b.revenue, 3000.0, 1e-9));
        assert!(approx(b.metrics["rev"], 3000.0, 1e-9));
        assert!(approx(b.metrics["signup"], 15.0, 1e-9));
        assert!(approx(b.metrics["eng"], 0.15, 1e-9));
        assert_eq!(b.metrics["scroll"], 0.0);
        assert!(b.is_statistically_significant);
        assert!(b.is_winner);

        let winner = results.winner.unwrap();
        assert_eq!(winner.variant_id, "b");
        assert_eq!(winner.recommended_action, RecommendedAction::Implement);
    }

    #[test]
    fn significantly_worse_variant_is_not_winner() {
        let def = definition();
        let mut participants = population("control", 1000, 150, 0.0);
        participants.extend(population("b", 1000, 100, 0.0));

        let results = compute_results(&def, &participants, &DecisionPolicy::default(), Utc::now());
        assert!(results.variant("b").unwrap().is_statistically_significant);
        assert!(results.winner.is_none());
    }

    #[test]
    fn compute_results_without_participants() {
        let def = definition();
        let results = compute_results(&def, &[], &DecisionPolicy::default(), Utc::now());
        assert_eq!(results.variants.len(), 2);
        assert!(results.variants.iter().all(|v| v.confidence == 0.0 && v.improvement == 0.0));
        assert!(results.winner.is_none());
    }

    #[test]
    fn participants_of_unknown_variant_ignored() {
        let def = definition();
        let participants = population("retired", 10, 5, 1.0);
        let results = compute_results(&def, &participants, &DecisionPolicy::default(), Utc::now());
        assert_eq!(results.total_participants(), 0);
    }

    proptest! {
        #[test]
        fn prop_z_test_never_panics(
            cc in 0u64..2000, nc in 0u64..2000,
            cv in 0u64..2000, nv in 0u64..2000,
        ) {
            let control = Proportion::new(cc.min(nc), nc);
            let variant = Proportion::new(cv.min(nv), nv);
            let test = two_proportion_z_test(control, variant);

            prop_assert!(test.confidence.is_finite());
            prop_assert!((0.0..=MAX_REPORTED_CONFIDENCE).contains(&test.confidence));
            prop_assert!(test.improvement.is_finite());
        }
    }
}

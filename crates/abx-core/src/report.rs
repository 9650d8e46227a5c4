//! Insight and report generation
//!
//! Turns computed [`ExperimentResults`] into human-readable insights,
//! recommendations and a day-bucketed timeline. The timeline spreads the
//! final totals proportionally over the elapsed days; it is a reporting
//! approximation, not a ledger.

use crate::types::{
    ExperimentDefinition, ExperimentResults, Insight, InsightKind, MetricGoal, MetricType,
    RecommendedAction, ReportSummary, TestReport, TimelinePoint, VariantPerformance,
};
use chrono::{DateTime, Duration, Utc};

/// Whole days the test has run, rounded up; 0 if never started
#[must_use]
pub fn elapsed_days(definition: &ExperimentDefinition, now: DateTime<Utc>) -> i64 {
    let Some(start) = definition.schedule.start_date else {
        return 0;
    };
    let end = definition.schedule.end_date.unwrap_or(now);
    let seconds = (end - start).num_seconds().max(0);
    ((seconds + 86_399) / 86_400).max(1)
}

fn variant_name<'a>(definition: &'a ExperimentDefinition, id: &'a str) -> &'a str {
    definition.variant(id).map_or(id, |v| v.name.as_str())
}

/// Structured observations about the results
#[must_use]
pub fn insights(
    definition: &ExperimentDefinition,
    results: &ExperimentResults,
    now: DateTime<Utc>,
) -> Vec<Insight> {
    let mut insights = Vec::new();
    let total = results.total_participants();
    let planned = definition.schedule.min_sample_size;

    if let Some(minimum) = planned.filter(|m| total < *m) {
        insights.push(Insight::new(
            InsightKind::Warning,
            "Insufficient sample size",
            format!(
                "{total} participants so far, below the planned minimum of {minimum}; results are not yet reliable"
            ),
        ));
    }

    match &results.winner {
        Some(winner) => insights.push(Insight::new(
            InsightKind::Success,
            "Winner detected",
            format!(
                "{} improves conversion by {:.1}% over control at {:.0}% confidence",
                variant_name(definition, &winner.variant_id),
                winner.improvement,
                winner.confidence
            ),
        )),
        None if total > 0 && planned.map_or(true, |m| total >= m) => {
            insights.push(Insight::new(
                InsightKind::Info,
                "No significant difference",
                "No variant differs from control with statistical significance",
            ));
        }
        None => {}
    }

    let min_days = i64::from(definition.schedule.min_duration_days);
    let ran = elapsed_days(definition, now);
    if definition.schedule.start_date.is_some() && ran < min_days {
        insights.push(Insight::new(
            InsightKind::Warning,
            "Minimum duration not reached",
            format!("Test has run {ran} of the planned {min_days} days"),
        ));
    }

    insights
}

/// Textual recommendations for the reporting layer
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn recommendations(definition: &ExperimentDefinition, results: &ExperimentResults) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(winner) = &results.winner {
        let name = variant_name(definition, &winner.variant_id);
        out.push(match winner.recommended_action {
            RecommendedAction::Implement => format!(
                "Implement {name}: {:.1}% improvement at {:.0}% confidence",
                winner.improvement, winner.confidence
            ),
            RecommendedAction::TestFurther => format!(
                "Continue testing {name}: promising {:.1}% improvement needs more data",
                winner.improvement
            ),
            RecommendedAction::Abandon => format!(
                "Abandon {name}: the effect is too small to justify a rollout"
            ),
        });
    } else if results.total_participants() > 0 {
        out.push("Keep the control experience until a variant shows a significant improvement".to_string());
    }

    let Some(primary) = definition.primary_metric() else {
        return out;
    };
    let treatment_values: Vec<f64> = results
        .variants
        .iter()
        .filter(|v| v.participants > 0)
        .filter(|v| definition.variant(&v.variant_id).is_some_and(|d| !d.is_control))
        .filter_map(|v| v.metrics.get(&primary.id).copied())
        .collect();
    if treatment_values.is_empty() {
        return out;
    }

    let mean = treatment_values.iter().sum::<f64>() / treatment_values.len() as f64;
    // Conversion aggregates are percentages; baselines are proportions.
    let baseline = match primary.metric_type {
        MetricType::Conversion => primary.baseline * 100.0,
        _ => primary.baseline,
    };
    let beats_baseline = match primary.goal {
        MetricGoal::Increase => mean > baseline,
        MetricGoal::Decrease => mean < baseline,
    };
    if beats_baseline {
        out.push(format!(
            "Variants average {mean:.2} on {} against a baseline of {baseline:.2}; iterate on the winning direction",
            primary.name
        ));
    } else {
        out.push(format!(
            "Variants average {mean:.2} on {} against a baseline of {baseline:.2}; revisit the hypothesis",
            primary.name
        ));
    }

    out
}

/// Day-bucketed cumulative participants and conversions
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn timeline(
    definition: &ExperimentDefinition,
    results: &ExperimentResults,
    now: DateTime<Utc>,
) -> Vec<TimelinePoint> {
    let Some(start) = definition.schedule.start_date else {
        return Vec::new();
    };
    let days = elapsed_days(definition, now);
    let participants = results.total_participants() as f64;
    let conversions = results.total_conversions() as f64;

    (1..=days)
        .map(|day| {
            let fraction = day as f64 / days as f64;
            TimelinePoint {
                date: (start + Duration::days(day - 1)).date_naive(),
                participants: (participants * fraction).round() as u64,
                conversions: (conversions * fraction).round() as u64,
            }
        })
        .collect()
}

/// Fill insights and recommendations on freshly computed results
pub fn annotate(definition: &ExperimentDefinition, results: &mut ExperimentResults, now: DateTime<Utc>) {
    results.insights = insights(definition, results, now);
    results.recommendations = recommendations(definition, results);
}

/// Assemble the full report
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_report(
    definition: &ExperimentDefinition,
    results: &ExperimentResults,
    now: DateTime<Utc>,
) -> TestReport {
    let total_participants = results.total_participants();
    let total_conversions = results.total_conversions();

    let summary = ReportSummary {
        test_id: definition.id.clone(),
        name: definition.name.clone(),
        status: definition.status,
        total_participants,
        total_conversions,
        overall_conversion_rate: if total_participants == 0 {
            0.0
        } else {
            total_conversions as f64 / total_participants as f64 * 100.0
        },
        duration_days: elapsed_days(definition, now),
        winner: results.winner.as_ref().map(|w| w.variant_id.clone()),
    };

    let variant_performance = results
        .variants
        .iter()
        .map(|row| {
            let variant = definition.variant(&row.variant_id);
            VariantPerformance {
                variant_id: row.variant_id.clone(),
                name: variant.map_or_else(|| row.variant_id.clone(), |v| v.name.clone()),
                is_control: variant.is_some_and(|v| v.is_control),
                participants: row.participants,
                conversions: row.conversions,
                conversion_rate: row.conversion_rate,
                revenue: row.revenue,
                confidence: row.confidence,
                improvement: row.improvement,
                is_winner: row.is_winner,
            }
        })
        .collect();

    TestReport {
        summary,
        variant_performance,
        timeline: timeline(definition, results, now),
        insights: results.insights.clone(),
        recommendations: results.recommendations.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ExperimentConfig, Metric, TestStatus, Variant, VariantResult, Winner,
    };
    use crate::validation::build_definition;
    use std::collections::BTreeMap;

    fn started_definition(days_ago: i64, now: DateTime<Utc>) -> ExperimentDefinition {
        let config = ExperimentConfig::new("Report", "owner")
            .with_id("t-report")
            .with_variant(Variant::control("control", "Control", 50.0))
            .with_variant(Variant::new("b", "Urgent CTA", 50.0))
            .with_metric(Metric::new("signup", "Signups", MetricType::Conversion, 0.10, 0.15).primary())
            .with_min_duration_days(14);
        let mut def = build_definition(config, now).unwrap();
        def.status = TestStatus::Running;
        def.schedule.start_date = Some(now - Duration::days(days_ago));
        def
    }

    fn row(id: &str, participants: u64, conversions: u64, improvement: f64) -> VariantResult {
        #[allow(clippy::cast_precision_loss)]
        let rate = conversions as f64 / participants as f64 * 100.0;
        VariantResult {
            variant_id: id.to_string(),
            participants,
            conversions,
            conversion_rate: rate,
            revenue: 0.0,
            metrics: BTreeMap::from([("signup".to_string(), rate)]),
            confidence: if id == "control" { 0.0 } else { 95.0 },
            improvement,
            is_winner: false,
            is_statistically_significant: id != "control",
        }
    }

    fn results(winner: bool) -> ExperimentResults {
        ExperimentResults {
            test_id: "t-report".into(),
            computed_at: Utc::now(),
            variants: vec![row("control", 200, 20, 0.0), row("b", 200, 30, 50.0)],
            winner: winner.then(|| Winner {
                variant_id: "b".to_string(),
                confidence: 95.0,
                improvement: 50.0,
                recommended_action: RecommendedAction::Implement,
            }),
            insights: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn insights_flag_small_sample_and_winner() {
        let now = Utc::now();
        let def = started_definition(3, now);
        let found = insights(&def, &results(true), now);

        let titles: Vec<_> = found.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "Insufficient sample size",
                "Winner detected",
                "Minimum duration not reached"
            ]
        );
        assert!(found[0].description.contains("400"));
        assert!(found[0].description.contains("565"));
        assert!(found[1].description.contains("Urgent CTA"));
        assert!(found[1].description.contains("50.0%"));
    }

    #[test]
    fn no_difference_reported_once_sample_reached() {
        let now = Utc::now();
        let mut def = started_definition(20, now);
        def.schedule.min_sample_size = Some(100);
        let found = insights(&def, &results(false), now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, InsightKind::Info);
    }

    #[test]
    fn recommendations_cite_action_and_baseline() {
        let now = Utc::now();
        let def = started_definition(3, now);
        let recs = recommendations(&def, &results(true));
        assert_eq!(recs.len(), 2);
        assert!(recs[0].starts_with("Implement Urgent CTA"));
        assert!(recs[1].contains("baseline of 10.00"));
        assert!(recs[1].contains("iterate"));
    }

    #[test]
    fn timeline_interpolates_totals() {
        let now = Utc::now();
        let def = started_definition(4, now);
        let points = timeline(&def, &results(false), now);

        assert_eq!(points.len(), 4);
        assert_eq!(points[0].participants, 100);
        assert_eq!(points[1].participants, 200);
        assert_eq!(points[3].participants, 400);
        assert_eq!(points[3].conversions, 50);
        assert!(points.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn timeline_empty_for_unstarted_test() {
        let now = Utc::now();
        let mut def = started_definition(1, now);
        def.schedule.start_date = None;
        assert!(timeline(&def, &results(false), now).is_empty());
        assert_eq!(elapsed_days(&def, now), 0);
    }

    #[test]
    fn elapsed_days_rounds_up_partial_days() {
        let now = Utc::now();
        let mut def = started_definition(0, now);
        def.schedule.start_date = Some(now - Duration::hours(25));
        assert_eq!(elapsed_days(&def, now), 2);
        def.schedule.start_date = Some(now);
        assert_eq!(elapsed_days(&def, now), 1);
    }

    #[test]
    fn report_summary_totals() {
        let now = Utc::now();
        let def = started_definition(2, now);
        let report = build_report(&def, &results(true), now);

        assert_eq!(report.summary.total_participants, 400);
        assert_eq!(report.summary.total_conversions, 50);
        assert!((report.summary.overall_conversion_rate - 12.5).abs() < 1e-9);
        assert_eq!(report.summary.winner.as_deref(), Some("b"));
        assert!(report.variant_performance[0].is_control);
        assert_eq!(report.variant_performance[1].name, "Urgent CTA");
        assert_eq!(report.timeline.len(), 2);
    }
}

//! Core types for ABX
//!
//! Defines the data model shared by every engine component:
//! - Experiment definitions, variants, metrics and targeting
//! - Participants and their event logs
//! - Derived results, insights and reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;

/// Event type recorded when a session is bucketed into a variant
pub const VARIANT_ASSIGNED_EVENT: &str = "variant_assigned";

/// Event type recorded when a conversion is accepted
pub const CONVERSION_EVENT: &str = "conversion";

/// Unique experiment identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(pub String);

impl TestId {
    /// Generate a new sortable test ID
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Visitor session identifier, supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Composite key of a participant record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantKey {
    pub session_id: SessionId,
    pub test_id: TestId,
}

impl ParticipantKey {
    #[inline]
    #[must_use]
    pub fn new(session_id: impl Into<SessionId>, test_id: impl Into<TestId>) -> Self {
        Self {
            session_id: session_id.into(),
            test_id: test_id.into(),
        }
    }
}

impl std::fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.test_id, self.session_id)
    }
}

/// Lifecycle status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Created and validated, not yet receiving traffic
    Draft,
    /// Receiving traffic
    Running,
    /// Temporarily not receiving traffic
    Paused,
    /// Stopped with frozen results
    Completed,
    /// Terminal
    Archived,
}

impl TestStatus {
    /// Lowercase name used in logs and errors
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Running => "running",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
            TestStatus::Archived => "archived",
        }
    }

    /// Whether results for this status are frozen
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Archived)
    }

    /// Whether the test still collects participants and events
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, TestStatus::Running | TestStatus::Paused)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single content transform applied by the rendering layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentModification {
    /// Element selector
    pub selector: String,
    /// Property to change (`text`, `style.color`, `href`, ...)
    pub property: String,
    /// New value
    pub value: String,
}

impl ContentModification {
    #[inline]
    #[must_use]
    pub fn new(
        selector: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            selector: selector.into(),
            property: property.into(),
            value: value.into(),
        }
    }
}

/// One arm of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Traffic share in percent (0-100)
    pub weight: f64,
    /// Ordered content transforms
    #[serde(default)]
    pub modifications: Vec<ContentModification>,
    #[serde(default)]
    pub is_control: bool,
}

impl Variant {
    /// Create a treatment variant
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            weight,
            modifications: Vec::new(),
            is_control: false,
        }
    }

    /// Create the control variant
    #[must_use]
    pub fn control(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            is_control: true,
            ..Self::new(id, name, weight)
        }
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a content transform
    #[inline]
    #[must_use]
    pub fn with_modification(mut self, modification: ContentModification) -> Self {
        self.modifications.push(modification);
        self
    }
}

/// Kind of metric tracked by an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Conversion rate (percent of participants converted)
    Conversion,
    /// Mean interaction events per participant
    Engagement,
    /// Sum of conversion values
    Revenue,
    /// Mean count of events whose type equals the metric id
    Custom,
}

/// Desired direction of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGoal {
    Increase,
    Decrease,
}

/// Metric tracked by an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub goal: MetricGoal,
    /// Baseline value; a proportion in (0, 1) for conversion metrics
    pub baseline: f64,
    /// Target value, same unit as `baseline`
    pub target: f64,
    #[serde(default)]
    pub is_primary: bool,
}

impl Metric {
    /// Create a non-primary metric
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric_type: MetricType,
        baseline: f64,
        target: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metric_type,
            goal: MetricGoal::Increase,
            baseline,
            target,
            is_primary: false,
        }
    }

    /// Mark as the primary metric
    #[inline]
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_goal(mut self, goal: MetricGoal) -> Self {
        self.goal = goal;
        self
    }
}

/// Custom targeting rule: `attributes[condition] == value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingRule {
    pub condition: String,
    pub value: String,
}

/// Audience restrictions; empty lists admit everyone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targeting {
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub custom_rules: Vec<TargetingRule>,
}

impl Targeting {
    /// Targeting that admits every session
    #[inline]
    #[must_use]
    pub fn everyone() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_rule(mut self, condition: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_rules.push(TargetingRule {
            condition: condition.into(),
            value: value.into(),
        });
        self
    }
}

/// Visitor attributes evaluated against [`Targeting`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub device: Option<String>,
    pub source: Option<String>,
    pub country: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SessionContext {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Run window and reliability thresholds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Minimum run length in days before results are read
    #[serde(default)]
    pub min_duration_days: u32,
    /// Planned participant minimum, derived from the primary metric
    pub min_sample_size: Option<u64>,
}

/// Caller input for creating an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Explicit id; generated when absent
    #[serde(default)]
    pub id: Option<TestId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Owning entity (technique, page, campaign)
    pub owner_id: String,
    #[serde(default)]
    pub hypothesis: String,
    pub variants: Vec<Variant>,
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub targeting: Targeting,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub created_by: String,
}

impl ExperimentConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            owner_id: owner_id.into(),
            hypothesis: String::new(),
            variants: Vec::new(),
            metrics: Vec::new(),
            targeting: Targeting::default(),
            schedule: Schedule::default(),
            created_by: String::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = hypothesis.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_targeting(mut self, targeting: Targeting) -> Self {
        self.targeting = targeting;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_min_duration_days(mut self, days: u32) -> Self {
        self.schedule.min_duration_days = days;
        self
    }

    #[inline]
    #[must_use]
    pub fn created_by(mut self, owner: impl Into<String>) -> Self {
        self.created_by = owner.into();
        self
    }
}

/// A validated experiment definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    pub id: TestId,
    pub name: String,
    pub description: String,
    pub owner_id: String,
    pub status: TestStatus,
    pub hypothesis: String,
    pub variants: Vec<Variant>,
    pub metrics: Vec<Metric>,
    pub targeting: Targeting,
    pub schedule: Schedule,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    /// Results frozen when the test completed
    #[serde(default)]
    pub results: Option<ExperimentResults>,
}

impl ExperimentDefinition {
    /// The control variant
    #[must_use]
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    /// The primary metric
    #[must_use]
    pub fn primary_metric(&self) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.is_primary)
    }

    /// Lookup a variant by id
    #[must_use]
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }
}

/// One entry of a participant's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ParticipantEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// One session's assignment and outcome for one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub session_id: SessionId,
    pub test_id: TestId,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
    pub converted: bool,
    pub conversion_value: f64,
    #[serde(default)]
    pub converted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<ParticipantEvent>,
}

impl Participant {
    /// Create a fresh, unconverted participant
    #[must_use]
    pub fn new(key: ParticipantKey, variant_id: impl Into<String>) -> Self {
        Self {
            session_id: key.session_id,
            test_id: key.test_id,
            variant_id: variant_id.into(),
            assigned_at: Utc::now(),
            converted: false,
            conversion_value: 0.0,
            converted_at: None,
            events: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> ParticipantKey {
        ParticipantKey {
            session_id: self.session_id.clone(),
            test_id: self.test_id.clone(),
        }
    }

    /// Number of events excluding the assignment marker
    #[must_use]
    pub fn interaction_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type != VARIANT_ASSIGNED_EVENT)
            .count()
    }
}

/// Action recommended for a winning variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Roll the variant out
    Implement,
    /// Promising, collect more data
    TestFurther,
    /// Not worth pursuing
    Abandon,
}

impl RecommendedAction {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Implement => "implement",
            RecommendedAction::TestFurther => "test_further",
            RecommendedAction::Abandon => "abandon",
        }
    }
}

/// Aggregates and comparison against control for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_id: String,
    pub participants: u64,
    pub conversions: u64,
    /// Percent of participants converted
    pub conversion_rate: f64,
    pub revenue: f64,
    /// Aggregate per metric id
    pub metrics: BTreeMap<String, f64>,
    /// Percent, clamped to 0-95
    pub confidence: f64,
    /// Relative improvement over control in percent
    pub improvement: f64,
    pub is_winner: bool,
    pub is_statistically_significant: bool,
}

/// The variant selected as winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub variant_id: String,
    pub confidence: f64,
    pub improvement: f64,
    pub recommended_action: RecommendedAction,
}

/// Severity class of an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Success,
    Warning,
    Info,
}

/// Human-readable observation about a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
}

impl Insight {
    #[must_use]
    pub fn new(kind: InsightKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Derived results of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub test_id: TestId,
    pub computed_at: DateTime<Utc>,
    pub variants: Vec<VariantResult>,
    pub winner: Option<Winner>,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<String>,
}

impl ExperimentResults {
    /// Lookup the row for a variant
    #[must_use]
    pub fn variant(&self, id: &str) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.variant_id == id)
    }

    /// Total participants across variants
    #[must_use]
    pub fn total_participants(&self) -> u64 {
        self.variants.iter().map(|v| v.participants).sum()
    }

    /// Total conversions across variants
    #[must_use]
    pub fn total_conversions(&self) -> u64 {
        self.variants.iter().map(|v| v.conversions).sum()
    }
}

/// Headline numbers of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub test_id: TestId,
    pub name: String,
    pub status: TestStatus,
    pub total_participants: u64,
    pub total_conversions: u64,
    /// Percent
    pub overall_conversion_rate: f64,
    pub duration_days: i64,
    pub winner: Option<String>,
}

/// One row of the variant performance table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPerformance {
    pub variant_id: String,
    pub name: String,
    pub is_control: bool,
    pub participants: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub revenue: f64,
    pub confidence: f64,
    pub improvement: f64,
    pub is_winner: bool,
}

/// One day bucket of the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: chrono::NaiveDate,
    pub participants: u64,
    pub conversions: u64,
}

/// Full report for the reporting layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub summary: ReportSummary,
    pub variant_performance: Vec<VariantPerformance>,
    pub timeline: Vec<TimelinePoint>,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<String>,
}

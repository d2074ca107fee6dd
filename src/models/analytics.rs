use serde::{Deserialize, Serialize};

/// Persisted daily rollup, one row per (date, agent). Trend and
/// top-performer views read these instead of recomputing from raw entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAnalytics {
    pub id: i64,
    pub snapshot_date: String,
    pub agent_id: i64,
    pub total_leads: i64,
    pub active_leads: i64,
    pub deals_won: i64,
    pub deals_lost: i64,
    pub conversion_rate: f64,
    pub win_rate: f64,
    pub revenue_generated: f64,
    pub commission_earned: f64,
    pub pipeline_value: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOverview {
    pub total_count: i64,
    pub active_count: i64,
    pub closed_count: i64,
    pub total_expected_value_of_active: f64,
    pub average_probability_of_active: f64,
}

/// Per-stage slice of the active pipeline. Stages with no active entries are
/// simply absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageBreakdown {
    pub stage: String,
    pub count: i64,
    pub expected_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformance {
    pub agent_id: i64,
    pub total_pipelines: i64,
    pub active_pipelines: i64,
    pub closed_won: i64,
    pub closed_lost: i64,
    pub total_expected_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConversion {
    pub source: String,
    pub total: i64,
    pub closed_won: i64,
    /// Won / total, as a percentage value.
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageVelocity {
    pub stage: String,
    pub avg_days_in_pipeline: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTrendPoint {
    pub date: String,
    pub avg_conversion_rate: f64,
    pub avg_win_rate: f64,
    pub deals_won: i64,
    pub deals_lost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPerformer {
    pub agent_id: i64,
    pub total_leads: i64,
    pub avg_conversion_rate: f64,
    pub deals_won: i64,
    pub revenue_generated: f64,
    pub commission_earned: f64,
    pub avg_win_rate: f64,
}

use serde::{Deserialize, Serialize};

/// One timestamped line in an entry's append-only notes log. The log is a
/// real list in the domain model; it is serialized to a single JSON text
/// column at the storage boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteEntry {
    pub at: i64,
    pub text: String,
}

/// One tracked sales opportunity moving through negotiation stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEntry {
    pub id: String,
    pub lead_id: Option<i64>,
    pub property_id: Option<i64>,
    pub agent_id: Option<i64>,

    pub stage: String,
    pub probability: Option<i64>,

    pub expected_value: Option<f64>,
    pub currency: Option<String>,

    pub source: Option<String>,
    pub priority: Option<String>,

    pub next_action: Option<String>,
    pub next_action_date: Option<i64>,
    pub last_contact_date: Option<i64>,

    pub notes: Vec<NoteEntry>,
    pub tags: Vec<String>,

    pub closed_at: Option<i64>,
    pub close_reason: Option<String>,
    pub actual_value: Option<f64>,
    pub commission_earned: Option<f64>,

    pub days_in_pipeline: Option<i64>,
    pub stage_changes_count: i64,
    pub last_stage_change_date: i64,

    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePipelineEntryInput {
    pub lead_id: Option<i64>,
    pub property_id: Option<i64>,
    pub agent_id: Option<i64>,

    /// Caller-supplied stage value, stored as-is.
    pub stage: String,
    pub probability: Option<i64>,

    pub expected_value: Option<f64>,
    pub currency: Option<String>,

    pub source: Option<String>,
    pub priority: Option<String>,

    pub next_action: Option<String>,
    pub next_action_date: Option<i64>,

    /// Initial free-text note; becomes the first line of the notes log.
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Full-field overwrite payload for PUT. Every field here replaces the stored
/// value, including `stage`. The notes log is append-only and is not part of
/// the overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePipelineEntryInput {
    pub lead_id: Option<i64>,
    pub property_id: Option<i64>,
    pub agent_id: Option<i64>,

    pub stage: String,
    pub probability: Option<i64>,

    pub expected_value: Option<f64>,
    pub currency: Option<String>,

    pub source: Option<String>,
    pub priority: Option<String>,

    pub next_action: Option<String>,
    pub next_action_date: Option<i64>,
    pub last_contact_date: Option<i64>,

    pub tags: Option<Vec<String>>,

    pub close_reason: Option<String>,
    pub actual_value: Option<f64>,
    pub commission_earned: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFilters {
    pub stage: Option<String>,
    pub agent_id: Option<i64>,
    pub source: Option<String>,
    pub priority: Option<String>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

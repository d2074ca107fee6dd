//! Stage transition engine: owns every mutation to a pipeline entry and keeps
//! the derived fields (probability, stage-change counter, days in pipeline)
//! consistent. Reads used by the entry endpoints live here too.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::db::Database;
use crate::engine::stage;
use crate::error::PipelineError;
use crate::models::{
    CreatePipelineEntryInput, NoteEntry, PipelineEntry, PipelineFilters, UpdatePipelineEntryInput,
};

pub(crate) const ENTRY_COLUMNS: &str = "id, lead_id, property_id, agent_id, stage, probability, \
     expected_value, currency, source, priority, next_action, next_action_date, \
     last_contact_date, notes, tags, closed_at, close_reason, actual_value, \
     commission_earned, days_in_pipeline, stage_changes_count, last_stage_change_date, \
     created_at, updated_at";

/// Map a database row (selected with `ENTRY_COLUMNS`) to a PipelineEntry.
pub(crate) fn map_row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<PipelineEntry> {
    let notes_json: String = row.get(13)?;
    let tags_json: String = row.get(14)?;

    Ok(PipelineEntry {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        property_id: row.get(2)?,
        agent_id: row.get(3)?,
        stage: row.get(4)?,
        probability: row.get(5)?,
        expected_value: row.get(6)?,
        currency: row.get(7)?,
        source: row.get(8)?,
        priority: row.get(9)?,
        next_action: row.get(10)?,
        next_action_date: row.get(11)?,
        last_contact_date: row.get(12)?,
        notes: serde_json::from_str(&notes_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        closed_at: row.get(15)?,
        close_reason: row.get(16)?,
        actual_value: row.get(17)?,
        commission_earned: row.get(18)?,
        days_in_pipeline: row.get(19)?,
        stage_changes_count: row.get(20)?,
        last_stage_change_date: row.get(21)?,
        created_at: row.get(22)?,
        updated_at: row.get(23)?,
    })
}

fn lock_conn(db: &Database) -> Result<std::sync::MutexGuard<'_, Connection>, PipelineError> {
    db.conn
        .lock()
        .map_err(|_| PipelineError::Database("database lock poisoned".to_string()))
}

fn fetch_entry(conn: &Connection, id: &str) -> Result<PipelineEntry, PipelineError> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM pipeline_entries WHERE id = ?", ENTRY_COLUMNS),
            [id],
            map_row_to_entry,
        )
        .optional()?;

    entry.ok_or_else(|| PipelineError::NotFound(id.to_string()))
}

fn validate_probability(probability: Option<i64>) -> Result<(), PipelineError> {
    if let Some(p) = probability {
        if !(0..=100).contains(&p) {
            return Err(PipelineError::InvalidArgument(format!(
                "probability must be between 0 and 100, got {}",
                p
            )));
        }
    }
    Ok(())
}

fn days_since(created_at: i64, now: i64) -> i64 {
    ((now - created_at) / 86_400).max(0)
}

pub fn get_entry(db: &Database, id: &str) -> Result<PipelineEntry, PipelineError> {
    let conn = lock_conn(db)?;
    fetch_entry(&conn, id)
}

pub fn list_entries(
    db: &Database,
    filters: Option<PipelineFilters>,
) -> Result<Vec<PipelineEntry>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut query = format!("SELECT {} FROM pipeline_entries WHERE 1=1", ENTRY_COLUMNS);
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(f) = &filters {
        if let Some(stage_filter) = &f.stage {
            if !stage::is_valid_stage(stage_filter) {
                return Err(PipelineError::InvalidArgument(format!(
                    "unrecognized stage: {}",
                    stage_filter
                )));
            }
            conditions.push("stage = ?");
            params.push(Box::new(stage_filter.clone()));
        }
        if let Some(agent_id) = f.agent_id {
            conditions.push("agent_id = ?");
            params.push(Box::new(agent_id));
        }
        if let Some(source) = &f.source {
            conditions.push("source = ?");
            params.push(Box::new(source.clone()));
        }
        if let Some(priority) = &f.priority {
            conditions.push("priority = ?");
            params.push(Box::new(priority.clone()));
        }
        if let Some(start_date) = f.start_date {
            conditions.push("created_at >= ?");
            params.push(Box::new(start_date));
        }
        if let Some(end_date) = f.end_date {
            conditions.push("created_at <= ?");
            params.push(Box::new(end_date));
        }
    }

    if !conditions.is_empty() {
        query.push_str(&format!(" AND {}", conditions.join(" AND ")));
    }

    query.push_str(" ORDER BY created_at DESC");

    if let Some(f) = &filters {
        if let (Some(page), Some(limit)) = (f.page, f.limit) {
            let offset = (page - 1).max(0) * limit;
            query.push_str(" LIMIT ? OFFSET ?");
            params.push(Box::new(limit));
            params.push(Box::new(offset));
        }
    }

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query)?;
    let entries = stmt
        .query_map(param_refs.as_slice(), map_row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn list_by_agent(db: &Database, agent_id: i64) -> Result<Vec<PipelineEntry>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pipeline_entries WHERE agent_id = ? ORDER BY created_at DESC",
        ENTRY_COLUMNS
    ))?;
    let entries = stmt
        .query_map([agent_id], map_row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn list_by_stage(db: &Database, stage_name: &str) -> Result<Vec<PipelineEntry>, PipelineError> {
    if !stage::is_valid_stage(stage_name) {
        return Err(PipelineError::InvalidArgument(format!(
            "unrecognized stage: {}",
            stage_name
        )));
    }

    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pipeline_entries WHERE stage = ? ORDER BY created_at DESC",
        ENTRY_COLUMNS
    ))?;
    let entries = stmt
        .query_map([stage_name], map_row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

/// Create a new entry. The caller-supplied stage is trusted as-is and no
/// default probability is assigned; the stage table only applies on
/// transitions.
pub fn create_entry(
    db: &Database,
    input: CreatePipelineEntryInput,
) -> Result<PipelineEntry, PipelineError> {
    validate_probability(input.probability)?;

    let id = {
        let conn = lock_conn(db)?;

        let id = format!(
            "PIPE-{}-{}",
            Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4()
        );
        let now = Utc::now().timestamp();

        let notes: Vec<NoteEntry> = match input.notes.as_deref() {
            Some(text) if !text.is_empty() => vec![NoteEntry {
                at: now,
                text: text.to_string(),
            }],
            _ => Vec::new(),
        };
        let tags = input.tags.unwrap_or_default();

        let currency = input.currency.unwrap_or_else(|| "USD".to_string());

        conn.execute(
            "INSERT INTO pipeline_entries (
                id, lead_id, property_id, agent_id, stage, probability,
                expected_value, currency, source, priority,
                next_action, next_action_date, notes, tags,
                stage_changes_count, last_stage_change_date, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
            rusqlite::params![
                id,
                input.lead_id,
                input.property_id,
                input.agent_id,
                input.stage,
                input.probability,
                input.expected_value,
                currency,
                input.source,
                input.priority,
                input.next_action,
                input.next_action_date,
                serde_json::to_string(&notes)?,
                serde_json::to_string(&tags)?,
                now,
                now,
                now
            ],
        )?;

        id
    };

    get_entry(db, &id)
}

/// Full-field overwrite. Stage-change bookkeeping happens before the other
/// fields are applied; a terminal stage pulls the close-out fields from the
/// patch.
pub fn update_entry(
    db: &Database,
    id: &str,
    input: UpdatePipelineEntryInput,
) -> Result<PipelineEntry, PipelineError> {
    validate_probability(input.probability)?;

    {
        let conn = lock_conn(db)?;
        let stored = fetch_entry(&conn, id)?;

        let now = Utc::now().timestamp();

        let stage_changed = input.stage != stored.stage;
        let stage_changes_count = if stage_changed {
            stored.stage_changes_count + 1
        } else {
            stored.stage_changes_count
        };
        let last_stage_change_date = if stage_changed {
            now
        } else {
            stored.last_stage_change_date
        };

        let (closed_at, close_reason, actual_value, commission_earned) =
            if stage::is_terminal(&input.stage) {
                (
                    Some(now),
                    input.close_reason,
                    input.actual_value,
                    input.commission_earned,
                )
            } else {
                (None, None, None, None)
            };

        let days_in_pipeline = days_since(stored.created_at, now);

        let tags = input.tags.unwrap_or_default();

        conn.execute(
            "UPDATE pipeline_entries SET
                lead_id = ?, property_id = ?, agent_id = ?, stage = ?, probability = ?,
                expected_value = ?, currency = ?, source = ?, priority = ?,
                next_action = ?, next_action_date = ?, last_contact_date = ?, tags = ?,
                closed_at = ?, close_reason = ?, actual_value = ?, commission_earned = ?,
                days_in_pipeline = ?, stage_changes_count = ?, last_stage_change_date = ?,
                updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                input.lead_id,
                input.property_id,
                input.agent_id,
                input.stage,
                input.probability,
                input.expected_value,
                input.currency,
                input.source,
                input.priority,
                input.next_action,
                input.next_action_date,
                input.last_contact_date,
                serde_json::to_string(&tags)?,
                closed_at,
                close_reason,
                actual_value,
                commission_earned,
                days_in_pipeline,
                stage_changes_count,
                last_stage_change_date,
                now,
                id
            ],
        )?;
    }

    get_entry(db, id)
}

/// Targeted transition: the probability always comes from the stage table,
/// ignoring whatever the caller last set.
pub fn move_to_stage(
    db: &Database,
    id: &str,
    new_stage: &str,
    notes: Option<String>,
) -> Result<PipelineEntry, PipelineError> {
    {
        let conn = lock_conn(db)?;
        let stored = fetch_entry(&conn, id)?;

        let now = Utc::now().timestamp();
        let probability = stage::default_probability(new_stage);

        let mut note_log = stored.notes;
        if let Some(text) = notes.as_deref() {
            if !text.is_empty() {
                note_log.push(NoteEntry {
                    at: now,
                    text: text.to_string(),
                });
            }
        }

        conn.execute(
            "UPDATE pipeline_entries SET
                stage = ?, probability = ?, notes = ?,
                stage_changes_count = stage_changes_count + 1,
                last_stage_change_date = ?, days_in_pipeline = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                new_stage,
                probability,
                serde_json::to_string(&note_log)?,
                now,
                days_since(stored.created_at, now),
                now,
                id
            ],
        )?;
    }

    get_entry(db, id)
}

/// Log a contact touch. Never changes stage, probability, or the
/// stage-change counter.
pub fn update_contact(
    db: &Database,
    id: &str,
    notes: Option<String>,
) -> Result<PipelineEntry, PipelineError> {
    {
        let conn = lock_conn(db)?;
        let stored = fetch_entry(&conn, id)?;

        let now = Utc::now().timestamp();

        let mut note_log = stored.notes;
        if let Some(text) = notes.as_deref() {
            if !text.is_empty() {
                note_log.push(NoteEntry {
                    at: now,
                    text: format!("Contact: {}", text),
                });
            }
        }

        conn.execute(
            "UPDATE pipeline_entries SET
                last_contact_date = ?, notes = ?, days_in_pipeline = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                now,
                serde_json::to_string(&note_log)?,
                days_since(stored.created_at, now),
                now,
                id
            ],
        )?;
    }

    get_entry(db, id)
}

/// Win closure. Forces CLOSED_WON with probability 100 and records the deal
/// outcome. Distinct from a stage transition: the stage-change counter stays
/// untouched.
pub fn close_deal(
    db: &Database,
    id: &str,
    close_reason: Option<String>,
    actual_value: f64,
    commission_earned: f64,
) -> Result<PipelineEntry, PipelineError> {
    if !actual_value.is_finite() || actual_value < 0.0 {
        return Err(PipelineError::InvalidArgument(
            "actualValue must be a non-negative amount".to_string(),
        ));
    }
    if !commission_earned.is_finite() || commission_earned < 0.0 {
        return Err(PipelineError::InvalidArgument(
            "commissionEarned must be a non-negative amount".to_string(),
        ));
    }

    {
        let conn = lock_conn(db)?;
        let stored = fetch_entry(&conn, id)?;

        let now = Utc::now().timestamp();

        conn.execute(
            "UPDATE pipeline_entries SET
                stage = ?, probability = 100, closed_at = ?, close_reason = ?,
                actual_value = ?, commission_earned = ?, days_in_pipeline = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                stage::CLOSED_WON,
                now,
                close_reason,
                actual_value,
                commission_earned,
                days_since(stored.created_at, now),
                now,
                id
            ],
        )?;
    }

    get_entry(db, id)
}

/// Loss closure. Forces CLOSED_LOST with probability 0.
pub fn lose_deal(
    db: &Database,
    id: &str,
    close_reason: Option<String>,
) -> Result<PipelineEntry, PipelineError> {
    {
        let conn = lock_conn(db)?;
        let stored = fetch_entry(&conn, id)?;

        let now = Utc::now().timestamp();

        conn.execute(
            "UPDATE pipeline_entries SET
                stage = ?, probability = 0, closed_at = ?, close_reason = ?,
                days_in_pipeline = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                stage::CLOSED_LOST,
                now,
                close_reason,
                days_since(stored.created_at, now),
                now,
                id
            ],
        )?;
    }

    get_entry(db, id)
}

/// Hard delete. Unknown ids fail with NotFound; a repeated delete gets the
/// same answer.
pub fn delete_entry(db: &Database, id: &str) -> Result<(), PipelineError> {
    let conn = lock_conn(db)?;

    let deleted = conn.execute("DELETE FROM pipeline_entries WHERE id = ?", [id])?;
    if deleted == 0 {
        return Err(PipelineError::NotFound(id.to_string()));
    }

    Ok(())
}

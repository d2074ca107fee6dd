//! Read-side aggregations over pipeline entries. Nothing here mutates; every
//! view is computed from whatever the store holds at call time. Empty inputs
//! produce zero-valued aggregates, never errors.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

use crate::db::Database;
use crate::engine::entries::{map_row_to_entry, ENTRY_COLUMNS};
use crate::error::PipelineError;
use crate::models::{
    AgentPerformance, ConversionTrendPoint, PipelineEntry, PipelineOverview, SourceConversion,
    StageBreakdown, StageVelocity, TopPerformer,
};

fn lock_conn(
    db: &Database,
) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, PipelineError> {
    db.conn
        .lock()
        .map_err(|_| PipelineError::Database("database lock poisoned".to_string()))
}

fn validate_date_range(start_date: &str, end_date: &str) -> Result<(), PipelineError> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d").map_err(|_| {
        PipelineError::InvalidArgument(format!("unparsable start date: {}", start_date))
    })?;
    let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d").map_err(|_| {
        PipelineError::InvalidArgument(format!("unparsable end date: {}", end_date))
    })?;

    if end < start {
        return Err(PipelineError::InvalidArgument(format!(
            "end date {} precedes start date {}",
            end_date, start_date
        )));
    }

    Ok(())
}

/// Pipeline totals. "Active" means not in a closed stage; missing expected
/// values and probabilities count as zero rather than being excluded.
pub fn overview(db: &Database) -> Result<PipelineOverview, PipelineError> {
    let conn = lock_conn(db)?;

    let total_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM pipeline_entries", [], |row| row.get(0))
        .unwrap_or(0);

    let active_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pipeline_entries
             WHERE stage NOT IN ('CLOSED_WON', 'CLOSED_LOST')",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let total_expected_value_of_active: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(COALESCE(expected_value, 0)), 0.0) FROM pipeline_entries
             WHERE stage NOT IN ('CLOSED_WON', 'CLOSED_LOST')",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0.0);

    let average_probability_of_active: f64 = conn
        .query_row(
            "SELECT COALESCE(AVG(COALESCE(probability, 0)), 0.0) FROM pipeline_entries
             WHERE stage NOT IN ('CLOSED_WON', 'CLOSED_LOST')",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0.0);

    Ok(PipelineOverview {
        total_count,
        active_count,
        closed_count: total_count - active_count,
        total_expected_value_of_active,
        average_probability_of_active,
    })
}

/// Count and expected value per stage, active entries only. Stages with no
/// active entries are absent from the result.
pub fn stage_breakdown(db: &Database) -> Result<Vec<StageBreakdown>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(
        "SELECT stage, COUNT(*), COALESCE(SUM(COALESCE(expected_value, 0)), 0.0)
         FROM pipeline_entries
         WHERE stage NOT IN ('CLOSED_WON', 'CLOSED_LOST')
         GROUP BY stage
         ORDER BY stage",
    )?;

    let breakdown = stmt
        .query_map([], |row| {
            Ok(StageBreakdown {
                stage: row.get(0)?,
                count: row.get(1)?,
                expected_value: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(breakdown)
}

/// Per-agent rollup. Entries without an agent are excluded entirely. The
/// expected-value sum covers all of the agent's entries, not just active
/// ones.
pub fn agent_performance(db: &Database) -> Result<Vec<AgentPerformance>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(
        "SELECT agent_id, stage, COALESCE(expected_value, 0)
         FROM pipeline_entries
         WHERE agent_id IS NOT NULL",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_agent: HashMap<i64, AgentPerformance> = HashMap::new();

    for (agent_id, stage, expected_value) in rows {
        let perf = by_agent.entry(agent_id).or_insert(AgentPerformance {
            agent_id,
            total_pipelines: 0,
            active_pipelines: 0,
            closed_won: 0,
            closed_lost: 0,
            total_expected_value: 0.0,
        });

        perf.total_pipelines += 1;
        perf.total_expected_value += expected_value;

        if stage == "CLOSED_WON" {
            perf.closed_won += 1;
        } else if stage == "CLOSED_LOST" {
            perf.closed_lost += 1;
        }
        if !stage.starts_with("CLOSED") {
            perf.active_pipelines += 1;
        }
    }

    let mut performances: Vec<AgentPerformance> = by_agent.into_values().collect();
    performances.sort_by_key(|p| p.agent_id);

    Ok(performances)
}

/// Conversion rate per lead source. Entries without a source are excluded;
/// the rate is won over total as a percentage.
pub fn source_analysis(db: &Database) -> Result<Vec<SourceConversion>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(
        "SELECT source, stage FROM pipeline_entries
         WHERE source IS NOT NULL AND source != ''",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_source: HashMap<String, (i64, i64)> = HashMap::new();

    for (source, stage) in rows {
        let counts = by_source.entry(source).or_insert((0, 0));
        counts.0 += 1;
        if stage == "CLOSED_WON" {
            counts.1 += 1;
        }
    }

    let mut conversions: Vec<SourceConversion> = by_source
        .into_iter()
        .map(|(source, (total, won))| SourceConversion {
            source,
            total,
            closed_won: won,
            conversion_rate: if total > 0 {
                (won as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        })
        .collect();
    conversions.sort_by(|a, b| a.source.cmp(&b.source));

    Ok(conversions)
}

/// Average days in pipeline per stage, over entries where the field has been
/// computed. Ordered by stage name.
pub fn stage_velocity(db: &Database) -> Result<Vec<StageVelocity>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(
        "SELECT stage, AVG(days_in_pipeline), COUNT(*)
         FROM pipeline_entries
         WHERE days_in_pipeline IS NOT NULL
         GROUP BY stage
         ORDER BY stage",
    )?;

    let velocity = stmt
        .query_map([], |row| {
            Ok(StageVelocity {
                stage: row.get(0)?,
                avg_days_in_pipeline: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(velocity)
}

/// Daily conversion/win-rate series over the persisted rollups. A
/// rollup-of-rollups: raw entries are not rescanned.
pub fn conversion_trends(
    db: &Database,
    start_date: &str,
    end_date: &str,
) -> Result<Vec<ConversionTrendPoint>, PipelineError> {
    validate_date_range(start_date, end_date)?;

    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(
        "SELECT snapshot_date, COALESCE(AVG(conversion_rate), 0.0), COALESCE(AVG(win_rate), 0.0),
                COALESCE(SUM(deals_won), 0), COALESCE(SUM(deals_lost), 0)
         FROM pipeline_analytics
         WHERE snapshot_date >= ? AND snapshot_date <= ?
         GROUP BY snapshot_date
         ORDER BY snapshot_date",
    )?;

    let trends = stmt
        .query_map([start_date, end_date], |row| {
            Ok(ConversionTrendPoint {
                date: row.get(0)?,
                avg_conversion_rate: row.get(1)?,
                avg_win_rate: row.get(2)?,
                deals_won: row.get(3)?,
                deals_lost: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(trends)
}

/// Agents ranked by revenue generated within the date range, from the
/// persisted rollups.
pub fn top_performers(
    db: &Database,
    start_date: &str,
    end_date: &str,
    limit: i64,
) -> Result<Vec<TopPerformer>, PipelineError> {
    validate_date_range(start_date, end_date)?;

    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(
        "SELECT agent_id, COALESCE(SUM(total_leads), 0), COALESCE(AVG(conversion_rate), 0.0),
                COALESCE(SUM(deals_won), 0), COALESCE(SUM(revenue_generated), 0.0),
                COALESCE(SUM(commission_earned), 0.0), COALESCE(AVG(win_rate), 0.0)
         FROM pipeline_analytics
         WHERE snapshot_date >= ? AND snapshot_date <= ?
         GROUP BY agent_id
         ORDER BY SUM(revenue_generated) DESC
         LIMIT ?",
    )?;

    let performers = stmt
        .query_map(
            rusqlite::params![start_date, end_date, limit],
            |row| {
                Ok(TopPerformer {
                    agent_id: row.get(0)?,
                    total_leads: row.get(1)?,
                    avg_conversion_rate: row.get(2)?,
                    deals_won: row.get(3)?,
                    revenue_generated: row.get(4)?,
                    commission_earned: row.get(5)?,
                    avg_win_rate: row.get(6)?,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(performers)
}

fn query_entries(
    db: &Database,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<PipelineEntry>, PipelineError> {
    let conn = lock_conn(db)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pipeline_entries WHERE {} ORDER BY created_at DESC",
        ENTRY_COLUMNS, where_clause
    ))?;

    let entries = stmt
        .query_map(params, map_row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn active_entries(db: &Database) -> Result<Vec<PipelineEntry>, PipelineError> {
    query_entries(db, "stage NOT IN ('CLOSED_WON', 'CLOSED_LOST')", &[])
}

pub fn urgent_leads(db: &Database) -> Result<Vec<PipelineEntry>, PipelineError> {
    query_entries(
        db,
        "priority = 'URGENT' AND stage NOT IN ('CLOSED_WON', 'CLOSED_LOST')",
        &[],
    )
}

/// Entries at or above the probability floor. The bound is inclusive.
pub fn high_probability_leads(
    db: &Database,
    min_probability: i64,
) -> Result<Vec<PipelineEntry>, PipelineError> {
    query_entries(db, "probability >= ?", &[&min_probability])
}

/// Entries whose last contact is older than the threshold, or that were never
/// contacted at all.
pub fn leads_needing_follow_up(
    db: &Database,
    threshold_days: i64,
) -> Result<Vec<PipelineEntry>, PipelineError> {
    let cutoff = Utc::now().timestamp() - threshold_days * 86_400;
    query_entries(
        db,
        "last_contact_date IS NULL OR last_contact_date < ?",
        &[&cutoff],
    )
}

/// Entries with a next action scheduled within the coming day.
pub fn upcoming_actions(db: &Database) -> Result<Vec<PipelineEntry>, PipelineError> {
    let now = Utc::now().timestamp();
    let horizon = now + 86_400;
    query_entries(
        db,
        "next_action_date IS NOT NULL AND next_action_date >= ? AND next_action_date <= ?",
        &[&now, &horizon],
    )
}

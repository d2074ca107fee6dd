//! Daily analytics snapshot writer. Collapses the current entry set into one
//! pre-aggregated row per (day, agent) that the trend and top-performer views
//! read later.

use chrono::Utc;
use std::collections::HashMap;

use crate::db::Database;
use crate::engine::stage;
use crate::error::PipelineError;

#[derive(Default)]
struct AgentTotals {
    total: i64,
    active: i64,
    won: i64,
    lost: i64,
    revenue: f64,
    commission: f64,
    pipeline_value: f64,
}

/// Write today's rollup, one row per agent. Regenerating within the same day
/// replaces that day's rows.
pub fn generate_daily_snapshot(db: &Database) -> Result<usize, PipelineError> {
    let conn = db
        .conn
        .lock()
        .map_err(|_| PipelineError::Database("database lock poisoned".to_string()))?;

    let mut stmt = conn.prepare(
        "SELECT agent_id, stage, COALESCE(expected_value, 0),
                COALESCE(actual_value, 0), COALESCE(commission_earned, 0)
         FROM pipeline_entries
         WHERE agent_id IS NOT NULL",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_agent: HashMap<i64, AgentTotals> = HashMap::new();

    for (agent_id, stage_name, expected, actual, commission) in rows {
        let totals = by_agent.entry(agent_id).or_default();
        totals.total += 1;

        if stage_name == stage::CLOSED_WON {
            totals.won += 1;
            totals.revenue += actual;
            totals.commission += commission;
        } else if stage_name == stage::CLOSED_LOST {
            totals.lost += 1;
        }
        if !stage::is_terminal(&stage_name) {
            totals.active += 1;
            totals.pipeline_value += expected;
        }
    }

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let now = Utc::now().timestamp();
    let mut written = 0;

    for (agent_id, totals) in by_agent {
        let conversion_rate = if totals.total > 0 {
            (totals.won as f64 / totals.total as f64) * 100.0
        } else {
            0.0
        };
        let closed = totals.won + totals.lost;
        let win_rate = if closed > 0 {
            (totals.won as f64 / closed as f64) * 100.0
        } else {
            0.0
        };

        conn.execute(
            "INSERT INTO pipeline_analytics (
                snapshot_date, agent_id, total_leads, active_leads, deals_won, deals_lost,
                conversion_rate, win_rate, revenue_generated, commission_earned,
                pipeline_value, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(snapshot_date, agent_id) DO UPDATE SET
                total_leads = excluded.total_leads,
                active_leads = excluded.active_leads,
                deals_won = excluded.deals_won,
                deals_lost = excluded.deals_lost,
                conversion_rate = excluded.conversion_rate,
                win_rate = excluded.win_rate,
                revenue_generated = excluded.revenue_generated,
                commission_earned = excluded.commission_earned,
                pipeline_value = excluded.pipeline_value,
                created_at = excluded.created_at",
            rusqlite::params![
                today,
                agent_id,
                totals.total,
                totals.active,
                totals.won,
                totals.lost,
                conversion_rate,
                win_rate,
                totals.revenue,
                totals.commission,
                totals.pipeline_value,
                now
            ],
        )?;
        written += 1;
    }

    log::info!("Daily analytics snapshot: {} agent rows for {}", written, today);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entries::{close_deal, create_entry};
    use crate::models::CreatePipelineEntryInput;

    fn input(agent_id: i64, stage_name: &str, expected: Option<f64>) -> CreatePipelineEntryInput {
        CreatePipelineEntryInput {
            lead_id: None,
            property_id: None,
            agent_id: Some(agent_id),
            stage: stage_name.to_string(),
            probability: None,
            expected_value: expected,
            currency: None,
            source: None,
            priority: None,
            next_action: None,
            next_action_date: None,
            notes: None,
            tags: None,
        }
    }

    #[test]
    fn snapshot_on_empty_store_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(generate_daily_snapshot(&db).unwrap(), 0);
    }

    #[test]
    fn regenerating_same_day_replaces_rows() {
        let db = Database::open_in_memory().unwrap();
        create_entry(&db, input(1, stage::LEAD, Some(40_000.0))).unwrap();

        assert_eq!(generate_daily_snapshot(&db).unwrap(), 1);

        let won = create_entry(&db, input(1, stage::NEGOTIATION, Some(120_000.0))).unwrap();
        close_deal(&db, &won.id, None, 120_000.0, 3_600.0).unwrap();

        assert_eq!(generate_daily_snapshot(&db).unwrap(), 1);

        let conn = db.conn.lock().unwrap();
        let (rows, won_count, revenue): (i64, i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), SUM(deals_won), SUM(revenue_generated) FROM pipeline_analytics",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();

        assert_eq!(rows, 1, "same-day regeneration must not duplicate rows");
        assert_eq!(won_count, 1);
        assert_eq!(revenue, 120_000.0);
    }

    #[test]
    fn snapshot_rates_cover_won_and_lost() {
        let db = Database::open_in_memory().unwrap();
        let won = create_entry(&db, input(5, stage::LEAD, None)).unwrap();
        close_deal(&db, &won.id, None, 50_000.0, 1_500.0).unwrap();
        create_entry(&db, input(5, stage::LEAD, Some(10_000.0))).unwrap();

        generate_daily_snapshot(&db).unwrap();

        let conn = db.conn.lock().unwrap();
        let (conversion, win, pipeline_value): (f64, f64, f64) = conn
            .query_row(
                "SELECT conversion_rate, win_rate, pipeline_value FROM pipeline_analytics WHERE agent_id = 5",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();

        assert_eq!(conversion, 50.0);
        assert_eq!(win, 100.0);
        assert_eq!(pipeline_value, 10_000.0);
    }
}

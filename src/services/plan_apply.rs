use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::repositories::placement_repository::{PlacementRepository, PlacementRow};
use crate::error::AppResult;
use crate::models::block::{ScheduledBlock, SolverResult};
use crate::models::input::BlockSource;

/// Recomputed scheduled start/end summary for one task, reported to the
/// external data layer after application. Cleared fields mean the task no
/// longer has placements in the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskScheduleWindow {
    pub task_id: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
}

/// Churn report of one plan application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// External-calendar references of removed or moved placements, for the
    /// sync collaborator to retract.
    pub removed_external_refs: Vec<String>,
    pub task_windows: Vec<TaskScheduleWindow>,
}

/// Apply a solver result to the persisted placements of one user as an
/// idempotent diff: rows are paired index-for-index per (source, sourceId)
/// group and updated in place to minimize churn; orphans and groups absent
/// from the plan are deleted. Applying the same result twice performs no
/// writes the second time. The caller wraps this in a transaction.
pub fn apply_plan(
    conn: &Connection,
    user_id: &str,
    result: &SolverResult,
    now: DateTime<Utc>,
) -> AppResult<ApplyOutcome> {
    let window_start = result.horizon_start.to_rfc3339();
    let window_end = result.horizon_end.to_rfc3339();
    let existing =
        PlacementRepository::list_overlapping(conn, user_id, &window_start, &window_end)?;

    let mut outcome = ApplyOutcome::default();

    // Orphaned rows lost their linking id; they are always swept.
    let mut existing_groups: BTreeMap<(String, String), Vec<PlacementRow>> = BTreeMap::new();
    for row in existing {
        match row.source_id.clone() {
            Some(source_id) => {
                existing_groups
                    .entry((row.source.clone(), source_id))
                    .or_default()
                    .push(row);
            }
            None => {
                debug!(target: "app::apply", placement_id = %row.id, "deleting orphaned placement");
                collect_ref(&mut outcome, row.external_ref.as_deref());
                PlacementRepository::delete(conn, &row.id)?;
                outcome.deleted += 1;
            }
        }
    }

    let mut new_groups: BTreeMap<(String, String), Vec<&ScheduledBlock>> = BTreeMap::new();
    for block in &result.blocks {
        new_groups
            .entry((block.source.as_str().to_string(), block.source_id.clone()))
            .or_default()
            .push(block);
    }
    for blocks in new_groups.values_mut() {
        blocks.sort_by_key(|b| b.start);
    }

    let mut task_ids: Vec<String> = Vec::new();

    for ((source, source_id), blocks) in &new_groups {
        if source == BlockSource::Task.as_str() {
            task_ids.push(source_id.clone());
        }
        let old_rows = existing_groups
            .remove(&(source.clone(), source_id.clone()))
            .unwrap_or_default();

        let paired = old_rows.len().min(blocks.len());
        for index in 0..paired {
            let old = &old_rows[index];
            apply_pairing(conn, user_id, old, blocks[index], now, &mut outcome)?;
        }
        for old in old_rows.iter().skip(paired) {
            collect_ref(&mut outcome, old.external_ref.as_deref());
            PlacementRepository::delete(conn, &old.id)?;
            outcome.deleted += 1;
        }
        for block in blocks.iter().skip(paired) {
            PlacementRepository::insert(conn, &row_for_block(user_id, block, now))?;
            outcome.inserted += 1;
        }
    }

    // Groups the solver no longer produces disappear entirely.
    for ((source, source_id), old_rows) in existing_groups {
        if source == BlockSource::Task.as_str() {
            task_ids.push(source_id.clone());
        }
        for old in old_rows {
            collect_ref(&mut outcome, old.external_ref.as_deref());
            PlacementRepository::delete(conn, &old.id)?;
            outcome.deleted += 1;
        }
    }

    task_ids.sort();
    task_ids.dedup();
    for task_id in task_ids {
        let key = (BlockSource::Task.as_str().to_string(), task_id.clone());
        let window = new_groups.get(&key).map(|blocks| {
            let start = blocks.iter().map(|b| b.start).min().expect("nonempty group");
            let end = blocks.iter().map(|b| b.end).max().expect("nonempty group");
            (start, end)
        });
        outcome.task_windows.push(TaskScheduleWindow {
            task_id,
            scheduled_start: window.map(|(s, _)| s),
            scheduled_end: window.map(|(_, e)| e),
        });
    }

    info!(
        target: "app::apply",
        user_id = %user_id,
        inserted = outcome.inserted,
        updated = outcome.updated,
        deleted = outcome.deleted,
        unchanged = outcome.unchanged,
        "plan applied"
    );
    Ok(outcome)
}

/// Update the oldest-matching existing row in place; identical rows are left
/// untouched so re-application writes nothing.
fn apply_pairing(
    conn: &Connection,
    user_id: &str,
    old: &PlacementRow,
    block: &ScheduledBlock,
    now: DateTime<Utc>,
    outcome: &mut ApplyOutcome,
) -> AppResult<()> {
    let desired = PlacementRow {
        id: old.id.clone(),
        user_id: user_id.to_string(),
        source: block.source.as_str().to_string(),
        source_id: Some(block.source_id.clone()),
        title: block.title.clone(),
        start_at: block.start.to_rfc3339(),
        end_at: block.end.to_rfc3339(),
        priority: block.priority.clone(),
        calendar_id: block.calendar_id.clone(),
        color: block.color.clone(),
        location: block.location.clone(),
        external_ref: old.external_ref.clone(),
        created_at: old.created_at.clone(),
        updated_at: old.updated_at.clone(),
    };
    if desired == *old {
        outcome.unchanged += 1;
        return Ok(());
    }

    let mut desired = desired;
    let moved = desired.start_at != old.start_at || desired.end_at != old.end_at;
    if moved {
        // A moved block invalidates its synced calendar event; the sync layer
        // retracts it and re-exports the new time.
        collect_ref(outcome, old.external_ref.as_deref());
        desired.external_ref = None;
    }
    desired.updated_at = now.to_rfc3339();
    PlacementRepository::update(conn, &desired)?;
    outcome.updated += 1;
    Ok(())
}

fn collect_ref(outcome: &mut ApplyOutcome, external_ref: Option<&str>) {
    if let Some(external_ref) = external_ref {
        outcome.removed_external_refs.push(external_ref.to_string());
    }
}

fn row_for_block(user_id: &str, block: &ScheduledBlock, now: DateTime<Utc>) -> PlacementRow {
    PlacementRow {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        source: block.source.as_str().to_string(),
        source_id: Some(block.source_id.clone()),
        title: block.title.clone(),
        start_at: block.start.to_rfc3339(),
        end_at: block.end.to_rfc3339(),
        priority: block.priority.clone(),
        calendar_id: block.calendar_id.clone(),
        color: block.color.clone(),
        location: block.location.clone(),
        external_ref: None,
        created_at: now.to_rfc3339(),
        updated_at: now.to_rfc3339(),
    }
}

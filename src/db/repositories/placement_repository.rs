use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use crate::error::{AppError, AppResult};

/// One persisted placement row. Timestamps are RFC 3339 TEXT; `source_id` is
/// nullable because a row can lose its linking id (an orphan) and orphans are
/// always swept by plan application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRow {
    pub id: String,
    pub user_id: String,
    pub source: String,
    pub source_id: Option<String>,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub priority: String,
    pub calendar_id: Option<String>,
    pub color: Option<String>,
    pub location: Option<String>,
    pub external_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<&Row<'_>> for PlacementRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            source: row.get("source")?,
            source_id: row.get("source_id")?,
            title: row.get("title")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            priority: row.get("priority")?,
            calendar_id: row.get("calendar_id")?,
            color: row.get("color")?,
            location: row.get("location")?,
            external_ref: row.get("external_ref")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    id,
    user_id,
    source,
    source_id,
    title,
    start_at,
    end_at,
    priority,
    calendar_id,
    color,
    location,
    external_ref,
    created_at,
    updated_at
"#;

pub struct PlacementRepository;

impl PlacementRepository {
    /// Rows overlapping the half-open window, ordered by start for stable
    /// index-for-index pairing.
    pub fn list_overlapping(
        conn: &Connection,
        user_id: &str,
        window_start: &str,
        window_end: &str,
    ) -> AppResult<Vec<PlacementRow>> {
        let sql = format!(
            r#"
                SELECT {} FROM scheduled_placements
                WHERE user_id = :user_id
                  AND end_at > :window_start
                  AND start_at < :window_end
                ORDER BY start_at ASC, id ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":user_id": user_id,
                    ":window_start": window_start,
                    ":window_end": window_end,
                },
                |row| PlacementRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<PlacementRow>> {
        let sql = format!(
            r#"
                SELECT {} FROM scheduled_placements
                WHERE user_id = ?1
                ORDER BY start_at ASC, id ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([user_id], |row| PlacementRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert(conn: &Connection, row: &PlacementRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO scheduled_placements (
                    id,
                    user_id,
                    source,
                    source_id,
                    title,
                    start_at,
                    end_at,
                    priority,
                    calendar_id,
                    color,
                    location,
                    external_ref,
                    created_at,
                    updated_at
                ) VALUES (
                    :id,
                    :user_id,
                    :source,
                    :source_id,
                    :title,
                    :start_at,
                    :end_at,
                    :priority,
                    :calendar_id,
                    :color,
                    :location,
                    :external_ref,
                    :created_at,
                    :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":source": &row.source,
                ":source_id": &row.source_id,
                ":title": &row.title,
                ":start_at": &row.start_at,
                ":end_at": &row.end_at,
                ":priority": &row.priority,
                ":calendar_id": &row.calendar_id,
                ":color": &row.color,
                ":location": &row.location,
                ":external_ref": &row.external_ref,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn update(conn: &Connection, row: &PlacementRow) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE scheduled_placements SET
                    title = :title,
                    start_at = :start_at,
                    end_at = :end_at,
                    priority = :priority,
                    calendar_id = :calendar_id,
                    color = :color,
                    location = :location,
                    external_ref = :external_ref,
                    updated_at = :updated_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": &row.id,
                ":title": &row.title,
                ":start_at": &row.start_at,
                ":end_at": &row.end_at,
                ":priority": &row.priority,
                ":calendar_id": &row.calendar_id,
                ":color": &row.color,
                ":location": &row.location,
                ":external_ref": &row.external_ref,
                ":updated_at": &row.updated_at,
            },
        )?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
        let affected = conn.execute("DELETE FROM scheduled_placements WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use tempfile::tempdir;

    fn row(id: &str, start_at: &str, end_at: &str) -> PlacementRow {
        PlacementRow {
            id: id.into(),
            user_id: "user-1".into(),
            source: "task".into(),
            source_id: Some("task-1".into()),
            title: "Deep work".into(),
            start_at: start_at.into(),
            end_at: end_at.into(),
            priority: "medium".into(),
            calendar_id: None,
            color: None,
            location: None,
            external_ref: None,
            created_at: "2025-03-01T00:00:00+00:00".into(),
            updated_at: "2025-03-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn overlap_query_is_half_open() {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("placements.sqlite")).expect("pool");
        let conn = pool.get_connection().unwrap();

        PlacementRepository::insert(
            &conn,
            &row("a", "2025-03-03T09:00:00+00:00", "2025-03-03T10:00:00+00:00"),
        )
        .unwrap();
        PlacementRepository::insert(
            &conn,
            &row("b", "2025-03-10T09:00:00+00:00", "2025-03-10T10:00:00+00:00"),
        )
        .unwrap();

        let hits = PlacementRepository::list_overlapping(
            &conn,
            "user-1",
            "2025-03-03T00:00:00+00:00",
            "2025-03-04T00:00:00+00:00",
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        // A row ending exactly at the window start is excluded.
        let misses = PlacementRepository::list_overlapping(
            &conn,
            "user-1",
            "2025-03-03T10:00:00+00:00",
            "2025-03-04T00:00:00+00:00",
        )
        .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn update_and_delete_require_an_existing_row() {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("placements.sqlite")).expect("pool");
        let conn = pool.get_connection().unwrap();

        let mut record = row("a", "2025-03-03T09:00:00+00:00", "2025-03-03T10:00:00+00:00");
        PlacementRepository::insert(&conn, &record).unwrap();
        record.title = "Deeper work".into();
        PlacementRepository::update(&conn, &record).unwrap();
        let stored = PlacementRepository::list_for_user(&conn, "user-1").unwrap();
        assert_eq!(stored[0].title, "Deeper work");

        PlacementRepository::delete(&conn, "a").unwrap();
        assert!(matches!(
            PlacementRepository::delete(&conn, "a"),
            Err(AppError::NotFound)
        ));
    }
}

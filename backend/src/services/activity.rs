//! Activity log shared by the mutation services

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppResult;

/// A row in the activity log
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Append an entry inside the caller's transaction
pub async fn record(
    conn: &mut PgConnection,
    user_id: Uuid,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    details: serde_json::Value,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO activity_logs (user_id, action, entity_type, entity_id, details)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .execute(conn)
    .await?;

    Ok(())
}

/// Most recent entries for one entity
pub async fn list_for_entity(
    db: &PgPool,
    entity_type: &str,
    entity_id: Uuid,
    limit: i64,
) -> AppResult<Vec<ActivityLog>> {
    let entries = sqlx::query_as::<_, ActivityLog>(
        r#"
        SELECT id, user_id, action, entity_type, entity_id, details, created_at
        FROM activity_logs
        WHERE entity_type = $1 AND entity_id = $2
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(entries)
}

use crate::error::AppError;
use crate::models::{Depository, DepositoryId, DepositoryStatus};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::instrument;

use super::Database;

#[derive(Clone)]
pub struct DepositoryRepository {
    pool: SqlitePool,
}

impl DepositoryRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_user_depositories(
        &self,
        user_id: &str,
    ) -> Result<Vec<Depository>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT depository_id, bank_name, holder, holder_type, type, routing_number,
                   account_number, status, metadata, created_at, last_updated_at
            FROM depositories
            WHERE user_id = ?1 AND deleted_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(depository_from_row).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_user_depository(
        &self,
        id: &DepositoryId,
        user_id: &str,
    ) -> Result<Option<Depository>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT depository_id, bank_name, holder, holder_type, type, routing_number,
                   account_number, status, metadata, created_at, last_updated_at
            FROM depositories
            WHERE depository_id = ?1 AND user_id = ?2 AND deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(depository_from_row).transpose()
    }

    /// Insert-or-ignore with an update fallback, the write pattern the rest
    /// of the service relies on for idempotent creates.
    #[instrument(skip(self, dep), fields(depository_id = %dep.id))]
    pub async fn upsert_user_depository(
        &self,
        user_id: &str,
        dep: &Depository,
    ) -> Result<(), AppError> {
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO depositories
              (depository_id, user_id, bank_name, holder, holder_type, type, routing_number,
               account_number, status, metadata, created_at, last_updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&dep.id)
        .bind(user_id)
        .bind(&dep.bank_name)
        .bind(&dep.holder)
        .bind(dep.holder_type.as_str())
        .bind(dep.account_type.as_str())
        .bind(&dep.routing_number)
        .bind(&dep.account_number)
        .bind(dep.status.as_str())
        .bind(&dep.metadata)
        .bind(dep.created)
        .bind(dep.updated)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            sqlx::query(
                r#"
                UPDATE depositories
                SET bank_name = ?1, holder = ?2, holder_type = ?3, type = ?4,
                    routing_number = ?5, account_number = ?6, status = ?7, metadata = ?8,
                    last_updated_at = ?9
                WHERE depository_id = ?10 AND user_id = ?11 AND deleted_at IS NULL
                "#,
            )
            .bind(&dep.bank_name)
            .bind(&dep.holder)
            .bind(dep.holder_type.as_str())
            .bind(dep.account_type.as_str())
            .bind(&dep.routing_number)
            .bind(&dep.account_number)
            .bind(dep.status.as_str())
            .bind(&dep.metadata)
            .bind(Utc::now())
            .bind(&dep.id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_depository_status(
        &self,
        id: &DepositoryId,
        user_id: &str,
        status: DepositoryStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE depositories SET status = ?1, last_updated_at = ?2
            WHERE depository_id = ?3 AND user_id = ?4 AND deleted_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_user_depository(
        &self,
        id: &DepositoryId,
        user_id: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE depositories SET deleted_at = ?1
            WHERE depository_id = ?2 AND user_id = ?3 AND deleted_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn depository_from_row(row: &SqliteRow) -> Result<Depository, AppError> {
    let holder_type: String = row.try_get("holder_type")?;
    let account_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    Ok(Depository {
        id: row.try_get("depository_id")?,
        bank_name: row.try_get("bank_name")?,
        holder: row.try_get("holder")?,
        holder_type: holder_type.try_into().map_err(AppError::DatabaseError)?,
        account_type: account_type.try_into().map_err(AppError::DatabaseError)?,
        routing_number: row.try_get("routing_number")?,
        account_number: row.try_get("account_number")?,
        status: status.try_into().map_err(AppError::DatabaseError)?,
        metadata: row.try_get("metadata")?,
        created: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated: row.try_get::<DateTime<Utc>, _>("last_updated_at")?,
    })
}

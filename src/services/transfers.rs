use crate::error::AppError;
use crate::models::{Amount, Transfer, TransferId, TransferRequest, TransferStatus};
use crate::services::metrics::{DB_QUERY_DURATION, TRANSFERS_SKIPPED};
use chrono::{DateTime, Days, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{Database, DepositoryRepository};

#[derive(Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

/// A transfer joined with enough depository data to group it by destination.
#[derive(Debug, Clone)]
pub struct GroupableTransfer {
    pub id: TransferId,
    pub user_id: String,
    /// Routing number of the receiving depository.
    pub destination: String,
    pub file_id: String,
    pub created_at: DateTime<Utc>,
}

impl TransferRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    #[instrument(skip(self, requests))]
    pub async fn create_user_transfers(
        &self,
        user_id: &str,
        requests: Vec<TransferRequest>,
    ) -> Result<Vec<Transfer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_transfer"])
            .start_timer();

        let mut transfers = Vec::with_capacity(requests.len());
        for req in requests {
            if req.missing_fields() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "missing required transfer fields"
                )));
            }
            let now = Utc::now();
            let transfer = Transfer {
                id: Uuid::new_v4().to_string(),
                transfer_type: req.transfer_type.unwrap(),
                amount: req.amount.unwrap(),
                originator: req.originator,
                originator_depository: req.originator_depository,
                receiver: req.receiver,
                receiver_depository: req.receiver_depository,
                description: req.description,
                standard_entry_class_code: req.standard_entry_class_code,
                status: TransferStatus::Pending,
                same_day: req.same_day,
                created: now,
            };
            transfer.validate().map_err(AppError::BadRequest)?;

            sqlx::query(
                r#"
                INSERT INTO transfers
                  (transfer_id, user_id, type, amount, originator_id, originator_depository,
                   receiver_id, receiver_depository, description, standard_entry_class_code,
                   status, same_day, file_id, transaction_id, created_at, last_updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
            )
            .bind(&transfer.id)
            .bind(user_id)
            .bind(transfer.transfer_type.as_str())
            .bind(transfer.amount.to_string())
            .bind(&transfer.originator)
            .bind(&transfer.originator_depository)
            .bind(&transfer.receiver)
            .bind(&transfer.receiver_depository)
            .bind(&transfer.description)
            .bind(&transfer.standard_entry_class_code)
            .bind(transfer.status.as_str())
            .bind(transfer.same_day)
            .bind(&req.file_id)
            .bind(&req.transaction_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            transfers.push(transfer);
        }

        timer.observe_duration();
        Ok(transfers)
    }

    #[instrument(skip(self))]
    pub async fn get_user_transfers(&self, user_id: &str) -> Result<Vec<Transfer>, AppError> {
        let rows = sqlx::query(TRANSFER_SELECT_BY_USER)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transfer_from_row).collect()
    }

    #[instrument(skip(self))]
    pub async fn get_user_transfer(
        &self,
        id: &TransferId,
        user_id: &str,
    ) -> Result<Option<Transfer>, AppError> {
        let row = sqlx::query(TRANSFER_SELECT_BY_ID)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transfer_from_row).transpose()
    }

    #[instrument(skip(self))]
    pub async fn delete_user_transfer(
        &self,
        id: &TransferId,
        user_id: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE transfers SET deleted_at = ?1 WHERE transfer_id = ?2 AND user_id = ?3 AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_transfer_status(
        &self,
        id: &TransferId,
        status: TransferStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE transfers SET status = ?1, last_updated_at = ?2 WHERE transfer_id = ?3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn file_id_for_transfer(
        &self,
        id: &TransferId,
        user_id: &str,
    ) -> Result<String, AppError> {
        let row = sqlx::query(
            "SELECT file_id FROM transfers WHERE transfer_id = ?1 AND user_id = ?2 AND deleted_at IS NULL LIMIT 1",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|r| r.try_get::<String, _>("file_id"))
            .transpose()?
            .unwrap_or_default())
    }

    /// Records the merged filename and trace number. Merged transfers are
    /// never reselected by the cursor.
    #[instrument(skip(self))]
    pub async fn mark_transfer_as_merged(
        &self,
        id: &TransferId,
        filename: &str,
        trace_number: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE transfers SET merged_filename = ?1, trace_number = ?2, last_updated_at = ?3
            WHERE transfer_id = ?4 AND deleted_at IS NULL
            "#,
        )
        .bind(filename)
        .bind(trace_number)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_return_code(
        &self,
        id: &TransferId,
        return_code: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE transfers SET return_code = ?1, last_updated_at = ?2 WHERE transfer_id = ?3",
        )
        .bind(return_code)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve a return entry back to its originating transfer. The match is
    /// a composite key bounded by a one-banking-day window on either side of
    /// the effective entry date.
    #[instrument(skip(self, amount))]
    pub async fn lookup_transfer_from_return(
        &self,
        sec: &str,
        amount: &Amount,
        trace_number: &str,
        effective_entry_date: DateTime<Utc>,
    ) -> Result<Option<(Transfer, String)>, AppError> {
        let date = effective_entry_date.date_naive();
        let window_start = date
            .checked_sub_days(Days::new(1))
            .unwrap_or(date)
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let window_end = date
            .checked_add_days(Days::new(1))
            .unwrap_or(date)
            .and_hms_opt(23, 59, 59)
            .unwrap()
            .and_utc();

        let row = sqlx::query(
            r#"
            SELECT transfer_id, user_id, type, amount, originator_id, originator_depository,
                   receiver_id, receiver_depository, description, standard_entry_class_code,
                   status, same_day, created_at
            FROM transfers
            WHERE standard_entry_class_code = ?1 AND amount = ?2 AND trace_number = ?3
              AND created_at BETWEEN ?4 AND ?5 AND deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(sec)
        .bind(amount.to_string())
        .bind(trace_number)
        .bind(window_start)
        .bind(window_end)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let user_id: String = row.try_get("user_id")?;
                Ok(Some((transfer_from_row(&row)?, user_id)))
            }
            None => Ok(None),
        }
    }

    /// A fresh cursor over pending, unmerged transfers in creation order.
    pub fn transfer_cursor(
        &self,
        batch_size: usize,
        dep_repo: DepositoryRepository,
    ) -> TransferCursor {
        TransferCursor {
            pool: self.pool.clone(),
            dep_repo,
            batch_size,
            newer_than: DateTime::UNIX_EPOCH,
        }
    }
}

/// Pages through pending unmerged transfers. The high-water `newer_than`
/// timestamp only advances, so a cursor never revisits rows it has handed
/// out, even if they stay unmerged.
pub struct TransferCursor {
    pool: SqlitePool,
    dep_repo: DepositoryRepository,
    batch_size: usize,
    newer_than: DateTime<Utc>,
}

impl TransferCursor {
    /// The next block of up to `batch_size` transfers joined against their
    /// depositories. An empty block signals exhaustion. A block whose rows
    /// all got skipped rolls forward into the next one rather than ending
    /// the pass early.
    pub async fn next(&mut self) -> Result<Vec<GroupableTransfer>, AppError> {
        loop {
            let block = self.next_block().await?;
            match block {
                Some(block) if block.is_empty() => continue,
                Some(block) => return Ok(block),
                None => return Ok(Vec::new()),
            }
        }
    }

    /// `None` when the underlying query is exhausted; otherwise the rows
    /// that survived the depository join.
    async fn next_block(&mut self) -> Result<Option<Vec<GroupableTransfer>>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT transfer_id, user_id, originator_depository, receiver_depository,
                   file_id, created_at
            FROM transfers
            WHERE status = ?1 AND (merged_filename IS NULL OR merged_filename = '')
              AND created_at > ?2 AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT ?3
            "#,
        )
        .bind(TransferStatus::Pending.as_str())
        .bind(self.newer_than)
        .bind(self.batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("transfer_id")?;
            let user_id: String = row.try_get("user_id")?;
            let orig_dep_id: String = row.try_get("originator_depository")?;
            let recv_dep_id: String = row.try_get("receiver_depository")?;
            let file_id: String = row.try_get("file_id")?;
            let created_at: DateTime<Utc> = row.try_get("created_at")?;

            if created_at > self.newer_than {
                self.newer_than = created_at;
            }

            let orig_dep = self.dep_repo.get_user_depository(&orig_dep_id, &user_id).await?;
            let recv_dep = self.dep_repo.get_user_depository(&recv_dep_id, &user_id).await?;
            let Some(recv_dep) = recv_dep else {
                warn!(transfer_id = %id, depository_id = %recv_dep_id, "skipping transfer: receiver depository missing");
                TRANSFERS_SKIPPED.with_label_values(&["missing_depository"]).inc();
                continue;
            };
            if orig_dep.is_none() {
                warn!(transfer_id = %id, depository_id = %orig_dep_id, "skipping transfer: originator depository missing");
                TRANSFERS_SKIPPED.with_label_values(&["missing_depository"]).inc();
                continue;
            }

            out.push(GroupableTransfer {
                id,
                user_id,
                destination: recv_dep.routing_number,
                file_id,
                created_at,
            });
        }
        Ok(Some(out))
    }
}

/// Splits one cursor block into per-destination groups, preserving input
/// order within each group.
pub fn group_transfers(xfers: Vec<GroupableTransfer>) -> Vec<Vec<GroupableTransfer>> {
    let mut out: Vec<Vec<GroupableTransfer>> = Vec::new();
    for xfer in xfers {
        match out.iter_mut().find(|g| g[0].destination == xfer.destination) {
            Some(group) => group.push(xfer),
            None => out.push(vec![xfer]),
        }
    }
    out
}

const TRANSFER_SELECT_BY_USER: &str = r#"
SELECT transfer_id, user_id, type, amount, originator_id, originator_depository,
       receiver_id, receiver_depository, description, standard_entry_class_code,
       status, same_day, created_at
FROM transfers
WHERE user_id = ?1 AND deleted_at IS NULL
ORDER BY created_at ASC
"#;

const TRANSFER_SELECT_BY_ID: &str = r#"
SELECT transfer_id, user_id, type, amount, originator_id, originator_depository,
       receiver_id, receiver_depository, description, standard_entry_class_code,
       status, same_day, created_at
FROM transfers
WHERE transfer_id = ?1 AND user_id = ?2 AND deleted_at IS NULL
LIMIT 1
"#;

fn transfer_from_row(row: &SqliteRow) -> Result<Transfer, AppError> {
    let transfer_type: String = row.try_get("type")?;
    let amount: String = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    Ok(Transfer {
        id: row.try_get("transfer_id")?,
        transfer_type: transfer_type.try_into().map_err(AppError::DatabaseError)?,
        amount: amount.parse().map_err(AppError::DatabaseError)?,
        originator: row.try_get("originator_id")?,
        originator_depository: row.try_get("originator_depository")?,
        receiver: row.try_get("receiver_id")?,
        receiver_depository: row.try_get("receiver_depository")?,
        description: row.try_get("description")?,
        standard_entry_class_code: row.try_get("standard_entry_class_code")?,
        status: status.try_into().map_err(AppError::DatabaseError)?,
        same_day: row.try_get("same_day")?,
        created: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealscan_core::{DealMetrics, IngestedRecord, Snapshot, Source, StoredRecord};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::records::{ChangeApplied, RecordChange, RecordHistory, RecordStore, StoreError};

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const RECORD_COLUMNS: &str = r#"
    id, source, external_id, name, url, start_at, end_at,
    quantity_sold, net_revenue, margin, price,
    first_seen_at, last_seen_at, updated_at
"#;

fn metrics_from_row(row: &PgRow) -> Result<DealMetrics, StoreError> {
    Ok(DealMetrics {
        quantity_sold: row.try_get("quantity_sold")?,
        net_revenue: row.try_get("net_revenue")?,
        margin: row.try_get("margin")?,
        price: row.try_get("price")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<StoredRecord, StoreError> {
    let source_text: String = row.try_get("source")?;
    let source = source_text
        .parse::<Source>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(StoredRecord {
        id: row.try_get("id")?,
        record: IngestedRecord {
            source,
            external_id: row.try_get("external_id")?,
            name: row.try_get("name")?,
            metrics: metrics_from_row(row)?,
            url: row.try_get("url")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
        },
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl PgRecordStore {
    async fn insert_record(
        &self,
        record: &IngestedRecord,
        seen_at: DateTime<Utc>,
    ) -> Result<ChangeApplied, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ingested_records (
                id, source, external_id, name, url, start_at, end_at,
                quantity_sold, net_revenue, margin, price,
                first_seen_at, last_seen_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $12)
            ON CONFLICT (source, external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.source.as_str())
        .bind(&record.external_id)
        .bind(&record.name)
        .bind(&record.url)
        .bind(record.start_at)
        .bind(record.end_at)
        .bind(record.metrics.quantity_sold)
        .bind(record.metrics.net_revenue)
        .bind(record.metrics.margin)
        .bind(record.metrics.price)
        .bind(seen_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ChangeApplied::Applied(row.try_get("id")?)),
            None => Ok(ChangeApplied::Conflict),
        }
    }

    async fn update_with_snapshot(
        &self,
        id: Uuid,
        expected: DealMetrics,
        next: DealMetrics,
        seen_at: DateTime<Utc>,
    ) -> Result<ChangeApplied, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE ingested_records
               SET quantity_sold = $2,
                   net_revenue = $3,
                   margin = $4,
                   price = $5,
                   last_seen_at = $6,
                   updated_at = $6
             WHERE id = $1
               AND quantity_sold = $7
               AND net_revenue = $8
               AND margin = $9
               AND price = $10
            "#,
        )
        .bind(id)
        .bind(next.quantity_sold)
        .bind(next.net_revenue)
        .bind(next.margin)
        .bind(next.price)
        .bind(seen_at)
        .bind(expected.quantity_sold)
        .bind(expected.net_revenue)
        .bind(expected.margin)
        .bind(expected.price)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ChangeApplied::Conflict);
        }

        sqlx::query(
            r#"
            INSERT INTO record_snapshots (
                id, record_id, quantity_sold, net_revenue, margin, price, captured_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(expected.quantity_sold)
        .bind(expected.net_revenue)
        .bind(expected.margin)
        .bind(expected.price)
        .bind(seen_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ChangeApplied::Applied(id))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_record(
        &self,
        source: Source,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM ingested_records WHERE source = $1 AND external_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(source.as_str())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn apply_change(&self, change: RecordChange) -> Result<ChangeApplied, StoreError> {
        match change {
            RecordChange::Create { record, seen_at } => self.insert_record(&record, seen_at).await,
            RecordChange::Update {
                id,
                expected,
                next,
                seen_at,
            } => self.update_with_snapshot(id, expected, next, seen_at).await,
            RecordChange::Touch { id, seen_at } => {
                let touched = sqlx::query(
                    "UPDATE ingested_records SET last_seen_at = $2 WHERE id = $1",
                )
                .bind(id)
                .bind(seen_at)
                .execute(&self.pool)
                .await?;
                if touched.rows_affected() == 0 {
                    Ok(ChangeApplied::Conflict)
                } else {
                    Ok(ChangeApplied::Applied(id))
                }
            }
        }
    }

    async fn history(
        &self,
        source: Source,
        external_id: &str,
    ) -> Result<Option<RecordHistory>, StoreError> {
        let Some(record) = self.find_record(source, external_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT id, record_id, quantity_sold, net_revenue, margin, price, captured_at
              FROM record_snapshots
             WHERE record_id = $1
             ORDER BY captured_at ASC, id ASC
            "#,
        )
        .bind(record.id)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(Snapshot {
                id: row.try_get("id")?,
                record_id: row.try_get("record_id")?,
                metrics: metrics_from_row(&row)?,
                captured_at: row.try_get("captured_at")?,
            });
        }
        Ok(Some(RecordHistory { record, snapshots }))
    }
}

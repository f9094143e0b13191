//! Postgres-backed sink.

use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use gradq_core::CandidateRecord;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;

use crate::sink::{validate_view_name, IngestSink, SinkError, SinkTransaction};

#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("connecting to DATABASE_URL")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Every row of the analytics view, as JSON objects keyed by column name.
    pub async fn analytics_summary(&self, view: &str) -> Result<Vec<serde_json::Value>, SinkError> {
        let view = validate_view_name(view)?;
        let stmt = format!("SELECT to_jsonb(s) AS summary FROM \"{view}\" s");
        let rows = sqlx::query(&stmt).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("summary")?);
        }
        Ok(out)
    }
}

#[async_trait]
impl IngestSink for PgSink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SinkError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSinkTransaction { tx }))
    }
}

pub struct PgSinkTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SinkTransaction for PgSinkTransaction {
    async fn read_watermark(&mut self, source: &str) -> Result<Option<String>, SinkError> {
        let row = sqlx::query("SELECT last_seen FROM ingestion_watermarks WHERE source = $1")
            .bind(source)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("last_seen")?,
            None => None,
        })
    }

    async fn recent_identifiers(&mut self, limit: usize) -> Result<HashSet<String>, SinkError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT url
              FROM applicants
             WHERE url IS NOT NULL
             ORDER BY p_id DESC
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("url")?);
        }
        Ok(out)
    }

    async fn insert_record(&mut self, record: &CandidateRecord) -> Result<bool, SinkError> {
        let result = sqlx::query(
            r#"
            INSERT INTO applicants (
                program, university, degree, status, term, us_or_international,
                comments, decision_date, date_added, url,
                gpa, gre, gre_v, gre_aw,
                llm_generated_program, llm_generated_university
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(&record.program)
        .bind(&record.institution)
        .bind(record.degree.as_str())
        .bind(record.decision.as_str())
        .bind(record.term.as_deref())
        .bind(record.nationality.map(|n| n.as_str()))
        .bind(&record.comment)
        .bind(record.decision_date.as_deref())
        .bind(&record.listing_date)
        .bind(record.external_id.as_deref())
        .bind(record.gpa)
        .bind(record.gre_quant)
        .bind(record.gre_verbal)
        .bind(record.gre_aw)
        .bind(record.llm_generated_program.as_deref())
        .bind(record.llm_generated_university.as_deref())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_watermark(&mut self, source: &str, last_seen: &str) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_watermarks (source, last_seen, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (source) DO UPDATE SET
                last_seen = GREATEST(
                    ingestion_watermarks.last_seen COLLATE "C",
                    EXCLUDED.last_seen COLLATE "C"
                ),
                updated_at = now()
            "#,
        )
        .bind(source)
        .bind(last_seen)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn refresh_materialized_view(&mut self, name: &str) -> Result<(), SinkError> {
        let name = validate_view_name(name)?;
        let stmt = format!("REFRESH MATERIALIZED VIEW \"{name}\"");
        debug!(view = name, "refreshing materialized view");
        sqlx::query(&stmt).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}

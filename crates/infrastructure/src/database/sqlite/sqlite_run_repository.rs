use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};
use trainer_core::{
    duration::format_duration,
    models::{HyperParameters, Run, RunQuery, RunStatus, SortOrder},
    traits::RunRepository,
    TrainerResult,
};

const RUN_COLUMNS: &str = "id, run_id, status, start_time, end_time, duration, triggered_by, logs, \
                           rank, reg_param, alpha, max_iter, created_at, updated_at";

pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> TrainerResult<Run> {
        let hyper_parameters = HyperParameters::from_columns(
            row.try_get("rank")?,
            row.try_get("reg_param")?,
            row.try_get("alpha")?,
            row.try_get("max_iter")?,
        );
        let logs: Option<String> = row.try_get("logs")?;

        Ok(Run {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            status: row.try_get("status")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            duration: row.try_get("duration")?,
            triggered_by: row.try_get("triggered_by")?,
            logs: logs.unwrap_or_default(),
            hyper_parameters,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 先读后写的事务必须一开始就持有写锁。
    /// WAL 下延迟事务在读之后升级为写时，若期间有其他连接提交，会直接返回 SQLITE_BUSY_SNAPSHOT 而不等待。
    async fn begin_write(&self) -> TrainerResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// 在事务内读取状态和开始时间
    async fn status_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> TrainerResult<Option<(RunStatus, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT status, start_time FROM model_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        match row {
            Some(row) => Ok(Some((row.try_get("status")?, row.try_get("start_time")?))),
            None => Ok(None),
        }
    }

    /// 写入终态：状态、结束时间、时长，并追加日志
    async fn close_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        status: RunStatus,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
        log: &str,
    ) -> TrainerResult<()> {
        sqlx::query(
            r#"
            UPDATE model_runs
            SET status = $2, end_time = $3, duration = $4, logs = COALESCE(logs, '') || $5, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(now)
        .bind(format_duration(now - start_time))
        .bind(log)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn append_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        log: &str,
    ) -> TrainerResult<()> {
        sqlx::query(
            "UPDATE model_runs SET logs = COALESCE(logs, '') || $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(log)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    #[instrument(skip(self, run), fields(run_id = %run.id, alias = %run.run_id, status = %run.status))]
    async fn create(&self, run: &Run) -> TrainerResult<Run> {
        let params = run.hyper_parameters;
        sqlx::query(
            r#"
            INSERT INTO model_runs (id, run_id, status, start_time, end_time, duration, triggered_by, logs,
                                    rank, reg_param, alpha, max_iter, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&run.id)
        .bind(&run.run_id)
        .bind(run.status)
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(&run.duration)
        .bind(run.triggered_by)
        .bind(&run.logs)
        .bind(params.map(|p| p.rank))
        .bind(params.map(|p| p.reg_param))
        .bind(params.map(|p| p.alpha))
        .bind(params.map(|p| p.max_iter))
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("创建训练运行成功: {} ({})", run.run_id, run.id);
        Ok(run.clone())
    }

    async fn get_by_id(&self, id: &str) -> TrainerResult<Option<Run>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM model_runs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn find_by_id_or_alias(&self, key: &str) -> TrainerResult<Option<Run>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM model_runs WHERE id = $1 OR run_id = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn alias_exists(&self, run_id: &str) -> TrainerResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM model_runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn get_status(&self, id: &str) -> TrainerResult<Option<RunStatus>> {
        let status = sqlx::query_scalar::<_, RunStatus>("SELECT status FROM model_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    async fn list(&self, query: &RunQuery) -> TrainerResult<(Vec<Run>, i64)> {
        const FILTER: &str = "($1 IS NULL OR status = $1) AND ($2 IS NULL OR triggered_by = $2)";

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM model_runs WHERE {FILTER}"))
                .bind(query.status)
                .bind(query.triggered_by)
                .fetch_one(&self.pool)
                .await?;

        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM model_runs WHERE {FILTER} \
             ORDER BY start_time {direction}, rowid {direction} LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(query.status)
            .bind(query.triggered_by)
            .bind(query.limit as i64)
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?;

        let runs = rows.iter().map(Self::row_to_run).collect::<TrainerResult<Vec<_>>>()?;
        Ok((runs, total))
    }

    async fn find_active(&self) -> TrainerResult<Vec<Run>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM model_runs WHERE status IN ('queued', 'running') ORDER BY start_time"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn find_completed(&self) -> TrainerResult<Vec<Run>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM model_runs \
             WHERE status IN ('success', 'failed') AND end_time IS NOT NULL ORDER BY start_time"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn latest(&self) -> TrainerResult<Option<Run>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM model_runs ORDER BY start_time DESC, rowid DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn count_by_status(&self) -> TrainerResult<HashMap<RunStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM model_runs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: HashMap<RunStatus, i64> =
            RunStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for row in rows {
            let status: RunStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    #[instrument(skip(self, note))]
    async fn cancel_active(&self, now: DateTime<Utc>, note: &str) -> TrainerResult<Vec<Run>> {
        let mut tx = self.begin_write().await?;

        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM model_runs WHERE status IN ('queued', 'running') ORDER BY start_time"
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *tx).await?;
        let mut cancelled = rows.iter().map(Self::row_to_run).collect::<TrainerResult<Vec<_>>>()?;

        for run in cancelled.iter_mut() {
            Self::close_in_tx(&mut tx, &run.id, RunStatus::Cancelled, run.start_time, now, note)
                .await?;
            run.status = RunStatus::Cancelled;
            run.end_time = Some(now);
            run.duration = run.computed_duration();
            run.logs.push_str(note);
            run.updated_at = now;
        }

        tx.commit().await?;

        if !cancelled.is_empty() {
            debug!("抢占取消活动运行 {} 个", cancelled.len());
        }
        Ok(cancelled)
    }

    #[instrument(skip(self, note))]
    async fn cancel(&self, id: &str, now: DateTime<Utc>, note: &str) -> TrainerResult<bool> {
        let mut tx = self.begin_write().await?;

        let Some((status, start_time)) = Self::status_in_tx(&mut tx, id).await? else {
            return Ok(false);
        };
        if !status.is_active() {
            return Ok(false);
        }

        Self::close_in_tx(&mut tx, id, RunStatus::Cancelled, start_time, now, note).await?;
        tx.commit().await?;

        debug!("取消训练运行成功: {}", id);
        Ok(true)
    }

    #[instrument(skip(self, log))]
    async fn mark_running(&self, id: &str, log: &str) -> TrainerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE model_runs
            SET status = 'running', logs = COALESCE(logs, '') || $2, updated_at = $3
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(log)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_log(&self, id: &str, text: &str) -> TrainerResult<()> {
        sqlx::query(
            "UPDATE model_runs SET logs = COALESCE(logs, '') || $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, status, log), fields(status = %status))]
    async fn finish(
        &self,
        id: &str,
        status: RunStatus,
        now: DateTime<Utc>,
        log: &str,
    ) -> TrainerResult<bool> {
        let mut tx = self.begin_write().await?;

        let Some((current, start_time)) = Self::status_in_tx(&mut tx, id).await? else {
            return Ok(false);
        };
        if !current.can_transition_to(status) {
            debug!("忽略终态写入: {} 当前状态 {}", id, current);
            return Ok(false);
        }

        Self::close_in_tx(&mut tx, id, status, start_time, now, log).await?;
        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self, log))]
    async fn fail_unless_cancelled(
        &self,
        id: &str,
        now: DateTime<Utc>,
        log: &str,
    ) -> TrainerResult<Option<RunStatus>> {
        let mut tx = self.begin_write().await?;

        let Some((current, start_time)) = Self::status_in_tx(&mut tx, id).await? else {
            return Ok(None);
        };

        let resulting = if current.is_active() {
            Self::close_in_tx(&mut tx, id, RunStatus::Failed, start_time, now, log).await?;
            RunStatus::Failed
        } else {
            Self::append_in_tx(&mut tx, id, log).await?;
            current
        };

        tx.commit().await?;
        Ok(Some(resulting))
    }

    async fn stamp_cancelled(&self, id: &str, now: DateTime<Utc>, log: &str) -> TrainerResult<()> {
        let mut tx = self.begin_write().await?;

        match Self::status_in_tx(&mut tx, id).await? {
            Some((RunStatus::Cancelled, start_time)) => {
                Self::close_in_tx(&mut tx, id, RunStatus::Cancelled, start_time, now, log).await?;
            }
            Some(_) => Self::append_in_tx(&mut tx, id, log).await?,
            None => return Ok(()),
        }

        tx.commit().await?;
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use trainer_core::{
    models::{HyperParameterOverrides, ScheduleConfig, ScheduleUpdate},
    traits::ScheduleRepository,
    TrainerError, TrainerResult,
};

const SCHEDULE_COLUMNS: &str =
    "id, cron_expression, is_paused, rank, reg_param, alpha, max_iter, created_at, updated_at";

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> TrainerResult<ScheduleConfig> {
        Ok(ScheduleConfig {
            id: row.try_get("id")?,
            cron_expression: row.try_get("cron_expression")?,
            is_paused: row.try_get("is_paused")?,
            hyper_parameters: HyperParameterOverrides {
                rank: row.try_get("rank")?,
                reg_param: row.try_get("reg_param")?,
                alpha: row.try_get("alpha")?,
                max_iter: row.try_get("max_iter")?,
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn get(&self) -> TrainerResult<Option<ScheduleConfig>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM training_schedule ORDER BY id LIMIT 1");
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    #[instrument(skip(self, update))]
    async fn upsert(
        &self,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> TrainerResult<ScheduleConfig> {
        let params = &update.hyper_parameters;

        match self.get().await? {
            Some(existing) => {
                sqlx::query(
                    r#"
                    UPDATE training_schedule
                    SET cron_expression = COALESCE($2, cron_expression),
                        is_paused = COALESCE($3, is_paused),
                        rank = COALESCE($4, rank),
                        reg_param = COALESCE($5, reg_param),
                        alpha = COALESCE($6, alpha),
                        max_iter = COALESCE($7, max_iter),
                        updated_at = $8
                    WHERE id = $1
                    "#,
                )
                .bind(existing.id)
                .bind(&update.cron_expression)
                .bind(update.is_paused)
                .bind(params.rank)
                .bind(params.reg_param)
                .bind(params.alpha)
                .bind(params.max_iter)
                .bind(now)
                .execute(&self.pool)
                .await?;
                debug!("更新训练计划: ID {}", existing.id);
            }
            None => {
                let cron_expression = update.cron_expression.as_ref().ok_or_else(|| {
                    TrainerError::validation("cron_expression is required when creating a schedule")
                })?;
                sqlx::query(
                    r#"
                    INSERT INTO training_schedule (cron_expression, is_paused, rank, reg_param, alpha, max_iter,
                                                   created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                    "#,
                )
                .bind(cron_expression)
                .bind(update.is_paused.unwrap_or(false))
                .bind(params.rank)
                .bind(params.reg_param)
                .bind(params.alpha)
                .bind(params.max_iter)
                .bind(now)
                .execute(&self.pool)
                .await?;
                debug!("创建训练计划: {}", cron_expression);
            }
        }

        self.get()
            .await?
            .ok_or(TrainerError::ScheduleNotConfigured)
    }

    #[instrument(skip(self))]
    async fn set_paused(
        &self,
        paused: bool,
        now: DateTime<Utc>,
    ) -> TrainerResult<Option<ScheduleConfig>> {
        let result = sqlx::query("UPDATE training_schedule SET is_paused = $1, updated_at = $2")
            .bind(paused)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    async fn repository() -> SqliteScheduleRepository {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        SqliteScheduleRepository::new(manager.pool().clone())
    }

    #[tokio::test]
    async fn test_create_requires_cron_expression() {
        let repo = repository().await;
        let err = repo
            .upsert(&ScheduleUpdate::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(repo.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_singleton_and_merges_fields() {
        let repo = repository().await;
        let created = repo
            .upsert(
                &ScheduleUpdate {
                    cron_expression: Some("0 2 * * *".to_string()),
                    is_paused: None,
                    hyper_parameters: HyperParameterOverrides {
                        rank: Some(20),
                        ..HyperParameterOverrides::default()
                    },
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!created.is_paused);
        assert_eq!(created.hyper_parameters.rank, Some(20));
        assert_eq!(created.hyper_parameters.alpha, None);

        let updated = repo
            .upsert(
                &ScheduleUpdate {
                    cron_expression: None,
                    is_paused: None,
                    hyper_parameters: HyperParameterOverrides {
                        alpha: Some(2.5),
                        ..HyperParameterOverrides::default()
                    },
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.cron_expression, "0 2 * * *");
        assert_eq!(updated.hyper_parameters.rank, Some(20));
        assert_eq!(updated.hyper_parameters.alpha, Some(2.5));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let repo = repository().await;
        assert!(repo.set_paused(true, Utc::now()).await.unwrap().is_none());

        repo.upsert(
            &ScheduleUpdate {
                cron_expression: Some("*/5 * * * *".to_string()),
                ..ScheduleUpdate::default()
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let paused = repo.set_paused(true, Utc::now()).await.unwrap().unwrap();
        assert!(paused.is_paused);
        let resumed = repo.set_paused(false, Utc::now()).await.unwrap().unwrap();
        assert!(!resumed.is_paused);
    }
}

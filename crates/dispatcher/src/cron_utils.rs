use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use trainer_core::{TrainerError, TrainerResult};

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// 五段式 CRON 表达式（分 时 日 月 周），精确到分钟
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> TrainerResult<Self> {
        let fields = Self::split_fields(cron_expr)?;

        // cron crate 需要秒字段，周字段按名称传入以保持 0/7 = 周日
        let normalized = format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            normalize_weekday(fields[4])
        );
        let schedule = Schedule::from_str(&normalized).map_err(|e| TrainerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: fields.join(" "),
            schedule,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> TrainerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    fn split_fields(cron_expr: &str) -> TrainerResult<Vec<&str>> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(TrainerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: "Invalid cron expression. Must be 5 fields: minute hour day month weekday"
                    .to_string(),
            });
        }
        Ok(fields)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// `(since, now]` 区间内是否存在触发点，返回第一个触发点
    pub fn fired_between(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let fire_time = self.schedule.after(&since).next().filter(|t| *t <= now)?;
        debug!(
            "CRON触发: 上次检查={}, 触发时间={}, 当前时间={}",
            since.format("%Y-%m-%d %H:%M:%S UTC"),
            fire_time.format("%Y-%m-%d %H:%M:%S UTC"),
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Some(fire_time)
    }

    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }

    /// 常见表达式的可读描述
    pub fn description(&self) -> String {
        match self.expression.as_str() {
            "0 0 * * *" => "Daily at midnight".to_string(),
            "0 0 * * 0" => "Every Sunday at midnight".to_string(),
            "0 0 1 * *" => "First day of month at midnight".to_string(),
            "0 */6 * * *" => "Every 6 hours".to_string(),
            other => format!("Cron: {other}"),
        }
    }
}

/// 把周字段里的数字（步长除外）替换为星期名称
fn normalize_weekday(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 8);
    let mut digits = String::new();
    let mut after_slash = false;

    for c in field.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        flush_weekday(&mut digits, after_slash, &mut out);
        after_slash = c == '/';
        out.push(c);
    }
    flush_weekday(&mut digits, after_slash, &mut out);
    out
}

fn flush_weekday(digits: &mut String, is_step: bool, out: &mut String) {
    if digits.is_empty() {
        return;
    }
    match digits.parse::<usize>().ok().and_then(|n| WEEKDAY_NAMES.get(n)) {
        Some(name) if !is_step => out.push_str(name),
        _ => out.push_str(digits),
    }
    digits.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_normalize_weekday() {
        assert_eq!(normalize_weekday("*"), "*");
        assert_eq!(normalize_weekday("0"), "SUN");
        assert_eq!(normalize_weekday("7"), "SUN");
        assert_eq!(normalize_weekday("1-5"), "MON-FRI");
        assert_eq!(normalize_weekday("1,3,5"), "MON,WED,FRI");
        assert_eq!(normalize_weekday("*/2"), "*/2");
        assert_eq!(normalize_weekday("1-5/2"), "MON-FRI/2");
        assert_eq!(normalize_weekday("MON"), "MON");
    }

    #[test]
    fn test_requires_five_fields() {
        assert!(CronScheduler::validate_cron_expression("0 2 * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("*/15 9-17 * * 1-5").is_ok());

        let err = CronScheduler::validate_cron_expression("0 0 2 * * *").unwrap_err();
        assert!(err.is_validation());
        assert!(CronScheduler::validate_cron_expression("").is_err());
        assert!(CronScheduler::validate_cron_expression("invalid").is_err());
        assert!(CronScheduler::validate_cron_expression("61 * * * *").is_err());
    }

    #[test]
    fn test_next_execution_time_daily() {
        let scheduler = CronScheduler::new("0 2 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let next = scheduler.next_execution_time(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_sunday_is_zero() {
        let scheduler = CronScheduler::new("0 0 * * 0").unwrap();
        // 2024-01-01 是周一
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let next = scheduler.next_execution_time(now).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.day(), 7);
        assert_eq!(next.hour(), 0);
    }

    #[test]
    fn test_fired_between() {
        let scheduler = CronScheduler::new("*/5 * * * *").unwrap();
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap();

        let before_fire = Utc.with_ymd_and_hms(2024, 1, 1, 12, 4, 59).unwrap();
        assert!(scheduler.fired_between(since, before_fire).is_none());

        let after_fire = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 30).unwrap();
        assert_eq!(
            scheduler.fired_between(since, after_fire),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap())
        );
    }

    #[test]
    fn test_upcoming_times() {
        let scheduler = CronScheduler::new("0 */6 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();

        let hours: Vec<u32> = scheduler
            .upcoming_times(now, 3)
            .iter()
            .map(|t| t.hour())
            .collect();
        assert_eq!(hours, vec![6, 12, 18]);
    }

    #[test]
    fn test_description() {
        assert_eq!(
            CronScheduler::new("0 0 * * *").unwrap().description(),
            "Daily at midnight"
        );
        assert_eq!(
            CronScheduler::new("0  */6 * *  *").unwrap().description(),
            "Every 6 hours"
        );
        assert_eq!(
            CronScheduler::new("30 2 * * 1").unwrap().description(),
            "Cron: 30 2 * * 1"
        );
    }
}

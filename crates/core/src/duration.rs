use chrono::{DateTime, Duration, Utc};

/// 将时长格式化为可读字符串，例如 "1d 1h"、"2h 5m"；不足一分钟为 "0m"
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }

    if parts.is_empty() {
        "0m".to_string()
    } else {
        parts.join(" ")
    }
}

/// 结束时间为空时返回 None
pub fn duration_between(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Option<String> {
    end.map(|end| format_duration(end - start))
}

use chrono::{DateTime, Duration, Utc};

/// True when `last` is closer to `now` than the cooldown window; the
/// worker then drops the alert instead of persisting a duplicate.
pub fn within_cooldown(last: DateTime<Utc>, cooldown_seconds: i64, now: DateTime<Utc>) -> bool {
    now - last < Duration::seconds(cooldown_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_window_edges() {
        let now = Utc::now();
        assert!(within_cooldown(now - Duration::seconds(30), 60, now));
        assert!(!within_cooldown(now - Duration::seconds(60), 60, now));
        assert!(!within_cooldown(now - Duration::seconds(90), 60, now));
    }
}

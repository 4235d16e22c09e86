use chrono::{DateTime, Utc};

pub struct Util;

impl Util {
    /// Gets the elapsed time between two times as a human-readable string.
    pub fn get_relative_time(date_time: DateTime<Utc>, since: DateTime<Utc>) -> String {
        let delta = since.signed_duration_since(date_time);

        let (amount, unit) = if delta.num_days() > 0 {
            (delta.num_days(), "day")
        } else if delta.num_hours() > 0 {
            (delta.num_hours(), "hour")
        } else if delta.num_minutes() > 0 {
            (delta.num_minutes(), "minute")
        } else {
            (delta.num_seconds().max(0), "second")
        };

        if amount == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{amount} {unit}s ago")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_relative_time() {
        let now = Utc::now();
        let ago = |delta: TimeDelta| Util::get_relative_time(now - delta, now);

        assert_eq!(ago(TimeDelta::seconds(0)), "0 seconds ago");
        assert_eq!(ago(TimeDelta::seconds(1)), "1 second ago");
        assert_eq!(ago(TimeDelta::seconds(59)), "59 seconds ago");
        assert_eq!(ago(TimeDelta::minutes(5)), "5 minutes ago");
        assert_eq!(ago(TimeDelta::hours(1)), "1 hour ago");
        assert_eq!(ago(TimeDelta::days(3)), "3 days ago");
    }

    #[test]
    fn test_future_time_reads_as_now() {
        let now = Utc::now();
        assert_eq!(
            Util::get_relative_time(now + TimeDelta::minutes(1), now),
            "0 seconds ago"
        );
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};

/// A row in the shared coordination store: one active or recently-active
/// ordinal claim within a [`group`](PodRecord::group).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PodRecord {
    /// Primary key, unique across all records ever created for the group.
    pub id: i64,
    /// Assigned ordinal. Unique among active records within the group.
    pub num: i32,
    /// Namespace for independent splitter deployments. Named `group_name`
    /// rather than `group` to avoid the reserved SQL keyword.
    pub group_name: String,
    /// Immutable.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every successful actualize.
    pub updated_at: DateTime<Utc>,
}

impl PodRecord {
    /// A record is active iff it was refreshed within `max_age` of `now`.
    /// The store never deletes records; expiry is purely time-based.
    pub fn is_active_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        now - self.updated_at <= max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_updated(seconds_ago: i64) -> PodRecord {
        let now = Utc::now();
        PodRecord {
            id: 1,
            num: 1,
            group_name: "splitter".to_string(),
            created_at: now - chrono::Duration::seconds(seconds_ago),
            updated_at: now - chrono::Duration::seconds(seconds_ago),
        }
    }

    #[test]
    fn active_within_max_age() {
        let record = record_updated(5);
        assert!(record.is_active_at(Utc::now(), Duration::from_secs(30)));
    }

    #[test]
    fn unused_past_max_age() {
        let record = record_updated(60);
        assert!(!record.is_active_at(Utc::now(), Duration::from_secs(30)));
    }
}

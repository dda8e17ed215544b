//! src/lifecycle.rs
//! Event lifecycle state and the lock gate.
//!
//! "Locked" is never stored: an open event becomes locked purely by the clock
//! passing its lock time. Settlement is the only persisted transition, and it
//! is terminal.

use chrono::{DateTime, Utc};

/// Persisted lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Open,
    Settled,
}

impl EventStatus {
    /// Parse from string (database boundary conversion).
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "open" => Ok(EventStatus::Open),
            "settled" => Ok(EventStatus::Settled),
            _ => Err(format!("Invalid event status: '{}', expected 'open' or 'settled'", s)),
        }
    }

    /// Convert to lowercase string slice for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Open => "open",
            EventStatus::Settled => "settled",
        }
    }
}

/// True once the clock has reached the lock time. Derived, not stored.
#[inline]
pub fn is_locked(now: DateTime<Utc>, lock_time: DateTime<Utc>) -> bool {
    now >= lock_time
}

/// A prediction may be created or edited iff the event is still open and the
/// lock time has not passed. Settled events fail this regardless of clock.
#[inline]
pub fn can_modify(status: EventStatus, now: DateTime<Utc>, lock_time: DateTime<Utc>) -> bool {
    status == EventStatus::Open && !is_locked(now, lock_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_round_trips_through_storage_strings() {
        assert_eq!(EventStatus::from_str("open").unwrap(), EventStatus::Open);
        assert_eq!(EventStatus::from_str("SETTLED").unwrap(), EventStatus::Settled);
        assert_eq!(EventStatus::Open.as_str(), "open");
        assert!(EventStatus::from_str("completed").is_err());
    }

    #[test]
    fn lock_is_derived_from_the_clock_alone() {
        let lock_time = Utc::now();
        let before = lock_time - Duration::seconds(1);
        let after = lock_time + Duration::seconds(1);

        // No write happened between these two observations; only time moved.
        assert!(can_modify(EventStatus::Open, before, lock_time));
        assert!(!can_modify(EventStatus::Open, after, lock_time));

        // Boundary: the lock instant itself is locked.
        assert!(!can_modify(EventStatus::Open, lock_time, lock_time));
    }

    #[test]
    fn settled_forecloses_modification_even_before_lock_time() {
        let lock_time = Utc::now() + Duration::hours(2);
        let now = Utc::now();
        assert!(!can_modify(EventStatus::Settled, now, lock_time));
    }
}

//! Rest countdown derived from the stored start timestamp. Nothing ticks:
//! every reader recomputes, so a backgrounded device resumes correctly.

use chrono::{DateTime, Utc};

use spotter_core::workout::WorkoutState;

/// Seconds of rest left for a nominal duration started at `started_at`.
pub fn remaining_for(nominal: u32, started_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let elapsed = (now - started_at).num_seconds().max(0);
    (i64::from(nominal) - elapsed).max(0) as u32
}

/// Seconds of rest left in `state`, 0 when not resting.
///
/// A rest written without a start timestamp reports its full nominal value.
pub fn remaining(state: &WorkoutState, now: DateTime<Utc>) -> u32 {
    if !state.is_rest_time {
        return 0;
    }
    match state.rest_started_at {
        Some(started_at) => remaining_for(state.rest_time_remaining, started_at, now),
        None => state.rest_time_remaining,
    }
}

/// True when a rest is in progress and its countdown has reached zero.
pub fn is_expired(state: &WorkoutState, now: DateTime<Utc>) -> bool {
    state.is_rest_time && state.rest_started_at.is_some() && remaining(state, now) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn resting(seconds: u32, at: DateTime<Utc>) -> WorkoutState {
        let mut state = WorkoutState::initial();
        state.enter_rest(seconds, at);
        state
    }

    #[test]
    fn counts_down_from_start() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let state = resting(30, t0);
        assert_eq!(remaining(&state, t0), 30);
        assert_eq!(remaining(&state, t0 + Duration::seconds(12)), 18);
        assert!(!is_expired(&state, t0 + Duration::seconds(29)));
    }

    #[test]
    fn never_goes_negative() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let state = resting(30, t0);
        assert_eq!(remaining(&state, t0 + Duration::minutes(10)), 0);
        assert!(is_expired(&state, t0 + Duration::seconds(30)));
    }

    #[test]
    fn clock_skew_before_start_reports_full_rest() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(100);
        assert_eq!(remaining_for(45, t0, t0 - Duration::seconds(5)), 45);
    }

    #[test]
    fn not_resting_is_zero_and_not_expired() {
        let state = WorkoutState::initial();
        let now = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(remaining(&state, now), 0);
        assert!(!is_expired(&state, now));
    }

    #[test]
    fn missing_start_keeps_nominal() {
        let mut state = WorkoutState::initial();
        state.is_rest_time = true;
        state.rest_time_remaining = 20;
        let now = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(remaining(&state, now), 20);
        assert!(!is_expired(&state, now));
    }
}

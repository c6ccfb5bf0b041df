//! Active session time rebuilt from the pause/resume log.

use chrono::{DateTime, Utc};

use spotter_core::metadata::{TimingEvent, TimingKind};

/// Append `event` when it flips the clock. A resume of a running clock or a
/// pause of a stopped one is dropped. Returns whether the log changed.
pub fn record(events: &mut Vec<TimingEvent>, event: TimingEvent) -> bool {
    let running = is_running(events);
    let flips = match event.event {
        TimingKind::Resume => !running,
        TimingKind::Pause => running,
    };
    if flips {
        events.push(event);
    }
    flips
}

fn is_running(events: &[TimingEvent]) -> bool {
    effective_kind(events) == Some(TimingKind::Resume)
}

/// Whether the clock is currently stopped. An empty log has not started.
pub fn is_paused(events: &[TimingEvent]) -> bool {
    effective_kind(events) == Some(TimingKind::Pause)
}

/// Kind that flips on the next toggle.
pub fn toggled(events: &[TimingEvent]) -> TimingKind {
    if is_running(events) {
        TimingKind::Pause
    } else {
        TimingKind::Resume
    }
}

/// Sum of `(resume, pause]` intervals plus the open interval up to `now`.
pub fn elapsed_seconds(events: &[TimingEvent], now: DateTime<Utc>) -> i64 {
    let mut total = 0;
    let mut running_since: Option<DateTime<Utc>> = None;

    for event in events {
        match (event.event, running_since) {
            (TimingKind::Resume, None) => running_since = Some(event.at),
            (TimingKind::Pause, Some(since)) => {
                total += (event.at - since).num_seconds().max(0);
                running_since = None;
            }
            // Repeated kinds carry no information.
            _ => {}
        }
    }

    if let Some(since) = running_since {
        total += (now - since).num_seconds().max(0);
    }
    total
}

fn effective_kind(events: &[TimingEvent]) -> Option<TimingKind> {
    let mut current = None;
    for event in events {
        match (event.event, current) {
            (TimingKind::Resume, None | Some(TimingKind::Pause)) => {
                current = Some(TimingKind::Resume)
            }
            (TimingKind::Pause, Some(TimingKind::Resume)) => current = Some(TimingKind::Pause),
            _ => {}
        }
    }
    current
}

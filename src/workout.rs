//! Flag-gated tracking of workout choices.
use std::fmt;

use crate::FlagClient;

/// Flag that switches workout tracking on. Any treatment other than `"on"` (including `CONTROL`)
/// keeps tracking off.
pub const TRACK_WORKOUTS_FLAG: &str = "track_workouts";

/// Event counted for every workout choice, usable as the denominator of a ratio metric.
pub const ANY_WORKOUT_EVENT: &str = "some_workout";

/// Workouts the user can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkoutKind {
    Cycling,
    Running,
    Walking,
}

impl WorkoutKind {
    pub const ALL: [WorkoutKind; 3] = [WorkoutKind::Cycling, WorkoutKind::Running, WorkoutKind::Walking];

    /// Display name shown in the workout list.
    pub fn name(self) -> &'static str {
        match self {
            WorkoutKind::Cycling => "Bike",
            WorkoutKind::Running => "Run",
            WorkoutKind::Walking => "Walk",
        }
    }

    /// Name of the event tracked when this workout is chosen.
    pub fn event_name(self) -> String {
        format!("{}_workout", self.name())
    }
}

impl fmt::Display for WorkoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record that the user picked `kind`, if workout tracking is switched on.
///
/// Tracks the workout-specific event and [`ANY_WORKOUT_EVENT`], then flushes. Returns `false`
/// without tracking anything when the flag is off or could not be evaluated.
pub fn record_workout_selection(client: &FlagClient, kind: WorkoutKind) -> bool {
    if client.evaluate(TRACK_WORKOUTS_FLAG) != "on" {
        log::debug!(target: "flagwatch", workout:display = kind; "workout tracking is off");
        return false;
    }

    client.track(&kind.event_name());
    client.track(ANY_WORKOUT_EVENT);
    client.flush();
    true
}

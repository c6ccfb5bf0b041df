//! Pure workout progression. No I/O: the controller persists the returned
//! state and carries out the effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spotter_core::program::{ProgramItem, SelectedProgram};
use spotter_core::workout::{CompletedSet, Phase, WorkoutState};

use crate::error::ProgressionError;

/// Trainer-issued progression commands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    AdvanceSet,
    AdvanceItem,
    EndRest,
    SelectProgram { program: SelectedProgram },
    Begin,
    StartRest { seconds: u32 },
    AdvanceRep,
    SelectSession { week_index: usize, session_index: usize },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdvanceSet => "advance_set",
            Self::AdvanceItem => "advance_item",
            Self::EndRest => "end_rest",
            Self::SelectProgram { .. } => "select_program",
            Self::Begin => "begin",
            Self::StartRest { .. } => "start_rest",
            Self::AdvanceRep => "advance_rep",
            Self::SelectSession { .. } => "select_session",
        }
    }
}

/// Side effects requested by a transition.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// A set of an exercise in `category` was finished.
    SetCompleted { category: String },
    /// The workout reached its terminal state; the call should end.
    EndVideo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: WorkoutState,
    /// Replacement program, when the action selected one.
    pub program: Option<SelectedProgram>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: &WorkoutState) -> Self {
        Self {
            state: state.clone(),
            program: None,
            effects: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_workout_complete
    }
}

/// Apply `action` to `state`.
///
/// A completed workout is terminal: every action returns it unchanged.
pub fn next(
    program: Option<&SelectedProgram>,
    state: &WorkoutState,
    action: &Action,
    now: DateTime<Utc>,
) -> Result<Transition, ProgressionError> {
    if state.is_workout_complete {
        return Ok(Transition::unchanged(state));
    }

    match action {
        Action::SelectProgram { program: selected } => {
            if program.is_some() && state.phase() != Phase::Instructions {
                return Err(ProgressionError::SelectionLocked {
                    phase: state.phase(),
                });
            }
            Ok(Transition {
                state: WorkoutState::initial(),
                program: Some(selected.clone()),
                effects: Vec::new(),
            })
        }
        Action::SelectSession {
            week_index,
            session_index,
        } => {
            let program = program.ok_or(ProgressionError::NoProgram)?;
            if state.phase() != Phase::Instructions {
                return Err(ProgressionError::SelectionLocked {
                    phase: state.phase(),
                });
            }
            let week = clamp(*week_index, program.week_count());
            let session = clamp(*session_index, program.session_count(week));
            let mut next = WorkoutState::initial();
            next.selected_week_index = week;
            next.selected_session_index = session;
            Ok(Transition {
                state: next,
                program: None,
                effects: Vec::new(),
            })
        }
        Action::EndRest => {
            let mut next = state.clone();
            next.clear_rest();
            Ok(Transition {
                state: next,
                program: None,
                effects: Vec::new(),
            })
        }
        Action::StartRest { seconds } => {
            let mut next = state.clone();
            next.enter_rest(*seconds, now);
            Ok(Transition {
                state: next,
                program: None,
                effects: Vec::new(),
            })
        }
        Action::Begin => {
            let program = program.ok_or(ProgressionError::NoProgram)?;
            let mut cursor = Cursor::new(program, state);
            cursor.leave_waiting_phases();
            if cursor.items.is_empty() {
                cursor.complete();
            }
            Ok(cursor.finish())
        }
        Action::AdvanceRep => {
            let program = program.ok_or(ProgressionError::NoProgram)?;
            let mut cursor = Cursor::new(program, state);
            cursor.leave_waiting_phases();
            if let Some(item) = cursor.current_item() {
                let limit = item.rep_count();
                cursor.state.current_rep_index = (cursor.state.current_rep_index + 1).min(limit);
            }
            Ok(cursor.finish())
        }
        Action::AdvanceSet => {
            let program = program.ok_or(ProgressionError::NoProgram)?;
            let mut cursor = Cursor::new(program, state);
            // The first advance only dismisses the instructions
            if state.phase() == Phase::Instructions {
                cursor.leave_waiting_phases();
                if cursor.items.is_empty() {
                    cursor.complete();
                }
                return Ok(cursor.finish());
            }
            cursor.leave_waiting_phases();
            cursor.advance_set(now);
            Ok(cursor.finish())
        }
        Action::AdvanceItem => {
            let program = program.ok_or(ProgressionError::NoProgram)?;
            let mut cursor = Cursor::new(program, state);
            let performing = state.phase() != Phase::Instructions;
            cursor.leave_waiting_phases();
            if performing {
                cursor.record_current_set();
            }
            cursor.next_item(now);
            Ok(cursor.finish())
        }
    }
}

fn clamp(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

/// Working copy of the state positioned over the selected session's items.
struct Cursor<'a> {
    items: &'a [ProgramItem],
    state: WorkoutState,
    effects: Vec<Effect>,
}

impl<'a> Cursor<'a> {
    fn new(program: &'a SelectedProgram, state: &WorkoutState) -> Self {
        let items = program.items(state.selected_week_index, state.selected_session_index);
        let mut state = state.clone();
        state.current_item_index = clamp(state.current_item_index, items.len());
        if let Some(item) = items.get(state.current_item_index) {
            state.current_set_index = state.current_set_index.min(item.set_count() - 1);
            state.current_rep_index = state.current_rep_index.min(item.rep_count());
        }
        Self {
            items,
            state,
            effects: Vec::new(),
        }
    }

    fn current_item(&self) -> Option<&'a ProgramItem> {
        self.items.get(self.state.current_item_index)
    }

    fn leave_waiting_phases(&mut self) {
        self.state.show_instructions = false;
        self.state.clear_rest();
    }

    fn advance_set(&mut self, now: DateTime<Utc>) {
        let Some(item) = self.current_item() else {
            self.complete();
            return;
        };

        self.record_current_set();
        if self.state.current_set_index + 1 < item.set_count() {
            self.state.current_set_index += 1;
            self.state.current_rep_index = 0;
            self.state.enter_rest(item.rest_seconds(), now);
        } else {
            self.next_item(now);
        }
    }

    /// Record the set under the cursor as performed. Assets record nothing.
    fn record_current_set(&mut self) {
        let Some(exercise) = self.current_item().and_then(ProgramItem::as_exercise) else {
            return;
        };
        let reps = match self.state.current_rep_index {
            0 => exercise.reps,
            counted => counted,
        };
        self.state.completed_sets.push(CompletedSet {
            item_index: self.state.current_item_index,
            set_index: self.state.current_set_index,
            exercise_name: exercise.name.clone(),
            category: exercise.category.clone(),
            reps,
            weight: exercise.weight,
        });
        self.effects.push(Effect::SetCompleted {
            category: exercise.category.clone(),
        });
    }

    fn next_item(&mut self, now: DateTime<Utc>) {
        let next_index = self.state.current_item_index + 1;
        match self.items.get(next_index) {
            Some(next_item) => {
                self.state.current_item_index = next_index;
                self.state.current_set_index = 0;
                self.state.current_rep_index = 0;
                self.state.enter_rest(next_item.rest_seconds(), now);
            }
            None => self.complete(),
        }
    }

    fn complete(&mut self) {
        self.state.mark_complete();
        self.effects.push(Effect::EndVideo);
    }

    fn finish(self) -> Transition {
        Transition {
            state: self.state,
            program: None,
            effects: self.effects,
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::errors::{OnboardingError, Result};
use crate::models::UserProgressRecord;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum LearningPath {
    Department(String),
    Tailored,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum LearningState {
    #[default]
    DepartmentChoice,
    ModuleChoice {
        path: LearningPath,
    },
    Flashcards {
        path: LearningPath,
        course_id: String,
        card_index: usize,
        started_at: i64,
    },
    EmptyModule {
        path: LearningPath,
        course_id: String,
    },
    /// A module the user already passed; shows the earned badge instead of
    /// the cards.
    Completed {
        path: LearningPath,
        course_id: String,
    },
    ModuleComplete {
        path: LearningPath,
        course_id: String,
        learning_time_seconds: u32,
    },
    Quiz {
        path: LearningPath,
        course_id: String,
        learning_time_seconds: u32,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LearningEvent {
    SelectDepartment(String),
    SelectTailored,
    SelectModule(String),
    ReviewModule,
    NextCard,
    PreviousCard,
    StartQuiz,
    BackToModules,
    BackToDepartments,
}

impl LearningState {
    pub fn name(&self) -> &'static str {
        match self {
            LearningState::DepartmentChoice => "department_choice",
            LearningState::ModuleChoice { .. } => "module_choice",
            LearningState::Flashcards { .. } => "flashcards",
            LearningState::EmptyModule { .. } => "empty_module",
            LearningState::Completed { .. } => "completed",
            LearningState::ModuleComplete { .. } => "module_complete",
            LearningState::Quiz { .. } => "quiz",
        }
    }

    pub fn path(&self) -> Option<&LearningPath> {
        match self {
            LearningState::DepartmentChoice => None,
            LearningState::ModuleChoice { path }
            | LearningState::Flashcards { path, .. }
            | LearningState::EmptyModule { path, .. }
            | LearningState::Completed { path, .. }
            | LearningState::ModuleComplete { path, .. }
            | LearningState::Quiz { path, .. } => Some(path),
        }
    }

    /// Applies one event. `now` is epoch milliseconds and only matters for
    /// the flashcard timer; `progress` decides whether a selected module
    /// opens as completed. Rejected events leave `self` untouched.
    pub fn apply(
        &self,
        event: LearningEvent,
        catalog: &Catalog,
        role: Option<&str>,
        progress: &UserProgressRecord,
        now: i64,
    ) -> Result<LearningState> {
        let next = match (self, event) {
            (LearningState::DepartmentChoice, LearningEvent::SelectDepartment(name)) => {
                if catalog.department(&name).is_none() {
                    return Err(OnboardingError::NotFound(format!("department {}", name)));
                }
                LearningState::ModuleChoice {
                    path: LearningPath::Department(name),
                }
            }
            (LearningState::DepartmentChoice, LearningEvent::SelectTailored) => {
                if !catalog.has_tailored() {
                    return Err(OnboardingError::NotFound("tailored path".into()));
                }
                LearningState::ModuleChoice {
                    path: LearningPath::Tailored,
                }
            }
            (LearningState::ModuleChoice { path }, LearningEvent::SelectModule(course_id)) => {
                let offered = catalog.modules(path, role).contains(&course_id.as_str());
                let course = catalog
                    .course(&course_id, role)
                    .filter(|_course| offered)
                    .ok_or_else(|| OnboardingError::NotFound(format!("module {}", course_id)))?;

                if progress.is_completed(&course_id) {
                    LearningState::Completed {
                        path: path.clone(),
                        course_id,
                    }
                } else {
                    open_module(path, course_id, course.cards.is_empty(), now)
                }
            }
            (LearningState::Completed { path, course_id }, LearningEvent::ReviewModule) => {
                let course = catalog
                    .course(course_id, role)
                    .ok_or_else(|| OnboardingError::NotFound(format!("module {}", course_id)))?;
                open_module(path, course_id.clone(), course.cards.is_empty(), now)
            }
            (
                LearningState::Flashcards {
                    path,
                    course_id,
                    card_index,
                    started_at,
                },
                LearningEvent::NextCard,
            ) => {
                let len = catalog
                    .course(course_id, role)
                    .map(|course| course.cards.len())
                    .ok_or_else(|| OnboardingError::NotFound(format!("module {}", course_id)))?;

                if *card_index + 1 < len {
                    LearningState::Flashcards {
                        path: path.clone(),
                        course_id: course_id.clone(),
                        card_index: card_index + 1,
                        started_at: *started_at,
                    }
                } else {
                    LearningState::ModuleComplete {
                        path: path.clone(),
                        course_id: course_id.clone(),
                        learning_time_seconds: elapsed_seconds(*started_at, now),
                    }
                }
            }
            (
                LearningState::Flashcards {
                    path,
                    course_id,
                    card_index,
                    started_at,
                },
                LearningEvent::PreviousCard,
            ) => LearningState::Flashcards {
                path: path.clone(),
                course_id: course_id.clone(),
                card_index: card_index.saturating_sub(1),
                started_at: *started_at,
            },
            (
                LearningState::ModuleComplete {
                    path,
                    course_id,
                    learning_time_seconds,
                },
                LearningEvent::StartQuiz,
            ) => LearningState::Quiz {
                path: path.clone(),
                course_id: course_id.clone(),
                learning_time_seconds: *learning_time_seconds,
            },
            (
                LearningState::Flashcards { path, .. }
                | LearningState::EmptyModule { path, .. }
                | LearningState::Completed { path, .. }
                | LearningState::ModuleComplete { path, .. }
                | LearningState::Quiz { path, .. },
                LearningEvent::BackToModules,
            ) => LearningState::ModuleChoice { path: path.clone() },
            (state, LearningEvent::BackToDepartments) if *state != LearningState::DepartmentChoice => {
                LearningState::DepartmentChoice
            }
            (state, event) => {
                return Err(OnboardingError::InvalidTransition {
                    state: state.name(),
                    event: event.name(),
                })
            }
        };

        Ok(next)
    }
}

impl LearningEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LearningEvent::SelectDepartment(_) => "select_department",
            LearningEvent::SelectTailored => "select_tailored",
            LearningEvent::SelectModule(_) => "select_module",
            LearningEvent::ReviewModule => "review_module",
            LearningEvent::NextCard => "next_card",
            LearningEvent::PreviousCard => "previous_card",
            LearningEvent::StartQuiz => "start_quiz",
            LearningEvent::BackToModules => "back_to_modules",
            LearningEvent::BackToDepartments => "back_to_departments",
        }
    }
}

fn open_module(path: &LearningPath, course_id: String, empty: bool, now: i64) -> LearningState {
    if empty {
        LearningState::EmptyModule {
            path: path.clone(),
            course_id,
        }
    } else {
        LearningState::Flashcards {
            path: path.clone(),
            course_id,
            card_index: 0,
            started_at: now,
        }
    }
}

fn elapsed_seconds(started_at: i64, now: i64) -> u32 {
    let seconds = (now - started_at).max(0) / 1000;
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

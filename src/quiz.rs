use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap};

use crate::catalog::Catalog;
use crate::errors::{OnboardingError, Result};
use crate::models::{Course, QuizProfile, QuizQuestion};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct QuizSession {
    pub course_id: String,
    pub current_index: usize,
    pub total: usize,
    pub selections: BTreeMap<usize, String>,
    pub learning_time_seconds: Option<u32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Outcome {
    pub correct: u32,
    pub total: u32,
    pub score_percent: u8,
    pub pass_threshold: u8,
    pub passed: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum QuizState {
    NoQuizFound { course_id: String },
    TakingQuiz(QuizSession),
    Results { session: QuizSession, outcome: Outcome },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Advanced,
    Finished(Outcome),
}

/// `round(100 * correct / total)`, halves rounded up.
pub fn score_percent(correct: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total) as u64;
    let total = total as u64;
    ((200 * correct + total) / (2 * total)) as u8
}

pub fn score(
    questions: &[QuizQuestion],
    selections: &BTreeMap<usize, String>,
    pass_threshold: u8,
) -> Outcome {
    let correct = questions
        .iter()
        .enumerate()
        .filter(|(index, question)| selections.get(index) == Some(&question.answer))
        .count() as u32;
    let total = questions.len() as u32;
    let score_percent = score_percent(correct, total);

    Outcome {
        correct,
        total,
        score_percent,
        pass_threshold,
        passed: score_percent >= pass_threshold,
    }
}

/// Course and profile behind a quiz, or `None` when there is nothing to ask.
pub fn resolve<'a>(
    catalog: &'a Catalog,
    course_id: &str,
    role: Option<&str>,
) -> Option<(Cow<'a, Course>, &'a QuizProfile)> {
    let course = catalog.course(course_id, role)?;
    if course.quiz.is_empty() {
        return None;
    }
    let profile = catalog.profile(&course.profile)?;
    Some((course, profile))
}

impl QuizState {
    pub fn load(
        catalog: &Catalog,
        course_id: &str,
        role: Option<&str>,
        learning_time_seconds: Option<u32>,
    ) -> QuizState {
        match resolve(catalog, course_id, role) {
            None => QuizState::NoQuizFound {
                course_id: course_id.into(),
            },
            Some((course, _profile)) => QuizState::TakingQuiz(QuizSession {
                course_id: course_id.into(),
                current_index: 0,
                total: course.quiz.len(),
                selections: BTreeMap::new(),
                learning_time_seconds,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuizState::NoQuizFound { .. } => "no_quiz_found",
            QuizState::TakingQuiz(_) => "taking_quiz",
            QuizState::Results { .. } => "results",
        }
    }

    pub fn course_id(&self) -> &str {
        match self {
            QuizState::NoQuizFound { course_id } => course_id,
            QuizState::TakingQuiz(session) | QuizState::Results { session, .. } => {
                &session.course_id
            }
        }
    }

    pub fn session(&self) -> Option<&QuizSession> {
        match self {
            QuizState::NoQuizFound { .. } => None,
            QuizState::TakingQuiz(session) | QuizState::Results { session, .. } => Some(session),
        }
    }

    fn taking(&mut self, event: &'static str) -> Result<&mut QuizSession> {
        let state = self.name();
        match self {
            QuizState::TakingQuiz(session) => Ok(session),
            _ => Err(OnboardingError::InvalidTransition { state, event }),
        }
    }

    pub fn select(&mut self, option: &str, catalog: &Catalog, role: Option<&str>) -> Result<()> {
        let session = self.taking("select")?;
        let (course, _profile) = resolve(catalog, &session.course_id, role)
            .ok_or_else(|| OnboardingError::NoQuiz(session.course_id.clone()))?;

        let question = course
            .quiz
            .get(session.current_index)
            .ok_or_else(|| OnboardingError::NotFound(format!("question {}", session.current_index)))?;

        if !question.options.iter().any(|candidate| candidate == option) {
            return Err(OnboardingError::InvalidOption(option.into()));
        }

        session
            .selections
            .insert(session.current_index, option.into());
        Ok(())
    }

    pub fn next(&mut self, catalog: &Catalog, role: Option<&str>) -> Result<Step> {
        let session = self.taking("next")?;
        if !session.selections.contains_key(&session.current_index) {
            return Err(OnboardingError::NoSelection);
        }

        if session.current_index + 1 < session.total {
            session.current_index += 1;
            return Ok(Step::Advanced);
        }

        let (course, profile) = resolve(catalog, &session.course_id, role)
            .ok_or_else(|| OnboardingError::NoQuiz(session.course_id.clone()))?;
        let outcome = score(&course.quiz, &session.selections, profile.pass_threshold);

        *self = QuizState::Results {
            session: session.clone(),
            outcome,
        };
        Ok(Step::Finished(outcome))
    }

    pub fn previous(&mut self) -> Result<()> {
        let session = self.taking("previous")?;
        session.current_index = session.current_index.saturating_sub(1);
        Ok(())
    }

    /// Back to the first question with nothing selected. Persisted history
    /// and rewards are not touched.
    pub fn retry(&mut self) -> Result<()> {
        match self {
            QuizState::Results { session, .. } => {
                let session = QuizSession {
                    course_id: session.course_id.clone(),
                    current_index: 0,
                    total: session.total,
                    selections: BTreeMap::new(),
                    learning_time_seconds: session.learning_time_seconds,
                };
                *self = QuizState::TakingQuiz(session);
                Ok(())
            }
            _ => Err(OnboardingError::InvalidTransition {
                state: self.name(),
                event: "retry",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::fixture;

    fn answer_all(state: &mut QuizState, catalog: &Catalog, answers: &[&str]) -> Outcome {
        for answer in answers {
            state.select(answer, catalog, None).unwrap();
            if let Step::Finished(outcome) = state.next(catalog, None).unwrap() {
                return outcome;
            }
        }
        panic!("quiz did not finish");
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(score_percent(1, 2), 50);
        assert_eq!(score_percent(1, 3), 33);
        assert_eq!(score_percent(2, 3), 67);
        assert_eq!(score_percent(1, 8), 13);
        assert_eq!(score_percent(0, 5), 0);
        assert_eq!(score_percent(5, 5), 100);
        assert_eq!(score_percent(0, 0), 0);
    }

    #[test]
    fn percent_stays_in_range() {
        for total in 1..=40 {
            for correct in 0..=total {
                let percent = score_percent(correct, total);
                let exact = 100.0 * correct as f64 / total as f64;
                assert!(percent <= 100);
                assert_eq!(percent as f64, (exact + 0.5).floor());
            }
        }
    }

    #[test]
    fn all_correct_passes() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "products-101", None, Some(12));

        let outcome = answer_all(
            &mut state,
            &catalog,
            &["SparkAuth Solutions", "A gamified learning environment for onboarding"],
        );

        assert_eq!(outcome.score_percent, 100);
        assert!(outcome.passed);
        assert!(matches!(state, QuizState::Results { .. }));
    }

    #[test]
    fn half_correct_fails_at_sixty() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "products-101", None, None);

        let outcome = answer_all(&mut state, &catalog, &["SparkAuth Solutions", "An API"]);

        assert_eq!(outcome.correct, 1);
        assert_eq!(outcome.score_percent, 50);
        assert_eq!(outcome.pass_threshold, 60);
        assert!(!outcome.passed);
    }

    #[test]
    fn onboarding_profile_uses_ninety() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "fundamentals", None, None);

        let outcome = answer_all(&mut state, &catalog, &["a", "b", "b"]);

        assert_eq!(outcome.score_percent, 67);
        assert_eq!(outcome.pass_threshold, 90);
        assert!(!outcome.passed);
    }

    #[test]
    fn next_without_selection_is_rejected() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "products-101", None, None);
        let before = state.clone();

        assert!(matches!(
            state.next(&catalog, None),
            Err(OnboardingError::NoSelection)
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "products-101", None, None);

        assert!(matches!(
            state.select("SparkConnect API", &catalog, None),
            Err(OnboardingError::InvalidOption(_))
        ));
    }

    #[test]
    fn previous_keeps_selections() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "products-101", None, None);
        state.select("SparkLearn Platform", &catalog, None).unwrap();
        state.next(&catalog, None).unwrap();
        state.previous().unwrap();

        match &state {
            QuizState::TakingQuiz(session) => {
                assert_eq!(session.current_index, 0);
                assert_eq!(session.selections.get(&0).unwrap(), "SparkLearn Platform");
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn missing_quiz_is_reported() {
        let catalog = fixture();

        assert_eq!(
            QuizState::load(&catalog, "empty", None, None),
            QuizState::NoQuizFound {
                course_id: "empty".into()
            }
        );
        assert!(matches!(
            QuizState::load(&catalog, "nope", None, None),
            QuizState::NoQuizFound { .. }
        ));
        assert!(matches!(
            QuizState::load(&catalog, "tailored-course", None, None),
            QuizState::NoQuizFound { .. }
        ));
    }

    #[test]
    fn retry_resets_progress() {
        let catalog = fixture();
        let mut state = QuizState::load(&catalog, "products-101", None, Some(3));
        answer_all(&mut state, &catalog, &["SparkLearn Platform", "An API"]);

        state.retry().unwrap();

        assert_eq!(
            state,
            QuizState::TakingQuiz(QuizSession {
                course_id: "products-101".into(),
                current_index: 0,
                total: 2,
                selections: BTreeMap::new(),
                learning_time_seconds: Some(3),
            })
        );
        assert!(state.retry().is_err());
    }
}

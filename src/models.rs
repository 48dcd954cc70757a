use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::games::GameSession;
use crate::learning::LearningState;
use crate::quiz::QuizState;

#[derive(Clone, Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub profile: BTreeMap<String, QuizProfile>,

    #[serde(default)]
    pub course: Vec<Course>,

    #[serde(default)]
    pub department: Vec<Department>,

    pub tailored: Option<Tailored>,

    #[serde(default)]
    pub game: Vec<Game>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct QuizProfile {
    pub pass_threshold: u8,
    #[serde(default)]
    pub rewards: bool,
    #[serde(default)]
    pub xp_award: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    pub role: Option<String>,
    pub badge: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
}

fn default_profile() -> String {
    "course".into()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Card {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub image: Option<String>,
    pub style: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Department {
    pub name: String,
    pub courses: Vec<String>,
}

/// Template for the per-role course. `{role}` in the title and description
/// is replaced with the session role.
#[derive(Clone, Debug, Deserialize)]
pub struct Tailored {
    pub title: String,
    pub description: String,
    pub badge: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GameKind {
    TwoTruthsLie,
    AgreeDisagree,
    TrueFalse,
    FactMatch,
    PuzzleMatch,
    ScenarioRoleplay,
    MemoryMatch,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Game {
    pub id: String,
    pub title: String,
    pub kind: GameKind,
    pub rounds: Vec<Round>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Round {
    pub prompt: Option<String>,
    pub options: Vec<RoundOption>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RoundOption {
    pub label: String,
    #[serde(default)]
    pub correct: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct QuizAttemptResult {
    pub course_id: String,
    pub title: String,
    pub score_percent: u8,
    pub correct: u32,
    pub total: u32,
    pub date: DateTime<Utc>,
    pub passed: bool,
    pub badge: String,
    #[serde(default)]
    pub xp_awarded: Option<u32>,
    #[serde(default)]
    pub learning_time_seconds: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct GameScore {
    pub game_id: String,
    pub score: u32,
    pub rounds_played: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserProgressRecord {
    #[serde(default)]
    pub xp: u32,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub course_completion: BTreeMap<String, bool>,
    #[serde(default)]
    pub quiz_history: Vec<QuizAttemptResult>,
    #[serde(default)]
    pub game_scores: BTreeMap<String, GameScore>,
}

impl UserProgressRecord {
    pub fn has_badge(&self, badge: &str) -> bool {
        self.badges.iter().any(|held| held == badge)
    }

    pub fn is_completed(&self, course_id: &str) -> bool {
        self.course_completion
            .get(course_id)
            .copied()
            .unwrap_or(false)
    }

    /// History in display order, most recent attempt first.
    pub fn history_newest_first(&self) -> impl Iterator<Item = &QuizAttemptResult> {
        self.quiz_history.iter().rev()
    }

    /// Adds `badge` and `xp` together. A badge that is already held grants
    /// nothing; returns whether the grant happened.
    pub fn grant_badge_and_xp(&mut self, badge: &str, xp: u32) -> bool {
        if self.has_badge(badge) {
            return false;
        }
        self.badges.push(badge.into());
        self.xp = self.xp.saturating_add(xp);
        true
    }

    pub fn append_quiz_result(&mut self, result: QuizAttemptResult) {
        self.quiz_history.push(result);
    }

    pub fn set_course_completed(&mut self, course_id: &str) {
        self.course_completion.insert(course_id.into(), true);
    }
}

/// Everything the client carries between requests, signed by the server.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionState {
    pub username: String,
    pub role: Option<String>,
    pub login_time: i64,
    pub learning: LearningState,
    pub quiz: Option<QuizState>,
    pub game: Option<GameSession>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AttemptRecord {
    pub username: String,
    pub course_id: String,
    pub score_percent: u8,
    pub correct: u32,
    pub total: u32,
    pub passed: bool,
    pub xp_awarded: u32,
    pub learning_time_seconds: u32,
    pub time: DateTime<Utc>,
}

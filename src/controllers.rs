use anyhow::{anyhow, Result as AnyResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use log::{info, warn};
use ring::hmac;
use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::{Arc, Mutex},
};

use crate::catalog::Catalog;
use crate::errors::{OnboardingError, Result};
use crate::games::{GameSession, Reveal};
use crate::learning::{LearningEvent, LearningState};
use crate::models::{AttemptRecord, Game, QuizAttemptResult, SessionState, UserProgressRecord};
use crate::quiz::{self, Outcome, QuizState, Step};
use crate::store::{AdminStats, Progress};

pub const ADMIN_USERNAME: &str = "admin";

/// Usernames end up hex encoded in progress file names, so they are kept
/// well under the usual 255 byte file name limit.
pub const MAX_USERNAME_BYTES: usize = 100;

#[derive(Clone)]
pub struct OnboardingController {
    secret_key: Arc<hmac::Key>,
    catalog: Arc<Catalog>,
    progress: Progress,
    attempt_writer: AttemptWriter,
}

impl OnboardingController {
    pub fn new(
        secret_key: hmac::Key,
        catalog: Catalog,
        progress: Progress,
        attempt_writer: AttemptWriter,
    ) -> OnboardingController {
        OnboardingController {
            secret_key: Arc::new(secret_key),
            catalog: Arc::new(catalog),
            progress,
            attempt_writer,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs a store operation on the blocking pool.
    async fn blocking<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(Progress) -> AnyResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let progress = self.progress.clone();
        let result = tokio::task::spawn_blocking(move || task(progress))
            .await
            .map_err(|err| anyhow!("progress task failed: {}", err))??;
        Ok(result)
    }

    pub async fn read_progress(&self, username: &str) -> Result<UserProgressRecord> {
        let username = username.to_string();
        self.blocking(move |progress| progress.read_progress(&username))
            .await
    }

    pub async fn reset_progress(&self, username: &str) -> Result<()> {
        let owned = username.to_string();
        self.blocking(move |progress| progress.reset(&owned)).await?;
        info!("{} reset their progress", username);
        Ok(())
    }

    pub fn create_session(&self, username: &str, role: Option<&str>) -> Result<SessionState> {
        let username = username.trim();
        if username.is_empty() || username.len() > MAX_USERNAME_BYTES {
            return Err(OnboardingError::InvalidUsername);
        }

        let role = role
            .map(|role| role.trim())
            .filter(|role| !role.is_empty())
            .map(|role| role.to_string());

        info!("{} logged in", username);

        Ok(SessionState {
            username: username.into(),
            role,
            login_time: Utc::now().timestamp_millis(),
            learning: LearningState::default(),
            quiz: None,
            game: None,
        })
    }

    pub fn decode_session(&self, token: &str) -> AnyResult<SessionState> {
        let mut parts = token.splitn(2, ':');
        let session = parts
            .next()
            .ok_or_else(|| anyhow!("bad session token"))?;
        let session = URL_SAFE_NO_PAD.decode(session)?;

        let signature = parts
            .next()
            .ok_or_else(|| anyhow!("bad session token"))?;
        let signature = URL_SAFE_NO_PAD.decode(signature)?;

        hmac::verify(&self.secret_key, &session, &signature)
            .map_err(|_err| anyhow!("invalid signature"))?;

        let session = bincode::deserialize(&session)?;
        Ok(session)
    }

    pub fn encode_session(&self, session: &SessionState) -> AnyResult<String> {
        let session = bincode::serialize(session)?;

        let signature = hmac::sign(&self.secret_key, &session);

        let token = format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(session),
            URL_SAFE_NO_PAD.encode(signature),
        );

        Ok(token)
    }

    pub async fn learning_event(
        &self,
        session: &mut SessionState,
        event: LearningEvent,
    ) -> Result<()> {
        // Only module selection looks at completion.
        let progress = match &event {
            LearningEvent::SelectModule(_) => self.read_progress(&session.username).await?,
            _ => UserProgressRecord::default(),
        };

        let now = Utc::now().timestamp_millis();
        let next = session.learning.apply(
            event,
            &self.catalog,
            session.role.as_deref(),
            &progress,
            now,
        )?;

        match &next {
            LearningState::Quiz {
                course_id,
                learning_time_seconds,
                ..
            } => {
                session.quiz = Some(QuizState::load(
                    &self.catalog,
                    course_id,
                    session.role.as_deref(),
                    Some(*learning_time_seconds),
                ));
            }
            _ => {
                if let LearningState::Quiz { .. } = session.learning {
                    session.quiz = None;
                }
            }
        }

        session.learning = next;
        Ok(())
    }

    pub fn start_quiz<'a>(&self, session: &'a mut SessionState, course_id: &str) -> &'a QuizState {
        let quiz = QuizState::load(&self.catalog, course_id, session.role.as_deref(), None);
        session.quiz.insert(quiz)
    }

    fn quiz<'a>(session: &'a mut SessionState, event: &'static str) -> Result<&'a mut QuizState> {
        session
            .quiz
            .as_mut()
            .ok_or(OnboardingError::InvalidTransition {
                state: "idle",
                event,
            })
    }

    pub fn select_answer(&self, session: &mut SessionState, option: &str) -> Result<()> {
        let role = session.role.clone();
        Self::quiz(session, "select")?.select(option, &self.catalog, role.as_deref())
    }

    pub fn previous_question(&self, session: &mut SessionState) -> Result<()> {
        Self::quiz(session, "previous")?.previous()
    }

    pub fn retry_quiz(&self, session: &mut SessionState) -> Result<()> {
        Self::quiz(session, "retry")?.retry()
    }

    /// Moves to the next question, or scores and persists the attempt after
    /// the last one.
    pub async fn next_question(
        &self,
        session: &mut SessionState,
    ) -> Result<Option<QuizAttemptResult>> {
        let role = session.role.clone();
        let quiz = Self::quiz(session, "next")?;

        match quiz.next(&self.catalog, role.as_deref())? {
            Step::Advanced => Ok(None),
            Step::Finished(outcome) => {
                let course_id = quiz.course_id().to_string();
                let learning_time_seconds = quiz
                    .session()
                    .and_then(|session| session.learning_time_seconds);

                let result = self
                    .record_attempt(
                        &session.username,
                        role.as_deref(),
                        &course_id,
                        outcome,
                        learning_time_seconds,
                    )
                    .await?;
                Ok(Some(result))
            }
        }
    }

    async fn record_attempt(
        &self,
        username: &str,
        role: Option<&str>,
        course_id: &str,
        outcome: Outcome,
        learning_time_seconds: Option<u32>,
    ) -> Result<QuizAttemptResult> {
        let (course, profile) = quiz::resolve(&self.catalog, course_id, role)
            .ok_or_else(|| OnboardingError::NoQuiz(course_id.into()))?;

        let result = QuizAttemptResult {
            course_id: course.id.clone(),
            title: course.title.clone(),
            score_percent: outcome.score_percent,
            correct: outcome.correct,
            total: outcome.total,
            date: Utc::now(),
            passed: outcome.passed,
            badge: course.badge.clone(),
            xp_awarded: None,
            learning_time_seconds,
        };
        let reward = if profile.rewards {
            Some(profile.xp_award)
        } else {
            None
        };
        let username = username.to_string();
        let attempt_writer = self.attempt_writer.clone();

        self.blocking(move |progress| {
            let result = progress.record_attempt(&username, result, reward)?;

            let record = AttemptRecord {
                username: username.clone(),
                course_id: result.course_id.clone(),
                score_percent: result.score_percent,
                correct: result.correct,
                total: result.total,
                passed: result.passed,
                xp_awarded: result.xp_awarded.unwrap_or(0),
                learning_time_seconds: learning_time_seconds.unwrap_or(0),
                time: result.date,
            };
            if let Err(err) = attempt_writer.write(record) {
                warn!("couldn't append attempt to log: {}", err);
            }

            info!(
                "{} scored {}% on {} (passed: {}, xp: {})",
                username,
                result.score_percent,
                result.course_id,
                result.passed,
                result.xp_awarded.unwrap_or(0)
            );

            Ok(result)
        })
        .await
    }

    pub fn start_game<'a>(&self, session: &'a mut SessionState, game_id: &str) -> Result<&'a GameSession> {
        if self.catalog.game(game_id).is_none() {
            return Err(OnboardingError::NotFound(format!("game {}", game_id)));
        }
        Ok(session.game.insert(GameSession::new(game_id)))
    }

    fn game<'a>(
        &'a self,
        session: &'a mut SessionState,
        event: &'static str,
    ) -> Result<(&'a Game, &'a mut GameSession)> {
        let game_session = session
            .game
            .as_mut()
            .ok_or(OnboardingError::InvalidTransition {
                state: "idle",
                event,
            })?;
        let game = self
            .catalog
            .game(&game_session.game_id)
            .ok_or_else(|| OnboardingError::NotFound(format!("game {}", game_session.game_id)))?;
        Ok((game, game_session))
    }

    /// Reveals the answer and overwrites the user's score snapshot for the
    /// game. The snapshot is best effort.
    pub async fn select_round_option(
        &self,
        session: &mut SessionState,
        option: usize,
    ) -> Result<Reveal> {
        let username = session.username.clone();
        let (game, game_session) = self.game(session, "select")?;
        let reveal = game_session.select(game, option)?;
        let snapshot = game_session.snapshot(game);
        let game_id = game.id.clone();

        let saved = self
            .blocking(move |progress| progress.save_game_score(&username, snapshot))
            .await;
        if let Err(err) = saved {
            warn!("couldn't save score for {}: {}", game_id, err);
        }

        Ok(reveal)
    }

    pub fn next_round(&self, session: &mut SessionState) -> Result<()> {
        let (game, game_session) = self.game(session, "next")?;
        game_session.next_round(game)
    }

    pub fn restart_game(&self, session: &mut SessionState) -> Result<()> {
        let (_game, game_session) = self.game(session, "restart")?;
        game_session.restart();
        Ok(())
    }

    pub async fn admin_stats(&self, session: &SessionState) -> Result<AdminStats> {
        if !session.username.eq_ignore_ascii_case(ADMIN_USERNAME) {
            return Err(OnboardingError::NotAdmin);
        }
        self.blocking(|progress| progress.admin_stats()).await
    }
}

/// Append-only CSV log with one row per finished quiz attempt.
#[derive(Clone, Debug)]
pub struct AttemptWriter {
    writer: Arc<Mutex<csv::Writer<File>>>,
}

impl AttemptWriter {
    pub fn new(path: impl AsRef<Path>) -> AnyResult<AttemptWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let writer = Arc::new(Mutex::new(writer));

        Ok(AttemptWriter { writer })
    }

    pub fn write(&self, record: AttemptRecord) -> AnyResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_err| anyhow!("couldn't lock writer"))?;
        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }
}

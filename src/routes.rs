use chrono::Utc;
use log::error;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::Infallible};
use warp::{
    http::StatusCode,
    reject,
    reply::{self, Reply, Response},
    Filter, Rejection,
};

use crate::catalog::{Catalog, TAILORED_COURSE_ID};
use crate::controllers::OnboardingController;
use crate::errors::OnboardingError;
use crate::filters::{self, Unauthorized};
use crate::games::{GameSession, Reveal};
use crate::learning::{LearningEvent, LearningPath, LearningState};
use crate::models::{Card, Course, GameKind, GameScore, QuizAttemptResult, SessionState, UserProgressRecord};
use crate::quiz::{self, Outcome, QuizState};

const BODY_LIMIT: u64 = 16 * 1024;

/// Sub-paths of `/quiz` that are actions rather than course ids.
const QUIZ_ACTIONS: [&str; 4] = ["select", "next", "previous", "retry"];

#[derive(Clone, Debug, Deserialize, Serialize)]
struct LoginRequest {
    username: String,
    role: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct LearningRequest {
    event: LearningEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SelectAnswerRequest {
    option: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SelectRoundRequest {
    option: usize,
}

#[derive(Clone, Debug, Serialize)]
struct SessionReply<T> {
    token: String,
    data: T,
}

#[derive(Clone, Debug, Serialize)]
struct SessionView<'a> {
    username: &'a str,
    role: Option<&'a str>,
    login_time: i64,
    logged_in_seconds: i64,
}

#[derive(Clone, Debug, Serialize)]
struct DepartmentView<'a> {
    name: &'a str,
    modules: usize,
}

#[derive(Clone, Debug, Serialize)]
struct DepartmentsReply<'a> {
    departments: Vec<DepartmentView<'a>>,
    tailored: bool,
}

#[derive(Clone, Debug, Serialize)]
struct ModuleView {
    id: String,
    title: String,
    description: String,
    badge: String,
    cards: usize,
    has_quiz: bool,
    completed: bool,
}

#[derive(Clone, Debug, Serialize)]
struct CardView {
    index: usize,
    total: usize,
    is_last: bool,
    card: Card,
}

#[derive(Clone, Debug, Serialize)]
struct LearningView<'a> {
    state: &'static str,
    path: Option<&'a LearningPath>,
    course_id: Option<&'a str>,
    modules: Vec<ModuleView>,
    module: Option<ModuleView>,
    card: Option<CardView>,
    learning_time_seconds: Option<u32>,
}

#[derive(Clone, Debug, Serialize)]
struct QuestionView<'a> {
    index: usize,
    total: usize,
    question: String,
    options: Vec<String>,
    selected: Option<&'a str>,
    can_advance: bool,
    is_last: bool,
}

#[derive(Clone, Debug, Serialize)]
struct QuizView<'a> {
    state: &'static str,
    course_id: &'a str,
    title: Option<String>,
    badge: Option<String>,
    question: Option<QuestionView<'a>>,
    outcome: Option<Outcome>,
    result: Option<QuizAttemptResult>,
}

#[derive(Clone, Debug, Serialize)]
struct ProgressView<'a> {
    username: &'a str,
    xp: u32,
    badges: &'a [String],
    completed: Vec<&'a str>,
    history: Vec<&'a QuizAttemptResult>,
    game_scores: &'a BTreeMap<String, GameScore>,
}

#[derive(Clone, Debug, Serialize)]
struct GameSummary<'a> {
    id: &'a str,
    title: &'a str,
    kind: GameKind,
    rounds: usize,
}

#[derive(Clone, Debug, Serialize)]
struct GameView<'a> {
    game_id: &'a str,
    title: &'a str,
    kind: GameKind,
    round_index: usize,
    total_rounds: usize,
    prompt: Option<&'a str>,
    options: Vec<&'a str>,
    revealed: Option<usize>,
    correct_option: Option<usize>,
    score: u32,
    streak: u32,
    finished: bool,
    reveal: Option<Reveal>,
}

#[derive(Clone, Debug, Serialize)]
struct LogoutReply {
    logged_out: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ErrorReply {
    error: ErrorCode,
    message: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
enum ErrorCode {
    NotFound,
    NoQuiz,
    InvalidInput,
    InvalidTransition,
    Unauthorized,
    Forbidden,
    Internal,
}

fn error_response(error: ErrorCode, status: StatusCode, message: String) -> Response {
    reply::with_status(reply::json(&ErrorReply { error, message }), status).into_response()
}

fn error_reply(err: &OnboardingError) -> Response {
    let (code, status) = match err {
        OnboardingError::NotFound(_) => (ErrorCode::NotFound, StatusCode::NOT_FOUND),
        OnboardingError::NoQuiz(_) => (ErrorCode::NoQuiz, StatusCode::NOT_FOUND),
        OnboardingError::NoSelection
        | OnboardingError::InvalidOption(_)
        | OnboardingError::InvalidUsername => (ErrorCode::InvalidInput, StatusCode::BAD_REQUEST),
        OnboardingError::InvalidTransition { .. }
        | OnboardingError::AlreadyRevealed
        | OnboardingError::NotRevealed
        | OnboardingError::GameOver => (ErrorCode::InvalidTransition, StatusCode::CONFLICT),
        OnboardingError::NotAdmin => (ErrorCode::Forbidden, StatusCode::FORBIDDEN),
        OnboardingError::Storage(err) => {
            error!("storage failure: {:#}", err);
            (ErrorCode::Internal, StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    error_response(code, status, err.to_string())
}

/// Wraps `data` together with the re-signed session token.
fn session_reply<T: Serialize>(
    controller: &OnboardingController,
    session: &SessionState,
    data: T,
) -> Response {
    match controller.encode_session(session) {
        Ok(token) => reply::json(&SessionReply { token, data }).into_response(),
        Err(err) => {
            error!("couldn't encode session: {:#}", err);
            error_response(
                ErrorCode::Internal,
                StatusCode::INTERNAL_SERVER_ERROR,
                "couldn't encode session".into(),
            )
        }
    }
}

async fn read_progress(controller: &OnboardingController, username: &str) -> UserProgressRecord {
    controller
        .read_progress(username)
        .await
        .unwrap_or_else(|err| {
            error!("couldn't read progress for {}: {:#}", username, err);
            UserProgressRecord::default()
        })
}

fn session_view(session: &SessionState) -> SessionView<'_> {
    let now = Utc::now().timestamp_millis();
    SessionView {
        username: &session.username,
        role: session.role.as_deref(),
        login_time: session.login_time,
        logged_in_seconds: (now - session.login_time).max(0) / 1000,
    }
}

fn module_views(
    catalog: &Catalog,
    path: &LearningPath,
    role: Option<&str>,
    progress: &UserProgressRecord,
) -> Vec<ModuleView> {
    catalog
        .modules(path, role)
        .into_iter()
        .filter_map(|id| catalog.course(id, role))
        .map(|course| module_view(&course, progress))
        .collect()
}

fn module_view(course: &Course, progress: &UserProgressRecord) -> ModuleView {
    ModuleView {
        id: course.id.clone(),
        title: course.title.clone(),
        description: course.description.clone(),
        badge: course.badge.clone(),
        cards: course.cards.len(),
        has_quiz: !course.quiz.is_empty(),
        completed: progress.is_completed(&course.id),
    }
}

fn learning_view<'a>(
    catalog: &Catalog,
    session: &'a SessionState,
    progress: &UserProgressRecord,
) -> LearningView<'a> {
    let role = session.role.as_deref();
    let mut view = LearningView {
        state: session.learning.name(),
        path: session.learning.path(),
        course_id: None,
        modules: Vec::new(),
        module: None,
        card: None,
        learning_time_seconds: None,
    };

    match &session.learning {
        LearningState::DepartmentChoice => {}
        LearningState::ModuleChoice { path } => {
            view.modules = module_views(catalog, path, role, progress);
        }
        LearningState::Flashcards {
            course_id,
            card_index,
            ..
        } => {
            view.course_id = Some(course_id.as_str());
            view.card = catalog.course(course_id, role).and_then(|course| {
                course.cards.get(*card_index).map(|card| CardView {
                    index: *card_index,
                    total: course.cards.len(),
                    is_last: card_index + 1 == course.cards.len(),
                    card: card.clone(),
                })
            });
        }
        LearningState::EmptyModule { course_id, .. } => {
            view.course_id = Some(course_id.as_str());
        }
        LearningState::Completed { course_id, .. } => {
            view.course_id = Some(course_id.as_str());
            view.module = catalog
                .course(course_id, role)
                .map(|course| module_view(&course, progress));
        }
        LearningState::ModuleComplete {
            course_id,
            learning_time_seconds,
            ..
        }
        | LearningState::Quiz {
            course_id,
            learning_time_seconds,
            ..
        } => {
            view.course_id = Some(course_id.as_str());
            view.learning_time_seconds = Some(*learning_time_seconds);
        }
    }

    view
}

fn quiz_view<'a>(
    catalog: &Catalog,
    session: &SessionState,
    state: &'a QuizState,
    result: Option<QuizAttemptResult>,
) -> QuizView<'a> {
    let resolved = quiz::resolve(catalog, state.course_id(), session.role.as_deref());

    let mut view = QuizView {
        state: state.name(),
        course_id: state.course_id(),
        title: resolved.as_ref().map(|(course, _profile)| course.title.clone()),
        badge: resolved.as_ref().map(|(course, _profile)| course.badge.clone()),
        question: None,
        outcome: None,
        result,
    };

    match state {
        QuizState::NoQuizFound { .. } => {}
        QuizState::TakingQuiz(taking) => {
            let question = resolved
                .as_ref()
                .and_then(|(course, _profile)| course.quiz.get(taking.current_index));
            view.question = question.map(|question| {
                let selected = taking.selections.get(&taking.current_index);
                QuestionView {
                    index: taking.current_index,
                    total: taking.total,
                    question: question.question.clone(),
                    options: question.options.clone(),
                    selected: selected.map(|selected| selected.as_str()),
                    can_advance: selected.is_some(),
                    is_last: taking.current_index + 1 == taking.total,
                }
            });
        }
        QuizState::Results { outcome, .. } => {
            view.outcome = Some(*outcome);
        }
    }

    view
}

fn quiz_reply(
    controller: &OnboardingController,
    session: &SessionState,
    result: Option<QuizAttemptResult>,
) -> Response {
    match &session.quiz {
        None => error_reply(&OnboardingError::NotFound("quiz".into())),
        Some(state) => {
            let view = quiz_view(controller.catalog(), session, state, result);
            let response = session_reply(controller, session, view);
            match state {
                QuizState::NoQuizFound { .. } => {
                    reply::with_status(response, StatusCode::NOT_FOUND).into_response()
                }
                _ => response,
            }
        }
    }
}

fn game_view<'a>(
    catalog: &'a Catalog,
    game_session: &GameSession,
    reveal: Option<Reveal>,
) -> Option<GameView<'a>> {
    let game = catalog.game(&game_session.game_id)?;
    let round = game.rounds.get(game_session.round_index)?;

    Some(GameView {
        game_id: &game.id,
        title: &game.title,
        kind: game.kind,
        round_index: game_session.round_index,
        total_rounds: game.rounds.len(),
        prompt: round.prompt.as_deref(),
        options: round.options.iter().map(|option| option.label.as_str()).collect(),
        revealed: game_session.revealed,
        correct_option: game_session
            .revealed
            .and_then(|_revealed| round.options.iter().position(|option| option.correct)),
        score: game_session.score,
        streak: game_session.streak,
        finished: game_session.finished,
        reveal,
    })
}

fn game_reply(
    controller: &OnboardingController,
    session: &SessionState,
    reveal: Option<Reveal>,
) -> Response {
    let view = session
        .game
        .as_ref()
        .and_then(|game_session| game_view(controller.catalog(), game_session, reveal));

    match view {
        None => error_reply(&OnboardingError::NotFound("game".into())),
        Some(view) => session_reply(controller, session, view),
    }
}

async fn progress_reply(controller: &OnboardingController, session: &SessionState) -> Response {
    let record = read_progress(controller, &session.username).await;
    let view = ProgressView {
        username: &session.username,
        xp: record.xp,
        badges: &record.badges,
        completed: record
            .course_completion
            .iter()
            .filter(|(_course, completed)| **completed)
            .map(|(course, _completed)| course.as_str())
            .collect(),
        history: record.history_newest_first().collect(),
        game_scores: &record.game_scores,
    };

    reply::json(&view).into_response()
}

async fn admin_reply(controller: &OnboardingController, session: &SessionState) -> Response {
    match controller.admin_stats(session).await {
        Err(err) => error_reply(&err),
        Ok(stats) => reply::json(&stats).into_response(),
    }
}

pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let response = if rejection.find::<Unauthorized>().is_some() {
        error_response(
            ErrorCode::Unauthorized,
            StatusCode::UNAUTHORIZED,
            "log in first".into(),
        )
    } else if rejection.is_not_found() {
        error_response(ErrorCode::NotFound, StatusCode::NOT_FOUND, "no such route".into())
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        error_response(ErrorCode::InvalidInput, StatusCode::BAD_REQUEST, err.to_string())
    } else if rejection.find::<reject::MethodNotAllowed>().is_some() {
        error_response(
            ErrorCode::NotFound,
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".into(),
        )
    } else {
        error!("unhandled rejection: {:?}", rejection);
        error_response(
            ErrorCode::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".into(),
        )
    };

    Ok(response)
}

pub fn routes(
    controller: OnboardingController,
) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    let with_controller = filters::with_controller(controller.clone());
    let session = filters::session(controller);

    let login = warp::path!("login")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(with_controller.clone())
        .map(|body: LoginRequest, controller: OnboardingController| {
            match controller.create_session(&body.username, body.role.as_deref()) {
                Err(err) => error_reply(&err),
                Ok(session) => session_reply(&controller, &session, session_view(&session)),
            }
        });

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(session.clone())
        .map(|session: SessionState| {
            log::info!("{} logged out", session.username);
            reply::json(&LogoutReply { logged_out: true }).into_response()
        });

    let get_session = warp::path!("session")
        .and(warp::get())
        .and(session.clone())
        .map(|session: SessionState| reply::json(&session_view(&session)).into_response());

    let departments = warp::path!("departments")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|controller: OnboardingController| {
            let catalog = controller.catalog();
            let reply = DepartmentsReply {
                departments: catalog
                    .departments()
                    .iter()
                    .map(|department| DepartmentView {
                        name: &department.name,
                        modules: department.courses.len(),
                    })
                    .collect(),
                tailored: catalog.has_tailored(),
            };
            reply::json(&reply).into_response()
        });

    let courses = warp::path!("courses")
        .and(warp::get())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(|session: SessionState, controller: OnboardingController| async move {
            let catalog = controller.catalog();
            let progress = read_progress(&controller, &session.username).await;
            let mut modules = module_views(
                catalog,
                &LearningPath::Tailored,
                session.role.as_deref(),
                &progress,
            );
            modules.retain(|module| module.id == TAILORED_COURSE_ID);
            modules.extend(catalog.courses().map(|course| module_view(course, &progress)));
            Ok::<_, Rejection>(reply::json(&modules).into_response())
        });

    let get_learning = warp::path!("learning")
        .and(warp::get())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(|session: SessionState, controller: OnboardingController| async move {
            let progress = read_progress(&controller, &session.username).await;
            let view = learning_view(controller.catalog(), &session, &progress);
            Ok::<_, Rejection>(session_reply(&controller, &session, view))
        });

    let post_learning = warp::path!("learning")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(
            |body: LearningRequest,
             mut session: SessionState,
             controller: OnboardingController| async move {
                let response = match controller.learning_event(&mut session, body.event).await {
                    Err(err) => error_reply(&err),
                    Ok(()) => {
                        let progress = read_progress(&controller, &session.username).await;
                        let view = learning_view(controller.catalog(), &session, &progress);
                        session_reply(&controller, &session, view)
                    }
                };
                Ok::<_, Rejection>(response)
            },
        );

    let start_quiz = warp::path!("quiz" / String)
        .and_then(|course_id: String| async move {
            if QUIZ_ACTIONS.contains(&course_id.as_str()) {
                Err(reject::not_found())
            } else {
                Ok(course_id)
            }
        })
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .map(
            |course_id: String, mut session: SessionState, controller: OnboardingController| {
                controller.start_quiz(&mut session, &course_id);
                quiz_reply(&controller, &session, None)
            },
        );

    let get_quiz = warp::path!("quiz")
        .and(warp::get())
        .and(session.clone())
        .and(with_controller.clone())
        .map(|session: SessionState, controller: OnboardingController| {
            quiz_reply(&controller, &session, None)
        });

    let select_answer = warp::path!("quiz" / "select")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(session.clone())
        .and(with_controller.clone())
        .map(
            |body: SelectAnswerRequest,
             mut session: SessionState,
             controller: OnboardingController| {
                match controller.select_answer(&mut session, &body.option) {
                    Err(err) => error_reply(&err),
                    Ok(()) => quiz_reply(&controller, &session, None),
                }
            },
        );

    let next_question = warp::path!("quiz" / "next")
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(
            |mut session: SessionState, controller: OnboardingController| async move {
                let response = match controller.next_question(&mut session).await {
                    Err(err) => error_reply(&err),
                    Ok(result) => quiz_reply(&controller, &session, result),
                };
                Ok::<_, Rejection>(response)
            },
        );

    let previous_question = warp::path!("quiz" / "previous")
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .map(|mut session: SessionState, controller: OnboardingController| {
            match controller.previous_question(&mut session) {
                Err(err) => error_reply(&err),
                Ok(()) => quiz_reply(&controller, &session, None),
            }
        });

    let retry_quiz = warp::path!("quiz" / "retry")
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .map(|mut session: SessionState, controller: OnboardingController| {
            match controller.retry_quiz(&mut session) {
                Err(err) => error_reply(&err),
                Ok(()) => quiz_reply(&controller, &session, None),
            }
        });

    let get_progress = warp::path!("progress")
        .and(warp::get())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(|session: SessionState, controller: OnboardingController| async move {
            Ok::<_, Rejection>(progress_reply(&controller, &session).await)
        });

    let reset_progress = warp::path!("progress" / "reset")
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(|session: SessionState, controller: OnboardingController| async move {
            let response = match controller.reset_progress(&session.username).await {
                Err(err) => error_reply(&err),
                Ok(()) => progress_reply(&controller, &session).await,
            };
            Ok::<_, Rejection>(response)
        });

    let list_games = warp::path!("games")
        .and(warp::get())
        .and(with_controller.clone())
        .map(|controller: OnboardingController| {
            let games = controller
                .catalog()
                .games()
                .map(|game| GameSummary {
                    id: &game.id,
                    title: &game.title,
                    kind: game.kind,
                    rounds: game.rounds.len(),
                })
                .collect::<Vec<_>>();
            reply::json(&games).into_response()
        });

    let start_game = warp::path!("games" / String)
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .map(
            |game_id: String, mut session: SessionState, controller: OnboardingController| {
                match controller.start_game(&mut session, &game_id) {
                    Err(err) => error_reply(&err),
                    Ok(_game) => game_reply(&controller, &session, None),
                }
            },
        );

    let get_game = warp::path!("game")
        .and(warp::get())
        .and(session.clone())
        .and(with_controller.clone())
        .map(|session: SessionState, controller: OnboardingController| {
            game_reply(&controller, &session, None)
        });

    let select_round = warp::path!("game" / "select")
        .and(warp::post())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and(session.clone())
        .and(with_controller.clone())
        .and_then(
            |body: SelectRoundRequest,
             mut session: SessionState,
             controller: OnboardingController| async move {
                let response = match controller.select_round_option(&mut session, body.option).await {
                    Err(err) => error_reply(&err),
                    Ok(reveal) => game_reply(&controller, &session, Some(reveal)),
                };
                Ok::<_, Rejection>(response)
            },
        );

    let next_round = warp::path!("game" / "next")
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .map(|mut session: SessionState, controller: OnboardingController| {
            match controller.next_round(&mut session) {
                Err(err) => error_reply(&err),
                Ok(()) => game_reply(&controller, &session, None),
            }
        });

    let restart_game = warp::path!("game" / "restart")
        .and(warp::post())
        .and(session.clone())
        .and(with_controller.clone())
        .map(|mut session: SessionState, controller: OnboardingController| {
            match controller.restart_game(&mut session) {
                Err(err) => error_reply(&err),
                Ok(()) => game_reply(&controller, &session, None),
            }
        });

    let admin_stats = warp::path!("admin" / "stats")
        .and(warp::get())
        .and(session)
        .and(with_controller)
        .and_then(|session: SessionState, controller: OnboardingController| async move {
            Ok::<_, Rejection>(admin_reply(&controller, &session).await)
        });

    let account = login.or(logout).unify().or(get_session).unify();
    let learning = departments
        .or(courses)
        .unify()
        .or(get_learning)
        .unify()
        .or(post_learning)
        .unify();
    let quiz = select_answer
        .or(next_question)
        .unify()
        .or(previous_question)
        .unify()
        .or(retry_quiz)
        .unify()
        .or(start_quiz)
        .unify()
        .or(get_quiz)
        .unify();
    let progress = get_progress
        .or(reset_progress)
        .unify()
        .or(admin_stats)
        .unify();
    let games = list_games
        .or(start_game)
        .unify()
        .or(get_game)
        .unify()
        .or(select_round)
        .unify()
        .or(next_round)
        .unify()
        .or(restart_game)
        .unify();

    account
        .or(learning)
        .unify()
        .or(quiz)
        .unify()
        .or(progress)
        .unify()
        .or(games)
        .unify()
        .recover(handle_rejection)
        .unify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::tests::controller;
    use serde_json::{json, Value};
    use warp::test::request;

    struct Client<F> {
        routes: F,
        token: Option<String>,
    }

    impl<F> Client<F>
    where
        F: Filter<Extract = (Response,)> + 'static,
    {
        async fn call(&mut self, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = request().method(method).path(path);
            if let Some(token) = &self.token {
                builder = builder.header("Authorization", format!("Session {}", token));
            }
            if let Some(body) = body {
                builder = builder.json(&body);
            }

            let response = builder.reply(&self.routes).await;
            let status = response.status();
            let value: Value = serde_json::from_slice(response.body()).unwrap();
            if let Some(token) = value.get("token").and_then(|token| token.as_str()) {
                self.token = Some(token.to_string());
            }
            (status, value)
        }
    }

    #[tokio::test]
    async fn requires_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client {
            routes: routes(controller(dir.path())),
            token: None,
        };

        let (status, body) = client.call("GET", "/progress", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        client.token = Some("forged:token".into());
        let (status, _body) = client.call("GET", "/learning", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn learning_to_quiz_to_badge() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client {
            routes: routes(controller(dir.path())),
            token: None,
        };

        let (status, body) = client
            .call("POST", "/login", Some(json!({ "username": "ada", "role": "Engineer" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "ada");

        let events = [
            json!({ "type": "select_department", "value": "Technology" }),
            json!({ "type": "select_module", "value": "products-101" }),
            json!({ "type": "next_card" }),
            json!({ "type": "next_card" }),
        ];
        let mut last = Value::Null;
        for event in events {
            let (status, body) = client
                .call("POST", "/learning", Some(json!({ "event": event })))
                .await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            last = body;
        }
        assert_eq!(last["data"]["state"], "module_complete");

        let (_status, body) = client
            .call("POST", "/learning", Some(json!({ "event": { "type": "start_quiz" } })))
            .await;
        assert_eq!(body["data"]["state"], "quiz");

        let (status, body) = client.call("POST", "/quiz/next", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please select an answer first!");

        for answer in ["SparkAuth Solutions", "A gamified learning environment for onboarding"] {
            let (status, _body) = client
                .call("POST", "/quiz/select", Some(json!({ "option": answer })))
                .await;
            assert_eq!(status, StatusCode::OK);
            client.call("POST", "/quiz/next", None).await;
        }

        let (_status, body) = client.call("GET", "/quiz", None).await;
        assert_eq!(body["data"]["state"], "results");
        assert_eq!(body["data"]["outcome"]["score_percent"], 100);
        assert_eq!(body["data"]["outcome"]["passed"], true);

        let (_status, body) = client.call("GET", "/progress", None).await;
        assert_eq!(body["xp"], 50);
        assert_eq!(body["badges"], json!(["Product Pro"]));
        assert_eq!(body["completed"], json!(["products-101"]));
        assert_eq!(body["history"].as_array().unwrap().len(), 1);

        let events = [
            json!({ "type": "back_to_modules" }),
            json!({ "type": "select_module", "value": "products-101" }),
        ];
        for event in events {
            let (status, body) = client
                .call("POST", "/learning", Some(json!({ "event": event })))
                .await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            last = body;
        }
        assert_eq!(last["data"]["state"], "completed");
        assert_eq!(last["data"]["course_id"], "products-101");
        assert_eq!(last["data"]["module"]["badge"], "Product Pro");
        assert_eq!(last["data"]["module"]["completed"], true);
        assert_eq!(last["data"]["card"], Value::Null);

        let (_status, body) = client
            .call("POST", "/learning", Some(json!({ "event": { "type": "review_module" } })))
            .await;
        assert_eq!(body["data"]["state"], "flashcards");
        assert_eq!(body["data"]["card"]["index"], 0);
    }

    #[tokio::test]
    async fn missing_quiz_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client {
            routes: routes(controller(dir.path())),
            token: None,
        };
        client
            .call("POST", "/login", Some(json!({ "username": "ada" })))
            .await;

        let (status, body) = client.call("POST", "/quiz/empty", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"]["state"], "no_quiz_found");

        let (status, body) = client.call("POST", "/quiz/retry", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "InvalidTransition");

        let (status, body) = client
            .call("POST", "/quiz/select", Some(json!({ "choice": 1 })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidInput");
    }

    #[tokio::test]
    async fn game_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client {
            routes: routes(controller(dir.path())),
            token: None,
        };
        client
            .call("POST", "/login", Some(json!({ "username": "ada" })))
            .await;

        let (status, body) = client.call("POST", "/games/two-truths", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_rounds"], 2);

        let (_status, body) = client
            .call("POST", "/game/select", Some(json!({ "option": 0 })))
            .await;
        assert_eq!(body["data"]["reveal"]["correct"], true);
        assert_eq!(body["data"]["score"], 1);

        let (status, _body) = client
            .call("POST", "/game/select", Some(json!({ "option": 1 })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_status, body) = client.call("POST", "/game/restart", None).await;
        assert_eq!(body["data"]["score"], 0);
        assert_eq!(body["data"]["revealed"], Value::Null);
    }

    #[tokio::test]
    async fn admin_stats_are_admin_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = Client {
            routes: routes(controller(dir.path())),
            token: None,
        };

        client
            .call("POST", "/login", Some(json!({ "username": "ada" })))
            .await;
        let (status, _body) = client.call("GET", "/admin/stats", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        client
            .call("POST", "/login", Some(json!({ "username": "admin" })))
            .await;
        let (status, body) = client.call("GET", "/admin/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_unique_users"], 0);
        assert_eq!(body["total_quiz_attempts"], 0);
    }
}

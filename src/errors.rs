use thiserror::Error;

#[derive(Error, Debug)]
pub enum OnboardingError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("no quiz available for {0}")]
    NoQuiz(String),

    #[error("Please select an answer first!")]
    NoSelection,

    #[error("{0:?} is not one of the options")]
    InvalidOption(String),

    #[error("cannot {event} while in {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    #[error("the answer for this round was already revealed")]
    AlreadyRevealed,

    #[error("pick an answer before moving on")]
    NotRevealed,

    #[error("the game is over, restart to play again")]
    GameOver,

    #[error("username must be 1 to 100 bytes")]
    InvalidUsername,

    #[error("only the admin account can see this")]
    NotAdmin,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OnboardingError>;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("duplicate course id {0}")]
    DuplicateCourse(String),

    #[error("course {course} uses unknown profile {profile}")]
    UnknownProfile { course: String, profile: String },

    #[error("profile {0} has a pass threshold above 100")]
    BadThreshold(String),

    #[error("question {index} of {course} has no options")]
    NoOptions { course: String, index: usize },

    #[error("question {index} of {course} repeats an option")]
    DuplicateOption { course: String, index: usize },

    #[error("question {index} of {course} has an answer that is not an option")]
    AnswerNotAnOption { course: String, index: usize },

    #[error("{owner} references unknown course {course}")]
    UnknownCourse { owner: String, course: String },

    #[error("round {index} of game {game} needs 2 or 3 options with exactly one correct")]
    BadRound { game: String, index: usize },

    #[error("game {0} has no rounds")]
    EmptyGame(String),
}

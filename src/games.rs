use serde::{Deserialize, Serialize};

use crate::errors::{OnboardingError, Result};
use crate::models::{Game, GameScore};

/// A playthrough of one mini-game. Every round has a single correct option
/// and the answer is revealed as soon as one is picked.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct GameSession {
    pub game_id: String,
    pub round_index: usize,
    pub revealed: Option<usize>,
    pub score: u32,
    pub streak: u32,
    pub finished: bool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Reveal {
    pub correct: bool,
    pub correct_option: usize,
}

impl GameSession {
    pub fn new(game_id: &str) -> GameSession {
        GameSession {
            game_id: game_id.into(),
            round_index: 0,
            revealed: None,
            score: 0,
            streak: 0,
            finished: false,
        }
    }

    pub fn select(&mut self, game: &Game, option: usize) -> Result<Reveal> {
        if self.finished {
            return Err(OnboardingError::GameOver);
        }
        if self.revealed.is_some() {
            return Err(OnboardingError::AlreadyRevealed);
        }

        let round = game
            .rounds
            .get(self.round_index)
            .ok_or_else(|| OnboardingError::NotFound(format!("round {}", self.round_index)))?;
        if option >= round.options.len() {
            return Err(OnboardingError::InvalidOption(option.to_string()));
        }

        let correct_option = round
            .options
            .iter()
            .position(|candidate| candidate.correct)
            .ok_or_else(|| OnboardingError::NotFound(format!("answer for round {}", self.round_index)))?;
        let correct = option == correct_option;

        self.revealed = Some(option);
        if correct {
            self.score += 1;
            self.streak += 1;
        } else {
            self.streak = 0;
        }

        Ok(Reveal {
            correct,
            correct_option,
        })
    }

    pub fn next_round(&mut self, game: &Game) -> Result<()> {
        if self.finished {
            return Err(OnboardingError::GameOver);
        }
        if self.revealed.is_none() {
            return Err(OnboardingError::NotRevealed);
        }

        if self.round_index + 1 < game.rounds.len() {
            self.round_index += 1;
            self.revealed = None;
        } else {
            self.finished = true;
        }
        Ok(())
    }

    pub fn restart(&mut self) {
        *self = GameSession::new(&self.game_id);
    }

    pub fn snapshot(&self, game: &Game) -> GameScore {
        GameScore {
            game_id: self.game_id.clone(),
            score: self.score,
            rounds_played: game.rounds.len() as u32,
        }
    }
}

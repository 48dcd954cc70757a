use warp::{
    reject::{self, Reject},
    Filter,
};

use crate::controllers::OnboardingController;
use crate::models::SessionState;

#[derive(Debug)]
pub struct Unauthorized;

impl Reject for Unauthorized {}

pub fn with_controller(
    controller: OnboardingController,
) -> impl Filter<Extract = (OnboardingController,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

/// Extracts the signed session from `Authorization: Session <token>`.
pub fn session(
    controller: OnboardingController,
) -> impl Filter<Extract = (SessionState,), Error = warp::Rejection> + Clone {
    warp::header::optional("Authorization")
        .and(with_controller(controller))
        .and_then(
            move |auth: Option<String>, controller: OnboardingController| async move {
                let auth = auth.ok_or_else(|| reject::custom(Unauthorized))?;

                let mut parts = auth.splitn(2, ' ');
                let kind = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;
                let value = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;

                if !kind.eq_ignore_ascii_case("session") {
                    return Err(reject::custom(Unauthorized));
                }

                controller
                    .decode_session(value.trim())
                    .map_err(|_err| reject::custom(Unauthorized))
            },
        )
}

use anyhow::{Error, Result};
use log::{info, warn};
use rand::prelude::*;
use ring::{digest, hmac};
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::fs;
use warp::Filter;

use catalog::Catalog;
use controllers::{AttemptWriter, OnboardingController};
use models::Content;
use store::{FileStore, Progress};

mod catalog;
mod controllers;
mod errors;
mod filters;
mod games;
mod learning;
mod models;
mod quiz;
mod routes;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = env::var("BIND").unwrap_or_else(|_err| "127.0.0.1:3030".into());
    let bind_addr: SocketAddr = bind_addr.parse()?;

    let cors_origin = env::var("CORS_ORIGIN").unwrap_or_else(|_err| "http://localhost:3000".into());
    let content_path = env::var("CONTENT").unwrap_or_else(|_err| "onboarding.toml".into());
    let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_err| "data".into()));

    let secret_key = env::var("SECRET_KEY")
        .map_err(|err| Error::new(err))
        .and_then(|env| {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            hex::decode_to_slice(env, &mut secret_key)?;
            Ok(secret_key)
        })
        .or_else(|_err| -> Result<_> {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            rand::rngs::OsRng.fill(&mut secret_key);

            warn!("No secret key was specified, generated a new secret key.");
            warn!("Rerun with SECRET_KEY={} to keep sessions valid", hex::encode(secret_key));

            Ok(secret_key)
        })?;

    let secret_key = hmac::Key::new(hmac::HMAC_SHA256, secret_key.as_ref());

    let content = fs::read_to_string(&content_path).await?;
    let content: Content = toml::from_str(&content)?;
    let catalog = Catalog::new(content)?;

    fs::create_dir_all(&data_dir).await?;
    let progress = match env::var("STORE").as_deref() {
        Ok("memory") => {
            warn!("Keeping progress in memory, it will be lost on exit.");
            Progress::in_memory()
        }
        _ => Progress::new(Arc::new(FileStore::new(data_dir.join("progress"))?)),
    };
    let attempt_writer = AttemptWriter::new(data_dir.join("attempts.csv"))?;

    let controller = OnboardingController::new(secret_key, catalog, progress, attempt_writer);

    let cors = warp::cors()
        .allow_origin(cors_origin.as_str())
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["Authorization", "Content-Type"]);

    let server = routes::routes(controller)
        .with(warp::compression::gzip())
        .with(cors)
        .with(warp::log("onboarding::api"));

    info!("serving {} on {}", content_path, bind_addr);
    warp::serve(server).run(bind_addr).await;

    Ok(())
}

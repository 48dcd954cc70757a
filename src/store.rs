//! Per-user progress persistence.
//!
//! A [`ProgressStore`] only knows how to load and save whole records; the
//! reward rules live in [`Progress`], which serializes every
//! read-modify-write so concurrent requests for the same user can't lose
//! updates inside one process.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::models::{GameScore, QuizAttemptResult, UserProgressRecord};

pub const SCHEMA_VERSION: u32 = 1;

pub trait ProgressStore: Send + Sync {
    /// Returns `None` when the user has never been written.
    fn load(&self, username: &str) -> Result<Option<UserProgressRecord>>;

    fn save(&self, username: &str, record: &UserProgressRecord) -> Result<()>;

    fn remove(&self, username: &str) -> Result<()>;

    fn users(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, UserProgressRecord>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl ProgressStore for MemoryStore {
    fn load(&self, username: &str) -> Result<Option<UserProgressRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_err| anyhow!("couldn't lock records"))?;
        Ok(records.get(username).cloned())
    }

    fn save(&self, username: &str, record: &UserProgressRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_err| anyhow!("couldn't lock records"))?;
        records.insert(username.into(), record.clone());
        Ok(())
    }

    fn remove(&self, username: &str) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_err| anyhow!("couldn't lock records"))?;
        records.remove(username);
        Ok(())
    }

    fn users(&self) -> Result<Vec<String>> {
        let records = self
            .records
            .lock()
            .map_err(|_err| anyhow!("couldn't lock records"))?;
        Ok(records.keys().cloned().collect())
    }
}

#[derive(Deserialize, Serialize)]
struct Envelope {
    version: u32,
    record: serde_json::Value,
}

/// One JSON file per user, named after the hex encoded username.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<FileStore> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    fn path(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(username)))
    }

    fn read(&self, path: &Path) -> Result<Stored> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Stored::Missing),
            Err(err) => return Err(err.into()),
        };

        let envelope = match serde_json::from_str::<Envelope>(&content) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("ignoring unreadable progress file {}: {}", path.display(), err);
                return Ok(Stored::Unreadable("corrupt".into()));
            }
        };

        if envelope.version != SCHEMA_VERSION {
            warn!(
                "ignoring progress file {} with schema version {}",
                path.display(),
                envelope.version
            );
            return Ok(Stored::Unreadable(format!("v{}", envelope.version)));
        }

        match serde_json::from_value(envelope.record) {
            Ok(record) => Ok(Stored::Record(record)),
            Err(err) => {
                warn!("ignoring malformed progress record {}: {}", path.display(), err);
                Ok(Stored::Unreadable("corrupt".into()))
            }
        }
    }
}

/// What sits on disk for one user.
enum Stored {
    Missing,
    Record(UserProgressRecord),
    /// Present but not readable as the current schema. The tag becomes part
    /// of the name the file is kept under once a write would replace it.
    Unreadable(String),
}

impl ProgressStore for FileStore {
    fn load(&self, username: &str) -> Result<Option<UserProgressRecord>> {
        match self.read(&self.path(username))? {
            Stored::Missing => Ok(None),
            Stored::Record(record) => Ok(Some(record)),
            Stored::Unreadable(_tag) => Ok(Some(UserProgressRecord::default())),
        }
    }

    fn save(&self, username: &str, record: &UserProgressRecord) -> Result<()> {
        let envelope = Envelope {
            version: SCHEMA_VERSION,
            record: serde_json::to_value(record)?,
        };

        let path = self.path(username);
        if let Stored::Unreadable(tag) = self.read(&path)? {
            let aside = path.with_extension(format!(
                "json.{}-{}",
                tag,
                Utc::now().timestamp_millis()
            ));
            fs::rename(&path, &aside)?;
            warn!(
                "moved unreadable progress file {} to {}",
                path.display(),
                aside.display()
            );
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&envelope)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, username: &str) -> Result<()> {
        match fs::remove_file(self.path(username)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn users(&self) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let decoded = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| hex::decode(stem).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(username) => users.push(username),
                None => warn!("skipping stray file {} in progress dir", path.display()),
            }
        }
        users.sort();
        Ok(users)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct UserSummary {
    pub username: String,
    pub xp: u32,
    pub badges: Vec<String>,
    pub attempts: usize,
    pub passed: usize,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Newest first.
    pub history: Vec<QuizAttemptResult>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AdminStats {
    pub total_unique_users: usize,
    pub total_quiz_attempts: usize,
    pub users: Vec<UserSummary>,
}

#[derive(Clone)]
pub struct Progress {
    store: Arc<dyn ProgressStore>,
    lock: Arc<Mutex<()>>,
}

impl Progress {
    pub fn new(store: Arc<dyn ProgressStore>) -> Progress {
        Progress {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Progress {
        Progress::new(Arc::new(MemoryStore::new()))
    }

    fn update<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserProgressRecord) -> T,
    ) -> Result<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_err| anyhow!("couldn't lock progress"))?;

        let mut record = self.store.load(username)?.unwrap_or_default();
        let result = f(&mut record);
        self.store.save(username, &record)?;
        Ok(result)
    }

    /// Absence is not an error: unknown users read as an empty record.
    pub fn read_progress(&self, username: &str) -> Result<UserProgressRecord> {
        Ok(self.store.load(username)?.unwrap_or_default())
    }

    /// Applies a finished attempt in one read-modify-write: a passing
    /// attempt earns `reward` XP and the badge (first pass only) and marks
    /// the course complete, and every attempt is appended to the history.
    /// Returns the attempt with `xp_awarded` filled in when a grant happened.
    pub fn record_attempt(
        &self,
        username: &str,
        mut result: QuizAttemptResult,
        reward: Option<u32>,
    ) -> Result<QuizAttemptResult> {
        self.update(username, move |record| {
            if result.passed {
                if let Some(xp) = reward {
                    if record.grant_badge_and_xp(&result.badge, xp) {
                        result.xp_awarded = Some(xp);
                    }
                }
                record.set_course_completed(&result.course_id);
            }
            record.append_quiz_result(result.clone());
            result
        })
    }

    pub fn save_game_score(&self, username: &str, score: GameScore) -> Result<()> {
        self.update(username, |record| {
            record.game_scores.insert(score.game_id.clone(), score);
        })
    }

    pub fn reset(&self, username: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_err| anyhow!("couldn't lock progress"))?;
        self.store.remove(username)
    }

    /// Folds every stored record into summary numbers. Nothing is cached.
    pub fn admin_stats(&self) -> Result<AdminStats> {
        let mut users = Vec::new();
        for username in self.store.users()? {
            let record = self.read_progress(&username)?;
            users.push(UserSummary {
                xp: record.xp,
                badges: record.badges.clone(),
                attempts: record.quiz_history.len(),
                passed: record.quiz_history.iter().filter(|result| result.passed).count(),
                last_attempt: record.quiz_history.iter().map(|result| result.date).max(),
                history: record.history_newest_first().cloned().collect(),
                username,
            });
        }

        Ok(AdminStats {
            total_unique_users: users.len(),
            total_quiz_attempts: users.iter().map(|user| user.attempts).sum(),
            users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attempt(course_id: &str, score_percent: u8, passed: bool) -> QuizAttemptResult {
        QuizAttemptResult {
            course_id: course_id.into(),
            title: course_id.into(),
            score_percent,
            correct: 1,
            total: 2,
            date: Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
            passed,
            badge: "Product Pro".into(),
            xp_awarded: None,
            learning_time_seconds: None,
        }
    }

    #[test]
    fn unknown_user_reads_empty() {
        let progress = Progress::in_memory();
        assert_eq!(
            progress.read_progress("nobody").unwrap(),
            UserProgressRecord::default()
        );
    }

    #[test]
    fn badge_grant_is_idempotent() {
        let progress = Progress::in_memory();

        let first = progress
            .record_attempt("ada", attempt("products-101", 100, true), Some(50))
            .unwrap();
        let second = progress
            .record_attempt("ada", attempt("products-101", 100, true), Some(50))
            .unwrap();
        assert_eq!(first.xp_awarded, Some(50));
        assert_eq!(second.xp_awarded, None);

        let mut other = attempt("our-organization", 100, true);
        other.badge = "Team Player".into();
        progress.record_attempt("ada", other, Some(50)).unwrap();

        let record = progress.read_progress("ada").unwrap();
        assert_eq!(record.xp, 100);
        assert_eq!(record.badges, vec!["Product Pro", "Team Player"]);
        assert_eq!(record.quiz_history.len(), 3);
        assert_eq!(record.quiz_history[0].xp_awarded, Some(50));
        assert_eq!(record.quiz_history[1].xp_awarded, None);
    }

    #[test]
    fn failed_or_unrewarded_attempts_grant_nothing() {
        let progress = Progress::in_memory();
        progress
            .record_attempt("ada", attempt("products-101", 50, false), Some(50))
            .unwrap();
        progress
            .record_attempt("ada", attempt("fundamentals", 100, true), None)
            .unwrap();

        let record = progress.read_progress("ada").unwrap();
        assert_eq!(record.xp, 0);
        assert!(record.badges.is_empty());
        assert!(!record.is_completed("products-101"));
        assert!(record.is_completed("fundamentals"));
        assert_eq!(record.quiz_history.len(), 2);
    }

    #[test]
    fn history_only_grows() {
        let progress = Progress::in_memory();
        progress
            .record_attempt("ada", attempt("products-101", 50, false), None)
            .unwrap();
        let first = progress.read_progress("ada").unwrap().quiz_history;

        progress
            .record_attempt("ada", attempt("products-101", 100, true), None)
            .unwrap();
        let record = progress.read_progress("ada").unwrap();

        assert_eq!(record.quiz_history.len(), 2);
        assert_eq!(record.quiz_history[0], first[0]);
        assert_eq!(record.history_newest_first().next().unwrap().score_percent, 100);
    }

    #[test]
    fn completion_and_reset() {
        let progress = Progress::in_memory();
        progress
            .record_attempt("ada", attempt("products-101", 100, true), None)
            .unwrap();
        progress
            .record_attempt("ada", attempt("products-101", 100, true), None)
            .unwrap();
        let record = progress.read_progress("ada").unwrap();
        assert!(record.is_completed("products-101"));
        assert_eq!(record.course_completion.len(), 1);

        progress.reset("ada").unwrap();
        assert_eq!(
            progress.read_progress("ada").unwrap(),
            UserProgressRecord::default()
        );
    }

    #[test]
    fn admin_stats_fold_over_users() {
        let progress = Progress::in_memory();
        progress
            .record_attempt("ada", attempt("products-101", 50, false), None)
            .unwrap();
        progress
            .record_attempt("ada", attempt("products-101", 100, true), None)
            .unwrap();
        progress
            .record_attempt("grace", attempt("iso-compliance", 100, true), None)
            .unwrap();

        let stats = progress.admin_stats().unwrap();
        assert_eq!(stats.total_unique_users, 2);
        assert_eq!(stats.total_quiz_attempts, 3);
        assert_eq!(stats.users[0].username, "ada");
        assert_eq!(stats.users[0].passed, 1);

        let scores: Vec<u8> = stats.users[0]
            .history
            .iter()
            .map(|result| result.score_percent)
            .collect();
        assert_eq!(scores, vec![100, 50]);
        assert_eq!(stats.users[1].history[0].course_id, "iso-compliance");
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Progress::new(Arc::new(FileStore::new(dir.path()).unwrap()));

        progress
            .record_attempt("Ada Lovelace", attempt("products-101", 100, true), Some(50))
            .unwrap();
        progress
            .save_game_score(
                "Ada Lovelace",
                GameScore {
                    game_id: "two-truths".into(),
                    score: 2,
                    rounds_played: 2,
                },
            )
            .unwrap();

        let reopened = FileStore::new(dir.path()).unwrap();
        let record = reopened.load("Ada Lovelace").unwrap().unwrap();
        assert_eq!(record.xp, 50);
        assert_eq!(record.game_scores["two-truths"].score, 2);
        assert_eq!(reopened.users().unwrap(), vec!["Ada Lovelace"]);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        fs::write(dir.path().join(format!("{}.json", hex::encode("ada"))), "{not json").unwrap();
        assert_eq!(store.load("ada").unwrap(), Some(UserProgressRecord::default()));

        fs::write(
            dir.path().join(format!("{}.json", hex::encode("grace"))),
            r#"{"version": 99, "record": {}}"#,
        )
        .unwrap();
        assert_eq!(store.load("grace").unwrap(), Some(UserProgressRecord::default()));

        let progress = Progress::new(Arc::new(store));
        let stats = progress.admin_stats().unwrap();
        assert_eq!(stats.total_unique_users, 2);
        assert_eq!(stats.total_quiz_attempts, 0);
    }

    #[test]
    fn unreadable_file_is_kept_aside_before_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{}.json", hex::encode("ada")));
        let newer = r#"{"version": 2, "record": {"xp": 500, "badges": ["Product Pro"]}}"#;
        fs::write(&path, newer).unwrap();

        let progress = Progress::new(Arc::new(FileStore::new(dir.path()).unwrap()));
        assert_eq!(progress.read_progress("ada").unwrap().xp, 0);
        progress
            .record_attempt("ada", attempt("products-101", 100, true), Some(50))
            .unwrap();

        let mut kept = Vec::new();
        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if name != format!("{}.json", hex::encode("ada")) {
                kept.push(name);
            }
        }
        assert_eq!(kept.len(), 1);
        assert!(kept[0].contains(".json.v2-"));
        assert_eq!(fs::read_to_string(dir.path().join(&kept[0])).unwrap(), newer);

        let current: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(current["version"], 1);
        assert_eq!(current["record"]["xp"], 50);

        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(store.users().unwrap(), vec!["ada"]);

        fs::write(&path, "{not json").unwrap();
        progress.reset("ada").unwrap();
        progress
            .record_attempt("ada", attempt("products-101", 40, false), None)
            .unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}

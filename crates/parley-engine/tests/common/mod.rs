#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use parley_db::Database;
use parley_engine::{EngineConfig, Matchmaker, Notifier};
use parley_types::events::PairingEvent;
use parley_types::models::UserId;

/// Records every event; users in `unreachable` never receive anything.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(UserId, PairingEvent)>>,
    pub unreachable: Mutex<HashSet<UserId>>,
}

impl RecordingNotifier {
    pub fn events_for(&self, user: UserId) -> Vec<PairingEvent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == user)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn cut_off(&self, user: UserId) {
        self.unreachable.lock().unwrap().insert(user);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user: UserId, event: PairingEvent) -> bool {
        if self.unreachable.lock().unwrap().contains(&user) {
            return false;
        }
        self.sent.lock().unwrap().push((user, event));
        true
    }
}

pub struct Harness {
    pub matchmaker: Matchmaker,
    pub db: Arc<Database>,
    pub notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("engine-test.db"))
        .unwrap()
        .with_starting_credits(config.starting_credits);
    let db = Arc::new(db);
    let notifier = Arc::new(RecordingNotifier::default());
    let matchmaker = Matchmaker::new(db.clone(), notifier.clone(), config);
    Harness {
        matchmaker,
        db,
        notifier,
        _dir: dir,
    }
}

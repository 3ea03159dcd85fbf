use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

const DEFAULT_IDLE_TTL_SECS: u64 = 3600;
const DEFAULT_CLEANUP_SCHEDULE: &str = "0 */10 * * * *";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_ttl: Duration,
    pub cleanup_enabled: bool,
    pub cleanup_schedule: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(DEFAULT_IDLE_TTL_SECS),
            cleanup_enabled: true,
            cleanup_schedule: DEFAULT_CLEANUP_SCHEDULE.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            idle_ttl: std::env::var("SESSION_IDLE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_ttl),
            cleanup_enabled: std::env::var("ENABLE_SESSION_CLEANUP_WORKER")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.cleanup_enabled),
            cleanup_schedule: std::env::var("SESSION_CLEANUP_SCHEDULE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.cleanup_schedule),
        }
    }
}

struct Entry<T> {
    session: Arc<AsyncMutex<T>>,
    last_touched: Instant,
}

/// In-process sessions addressed by id. Each session sits behind its own
/// async mutex so one request at a time drives it.
pub struct SessionRegistry<T> {
    sessions: Mutex<HashMap<Uuid, Entry<T>>>,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self { sessions: Mutex::new(HashMap::new()) }
    }
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: T) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.lock().insert(
            id,
            Entry { session: Arc::new(AsyncMutex::new(session)), last_touched: Instant::now() },
        );
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<AsyncMutex<T>>> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(id)?;
        entry.last_touched = Instant::now();
        Some(Arc::clone(&entry.session))
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops sessions untouched for longer than `ttl`. Sessions currently
    /// checked out by a request are kept.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_touched.elapsed() < ttl || Arc::strong_count(&entry.session) > 1);
        before - sessions.len()
    }
}

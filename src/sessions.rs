//! Per-browser session guards for the HTTP collector.
//!
//! Browsers identify their session with a `session_id` chosen on the
//! client. The registry holds one [`SessionContext`] per ID so repeated
//! `POST /track/visit` calls from the same session record one visit.
//! Sessions idle for longer than the configured timeout are forgotten.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use stitchboard_core::store::RecordStore;
use stitchboard_core::tracker::{ClientEnvironment, SessionContext, TrackOutcome, Tracker};

struct Entry {
    context: Arc<Mutex<SessionContext>>,
    last_seen: Instant,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Record the visit for `session_id` through `tracker`, at most once.
    ///
    /// The registry lock only covers the lookup. The insert runs under the
    /// session's own lock, so concurrent requests for one session record
    /// once while other sessions proceed independently.
    pub async fn record_visit<S>(
        &self,
        tracker: &Tracker<S>,
        session_id: &str,
        env: &ClientEnvironment,
    ) -> TrackOutcome
    where
        S: RecordStore + ?Sized,
    {
        let context = self.context_for(session_id).await;
        let mut context = context.lock().await;
        tracker.record_visit(&mut context, env).await
    }

    async fn context_for(&self, session_id: &str) -> Arc<Mutex<SessionContext>> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        self.prune(&mut sessions, now);

        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| Entry {
            context: Arc::new(Mutex::new(SessionContext::new(session_id))),
            last_seen: now,
        });
        entry.last_seen = now;
        Arc::clone(&entry.context)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn prune(&self, sessions: &mut HashMap<String, Entry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, e| now.duration_since(e.last_seen) < self.idle_timeout);
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "expired idle tracking sessions");
        }
    }
}

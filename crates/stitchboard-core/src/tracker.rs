//! Event tracking: the write path of the analytics pipeline.
//!
//! [`Tracker`] turns browser context into [`VisitEvent`]s, [`PageViewEvent`]s,
//! and [`Interaction`]s and appends them to a [`RecordStore`]. Writes are
//! fire-and-forget: a failed insert is logged and dropped, never retried,
//! and never surfaced to the page that triggered it.
//!
//! The one-visit-per-session guard lives in a caller-owned
//! [`SessionContext`] that is passed to every [`Tracker::record_visit`] call.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::Classifier;
use crate::models::{Entity, Interaction, PageViewEvent, VisitEvent};
use crate::store::{insert_entity, RecordStore};

/// Referrer recorded when the browser reports none.
pub const DIRECT_REFERRER: &str = "direct";

/// Per-browsing-session tracking state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    session_id: String,
    has_recorded_visit: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            has_recorded_visit: false,
        }
    }

    /// Start a session with a random ID.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn has_recorded_visit(&self) -> bool {
        self.has_recorded_visit
    }
}

/// What the browser tells us about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvironment {
    pub user_agent: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub viewport_width: u32,
    #[serde(default)]
    pub screen_width: u32,
    #[serde(default)]
    pub screen_height: u32,
}

impl ClientEnvironment {
    pub fn referrer_or_direct(&self) -> String {
        let referrer = self.referrer.trim();
        if referrer.is_empty() {
            DIRECT_REFERRER.to_string()
        } else {
            referrer.to_string()
        }
    }

    pub fn screen_resolution(&self) -> String {
        format!("{}x{}", self.screen_width, self.screen_height)
    }
}

/// Result of a tracking call. Never an error: failures become `Dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackOutcome {
    /// One record was inserted.
    Recorded,
    /// Nothing to do (visit already recorded, empty interaction type).
    Skipped,
    /// The insert failed and the event was discarded.
    Dropped,
}

/// Writes analytics events to a [`RecordStore`].
pub struct Tracker<S: RecordStore + ?Sized> {
    store: Arc<S>,
    classifier: Classifier,
}

impl<S: RecordStore + ?Sized> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            classifier: self.classifier,
        }
    }
}

impl<S: RecordStore + ?Sized> Tracker<S> {
    pub fn new(store: Arc<S>, classifier: Classifier) -> Self {
        Self { store, classifier }
    }

    pub fn classifier(&self) -> Classifier {
        self.classifier
    }

    /// Record the session's visit, at most once per [`SessionContext`].
    ///
    /// The session is only marked once the insert succeeds.
    pub async fn record_visit(
        &self,
        session: &mut SessionContext,
        env: &ClientEnvironment,
    ) -> TrackOutcome {
        if session.has_recorded_visit {
            debug!(session = %session.session_id, "visit already recorded for session");
            return TrackOutcome::Skipped;
        }

        let classification = self.classifier.classify(&env.user_agent, env.viewport_width);
        let visit = VisitEvent {
            device_type: classification.device_type,
            browser: classification.browser,
            user_agent: env.user_agent.clone(),
            referrer: env.referrer_or_direct(),
            screen_resolution: env.screen_resolution(),
            timestamp: Utc::now(),
        };

        let outcome = self.write(&visit).await;
        if outcome == TrackOutcome::Recorded {
            session.has_recorded_visit = true;
        }
        outcome
    }

    /// Record one navigation. Empty IDs default to `/`, empty names to `home`.
    pub async fn record_page_view(
        &self,
        page_id: &str,
        page_name: &str,
        env: &ClientEnvironment,
    ) -> TrackOutcome {
        let page_id = match page_id.trim() {
            "" => "/",
            id => id,
        };
        let page_name = match page_name.trim() {
            "" => "home",
            name => name,
        };

        let view = PageViewEvent {
            page_id: page_id.to_string(),
            page_name: page_name.to_string(),
            user_agent: env.user_agent.clone(),
            referrer: env.referrer_or_direct(),
            screen_width: env.screen_width,
            screen_height: env.screen_height,
            timestamp: Utc::now(),
        };
        self.write(&view).await
    }

    pub async fn record_interaction(
        &self,
        interaction_type: &str,
        details: serde_json::Value,
    ) -> TrackOutcome {
        let interaction_type = interaction_type.trim();
        if interaction_type.is_empty() {
            debug!("ignoring interaction without a type");
            return TrackOutcome::Skipped;
        }

        let interaction = Interaction {
            interaction_type: interaction_type.to_string(),
            details,
            timestamp: Utc::now(),
        };
        self.write(&interaction).await
    }

    async fn write<E: Entity + Sync>(&self, entity: &E) -> TrackOutcome {
        match insert_entity(self.store.as_ref(), entity).await {
            Ok(record) => {
                debug!(collection = %E::COLLECTION, id = %record.id, "tracked event");
                TrackOutcome::Recorded
            }
            Err(e) => {
                warn!(collection = %E::COLLECTION, error = %e, "dropping analytics event");
                TrackOutcome::Dropped
            }
        }
    }
}

//! SessionRegistry - live sessions keyed by id
//!
//! Sessions are created on demand and reloaded from the store when a known
//! id is not in memory. Separate sessions never share mutable state; the
//! registry hands out `Arc<Session>` and each session guards its own record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::SessionError;
use super::handle::{Session, SessionDeps};
use super::store::SessionSummary;
use crate::domain::{IdResolver, PlanningRecord, Stage, generate_id};
use crate::events::EventBus;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    bus: Arc<EventBus>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(bus: Arc<EventBus>, deps: SessionDeps) -> Self {
        debug!("SessionRegistry::new: called");
        Self {
            sessions: RwLock::new(HashMap::new()),
            bus,
            deps,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn build(&self, record: PlanningRecord) -> Arc<Session> {
        let emitter = self.bus.emitter_for(record.session_id.clone());
        Arc::new(Session::new(record, emitter, self.deps.clone()))
    }

    /// Fresh session with a generated id
    pub async fn create(&self, title: &str) -> Result<Arc<Session>, SessionError> {
        self.create_with_id(&generate_id("plan", title)).await
    }

    pub async fn create_with_id(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        debug!(%session_id, "create_with_id: called");
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyExists(session_id.to_string()));
        }
        if let Some(store) = &self.deps.store {
            if store.load(session_id)?.is_some() {
                return Err(SessionError::AlreadyExists(session_id.to_string()));
            }
        }
        let session = self.build(PlanningRecord::new(session_id));
        session.persist().await?;
        sessions.insert(session_id.to_string(), session.clone());
        info!(%session_id, "create_with_id: session created");
        Ok(session)
    }

    /// Live session, if loaded
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Live session, reloading it from the store when needed
    ///
    /// Accepts a full id or an unambiguous prefix or slug fragment.
    pub async fn load(&self, reference: &str) -> Result<Arc<Session>, SessionError> {
        debug!(%reference, "load: called");
        if let Some(session) = self.get(reference).await {
            return Ok(session);
        }
        let session_id = self.resolve_id(reference).await?;
        if let Some(session) = self.get(&session_id).await {
            return Ok(session);
        }

        let Some(store) = &self.deps.store else {
            return Err(SessionError::NotFound(reference.to_string()));
        };
        let record = store
            .load(&session_id)?
            .ok_or_else(|| SessionError::NotFound(reference.to_string()))?;

        let mut sessions = self.sessions.write().await;
        // another task may have loaded it meanwhile
        if let Some(session) = sessions.get(&session_id) {
            return Ok(session.clone());
        }
        info!(%session_id, stage = %record.stage, "load: restored session from store");
        let session = self.build(record);
        sessions.insert(session_id, session.clone());
        Ok(session)
    }

    /// Full id for a partial reference, across memory and store
    pub async fn resolve_id(&self, reference: &str) -> Result<String, SessionError> {
        let mut names: HashMap<String, String> = HashMap::new();
        if let Some(store) = &self.deps.store {
            for summary in store.list()? {
                names.insert(summary.session_id, summary.plan_name);
            }
        }
        for (id, session) in self.sessions.read().await.iter() {
            names.insert(id.clone(), session.snapshot().await.plan_name());
        }
        resolve_reference(&names, reference)
    }

    /// Drop a session from memory and the store, cancelling in-flight work
    pub async fn remove(&self, session_id: &str) -> Result<bool, SessionError> {
        debug!(%session_id, "remove: called");
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = &removed {
            session.cancel();
        }
        let deleted = match &self.deps.store {
            Some(store) => store.delete(session_id)?,
            None => false,
        };
        Ok(removed.is_some() || deleted)
    }

    /// Start over under the same id
    ///
    /// In-flight work of the old session is cancelled and its results are
    /// discarded.
    pub async fn reset(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        info!(%session_id, "reset: called");
        let previous = self.sessions.write().await.remove(session_id);
        let from = match &previous {
            Some(session) => {
                session.cancel();
                Some(session.stage().await)
            }
            None => None,
        };

        let session = self.build(PlanningRecord::new(session_id));
        session.persist().await?;
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        if let Some(from) = from.filter(|stage| *stage != Stage::Gathering) {
            session.emitter().stage_changed(from, Stage::Gathering);
        }
        Ok(session)
    }

    /// Ids of live sessions, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stored sessions plus live ones not yet persisted
    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let mut summaries = match &self.deps.store {
            Some(store) => store.list()?,
            None => Vec::new(),
        };
        for session in self.sessions.read().await.values() {
            let summary = SessionSummary::from(&session.snapshot().await);
            match summaries.iter_mut().find(|s| s.session_id == summary.session_id) {
                Some(existing) => *existing = summary,
                None => summaries.push(summary),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

/// Resolve a partial reference against `id -> plan name`
pub fn resolve_reference(names: &HashMap<String, String>, reference: &str) -> Result<String, SessionError> {
    match IdResolver::new(names).resolve(reference) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(SessionError::NotFound(reference.to_string())),
        Err(candidates) => Err(SessionError::Ambiguous {
            reference: reference.to_string(),
            candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{RetryPolicy, ScriptedEditor, ScriptedExtractor, ScriptedSource};
    use crate::delivery::DeliveryRouter;
    use crate::domain::ExtractionDiff;
    use crate::pipeline::AgentPipeline;
    use crate::quantity::QuantityTable;
    use crate::resolver::RecipeResolver;
    use crate::session::SessionStore;
    use std::time::Duration;
    use tempfile::tempdir;

    fn registry(store: Option<SessionStore>) -> SessionRegistry {
        let policy = RetryPolicy::no_retry(Duration::from_millis(200));
        let pipeline = AgentPipeline::new(
            RecipeResolver::new(Arc::new(ScriptedSource::new()), policy),
            QuantityTable::default(),
            DeliveryRouter::new(Duration::from_secs(1)),
            Arc::new(ScriptedEditor::new()),
            policy,
        );
        let deps = SessionDeps {
            extractor: Arc::new(ScriptedExtractor::default()),
            pipeline: Arc::new(pipeline),
            retry: policy,
            store,
        };
        SessionRegistry::new(Arc::new(EventBus::new(64)), deps)
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let registry = registry(None);
        let session = registry.create_with_id("party").await.unwrap();
        assert_eq!(session.id(), "party");
        assert!(registry.get("party").await.is_some());
        assert!(matches!(
            registry.create_with_id("party").await,
            Err(SessionError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = registry(None);
        let a = registry.create_with_id("a").await.unwrap();
        let b = registry.create_with_id("b").await.unwrap();
        a.apply_diff(ExtractionDiff::with_guests(10, 0)).await;
        assert_eq!(a.snapshot().await.total_guests(), 10);
        assert_eq!(b.snapshot().await.total_guests(), 0);
    }

    #[tokio::test]
    async fn test_load_restores_from_store() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let mut record = PlanningRecord::new("019abc-dinner-party");
        record.guests.adults = 4;
        store.save(&record).unwrap();

        let registry = registry(Some(store));
        let session = registry.load("dinner").await.unwrap();
        assert_eq!(session.id(), "019abc-dinner-party");
        assert_eq!(session.snapshot().await.total_guests(), 4);
        assert!(matches!(registry.load("nothing").await, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reset_replaces_and_cancels() {
        let registry = registry(None);
        let old = registry.create_with_id("party").await.unwrap();
        old.apply_diff(ExtractionDiff::with_guests(8, 2)).await;

        let fresh = registry.reset("party").await.unwrap();
        assert!(old.is_cancelled());
        assert_eq!(fresh.snapshot().await.total_guests(), 0);
        assert_eq!(fresh.stage().await, Stage::Gathering);
    }

    #[tokio::test]
    async fn test_remove_deletes_snapshot() {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(temp.path());
        let registry = registry(Some(store.clone()));
        registry.create_with_id("party").await.unwrap();
        assert!(store.load("party").unwrap().is_some());

        assert!(registry.remove("party").await.unwrap());
        assert!(store.load("party").unwrap().is_none());
        assert!(registry.get("party").await.is_none());
    }

    #[test]
    fn test_ambiguous_reference() {
        let names = HashMap::from([
            ("019a-dinner".to_string(), "Dinner".to_string()),
            ("019b-dinner".to_string(), "Dinner".to_string()),
        ]);
        assert!(matches!(
            resolve_reference(&names, "019"),
            Err(SessionError::Ambiguous { .. })
        ));
        assert_eq!(resolve_reference(&names, "019b").unwrap(), "019b-dinner");
    }
}

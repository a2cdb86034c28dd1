//! Session registry.
//!
//! Maps session names to actor handles and owns the shutdown signal shared by
//! all actors. At most one handle is registered per name.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::error::SessionError;
use super::handle::SessionHandle;
use super::state::SessionState;

/// Maximum concurrent state queries for `list()`.
const LIST_CONCURRENCY: usize = 32;

/// Name and state of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub state: SessionState,
}

/// Registry of live session actors. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    handles: Arc<DashMap<String, SessionHandle>>,
    /// Actor task handles for graceful shutdown.
    task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            handles: Arc::new(DashMap::new()),
            task_handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Register a new session, spawning its actor only if the name is free.
    ///
    /// `spawn` receives the shutdown signal and returns the actor's handle and
    /// task. It runs while the name's slot is held, so two concurrent
    /// registrations of one name cannot both spawn.
    pub async fn register<F>(&self, name: &str, spawn: F) -> Result<SessionHandle, SessionError>
    where
        F: FnOnce(watch::Receiver<bool>) -> (SessionHandle, JoinHandle<()>),
    {
        let (handle, task) = match self.handles.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(SessionError::Conflict(name.to_string())),
            Entry::Vacant(slot) => {
                let (handle, task) = spawn(self.shutdown_rx.clone());
                slot.insert(handle.clone());
                (handle, task)
            }
        };

        let mut tasks = self.task_handles.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);

        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<SessionHandle> {
        self.handles.get(name).map(|r| r.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Remove `name` if it is still registered to actor `instance`.
    pub fn remove(&self, name: &str, instance: &str) -> bool {
        self.handles
            .remove_if(name, |_, handle| handle.instance() == instance)
            .is_some()
    }

    /// List registered sessions with their current state, sorted by name.
    ///
    /// Sessions whose actor stops mid-query are omitted.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self.handles.iter().map(|e| e.value().clone()).collect();

        let mut sessions: Vec<SessionSummary> = stream::iter(handles)
            .map(|handle| async move {
                let state = handle.state().await.ok()?;
                Some(SessionSummary {
                    name: handle.name().to_string(),
                    state,
                })
            })
            .buffer_unordered(LIST_CONCURRENCY)
            .filter_map(|s| async move { s })
            .collect()
            .await;

        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    /// Signal every actor to stop and wait for them.
    ///
    /// Actors close their clients but keep credentials on disk.
    pub async fn shutdown(&self) {
        info!(sessions = self.handles.len(), "Shutting down session registry");

        if self.shutdown_tx.send(true).is_err() {
            warn!("Failed to send shutdown signal");
            return;
        }

        let task_handles = {
            let mut handles = self.task_handles.lock().await;
            std::mem::take(&mut *handles)
        };

        for task_handle in task_handles {
            if let Err(e) = task_handle.await {
                warn!(error = ?e, "Session actor panicked during shutdown");
            }
        }

        info!("Session registry shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::actor_types::SessionCommand;
    use tokio::sync::mpsc;

    /// Spawn a stand-in actor that answers state queries until its channel closes.
    fn fake_actor(
        name: &str,
        instance: &str,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    cmd = rx.recv() => match cmd {
                        Some(SessionCommand::GetState { reply }) => {
                            let _ = reply.send(SessionState::Initializing);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });
        (
            SessionHandle::new(tx, name.to_string(), instance.to_string()),
            task,
        )
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let registry = SessionRegistry::new();

        registry
            .register("support", |rx| fake_actor("support", "a", rx))
            .await
            .unwrap();
        let second = registry
            .register("support", |rx| fake_actor("support", "b", rx))
            .await;

        assert!(matches!(second, Err(SessionError::Conflict(name)) if name == "support"));
        assert_eq!(registry.get("support").unwrap().instance(), "a");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_only_matches_instance() {
        let registry = SessionRegistry::new();
        registry
            .register("support", |rx| fake_actor("support", "a", rx))
            .await
            .unwrap();

        assert!(!registry.remove("support", "stale"));
        assert!(registry.contains("support"));
        assert!(registry.remove("support", "a"));
        assert!(registry.is_empty());
        assert!(!registry.remove("support", "a"));
    }

    #[tokio::test]
    async fn list_reports_state_sorted() {
        let registry = SessionRegistry::new();
        for (name, instance) in [("zeta", "1"), ("alpha", "2")] {
            registry
                .register(name, |rx| fake_actor(name, instance, rx))
                .await
                .unwrap();
        }

        let sessions = registry.list().await;
        assert_eq!(
            sessions,
            vec![
                SessionSummary {
                    name: "alpha".to_string(),
                    state: SessionState::Initializing
                },
                SessionSummary {
                    name: "zeta".to_string(),
                    state: SessionState::Initializing
                },
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_waits_for_actors() {
        let registry = SessionRegistry::new();
        registry
            .register("support", |rx| fake_actor("support", "a", rx))
            .await
            .unwrap();

        registry.shutdown().await;
        assert!(registry.task_handles.lock().await.is_empty());
    }
}

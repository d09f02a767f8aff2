//! Call-session registry.
//!
//! Every per-call resource (voice task, gate, playback task, flags) hangs off
//! one [`CallSession`]. Leaving a call is a single deregistration followed by
//! cancelling the session's token.

use crate::error::{HuddleError, Result};
use crate::pipeline::gate::GateHandle;
use crate::pipeline::messages::{CallId, VoiceInput};
use crate::pipeline::reply::ReplyPath;
use crate::pipeline::voice::CallFlags;
use crate::playback::PlaybackHandle;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Live state of one joined call.
pub struct CallSession {
    pub call: CallId,
    /// Companion text channel id, when one was attached.
    pub text_channel: Option<String>,
    pub flags: Arc<CallFlags>,
    pub voice_tx: mpsc::Sender<VoiceInput>,
    pub gate: GateHandle,
    pub playback: PlaybackHandle,
    pub reply: ReplyPath,
    pub cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call: CallId,
        text_channel: Option<String>,
        flags: Arc<CallFlags>,
        voice_tx: mpsc::Sender<VoiceInput>,
        gate: GateHandle,
        playback: PlaybackHandle,
        reply: ReplyPath,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            call,
            text_channel,
            flags,
            voice_tx,
            gate,
            playback,
            reply,
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Track a task so [`CallSession::shutdown`] can wait for it.
    pub fn adopt(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    /// Cancel every task of the session and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Concurrent map of joined calls.
#[derive(Default)]
pub struct CallRegistry {
    sessions: DashMap<CallId, Arc<CallSession>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] if the call is already joined.
    pub fn insert(&self, session: Arc<CallSession>) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.sessions.entry(session.call.clone()) {
            Entry::Occupied(_) => Err(HuddleError::Rejected(format!(
                "already joined call {}",
                session.call
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Look up a joined call.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Rejected`] if the call is not joined.
    pub fn get(&self, call: &CallId) -> Result<Arc<CallSession>> {
        self.sessions
            .get(call)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| HuddleError::Rejected(format!("not in call {call}")))
    }

    pub fn contains(&self, call: &CallId) -> bool {
        self.sessions.contains_key(call)
    }

    pub fn remove(&self, call: &CallId) -> Option<Arc<CallSession>> {
        self.sessions.remove(call).map(|(_, s)| s)
    }

    /// Remove and return every session.
    pub fn drain(&self) -> Vec<Arc<CallSession>> {
        let calls: Vec<CallId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        calls.iter().filter_map(|c| self.remove(c)).collect()
    }

    pub fn calls(&self) -> Vec<CallId> {
        let mut calls: Vec<CallId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        calls.sort();
        calls
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

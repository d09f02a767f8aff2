//! Task that owns a call's [`PlaybackScheduler`].
//!
//! Control operations, sink notifications and speech auto-stop deadlines are
//! all serialized through one mpsc channel, so the scheduler itself needs no
//! locking.

use super::scheduler::{NowPlaying, PlayOutcome, PlaybackScheduler, QueueSnapshot};
use super::sink::{SinkEvent, TrackHandle};
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::UserId;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const COMMAND_QUEUE: usize = 64;

/// Requests handled by the playback task.
#[derive(Debug)]
pub enum PlaybackCommand {
    Play {
        query: String,
        requester: Option<UserId>,
        reply: oneshot::Sender<Result<PlayOutcome>>,
    },
    Skip {
        reply: oneshot::Sender<Result<Option<NowPlaying>>>,
    },
    Stop {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Speak {
        audio: Bytes,
        reply: oneshot::Sender<Result<TrackHandle>>,
    },
    Sink(SinkEvent),
}

/// Cloneable front end of a playback task.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::Sender<PlaybackCommand>,
}

impl PlaybackHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PlaybackCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| HuddleError::Channel("playback task stopped".into()))?;
        rx.await
            .map_err(|_| HuddleError::Channel("playback task dropped the reply".into()))
    }

    /// See [`PlaybackScheduler::enqueue_or_play`].
    ///
    /// # Errors
    ///
    /// Scheduler errors, or [`HuddleError::Channel`] if the task is gone.
    pub async fn enqueue_or_play(
        &self,
        query: &str,
        requester: Option<UserId>,
    ) -> Result<PlayOutcome> {
        let query = query.to_owned();
        self.request(|reply| PlaybackCommand::Play {
            query,
            requester,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// Fails when nothing is playing or the task is gone.
    pub async fn skip(&self) -> Result<Option<NowPlaying>> {
        self.request(|reply| PlaybackCommand::Skip { reply }).await?
    }

    /// Stop playback; returns how many queued tracks were dropped.
    ///
    /// # Errors
    ///
    /// Fails only if the task is gone.
    pub async fn stop(&self) -> Result<usize> {
        self.request(|reply| PlaybackCommand::Stop { reply }).await
    }

    /// # Errors
    ///
    /// Fails only if the task is gone.
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        self.request(|reply| PlaybackCommand::Snapshot { reply }).await
    }

    /// # Errors
    ///
    /// Fails only if the task is gone.
    pub async fn now_playing(&self) -> Result<Option<NowPlaying>> {
        Ok(self.snapshot().await?.now_playing)
    }

    /// Play a speech clip, ducking or pausing music until it ends.
    ///
    /// # Errors
    ///
    /// Sink errors, or [`HuddleError::Channel`] if the task is gone.
    pub async fn speak(&self, audio: Bytes) -> Result<TrackHandle> {
        self.request(|reply| PlaybackCommand::Speak { audio, reply })
            .await?
    }

    /// Forward a transport notification.
    ///
    /// # Errors
    ///
    /// Fails only if the task is gone.
    pub async fn sink_event(&self, event: SinkEvent) -> Result<()> {
        self.tx
            .send(PlaybackCommand::Sink(event))
            .await
            .map_err(|_| HuddleError::Channel("playback task stopped".into()))
    }
}

/// Spawn the task owning `scheduler`. Playback is stopped when `cancel` fires.
pub fn spawn_playback(
    mut scheduler: PlaybackScheduler,
    cancel: CancellationToken,
) -> (PlaybackHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE);
    let (deadline_tx, mut deadline_rx) = mpsc::unbounded_channel::<TrackHandle>();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(handle) = deadline_rx.recv() => {
                    scheduler.speech_timed_out(handle).await;
                }
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        PlaybackCommand::Play { query, requester, reply } => {
                            let _ = reply.send(scheduler.enqueue_or_play(&query, requester).await);
                        }
                        PlaybackCommand::Skip { reply } => {
                            let _ = reply.send(scheduler.skip().await);
                        }
                        PlaybackCommand::Stop { reply } => {
                            let _ = reply.send(scheduler.stop().await);
                        }
                        PlaybackCommand::Snapshot { reply } => {
                            let _ = reply.send(scheduler.snapshot());
                        }
                        PlaybackCommand::Speak { audio, reply } => {
                            let result = scheduler.speak(audio).await;
                            if let Ok(handle) = &result {
                                arm_speech_deadline(
                                    *handle,
                                    scheduler.mixer().speech_timeout(),
                                    deadline_tx.clone(),
                                    cancel.clone(),
                                );
                            }
                            let _ = reply.send(result);
                        }
                        PlaybackCommand::Sink(event) => scheduler.on_sink_event(event).await,
                    }
                }
            }
        }
        scheduler.stop().await;
        info!("playback task stopped");
    });

    (PlaybackHandle { tx }, task)
}

fn arm_speech_deadline(
    handle: TrackHandle,
    after: std::time::Duration,
    deadline_tx: mpsc::UnboundedSender<TrackHandle>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                debug!(%handle, "speech deadline reached");
                let _ = deadline_tx.send(handle);
            }
        }
    });
}

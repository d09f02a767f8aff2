//! Command router between the host shell and the [`Coordinator`].
//!
//! The host shell owns the real voice and chat connections. It forwards
//! frames and speaking signals as commands and receives everything the core
//! wants done on its side (start a stream, post a message) as events. Each
//! joined call gets a [`BridgeSink`] and, when the host names a text channel,
//! a [`BridgeTextChannel`] that turn trait calls into those events.

use crate::channels::TextChannel;
use crate::error::{HuddleError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::pipeline::Coordinator;
use crate::pipeline::messages::{CallId, UserId};
use crate::playback::{AudioSink, SinkEvent, TrackHandle};
use crate::runtime::RuntimeEvent;
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default event broadcast capacity towards the host.
pub const HOST_EVENT_CAPACITY: usize = 512;

/// Cloneable sender of [`EventEnvelope`]s to the host.
#[derive(Debug, Clone)]
pub struct HostEvents {
    tx: broadcast::Sender<EventEnvelope>,
}

impl HostEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns `false` when no host is listening.
    pub fn emit(&self, event: &str, payload: serde_json::Value) -> bool {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        self.tx.send(envelope).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for HostEvents {
    fn default() -> Self {
        Self::new(HOST_EVENT_CAPACITY)
    }
}

/// Audio sink that asks the host to act on the call's voice connection.
pub struct BridgeSink {
    call: CallId,
    events: HostEvents,
}

impl BridgeSink {
    pub fn new(call: CallId, events: HostEvents) -> Self {
        Self { call, events }
    }

    fn send(&self, event: &str, mut payload: serde_json::Value) -> Result<()> {
        payload["call"] = serde_json::json!(self.call);
        if self.events.emit(event, payload) {
            Ok(())
        } else {
            Err(HuddleError::Playback(format!(
                "no host attached for {event} on call {}",
                self.call
            )))
        }
    }
}

#[async_trait]
impl AudioSink for BridgeSink {
    async fn play_stream(&self, handle: TrackHandle, url: &str, volume: f32) -> Result<()> {
        self.send(
            "sink.play_stream",
            serde_json::json!({"handle": handle, "url": url, "volume": volume}),
        )
    }

    async fn play_clip(&self, handle: TrackHandle, audio: Bytes) -> Result<()> {
        let audio = base64::engine::general_purpose::STANDARD.encode(&audio);
        self.send(
            "sink.play_clip",
            serde_json::json!({"handle": handle, "audio": audio}),
        )
    }

    async fn pause(&self, handle: TrackHandle) -> Result<()> {
        self.send("sink.pause", serde_json::json!({"handle": handle}))
    }

    async fn resume(&self, handle: TrackHandle) -> Result<()> {
        self.send("sink.resume", serde_json::json!({"handle": handle}))
    }

    async fn stop(&self, handle: TrackHandle) -> Result<()> {
        self.send("sink.stop", serde_json::json!({"handle": handle}))
    }

    async fn set_volume(&self, handle: TrackHandle, volume: f32) -> Result<()> {
        self.send(
            "sink.set_volume",
            serde_json::json!({"handle": handle, "volume": volume}),
        )
    }
}

/// Text channel whose posts become `channel.message` events.
pub struct BridgeTextChannel {
    id: String,
    call: CallId,
    events: HostEvents,
}

impl BridgeTextChannel {
    pub fn new(id: impl Into<String>, call: CallId, events: HostEvents) -> Self {
        Self {
            id: id.into(),
            call,
            events,
        }
    }
}

#[async_trait]
impl TextChannel for BridgeTextChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn post(&self, text: &str) -> Result<()> {
        let delivered = self.events.emit(
            "channel.message",
            serde_json::json!({"call": self.call, "channel": self.id, "text": text}),
        );
        if delivered {
            Ok(())
        } else {
            Err(HuddleError::Channel(format!(
                "no host attached for channel {}",
                self.id
            )))
        }
    }
}

/// Routes host commands to a [`Coordinator`].
pub struct HostBridge {
    coordinator: Arc<Coordinator>,
    events: HostEvents,
}

impl HostBridge {
    pub fn new(coordinator: Arc<Coordinator>, events: HostEvents) -> Self {
        Self {
            coordinator,
            events,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn events(&self) -> &HostEvents {
        &self.events
    }

    /// Forward coordinator [`RuntimeEvent`]s to the host as
    /// `runtime.<event>` envelopes until `cancel` fires.
    pub fn spawn_runtime_forwarder(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.coordinator.subscribe();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "runtime event forwarder lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                let (name, payload) = runtime_event_envelope(&event);
                events.emit(&name, payload);
            }
        })
    }

    /// Handle one command, turning failures into error responses.
    pub async fn dispatch(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        if let Err(e) = envelope.validate() {
            return ResponseEnvelope::error(envelope.request_id.clone(), e.to_string());
        }
        match self.route(envelope).await {
            Ok(response) => response,
            Err(e) => {
                debug!(
                    command = envelope.command.as_str(),
                    error = %e,
                    "host command failed"
                );
                ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
            }
        }
    }

    /// Route a command envelope to the appropriate handler.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({
                    "pong": true,
                    "contract_version": crate::host::contract::EVENT_VERSION,
                }),
            )),
            CommandName::CallJoin => self.handle_call_join(envelope),
            CommandName::CallLeave => self.handle_call_leave(envelope).await,
            CommandName::CallSay => self.handle_call_say(envelope).await,
            CommandName::VoiceFrame => self.handle_voice_frame(envelope),
            CommandName::VoiceSpeaking => self.handle_voice_speaking(envelope).await,
            CommandName::VoiceUserLeft => self.handle_voice_user_left(envelope).await,
            CommandName::VoiceListenSet => self.handle_voice_listen_set(envelope),
            CommandName::VoiceRecordSet => self.handle_voice_record_set(envelope),
            CommandName::GateAlwaysRespondSet => self.handle_always_respond_set(envelope).await,
            CommandName::AgentReset => self.handle_agent_reset(envelope).await,
            CommandName::PlaybackPlay => self.handle_playback_play(envelope).await,
            CommandName::PlaybackSkip => self.handle_playback_skip(envelope).await,
            CommandName::PlaybackStop => self.handle_playback_stop(envelope).await,
            CommandName::PlaybackQueue => self.handle_playback_queue(envelope).await,
            CommandName::SinkEvent => self.handle_sink_event(envelope).await,
            CommandName::RuntimeStop => self.handle_runtime_stop(envelope).await,
        }
    }

    fn handle_call_join(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let text_channel = optional_str(&envelope.payload, "text_channel").map(|id| {
            Arc::new(BridgeTextChannel::new(id, call.clone(), self.events.clone()))
                as Arc<dyn TextChannel>
        });
        let sink = Arc::new(BridgeSink::new(call.clone(), self.events.clone()));
        self.coordinator.join(call.clone(), text_channel, sink)?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"call": call, "joined": true}),
        ))
    }

    async fn handle_call_leave(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        self.coordinator.leave(&call).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"call": call, "left": true}),
        ))
    }

    async fn handle_call_say(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let text = required_str(envelope, "text")?;
        self.coordinator.say(&call, text).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"spoken": true}),
        ))
    }

    fn handle_voice_frame(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let user = parse_user(envelope)?;
        let pcm = required_str(envelope, "pcm")?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(pcm)
            .map_err(|e| HuddleError::Audio(format!("voice.frame pcm is not base64: {e}")))?;
        self.coordinator.on_frame(&call, user, Bytes::from(data))?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true}),
        ))
    }

    async fn handle_voice_speaking(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let user = parse_user(envelope)?;
        let speaking = required_bool(envelope, "speaking")?;
        self.coordinator.on_speaking(&call, user, speaking).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true}),
        ))
    }

    async fn handle_voice_user_left(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let user = parse_user(envelope)?;
        self.coordinator.on_speaker_left(&call, user).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true}),
        ))
    }

    fn handle_voice_listen_set(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let enabled = required_bool(envelope, "enabled")?;
        self.coordinator.set_listening(&call, enabled)?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"listening": enabled}),
        ))
    }

    fn handle_voice_record_set(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let enabled = required_bool(envelope, "enabled")?;
        self.coordinator.set_recording(&call, enabled)?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"recording": enabled}),
        ))
    }

    async fn handle_always_respond_set(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let enabled = required_bool(envelope, "enabled")?;
        self.coordinator.set_always_respond(&call, enabled).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"always_respond": enabled}),
        ))
    }

    async fn handle_agent_reset(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        self.coordinator.reset_session(&call).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"reset": true}),
        ))
    }

    async fn handle_playback_play(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let query = required_str(envelope, "query")?;
        let requester = optional_str(&envelope.payload, "requester").map(UserId::from);
        let outcome = self
            .coordinator
            .enqueue_or_play(&call, query, requester)
            .await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            to_payload(&outcome)?,
        ))
    }

    async fn handle_playback_skip(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let now_playing = self.coordinator.skip(&call).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"now_playing": to_payload(&now_playing)?}),
        ))
    }

    async fn handle_playback_stop(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let cleared = self.coordinator.stop(&call).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"cleared": cleared}),
        ))
    }

    async fn handle_playback_queue(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let snapshot = self.coordinator.queue_snapshot(&call).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            to_payload(&snapshot)?,
        ))
    }

    async fn handle_sink_event(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let call = parse_call(envelope)?;
        let event = parse_sink_event(&envelope.payload)?;
        self.coordinator.on_sink_event(&call, event).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true}),
        ))
    }

    async fn handle_runtime_stop(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let calls = self.coordinator.calls().len();
        self.coordinator.shutdown().await;
        info!(calls, "runtime stopped by host");
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"stopped": true, "calls_left": calls}),
        ))
    }
}

/// Split a runtime event into its host event name and payload.
fn runtime_event_envelope(event: &RuntimeEvent) -> (String, serde_json::Value) {
    let mut payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    let name = payload
        .as_object_mut()
        .and_then(|map| map.remove("event"))
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_owned());
    (format!("runtime.{name}"), payload)
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| HuddleError::Channel(format!("failed to serialize response: {e}")))
}

fn optional_str<'a>(payload: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(envelope: &'a CommandEnvelope, field: &str) -> Result<&'a str> {
    optional_str(&envelope.payload, field).ok_or_else(|| {
        HuddleError::Rejected(format!(
            "{} requires payload.{field}",
            envelope.command.as_str()
        ))
    })
}

fn required_bool(envelope: &CommandEnvelope, field: &str) -> Result<bool> {
    envelope
        .payload
        .get(field)
        .and_then(serde_json::Value::as_bool)
        .ok_or_else(|| {
            HuddleError::Rejected(format!(
                "{} requires payload.{field} (bool)",
                envelope.command.as_str()
            ))
        })
}

fn parse_call(envelope: &CommandEnvelope) -> Result<CallId> {
    required_str(envelope, "call").map(CallId::from)
}

fn parse_user(envelope: &CommandEnvelope) -> Result<UserId> {
    required_str(envelope, "user").map(UserId::from)
}

#[derive(Deserialize)]
struct SinkEventPayload {
    event: SinkEvent,
}

fn parse_sink_event(payload: &serde_json::Value) -> Result<SinkEvent> {
    SinkEventPayload::deserialize(payload)
        .map(|p| p.event)
        .map_err(|e| HuddleError::Rejected(format!("sink.event has an invalid payload.event: {e}")))
}

//! Per-call playback state machine.
//!
//! `Idle -> Playing` when a track starts, `Playing -> Playing` on skip or
//! natural advance, `* -> Idle` on stop or when the queue (and any radio
//! refill) runs dry. Each started track carries an attempt counter so a
//! mid-stream failure is re-resolved exactly once before the track is
//! abandoned.

use super::mixer::Mixer;
use super::queue::{QueuedTrack, RadioState, TrackQueue};
use super::sink::{AudioSink, SinkEvent, TrackHandle};
use crate::cache::{CacheNamespace, CacheValue, SharedCache};
use crate::config::{CacheConfig, HuddleConfig, PlaybackConfig, ResolverConfig};
use crate::error::{HuddleError, Result};
use crate::pipeline::messages::{CallId, UserId};
use crate::runtime::{EventBus, RuntimeEvent};
use bytes::Bytes;
use huddle_media::{MediaResolver, SourceKind, TrackInfo, canonical_url, classify, is_url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on a single radio search, however many refills came before.
const MAX_RADIO_SEARCH: usize = 50;

/// The track currently on the sink.
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub track: QueuedTrack,
    pub handle: TrackHandle,
    /// 0 for the first start, 1 after a re-resolution.
    pub attempt: u32,
    pub stream_url: String,
}

/// Result of a play request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlayOutcome {
    /// Nothing was playing; the track started immediately.
    Started { title: String },
    /// Appended behind the current track.
    Queued { title: String, position: usize },
    /// Radio mode entered with `queued` candidates.
    Radio {
        seed: String,
        queued: usize,
        started: bool,
    },
}

/// Serializable view of a call's playback state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub now_playing: Option<NowPlaying>,
    pub queue: Vec<QueuedTrack>,
    pub radio_seed: Option<String>,
}

/// Returns true when `query` asks for radio mode: a non-URL request
/// containing one of `keywords` as a whole word.
pub fn is_radio_request(query: &str, keywords: &[String]) -> bool {
    if is_url(query) {
        return false;
    }
    query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| keywords.iter().any(|k| k.eq_ignore_ascii_case(w)))
}

/// Queue, radio and player state for one call.
pub struct PlaybackScheduler {
    call: CallId,
    resolver: Arc<dyn MediaResolver>,
    cache: SharedCache,
    mixer: Mixer,
    events: EventBus,
    settings: PlaybackConfig,
    media: ResolverConfig,
    ttls: CacheConfig,
    queue: TrackQueue,
    radio: Option<RadioState>,
    now: Option<NowPlaying>,
}

impl PlaybackScheduler {
    pub fn new(
        call: CallId,
        config: &HuddleConfig,
        resolver: Arc<dyn MediaResolver>,
        cache: SharedCache,
        sink: Arc<dyn AudioSink>,
        events: EventBus,
    ) -> Self {
        Self {
            call,
            resolver,
            cache,
            mixer: Mixer::new(sink, config.mixer.clone()),
            events,
            settings: config.playback.clone(),
            media: config.media.clone(),
            ttls: config.cache.clone(),
            queue: TrackQueue::new(config.playback.max_queue),
            radio: None,
            now: None,
        }
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.now.is_none()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_radio(&self) -> bool {
        self.radio.is_some()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            now_playing: self.now.clone(),
            queue: self.queue.snapshot(),
            radio_seed: self.radio.as_ref().map(|r| r.seed.clone()),
        }
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Play `query` now if idle, otherwise queue it. Radio-style queries
    /// enter radio mode instead.
    ///
    /// # Errors
    ///
    /// - [`HuddleError::Rejected`] when the queue is full
    /// - [`HuddleError::Resolve`] / [`HuddleError::Timeout`] when lookup fails
    /// - [`HuddleError::Playback`] when the sink refuses the stream
    pub async fn enqueue_or_play(
        &mut self,
        query: &str,
        requester: Option<UserId>,
    ) -> Result<PlayOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(HuddleError::Playback("empty play request".into()));
        }
        if is_radio_request(query, &self.settings.radio_keywords) {
            return self.start_radio(query, requester).await;
        }
        if self.now.is_some() && self.queue.is_full() {
            return Err(self.queue_full());
        }

        let track = self.lookup(query, requester).await?;
        let title = track.title.clone();
        if self.now.is_some() {
            let position = self.queue.push(track)?;
            info!(call = %self.call, %title, position, "track queued");
            return Ok(PlayOutcome::Queued { title, position });
        }

        if let Err(e) = self.start_track(track, 0).await {
            self.emit_failed(&title, &e.to_string());
            return Err(e);
        }
        Ok(PlayOutcome::Started { title })
    }

    /// Stop the current track and start the next one.
    ///
    /// Returns the new current track, or `None` when the call went idle.
    ///
    /// # Errors
    ///
    /// Returns [`HuddleError::Playback`] when nothing is playing.
    pub async fn skip(&mut self) -> Result<Option<NowPlaying>> {
        let Some(current) = self.now.take() else {
            return Err(HuddleError::Playback("nothing is playing".into()));
        };
        info!(call = %self.call, title = %current.track.title, "skipping track");
        self.mixer.stop_music().await;
        self.advance().await;
        Ok(self.now.clone())
    }

    /// Halt playback and clear the queue and radio mode.
    ///
    /// Returns how many queued tracks were discarded.
    pub async fn stop(&mut self) -> usize {
        let cleared = self.queue.len();
        self.queue.clear();
        self.radio = None;
        let was_playing = self.now.take().is_some();
        self.mixer.stop_music().await;
        if was_playing || cleared > 0 {
            info!(call = %self.call, cleared, "playback stopped");
            self.events.emit(RuntimeEvent::PlaybackIdle {
                call: self.call.clone(),
            });
        }
        cleared
    }

    /// Play a speech clip through the mixer.
    ///
    /// # Errors
    ///
    /// Returns the sink's error.
    pub async fn speak(&mut self, audio: Bytes) -> Result<TrackHandle> {
        self.mixer.start_speech(audio).await
    }

    /// Speech auto-stop deadline for `handle` elapsed.
    pub async fn speech_timed_out(&mut self, handle: TrackHandle) {
        self.mixer.speech_timed_out(handle).await;
    }

    /// Route a transport notification to the speech clip or the music.
    pub async fn on_sink_event(&mut self, event: SinkEvent) {
        let handle = event.handle();
        if self.mixer.speech() == Some(handle) {
            if let SinkEvent::Errored { message, .. } = &event {
                warn!(call = %self.call, %handle, %message, "speech clip failed");
            }
            self.mixer.speech_finished(handle).await;
            return;
        }

        match self.now.as_ref() {
            Some(now) if now.handle == handle => {}
            _ => {
                debug!(call = %self.call, %handle, "ignoring event for stale handle");
                return;
            }
        }

        match event {
            SinkEvent::Ended { .. } => self.on_track_end(handle).await,
            SinkEvent::Errored { message, .. } => self.on_track_error(handle, &message).await,
        }
    }

    async fn on_track_end(&mut self, handle: TrackHandle) {
        self.mixer.music_finished(handle);
        if let Some(done) = self.now.take() {
            debug!(call = %self.call, title = %done.track.title, "track ended");
            self.events.emit(RuntimeEvent::TrackEnded {
                call: self.call.clone(),
                title: done.track.title,
            });
        }
        self.advance().await;
    }

    async fn on_track_error(&mut self, handle: TrackHandle, message: &str) {
        self.mixer.music_finished(handle);
        let Some(failed) = self.now.take() else {
            return;
        };

        let mut reason = message.to_owned();
        if failed.attempt == 0 {
            warn!(
                call = %self.call,
                title = %failed.track.title,
                error = %message,
                "stream failed, re-resolving once"
            );
            if classify(&failed.track.url, &self.media) == SourceKind::PlatformUrl {
                self.cache
                    .invalidate(CacheNamespace::Resolve, &canonical_url(&failed.track.url));
            }
            match self.start_track(failed.track.clone(), failed.attempt + 1).await {
                Ok(()) => return,
                Err(e) => reason = e.to_string(),
            }
        }

        warn!(call = %self.call, title = %failed.track.title, %reason, "giving up on track");
        self.emit_failed(&failed.track.title, &reason);
        self.advance().await;
    }

    /// Start the next playable queued track, refilling from radio when the
    /// queue runs dry. Goes idle when nothing is left.
    async fn advance(&mut self) {
        loop {
            let Some(next) = self.queue.pop() else {
                if self.radio.is_some() && self.refill().await > 0 {
                    continue;
                }
                info!(call = %self.call, radio = self.radio.is_some(), "queue exhausted");
                self.events.emit(RuntimeEvent::PlaybackIdle {
                    call: self.call.clone(),
                });
                return;
            };

            let title = next.title.clone();
            match self.start_track(next, 0).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(call = %self.call, %title, error = %e, "skipping unplayable track");
                    self.emit_failed(&title, &e.to_string());
                }
            }
        }

        if self.radio.is_some() && self.queue.len() < self.settings.radio_low_water {
            self.refill().await;
        }
    }

    fn queue_full(&self) -> HuddleError {
        HuddleError::Rejected(format!("queue is full ({} tracks)", self.settings.max_queue))
    }

    async fn start_radio(&mut self, seed: &str, requester: Option<UserId>) -> Result<PlayOutcome> {
        if self.queue.is_full() {
            return Err(self.queue_full());
        }
        let mut radio = RadioState::new(seed, requester, self.settings.radio_history);
        if let Some(now) = &self.now {
            radio.remember(canonical_url(&now.track.url));
        }
        let previous = self.radio.replace(radio);

        let queued = self.refill().await;
        if queued == 0 {
            self.radio = previous;
            return Err(HuddleError::Resolve(format!("no tracks found for {seed:?}")));
        }

        let started = if self.now.is_none() {
            self.advance().await;
            self.now.is_some()
        } else {
            false
        };
        info!(call = %self.call, %seed, queued, started, "radio mode");
        Ok(PlayOutcome::Radio {
            seed: seed.to_owned(),
            queued,
            started,
        })
    }

    /// Append a batch of unseen radio candidates. Returns how many were added.
    async fn refill(&mut self) -> usize {
        let Some(radio) = self.radio.as_ref() else {
            return 0;
        };
        let room = self.queue.remaining();
        if room == 0 {
            return 0;
        }

        // Each refill searches deeper so repeat batches are not all duplicates.
        let depth = radio.refills as usize + 1;
        let limit = (self.settings.radio_batch * depth).min(MAX_RADIO_SEARCH);
        let seed = radio.seed.clone();
        let requester = radio.requester.clone();

        let hits = match self.search(&seed, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(call = %self.call, %seed, error = %e, "radio refill failed");
                Vec::new()
            }
        };

        let mut added = 0;
        if let Some(radio) = self.radio.as_mut() {
            radio.refills += 1;
            radio.last_refill = Some(chrono::Utc::now());
            for hit in hits {
                if added >= room.min(self.settings.radio_batch) {
                    break;
                }
                if !radio.remember(canonical_url(&hit.url)) {
                    continue;
                }
                let track = QueuedTrack::new(&seed, &hit.url, &hit.title, requester.clone());
                if self.queue.push(track).is_err() {
                    break;
                }
                added += 1;
            }
        }

        if added > 0 {
            debug!(call = %self.call, %seed, added, "radio refilled");
            self.events.emit(RuntimeEvent::QueueRefilled {
                call: self.call.clone(),
                added,
            });
        }
        added
    }

    /// Turn a user query into a queueable track.
    async fn lookup(&self, query: &str, requester: Option<UserId>) -> Result<QueuedTrack> {
        match classify(query, &self.media) {
            SourceKind::SearchTerm => {
                let hits = self.search(query, 1).await?;
                let hit = hits
                    .into_iter()
                    .next()
                    .ok_or_else(|| HuddleError::Resolve(format!("no results for {query:?}")))?;
                Ok(QueuedTrack::new(query, &hit.url, &hit.title, requester))
            }
            SourceKind::PlatformUrl | SourceKind::DirectUrl => {
                Ok(QueuedTrack::new(query, query, query, requester))
            }
        }
    }

    async fn start_track(&mut self, track: QueuedTrack, attempt: u32) -> Result<()> {
        let stream_url = self.stream_url_for(&track.url).await?;
        let handle = TrackHandle::next();
        self.mixer.start_music(handle, &stream_url).await?;

        info!(call = %self.call, title = %track.title, %handle, attempt, "track started");
        self.events.emit(RuntimeEvent::TrackStarted {
            call: self.call.clone(),
            title: track.title.clone(),
            attempt,
        });
        self.now = Some(NowPlaying {
            track,
            handle,
            attempt,
            stream_url,
        });
        Ok(())
    }

    /// Platform pages go through the resolver (cached); anything else is
    /// already playable.
    async fn stream_url_for(&self, source: &str) -> Result<String> {
        if classify(source, &self.media) != SourceKind::PlatformUrl {
            return Ok(source.to_owned());
        }

        let key = canonical_url(source);
        let resolver = Arc::clone(&self.resolver);
        let timeout = self.resolver_timeout();
        let ttl = Duration::from_secs(self.ttls.resolve_ttl_secs);
        let value = self
            .cache
            .get_or_try_insert_with(CacheNamespace::Resolve, &key, ttl, || async move {
                let url = tokio::time::timeout(timeout, resolver.stream_url(source))
                    .await
                    .map_err(|_| HuddleError::Timeout(format!("resolving {source}")))??;
                Ok::<_, HuddleError>(CacheValue::Text(url))
            })
            .await?;
        value
            .into_text()
            .ok_or_else(|| HuddleError::Resolve(format!("cache entry {key} is not a URL")))
    }

    /// Cached search. Empty results are errors so they are never cached.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>> {
        let key = format!("{limit}:{query}");
        let resolver = Arc::clone(&self.resolver);
        let timeout = self.resolver_timeout();
        let ttl = Duration::from_secs(self.ttls.search_ttl_secs);
        let value = self
            .cache
            .get_or_try_insert_with(CacheNamespace::Search, &key, ttl, || async move {
                let hits = tokio::time::timeout(timeout, resolver.search(query, limit))
                    .await
                    .map_err(|_| HuddleError::Timeout(format!("searching {query:?}")))??;
                if hits.is_empty() {
                    return Err(HuddleError::Resolve(format!("no results for {query:?}")));
                }
                Ok::<_, HuddleError>(CacheValue::Tracks(hits))
            })
            .await?;
        value
            .into_tracks()
            .ok_or_else(|| HuddleError::Resolve(format!("cache entry {key} is not a track list")))
    }

    fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.media.timeout_seconds)
    }

    fn emit_failed(&self, title: &str, reason: &str) {
        self.events.emit(RuntimeEvent::TrackFailed {
            call: self.call.clone(),
            title: title.to_owned(),
            reason: reason.to_owned(),
        });
    }
}

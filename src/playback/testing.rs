//! In-memory sink and resolver used by playback unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::sink::{AudioSink, TrackHandle};
use crate::error::{HuddleError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use huddle_media::{MediaError, MediaResolver, TrackInfo};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkOp {
    Stream(TrackHandle, String, f32),
    Clip(TrackHandle, usize),
    Pause(TrackHandle),
    Resume(TrackHandle),
    Stop(TrackHandle),
    Volume(TrackHandle, f32),
}

#[derive(Default)]
pub struct FakeSink {
    pub ops: Mutex<Vec<SinkOp>>,
    pub fail_streams: AtomicBool,
}

impl FakeSink {
    pub fn ops(&self) -> Vec<SinkOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<(TrackHandle, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Stream(h, url, _) => Some((h, url)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, op: SinkOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play_stream(&self, handle: TrackHandle, url: &str, volume: f32) -> Result<()> {
        if self.fail_streams.load(Ordering::SeqCst) {
            return Err(HuddleError::Playback("sink refused stream".into()));
        }
        self.push(SinkOp::Stream(handle, url.to_owned(), volume));
        Ok(())
    }

    async fn play_clip(&self, handle: TrackHandle, audio: Bytes) -> Result<()> {
        self.push(SinkOp::Clip(handle, audio.len()));
        Ok(())
    }

    async fn pause(&self, handle: TrackHandle) -> Result<()> {
        self.push(SinkOp::Pause(handle));
        Ok(())
    }

    async fn resume(&self, handle: TrackHandle) -> Result<()> {
        self.push(SinkOp::Resume(handle));
        Ok(())
    }

    async fn stop(&self, handle: TrackHandle) -> Result<()> {
        self.push(SinkOp::Stop(handle));
        Ok(())
    }

    async fn set_volume(&self, handle: TrackHandle, volume: f32) -> Result<()> {
        self.push(SinkOp::Volume(handle, volume));
        Ok(())
    }
}

/// Resolver that fabricates numbered search results and stream URLs.
#[derive(Default)]
pub struct FakeResolver {
    pub searches: Mutex<Vec<(String, usize)>>,
    pub resolves: AtomicUsize,
    pub empty_search: AtomicBool,
}

impl FakeResolver {
    pub fn search_calls(&self) -> Vec<(String, usize)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn search(&self, query: &str, limit: usize) -> huddle_media::Result<Vec<TrackInfo>> {
        self.searches.lock().unwrap().push((query.to_owned(), limit));
        if self.empty_search.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let slug = query.replace(' ', "-");
        Ok((0..limit)
            .map(|i| TrackInfo {
                title: format!("{query} #{i}"),
                url: format!("https://www.youtube.com/watch?v={slug}-{i}"),
                duration_secs: Some(180),
            })
            .collect())
    }

    async fn stream_url(&self, source: &str) -> huddle_media::Result<String> {
        let n = self.resolves.fetch_add(1, Ordering::SeqCst);
        if source.contains("broken") {
            return Err(MediaError::Resolver("video unavailable".into()));
        }
        Ok(format!("https://cdn.example/{n}?src={source}"))
    }
}

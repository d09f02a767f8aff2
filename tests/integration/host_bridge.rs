//! NDJSON host protocol driven over in-memory pipes.

use crate::helpers::{CountingResolver, harness, test_config};
use huddle::host::{
    CommandEnvelope, CommandName, EventEnvelope, HostBridge, HostEvents, ResponseEnvelope,
    run_bridge_io,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

struct HostSide {
    commands: DuplexStream,
    lines: Lines<BufReader<DuplexStream>>,
    events: Vec<EventEnvelope>,
}

impl HostSide {
    async fn send(&mut self, envelope: &CommandEnvelope) {
        let line = serde_json::to_string(envelope).unwrap();
        self.send_raw(&line).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.commands.write_all(line.as_bytes()).await.unwrap();
        self.commands.write_all(b"\n").await.unwrap();
    }

    /// Read until the response for `request_id`, keeping events seen on the way.
    async fn response(&mut self, request_id: &str) -> ResponseEnvelope {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let line = self.lines.next_line().await.unwrap().expect("bridge output closed");
                let value: serde_json::Value = serde_json::from_str(&line).unwrap();
                if value.get("event_id").is_some() {
                    self.events.push(serde_json::from_value(value).unwrap());
                    continue;
                }
                let response: ResponseEnvelope = serde_json::from_value(value).unwrap();
                if response.request_id == request_id {
                    return response;
                }
            }
        })
        .await
        .expect("timed out waiting for response")
    }

    async fn event(&mut self, name: &str) -> EventEnvelope {
        if let Some(pos) = self.events.iter().position(|e| e.event == name) {
            return self.events.remove(pos);
        }
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let line = self.lines.next_line().await.unwrap().expect("bridge output closed");
                if let Ok(event) = serde_json::from_str::<EventEnvelope>(&line) {
                    if event.event == name {
                        return event;
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

struct Bridge {
    host: HostSide,
    task: tokio::task::JoinHandle<huddle::Result<()>>,
    resolver: Arc<CountingResolver>,
    _tmp: tempfile::TempDir,
}

fn start_bridge() -> Bridge {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let resolver = Arc::clone(&h.resolver);
    let bridge = Arc::new(HostBridge::new(
        Arc::new(h.coordinator),
        HostEvents::default(),
    ));

    let (commands, bridge_in) = tokio::io::duplex(64 * 1024);
    let (bridge_out, host_out) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(run_bridge_io(bridge, BufReader::new(bridge_in), bridge_out));
    let host = HostSide {
        commands,
        lines: BufReader::new(host_out).lines(),
        events: Vec::new(),
    };
    Bridge {
        host,
        task,
        resolver,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn ping_and_malformed_lines() {
    let Bridge { mut host, task, .. } = start_bridge();

    host.send(&CommandEnvelope::new("r1", CommandName::HostPing, json!({})))
        .await;
    let resp = host.response("r1").await;
    assert!(resp.ok);
    assert_eq!(resp.payload["pong"], json!(true));

    host.send_raw("{not json").await;
    let resp = host.response("parse-error").await;
    assert!(!resp.ok);

    host.send(&CommandEnvelope::new("r2", CommandName::RuntimeStop, json!({})))
        .await;
    assert!(host.response("r2").await.ok);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn join_play_and_sink_events_round_trip() {
    let Bridge { mut host, task, .. } = start_bridge();

    host.send(&CommandEnvelope::new(
        "j1",
        CommandName::CallJoin,
        json!({"call": "c1", "text_channel": "text-1"}),
    ))
    .await;
    assert!(host.response("j1").await.ok);
    let joined = host.event("runtime.call_joined").await;
    assert_eq!(joined.payload["call"], json!("c1"));

    host.send(&CommandEnvelope::new(
        "p1",
        CommandName::PlaybackPlay,
        json!({"call": "c1", "query": "https://example.com/a.mp3", "requester": "alice"}),
    ))
    .await;
    let resp = host.response("p1").await;
    assert!(resp.ok, "{resp:?}");
    assert_eq!(resp.payload["status"], json!("started"));

    let stream = host.event("sink.play_stream").await;
    assert_eq!(stream.payload["url"], json!("https://example.com/a.mp3"));
    let handle = stream.payload["handle"].clone();

    host.send(&CommandEnvelope::new(
        "s1",
        CommandName::SinkEvent,
        json!({"call": "c1", "event": {"kind": "ended", "handle": handle}}),
    ))
    .await;
    assert!(host.response("s1").await.ok);
    host.event("runtime.playback_idle").await;

    host.send(&CommandEnvelope::new(
        "q1",
        CommandName::PlaybackQueue,
        json!({"call": "c1"}),
    ))
    .await;
    let snapshot = host.response("q1").await;
    assert_eq!(snapshot.payload["now_playing"], serde_json::Value::Null);

    host.send(&CommandEnvelope::new(
        "l1",
        CommandName::CallLeave,
        json!({"call": "c1"}),
    ))
    .await;
    assert!(host.response("l1").await.ok);

    host.send(&CommandEnvelope::new(
        "l2",
        CommandName::CallLeave,
        json!({"call": "c1"}),
    ))
    .await;
    let resp = host.response("l2").await;
    assert!(!resp.ok);
    assert!(resp.error.unwrap().contains("not in call"));

    drop(host);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_lookup_in_one_call_does_not_hold_up_another() {
    let Bridge {
        mut host,
        task,
        resolver,
        ..
    } = start_bridge();
    resolver.delay_searches(Duration::from_secs(2));

    for call in ["a", "b"] {
        let request = format!("join-{call}");
        host.send(&CommandEnvelope::new(
            request.as_str(),
            CommandName::CallJoin,
            json!({"call": call}),
        ))
        .await;
        assert!(host.response(&request).await.ok);
    }

    let sent = Instant::now();
    host.send(&CommandEnvelope::new(
        "play-a",
        CommandName::PlaybackPlay,
        json!({"call": "a", "query": "some jazz"}),
    ))
    .await;
    host.send(&CommandEnvelope::new(
        "queue-a",
        CommandName::PlaybackQueue,
        json!({"call": "a"}),
    ))
    .await;
    host.send(&CommandEnvelope::new(
        "listen-b",
        CommandName::VoiceListenSet,
        json!({"call": "b", "enabled": false}),
    ))
    .await;

    let resp = host.response("listen-b").await;
    assert!(resp.ok, "{resp:?}");
    assert!(
        sent.elapsed() < Duration::from_secs(1),
        "call b waited {:?} behind call a",
        sent.elapsed()
    );

    // Within call a, the queue query still runs after the play finished.
    let resp = host.response("play-a").await;
    assert!(resp.ok, "{resp:?}");
    assert_eq!(resp.payload["status"], json!("started"));
    let snapshot = host.response("queue-a").await;
    assert!(snapshot.payload["now_playing"].is_object());

    host.send(&CommandEnvelope::new("stop", CommandName::RuntimeStop, json!({})))
        .await;
    assert!(host.response("stop").await.ok);
    task.await.unwrap().unwrap();
}

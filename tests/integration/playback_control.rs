//! Music control through the coordinator: direct URLs, skip, queue limits,
//! radio refills and stale stream recovery.

use crate::helpers::{RecordingSink, SinkOp, harness, test_config, wait_for};
use huddle::error::HuddleError;
use huddle::pipeline::messages::{CallId, UserId};
use huddle::playback::{PlayOutcome, SinkEvent};
use huddle::RuntimeEvent;
use std::sync::Arc;

#[tokio::test]
async fn direct_url_starts_immediately_without_resolution() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let sink = Arc::new(RecordingSink::default());
    h.coordinator.join(call.clone(), None, sink.clone()).unwrap();

    let outcome = h
        .coordinator
        .enqueue_or_play(&call, "https://example.com/a.mp3", Some(UserId::from("alice")))
        .await
        .unwrap();

    assert!(matches!(outcome, PlayOutcome::Started { .. }));
    assert_eq!(h.resolver.resolve_count(), 0);
    assert!(h.resolver.searches().is_empty());
    assert_eq!(sink.streams().len(), 1);
    assert_eq!(sink.streams()[0].1, "https://example.com/a.mp3");
    let now = h.coordinator.now_playing(&call).await.unwrap().unwrap();
    assert_eq!(now.track.requester, Some(UserId::from("alice")));
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn skip_starts_next_track_then_goes_idle() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let sink = Arc::new(RecordingSink::default());
    let mut events = h.coordinator.subscribe();
    h.coordinator.join(call.clone(), None, sink.clone()).unwrap();

    h.coordinator
        .enqueue_or_play(&call, "https://example.com/a.mp3", None)
        .await
        .unwrap();
    let queued = h
        .coordinator
        .enqueue_or_play(&call, "https://example.com/b.mp3", None)
        .await
        .unwrap();
    assert!(matches!(queued, PlayOutcome::Queued { position: 1, .. }));
    let (first, _) = sink.streams()[0].clone();

    let next = h.coordinator.skip(&call).await.unwrap().unwrap();
    assert_eq!(next.track.url, "https://example.com/b.mp3");
    assert!(sink.ops().contains(&SinkOp::Stop(first)));
    assert_eq!(sink.streams().len(), 2);

    assert!(h.coordinator.skip(&call).await.unwrap().is_none());
    wait_for(&mut events, |e| matches!(e, RuntimeEvent::PlaybackIdle { .. })).await;
    assert!(h.coordinator.now_playing(&call).await.unwrap().is_none());

    let err = h.coordinator.skip(&call).await.unwrap_err();
    assert!(matches!(err, HuddleError::Playback(_)));
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn full_queue_rejects_and_keeps_length() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.playback.max_queue = 3;
    let h = harness(config);
    let call = CallId::from("c1");
    h.coordinator
        .join(call.clone(), None, Arc::new(RecordingSink::default()))
        .unwrap();

    for i in 0..4 {
        h.coordinator
            .enqueue_or_play(&call, &format!("https://example.com/{i}.mp3"), None)
            .await
            .unwrap();
    }
    let err = h
        .coordinator
        .enqueue_or_play(&call, "https://example.com/overflow.mp3", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HuddleError::Rejected(_)));
    assert_eq!(h.coordinator.queue_snapshot(&call).await.unwrap().queue.len(), 3);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn radio_refills_once_when_below_low_water() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    h.coordinator
        .join(call.clone(), None, Arc::new(RecordingSink::default()))
        .unwrap();

    let outcome = h
        .coordinator
        .enqueue_or_play(&call, "jazz radio", None)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PlayOutcome::Radio {
            seed: "jazz radio".into(),
            queued: 5,
            started: true
        }
    );
    assert_eq!(h.coordinator.queue_snapshot(&call).await.unwrap().queue.len(), 4);

    // 4 → 3 queued: still at the low-water mark.
    h.coordinator.skip(&call).await.unwrap();
    assert_eq!(h.resolver.searches().len(), 1);

    // 3 → 2 queued: one refill with a deeper search.
    h.coordinator.skip(&call).await.unwrap();
    assert_eq!(
        h.resolver.searches(),
        vec![("jazz radio".to_owned(), 5), ("jazz radio".to_owned(), 10)]
    );
    let snapshot = h.coordinator.queue_snapshot(&call).await.unwrap();
    assert_eq!(snapshot.queue.len(), 7);
    assert_eq!(snapshot.radio_seed.as_deref(), Some("jazz radio"));

    let titles: Vec<String> = snapshot.queue.iter().map(|t| t.title.clone()).collect();
    assert!(titles.iter().all(|t| !t.ends_with("#0") && !t.ends_with("#1")));

    assert_eq!(h.coordinator.stop(&call).await.unwrap(), 7);
    assert!(
        h.coordinator
            .queue_snapshot(&call)
            .await
            .unwrap()
            .radio_seed
            .is_none()
    );
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn failed_stream_is_re_resolved_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let sink = Arc::new(RecordingSink::default());
    let mut events = h.coordinator.subscribe();
    h.coordinator.join(call.clone(), None, sink.clone()).unwrap();

    h.coordinator
        .enqueue_or_play(&call, "https://www.youtube.com/watch?v=abc", None)
        .await
        .unwrap();
    assert_eq!(h.resolver.resolve_count(), 1);
    let (first, _) = sink.streams()[0].clone();

    h.coordinator
        .on_sink_event(
            &call,
            SinkEvent::Errored {
                handle: first,
                message: "403".into(),
            },
        )
        .await
        .unwrap();
    let now = h.coordinator.now_playing(&call).await.unwrap().unwrap();
    assert_eq!(now.attempt, 1);
    assert_eq!(h.resolver.resolve_count(), 2);

    h.coordinator
        .on_sink_event(
            &call,
            SinkEvent::Errored {
                handle: now.handle,
                message: "403".into(),
            },
        )
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, RuntimeEvent::TrackFailed { .. })).await;
    assert!(h.coordinator.now_playing(&call).await.unwrap().is_none());
    assert_eq!(h.resolver.resolve_count(), 2);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn calls_share_search_and_stream_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    for id in ["c1", "c2"] {
        let call = CallId::from(id);
        h.coordinator
            .join(call.clone(), None, Arc::new(RecordingSink::default()))
            .unwrap();
        h.coordinator
            .enqueue_or_play(&call, "lofi beats", None)
            .await
            .unwrap();
    }
    assert_eq!(h.resolver.searches(), vec![("lofi beats".to_owned(), 1)]);
    assert_eq!(h.resolver.resolve_count(), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn leaving_one_call_leaves_others_playing() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let (a, b) = (CallId::from("a"), CallId::from("b"));
    for call in [&a, &b] {
        h.coordinator
            .join(call.clone(), None, Arc::new(RecordingSink::default()))
            .unwrap();
        h.coordinator
            .enqueue_or_play(call, "https://example.com/x.mp3", None)
            .await
            .unwrap();
    }

    h.coordinator.leave(&a).await.unwrap();
    assert!(matches!(
        h.coordinator.now_playing(&a).await,
        Err(HuddleError::Rejected(_))
    ));
    assert!(h.coordinator.now_playing(&b).await.unwrap().is_some());
    h.coordinator.shutdown().await;
}

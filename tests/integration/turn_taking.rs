//! Voice path end to end: frames → utterance → transcript → gate → agent →
//! spoken reply, driven through the coordinator with a paused clock.

use crate::helpers::{
    CollectingChannel, SinkOp, harness, silence_frame, speak, speech_frame, test_config, wait_for,
};
use huddle::RuntimeEvent;
use huddle::pipeline::messages::{CallId, UserId};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn wake_word_gates_dispatch_and_reply_is_spoken() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let channel = Arc::new(CollectingChannel::new("text-1"));
    let sink = Arc::new(crate::helpers::RecordingSink::default());
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), Some(channel.clone()), sink.clone())
        .unwrap();

    h.recognizer.script("alice", "hello there");
    speak(&h.coordinator, &call, "alice", 5).await;
    let discarded = wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::TranscriptDiscarded { .. })
    })
    .await;
    assert_eq!(
        discarded,
        RuntimeEvent::TranscriptDiscarded {
            call: call.clone(),
            text: "hello there".into()
        }
    );
    assert!(h.agent.messages().is_empty());

    h.recognizer.script("alice", "hey echo what's up");
    speak(&h.coordinator, &call, "alice", 5).await;
    let dispatched = wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::TurnDispatched { .. })
    })
    .await;
    let RuntimeEvent::TurnDispatched { prompt, session, .. } = dispatched else {
        unreachable!()
    };
    assert_eq!(prompt, "what's up");
    assert_eq!(session.as_str(), "huddle-c1");

    wait_for(&mut events, |e| matches!(e, RuntimeEvent::ReplySpoken { .. })).await;
    assert_eq!(
        h.agent.messages(),
        vec![("huddle-c1".to_owned(), "what's up".to_owned())]
    );
    assert_eq!(channel.posted(), vec!["sounds good".to_owned()]);
    assert_eq!(sink.clips(), vec![bytes::Bytes::from("audio:sounds good")]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.agent.messages().len(), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fragments_within_debounce_become_one_turn() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();

    h.recognizer.script("alice", "hey echo play");
    h.recognizer.script("alice", "some jazz");
    speak(&h.coordinator, &call, "alice", 3).await;
    speak(&h.coordinator, &call, "alice", 3).await;

    let RuntimeEvent::TurnDispatched { prompt, .. } = wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::TurnDispatched { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(prompt, "play some jazz");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.agent.messages().len(), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn trailing_silence_finalizes_without_speaking_signal() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();

    for _ in 0..4 {
        h.coordinator
            .on_frame(&call, UserId::from("bob"), speech_frame())
            .unwrap();
    }
    for _ in 0..10 {
        h.coordinator
            .on_frame(&call, UserId::from("bob"), silence_frame())
            .unwrap();
    }

    let finalized = wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::UtteranceFinalized { .. })
    })
    .await;
    let RuntimeEvent::UtteranceFinalized { user, speech_frames, .. } = finalized else {
        unreachable!()
    };
    assert_eq!(user.as_str(), "bob");
    assert_eq!(speech_frames, 4);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silence_only_never_reaches_the_recognizer() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();

    for _ in 0..50 {
        h.coordinator
            .on_frame(&call, UserId::from("bob"), silence_frame())
            .unwrap();
    }
    h.coordinator
        .on_speaking(&call, UserId::from("bob"), false)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn speaker_leaving_mid_utterance_discards_partial_speech() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();

    for _ in 0..5 {
        h.coordinator
            .on_frame(&call, UserId::from("bob"), speech_frame())
            .unwrap();
    }
    h.coordinator
        .on_speaker_left(&call, UserId::from("bob"))
        .await
        .unwrap();
    h.coordinator
        .on_speaking(&call, UserId::from("bob"), false)
        .await
        .unwrap();

    // Another speaker still goes through after bob left.
    h.recognizer.script("alice", "hello");
    speak(&h.coordinator, &call, "alice", 5).await;
    let RuntimeEvent::UtteranceFinalized { user, .. } = wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::UtteranceFinalized { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(user.as_str(), "alice");
    wait_for(&mut events, |e| matches!(e, RuntimeEvent::Transcribed { .. })).await;
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn listening_off_skips_recognition() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();
    h.coordinator.set_listening(&call, false).unwrap();

    h.recognizer.script("alice", "hey echo are you there");
    speak(&h.coordinator, &call, "alice", 5).await;
    wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::UtteranceFinalized { .. })
    })
    .await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(h.agent.messages().is_empty());
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn always_respond_dispatches_without_wake_word() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();
    h.coordinator.set_always_respond(&call, true).await.unwrap();

    h.recognizer.script("alice", "play some jazz");
    speak(&h.coordinator, &call, "alice", 5).await;
    let RuntimeEvent::TurnDispatched { prompt, .. } = wait_for(&mut events, |e| {
        matches!(e, RuntimeEvent::TurnDispatched { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(prompt, "play some jazz");
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reply_ducks_music_then_restores_it() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let sink = Arc::new(crate::helpers::RecordingSink::default());
    h.coordinator.join(call.clone(), None, sink.clone()).unwrap();

    h.coordinator
        .enqueue_or_play(&call, "https://example.com/a.mp3", None)
        .await
        .unwrap();
    let (music, _) = sink.streams()[0].clone();

    h.coordinator.say(&call, "one moment").await.unwrap();
    let ops = sink.ops();
    assert!(ops.contains(&SinkOp::Volume(music, 0.2)));
    let clip = ops
        .iter()
        .find_map(|op| match op {
            SinkOp::Clip(handle, _) => Some(*handle),
            _ => None,
        })
        .unwrap();

    h.coordinator
        .on_sink_event(&call, huddle::playback::SinkEvent::Ended { handle: clip })
        .await
        .unwrap();
    // Snapshot round-trips through the playback task, so the end event is applied.
    h.coordinator.queue_snapshot(&call).await.unwrap();
    assert_eq!(sink.ops().last(), Some(&SinkOp::Volume(music, 1.0)));
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_session_reaches_the_agent() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let mut events = h.coordinator.subscribe();
    h.coordinator
        .join(call.clone(), None, Arc::new(crate::helpers::RecordingSink::default()))
        .unwrap();

    h.coordinator.reset_session(&call).await.unwrap();
    wait_for(&mut events, |e| matches!(e, RuntimeEvent::SessionReset { .. })).await;
    assert_eq!(h.agent.resets.load(Ordering::SeqCst), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn agent_error_reply_is_not_spoken() {
    let tmp = tempfile::tempdir().unwrap();
    let h = harness(test_config(tmp.path()));
    let call = CallId::from("c1");
    let sink = Arc::new(crate::helpers::RecordingSink::default());
    let mut events = h.coordinator.subscribe();
    h.coordinator.join(call.clone(), None, sink.clone()).unwrap();
    h.agent.set_reply("error: backend offline");

    h.recognizer.script("alice", "echo what time is it");
    speak(&h.coordinator, &call, "alice", 5).await;
    wait_for(&mut events, |e| matches!(e, RuntimeEvent::TurnFailed { .. })).await;
    assert!(sink.clips().is_empty());
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), 0);
    h.coordinator.shutdown().await;
}

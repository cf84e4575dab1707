use std::{cell::Cell, rc::Rc};

use chain_player::{
    player::{
        audio_backend::{AudioBackend, ContextState},
        config::EngineConfig,
        cycle::CycleKind,
        segment::{PlatformConfig, Segment},
        segment_audio::LoadState,
        status::PlayerState,
        PlayerError, PlayerErrorCode,
    },
    testing::Harness,
};
use url::Url;

fn harness() -> Harness {
    let harness = Harness::new(EngineConfig::default()).unwrap();
    harness.api.add_chain("coolair", "Cool Air");
    harness.api.add_chain("deepsea", "Deep Sea");
    harness
}

fn segment(harness: &Harness, id: &str, begin_offset: i64, end_offset: i64) -> Segment {
    let now = harness.now();
    Segment::new(id, 0, now + begin_offset, now + end_offset, &format!("{}.ogg", id)).unwrap()
}

fn counter() -> (Rc<Cell<usize>>, impl FnOnce() + 'static) {
    let count = Rc::new(Cell::new(0));
    let bump = count.clone();
    (count, move || bump.set(bump.get() + 1))
}

#[test]
fn test_play_moves_to_suspend() {
    let mut h = harness();
    let chain = h.block_on(h.session.play("coolair")).unwrap();
    assert_eq!(chain.name, "Cool Air");
    assert_eq!(h.session.state(), PlayerState::Suspend);
    assert_eq!(h.session.chain().unwrap().id, "coolair");
    assert_eq!(h.status.states(), vec![PlayerState::Standby, PlayerState::Suspend]);
}

#[test]
fn test_failed_chain_fetch_stays_in_standby() {
    let mut h = harness();
    let result = h.block_on(h.session.play("nope"));
    assert_eq!(result.unwrap_err().code, PlayerErrorCode::Http(404));
    assert_eq!(h.session.state(), PlayerState::Standby);
    assert!(h.status.logged("failed to load chain nope"));
}

#[test]
fn test_unlock_twice_probes_once() {
    let mut h = harness();
    h.block_on(h.session.play("coolair")).unwrap();

    let (first, first_callback) = counter();
    h.session.unlock(first_callback).unwrap();
    assert_eq!(first.get(), 0);
    h.run_for(200);
    assert_eq!(first.get(), 1);
    assert!(h.session.is_unlocked());

    let (second, second_callback) = counter();
    h.session.unlock(second_callback).unwrap();
    assert_eq!(second.get(), 1);
    assert_eq!(h.audio.dry_fires(), 1);
    assert_eq!(h.session.unlock_probes(), 1);
}

#[test]
fn test_unlock_requests_during_probe_share_it() {
    let mut h = harness();
    let (first, first_callback) = counter();
    let (second, second_callback) = counter();
    h.session.unlock(first_callback).unwrap();
    h.session.unlock(second_callback).unwrap();
    h.run_for(100);
    assert_eq!(first.get() + second.get(), 0);
    h.run_for(100);
    assert_eq!(first.get(), 1);
    assert_eq!(second.get(), 1);
    assert_eq!(h.audio.dry_fires(), 1);
}

#[test]
fn test_unlock_sets_origin_from_context_time() {
    let mut h = harness();
    let created = h.now();
    assert!(h.session.context_time(created).is_err());
    h.run_for(1500);
    h.session.unlock(|| ()).unwrap();
    h.run_for(200);
    assert_eq!(h.session.origin().unwrap().origin_utc_millis(), created);
    assert_eq!(h.session.context_time(created + 2500).unwrap(), 2.5);
}

#[test]
fn test_pinned_origin_survives_unlock() {
    let mut h = harness();
    h.session.pin_origin(1_000).unwrap();
    assert!(h.session.pin_origin(2_000).is_err());
    h.session.unlock(|| ()).unwrap();
    h.run_for(200);
    assert_eq!(h.session.origin().unwrap().origin_utc_millis(), 1_000);
}

#[test]
fn test_blocked_autoplay_raises_alert() {
    let mut h = harness();
    h.audio.block_autoplay();
    h.block_on(h.session.play("coolair")).unwrap();

    let (count, callback) = counter();
    h.session.unlock(callback).unwrap();
    h.run_for(300);
    assert_eq!(count.get(), 0);
    assert!(!h.session.is_unlocked());
    assert_eq!(h.status.alerts.borrow().len(), 1);
    assert_eq!(h.session.state(), PlayerState::Suspend);

    let err = h.session.unlock(|| ()).unwrap_err();
    assert_eq!(err.code, PlayerErrorCode::UnlockFailed);
    assert_eq!(h.audio.dry_fires(), 1);
}

#[test]
fn test_resume_requires_unlock() {
    let mut h = harness();
    h.block_on(h.session.play("coolair")).unwrap();
    assert!(h.session.resume().is_err());
    assert_eq!(h.session.state(), PlayerState::Suspend);
}

#[test]
fn test_end_to_end_timeline() {
    let mut h = harness();
    let origin = h.now();
    h.session.pin_origin(origin).unwrap();
    h.api.set_segments(vec![segment(&h, "seg-1", 2000, 6000)]);
    h.api.hold_waveforms();

    h.start("coolair").unwrap();
    assert_eq!(h.session.state(), PlayerState::Syncing);
    assert!(h.session.is_cycling(CycleKind::Main));
    assert!(h.session.is_cycling(CycleKind::Sub));

    h.run_for(300);
    let snapshot = h.session.controller_snapshot("seg-1").unwrap();
    assert_eq!(snapshot.load_state, LoadState::Loading);
    assert_eq!(snapshot.begin_at_time, 2.0);
    assert_eq!(snapshot.end_at_time, 6.0);
    assert_eq!(h.session.load_progress().loaded, 0);

    h.api.release_waveforms();
    h.run_for(500);
    let snapshot = h.session.controller_snapshot("seg-1").unwrap();
    assert_eq!(snapshot.load_state, LoadState::Scheduled);
    assert!(!snapshot.is_playing);
    assert_eq!(h.session.state(), PlayerState::Syncing);
    assert_eq!(h.audio.scheduled()[1].when, 2.0);

    // 3s after origin
    h.run_for(2000);
    assert!(h.session.controller_snapshot("seg-1").unwrap().is_playing);
    assert_eq!(h.session.state(), PlayerState::Playing);
    assert_eq!(h.session.load_progress().loaded, 1);

    // 7s after origin
    h.run_for(4000);
    assert!(!h.session.controller_snapshot("seg-1").unwrap().is_playing);
    h.api.set_segments(vec![]);
    h.run_for(3300);
    assert!(h.session.controller_ids().is_empty());
    assert!(h.audio.scheduled()[1].stopped);
    assert_eq!(
        h.status.states(),
        vec![
            PlayerState::Standby,
            PlayerState::Suspend,
            PlayerState::Syncing,
            PlayerState::Playing
        ]
    );
}

#[test]
fn test_segment_inside_lead_time_is_never_scheduled() {
    let mut h = harness();
    let origin = h.now();
    h.session.pin_origin(origin).unwrap();
    h.api.set_segments(vec![
        segment(&h, "soon", 1100, 5100),
        segment(&h, "later", 5100, 9100),
    ]);

    h.start("coolair").unwrap();
    h.run_for(6000);
    let soon = h.session.controller_snapshot("soon").unwrap();
    assert_eq!(soon.load_state, LoadState::Skipped);
    assert!(h.status.logged("segment soon skipped"));
    assert!(!h.audio.scheduled_labels().contains(&"soon.ogg".to_string()));
    assert!(h.audio.scheduled_labels().contains(&"later.ogg".to_string()));
    assert_eq!(h.api.waveform_calls.get(), 1);
}

#[test]
fn test_failed_waveform_is_not_retried() {
    let mut h = harness();
    h.api.fail_waveform("seg-1.ogg");
    h.api.set_segments(vec![segment(&h, "seg-1", 4000, 8000)]);
    h.start("coolair").unwrap();
    h.run_for(6000);
    assert_eq!(h.api.waveform_calls.get(), 1);
    assert_eq!(
        h.session.controller_snapshot("seg-1").unwrap().load_state,
        LoadState::Failed
    );
    assert_eq!(h.session.state(), PlayerState::Syncing);
}

#[test]
fn test_config_fetch_is_retried_each_main_cycle() {
    let mut h = harness();
    h.api.set_config(Err(PlayerError::new_code(
        PlayerErrorCode::Network,
        "offline".to_string(),
    )));
    h.api.set_segments(vec![segment(&h, "seg-1", 9000, 13000)]);
    h.start("coolair").unwrap();
    assert_eq!(h.api.config_calls.get(), 1);
    assert_eq!(h.api.segment_calls.get(), 0);
    assert!(h.session.controller_ids().is_empty());
    assert!(h.status.logged("retrying"));

    h.api.set_config(Ok(PlatformConfig {
        segment_base_url: Url::parse("https://audio.example.com/chains/").unwrap(),
    }));
    h.run_for(5000);
    assert_eq!(h.api.config_calls.get(), 2);
    assert_eq!(h.api.segment_calls.get(), 1);
    assert_eq!(h.session.controller_ids(), vec!["seg-1".to_string()]);

    h.run_for(5000);
    assert_eq!(h.api.config_calls.get(), 2);
}

#[test]
fn test_segment_fetch_failure_keeps_last_known_set() {
    let mut h = harness();
    h.api.set_segments(vec![segment(&h, "seg-1", 9000, 13000)]);
    h.start("coolair").unwrap();
    assert_eq!(h.session.controller_ids(), vec!["seg-1".to_string()]);

    h.api.fail_segments(PlayerError::new_code(PlayerErrorCode::Http(503), "busy".to_string()));
    h.run_for(5000);
    assert_eq!(h.api.segment_calls.get(), 2);
    assert_eq!(h.session.controller_ids(), vec!["seg-1".to_string()]);
}

#[test]
fn test_stop_tears_everything_down() {
    let mut h = harness();
    h.api.set_segments(vec![segment(&h, "seg-1", 4000, 8000)]);
    h.start("coolair").unwrap();
    assert_eq!(h.session.controller_ids().len(), 1);

    let settle = h.session.stop();
    assert_eq!(h.session.state(), PlayerState::Standby);
    assert!(h.session.controller_ids().is_empty());
    assert!(h.session.chain().is_none());
    assert!(!h.session.is_cycling(CycleKind::Main));
    assert!(!h.session.is_cycling(CycleKind::Sub));
    assert!(h.audio.scheduled()[1].stopped);

    let before = h.now();
    h.block_on(settle);
    assert!(h.now() - before >= 500);

    let calls = h.api.segment_calls.get();
    h.run_for(10_000);
    assert_eq!(h.api.segment_calls.get(), calls);

    h.block_on(h.session.stop());
    assert_eq!(h.session.state(), PlayerState::Standby);
}

#[test]
fn test_play_replaces_the_running_chain() {
    let mut h = harness();
    h.api.set_segments(vec![segment(&h, "seg-1", 4000, 8000)]);
    h.start("coolair").unwrap();

    let before = h.now();
    h.block_on(h.session.play("deepsea")).unwrap();
    assert!(h.now() - before >= 500);
    assert_eq!(h.session.chain().unwrap().id, "deepsea");
    assert_eq!(h.session.state(), PlayerState::Suspend);
    assert!(h.session.controller_ids().is_empty());

    h.session.resume().unwrap();
    h.settle();
    assert_eq!(h.session.state(), PlayerState::Syncing);
    assert_eq!(h.audio.dry_fires(), 1);
}

#[test]
fn test_dispose_closes_the_audio_context() {
    let mut h = harness();
    h.start("coolair").unwrap();
    h.session.dispose();
    assert_eq!(h.audio.state(), ContextState::Closed);
    assert!(h.session.is_disposed());
    assert_eq!(h.session.state(), PlayerState::Standby);
    assert!(h.block_on(h.session.play("coolair")).is_err());
    assert!(h.session.unlock(|| ()).is_err());
}

#[test]
fn test_load_cap_applies_across_the_session() {
    let config = EngineConfig::from_toml("max_concurrent_loads = 2").unwrap();
    let mut h = Harness::new(config).unwrap();
    h.api.add_chain("coolair", "Cool Air");
    let segments = (0..4)
        .map(|index| segment(&h, &format!("s{}", index), 5000 + index * 4000, 9000 + index * 4000))
        .collect();
    h.api.set_segments(segments);
    h.api.hold_waveforms();

    h.start("coolair").unwrap();
    assert_eq!(h.api.held_waveforms(), 2);
    assert_eq!(h.session.load_progress().total, 4);

    h.api.release_waveforms();
    h.settle();
    assert_eq!(h.api.waveform_calls.get(), 4);
    assert_eq!(h.session.load_progress().loaded, 4);
}

#[test]
fn test_segment_queued_past_its_lead_time_is_never_fetched() {
    let config = EngineConfig::from_toml("max_concurrent_loads = 1").unwrap();
    let mut h = Harness::new(config).unwrap();
    h.api.add_chain("coolair", "Cool Air");
    let origin = h.now();
    h.session.pin_origin(origin).unwrap();
    h.api.set_segments(vec![
        segment(&h, "first", 3000, 7000),
        segment(&h, "second", 3100, 7100),
    ]);
    h.api.hold_waveforms();

    h.start("coolair").unwrap();
    assert_eq!(h.api.held_waveforms(), 1);
    h.run_for(2500);
    assert_eq!(h.api.waveform_calls.get(), 1);

    h.api.release_waveforms();
    h.settle();
    assert_eq!(h.api.waveform_calls.get(), 1);
    assert_eq!(
        h.session.controller_snapshot("second").unwrap().load_state,
        LoadState::Skipped
    );
    assert!(h.status.logged("segment second skipped"));
    let labels = h.audio.scheduled_labels();
    assert!(!labels.contains(&"first.ogg".to_string()));
    assert!(!labels.contains(&"second.ogg".to_string()));
}

//! Source lifecycle integration tests.
//!
//! Drive [`VideoSource`] through create/show/hide/update/destroy against the
//! headless host and backend and check the Stopped/Running state machine,
//! worker thread ownership and "no frame" publishing.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --package lumina-source --test lifecycle_test
//! ```
//!
//! With logs:
//! ```bash
//! RUST_LOG=lumina_source=debug cargo test --test lifecycle_test -- --nocapture
//! ```

use std::sync::Arc;

use lumina_source::headless::{HeadlessBackend, HeadlessEffect, HeadlessHost, PipelineState};
use lumina_source::properties::APPLY_BUTTON;
use lumina_source::settings::{KEY_SOURCE_ELEMENT, KEY_STOP_ON_HIDE};
use lumina_source::{BusMessage, Settings, SharedSettings, SourceState, VideoSource};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn settings(stop_on_hide: bool) -> SharedSettings {
    let mut settings = Settings::new();
    VideoSource::<HeadlessBackend>::defaults(&mut settings);
    settings.set_bool(KEY_STOP_ON_HIDE, stop_on_hide);
    SharedSettings::new(settings)
}

fn fixture() -> (Arc<HeadlessHost>, Arc<HeadlessBackend>) {
    init_tracing();
    (HeadlessHost::new(), Arc::new(HeadlessBackend::new()))
}

/// Running iff a pipeline is alive, for one source per backend.
fn assert_consistent(source: &VideoSource<HeadlessBackend>, backend: &HeadlessBackend) {
    match source.state() {
        SourceState::Running => assert_eq!(backend.alive_pipelines(), 1),
        SourceState::Stopped => assert_eq!(backend.alive_pipelines(), 0),
    }
}

#[test]
fn test_create_without_stop_on_hide_runs_immediately() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(false), host, Arc::clone(&backend));

    assert_eq!(source.state(), SourceState::Running);
    assert_consistent(&source, &backend);
}

#[test]
fn test_create_with_stop_on_hide_waits_for_show() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(true), host, Arc::clone(&backend));

    assert_eq!(source.state(), SourceState::Stopped);
    assert_eq!(backend.builds(), 0);

    source.show();
    assert_eq!(source.state(), SourceState::Running);
    assert_consistent(&source, &backend);
}

#[test]
fn test_show_while_running_keeps_pipeline() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(false), host, Arc::clone(&backend));

    source.show();
    source.show();
    assert_eq!(backend.builds(), 1);
}

#[test]
fn test_start_stop_sequences_never_half_started() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(true), host.clone(), Arc::clone(&backend));

    let steps: [fn(&VideoSource<HeadlessBackend>); 4] = [
        |s| s.show(),
        |s| s.hide(),
        |s| s.show(),
        |s| s.show(),
    ];
    for step in steps.iter().cycle().take(20) {
        step(&source);
        assert_consistent(&source, &backend);
    }

    host.set_showing(false);
    source.update(&settings(true));
    assert_consistent(&source, &backend);
    source.update(&settings(false));
    assert_consistent(&source, &backend);
}

#[test]
fn test_start_then_stop_without_frames() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(true), host.clone(), Arc::clone(&backend));

    source.show();
    source.hide();

    assert_eq!(source.state(), SourceState::Stopped);
    assert_eq!(source.session().texture(), None);
    assert_eq!(host.live_textures(), 0);
    assert_eq!(host.clear_video_calls(), 1);
}

#[test]
fn test_update_stop_on_hide_while_hidden_stays_stopped() {
    let (host, backend) = fixture();
    host.set_showing(false);
    let source = VideoSource::create(&settings(false), host, Arc::clone(&backend));
    assert_eq!(source.state(), SourceState::Running);

    source.update(&settings(true));

    assert_eq!(source.state(), SourceState::Stopped);
    assert_consistent(&source, &backend);
}

#[test]
fn test_update_stop_on_hide_while_visible_restarts() {
    let (host, backend) = fixture();
    host.set_showing(true);
    let source = VideoSource::create(&settings(true), host, Arc::clone(&backend));
    source.show();

    source.update(&settings(true));

    assert_eq!(source.state(), SourceState::Running);
    assert_eq!(backend.builds(), 2);
}

#[test]
fn test_update_without_stop_on_hide_always_runs() {
    for showing in [false, true] {
        let (host, backend) = fixture();
        host.set_showing(showing);
        let source = VideoSource::create(&settings(true), host, Arc::clone(&backend));
        assert_eq!(source.state(), SourceState::Stopped);

        source.update(&settings(false));
        assert_eq!(source.state(), SourceState::Running, "showing = {showing}");

        source.update(&settings(false));
        assert_eq!(source.state(), SourceState::Running, "showing = {showing}");
        assert_consistent(&source, &backend);
    }
}

#[test]
fn test_apply_uses_host_settings_edited_since_create() {
    let (host, backend) = fixture();
    host.set_showing(false);
    let mut defaults = Settings::new();
    VideoSource::<HeadlessBackend>::defaults(&mut defaults);
    let host_settings = SharedSettings::new(defaults);

    let source = VideoSource::create(&host_settings, host, Arc::clone(&backend));
    assert_eq!(source.state(), SourceState::Stopped);

    host_settings.lock().set_bool(KEY_STOP_ON_HIDE, false);
    source.on_property_clicked(APPLY_BUTTON);

    assert_eq!(source.state(), SourceState::Running);
    assert!(!source.config().stop_on_hide);
    assert_consistent(&source, &backend);
}

#[test]
fn test_destroy_joins_worker() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(false), host.clone(), Arc::clone(&backend));
    let pipeline = backend.last_pipeline().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Playing);

    source.destroy();

    // The pipeline is dropped by the worker right before it exits.
    assert_eq!(pipeline.state(), PipelineState::Released);
    assert_eq!(backend.alive_pipelines(), 0);
    assert!(!pipeline.post(BusMessage::Eos));
    assert_eq!(host.clear_video_calls(), 1);
}

#[test]
fn test_malformed_description_shows_nothing() {
    let (host, backend) = fixture();
    let bad = settings(false);
    bad.lock().set_string(KEY_SOURCE_ELEMENT, "nosuchsrc");

    let source = VideoSource::create(&settings(false), host.clone(), Arc::clone(&backend));
    backend.last_pipeline().unwrap().push_frame(640, 480).unwrap();
    assert_eq!(source.width(), 640);

    host.set_showing(true);
    source.update(&bad);

    assert_eq!(source.state(), SourceState::Stopped);
    assert_eq!((source.width(), source.height()), (0, 0));
    let mut effect = HeadlessEffect::new();
    assert!(!source.render(&mut effect));
    assert!(effect.is_empty());
    assert_eq!(backend.alive_pipelines(), 0);
}

#[test]
fn test_runtime_error_keeps_last_frame_until_stop() {
    let (host, backend) = fixture();
    let source = VideoSource::create(&settings(true), host.clone(), Arc::clone(&backend));
    source.show();
    let pipeline = backend.last_pipeline().unwrap();
    pipeline.push_frame(320, 240).unwrap();
    let texture = source.session().texture().unwrap();

    pipeline.post(BusMessage::Error {
        message: "Internal data stream error.".into(),
        debug: Some("streaming stopped, reason not-linked".into()),
    });
    assert!(pipeline.wait_for_state(PipelineState::Halted));

    assert_eq!(source.state(), SourceState::Running);
    assert_eq!(source.session().texture(), Some(texture));
    assert_eq!(source.stats().pipeline_errors, 1);
    // Halted pipelines deliver nothing.
    assert!(pipeline.push_frame(320, 240).is_none());

    source.hide();
    assert_eq!(source.session().texture(), None);
    assert_eq!(host.live_textures(), 0);
}

#[test]
fn test_play_failure_keeps_worker_until_stop() {
    let (host, backend) = fixture();
    backend.fail_play(true);
    let source = VideoSource::create(&settings(false), host, Arc::clone(&backend));

    assert_eq!(source.state(), SourceState::Running);
    assert_eq!(source.stats().pipeline_errors, 1);
    assert_eq!(
        backend.last_pipeline().unwrap().state(),
        PipelineState::Halted
    );
    assert_consistent(&source, &backend);
}

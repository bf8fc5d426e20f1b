// src/driver/tests.rs

use super::*;
use crate::config::FailurePolicy;
use crate::display_link::TickControl;
use crate::surface::HeadlessSurface;
use crate::testing::{BackendCall, ManualTimerSource, RecordingBackend};
use std::time::{Duration, Instant};

fn manual_driver(config: &Config) -> (RenderLoopDriver, Arc<ManualTimerSource>) {
    let timers = Arc::new(ManualTimerSource::new());
    let driver = RenderLoopDriver::with_timer_source(config, timers.clone());
    (driver, timers)
}

#[test_log::test]
fn start_then_stop_without_ticks_leaks_nothing() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    assert!(handle.is_running());
    assert_eq!(timers.live_timers(), 1);
    assert_eq!(driver.active_loops(), 1);

    let stats = driver.stop(&mut handle).unwrap();
    assert_eq!(stats.frames, 0);
    assert_eq!(handle.state(), LoopState::Stopped);
    assert_eq!(timers.live_timers(), 0);
    assert_eq!(driver.active_loops(), 0);
    assert_eq!(probe.calls(), vec![BackendCall::Initialize]);
    assert_eq!(surface.presents(), 0);
}

#[test_log::test]
fn five_ticks_then_stop_scenario() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    for _ in 0..5 {
        assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Continue));
        let (updates, renders) = (probe.updates(), probe.renders());
        assert!(renders <= updates && updates <= renders + 1);
    }
    assert_eq!(probe.updates(), 5);
    assert_eq!(probe.renders(), 5);
    assert_eq!(surface.presents(), 5);

    driver.stop(&mut handle).unwrap();
    assert!(!handle.is_running());

    assert_eq!(timers.fire(handle.timer_id()), None);
    assert_eq!(probe.updates(), 5);
    assert_eq!(probe.renders(), 5);
}

#[test_log::test]
fn calls_are_strictly_interleaved_after_a_single_initialize() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    for _ in 0..3 {
        timers.fire(handle.timer_id());
    }
    driver.stop(&mut handle).unwrap();

    assert_eq!(
        probe.calls(),
        vec![
            BackendCall::Initialize,
            BackendCall::Update(0),
            BackendCall::Render,
            BackendCall::Update(1),
            BackendCall::Render,
            BackendCall::Update(2),
            BackendCall::Render,
        ]
    );
}

#[test_log::test]
fn stop_twice_is_an_invalid_transition() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, _probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    driver.stop(&mut handle).unwrap();
    let err = driver.stop(&mut handle).unwrap_err();
    assert!(err.is_invalid_transition(), "{}", err);
    assert_eq!(timers.live_timers(), 0);
    assert_eq!(timers.created_timers(), 1);
}

#[test_log::test]
fn stop_without_start_is_an_invalid_transition() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.create(&surface, backend);
    assert_eq!(handle.state(), LoopState::Created);
    let err = driver.stop(&mut handle).unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(handle.state(), LoopState::Created);
    assert_eq!(timers.created_timers(), 0);
    assert_eq!(probe.initializes(), 0);
}

#[test_log::test]
fn start_twice_and_restart_after_stop_are_rejected() {
    let (driver, _timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.create(&surface, backend);
    driver.start_handle(&mut handle).unwrap();
    assert!(driver.start_handle(&mut handle).unwrap_err().is_invalid_transition());

    driver.stop(&mut handle).unwrap();
    assert!(driver.start_handle(&mut handle).unwrap_err().is_invalid_transition());
    assert_eq!(probe.initializes(), 1);
}

#[test_log::test]
fn one_active_loop_per_surface() {
    let (driver, _timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (first, _) = RecordingBackend::new();
    let (second, second_probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, first).unwrap();
    assert_eq!(driver.active_for(surface.id()), Some(handle.timer_id()));

    let err = driver.start(&surface, second).unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(second_probe.initializes(), 0);

    driver.stop(&mut handle).unwrap();
    assert_eq!(driver.active_for(surface.id()), None);

    let (third, _) = RecordingBackend::new();
    let mut again = driver.start(&surface, third).unwrap();
    assert_ne!(again.timer_id(), handle.timer_id());
    driver.stop(&mut again).unwrap();
}

#[test_log::test]
fn missing_display_is_a_setup_failure_with_backend_left_idle() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::detached());
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.create(&surface, backend);
    let err = driver.start_handle(&mut handle).unwrap_err();
    assert!(matches!(err, LoopError::SetupFailure(_)), "{}", err);
    assert_eq!(handle.state(), LoopState::Stopped);
    assert_eq!(probe.calls(), vec![BackendCall::Initialize]);
    assert_eq!(timers.created_timers(), 0);
    assert_eq!(driver.active_loops(), 0);
}

#[test_log::test]
fn fallback_rate_is_used_when_configured() {
    let mut config = Config::default();
    config.timing.fallback_refresh_hz = Some(30.0);
    let (driver, timers) = manual_driver(&config);
    let surface = Arc::new(HeadlessSurface::detached());
    let (backend, _) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    assert_eq!(timers.requested_rates(), vec![30.0]);
    driver.stop(&mut handle).unwrap();
}

#[test_log::test]
fn refresh_rate_is_clamped() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(1000.0));
    let (backend, _) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    assert_eq!(timers.requested_rates(), vec![240.0]);
    driver.stop(&mut handle).unwrap();
}

#[test_log::test]
fn timer_creation_failure_is_a_setup_failure() {
    let (driver, timers) = manual_driver(&Config::default());
    timers.fail_create(true);
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let err = driver.start(&surface, backend).unwrap_err();
    assert!(matches!(err, LoopError::SetupFailure(_)));
    assert_eq!(probe.initializes(), 1);
    assert_eq!(driver.active_loops(), 0);
    assert_eq!(driver.active_for(surface.id()), None);
}

#[test_log::test]
fn timer_start_failure_unregisters_the_loop() {
    let (driver, timers) = manual_driver(&Config::default());
    timers.fail_start(true);
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.create(&surface, backend);
    let err = driver.start_handle(&mut handle).unwrap_err();
    assert!(matches!(err, LoopError::SetupFailure(_)));
    assert_eq!(handle.state(), LoopState::Stopped);
    assert_eq!(driver.active_loops(), 0);
    assert_eq!(timers.fire(handle.timer_id()), None);
    assert_eq!(probe.updates(), 0);
}

#[test_log::test]
fn initialize_failure_is_reported_before_any_timer_exists() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, _) = RecordingBackend::new();

    let err = driver
        .start(&surface, backend.failing_initialize())
        .unwrap_err();
    assert!(matches!(
        err,
        LoopError::BackendFailure {
            phase: FramePhase::Initialize,
            ..
        }
    ));
    assert_eq!(timers.created_timers(), 0);
}

#[test_log::test]
fn fail_fast_halts_and_stop_reports_the_fault() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver
        .start(&surface, backend.failing_update_at(1))
        .unwrap();
    assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Continue));
    assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Halt));
    assert!(handle.is_faulted());
    assert_eq!(timers.fire(handle.timer_id()), None);

    // The failing update is not followed by a render.
    assert_eq!(probe.updates(), 2);
    assert_eq!(probe.renders(), 1);

    let err = driver.stop(&mut handle).unwrap_err();
    assert!(matches!(
        err,
        LoopError::BackendFailure {
            phase: FramePhase::Update,
            frame: 1,
            ..
        }
    ));
    assert_eq!(handle.state(), LoopState::Stopped);
    assert_eq!(timers.live_timers(), 0);
}

#[test_log::test]
fn log_and_continue_keeps_ticking() {
    let mut config = Config::default();
    config.driver.failure_policy = FailurePolicy::LogAndContinue;
    let (driver, timers) = manual_driver(&config);
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver
        .start(&surface, backend.failing_render_at(0))
        .unwrap();
    for _ in 0..3 {
        assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Continue));
    }
    assert!(!handle.is_faulted());

    let stats = driver.stop(&mut handle).unwrap();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.failed_frames, 1);
    assert_eq!(probe.renders(), 3);
}

#[test_log::test]
fn dropped_surface_turns_ticks_into_no_ops() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    // The loop holds no strong reference to the surface.
    assert_eq!(Arc::strong_count(&surface), 1);
    drop(surface);

    assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Halt));
    assert_eq!(probe.updates(), 0);
    driver.stop(&mut handle).unwrap();
}

#[test_log::test]
fn resize_is_delivered_before_the_next_update() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    timers.fire(handle.timer_id());
    handle.notify_resize(640, 480);
    handle.notify_resize(800, 600);
    timers.fire(handle.timer_id());
    driver.stop(&mut handle).unwrap();
    handle.notify_resize(1, 1);

    assert_eq!(
        probe.calls(),
        vec![
            BackendCall::Initialize,
            BackendCall::Update(0),
            BackendCall::Render,
            BackendCall::Resize(800, 600),
            BackendCall::Update(1),
            BackendCall::Render,
        ]
    );
}

#[test_log::test]
fn stats_track_frame_intervals() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(50.0));
    let (backend, _) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    let t0 = Instant::now();
    for i in 0..4 {
        timers.fire_at(handle.timer_id(), t0 + Duration::from_millis(20 * i));
    }
    let running = handle.stats();
    assert_eq!(running.frames, 4);
    assert!((running.fps - 50.0).abs() < 1e-6, "fps {}", running.fps);

    let stopped = driver.stop(&mut handle).unwrap();
    assert_eq!(stopped.frames, 4);
}

#[test_log::test]
fn dropping_a_running_handle_stops_it() {
    let (driver, timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, _) = RecordingBackend::new();

    let handle = driver.start(&surface, backend).unwrap();
    let id = handle.timer_id();
    drop(handle);

    assert_eq!(driver.active_loops(), 0);
    assert_eq!(timers.live_timers(), 0);
    assert_eq!(timers.fire(id), None);
}

#[test_log::test]
fn loops_on_different_surfaces_are_independent() {
    let (driver, timers) = manual_driver(&Config::default());
    let a = Arc::new(HeadlessSurface::new(60.0));
    let b = Arc::new(HeadlessSurface::new(120.0));
    let (backend_a, probe_a) = RecordingBackend::new();
    let (backend_b, probe_b) = RecordingBackend::new();

    let mut handle_a = driver.start(&a, backend_a).unwrap();
    let mut handle_b = driver.start(&b, backend_b).unwrap();
    assert_eq!(timers.fire_all(), 2);
    timers.fire(handle_b.timer_id());

    driver.stop(&mut handle_a).unwrap();
    assert_eq!(timers.fire_all(), 1);
    driver.stop(&mut handle_b).unwrap();

    assert_eq!(probe_a.updates(), 1);
    assert_eq!(probe_b.updates(), 3);
    assert_eq!(a.presents(), 1);
    assert_eq!(b.presents(), 3);
}

#[test_log::test]
fn late_tick_after_stop_is_ignored_by_the_loop() {
    let (driver, _timers) = manual_driver(&Config::default());
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start(&surface, backend).unwrap();
    // What a clock thread that read the registry just before `stop` still holds.
    let entry = handle.entry.clone().unwrap();
    let registry = handle.registry.clone();
    driver.stop(&mut handle).unwrap();

    assert_eq!(entry.tick(Instant::now()), TickControl::Halt);
    assert_eq!(
        registry.dispatch(handle.timer_id(), Instant::now()),
        TickControl::Halt
    );
    assert_eq!(probe.calls(), vec![BackendCall::Initialize]);
    assert_eq!(surface.presents(), 0);
}

#[test_log::test]
fn frame_failing_in_several_phases_counts_once() {
    let mut config = Config::default();
    config.driver.failure_policy = FailurePolicy::LogAndContinue;
    let (driver, timers) = manual_driver(&config);
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, _) = RecordingBackend::new();

    let mut handle = driver
        .start(&surface, backend.failing_update_at(0).failing_render_at(0))
        .unwrap();
    assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Continue));
    assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Continue));

    let stats = driver.stop(&mut handle).unwrap();
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.failed_frames, 1);
}

#[test_log::test]
fn unusable_refresh_config_is_a_setup_failure() {
    let mut config = Config::default();
    config.timing.min_refresh_hz = 0.0;
    config.timing.fallback_refresh_hz = Some(0.0);
    let (driver, timers) = manual_driver(&config);
    let surface = Arc::new(HeadlessSurface::detached());
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.create(&surface, backend);
    let err = driver.start_handle(&mut handle).unwrap_err();
    assert!(matches!(err, LoopError::SetupFailure(_)), "{}", err);
    assert_eq!(handle.state(), LoopState::Stopped);
    assert_eq!(probe.initializes(), 0);
    assert_eq!(timers.created_timers(), 0);
}

#[test_log::test]
fn oversized_history_is_a_setup_failure() {
    let mut config = Config::default();
    config.driver.history_len = usize::MAX / 2;
    let (driver, timers) = manual_driver(&config);
    let surface = Arc::new(HeadlessSurface::new(60.0));
    let (backend, probe) = RecordingBackend::new();

    let err = driver.start(&surface, backend).unwrap_err();
    assert!(matches!(err, LoopError::SetupFailure(_)), "{}", err);
    assert_eq!(probe.initializes(), 0);
    assert_eq!(timers.created_timers(), 0);
    assert_eq!(driver.active_loops(), 0);
}

#[test_log::test]
fn trait_object_surface_can_be_driven() {
    let (driver, timers) = manual_driver(&Config::default());
    let headless = Arc::new(HeadlessSurface::new(60.0));
    let surface: Arc<dyn Surface> = headless.clone();
    let (backend, probe) = RecordingBackend::new();

    let mut handle = driver.start_dyn(&surface, backend).unwrap();
    assert_eq!(handle.surface_id(), headless.id());
    assert_eq!(timers.fire(handle.timer_id()), Some(TickControl::Continue));
    driver.stop(&mut handle).unwrap();

    assert_eq!(probe.updates(), 1);
    assert_eq!(headless.presents(), 1);
}

use clrbridge_host::testing::{RecordingBackend, ScriptedStartError};
use clrbridge_host::{
    Handle, HostError, HostSession, SessionState, StartOptions, ENGINE_LIBRARY_FILE,
    LIST_DELIMITER,
};
use tempfile::TempDir;

/// Application directory with a bundled engine library and one code unit.
fn engine_fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(ENGINE_LIBRARY_FILE), b"").unwrap();
    std::fs::write(dir.path().join("App.dll"), b"").unwrap();
    dir
}

fn options_for(dir: &TempDir) -> StartOptions {
    StartOptions {
        app_base_dir: dir.path().to_path_buf(),
        package_bin_dir: None,
        // Point the shared-install probe nowhere so the machine's real
        // runtime can never leak into a test.
        engine_install_dir: Some(dir.path().join("no-shared-install")),
    }
}

fn assert_not_started<T: std::fmt::Debug>(result: Result<T, HostError>) {
    assert!(matches!(result.unwrap_err(), HostError::HostNotStarted));
}

#[test_log::test]
fn test_start_run_shutdown_cycle() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();

    assert_eq!(session.state(), SessionState::Unstarted);
    session.start(&options_for(&fixture)).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert!(session.is_ready());

    session.load_code_unit("App.dll").unwrap();
    assert_eq!(probe.loads(), vec!["App.dll".to_owned()]);

    session.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::ShutDown);
    assert_eq!(probe.shutdowns(), 1);

    // The session is re-enterable after shutdown.
    session.start(&options_for(&fixture)).unwrap();
    assert!(session.is_ready());
    assert_eq!(probe.starts(), 2);
}

#[test_log::test]
fn test_calls_before_start_never_touch_the_engine() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let h = Handle::from_raw(7);

    assert_not_started(session.load_code_unit("App.dll"));
    assert_not_started(session.call_static_method("T", "M", &[]));
    assert_not_started(session.get_static_property("T", "P"));
    assert_not_started(session.set_static_property("T", "P", &[h]));
    assert_not_started(session.create_object("T", &[]));
    assert_not_started(session.release_object(h));
    assert_not_started(session.call_method(h, "M", &[]));
    assert_not_started(session.get_property(h, "P"));
    assert_not_started(session.set_property(h, "P", &[h]));
    assert_not_started(session.shutdown());

    assert_eq!(probe.engine_calls(), 0);
    assert_eq!(probe.starts(), 0);
    assert_eq!(probe.shutdowns(), 0);
}

#[test_log::test]
fn test_calls_after_shutdown_are_rejected() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();
    session.shutdown().unwrap();

    let calls_before = probe.engine_calls();
    assert_not_started(session.load_code_unit("App.dll"));
    assert_not_started(session.call_static_method("T", "M", &[]));
    assert_eq!(probe.engine_calls(), calls_before);

    // A second shutdown is rejected the same way.
    assert_not_started(session.shutdown());
    assert_eq!(probe.shutdowns(), 1);
}

#[test_log::test]
fn test_start_while_running_shuts_down_first() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();

    session.start(&options_for(&fixture)).unwrap();
    assert_eq!(probe.shutdowns(), 0);
    session.start(&options_for(&fixture)).unwrap();
    assert_eq!(probe.shutdowns(), 1);
    assert_eq!(probe.starts(), 2);
    assert!(session.is_ready());
}

#[test_log::test]
fn test_restart_rebuilds_dispatch_surface() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();

    session.start(&options_for(&fixture)).unwrap();
    let first = probe.dispatch_stamp().unwrap();

    session.shutdown().unwrap();
    assert_eq!(probe.dispatch_stamp(), None);

    session.start(&options_for(&fixture)).unwrap();
    let second = probe.dispatch_stamp().unwrap();
    assert_ne!(first.generation, second.generation);
}

#[test_log::test]
fn test_start_request_carries_trusted_list() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    let pkg = tempfile::tempdir().unwrap();
    std::fs::write(pkg.path().join("pkg.dll"), b"").unwrap();

    let mut options = options_for(&fixture);
    options.package_bin_dir = Some(pkg.path().to_path_buf());
    session.start(&options).unwrap();

    let request = probe.requests().pop().unwrap();
    assert!(request.app_base_dir.is_absolute());
    assert!(request.engine_library.ends_with(ENGINE_LIBRARY_FILE));
    assert!(request.trusted_list.contains(LIST_DELIMITER));
    // Package-private units precede application units.
    let pkg_pos = request.trusted_list.find("pkg.dll").unwrap();
    let app_pos = request.trusted_list.find("App.dll").unwrap();
    assert!(pkg_pos < app_pos);
}

#[test_log::test]
fn test_locate_failure_is_recoverable() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let empty = tempfile::tempdir().unwrap();
    let mut options = StartOptions::new(empty.path());
    options.engine_install_dir = Some(empty.path().join("nowhere"));

    let err = session.start(&options).unwrap_err();
    assert!(matches!(err, HostError::EngineNotFound { .. }));
    assert!(err.is_recoverable());
    assert_eq!(session.state(), SessionState::Unstarted);
    assert_eq!(probe.starts(), 0);

    // The same session starts fine once an engine exists.
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();
    assert!(session.is_ready());
}

#[test_log::test]
fn test_delegate_failure_leaves_running_but_closed() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();

    probe.fail_start(ScriptedStartError::DelegateResolution {
        status: -2146233054,
    });
    let err = session.start(&options_for(&fixture)).unwrap_err();
    assert!(matches!(err, HostError::DelegateResolutionFailure { .. }));
    assert_eq!(session.state(), SessionState::Running);
    assert!(!session.is_ready());
    assert_not_started(session.load_code_unit("App.dll"));

    // The initialized runtime still unwinds on shutdown.
    session.shutdown().unwrap();
    assert_eq!(probe.shutdowns(), 1);

    // A clean start afterwards is fully usable.
    session.start(&options_for(&fixture)).unwrap();
    assert!(session.is_ready());
}

#[test_log::test]
fn test_initialization_failure_leaves_session_down() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();

    probe.fail_start(ScriptedStartError::Initialization { status: -88 });
    let err = session.start(&options_for(&fixture)).unwrap_err();
    assert!(matches!(
        err,
        HostError::EngineInitializationFailure { status: -88 }
    ));
    assert_eq!(session.state(), SessionState::Unstarted);
    assert_not_started(session.shutdown());
}

#[test_log::test]
fn test_failed_call_carries_engine_message() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    session.call_static_method("Lib.Math", "Add", &[]).unwrap();
    // The error channel is never consulted for successful calls.
    assert_eq!(probe.error_reads(), 0);

    probe.fail_next_call("System.MissingMethodException: no method 'Frobnicate'");
    let err = session
        .call_static_method("Lib.Math", "Frobnicate", &[])
        .unwrap_err();
    match err {
        HostError::EngineCallFailure { message } => {
            assert!(message.contains("MissingMethodException"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(probe.error_reads(), 1);
}

#[test_log::test]
fn test_error_message_stays_until_the_next_call() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    probe.fail_next_call("System.InvalidCastException: handle is not a Counter");
    let err = session
        .call_method(Handle::from_raw(0x100), "Next", &[])
        .unwrap_err();
    assert!(matches!(err, HostError::EngineCallFailure { .. }));

    // The failure already carried the message, yet the channel keeps
    // serving it until another call overwrites it.
    assert!(session.last_error().contains("InvalidCastException"));
    assert!(session.last_error().contains("InvalidCastException"));

    session
        .call_method(Handle::from_raw(0x100), "Next", &[])
        .unwrap();
    assert_eq!(session.last_error(), "");
}

#[test_log::test]
fn test_result_arrays_come_back_in_order() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let scripted = vec![
        Handle::from_raw(10),
        Handle::from_raw(20),
        Handle::from_raw(30),
    ];
    probe.queue_results(scripted.clone());
    let results = session
        .call_static_method(
            "Lib.Math",
            "DivMod",
            &[Handle::from_raw(7), Handle::from_raw(2)],
        )
        .unwrap();
    assert_eq!(results, scripted);

    probe.queue_value(Handle::from_raw(99));
    let value = session.get_static_property("Lib.Math", "Seed").unwrap();
    assert_eq!(value, Handle::from_raw(99));
}

#[test_log::test]
fn test_setters_require_a_value_handle() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let before = probe.engine_calls();
    let err = session.set_static_property("T", "P", &[]).unwrap_err();
    assert!(matches!(err, HostError::RequestShapeError { .. }));
    let err = session
        .set_property(Handle::from_raw(0x100), "P", &[])
        .unwrap_err();
    assert!(matches!(err, HostError::RequestShapeError { .. }));
    assert_eq!(probe.engine_calls(), before);

    // With a value present, slot 0 reaches the engine.
    session
        .set_static_property("T", "P", &[Handle::from_raw(42)])
        .unwrap();
    assert_eq!(probe.engine_calls(), before + 1);
}

#[test_log::test]
fn test_dropped_wrapper_releases_its_handle() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let object = session.create_object("Lib.Counter", &[]).unwrap();
    let handle = object.handle();
    assert!(!handle.is_null());
    assert!(probe.released().is_empty());

    drop(object);
    assert_eq!(probe.released(), vec![handle]);
}

#[test_log::test]
fn test_into_raw_escapes_release_tracking() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let object = session.create_object("Lib.Counter", &[]).unwrap();
    let raw = object.into_raw();
    assert!(probe.released().is_empty());

    // The caller releases explicitly instead.
    session.release_object(raw).unwrap();
    assert_eq!(probe.released(), vec![raw]);
}

#[test_log::test]
fn test_wrapper_dropped_after_shutdown_is_inert() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let object = session.create_object("Lib.Counter", &[]).unwrap();
    session.shutdown().unwrap();

    drop(object);
    assert!(probe.released().is_empty());
}

#[test_log::test]
fn test_release_failure_is_absorbed() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let object = session.create_object("Lib.Counter", &[]).unwrap();
    probe.fail_next_call("System.ObjectDisposedException: already gone");
    drop(object);

    assert_eq!(probe.released().len(), 1);
    assert_eq!(probe.error_reads(), 1);
    // The session stays usable afterwards.
    session.call_static_method("T", "M", &[]).unwrap();
}

#[test_log::test]
fn test_null_handles_are_not_tracked() {
    let (backend, probe) = RecordingBackend::new();
    let mut session = HostSession::new(backend);
    let fixture = engine_fixture();
    session.start(&options_for(&fixture)).unwrap();

    let wrapper = session.track_object(Handle::NULL);
    drop(wrapper);
    assert!(probe.released().is_empty());

    // Releasing a null handle explicitly is a quiet no-op as well.
    session.release_object(Handle::NULL).unwrap();
    assert!(probe.released().is_empty());
}

#[test_log::test]
fn test_dropping_running_session_shuts_the_engine_down() {
    let (backend, probe) = RecordingBackend::new();
    let fixture = engine_fixture();
    {
        let mut session = HostSession::new(backend);
        session.start(&options_for(&fixture)).unwrap();
    }
    assert_eq!(probe.shutdowns(), 1);
}

use std::sync::Mutex;

use clrbridge_core::{Handle, HostError, SessionState};

use crate::backend::ClrBackend;
use crate::release::ObjectRef;
use crate::session::{HostSession, StartOptions};

/// Process-wide session behind the free-function entry points.
///
/// The engine runtime is one-per-process; binding layers that talk to the
/// bridge through a flat call surface share this session. Embedders that
/// want to manage the lifecycle themselves use [`HostSession`] directly.
static DEFAULT_SESSION: Mutex<Option<HostSession<ClrBackend>>> = Mutex::new(None);

fn with_default<T>(f: impl FnOnce(&mut HostSession<ClrBackend>) -> T) -> T {
    let mut guard = DEFAULT_SESSION.lock().unwrap();
    let session = guard.get_or_insert_with(|| HostSession::new(ClrBackend::new()));
    f(session)
}

/// Start (or restart) the process-wide engine session.
pub fn start(options: &StartOptions) -> Result<(), HostError> {
    with_default(|session| session.start(options))
}

/// Shut down the process-wide engine session.
pub fn shutdown() -> Result<(), HostError> {
    with_default(|session| session.shutdown())
}

pub fn session_state() -> SessionState {
    with_default(|session| session.state())
}

pub fn load_code_unit(path: &str) -> Result<(), HostError> {
    with_default(|session| session.load_code_unit(path))
}

pub fn call_static_method(
    type_name: &str,
    method_name: &str,
    args: &[Handle],
) -> Result<Vec<Handle>, HostError> {
    with_default(|session| session.call_static_method(type_name, method_name, args))
}

pub fn get_static_property(type_name: &str, property_name: &str) -> Result<Handle, HostError> {
    with_default(|session| session.get_static_property(type_name, property_name))
}

pub fn set_static_property(
    type_name: &str,
    property_name: &str,
    args: &[Handle],
) -> Result<(), HostError> {
    with_default(|session| session.set_static_property(type_name, property_name, args))
}

pub fn create_object(type_name: &str, args: &[Handle]) -> Result<ObjectRef, HostError> {
    with_default(|session| session.create_object(type_name, args))
}

pub fn release_object(handle: Handle) -> Result<(), HostError> {
    with_default(|session| session.release_object(handle))
}

pub fn call_method(
    object: Handle,
    method_name: &str,
    args: &[Handle],
) -> Result<Vec<Handle>, HostError> {
    with_default(|session| session.call_method(object, method_name, args))
}

pub fn get_property(object: Handle, property_name: &str) -> Result<Handle, HostError> {
    with_default(|session| session.get_property(object, property_name))
}

pub fn set_property(object: Handle, property_name: &str, args: &[Handle]) -> Result<(), HostError> {
    with_default(|session| session.set_property(object, property_name, args))
}

/// Message recorded for the most recent failed call on the process-wide
/// session, empty when there is none.
pub fn last_error() -> String {
    with_default(|session| session.last_error())
}

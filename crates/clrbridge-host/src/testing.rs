//! Test doubles for exercising the session layer without an engine.
//!
//! [`RecordingBackend`] implements [`EngineBackend`] over an in-memory
//! script: every operation is recorded, results and failures can be
//! queued ahead of time, and the paired [`BackendProbe`] shares the same
//! state so a test can keep asserting after the backend has moved into a
//! session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use clrbridge_core::{Handle, HostError};

use crate::backend::{CallFailed, EngineBackend, StartRequest};

/// Start-failure kinds a test can script for the next start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedStartError {
    LibraryLoad,
    Initialization { status: i32 },
    DelegateResolution { status: i32 },
}

/// Stand-in for one dispatch-table incarnation. A fresh stamp replaces
/// the previous one on every successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStamp {
    /// Ordinal of the start that produced this table.
    pub generation: u32,
}

#[derive(Debug, Default)]
struct State {
    starts: u32,
    shutdowns: u32,
    requests: Vec<StartRequest>,
    ops: Vec<String>,
    loads: Vec<String>,
    released: Vec<Handle>,
    table: Option<DispatchStamp>,
    next_object: i64,
    queued_results: VecDeque<Vec<Handle>>,
    queued_values: VecDeque<Handle>,
    fail_start: Option<ScriptedStartError>,
    fail_next_call: Option<String>,
    last_error: String,
    error_reads: u32,
}

/// Scripted in-memory engine backend.
pub struct RecordingBackend {
    state: Arc<Mutex<State>>,
}

/// Shared view into a [`RecordingBackend`] that stays with the test.
#[derive(Clone)]
pub struct BackendProbe {
    state: Arc<Mutex<State>>,
}

impl RecordingBackend {
    pub fn new() -> (RecordingBackend, BackendProbe) {
        let state = Arc::new(Mutex::new(State {
            next_object: 0x100,
            ..Default::default()
        }));
        (
            RecordingBackend {
                state: Arc::clone(&state),
            },
            BackendProbe { state },
        )
    }
}

// Every operation rewrites the error channel: a scripted failure leaves
// its message on it, anything else clears it.
fn fail_if_scripted(s: &mut State) -> Result<(), CallFailed> {
    if let Some(message) = s.fail_next_call.take() {
        s.last_error = message;
        Err(CallFailed)
    } else {
        s.last_error.clear();
        Ok(())
    }
}

impl EngineBackend for RecordingBackend {
    fn start(&mut self, request: &StartRequest) -> Result<(), HostError> {
        let mut s = self.state.lock().unwrap();
        s.starts += 1;
        s.requests.push(request.clone());
        s.table = None;
        match s.fail_start.take() {
            Some(ScriptedStartError::LibraryLoad) => Err(HostError::LibraryLoadFailure {
                path: request.engine_library.clone(),
                reason: "scripted load failure".to_owned(),
            }),
            Some(ScriptedStartError::Initialization { status }) => {
                Err(HostError::EngineInitializationFailure { status })
            }
            Some(ScriptedStartError::DelegateResolution { status }) => {
                Err(HostError::DelegateResolutionFailure {
                    entry_point: "CallStaticMethod",
                    status,
                })
            }
            None => {
                s.table = Some(DispatchStamp {
                    generation: s.starts,
                });
                Ok(())
            }
        }
    }

    fn shutdown(&mut self) {
        let mut s = self.state.lock().unwrap();
        s.shutdowns += 1;
        s.table = None;
        s.last_error.clear();
    }

    fn load_code_unit(&mut self, path: &str) -> Result<(), CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push("load".to_owned());
        s.loads.push(path.to_owned());
        fail_if_scripted(&mut s)
    }

    fn call_static_method(
        &mut self,
        type_name: &str,
        method_name: &str,
        _args: &[Handle],
    ) -> Result<Vec<Handle>, CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("call_static {type_name}.{method_name}"));
        fail_if_scripted(&mut s)?;
        Ok(s
            .queued_results
            .pop_front()
            .unwrap_or_else(|| vec![Handle::NULL]))
    }

    fn get_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
    ) -> Result<Handle, CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("get_static {type_name}.{property_name}"));
        fail_if_scripted(&mut s)?;
        Ok(s.queued_values.pop_front().unwrap_or(Handle::NULL))
    }

    fn set_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
        _value: Handle,
    ) -> Result<(), CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("set_static {type_name}.{property_name}"));
        fail_if_scripted(&mut s)
    }

    fn create_object(&mut self, type_name: &str, _args: &[Handle]) -> Result<Handle, CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("create {type_name}"));
        fail_if_scripted(&mut s)?;
        let handle = Handle::from_raw(s.next_object);
        s.next_object += 1;
        Ok(handle)
    }

    fn release_object(&mut self, object: Handle) -> Result<(), CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push("release".to_owned());
        s.released.push(object);
        fail_if_scripted(&mut s)
    }

    fn call_method(
        &mut self,
        _object: Handle,
        method_name: &str,
        _args: &[Handle],
    ) -> Result<Vec<Handle>, CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("call {method_name}"));
        fail_if_scripted(&mut s)?;
        Ok(s
            .queued_results
            .pop_front()
            .unwrap_or_else(|| vec![Handle::NULL]))
    }

    fn get_property(
        &mut self,
        _object: Handle,
        property_name: &str,
    ) -> Result<Handle, CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("get {property_name}"));
        fail_if_scripted(&mut s)?;
        Ok(s.queued_values.pop_front().unwrap_or(Handle::NULL))
    }

    fn set_property(
        &mut self,
        _object: Handle,
        property_name: &str,
        _value: Handle,
    ) -> Result<(), CallFailed> {
        let mut s = self.state.lock().unwrap();
        s.ops.push(format!("set {property_name}"));
        fail_if_scripted(&mut s)
    }

    fn last_error(&mut self) -> String {
        let mut s = self.state.lock().unwrap();
        s.error_reads += 1;
        s.last_error.clone()
    }
}

impl BackendProbe {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Number of starts the backend has seen, failed ones included.
    pub fn starts(&self) -> u32 {
        self.state().starts
    }

    pub fn shutdowns(&self) -> u32 {
        self.state().shutdowns
    }

    /// Every call-shaped operation that reached the backend, in order.
    pub fn ops(&self) -> Vec<String> {
        self.state().ops.clone()
    }

    pub fn engine_calls(&self) -> usize {
        self.state().ops.len()
    }

    pub fn loads(&self) -> Vec<String> {
        self.state().loads.clone()
    }

    pub fn released(&self) -> Vec<Handle> {
        self.state().released.clone()
    }

    pub fn requests(&self) -> Vec<StartRequest> {
        self.state().requests.clone()
    }

    /// The current dispatch-table stand-in, if a table is resolved.
    pub fn dispatch_stamp(&self) -> Option<DispatchStamp> {
        self.state().table
    }

    /// How many times the error channel has been read.
    pub fn error_reads(&self) -> u32 {
        self.state().error_reads
    }

    /// Queue the result array for the next method call.
    pub fn queue_results(&self, results: Vec<Handle>) {
        self.state().queued_results.push_back(results);
    }

    /// Queue the value for the next property get.
    pub fn queue_value(&self, value: Handle) {
        self.state().queued_values.push_back(value);
    }

    /// Make the next start fail the scripted way.
    pub fn fail_start(&self, kind: ScriptedStartError) {
        self.state().fail_start = Some(kind);
    }

    /// Make the next call-shaped operation fail with `message` on the
    /// error channel.
    pub fn fail_next_call(&self, message: &str) {
        self.state().fail_next_call = Some(message.to_owned());
    }
}

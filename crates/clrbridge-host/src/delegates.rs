use std::os::raw::c_void;

use clrbridge_core::HostError;

use crate::ffi::{
    CallMethodFn, CallStaticMethodFn, CreateObjectFn, GetLastErrorFn, GetPropertyFn,
    GetStaticPropertyFn, LoadCodeUnitFn, ReleaseObjectFn, SetPropertyFn, SetStaticPropertyFn,
};
use crate::library::EngineLibrary;

/// Name of the managed dispatch assembly baked into the host.
pub const DISPATCH_ASSEMBLY: &str = "ClrBridge";
/// Fully qualified managed type exposing the bridge entry points.
pub const DISPATCH_TYPE: &str = "ClrBridge.Dispatcher";

/// Resolved managed entry points.
///
/// A table is only valid for the engine instance that produced it; it is
/// built from scratch on every start and discarded at shutdown.
#[derive(Clone, Copy)]
pub(crate) struct DelegateTable {
    pub(crate) load_code_unit: LoadCodeUnitFn,
    pub(crate) call_static_method: CallStaticMethodFn,
    pub(crate) get_static_property: GetStaticPropertyFn,
    pub(crate) set_static_property: SetStaticPropertyFn,
    pub(crate) create_object: CreateObjectFn,
    pub(crate) release_object: ReleaseObjectFn,
    pub(crate) call_method: CallMethodFn,
    pub(crate) get_property: GetPropertyFn,
    pub(crate) set_property: SetPropertyFn,
    pub(crate) last_error: GetLastErrorFn,
}

/// Resolve the full dispatch table against a running engine.
///
/// # Errors
///
/// [`HostError::DelegateResolutionFailure`] naming the first entry point
/// that failed to resolve; the remaining entries are not attempted.
pub(crate) fn resolve_table(
    lib: &EngineLibrary,
    host_handle: *mut c_void,
    domain_id: u32,
) -> Result<DelegateTable, HostError> {
    Ok(DelegateTable {
        load_code_unit: resolve(lib, host_handle, domain_id, "LoadAssembly")?,
        call_static_method: resolve(lib, host_handle, domain_id, "CallStaticMethod")?,
        get_static_property: resolve(lib, host_handle, domain_id, "GetStaticProperty")?,
        set_static_property: resolve(lib, host_handle, domain_id, "SetStaticProperty")?,
        create_object: resolve(lib, host_handle, domain_id, "CreateObject")?,
        release_object: resolve(lib, host_handle, domain_id, "ReleaseObject")?,
        call_method: resolve(lib, host_handle, domain_id, "CallMethod")?,
        get_property: resolve(lib, host_handle, domain_id, "GetProperty")?,
        set_property: resolve(lib, host_handle, domain_id, "SetProperty")?,
        last_error: resolve(lib, host_handle, domain_id, "GetLastError")?,
    })
}

fn resolve<F: Copy>(
    lib: &EngineLibrary,
    host_handle: *mut c_void,
    domain_id: u32,
    entry_point: &'static str,
) -> Result<F, HostError> {
    let raw = lib
        .create_delegate(
            host_handle,
            domain_id,
            DISPATCH_ASSEMBLY,
            DISPATCH_TYPE,
            entry_point,
        )
        .map_err(|status| HostError::DelegateResolutionFailure {
            entry_point,
            status,
        })?;
    tracing::debug!(entry_point, "managed delegate resolved");
    // Every table field is a thin function pointer with the same width as
    // the raw delegate pointer.
    Ok(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&raw) })
}

//! Raw types of the engine's hosting interface.
//!
//! The bootstrap entry points use the stdcall convention on 32-bit Windows
//! and the C convention everywhere else; `extern "system"` selects exactly
//! that split, and the managed entry points are marshaled the same way.

use std::os::raw::{c_char, c_int, c_uint, c_void};

/// Property key naming the code units the engine may load without
/// verification. The value is a delimiter-joined path list.
pub const TRUSTED_ASSEMBLIES_KEY: &str = "TRUSTED_PLATFORM_ASSEMBLIES";

/// Symbol names of the bootstrap entry points exported by the engine
/// library.
pub const SYM_INITIALIZE: &str = "coreclr_initialize";
pub const SYM_CREATE_DELEGATE: &str = "coreclr_create_delegate";
pub const SYM_SHUTDOWN: &str = "coreclr_shutdown";

pub type EngineInitializeFn = unsafe extern "system" fn(
    exe_path: *const c_char,
    app_domain_friendly_name: *const c_char,
    property_count: c_int,
    property_keys: *const *const c_char,
    property_values: *const *const c_char,
    host_handle: *mut *mut c_void,
    domain_id: *mut c_uint,
) -> i32;

pub type EngineShutdownFn =
    unsafe extern "system" fn(host_handle: *mut c_void, domain_id: c_uint) -> i32;

pub type EngineCreateDelegateFn = unsafe extern "system" fn(
    host_handle: *mut c_void,
    domain_id: c_uint,
    assembly_name: *const c_char,
    type_name: *const c_char,
    method_name: *const c_char,
    delegate: *mut *mut c_void,
) -> i32;

// Managed entry points. Success flags marshal as 4-byte booleans, so they
// arrive as i32 and any non-zero value means success.

pub type LoadCodeUnitFn = unsafe extern "system" fn(path: *const c_char) -> i32;

pub type CallStaticMethodFn = unsafe extern "system" fn(
    type_name: *const c_char,
    method_name: *const c_char,
    args: *const i64,
    arg_count: i32,
    results: *mut *mut i64,
    result_count: *mut i32,
) -> i32;

pub type GetStaticPropertyFn = unsafe extern "system" fn(
    type_name: *const c_char,
    property_name: *const c_char,
    value: *mut i64,
) -> i32;

pub type SetStaticPropertyFn = unsafe extern "system" fn(
    type_name: *const c_char,
    property_name: *const c_char,
    value: i64,
) -> i32;

pub type CreateObjectFn = unsafe extern "system" fn(
    type_name: *const c_char,
    args: *const i64,
    arg_count: i32,
    object: *mut i64,
) -> i32;

pub type ReleaseObjectFn = unsafe extern "system" fn(object: i64) -> i32;

pub type CallMethodFn = unsafe extern "system" fn(
    object: i64,
    method_name: *const c_char,
    args: *const i64,
    arg_count: i32,
    results: *mut *mut i64,
    result_count: *mut i32,
) -> i32;

pub type GetPropertyFn = unsafe extern "system" fn(
    object: i64,
    property_name: *const c_char,
    value: *mut i64,
) -> i32;

pub type SetPropertyFn =
    unsafe extern "system" fn(object: i64, property_name: *const c_char, value: i64) -> i32;

/// The last-error entry point returns a pointer into a buffer owned by the
/// managed side; it stays valid until the next engine call.
pub type GetLastErrorFn = unsafe extern "system" fn() -> *const c_char;

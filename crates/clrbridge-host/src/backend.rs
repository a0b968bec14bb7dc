use std::ffi::{CStr, CString};
use std::path::PathBuf;
use std::ptr;

use clrbridge_core::{Handle, HostError};

use crate::delegates::{resolve_table, DelegateTable};
use crate::ffi::TRUSTED_ASSEMBLIES_KEY;
use crate::library::EngineLibrary;

/// Host identity passed to the engine as the domain friendly name.
pub const HOST_IDENTITY: &str = "clrbridge";

/// Marker for an engine-reported call failure. Carries no message; the
/// caller follows up with [`EngineBackend::last_error`] for the details
/// the engine recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFailed;

/// Fully resolved inputs for a backend start.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Application base directory, absolute.
    pub app_base_dir: PathBuf,
    /// Path of the engine's native library.
    pub engine_library: PathBuf,
    /// Delimiter-joined trusted code-unit list.
    pub trusted_list: String,
}

/// Seam between the session layer and an engine runtime.
///
/// One implementor drives the real engine through its dispatch table; the
/// recorder in [`crate::testing`] stands in for it in tests. Call-shaped
/// operations report failure as a bare [`CallFailed`] and leave the
/// message on the error channel.
pub trait EngineBackend {
    /// Bring an engine up according to `request`.
    ///
    /// # Errors
    ///
    /// [`HostError::LibraryLoadFailure`] or
    /// [`HostError::BootstrapEntryPointMissing`] when the native library is
    /// unusable, [`HostError::EngineInitializationFailure`] when the
    /// runtime rejects initialization, and
    /// [`HostError::DelegateResolutionFailure`] when an entry point cannot
    /// be resolved. After the last of these the runtime stays initialized
    /// and must still be shut down.
    fn start(&mut self, request: &StartRequest) -> Result<(), HostError>;

    /// Stop the engine and unload its library. Infallible by contract:
    /// problems along the way are logged, never returned.
    fn shutdown(&mut self);

    fn load_code_unit(&mut self, path: &str) -> Result<(), CallFailed>;

    fn call_static_method(
        &mut self,
        type_name: &str,
        method_name: &str,
        args: &[Handle],
    ) -> Result<Vec<Handle>, CallFailed>;

    fn get_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
    ) -> Result<Handle, CallFailed>;

    fn set_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
        value: Handle,
    ) -> Result<(), CallFailed>;

    fn create_object(&mut self, type_name: &str, args: &[Handle]) -> Result<Handle, CallFailed>;

    fn release_object(&mut self, object: Handle) -> Result<(), CallFailed>;

    fn call_method(
        &mut self,
        object: Handle,
        method_name: &str,
        args: &[Handle],
    ) -> Result<Vec<Handle>, CallFailed>;

    fn get_property(&mut self, object: Handle, property_name: &str)
        -> Result<Handle, CallFailed>;

    fn set_property(
        &mut self,
        object: Handle,
        property_name: &str,
        value: Handle,
    ) -> Result<(), CallFailed>;

    /// Message recorded for the most recent failure, or an empty string
    /// when there is none. Reads do not consume the message; it stays on
    /// the channel until the next operation replaces it.
    fn last_error(&mut self) -> String;
}

/// Production backend driving the CoreCLR runtime.
pub struct ClrBackend {
    engine: Option<LiveEngine>,
    // Failures raised on the host side of the boundary stage their message
    // here so last_error() serves them like engine-recorded ones. Like the
    // engine's own buffer, it is rewritten per operation, not consumed by
    // reads.
    staged_error: Option<String>,
}

struct LiveEngine {
    library: EngineLibrary,
    host_handle: *mut std::os::raw::c_void,
    domain_id: u32,
    // None after a start that initialized the runtime but failed to
    // resolve the dispatch table.
    delegates: Option<DelegateTable>,
}

// The engine handle and delegate pointers are process-global tokens, not
// thread-affine state; the session serializes all access behind a mutex.
unsafe impl Send for ClrBackend {}

impl ClrBackend {
    pub fn new() -> ClrBackend {
        ClrBackend {
            engine: None,
            staged_error: None,
        }
    }

    fn table(&mut self) -> Result<DelegateTable, CallFailed> {
        self.staged_error = None;
        match self.engine.as_ref().and_then(|live| live.delegates) {
            Some(table) => Ok(table),
            None => {
                self.staged_error =
                    Some("engine backend has no resolved dispatch table".to_owned());
                Err(CallFailed)
            }
        }
    }

    fn cstr(&mut self, value: &str) -> Result<CString, CallFailed> {
        self.staged_error = None;
        CString::new(value).map_err(|_| {
            self.staged_error = Some(format!(
                "argument contains an interior nul byte: {value:?}"
            ));
            CallFailed
        })
    }
}

impl Default for ClrBackend {
    fn default() -> ClrBackend {
        ClrBackend::new()
    }
}

impl EngineBackend for ClrBackend {
    fn start(&mut self, request: &StartRequest) -> Result<(), HostError> {
        if self.engine.is_some() {
            // A live instance here means the caller skipped shutdown.
            self.shutdown();
        }
        let library = EngineLibrary::load(&request.engine_library)?;
        let (host_handle, domain_id) = library.initialize(
            &request.app_base_dir,
            HOST_IDENTITY,
            &[(TRUSTED_ASSEMBLIES_KEY, request.trusted_list.as_str())],
        )?;
        tracing::info!(
            engine = %library.path().display(),
            domain_id,
            "engine runtime initialized"
        );
        let mut live = LiveEngine {
            library,
            host_handle,
            domain_id,
            delegates: None,
        };
        match resolve_table(&live.library, live.host_handle, live.domain_id) {
            Ok(table) => {
                live.delegates = Some(table);
                self.engine = Some(live);
                Ok(())
            }
            Err(err) => {
                // The runtime is up but unusable; keep it so a later
                // shutdown can still unwind it.
                self.engine = Some(live);
                Err(err)
            }
        }
    }

    fn shutdown(&mut self) {
        let Some(live) = self.engine.take() else {
            return;
        };
        let LiveEngine {
            library,
            host_handle,
            domain_id,
            delegates: _,
        } = live;
        let status = library.shutdown(host_handle, domain_id);
        if status < 0 {
            tracing::error!("engine shutdown failed - status: {status:#010x}");
        } else {
            tracing::info!("engine runtime shut down");
        }
        if let Err(e) = library.unload() {
            tracing::error!("failed to unload engine library: {e}");
        }
        self.staged_error = None;
    }

    fn load_code_unit(&mut self, path: &str) -> Result<(), CallFailed> {
        let path = self.cstr(path)?;
        let table = self.table()?;
        let ok = unsafe { (table.load_code_unit)(path.as_ptr()) };
        if ok != 0 {
            Ok(())
        } else {
            Err(CallFailed)
        }
    }

    fn call_static_method(
        &mut self,
        type_name: &str,
        method_name: &str,
        args: &[Handle],
    ) -> Result<Vec<Handle>, CallFailed> {
        let type_name = self.cstr(type_name)?;
        let method_name = self.cstr(method_name)?;
        let table = self.table()?;
        let mut results: *mut i64 = ptr::null_mut();
        let mut count: i32 = 0;
        let ok = unsafe {
            (table.call_static_method)(
                type_name.as_ptr(),
                method_name.as_ptr(),
                arg_ptr(args),
                args.len() as i32,
                &mut results,
                &mut count,
            )
        };
        if ok != 0 {
            Ok(unsafe { copy_results(results, count) })
        } else {
            Err(CallFailed)
        }
    }

    fn get_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
    ) -> Result<Handle, CallFailed> {
        let type_name = self.cstr(type_name)?;
        let property_name = self.cstr(property_name)?;
        let table = self.table()?;
        let mut value: i64 = 0;
        let ok = unsafe {
            (table.get_static_property)(type_name.as_ptr(), property_name.as_ptr(), &mut value)
        };
        if ok != 0 {
            Ok(Handle::from_raw(value))
        } else {
            Err(CallFailed)
        }
    }

    fn set_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
        value: Handle,
    ) -> Result<(), CallFailed> {
        let type_name = self.cstr(type_name)?;
        let property_name = self.cstr(property_name)?;
        let table = self.table()?;
        let ok = unsafe {
            (table.set_static_property)(type_name.as_ptr(), property_name.as_ptr(), value.raw())
        };
        if ok != 0 {
            Ok(())
        } else {
            Err(CallFailed)
        }
    }

    fn create_object(&mut self, type_name: &str, args: &[Handle]) -> Result<Handle, CallFailed> {
        let type_name = self.cstr(type_name)?;
        let table = self.table()?;
        let mut object: i64 = 0;
        let ok = unsafe {
            (table.create_object)(
                type_name.as_ptr(),
                arg_ptr(args),
                args.len() as i32,
                &mut object,
            )
        };
        if ok != 0 {
            Ok(Handle::from_raw(object))
        } else {
            Err(CallFailed)
        }
    }

    fn release_object(&mut self, object: Handle) -> Result<(), CallFailed> {
        let table = self.table()?;
        let ok = unsafe { (table.release_object)(object.raw()) };
        if ok != 0 {
            Ok(())
        } else {
            Err(CallFailed)
        }
    }

    fn call_method(
        &mut self,
        object: Handle,
        method_name: &str,
        args: &[Handle],
    ) -> Result<Vec<Handle>, CallFailed> {
        let method_name = self.cstr(method_name)?;
        let table = self.table()?;
        let mut results: *mut i64 = ptr::null_mut();
        let mut count: i32 = 0;
        let ok = unsafe {
            (table.call_method)(
                object.raw(),
                method_name.as_ptr(),
                arg_ptr(args),
                args.len() as i32,
                &mut results,
                &mut count,
            )
        };
        if ok != 0 {
            Ok(unsafe { copy_results(results, count) })
        } else {
            Err(CallFailed)
        }
    }

    fn get_property(
        &mut self,
        object: Handle,
        property_name: &str,
    ) -> Result<Handle, CallFailed> {
        let property_name = self.cstr(property_name)?;
        let table = self.table()?;
        let mut value: i64 = 0;
        let ok =
            unsafe { (table.get_property)(object.raw(), property_name.as_ptr(), &mut value) };
        if ok != 0 {
            Ok(Handle::from_raw(value))
        } else {
            Err(CallFailed)
        }
    }

    fn set_property(
        &mut self,
        object: Handle,
        property_name: &str,
        value: Handle,
    ) -> Result<(), CallFailed> {
        let property_name = self.cstr(property_name)?;
        let table = self.table()?;
        let ok =
            unsafe { (table.set_property)(object.raw(), property_name.as_ptr(), value.raw()) };
        if ok != 0 {
            Ok(())
        } else {
            Err(CallFailed)
        }
    }

    fn last_error(&mut self) -> String {
        if let Some(message) = &self.staged_error {
            return message.clone();
        }
        let Some(table) = self.engine.as_ref().and_then(|live| live.delegates) else {
            return String::new();
        };
        let message = unsafe { (table.last_error)() };
        if message.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}

fn arg_ptr(args: &[Handle]) -> *const i64 {
    if args.is_empty() {
        ptr::null()
    } else {
        // Handle is repr(transparent) over i64.
        args.as_ptr() as *const i64
    }
}

/// Copy an engine-owned result array into host memory. The engine's
/// interop allocator retains ownership of the buffer itself.
unsafe fn copy_results(results: *mut i64, count: i32) -> Vec<Handle> {
    if results.is_null() || count <= 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(results, count as usize)
        .iter()
        .map(|&raw| Handle::from_raw(raw))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ops_without_engine_stage_an_error() {
        let mut backend = ClrBackend::new();
        assert_eq!(
            backend.call_static_method("T", "M", &[]).unwrap_err(),
            CallFailed
        );
        let message = backend.last_error();
        assert!(message.contains("dispatch table"));
        // The message stays on the channel until another operation runs.
        assert_eq!(backend.last_error(), message);
    }

    #[test]
    fn test_interior_nul_is_rejected_host_side() {
        let mut backend = ClrBackend::new();
        assert!(backend.load_code_unit("bad\0unit.dll").is_err());
        assert!(backend.last_error().contains("nul byte"));
    }

    #[test]
    fn test_shutdown_without_engine_is_a_no_op() {
        let mut backend = ClrBackend::new();
        backend.shutdown();
        backend.shutdown();
    }

    #[test]
    fn test_start_with_unloadable_library() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libcoreclr.so");
        std::fs::write(&lib, b"junk").unwrap();
        let mut backend = ClrBackend::new();
        let err = backend
            .start(&StartRequest {
                app_base_dir: dir.path().to_path_buf(),
                engine_library: lib,
                trusted_list: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, HostError::LibraryLoadFailure { .. }));
    }
}

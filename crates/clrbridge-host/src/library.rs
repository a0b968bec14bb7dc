use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::Library;

use clrbridge_core::HostError;

use crate::ffi::{
    EngineCreateDelegateFn, EngineInitializeFn, EngineShutdownFn, SYM_CREATE_DELEGATE,
    SYM_INITIALIZE, SYM_SHUTDOWN,
};

/// The engine's native library with its bootstrap API resolved.
#[derive(Debug)]
pub(crate) struct EngineLibrary {
    path: PathBuf,
    initialize: EngineInitializeFn,
    create_delegate: EngineCreateDelegateFn,
    shutdown: EngineShutdownFn,
    // Keeps the three entry points above valid. Declared last so nothing in
    // this struct outlives it.
    lib: Library,
}

impl EngineLibrary {
    /// Load the library at `path` and resolve its bootstrap entry points.
    ///
    /// # Errors
    ///
    /// [`HostError::LibraryLoadFailure`] when the loader rejects the file,
    /// [`HostError::BootstrapEntryPointMissing`] when any of the three
    /// bootstrap symbols is absent.
    pub(crate) fn load(path: &Path) -> Result<EngineLibrary, HostError> {
        let lib = open_native_library(path)?;
        tracing::debug!(path = %path.display(), "engine library loaded");
        let initialize = *bootstrap::<EngineInitializeFn>(&lib, SYM_INITIALIZE)?;
        let create_delegate = *bootstrap::<EngineCreateDelegateFn>(&lib, SYM_CREATE_DELEGATE)?;
        let shutdown = *bootstrap::<EngineShutdownFn>(&lib, SYM_SHUTDOWN)?;
        Ok(EngineLibrary {
            path: path.to_path_buf(),
            initialize,
            create_delegate,
            shutdown,
            lib,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Start the runtime rooted at `app_base_dir`.
    ///
    /// Returns the opaque engine handle and the domain id.
    pub(crate) fn initialize(
        &self,
        app_base_dir: &Path,
        host_identity: &str,
        properties: &[(&str, &str)],
    ) -> Result<(*mut c_void, u32), HostError> {
        let exe_path = cstring_lossy(&app_base_dir.to_string_lossy());
        let identity = cstring_lossy(host_identity);
        let keys: Vec<CString> = properties.iter().map(|(k, _)| cstring_lossy(k)).collect();
        let values: Vec<CString> = properties.iter().map(|(_, v)| cstring_lossy(v)).collect();
        let key_ptrs: Vec<*const c_char> = keys.iter().map(|k| k.as_ptr()).collect();
        let value_ptrs: Vec<*const c_char> = values.iter().map(|v| v.as_ptr()).collect();

        let mut host_handle: *mut c_void = ptr::null_mut();
        let mut domain_id: c_uint = 0;
        let status = unsafe {
            (self.initialize)(
                exe_path.as_ptr(),
                identity.as_ptr(),
                properties.len() as c_int,
                key_ptrs.as_ptr(),
                value_ptrs.as_ptr(),
                &mut host_handle,
                &mut domain_id,
            )
        };
        if status < 0 {
            return Err(HostError::EngineInitializationFailure { status });
        }
        Ok((host_handle, domain_id))
    }

    /// Resolve one managed entry point into a raw delegate pointer.
    ///
    /// A negative engine status, or a null delegate despite a non-negative
    /// status, comes back as `Err(status)`; the caller attaches the
    /// entry-point name when mapping it into [`HostError`].
    pub(crate) fn create_delegate(
        &self,
        host_handle: *mut c_void,
        domain_id: u32,
        assembly: &str,
        type_name: &str,
        method: &str,
    ) -> Result<*mut c_void, i32> {
        let assembly = cstring_lossy(assembly);
        let type_name = cstring_lossy(type_name);
        let method = cstring_lossy(method);
        let mut delegate: *mut c_void = ptr::null_mut();
        let status = unsafe {
            (self.create_delegate)(
                host_handle,
                domain_id,
                assembly.as_ptr(),
                type_name.as_ptr(),
                method.as_ptr(),
                &mut delegate,
            )
        };
        if status < 0 || delegate.is_null() {
            Err(status)
        } else {
            Ok(delegate)
        }
    }

    /// Stop the runtime. Returns the engine's status code verbatim.
    pub(crate) fn shutdown(&self, host_handle: *mut c_void, domain_id: u32) -> i32 {
        unsafe { (self.shutdown)(host_handle, domain_id) }
    }

    /// Unload the native library from the process.
    pub(crate) fn unload(self) -> Result<(), libloading::Error> {
        self.lib.close()
    }
}

fn open_native_library(path: &Path) -> Result<Library, HostError> {
    #[cfg(unix)]
    let result = {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
        // Immediate binding surfaces missing-symbol problems at load time;
        // local visibility keeps engine symbols out of other libraries.
        unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
    };
    #[cfg(windows)]
    let result = unsafe { Library::new(path) };
    result.map_err(|e| HostError::LibraryLoadFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn bootstrap<'a, T>(
    lib: &'a Library,
    symbol: &'static str,
) -> Result<libloading::Symbol<'a, T>, HostError> {
    unsafe { lib.get(symbol.as_bytes()) }
        .map_err(|_| HostError::BootstrapEntryPointMissing { symbol })
}

/// Interior nul bytes never appear in legitimate paths or identifiers;
/// strip them rather than poison the whole start sequence.
fn cstring_lossy(value: &str) -> CString {
    CString::new(value)
        .unwrap_or_else(|_| CString::new(value.replace('\0', "")).unwrap_or_default())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn test_garbage_file_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-library.so");
        File::create(&path)
            .unwrap()
            .write_all(b"this is not an object file")
            .unwrap();

        let err = EngineLibrary::load(&path).unwrap_err();
        match err {
            HostError::LibraryLoadFailure { path: reported, .. } => {
                assert_eq!(reported, path);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.so");
        let err = EngineLibrary::load(&path).unwrap_err();
        assert!(matches!(err, HostError::LibraryLoadFailure { .. }));
    }

    #[test]
    fn test_cstring_lossy_strips_interior_nul() {
        assert_eq!(cstring_lossy("plain").as_bytes(), b"plain");
        assert_eq!(cstring_lossy("odd\0path").as_bytes(), b"oddpath");
    }
}

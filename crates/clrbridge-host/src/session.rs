use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clrbridge_core::{Handle, HostError, SessionState};

use crate::backend::{EngineBackend, StartRequest};
use crate::locator::{self, Located};
use crate::release::{ObjectRef, ReleaseRouter};

/// Start inputs as handed over by the binding layer.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Application base directory. A file path stands for its directory,
    /// an empty path for the working directory.
    pub app_base_dir: PathBuf,
    /// Directory with package-private code units, listed ahead of
    /// everything else.
    pub package_bin_dir: Option<PathBuf>,
    /// Shared engine install directory. The platform default is probed
    /// when absent.
    pub engine_install_dir: Option<PathBuf>,
}

impl StartOptions {
    pub fn new(app_base_dir: impl Into<PathBuf>) -> StartOptions {
        StartOptions {
            app_base_dir: app_base_dir.into(),
            ..Default::default()
        }
    }
}

/// An engine session: one engine instance at a time, restartable after
/// shutdown.
///
/// The backend sits behind a mutex shared with the release router, so
/// object releases coming from dropped wrappers are serialized with
/// ordinary bridge calls.
pub struct HostSession<B: EngineBackend> {
    state: SessionState,
    // A start that initialized the runtime but could not resolve its
    // dispatch table leaves the session running yet closed for calls.
    broken: bool,
    engine: Arc<Mutex<B>>,
    router: Option<Arc<ReleaseRouter>>,
}

impl<B: EngineBackend + Send + 'static> HostSession<B> {
    pub fn new(backend: B) -> HostSession<B> {
        HostSession {
            state: SessionState::Unstarted,
            broken: false,
            engine: Arc::new(Mutex::new(backend)),
            router: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True when bridge calls can go through.
    pub fn is_ready(&self) -> bool {
        self.state.is_running() && !self.broken
    }

    /// Locate an engine, start it, and resolve the call surface.
    ///
    /// A session that is already running is shut down first and started
    /// fresh; the dispatch surface is rebuilt from scratch every time.
    ///
    /// # Errors
    ///
    /// [`HostError::EngineNotFound`] when no runtime could be located; the
    /// session is left as it was and the caller may try again with
    /// corrected paths. Backend failures propagate as described on
    /// [`EngineBackend::start`]; after a delegate-resolution failure the
    /// session counts as running for shutdown purposes but rejects calls.
    pub fn start(&mut self, options: &StartOptions) -> Result<(), HostError> {
        if self.state.is_running() {
            tracing::info!("restart requested; shutting down the running engine first");
            let _ = self.shutdown();
        }

        let located = match locator::locate(
            &options.app_base_dir,
            options.package_bin_dir.as_deref(),
            options.engine_install_dir.as_deref(),
        ) {
            Ok(located) => located,
            Err(err) => {
                tracing::warn!("{err}");
                return Err(err);
            }
        };
        let Located {
            app_base_dir,
            engine_library,
            mode,
            trusted,
        } = located;
        tracing::info!(
            engine = %engine_library.display(),
            ?mode,
            trusted_units = trusted.len(),
            "starting engine"
        );
        let request = StartRequest {
            app_base_dir,
            engine_library,
            trusted_list: trusted.join(),
        };

        let started = self.engine.lock().unwrap().start(&request);
        match started {
            Ok(()) => {
                self.state = SessionState::Running;
                self.broken = false;
                self.router = Some(self.install_router());
                Ok(())
            }
            Err(err @ HostError::DelegateResolutionFailure { .. }) => {
                // The runtime is live; only shutdown is usable from here.
                self.state = SessionState::Running;
                self.broken = true;
                self.router = None;
                tracing::error!("{err}");
                Err(err)
            }
            Err(err) => {
                tracing::error!("{err}");
                Err(err)
            }
        }
    }

    /// Stop the engine: release routing is torn down, the engine shutdown
    /// sequence runs, the library is unloaded.
    ///
    /// # Errors
    ///
    /// [`HostError::HostNotStarted`] when the session is not running.
    /// Engine-side shutdown problems are logged, never returned.
    pub fn shutdown(&mut self) -> Result<(), HostError> {
        if !self.state.is_running() {
            tracing::warn!("shutdown requested but the engine host is not running");
            return Err(HostError::HostNotStarted);
        }
        // Teardown precedes engine shutdown so a finalizer firing in the
        // gap cannot reach the dying engine.
        if let Some(router) = self.router.take() {
            let abandoned = router.shut_down();
            if abandoned > 0 {
                tracing::debug!(abandoned, "tracked object wrappers outlive the session");
            }
        }
        self.engine.lock().unwrap().shutdown();
        self.state = SessionState::ShutDown;
        self.broken = false;
        Ok(())
    }

    /// Load a code unit into the running engine, by path or by name.
    pub fn load_code_unit(&mut self, path: &str) -> Result<(), HostError> {
        self.ready()?;
        tracing::debug!(path, "loading code unit");
        let mut engine = self.engine.lock().unwrap();
        engine
            .load_code_unit(path)
            .map_err(|_| engine_failure(&mut *engine))
    }

    /// Call a static method. Element 0 of the result is the return-value
    /// handle; the remaining elements are the final values of
    /// by-reference parameters, in declaration order.
    pub fn call_static_method(
        &mut self,
        type_name: &str,
        method_name: &str,
        args: &[Handle],
    ) -> Result<Vec<Handle>, HostError> {
        self.ready()?;
        tracing::debug!(type_name, method_name, argc = args.len(), "static call");
        let mut engine = self.engine.lock().unwrap();
        engine
            .call_static_method(type_name, method_name, args)
            .map_err(|_| engine_failure(&mut *engine))
    }

    pub fn get_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
    ) -> Result<Handle, HostError> {
        self.ready()?;
        let mut engine = self.engine.lock().unwrap();
        engine
            .get_static_property(type_name, property_name)
            .map_err(|_| engine_failure(&mut *engine))
    }

    /// Set a static property. `args` carries the value handle in slot 0;
    /// an empty slice is rejected before the engine is involved.
    pub fn set_static_property(
        &mut self,
        type_name: &str,
        property_name: &str,
        args: &[Handle],
    ) -> Result<(), HostError> {
        self.ready()?;
        let value = setter_value(args)?;
        let mut engine = self.engine.lock().unwrap();
        engine
            .set_static_property(type_name, property_name, value)
            .map_err(|_| engine_failure(&mut *engine))
    }

    /// Instantiate a managed type. The returned wrapper releases the
    /// engine-side object when dropped.
    pub fn create_object(
        &mut self,
        type_name: &str,
        args: &[Handle],
    ) -> Result<ObjectRef, HostError> {
        self.ready()?;
        tracing::debug!(type_name, argc = args.len(), "creating object");
        let handle = {
            let mut engine = self.engine.lock().unwrap();
            engine
                .create_object(type_name, args)
                .map_err(|_| engine_failure(&mut *engine))?
        };
        Ok(self.track_object(handle))
    }

    /// Adopt an engine object handle into release tracking.
    ///
    /// Null handles yield an inert wrapper, as do sessions without a live
    /// release route.
    pub fn track_object(&self, handle: Handle) -> ObjectRef {
        match &self.router {
            Some(router) => ObjectRef::tracked(handle, Arc::clone(router)),
            None => ObjectRef::untracked(handle),
        }
    }

    /// Release an engine object by raw handle, outside wrapper tracking.
    /// Null handles are a no-op.
    pub fn release_object(&mut self, handle: Handle) -> Result<(), HostError> {
        self.ready()?;
        if handle.is_null() {
            return Ok(());
        }
        let mut engine = self.engine.lock().unwrap();
        engine
            .release_object(handle)
            .map_err(|_| engine_failure(&mut *engine))
    }

    /// Call an instance method. Result layout matches
    /// [`HostSession::call_static_method`].
    pub fn call_method(
        &mut self,
        object: Handle,
        method_name: &str,
        args: &[Handle],
    ) -> Result<Vec<Handle>, HostError> {
        self.ready()?;
        tracing::debug!(method_name, argc = args.len(), "instance call");
        let mut engine = self.engine.lock().unwrap();
        engine
            .call_method(object, method_name, args)
            .map_err(|_| engine_failure(&mut *engine))
    }

    pub fn get_property(
        &mut self,
        object: Handle,
        property_name: &str,
    ) -> Result<Handle, HostError> {
        self.ready()?;
        let mut engine = self.engine.lock().unwrap();
        engine
            .get_property(object, property_name)
            .map_err(|_| engine_failure(&mut *engine))
    }

    /// Set an instance property. `args` works like
    /// [`HostSession::set_static_property`].
    pub fn set_property(
        &mut self,
        object: Handle,
        property_name: &str,
        args: &[Handle],
    ) -> Result<(), HostError> {
        self.ready()?;
        let value = setter_value(args)?;
        let mut engine = self.engine.lock().unwrap();
        engine
            .set_property(object, property_name, value)
            .map_err(|_| engine_failure(&mut *engine))
    }

    /// Message the engine recorded for the most recent failed call, empty
    /// when there is none. Readable in any session state.
    pub fn last_error(&mut self) -> String {
        self.engine.lock().unwrap().last_error()
    }

    fn ready(&self) -> Result<(), HostError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(HostError::HostNotStarted)
        }
    }

    fn install_router(&self) -> Arc<ReleaseRouter> {
        let engine = Arc::clone(&self.engine);
        ReleaseRouter::new(Box::new(move |handle| {
            let mut engine = engine.lock().unwrap();
            if engine.release_object(handle).is_err() {
                let message = engine.last_error();
                tracing::warn!(handle = handle.raw(), "object release failed: {message}");
            }
        }))
    }
}

impl<B: EngineBackend> Drop for HostSession<B> {
    fn drop(&mut self) {
        if self.state.is_running() {
            if let Some(router) = self.router.take() {
                router.shut_down();
            }
            self.engine.lock().unwrap().shutdown();
        }
    }
}

fn engine_failure<B: EngineBackend>(engine: &mut B) -> HostError {
    HostError::EngineCallFailure {
        message: engine.last_error(),
    }
}

fn setter_value(args: &[Handle]) -> Result<Handle, HostError> {
    args.first()
        .copied()
        .ok_or_else(|| HostError::RequestShapeError {
            message: "property setter requires a value handle in argument slot 0".to_owned(),
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_setter_value_takes_slot_zero() {
        let args = [Handle::from_raw(5), Handle::from_raw(6)];
        assert_eq!(setter_value(&args).unwrap(), Handle::from_raw(5));
    }

    #[test]
    fn test_setter_value_rejects_empty() {
        let err = setter_value(&[]).unwrap_err();
        assert!(matches!(err, HostError::RequestShapeError { .. }));
    }
}

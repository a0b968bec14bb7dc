use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use clrbridge_core::Handle;

type ForwardFn = Box<dyn FnMut(Handle) + Send>;

/// Routes release requests from dropped object wrappers into the engine
/// that issued their handles.
///
/// A router lives for one start cycle: installed on successful start, torn
/// down at shutdown. Wrappers dropped after teardown become no-ops, so a
/// late finalizer can never reach into a stopped or restarted engine.
pub(crate) struct ReleaseRouter {
    forward: Mutex<Option<ForwardFn>>,
    tracked: AtomicUsize,
}

impl ReleaseRouter {
    pub(crate) fn new(forward: ForwardFn) -> Arc<ReleaseRouter> {
        Arc::new(ReleaseRouter {
            forward: Mutex::new(Some(forward)),
            tracked: AtomicUsize::new(0),
        })
    }

    /// Drop the forwarding target. Returns how many tracked wrappers were
    /// still alive at teardown.
    pub(crate) fn shut_down(&self) -> usize {
        *self.forward.lock().unwrap() = None;
        self.tracked.load(Ordering::SeqCst)
    }

    fn route(&self, handle: Handle) {
        let mut slot = self.forward.lock().unwrap();
        match slot.as_mut() {
            Some(forward) => forward(handle),
            None => tracing::debug!(handle = handle.raw(), "release after shutdown ignored"),
        }
    }
}

/// Owning wrapper for an engine-side object handle.
///
/// At most one release request is forwarded for the handle, when the
/// wrapper drops. Wrappers cannot be cloned, so the engine-side reference
/// count stays at one per tracked handle. Null handles are never tracked
/// and never released.
pub struct ObjectRef {
    handle: Handle,
    // None for null or detached wrappers, which never release.
    router: Option<Arc<ReleaseRouter>>,
}

impl ObjectRef {
    pub(crate) fn tracked(handle: Handle, router: Arc<ReleaseRouter>) -> ObjectRef {
        if handle.is_null() {
            return ObjectRef {
                handle,
                router: None,
            };
        }
        router.tracked.fetch_add(1, Ordering::SeqCst);
        ObjectRef {
            handle,
            router: Some(router),
        }
    }

    /// Wrapper that carries a handle without release tracking.
    pub(crate) fn untracked(handle: Handle) -> ObjectRef {
        ObjectRef {
            handle,
            router: None,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Give up ownership without releasing. The caller becomes responsible
    /// for the engine-side object.
    pub fn into_raw(mut self) -> Handle {
        if let Some(router) = self.router.take() {
            router.tracked.fetch_sub(1, Ordering::SeqCst);
        }
        self.handle
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.tracked.fetch_sub(1, Ordering::SeqCst);
            router.route(self.handle);
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("handle", &self.handle)
            .field("tracked", &self.router.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn counting_router() -> (Arc<ReleaseRouter>, Arc<Mutex<Vec<Handle>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&released);
        let router = ReleaseRouter::new(Box::new(move |h| sink.lock().unwrap().push(h)));
        (router, released)
    }

    #[test]
    fn test_drop_releases_exactly_once() {
        let (router, released) = counting_router();
        let wrapper = ObjectRef::tracked(Handle::from_raw(7), Arc::clone(&router));
        assert_eq!(wrapper.handle(), Handle::from_raw(7));
        drop(wrapper);
        assert_eq!(&*released.lock().unwrap(), &[Handle::from_raw(7)]);
    }

    #[test]
    fn test_into_raw_escapes_tracking() {
        let (router, released) = counting_router();
        let wrapper = ObjectRef::tracked(Handle::from_raw(9), Arc::clone(&router));
        assert_eq!(wrapper.into_raw(), Handle::from_raw(9));
        assert!(released.lock().unwrap().is_empty());
        assert_eq!(router.shut_down(), 0);
    }

    #[test]
    fn test_null_handles_are_never_tracked() {
        let (router, released) = counting_router();
        let wrapper = ObjectRef::tracked(Handle::NULL, Arc::clone(&router));
        assert!(wrapper.handle().is_null());
        drop(wrapper);
        assert!(released.lock().unwrap().is_empty());
        assert_eq!(router.shut_down(), 0);
    }

    #[test]
    fn test_late_drop_after_teardown_is_ignored() {
        let (router, released) = counting_router();
        let wrapper = ObjectRef::tracked(Handle::from_raw(3), Arc::clone(&router));
        assert_eq!(router.shut_down(), 1);
        drop(wrapper);
        assert!(released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_untracked_wrapper_never_releases() {
        let (_, released) = counting_router();
        let wrapper = ObjectRef::untracked(Handle::from_raw(11));
        drop(wrapper);
        assert!(released.lock().unwrap().is_empty());
    }
}

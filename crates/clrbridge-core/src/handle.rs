use serde::{Deserialize, Serialize};

/// Opaque 64-bit token exchanged between the host and the engine.
///
/// Depending on the call, the value is either the null sentinel, a
/// primitive scalar reinterpreted bitwise by the binding layer, or a
/// reference to a live engine-side object. The host never interprets the
/// value and never performs arithmetic on it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(i64);

impl Handle {
    /// The universal null sentinel.
    pub const NULL: Handle = Handle(0);

    pub const fn from_raw(raw: i64) -> Handle {
        Handle(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    /// True for the null sentinel. Null handles are never dereferenced and
    /// never tracked for release.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<i64> for Handle {
    fn from(raw: i64) -> Handle {
        Handle(raw)
    }
}

impl From<Handle> for i64 {
    fn from(handle: Handle) -> i64 {
        handle.0
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_null_sentinel() {
        assert!(Handle::NULL.is_null());
        assert!(Handle::from_raw(0).is_null());
        assert!(!Handle::from_raw(1).is_null());
        assert_eq!(Handle::NULL.raw(), 0);
    }

    #[test]
    fn test_raw_round_trip() {
        let raw = -0x7fff_ffff_1234i64;
        assert_eq!(Handle::from_raw(raw).raw(), raw);
        assert_eq!(i64::from(Handle::from(raw)), raw);
    }
}

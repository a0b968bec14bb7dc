//! Embeds the CoreCLR engine in a host process: locating a runtime,
//! bootstrapping it with a trusted code-unit list, and bridging calls into
//! managed code through opaque 64-bit handles.

mod backend;
mod delegates;
mod ffi;
mod global;
mod library;
mod locator;
mod release;
mod session;
mod trusted;

pub mod testing;

pub use backend::{CallFailed, ClrBackend, EngineBackend, StartRequest, HOST_IDENTITY};
pub use delegates::{DISPATCH_ASSEMBLY, DISPATCH_TYPE};
pub use global::{
    call_method, call_static_method, create_object, get_property, get_static_property, last_error,
    load_code_unit, release_object, session_state, set_property, set_static_property, shutdown,
    start,
};
pub use locator::{locate, DeploymentMode, Located, ENGINE_LIBRARY_FILE};
pub use release::ObjectRef;
pub use session::{HostSession, StartOptions};
pub use trusted::{TrustedList, CODE_UNIT_EXT, EXE_UNIT_EXT, LIST_DELIMITER};

pub use clrbridge_core::{Handle, HostError, SessionState};

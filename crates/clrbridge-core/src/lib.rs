mod error;
mod handle;

pub use error::HostError;
pub use handle::Handle;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a host session.
///
/// Sessions move `Unstarted -> Running -> ShutDown` and may start again
/// after a shutdown. There is no terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No engine has been started in this session yet.
    Unstarted,
    /// An engine is initialized. Bridge calls go through only if the start
    /// that produced this state fully succeeded.
    Running,
    /// The engine was shut down and its library unloaded. A later start
    /// brings the session back to `Running`.
    ShutDown,
}

impl SessionState {
    pub fn is_running(self) -> bool {
        self == SessionState::Running
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_running_query() {
        assert!(!SessionState::Unstarted.is_running());
        assert!(SessionState::Running.is_running());
        assert!(!SessionState::ShutDown.is_running());
    }
}

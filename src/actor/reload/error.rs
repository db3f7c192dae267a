use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::bus::ConnectionError;
use crate::core::SessionId;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("watch root `{}` missing for {missing_for:?}", root.display())]
    WatchTimeout { root: PathBuf, missing_for: Duration },

    #[error("I/O on `{}` failed after {attempts} attempts", path.display())]
    IoFailure {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("application session {0} disconnected")]
    Disconnected(SessionId),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

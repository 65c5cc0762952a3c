use std::io;

use models::ConfigError;
use thiserror::Error;
use utilities::PluginError;

/// Linux `EREMOTEIO`, returned to the caller when a pass-through read fails.
pub const EREMOTEIO: i32 = 121;
const ENOENT: i32 = 2;
const EIO: i32 = 5;
const EINVAL: i32 = 22;
const ENOTDIR: i32 = 20;
const ENOTCONN: i32 = 107;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no backing-store plugin named `{0}`")]
    PluginNotFound(String),
    #[error("failed to load plugin `{name}`: {source}")]
    PluginLoad {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to the backing store: {0}")]
    Connect(#[source] io::Error),
    #[error("dataset root {0} does not exist on the store")]
    RootMissing(String),
    #[error("dataset root {0} is not a directory")]
    RootNotDirectory(String),
    #[error("driver is not initialized")]
    NotInitialized,
    #[error("remote read of {path} failed: {source}")]
    RemoteIo {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("store operation on {path} failed: {source}")]
    Store {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl From<PluginError> for DriverError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::NotFound(name) => DriverError::PluginNotFound(name),
            PluginError::Load { name, source } => DriverError::PluginLoad { name, source },
        }
    }
}

impl DriverError {
    /// Errno-style status for callers that speak in integer codes.
    pub fn code(&self) -> i32 {
        match self {
            DriverError::Config(_) => EINVAL,
            DriverError::PluginNotFound(_) | DriverError::RootMissing(_) => ENOENT,
            DriverError::PluginLoad { .. } => EIO,
            DriverError::RootNotDirectory(_) => ENOTDIR,
            DriverError::Connect(_) | DriverError::NotInitialized => ENOTCONN,
            DriverError::RemoteIo { .. } => EREMOTEIO,
            DriverError::Store { source, .. } => source.raw_os_error().unwrap_or(EIO),
        }
    }
}

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
/// The failure kinds of the getpass flow.
///
/// Functions in this crate return `anyhow` errors; these kinds sit at the root of the chain, so
/// `error.downcast_ref::<Error>()` tells them apart.
pub enum Error {
    /// Enumeration kept coming back empty and the operator stopped answering.
    #[error("no KeepKey connected")]
    NoDeviceFound,

    /// The (only usable) device is held by another process.
    #[error("device is currently in use")]
    DeviceBusy,

    /// The device menu answer was not a listed index.
    #[error("invalid choice {0:?}, exiting")]
    InvalidSelection(String),

    /// The password record could not be read or lacks required data.
    #[error("password record {} is unusable: {reason}", path.display())]
    MalformedRecord {
        /// Location of the record
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// A record showed up while a new one was being written.
    #[error("password record {} already exists, refusing to overwrite it", .0.display())]
    RecordExists(PathBuf),

    /// The device answered, but not with what was asked for.
    #[error("device operation {operation} failed: {reason}")]
    DeviceOperationFailed {
        /// `get_entropy`, `encrypt_keyvalue` or `decrypt_keyvalue`
        operation: &'static str,
        /// Details
        reason: String,
    },

    /// Standard input was closed while waiting for an answer.
    #[error("standard input closed while waiting for {0}")]
    UnexpectedEof(&'static str),
}

impl Error {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::MalformedRecord { path: path.into(), reason: reason.to_string() }
    }
}

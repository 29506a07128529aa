//! The password record, kept in the EncFS root directory.
//!
//! ```json
//! {"label":"my drive","bip32_path":[10,0],"password_encrypted_hex":"9f00..."}
//! ```
//!
//! The record is created once, on first use of a root, and never modified afterwards. Removing
//! it (and the EncFS volume along with it) is up to the operator.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of the record file within the EncFS root.
pub const RECORD_FILE_NAME: &str = "password.dat";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
/// Everything needed to have the device decrypt the password again.
pub struct PasswordRecord {
    /// Name of the drive, also bound into the encryption
    pub label: String,
    /// Selects the device key
    #[serde(rename = "bip32_path")]
    pub derivation_path: Vec<u32>,
    /// The password, as encrypted by the device
    #[serde(rename = "password_encrypted_hex", with = "hex")]
    pub encrypted_password: Vec<u8>,
}

/// Serde helper for byte strings stored as hexadecimal.
pub(crate) mod hex {
    use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(deserializer)?;
        HEXLOWER_PERMISSIVE.decode(hex.as_bytes()).map_err(D::Error::custom)
    }
}

/// Location of the password record of one EncFS root.
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn in_root(root: impl AsRef<Path>) -> Self {
        Self { path: root.as_ref().join(RECORD_FILE_NAME) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads and checks the record.
    ///
    /// Any problem, including a missing file, is reported as [`Error::MalformedRecord`].
    pub fn load(&self) -> Result<PasswordRecord> {
        let contents = fs::read(&self.path).map_err(|error| Error::malformed(&self.path, error))?;
        let record: PasswordRecord = serde_json::from_slice(&contents)
            .map_err(|error| Error::malformed(&self.path, error))?;

        if record.encrypted_password.is_empty() {
            return Err(Error::malformed(&self.path, "password_encrypted_hex is empty").into());
        }
        if record.derivation_path.is_empty() {
            return Err(Error::malformed(&self.path, "bip32_path is empty").into());
        }

        debug!("loaded record {:?} for path {:?}", record.label, record.derivation_path);
        Ok(record)
    }

    /// Writes a new record.
    ///
    /// The data goes to an owner-only temporary file next to the record, which is then linked
    /// into place. Readers see either no record or a complete one, and an existing record is
    /// never replaced ([`Error::RecordExists`]).
    pub fn create(&self, record: &PasswordRecord) -> Result<()> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = tempfile::Builder::new()
            .prefix(".password")
            .suffix(".tmp")
            .tempfile_in(directory)
            .with_context(|| format!("cannot write a password record in {}", directory.display()))?;
        serde_json::to_writer(file.as_file_mut(), record)?;
        file.as_file().sync_all()?;

        file.persist_noclobber(&self.path).map_err(|error| -> anyhow::Error {
            if error.error.kind() == io::ErrorKind::AlreadyExists {
                Error::RecordExists(self.path.clone()).into()
            } else {
                anyhow::Error::from(error.error)
                    .context(format!("cannot save password record {}", self.path.display()))
            }
        })?;

        info!("saved new password record {}", self.path.display());
        Ok(())
    }
}

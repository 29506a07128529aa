//! The external password program for EncFS.
//!
//! Like the device operations it builds on, the two things this program can be asked to do are
//! declared as plain structs (`GetPass` and `InitEmulator`); parsing them from the command line
//! happens in [`crate::cli`].

use std::{
    fmt,
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::Context as _;
use data_encoding::HEXLOWER;
use log::{debug, info};
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    console::Console,
    device::{CipherFlags, Client, Transport, ENCFS_DERIVATION_PATH},
    record::{PasswordRecord, RecordStore},
    selection, Error, Result,
};

/// Bytes of entropy taken from each source, and size of the password.
pub const ENTROPY_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// How the password is written to standard output.
pub enum OutputFormat {
    /// 64 lowercase hexadecimal digits
    Hex,
    /// The 32 password bytes as they are
    Raw,
}

#[derive(Clone, Debug, PartialEq)]
/// Print the password of an EncFS root, creating it first if needed.
pub struct GetPass {
    /// The EncFS root directory, holding the password record
    pub root: PathBuf,
    /// Where emulated devices live
    pub device_dir: PathBuf,
    pub output: OutputFormat,
}

#[derive(Clone, Debug, PartialEq)]
/// Create a new emulated device.
pub struct InitEmulator {
    pub device_dir: PathBuf,
    /// File name of the device state, without extension
    pub name: String,
    /// Label the device reports
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Command {
    GetPass(GetPass),
    InitEmulator(InitEmulator),
}

/// A plaintext password, wiped from memory when dropped.
#[derive(Clone, PartialEq)]
pub struct Password(Zeroizing<Vec<u8>>);

impl Password {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(HEXLOWER.encode(&self.0))
    }

    /// Writes the password as a single line.
    pub fn write_line(&self, output: &mut impl Write, format: OutputFormat) -> io::Result<()> {
        match format {
            OutputFormat::Hex => output.write_all(self.to_hex().as_bytes())?,
            OutputFormat::Raw => output.write_all(&self.0)?,
        }
        output.write_all(b"\n")?;
        output.flush()
    }
}

/// Never shows the password itself
impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password({} bytes)", self.0.len())
    }
}

/// Derives the password from both entropy sources: SHA-256(device || host).
pub fn mix(device_entropy: &[u8], host_entropy: &[u8]) -> Password {
    let mut hasher = Sha256::new();
    hasher.update(device_entropy);
    hasher.update(host_entropy);
    Password(Zeroizing::new(hasher.finalize().to_vec()))
}

/// Creates and recovers passwords with an opened device.
pub struct PasswordProvider<C, R> {
    client: C,
    rng: R,
    flags: CipherFlags,
}

impl<C, R> PasswordProvider<C, R>
where
    C: Client,
    R: RngCore + CryptoRng,
{
    /// Constructor, consumes the device client and the host RNG
    pub fn new(client: C, rng: R) -> Self {
        Self { client, rng, flags: CipherFlags::ENCFS }
    }

    /// Generates a new password and has the device encrypt it under `label`.
    ///
    /// Nothing is written to disk here; the returned record is all that is left of the password.
    pub fn provision(&mut self, label: &str) -> Result<PasswordRecord> {
        debug!("provision {:?}", label);

        // 1. Device entropy, needs confirmation on the device
        let device_entropy = Zeroizing::new(
            self.client
                .get_entropy(ENTROPY_SIZE)
                .context("KeepKey did not provide entropy")?,
        );
        if device_entropy.len() != ENTROPY_SIZE {
            return Err(Error::DeviceOperationFailed {
                operation: "get_entropy",
                reason: format!("got {} bytes, expected {}", device_entropy.len(), ENTROPY_SIZE),
            }
            .into());
        }

        // 2. Host entropy
        let mut host_entropy = Zeroizing::new([0u8; ENTROPY_SIZE]);
        self.rng
            .try_fill_bytes(&mut host_entropy[..])
            .context("host RNG failed")?;

        // 3. Mix
        let password = mix(&device_entropy, &host_entropy[..]);

        // 4. Encrypt
        let encrypted_password = self
            .client
            .encrypt_keyvalue(&ENCFS_DERIVATION_PATH, label, password.as_bytes(), self.flags)
            .context("KeepKey did not encrypt the new password")?;
        if encrypted_password.is_empty() {
            return Err(Error::DeviceOperationFailed {
                operation: "encrypt_keyvalue",
                reason: "empty result".into(),
            }
            .into());
        }
        info!("new password encrypted for {:?}", label);

        Ok(PasswordRecord {
            label: label.into(),
            derivation_path: ENCFS_DERIVATION_PATH.to_vec(),
            encrypted_password,
        })
    }

    /// Has the device decrypt the password of `record`.
    pub fn retrieve(&mut self, record: &PasswordRecord) -> Result<Password> {
        debug!("retrieve {:?}", record.label);

        let password = self
            .client
            .decrypt_keyvalue(
                &record.derivation_path,
                &record.label,
                &record.encrypted_password,
                self.flags,
            )
            .context("KeepKey did not decrypt the password")?;
        if password.is_empty() {
            return Err(Error::DeviceOperationFailed {
                operation: "decrypt_keyvalue",
                reason: "empty result".into(),
            }
            .into());
        }

        Ok(Password(password))
    }
}

/// The whole getpass flow: find and open a device, create the password record if `store` has
/// none, then decrypt the stored password.
pub fn run<T, R, I, O>(
    transport: &mut T,
    rng: R,
    store: &RecordStore,
    console: &mut Console<I, O>,
) -> Result<Password>
where
    T: Transport,
    R: RngCore + CryptoRng,
    I: BufRead,
    O: Write,
{
    let devices = selection::wait_for_devices(transport, console)?;
    let client = selection::choose_device(transport, devices, console)?;
    let mut provider = PasswordProvider::new(client, rng);

    if !store.exists() {
        info!("no password record at {}, creating one", store.path().display());
        let label = console.prompt("Please provide label for new drive: ", "a label")?;

        console.message("Computer asked KeepKey for new strong password.\n")?;
        console.message("Please confirm action on your device.\n")?;
        let record = provider.provision(&label)?;
        store.create(&record)?;
    }

    let record = store.load()?;

    console.message("Please confirm action on your device.\n")?;
    provider.retrieve(&record)
}

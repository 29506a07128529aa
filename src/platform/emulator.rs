//! A software KeepKey, for running on a PC without the hardware.
//!
//! Each emulated device is a JSON state file `<name>.keepkey` in a device directory, holding the
//! label and a 32 byte secret seed. Opening a device creates `<name>.lock` next to it, which is
//! how other processes see the device as busy; dropping the client removes it again. A lock left
//! behind by a crashed process has to be removed by hand.
//!
//! `CipherKeyValue` is emulated with a keystream: ChaCha8 seeded with
//! SHA-256(seed, "CipherKeyValue", path, key, flags), XOR-ed onto the value. As on the device,
//! values are multiples of 16 bytes, and a different path, key or set of flags gives different
//! results.
//!
//! The seed sits in a plain file, so an emulated device protects nothing. It exists to try and
//! test the program.

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use chacha20::ChaCha8Rng;
use log::{debug, info};
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    device::{CipherFlags, Client, Features, Opened, Transport},
    platform::host_rng,
    Error, Result,
};

/// Extension of device state files
pub const STATE_EXTENSION: &str = "keepkey";
const LOCK_EXTENSION: &str = "lock";

const SEED_SIZE: usize = 32;
/// Largest entropy request the device serves
pub const MAX_ENTROPY: usize = 1024;
/// `CipherKeyValue` values are whole AES blocks
pub const CIPHER_BLOCK: usize = 16;

#[derive(Deserialize, Serialize)]
struct State {
    label: Option<String>,
    #[serde(rename = "seed_hex", with = "crate::record::hex")]
    seed: Vec<u8>,
}

/// The devices of one device directory.
#[derive(Clone, Debug)]
pub struct Emulator {
    dir: PathBuf,
}

impl Emulator {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a device with a fresh seed, as `<name>.keepkey` in the device directory.
    pub fn create_device(&self, name: &str, label: Option<&str>) -> Result<PathBuf> {
        let separator = |c: char| c == '/' || c == '\\';
        if name.is_empty() || name == "." || name == ".." || name.contains(separator) {
            return Err(anyhow::anyhow!("invalid device name {:?}", name));
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create device directory {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.{}", name, STATE_EXTENSION));

        let mut state = State { label: label.map(String::from), seed: vec![0u8; SEED_SIZE] };
        host_rng()?.try_fill_bytes(&mut state.seed)?;

        let mut file = tempfile::Builder::new()
            .prefix(".emulator")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        let written = serde_json::to_writer(file.as_file_mut(), &state);
        state.seed.zeroize();
        written?;
        file.as_file().sync_all()?;
        file.persist_noclobber(&path).map_err(|error| -> anyhow::Error {
            if error.error.kind() == io::ErrorKind::AlreadyExists {
                anyhow::anyhow!("emulated device {} already exists", path.display())
            } else {
                anyhow::Error::from(error.error)
                    .context(format!("cannot save emulated device {}", path.display()))
            }
        })?;

        info!("created emulated device {}", path.display());
        Ok(path)
    }
}

impl Transport for Emulator {
    type Device = PathBuf;
    type Client = EmulatedKeepKey;

    fn enumerate(&mut self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("device directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(anyhow::Error::from(error)
                    .context(format!("cannot list devices in {}", self.dir.display())))
            }
        };

        let mut devices = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |extension| extension == STATE_EXTENSION)
                && path.is_file()
            {
                devices.push(path);
            }
        }
        devices.sort();
        Ok(devices)
    }

    fn open(&mut self, device: &PathBuf) -> Result<Opened<EmulatedKeepKey>> {
        let lock_path = device.with_extension(LOCK_EXTENSION);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} is locked", device.display());
                return Ok(Opened::Busy);
            }
            Err(error) => {
                return Err(anyhow::Error::from(error)
                    .context(format!("cannot lock {}", device.display())))
            }
        }
        // from here on, errors release the lock again
        let lock = LockFile(lock_path);

        let contents = Zeroizing::new(
            fs::read(device).with_context(|| format!("cannot read {}", device.display()))?,
        );
        let state: State = serde_json::from_slice(&contents)
            .with_context(|| format!("{} is not an emulated device", device.display()))?;
        let seed = Zeroizing::new(state.seed);
        if seed.len() != SEED_SIZE {
            return Err(anyhow::anyhow!("{} has a {} byte seed", device.display(), seed.len()));
        }

        Ok(Opened::Ready(EmulatedKeepKey {
            features: Features { label: state.label },
            seed,
            rng: host_rng()?,
            _lock: lock,
        }))
    }
}

/// Removes the lock file of an opened device when dropped.
#[derive(Debug)]
struct LockFile(PathBuf);

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.0) {
            log::warn!("cannot remove lock {}: {}", self.0.display(), error);
        }
    }
}

/// An opened emulated device.
pub struct EmulatedKeepKey {
    features: Features,
    seed: Zeroizing<Vec<u8>>,
    rng: ChaCha8Rng,
    _lock: LockFile,
}

impl EmulatedKeepKey {
    /// Emulated button press: always confirmed.
    fn confirm(&self, action: &str) {
        info!(
            "{} confirmed on emulated device {:?}",
            action,
            self.features.label.as_deref().unwrap_or("<no label>")
        );
    }

    fn cipher_key_value(
        &self,
        operation: &'static str,
        path: &[u32],
        key: &str,
        value: &[u8],
        flags: CipherFlags,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if value.is_empty() || value.len() % CIPHER_BLOCK != 0 {
            return Err(Error::DeviceOperationFailed {
                operation,
                reason: format!("value length must be a multiple of {}", CIPHER_BLOCK),
            }
            .into());
        }

        let mut hasher = Sha256::new();
        hasher.update(&*self.seed);
        hasher.update(b"CipherKeyValue");
        hasher.update((path.len() as u32).to_be_bytes());
        for index in path {
            hasher.update(index.to_be_bytes());
        }
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(if flags.ask_on_encrypt { b"E1" } else { b"E0" });
        hasher.update(if flags.ask_on_decrypt { b"D1" } else { b"D0" });

        let mut keystream_seed = Zeroizing::new([0u8; 32]);
        keystream_seed.copy_from_slice(&hasher.finalize());
        let mut keystream = ChaCha8Rng::from_seed(*keystream_seed);

        let mut output = Zeroizing::new(vec![0u8; value.len()]);
        keystream.fill_bytes(&mut output);
        for (byte, input) in output.iter_mut().zip(value) {
            *byte ^= input;
        }
        Ok(output)
    }
}

impl Client for EmulatedKeepKey {
    fn features(&self) -> &Features {
        &self.features
    }

    fn get_entropy(&mut self, size: usize) -> Result<Vec<u8>> {
        if size > MAX_ENTROPY {
            return Err(Error::DeviceOperationFailed {
                operation: "get_entropy",
                reason: format!("at most {} bytes per request", MAX_ENTROPY),
            }
            .into());
        }
        self.confirm("get_entropy");

        let mut entropy = vec![0u8; size];
        self.rng.try_fill_bytes(&mut entropy)?;
        Ok(entropy)
    }

    fn encrypt_keyvalue(
        &mut self,
        path: &[u32],
        key: &str,
        value: &[u8],
        flags: CipherFlags,
    ) -> Result<Vec<u8>> {
        if flags.ask_on_encrypt {
            self.confirm("encrypt_keyvalue");
        }
        let encrypted = self.cipher_key_value("encrypt_keyvalue", path, key, value, flags)?;
        Ok(encrypted.to_vec())
    }

    fn decrypt_keyvalue(
        &mut self,
        path: &[u32],
        key: &str,
        value: &[u8],
        flags: CipherFlags,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if flags.ask_on_decrypt {
            self.confirm("decrypt_keyvalue");
        }
        self.cipher_key_value("decrypt_keyvalue", path, key, value, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(opened: Opened<EmulatedKeepKey>) -> EmulatedKeepKey {
        match opened {
            Opened::Ready(client) => client,
            Opened::Busy => panic!("device unexpectedly busy"),
        }
    }

    fn device() -> (tempfile::TempDir, Emulator, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let emulator = Emulator::new(dir.path().join("devices"));
        let path = emulator.create_device("main", Some("satoshi")).unwrap();
        (dir, emulator, path)
    }

    #[test]
    fn missing_directory_has_no_devices() {
        let dir = tempfile::tempdir().unwrap();
        let mut emulator = Emulator::new(dir.path().join("nothing here"));
        assert!(emulator.enumerate().unwrap().is_empty());
    }

    #[test]
    fn enumerates_state_files_in_order() {
        let (_dir, mut emulator, main) = device();
        let other = emulator.create_device("backup", None).unwrap();
        fs::write(emulator.dir().join("notes.txt"), "not a device").unwrap();

        assert_eq!(emulator.enumerate().unwrap(), vec![other, main]);
    }

    #[test]
    fn devices_are_not_overwritten() {
        let (_dir, emulator, path) = device();
        let before = fs::read(&path).unwrap();

        assert!(emulator.create_device("main", None).is_err());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn device_names_stay_in_the_directory() {
        let (_dir, emulator, _) = device();
        for name in ["", ".", "..", "../escape", "a/b"].iter() {
            assert!(emulator.create_device(name, None).is_err(), "accepted {:?}", name);
        }
    }

    #[test]
    fn opened_device_is_busy_until_dropped() {
        let (_dir, mut emulator, path) = device();

        let client = ready(emulator.open(&path).unwrap());
        assert_eq!(client.features().label.as_deref(), Some("satoshi"));
        assert!(matches!(emulator.open(&path).unwrap(), Opened::Busy));

        drop(client);
        ready(emulator.open(&path).unwrap());
    }

    #[test]
    fn broken_state_releases_the_lock() {
        let (_dir, mut emulator, path) = device();
        fs::write(&path, "{}").unwrap();

        assert!(emulator.open(&path).is_err());
        assert!(!path.with_extension(LOCK_EXTENSION).exists());
    }

    #[test]
    fn cipher_key_value_round_trip() {
        let (_dir, mut emulator, path) = device();
        let mut client = ready(emulator.open(&path).unwrap());
        let value = [7u8; 32];

        let encrypted = client.encrypt_keyvalue(&[10, 0], "drive", &value, CipherFlags::ENCFS).unwrap();
        assert_eq!(encrypted.len(), value.len());
        assert_ne!(&encrypted[..], &value[..]);

        let decrypted =
            client.decrypt_keyvalue(&[10, 0], "drive", &encrypted, CipherFlags::ENCFS).unwrap();
        assert_eq!(&decrypted[..], &value[..]);
    }

    #[test]
    fn key_survives_reopening() {
        let (_dir, mut emulator, path) = device();
        let value = [1u8; 16];

        let encrypted = ready(emulator.open(&path).unwrap())
            .encrypt_keyvalue(&[10, 0], "drive", &value, CipherFlags::ENCFS)
            .unwrap();
        let decrypted = ready(emulator.open(&path).unwrap())
            .decrypt_keyvalue(&[10, 0], "drive", &encrypted, CipherFlags::ENCFS)
            .unwrap();

        assert_eq!(&decrypted[..], &value[..]);
    }

    #[test]
    fn everything_is_bound_into_the_key() {
        let (_dir, mut emulator, path) = device();
        let mut client = ready(emulator.open(&path).unwrap());
        let value = [0u8; 16];
        let flags = CipherFlags::ENCFS;
        let other_flags = CipherFlags { ask_on_encrypt: true, ask_on_decrypt: true };

        let reference = client.encrypt_keyvalue(&[10, 0], "drive", &value, flags).unwrap();
        let variants = vec![
            client.encrypt_keyvalue(&[10, 1], "drive", &value, flags).unwrap(),
            client.encrypt_keyvalue(&[10], "drive", &value, flags).unwrap(),
            client.encrypt_keyvalue(&[10, 0], "drivE", &value, flags).unwrap(),
            client.encrypt_keyvalue(&[10, 0], "drive", &value, other_flags).unwrap(),
        ];
        for variant in variants {
            assert_ne!(variant, reference);
        }

        let other_device = emulator.create_device("other", None).unwrap();
        let mut other_client = ready(emulator.open(&other_device).unwrap());
        assert_ne!(
            other_client.encrypt_keyvalue(&[10, 0], "drive", &value, flags).unwrap(),
            reference
        );
    }

    #[test]
    fn rejects_what_the_device_rejects() {
        let (_dir, mut emulator, path) = device();
        let mut client = ready(emulator.open(&path).unwrap());
        let flags = CipherFlags::ENCFS;

        assert!(client.encrypt_keyvalue(&[10, 0], "drive", &[0u8; 20], flags).is_err());
        assert!(client.encrypt_keyvalue(&[10, 0], "drive", &[], flags).is_err());
        assert!(client.decrypt_keyvalue(&[10, 0], "drive", &[0u8; 15], flags).is_err());

        let error = client.get_entropy(MAX_ENTROPY + 1).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::DeviceOperationFailed { operation: "get_entropy", .. })
        ));
    }

    #[test]
    fn entropy_is_fresh() {
        let (_dir, mut emulator, path) = device();
        let mut client = ready(emulator.open(&path).unwrap());

        let first = client.get_entropy(32).unwrap();
        let second = client.get_entropy(32).unwrap();

        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn state_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, _emulator, path) = device();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

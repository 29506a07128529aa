//! The device, as seen by this program.
//!
//! How messages reach a KeepKey is not our business: a [`Transport`] lists the devices it can
//! reach and opens them, an opened device is a [`Client`] offering the handful of operations
//! the getpass flow needs. Sensitive operations may block until the operator confirms them
//! on the device.

use core::fmt;

use zeroize::Zeroizing;

use crate::Result;

/// Derivation path of the key protecting EncFS passwords.
pub const ENCFS_DERIVATION_PATH: [u32; 2] = [10, 0];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// The two switches of KeepKey's `CipherKeyValue` operation.
///
/// They select whether the device asks for confirmation when encrypting or decrypting, and are
/// mixed into the derived key: a value encrypted with one pair of flags only decrypts with the
/// same pair.
pub struct CipherFlags {
    pub ask_on_encrypt: bool,
    pub ask_on_decrypt: bool,
}

impl CipherFlags {
    /// Flags used for EncFS passwords: silent encryption, confirmed decryption.
    pub const ENCFS: Self = Self { ask_on_encrypt: false, ask_on_decrypt: true };
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
/// What a device reports about itself when opened.
pub struct Features {
    /// User-assigned device name, if any
    pub label: Option<String>,
}

/// Outcome of opening a device that is present.
///
/// A device held by another process is an expected condition, not an error.
pub enum Opened<C> {
    Ready(C),
    Busy,
}

/// Discovers and opens devices.
pub trait Transport {
    /// Handle of a present, not yet opened device
    type Device: fmt::Debug;
    /// Session with an opened device
    type Client: Client;

    fn enumerate(&mut self) -> Result<Vec<Self::Device>>;

    /// Opens `device` for exclusive use. Dropping the client releases it.
    fn open(&mut self, device: &Self::Device) -> Result<Opened<Self::Client>>;
}

/// Session with an opened device.
pub trait Client {
    fn features(&self) -> &Features;

    /// Returns `size` bytes from the device RNG.
    fn get_entropy(&mut self, size: usize) -> Result<Vec<u8>>;

    /// Encrypts `value` with the key derived for `path`, bound to `key`.
    fn encrypt_keyvalue(
        &mut self,
        path: &[u32],
        key: &str,
        value: &[u8],
        flags: CipherFlags,
    ) -> Result<Vec<u8>>;

    /// Inverse of [`Client::encrypt_keyvalue`], given the same `path`, `key` and `flags`.
    fn decrypt_keyvalue(
        &mut self,
        path: &[u32],
        key: &str,
        value: &[u8],
        flags: CipherFlags,
    ) -> Result<Zeroizing<Vec<u8>>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Clone, Debug, Default)]
    pub struct Calls {
        pub get_entropy: usize,
        pub encrypt: usize,
        pub decrypt: usize,
        pub flags: Vec<CipherFlags>,
    }

    pub struct MockDevice {
        pub name: &'static str,
        pub label: Option<&'static str>,
        pub busy: bool,
    }

    impl MockDevice {
        pub fn new(name: &'static str, label: Option<&'static str>) -> Self {
            Self { name, label, busy: false }
        }

        pub fn busy(name: &'static str) -> Self {
            Self { name, label: None, busy: true }
        }
    }

    /// Transport over a fixed set of devices; the first `empty_enumerations` calls to
    /// `enumerate` find nothing.
    pub struct MockTransport {
        pub devices: Vec<MockDevice>,
        pub empty_enumerations: usize,
        pub enumerations: usize,
        pub entropy: Vec<u8>,
        pub calls: Rc<RefCell<Calls>>,
    }

    impl MockTransport {
        pub fn new(devices: Vec<MockDevice>) -> Self {
            Self {
                devices,
                empty_enumerations: 0,
                enumerations: 0,
                entropy: vec![0x42; 32],
                calls: Rc::default(),
            }
        }
    }

    impl Transport for MockTransport {
        type Device = &'static str;
        type Client = MockClient;

        fn enumerate(&mut self) -> Result<Vec<&'static str>> {
            self.enumerations += 1;
            if self.enumerations <= self.empty_enumerations {
                return Ok(Vec::new());
            }
            Ok(self.devices.iter().map(|device| device.name).collect())
        }

        fn open(&mut self, name: &&'static str) -> Result<Opened<MockClient>> {
            let device = self
                .devices
                .iter()
                .find(|device| device.name == *name)
                .ok_or_else(|| anyhow::anyhow!("unplugged: {}", name))?;
            if device.busy {
                return Ok(Opened::Busy);
            }
            Ok(Opened::Ready(MockClient {
                name: device.name,
                features: Features { label: device.label.map(String::from) },
                entropy: self.entropy.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    /// Encrypts by XOR-ing with the cycled key (and a constant), so it inverts itself and
    /// depends on the key.
    #[derive(Debug)]
    pub struct MockClient {
        pub name: &'static str,
        pub features: Features,
        pub entropy: Vec<u8>,
        pub calls: Rc<RefCell<Calls>>,
    }

    impl MockClient {
        fn transform(key: &str, value: &[u8]) -> Vec<u8> {
            let key = key.as_bytes();
            value
                .iter()
                .enumerate()
                .map(|(i, byte)| {
                    let k = if key.is_empty() { 0 } else { key[i % key.len()] };
                    byte ^ k ^ 0x5a
                })
                .collect()
        }
    }

    impl Client for MockClient {
        fn features(&self) -> &Features {
            &self.features
        }

        fn get_entropy(&mut self, size: usize) -> Result<Vec<u8>> {
            self.calls.borrow_mut().get_entropy += 1;
            Ok(self.entropy.iter().copied().take(size).collect())
        }

        fn encrypt_keyvalue(
            &mut self,
            _path: &[u32],
            key: &str,
            value: &[u8],
            flags: CipherFlags,
        ) -> Result<Vec<u8>> {
            let mut calls = self.calls.borrow_mut();
            calls.encrypt += 1;
            calls.flags.push(flags);
            Ok(Self::transform(key, value))
        }

        fn decrypt_keyvalue(
            &mut self,
            _path: &[u32],
            key: &str,
            value: &[u8],
            flags: CipherFlags,
        ) -> Result<Zeroizing<Vec<u8>>> {
            let mut calls = self.calls.borrow_mut();
            calls.decrypt += 1;
            calls.flags.push(flags);
            Ok(Zeroizing::new(Self::transform(key, value)))
        }
    }
}

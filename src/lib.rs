//! # KeepKey as a hardware key for EncFS.
//!
//! This crate implements an external password program for [EncFS][encfs]: the password of an
//! encrypted directory is generated with the help of a KeepKey, stored next to the encrypted
//! data in encrypted form, and only ever decrypted by the device.
//!
//! ```text
//! encfs --standard --extpass=keepkey-encfs ~/.crypt ~/crypt
//! ```
//!
//! EncFS runs the program with the `encfs_root` environment variable set to the encrypted root
//! directory. On the first run, a `password.dat` record is created there:
//! - the device is asked for 32 bytes of entropy, the host draws another 32 bytes
//! - the password is the SHA-256 digest of both, so neither random source has to be trusted alone
//! - the device encrypts the password, bound to a label and a derivation path
//!
//! On every run (the first one included), the device decrypts the record and the password is
//! written to standard output, the only thing this program ever writes there. Prompts, menus and
//! logs go to standard error.
//!
//! The device itself is an injected collaborator (see [`device::Transport`] and
//! [`device::Client`]). The [`platform`] module contains the PC side: a host RNG and an emulated
//! KeepKey, keeping its secret in a state file, which allows running the whole flow without
//! hardware.
//!
//! [encfs]: https://vgough.github.io/encfs/

/// Errors are propagated through `anyhow`, the typed kinds in [`error::Error`] can be recovered
/// with `downcast_ref`.
pub use anyhow::Result;

pub mod cli;
pub mod console;
pub mod device;
pub mod error;
pub mod getpass;
pub mod platform;
pub mod record;
pub mod selection;

pub use error::Error;

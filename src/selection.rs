//! Finding a device and picking one.

use std::io::{BufRead, Write};

use log::{debug, info};

use crate::{
    console::Console,
    device::{Client, Opened, Transport},
    Error, Result,
};

const RULER: &str = "----------------------------\n";

/// Enumerates devices until at least one is present.
///
/// Each empty enumeration asks the operator to plug in a device and waits for Enter.
/// Fails with [`Error::NoDeviceFound`] only if standard input is closed.
pub fn wait_for_devices<T, R, W>(
    transport: &mut T,
    console: &mut Console<R, W>,
) -> Result<Vec<T::Device>>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    let mut devices = transport.enumerate()?;
    while devices.is_empty() {
        debug!("no device found, waiting for the operator");
        if let Err(error) =
            console.prompt("Please connect KeepKey to computer and press Enter...", "a device")
        {
            return match error.downcast_ref::<Error>() {
                Some(Error::UnexpectedEof(_)) => Err(Error::NoDeviceFound.into()),
                _ => Err(error),
            };
        }
        devices = transport.enumerate()?;
    }

    info!("found {} device(s)", devices.len());
    Ok(devices)
}

/// Opens the device to use.
///
/// A single device is used directly. With several, the available ones are listed with their
/// labels and the operator picks one by number; busy devices are shown but not numbered.
/// Devices opened for the listing and not chosen are released on return.
pub fn choose_device<T, R, W>(
    transport: &mut T,
    devices: Vec<T::Device>,
    console: &mut Console<R, W>,
) -> Result<T::Client>
where
    T: Transport,
    R: BufRead,
    W: Write,
{
    if devices.is_empty() {
        return Err(Error::NoDeviceFound.into());
    }

    if devices.len() == 1 {
        return match transport.open(&devices[0])? {
            Opened::Ready(client) => {
                info!("using {:?}", &devices[0]);
                Ok(client)
            }
            Opened::Busy => Err(Error::DeviceBusy.into()),
        };
    }

    let mut menu = String::from(RULER);
    menu.push_str("Available devices:\n");
    let mut available = Vec::with_capacity(devices.len());
    for device in devices.iter() {
        match transport.open(device)? {
            Opened::Busy => {
                debug!("{:?} is busy", device);
                menu.push_str("[-] <device is currently in use>\n");
            }
            Opened::Ready(client) => {
                let entry = match client.features().label.as_deref() {
                    Some(label) if !label.is_empty() => format!("[{}] {}\n", available.len(), label),
                    _ => format!("[{}] <no label>\n", available.len()),
                };
                menu.push_str(&entry);
                available.push((device, client));
            }
        }
    }
    menu.push_str(RULER);
    console.message(&menu)?;

    if available.is_empty() {
        return Err(Error::DeviceBusy.into());
    }

    let answer = console.prompt("Please choose device to use: ", "a device number")?;
    let index = answer
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|index| *index < available.len())
        .ok_or_else(|| Error::InvalidSelection(answer.clone()))?;

    let (device, client) = available.swap_remove(index);
    info!("using {:?}", device);
    Ok(client)
}

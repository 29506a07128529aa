use core::convert::TryFrom;
use std::path::PathBuf;

use anyhow::{Error, Result};
use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use log::LevelFilter;

use crate::getpass::{Command, GetPass, InitEmulator, OutputFormat};

const ABOUT: &str = "
Use a KeepKey as hardware key for EncFS.

Meant to be run by EncFS, which sets `encfs_root`:

    encfs --standard --extpass=keepkey-encfs ~/.crypt ~/crypt

On first use of a root, a new password is generated with the help of the KeepKey and stored,
encrypted by the device, in <root>/password.dat. The password is printed to standard output,
everything else goes to standard error.

The password is printed as hexadecimal digits. Volumes created with the earlier
encfs_aes_getpass.py script used the raw password bytes: mount those with --raw.
";

/// Directory of emulated devices, relative to `$HOME`, if none is given
const DEFAULT_DEVICE_DIR: &str = ".keepkey-emulator";

pub fn app() -> clap::App<'static, 'static> {

    let app = App::new("keepkey-encfs")
        .version(crate_version!())
        .about(ABOUT)

        .arg(Arg::with_name("ROOT")
             .short("r")
             .long("root")
             .env("encfs_root")
             .value_name("DIR")
             .help("EncFS root directory, holding password.dat")
             .required(false)
        )

        .arg(Arg::with_name("DEVICE-DIR")
             .short("d")
             .long("device-dir")
             .env("KEEPKEY_EMULATOR_DIR")
             .value_name("DIR")
             .help("directory of emulated KeepKeys [default: $HOME/.keepkey-emulator]")
             .required(false)
             .global(true)
        )

        .arg(Arg::with_name("raw")
             .long("raw")
             .help("print the raw password bytes instead of hexadecimal digits")
        )

        .arg(Arg::with_name("verbose")
             .short("v")
             .long("verbose")
             .multiple(true)
             .global(true)
             .help("log more to standard error (repeat for even more)")
        )

        .subcommand(SubCommand::with_name("emulator-init")
            .about("create an emulated KeepKey in the device directory")
            .arg(Arg::with_name("NAME")
                 .help("file name of the new device, e.g. main")
                 .value_name("NAME")
                 .required(true)
             )
            .arg(Arg::with_name("label")
                 .short("l")
                 .long("label")
                 .help("label the device reports, e.g. \"my keepkey\"")
                 .value_name("LABEL")
                 .required(false)
             )
        )
    ;

    app

}

/// Log level from the number of `-v` flags: warnings only by default.
pub fn verbosity(args: &ArgMatches<'_>) -> LevelFilter {
    let mut occurrences = args.occurrences_of("verbose");
    if let (_, Some(command)) = args.subcommand() {
        occurrences = occurrences.max(command.occurrences_of("verbose"));
    }
    match occurrences {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn device_dir(args: &ArgMatches<'_>) -> Result<PathBuf> {
    if let Some(dir) = args.value_of_os("DEVICE-DIR").filter(|dir| !dir.is_empty()) {
        return Ok(dir.into());
    }
    let home = std::env::var_os("HOME")
        .ok_or_else(|| anyhow::anyhow!("no device directory given, and HOME is not set"))?;
    Ok(PathBuf::from(home).join(DEFAULT_DEVICE_DIR))
}

impl TryFrom<&'_ clap::ArgMatches<'static>> for Command {
    type Error = Error;
    fn try_from(args: &clap::ArgMatches<'static>) -> Result<Self> {
        if let Some(command) = args.subcommand_matches("emulator-init") {
            return Ok(Command::InitEmulator(InitEmulator {
                device_dir: device_dir(command)?,
                name: command.value_of("NAME").unwrap().into(),
                label: command.value_of("label").map(String::from),
            }));
        }

        // an empty root would put password.dat in the working directory
        let root = args.value_of_os("ROOT").filter(|root| !root.is_empty()).ok_or_else(|| {
            anyhow::anyhow!("no EncFS root given, pass --root or set encfs_root")
        })?;
        let output = if args.is_present("raw") { OutputFormat::Raw } else { OutputFormat::Hex };

        Ok(Command::GetPass(GetPass {
            root: root.into(),
            device_dir: device_dir(args)?,
            output,
        }))
    }
}

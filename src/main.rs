use core::convert::TryFrom;

use anyhow::Result;
use log::{info, LevelFilter};

use keepkey_encfs::{
    cli,
    console::Console,
    getpass::{self, Command},
    platform::{self, emulator::Emulator},
    record::RecordStore,
};

fn main() -> Result<()> {

    let args = init_app();
    init_logger(cli::verbosity(&args))?;

    let command = Command::try_from(&args)?;

    match command {
        Command::GetPass(parameters) => {
            info!("getpass for {}", parameters.root.display());
            let platform::Platform { mut transport, rng } =
                platform::init_platform(&parameters.device_dir)?;
            let store = RecordStore::in_root(&parameters.root);
            let mut console = Console::stdio();

            let password = getpass::run(&mut transport, rng, &store, &mut console)?;

            // the one line EncFS reads
            password.write_line(&mut std::io::stdout(), parameters.output)?;
        }
        Command::InitEmulator(parameters) => {
            let emulator = Emulator::new(&parameters.device_dir);
            let path = emulator.create_device(&parameters.name, parameters.label.as_deref())?;

            eprintln!("Created emulated KeepKey {}", path.display());
        }
    }

    Ok(())
}

pub fn init_app() -> clap::ArgMatches<'static> {
    let app = cli::app();
    let matches = app.get_matches();
    matches
}

/// Logs go to standard error, standard output is reserved for the password.
pub fn init_logger(level: LevelFilter) -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .map_err(|error| anyhow::anyhow!("cannot set up logging: {}", error))
}

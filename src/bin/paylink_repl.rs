use std::{error::Error, io, process};

use clap::Parser;
use paylink::{
    Command,
    cli::{CliError, describe},
    prompt,
    protocol::{DEFAULT_BAUD_RATE, PaymentTerminal, SerialPortProvider, StrictCodec},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Serial device to open on start
    device: Option<String>,
    /// Serial line speed
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Verify length and checksum of replies
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let terminal = PaymentTerminal::new(SerialPortProvider::new(cli.baud));
    let terminal = if cli.strict {
        terminal.with_codec(StrictCodec)
    } else {
        terminal
    };

    let canceller = terminal.canceller();
    ctrlc::set_handler(move || {
        if !canceller.is_busy() {
            process::exit(130);
        }
        eprintln!("{}", canceller.cancel().message);
    })?;

    println!("Ctrl-C cancels the running command or quits when idle, .exit quits.");
    if let Some(device) = &cli.device {
        println!("{}", terminal.open(device).message);
    }

    let stdio = io::stdin();
    let stdout = io::stdout();

    loop {
        let cmd = match prompt(stdio.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(CliError::Io(e)) => return Err(e.into()),
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => {
                if terminal.is_open() {
                    println!("{}", terminal.close().message);
                }
                break;
            }
            Command::Devices => match terminal.list_devices() {
                Ok(devices) if devices.is_empty() => println!("No serial devices found"),
                Ok(devices) => devices.iter().for_each(|d| println!("{d}")),
                Err(e) => eprintln!("device error: {e}"),
            },
            Command::Open(device) => println!("{}", terminal.open(&device).message),
            Command::Close => println!("{}", terminal.close().message),
            Command::Send(request) => match terminal.send(request) {
                Ok(resp) => println!("{}", describe(&resp)),
                Err(e) => eprintln!("command error: {e}"),
            },
        }
    }

    Ok(())
}

use std::{error::Error, num::ParseIntError, time::Duration};

use clap::{Parser, Subcommand};
use log::info;
use paylink::{
    cli::describe,
    protocol::{
        DEFAULT_BAUD_RATE, DEFAULT_MAX_READ, PaymentTerminal, SerialPortProvider, SessionConfig,
        StrictCodec,
    },
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Serial line speed
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Longest a single read may wait, in milliseconds
    #[arg(long, default_value_t = 500)]
    read_attempt_ms: u64,
    /// Pause between reads, in milliseconds
    #[arg(long, default_value_t = 50)]
    idle_delay_ms: u64,
    /// Most bytes taken from the port per read
    #[arg(long, default_value_t = DEFAULT_MAX_READ)]
    max_read: usize,
    /// Verify length and checksum of replies
    #[arg(long)]
    strict: bool,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// List serial devices
    Devices,
    /// Send a single command and print the reply
    Send {
        /// Serial device, e.g. /dev/ttyACM0 or COM3
        device: String,
        /// Request tag as two hex digits (F1 handshake, 01 cashier, C1 cancel)
        tag: String,
        /// Request content, sent as-is
        #[arg(default_value = "")]
        content: String,
        /// Sequence number, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_sequence)]
        sequence: Option<u32>,
        /// Overall deadline in milliseconds
        #[arg(long, default_value_t = 20_000)]
        timeout_ms: u64,
    },
}

fn parse_sequence(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = SessionConfig {
        read_attempt: Duration::from_millis(cli.read_attempt_ms),
        idle_delay: Duration::from_millis(cli.idle_delay_ms),
        max_read: cli.max_read.max(1),
        ..SessionConfig::default()
    };
    let terminal = PaymentTerminal::new(SerialPortProvider::new(cli.baud)).with_config(config);
    let terminal = if cli.strict {
        terminal.with_codec(StrictCodec)
    } else {
        terminal
    };

    match cli.action {
        Action::Devices => {
            let devices = terminal.list_devices()?;
            if devices.is_empty() {
                println!("No serial devices found");
            }
            for device in devices {
                println!("{device}");
            }
        }
        Action::Send {
            device,
            tag,
            content,
            sequence,
            timeout_ms,
        } => {
            let canceller = terminal.canceller();
            ctrlc::set_handler(move || {
                eprintln!("{}", canceller.cancel().message);
            })?;

            terminal.connect(&device)?;
            let res = terminal.send_command(
                &tag,
                content.as_bytes(),
                sequence,
                Some(Duration::from_millis(timeout_ms)),
            );
            info!("{}", terminal.close().message);

            let resp = res?;
            println!("{}", describe(&resp));
            if !resp.is_success() {
                return Err(resp.message().into());
            }
        }
    }

    Ok(())
}

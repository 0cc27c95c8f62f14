use anyhow::Result;
use clap::{Parser, Subcommand};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

use fme_hal_lib::command::catalog::Command;
use fme_hal_lib::protocol::AddressSelector;

#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("invalid invocation '{0}', expected NAME or NAME=ARG")]
    BadSyntax(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// A catalog command with its optional runtime argument.
#[derive(Debug)]
pub struct Invocation {
    pub command: Command,
    pub arg: Option<String>,
}

impl FromStr for Invocation {
    type Err = InvocationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^([-_[:alnum:]]+)(?:=(.*))?$").unwrap();
        }

        let c = RE
            .captures(input)
            .ok_or_else(|| InvocationError::BadSyntax(input.to_string()))?;
        let name = c.get(1).unwrap().as_str();

        Ok(Invocation {
            command: name
                .parse()
                .map_err(|_| InvocationError::UnknownCommand(name.to_string()))?,
            arg: c.get(2).map(|m| m.as_str().to_string()),
        })
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}={}", self.command, arg),
            None => write!(f, "{}", self.command),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// UART device
    #[clap(long, short, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 9600)]
    pub baudrate: u32,

    /// Put the UART into RS-485 mode
    #[clap(long)]
    pub rs485: bool,

    /// Board power-up delay after opening the port, ms
    #[clap(long, default_value_t = 3000)]
    pub open_pause: u64,

    /// Attempts for commands that poll a status bit (0 = no retry wrapper)
    #[clap(long, short, default_value_t = 0)]
    pub retries: usize,

    /// Operation timeout applied to each retried attempt, ms
    #[clap(long, default_value_t = 10000)]
    pub retry_delay: u64,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List known commands
    List { board: Option<AddressSelector> },

    /// Run catalog commands in order, stopping at the first failure
    Exec {
        #[clap(required = true)]
        invocations: Vec<Invocation>,
    },

    /// Send a raw opcode to a board
    Raw {
        board: AddressSelector,
        opcode: String,
        /// Acknowledgment timeout, ms
        #[clap(long, short, default_value_t = 8000)]
        wait: u64,
    },

    /// Read a board's status string
    Status { board: AddressSelector },

    /// Reset the serial board and cycle the picker track twice
    Selftest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_invocation() {
        let inv: Invocation = "TRACK_OPEN".parse().unwrap();
        assert_eq!(inv.command, Command::TrackOpen);
        assert_eq!(inv.arg, None);

        let inv: Invocation = "send-text=HELLO WORLD".parse().unwrap();
        assert_eq!(inv.command, Command::SendText);
        assert_eq!(inv.arg.as_deref(), Some("HELLO WORLD"));
        assert_eq!(inv.to_string(), "SEND_TEXT=HELLO WORLD");

        let inv: Invocation = "SET_EEPROM_POINTER=".parse().unwrap();
        assert_eq!(inv.arg.as_deref(), Some(""));
    }

    #[test]
    fn reject_bad_invocation() {
        assert!(matches!(
            "=HELLO".parse::<Invocation>(),
            Err(InvocationError::BadSyntax(_))
        ));
        assert!(matches!(
            "FLY_AWAY".parse::<Invocation>(),
            Err(InvocationError::UnknownCommand(_))
        ));
    }

    #[test]
    fn parse_cli() {
        let cli = Cli::try_parse_from(&[
            "fme-hal", "-p", "/dev/ttyS1", "-r", "3", "exec", "RESET", "SEND_TEXT=HI",
        ])
        .unwrap();

        assert_eq!(cli.port, "/dev/ttyS1");
        assert_eq!(cli.baudrate, 9600);
        assert_eq!(cli.retries, 3);
        match cli.command {
            Commands::Exec { invocations } => assert_eq!(invocations.len(), 2),
            c => panic!("unexpected {:?}", c),
        }
    }
}

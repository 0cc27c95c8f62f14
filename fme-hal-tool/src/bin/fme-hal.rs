pub mod cli;

use std::io;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use itertools::Itertools;
use json::JsonValue;
use log::error;

use fme_hal_lib::command::catalog::{self, Command};
use fme_hal_lib::command::{CommandSpec, Executor, RetryPolicy};
use fme_hal_lib::port::{Port, PortConfig};
use fme_hal_lib::protocol::{AddressSelector, Response};

use cli::{Cli, Commands, Invocation};

#[derive(Clone, Copy)]
enum OutputFormat {
    Plain,
    Json,
}

const SELFTEST: &[Command] = &[
    Command::Reset,
    Command::TrackOpen,
    Command::TrackClose,
    Command::TrackOpen,
    Command::TrackClose,
];

fn response_to_json(label: &str, board: AddressSelector, r: &Response) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["command"] = label.into();
    obj["board"] = board.to_string().into();
    obj["text"] = r.text.as_deref().map(str::trim).into();
    obj["valid"] = r.valid.into();
    obj["error"] = r.error.map(|e| e.to_string()).into();
    obj
}

fn format_results(results: &[(String, AddressSelector, Response)], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Plain => results
            .iter()
            .map(|(label, _, r)| format!("{}: {}", label, r.text().trim()))
            .join("\n"),
        OutputFormat::Json => json::stringify(
            results
                .iter()
                .map(|(label, board, r)| response_to_json(label, *board, r))
                .collect::<Vec<_>>(),
        ),
    }
}

fn cmd_list(board: Option<AddressSelector>, fmt: OutputFormat) -> Result<String> {
    let commands = catalog::list_commands(board);

    Ok(match fmt {
        OutputFormat::Plain => commands
            .iter()
            .map(|c| {
                let spec = c.spec();
                match spec.status_bit {
                    Some(bit) => format!(
                        "{:<6} {:<6} bit {:<2} {}",
                        spec.address, spec.opcode, bit, c
                    ),
                    None => format!("{:<6} {:<6} {:<6} {}", spec.address, spec.opcode, "", c),
                }
            })
            .join("\n"),
        OutputFormat::Json => json::stringify(
            commands
                .iter()
                .map(|c| {
                    let spec = c.spec();
                    let mut obj = JsonValue::new_object();
                    obj["name"] = c.name().into();
                    obj["board"] = spec.address.to_string().into();
                    obj["opcode"] = spec.opcode.into();
                    obj["status_bit"] = spec.status_bit.into();
                    obj["reset"] = spec.reset_opcodes.into();
                    obj
                })
                .collect::<Vec<_>>(),
        ),
    })
}

fn run_invocations(
    executor: &mut Executor,
    policy: &RetryPolicy,
    invocations: &[Invocation],
) -> Result<Vec<(String, AddressSelector, Response)>> {
    let mut results = Vec::new();

    for inv in invocations {
        let spec = inv
            .command
            .bind(inv.arg.as_deref())
            .with_context(|| format!("Can't prepare {}", inv))?;
        let r = policy.run(executor, &spec);

        if !r.success() {
            return Err(anyhow!("{} failed: {}", inv, r));
        }
        results.push((inv.to_string(), spec.address, r));
    }

    Ok(results)
}

fn cmd_exec(
    executor: &mut Executor,
    policy: &RetryPolicy,
    invocations: &[Invocation],
    fmt: OutputFormat,
) -> Result<String> {
    run_invocations(executor, policy, invocations).map(|results| format_results(&results, fmt))
}

fn cmd_raw(
    executor: &mut Executor,
    board: AddressSelector,
    opcode: &str,
    wait: u64,
    fmt: OutputFormat,
) -> Result<String> {
    let r = executor.execute(&CommandSpec::new(board, opcode).wait(wait));
    if !r.success() {
        return Err(anyhow!("{} {:?} failed: {}", board, opcode, r));
    }
    Ok(format_results(&[(opcode.to_string(), board, r)], fmt))
}

fn cmd_status(executor: &mut Executor, board: AddressSelector, fmt: OutputFormat) -> Result<String> {
    let r = executor.status(board);
    if !r.success() {
        return Err(anyhow!("Failed to read {} status: {}", board, r));
    }

    Ok(match fmt {
        OutputFormat::Plain => format!(
            "{}\nset bits: {}",
            r.text().trim(),
            r.set_bits().iter().join(" ")
        ),
        OutputFormat::Json => {
            let mut obj = response_to_json("S", board, &r);
            obj["bits"] = r.set_bits().into();
            json::stringify(obj)
        }
    })
}

fn cmd_selftest(executor: &mut Executor, policy: &RetryPolicy, fmt: OutputFormat) -> Result<String> {
    let invocations: Vec<_> = SELFTEST
        .iter()
        .map(|&command| Invocation { command, arg: None })
        .collect();

    cmd_exec(executor, policy, &invocations, fmt)
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut Cli::command(), "fme-hal", &mut io::stdout());

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    catalog::validate().context("Command catalog is misconfigured")?;

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    match cli.command {
        Commands::List { board } => cmd_list(board, fmt),
        _ => {
            let config = PortConfig {
                port_name: cli.port.clone(),
                baudrate: cli.baudrate,
                force: cli.force,
                rs485: cli.rs485,
                open_pause: Duration::from_millis(cli.open_pause),
                ..Default::default()
            };
            let selector_timeout = config.selector_timeout;
            let policy = RetryPolicy {
                retries: cli.retries,
                delay: Duration::from_millis(cli.retry_delay),
            };

            let mut port = Port::new(config);
            if !port.open() {
                return Err(anyhow!("Can't open port '{}'", cli.port));
            }

            let res = {
                let mut executor = Executor::new(&mut port).with_selector_timeout(selector_timeout);
                let executor = &mut executor;

                match cli.command {
                    Commands::Exec { invocations } => cmd_exec(executor, &policy, &invocations, fmt),
                    Commands::Raw {
                        board,
                        opcode,
                        wait,
                    } => cmd_raw(executor, board, &opcode, wait, fmt),
                    Commands::Status { board } => cmd_status(executor, board, fmt),
                    Commands::Selftest => cmd_selftest(executor, &policy, fmt),
                    _ => Err(anyhow!("unexpected command (this is a bug!)")),
                }
            };

            port.close();
            res
        }
    }
}

fn main() {
    match do_main() {
        Ok(s) => println!("{}", s),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

// Copyright 2026 flashproto contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{crate_version, App, AppSettings, Arg, SubCommand};
use indicatif::{ProgressBar, ProgressStyle};

use flashproto::session::ProgressPhase;
use flashproto::{BaudPolicy, Session};

#[cfg(unix)]
const DEFAULT_PORT: &str = "/dev/ttyACM0";
#[cfg(windows)]
const DEFAULT_PORT: &str = "COM3";

fn main() -> Result<()> {
    let app = App::new("flashproto")
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .version(crate_version!())
        .about("Flashing client for the INSYNC/EOC serial bootloader")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .default_value(DEFAULT_PORT)
                .global(true)
                .help("Serial port to use"),
        )
        .arg(
            Arg::with_name("baud")
                .short("b")
                .long("baud")
                .default_value("auto")
                .global(true)
                .help("Baud rate, or `auto` to probe the detection ladder"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity, -v (debug), -vv (trace)"),
        )
        .subcommand(SubCommand::with_name("list-ports").about("List available serial ports"))
        .subcommand(SubCommand::with_name("identify").about("Connect and print device identity"))
        .subcommand(SubCommand::with_name("erase").about("Connect and erase the firmware region"))
        .subcommand(
            SubCommand::with_name("program")
                .about("Connect, erase, program and verify a firmware image")
                .arg(
                    Arg::with_name("FILE")
                        .required(true)
                        .takes_value(true)
                        .help("Firmware binary to program"),
                ),
        )
        .subcommand(SubCommand::with_name("boot").about("Connect and boot the application"));

    let matches = app.get_matches();

    init_logger(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u64::MAX => log::LevelFilter::Trace,
    })?;

    if let Some(_m) = matches.subcommand_matches("list-ports") {
        for port in flashproto::list_ports().context("Couldn't list serial ports")? {
            println!("- `{port}`");
        }
        return Ok(());
    }

    let port = matches.value_of("port").unwrap();
    let baud = parse_baud(matches.value_of("baud").unwrap())?;

    let mut session = Session::new();
    log::info!("Connecting to `{port}`");
    session
        .connect(port, baud, &mut || {})
        .with_context(|| format!("Couldn't connect on `{port}`"))?;
    log::info!("Synchronized at {} baud", session.baud_rate().unwrap_or(0));

    let result = match matches.subcommand() {
        ("identify", Some(_)) => print_identity(&session),
        ("erase", Some(_)) => run_erase(&mut session),
        ("program", Some(m)) => run_program(&mut session, m.value_of("FILE").unwrap()),
        ("boot", Some(_)) => run_boot(&mut session),
        _ => unreachable!("clap requires a subcommand"),
    };

    session.disconnect();
    result
}

fn parse_baud(s: &str) -> Result<BaudPolicy> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(BaudPolicy::Auto);
    }
    s.parse::<u32>()
        .map(BaudPolicy::Fixed)
        .with_context(|| format!("Invalid baud rate `{s}`, expected `auto` or a number"))
}

fn print_identity(session: &Session) -> Result<()> {
    let identity = session.identity();

    if let Some(udid) = identity.udid {
        println!("UDID: {}", flashproto::identity::udid_to_string(&udid));
    }
    if let Some(fw_size) = identity.fw_size {
        println!("Firmware region size: {fw_size} bytes");
    }
    print_field("Bootloader revision", &identity.bl_rev);
    print_field("Board ID", &identity.board_id);
    print_field("Serial number", &identity.serial_number);
    print_field("Hardware revision", &identity.hw_rev);
    print_field("Description", &identity.description);

    println!("Flash sectors: {}", identity.sectors.len());
    for sector in &identity.sectors {
        println!(
            "  #{:<3} {:#010X}-{:#010X} {:>4}K r{}w{}e{}",
            sector.index,
            sector.start_addr,
            sector.end_addr,
            sector.size_kb,
            if sector.readable { "+" } else { "-" },
            if sector.writable { "+" } else { "-" },
            if sector.erasable { "+" } else { "-" },
        );
    }

    for warning in &identity.warnings {
        log::warn!("{warning}");
    }

    Ok(())
}

fn print_field(label: &str, value: &Option<String>) {
    match value {
        Some(v) => println!("{label}: {v}"),
        None => println!("{label}: (unavailable)"),
    }
}

fn run_erase(session: &mut Session) -> Result<()> {
    let bar = progress_bar("erase");
    session
        .erase(&mut || {}, |_phase, done, total| {
            bar.set_length(u64::from(total.max(1)));
            bar.set_position(u64::from(done));
        })
        .context("Erase failed")?;
    bar.finish_with_message("erase complete");
    Ok(())
}

fn run_program(session: &mut Session, path: &str) -> Result<()> {
    let image = fs::read(path).with_context(|| format!("Couldn't read `{path}`"))?;
    log::info!("Loaded `{path}` ({} bytes)", image.len());

    let bar = progress_bar("program");
    session
        .program(&image, &mut || {}, |phase, done, total| {
            bar.set_length(u64::from(total.max(1)));
            bar.set_position(u64::from(done));
            bar.set_message(match phase {
                ProgressPhase::Erase => "erase",
                ProgressPhase::Program => "program",
                ProgressPhase::Verify => "verify",
            });
        })
        .context("Programming failed")?;
    bar.finish_with_message("program complete");
    Ok(())
}

fn run_boot(session: &mut Session) -> Result<()> {
    session.boot(&mut || {}).context("Boot command failed")?;
    log::info!("Device booted");
    Ok(())
}

fn progress_bar(label: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg:>10} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.set_message(label);
    bar
}

fn init_logger(level: log::LevelFilter) -> Result<()> {
    let mut logger = env_logger::Builder::from_env("FLASHPROTO_LOG");
    logger.filter_level(level);

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    logger.try_init().context("Failed to initialize logger")
}

#[cfg(unix)]
fn log_format_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(
    fmt: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

use std::process::ExitCode;

use ptp_clock::{PtpClock, PtpDevice, PtpTime};
use tokio::runtime::Builder;
use tracing::{error, info, warn};

use crate::{
    cli::{invalid, parse_number, CliArg, CommonOptions, ToolAction},
    config::{external_timestamp_flags, initialize_logging_parse_config, Edge},
    VERSION,
};

const USAGE_MSG: &str = "\
usage: ptp-extts [-i INDEX] [-n CHANNEL] [-e EDGE] [-c PATH] [-l LOG_LEVEL]
       ptp-extts -h
       ptp-extts -v";

const DESCRIPTOR: &str = "ptp-extts - log external timestamp events of a PTP hardware clock";

const HELP_MSG: &str = "Options:
  -i, --index=INDEX             which /dev/ptpINDEX to open (default 0)
  -n, --channel=CHANNEL         external timestamp channel to enable (default 0)
  -e, --edge=EDGE               which edges to timestamp [rising, falling, both]
  -c, --config=PATH             change the config .toml file
  -l, --log-level=LOG_LEVEL     change the log level
  -h, --help                    display this help text
  -v, --version                 display version information";

pub fn long_help_message() -> String {
    format!("{DESCRIPTOR}\n\n{USAGE_MSG}\n\n{HELP_MSG}")
}

#[derive(Debug, Default)]
pub struct ExttsOptions {
    pub common: CommonOptions,
    pub channel: Option<u32>,
    pub edge: Option<Edge>,
    pub action: ToolAction,
}

impl ExttsOptions {
    const TAKES_ARGUMENT: &'static [&'static str] = &[
        "--config",
        "--log-level",
        "--index",
        "--channel",
        "--edge",
    ];
    const TAKES_ARGUMENT_SHORT: &'static [char] = &['c', 'l', 'i', 'n', 'e'];

    /// parse an iterator over command line arguments
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut options = ExttsOptions::default();
        let arg_iter = CliArg::normalize_arguments(
            Self::TAKES_ARGUMENT,
            Self::TAKES_ARGUMENT_SHORT,
            iter.into_iter().map(|x| x.as_ref().to_string()),
        )?;

        for arg in arg_iter {
            let Some(arg) = options.common.apply(arg)? else {
                continue;
            };

            match arg {
                CliArg::Argument(option, value) => match option.as_str() {
                    "-n" | "--channel" => options.channel = Some(parse_number("channel", &value)?),
                    "-e" | "--edge" => options.edge = Some(Edge::parse(&value)?),
                    _ => return Err(invalid(CliArg::Argument(option, value))),
                },
                other => return Err(invalid(other)),
            }
        }

        options.action = options.common.resolve_action();

        Ok(options)
    }
}

/// Log every event of `clock` and enable timestamping on `channel`.
pub fn subscribe<D: PtpDevice>(
    clock: &PtpClock<D>,
    channel: u32,
    edge: Option<Edge>,
) -> Result<(), ptp_clock::Error> {
    let capabilities = clock.capabilities();
    info!(
        name = clock.name(),
        external_timestamp_channels = capabilities.external_timestamp_channels,
        pins = capabilities.pins,
        "read device information"
    );

    if channel as i64 >= capabilities.external_timestamp_channels as i64 {
        warn!(
            channel,
            channels = capabilities.external_timestamp_channels,
            "the device reports fewer external timestamp channels"
        );
    }

    clock.on_external_timestamp_event(Some(Box::new(|channel: u32, timestamp: PtpTime| {
        info!(channel, %timestamp, "external timestamp event");
    })));

    clock.request_external_timestamp(channel, external_timestamp_flags(edge))
}

fn run(options: ExttsOptions) -> ExitCode {
    let config = match initialize_logging_parse_config(options.common.log_level, options.common.config) {
        Ok(config) => config,
        Err(e) => {
            // print to stderr because tracing is not yet setup
            eprintln!("There was an error loading the config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let index = options.common.index.unwrap_or(config.device.index);
    let channel = options
        .channel
        .unwrap_or(config.external_timestamp.channel);
    let edge = options.edge.or(config.external_timestamp.edge);

    let clock = match PtpClock::open(index) {
        Ok(clock) => clock,
        Err(e) => {
            error!(index, error = %e, "failed to open PTP device");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = subscribe(&clock, channel, edge) {
        error!(channel, error = %e, "failed to enable external timestamping");
        clock.close();
        return ExitCode::FAILURE;
    }

    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "could not start runtime");
            return ExitCode::FAILURE;
        }
    };

    info!(channel, "waiting for events, press ctrl-c to stop");
    if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
        error!(error = %e, "could not listen for ctrl-c");
    }

    if let Err(e) = clock.disable_external_timestamp(channel) {
        warn!(channel, error = %e, "failed to disable external timestamping");
    }
    clock.on_external_timestamp_event(None);
    clock.close();

    ExitCode::SUCCESS
}

pub fn main() -> ExitCode {
    let options = match ExttsOptions::try_parse_from(std::env::args()) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{msg}\n\n{USAGE_MSG}");
            return ExitCode::FAILURE;
        }
    };

    match options.action {
        ToolAction::Help => {
            println!("{}", long_help_message());
            ExitCode::SUCCESS
        }
        ToolAction::Version => {
            eprintln!("ptp-extts {VERSION}");
            ExitCode::SUCCESS
        }
        ToolAction::Run => run(options),
    }
}

use std::{
    io::{self, Write},
    process::ExitCode,
};

use ptp_clock::{
    Capabilities, PtpClock, PtpDevice, PtpTime, SystemOffset, SystemOffsetExtended,
    SystemOffsetPrecise,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    cli::{invalid, parse_number, CliArg, CommonOptions, ToolAction},
    config::{initialize_logging_parse_config, Format},
    VERSION,
};

const USAGE_MSG: &str = "\
usage: ptp-dump [-i INDEX] [-s SAMPLES] [-f FORMAT] [-c PATH] [-l LOG_LEVEL]
       ptp-dump -h
       ptp-dump -v";

const DESCRIPTOR: &str = "ptp-dump - show the capabilities and offsets of a PTP hardware clock";

const HELP_MSG: &str = "Options:
  -i, --index=INDEX             which /dev/ptpINDEX to open (default 0)
  -s, --samples=SAMPLES         number of system offset samples, at most 25 (default 5)
  -f, --format=FORMAT           which format to use for the report [plain, json]
  -c, --config=PATH             change the config .toml file
  -l, --log-level=LOG_LEVEL     change the log level
  -h, --help                    display this help text
  -v, --version                 display version information";

pub fn long_help_message() -> String {
    format!("{DESCRIPTOR}\n\n{USAGE_MSG}\n\n{HELP_MSG}")
}

#[derive(Debug, Default)]
pub struct DumpOptions {
    pub common: CommonOptions,
    pub samples: Option<u32>,
    pub format: Option<Format>,
    pub action: ToolAction,
}

impl DumpOptions {
    const TAKES_ARGUMENT: &'static [&'static str] = &[
        "--config",
        "--log-level",
        "--index",
        "--samples",
        "--format",
    ];
    const TAKES_ARGUMENT_SHORT: &'static [char] = &['c', 'l', 'i', 's', 'f'];

    /// parse an iterator over command line arguments
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut options = DumpOptions::default();
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
                    "-s" | "--samples" => options.samples = Some(parse_number("sample count", &value)?),
                    "-f" | "--format" => options.format = Some(Format::parse(&value)?),
                    _ => return Err(invalid(CliArg::Argument(option, value))),
                },
                other => return Err(invalid(other)),
            }
        }

        options.action = options.common.resolve_action();

        Ok(options)
    }
}

fn partial<T>(measurement: Result<T, ptp_clock::Error>, what: &str) -> Option<T> {
    match measurement {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "failed to get {what}");
            None
        }
    }
}

/// Everything `ptp-dump` found out about a clock. Measurements that failed
/// are left out.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub name: String,
    pub capabilities: Capabilities,
    pub time: Option<PtpTime>,
    pub system_offset: Option<Vec<SystemOffset>>,
    pub system_offset_extended: Option<Vec<SystemOffsetExtended>>,
    pub system_offset_precise: Option<SystemOffsetPrecise>,
}

impl DeviceReport {
    pub fn collect<D: PtpDevice>(clock: &PtpClock<D>, samples: u32) -> Self {
        let capabilities = *clock.capabilities();
        info!(
            name = clock.name(),
            max_frequency_adjustment = capabilities.max_frequency_adjustment,
            alarms = capabilities.alarms,
            pins = capabilities.pins,
            external_timestamp_channels = capabilities.external_timestamp_channels,
            periodic_outputs = capabilities.periodic_outputs,
            pps = capabilities.pps,
            cross_timestamping = capabilities.cross_timestamping,
            "read device information"
        );

        let time = match clock.time() {
            Ok(time) => Some(time),
            Err(e) => {
                error!(error = %e, "failed to get current time");
                None
            }
        };

        let system_offset = partial(clock.system_offset(samples), "system offset");
        let system_offset_extended =
            partial(clock.system_offset_extended(samples), "extended system offset");
        let system_offset_precise =
            partial(clock.system_offset_precise(), "precise system offset");

        DeviceReport {
            name: clock.name().to_owned(),
            capabilities,
            time,
            system_offset,
            system_offset_extended,
            system_offset_precise,
        }
    }

    pub fn write(&self, format: Format, w: &mut impl Write) -> io::Result<()> {
        match format {
            Format::Plain => self.write_plain(w),
            Format::Json => {
                serde_json::to_writer_pretty(&mut *w, self)?;
                writeln!(w)
            }
        }
    }

    fn write_plain(&self, w: &mut impl Write) -> io::Result<()> {
        let caps = &self.capabilities;
        writeln!(w, "name: {}", self.name)?;
        writeln!(w, "max frequency adjustment: {} ppb", caps.max_frequency_adjustment)?;
        writeln!(w, "alarms: {}", caps.alarms)?;
        writeln!(w, "pins: {}", caps.pins)?;
        writeln!(w, "external timestamp channels: {}", caps.external_timestamp_channels)?;
        writeln!(w, "periodic outputs: {}", caps.periodic_outputs)?;
        writeln!(w, "pps: {}", caps.pps)?;
        writeln!(w, "cross timestamping: {}", caps.cross_timestamping)?;
        writeln!(w, "adjust phase: {}", caps.adjust_phase)?;
        writeln!(w, "max phase adjustment: {} ns", caps.max_phase_adjustment)?;

        match &self.time {
            Some(time) => writeln!(w, "time: {time}")?,
            None => writeln!(w, "time: unavailable")?,
        }

        match &self.system_offset {
            Some(samples) => {
                writeln!(w, "system offset:")?;
                for sample in samples {
                    writeln!(w, "  system {} phc {}", sample.system, sample.phc)?;
                }
            }
            None => writeln!(w, "system offset: unavailable")?,
        }

        match &self.system_offset_extended {
            Some(samples) => {
                writeln!(w, "extended system offset:")?;
                for sample in samples {
                    writeln!(
                        w,
                        "  system {} phc {} system {}",
                        sample.system1, sample.phc, sample.system2
                    )?;
                }
            }
            None => writeln!(w, "extended system offset: unavailable")?,
        }

        match &self.system_offset_precise {
            Some(precise) => writeln!(
                w,
                "precise system offset: device {} realtime {} monotonic raw {}",
                precise.device, precise.system_realtime, precise.system_monotonic_raw
            )?,
            None => writeln!(w, "precise system offset: unavailable")?,
        }

        Ok(())
    }
}

fn run(options: DumpOptions) -> ExitCode {
    let config = match initialize_logging_parse_config(options.common.log_level, options.common.config) {
        Ok(config) => config,
        Err(e) => {
            // print to stderr because tracing is not yet setup
            eprintln!("There was an error loading the config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let index = options.common.index.unwrap_or(config.device.index);
    let samples = options.samples.unwrap_or(config.dump.samples);
    let format = options.format.unwrap_or(config.dump.format);

    let clock = match PtpClock::open(index) {
        Ok(clock) => clock,
        Err(e) => {
            error!(index, error = %e, "failed to open PTP device");
            return ExitCode::FAILURE;
        }
    };

    let report = DeviceReport::collect(&clock, samples);
    clock.close();

    if let Err(e) = report.write(format, &mut io::stdout().lock()) {
        error!(error = %e, "failed to write report");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

pub fn main() -> ExitCode {
    let options = match DumpOptions::try_parse_from(std::env::args()) {
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
            eprintln!("ptp-dump {VERSION}");
            ExitCode::SUCCESS
        }
        ToolAction::Run => run(options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options() {
        let options =
            DumpOptions::try_parse_from(["ptp-dump", "-i", "1", "--samples=7", "-fjson"]).unwrap();
        assert_eq!(options.common.index, Some(1));
        assert_eq!(options.samples, Some(7));
        assert_eq!(options.format, Some(Format::Json));
        assert_eq!(options.action, ToolAction::Run);

        let options = DumpOptions::try_parse_from(["ptp-dump", "-h"]).unwrap();
        assert_eq!(options.action, ToolAction::Help);
    }

    #[test]
    fn reject_options() {
        assert!(DumpOptions::try_parse_from(["ptp-dump", "-f", "xml"]).is_err());
        assert!(DumpOptions::try_parse_from(["ptp-dump", "-n", "1"]).is_err());
        assert!(DumpOptions::try_parse_from(["ptp-dump", "--samples", "-1"]).is_err());
        assert!(DumpOptions::try_parse_from(["ptp-dump", "now"]).is_err());
    }
}

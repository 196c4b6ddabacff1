use std::{path::PathBuf, str::FromStr};

use crate::tracing::LogLevel;

/// One normalized command line element.
#[derive(Debug, PartialEq, Eq)]
pub enum CliArg {
    Flag(String),
    Argument(String, String),
    Rest(Vec<String>),
}

impl CliArg {
    /// Split `iter` (including the program name, which is skipped) into flags
    /// and options with their values. Combined short flags (`-hv`), attached
    /// short values (`-i1`) and `--long=value` are expanded.
    pub fn normalize_arguments<I>(
        takes_argument: &[&str],
        takes_argument_short: &[char],
        iter: I,
    ) -> Result<Vec<Self>, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut arg_iter = iter.into_iter().skip(1);
        let mut processed = vec![];
        let mut rest = vec![];

        while let Some(arg) = arg_iter.next() {
            match arg.as_str() {
                "--" => {
                    rest.extend(arg_iter);
                    break;
                }
                long_arg if long_arg.starts_with("--") => {
                    if let Some((key, value)) = long_arg.split_once('=') {
                        if !takes_argument.contains(&key) {
                            return Err(format!("invalid option: '{long_arg}'"));
                        }
                        processed.push(CliArg::Argument(key.to_string(), value.to_string()));
                    } else if takes_argument.contains(&long_arg) {
                        let Some(next) = arg_iter.next() else {
                            return Err(format!("'{long_arg}' expects an argument"));
                        };
                        processed.push(CliArg::Argument(long_arg.to_string(), next));
                    } else {
                        processed.push(CliArg::Flag(arg));
                    }
                }
                short_arg if short_arg.starts_with('-') && short_arg.len() > 1 => {
                    for (n, char) in short_arg[1..].char_indices() {
                        let flag = format!("-{char}");
                        if !takes_argument_short.contains(&char) {
                            processed.push(CliArg::Flag(flag));
                            continue;
                        }

                        // the value is either the remainder of this segment or the next one
                        let attached = short_arg[(n + 1 + char.len_utf8())..].trim();
                        if attached.starts_with('=') {
                            return Err("invalid option '='".into());
                        }
                        if !attached.is_empty() {
                            processed.push(CliArg::Argument(flag, attached.to_string()));
                        } else if let Some(next) = arg_iter.next() {
                            processed.push(CliArg::Argument(flag, next));
                        } else {
                            return Err(format!("'-{char}' expects an argument"));
                        }
                        break;
                    }
                }
                _argument => rest.push(arg),
            }
        }

        if !rest.is_empty() {
            processed.push(CliArg::Rest(rest));
        }

        Ok(processed)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ToolAction {
    #[default]
    Help,
    Version,
    Run,
}

/// Options every tool understands.
#[derive(Debug, Default)]
pub struct CommonOptions {
    /// Path of the configuration file
    pub config: Option<PathBuf>,
    /// Level for messages to display in logs
    pub log_level: Option<LogLevel>,
    /// Index of the PTP device
    pub index: Option<u32>,
    help: bool,
    version: bool,
}

impl CommonOptions {
    pub const TAKES_ARGUMENT: &'static [&'static str] = &["--config", "--log-level", "--index"];
    pub const TAKES_ARGUMENT_SHORT: &'static [char] = &['c', 'l', 'i'];

    /// Handle `arg` if it is a common option. Unknown flags and options are
    /// handed back.
    pub fn apply(&mut self, arg: CliArg) -> Result<Option<CliArg>, String> {
        match arg {
            CliArg::Flag(flag) => match flag.as_str() {
                "-h" | "--help" => self.help = true,
                "-v" | "--version" => self.version = true,
                _ => return Ok(Some(CliArg::Flag(flag))),
            },
            CliArg::Argument(option, value) => match option.as_str() {
                "-c" | "--config" => self.config = Some(PathBuf::from(value)),
                "-l" | "--log-level" => match LogLevel::from_str(&value) {
                    Ok(level) => self.log_level = Some(level),
                    Err(_) => return Err("invalid log level".into()),
                },
                "-i" | "--index" => self.index = Some(parse_number("index", &value)?),
                _ => return Ok(Some(CliArg::Argument(option, value))),
            },
            CliArg::Rest(rest) => return Ok(Some(CliArg::Rest(rest))),
        }

        Ok(None)
    }

    /// from the arguments resolve which action should be performed
    pub fn resolve_action(&self) -> ToolAction {
        if self.help {
            ToolAction::Help
        } else if self.version {
            ToolAction::Version
        } else {
            ToolAction::Run
        }
    }
}

pub fn parse_number(what: &str, value: &str) -> Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("invalid {what}: '{value}'"))
}

/// The unknown option as reported to the user.
pub fn invalid(arg: CliArg) -> String {
    match arg {
        CliArg::Flag(flag) => format!("invalid option provided: {flag}"),
        CliArg::Argument(option, _) => format!("invalid option provided: {option}"),
        CliArg::Rest(rest) => format!("unexpected argument: {}", rest.join(" ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(args: &[&str]) -> Result<Vec<CliArg>, String> {
        CliArg::normalize_arguments(
            CommonOptions::TAKES_ARGUMENT,
            CommonOptions::TAKES_ARGUMENT_SHORT,
            args.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn long_options() {
        assert_eq!(
            normalize(&["ptp-dump", "--config=/a.toml", "--index", "2", "--help"]).unwrap(),
            vec![
                CliArg::Argument("--config".into(), "/a.toml".into()),
                CliArg::Argument("--index".into(), "2".into()),
                CliArg::Flag("--help".into()),
            ]
        );

        assert!(normalize(&["ptp-dump", "--help=yes"]).is_err());
        assert_eq!(
            normalize(&["ptp-dump", "--index"]).unwrap_err(),
            "'--index' expects an argument"
        );
    }

    #[test]
    fn short_options() {
        assert_eq!(
            normalize(&["ptp-dump", "-hv", "-i1", "-l", "debug"]).unwrap(),
            vec![
                CliArg::Flag("-h".into()),
                CliArg::Flag("-v".into()),
                CliArg::Argument("-i".into(), "1".into()),
                CliArg::Argument("-l".into(), "debug".into()),
            ]
        );

        assert!(normalize(&["ptp-dump", "-i=1"]).is_err());
        assert!(normalize(&["ptp-dump", "-c"]).is_err());
    }

    #[test]
    fn rest_arguments() {
        assert_eq!(
            normalize(&["ptp-dump", "extra", "--", "-h"]).unwrap(),
            vec![CliArg::Rest(vec!["extra".into(), "-h".into()])]
        );
    }

    #[test]
    fn common_options() {
        let mut options = CommonOptions::default();
        for arg in normalize(&["ptp-dump", "-i", "3", "-l", "warn", "-x"]).unwrap() {
            if let Some(unknown) = options.apply(arg).unwrap() {
                assert_eq!(invalid(unknown), "invalid option provided: -x");
            }
        }
        assert_eq!(options.index, Some(3));
        assert_eq!(options.log_level, Some(LogLevel::Warn));
        assert_eq!(options.resolve_action(), ToolAction::Run);

        let mut options = CommonOptions::default();
        options.apply(CliArg::Flag("-v".into())).unwrap();
        assert_eq!(options.resolve_action(), ToolAction::Version);
        options.apply(CliArg::Flag("--help".into())).unwrap();
        assert_eq!(options.resolve_action(), ToolAction::Help);

        assert!(options
            .apply(CliArg::Argument("-i".into(), "many".into()))
            .is_err());
        assert!(options
            .apply(CliArg::Argument("-l".into(), "loud".into()))
            .is_err());
    }
}

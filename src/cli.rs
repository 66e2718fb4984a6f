use std::fmt;

use anyhow::{anyhow, bail, Result};

/// Environment variable consulted when `--transport` is not given.
pub const TRANSPORT_ENV: &str = "PYTHON_TOOLBOX_TRANSPORT";

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Version,
    Serve(CliOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub config_path: Option<String>,
    pub transport: Option<String>,
}

/// Parses arguments (without the program name).
pub fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            "--transport" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--transport requires a value"))?;
                options.transport = Some(value);
            }
            _ => {
                if let Some(value) = arg.strip_prefix("--transport=") {
                    options.transport = Some(value.to_string());
                } else if arg.starts_with('-') {
                    bail!("Unknown option: {arg}");
                } else if options.config_path.is_some() {
                    bail!("Unexpected argument: {arg}");
                } else {
                    options.config_path = Some(arg);
                }
            }
        }
    }

    Ok(Command::Serve(options))
}

/// Picks the transport name: the CLI flag, then the environment, then the
/// configured default. Empty values count as unset.
pub fn select_transport<'a>(cli: Option<&'a str>, env: Option<&'a str>, default: &'a str) -> &'a str {
    [cli, env]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Tcp,
}

impl Transport {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "tcp" => Ok(Self::Tcp),
            other => bail!("Unknown transport '{other}' (expected 'stdio' or 'tcp')"),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args() {
        assert_eq!(
            parse_args(args(&[])).unwrap(),
            Command::Serve(CliOptions::default())
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse_args(args(&["-h"])).unwrap(), Command::Help);
        assert_eq!(parse_args(args(&["cfg.toml", "--help"])).unwrap(), Command::Help);
        assert_eq!(parse_args(args(&["--version"])).unwrap(), Command::Version);
        assert_eq!(parse_args(args(&["-V"])).unwrap(), Command::Version);
    }

    #[test]
    fn test_transport_flag_forms() {
        let expected = Command::Serve(CliOptions {
            config_path: Some("cfg.toml".to_string()),
            transport: Some("tcp".to_string()),
        });
        assert_eq!(parse_args(args(&["--transport", "tcp", "cfg.toml"])).unwrap(), expected);
        assert_eq!(parse_args(args(&["cfg.toml", "--transport=tcp"])).unwrap(), expected);
    }

    #[test]
    fn test_bad_args() {
        assert!(parse_args(args(&["--transport"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["a.toml", "b.toml"])).is_err());
    }

    #[test]
    fn test_transport_defaults_when_nothing_set() {
        assert_eq!(select_transport(None, None, "stdio"), "stdio");
    }

    #[test]
    fn test_transport_from_env() {
        assert_eq!(select_transport(None, Some("tcp"), "stdio"), "tcp");
    }

    #[test]
    fn test_cli_overrides_env() {
        assert_eq!(select_transport(Some("stdio"), Some("tcp"), "stdio"), "stdio");
    }

    #[test]
    fn test_empty_values_are_ignored() {
        assert_eq!(select_transport(Some(""), Some("tcp"), "stdio"), "tcp");
        assert_eq!(select_transport(Some(""), Some(""), "stdio"), "stdio");
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!(Transport::parse("stdio").unwrap(), Transport::Stdio);
        assert_eq!(Transport::parse("TCP").unwrap(), Transport::Tcp);
        assert!(Transport::parse("streamable-http").is_err());
        assert_eq!(Transport::Tcp.to_string(), "tcp");
    }
}

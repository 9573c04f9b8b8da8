//! Command-line entry point. A single executable serves four roles,
//! selected by its first argument rather than clap's usual subcommands,
//! mirroring the original program's `argv[1]` dispatch: no argument starts
//! the supervisor itself, `-v` prints the version and exits, `-d` runs the
//! detector child, and any other string is a device node to run that
//! device's subprocess.

use clap::Parser;

use crate::osc_server::DEFAULT_OSC_PORT;

#[derive(Debug, Parser)]
#[command(name = "serialosc", version, about = "monome grid/arc OSC supervisor")]
pub struct Cli {
    /// `-v` to print the version and exit, `-d` to run as the detector
    /// child, a device node (e.g. `/dev/ttyUSB0` or `COM7`) to run as that
    /// device's subprocess, or omitted to start the supervisor.
    pub arg: Option<String>,

    /// Override the OSC control port the supervisor binds. Ignored outside
    /// the supervisor role.
    #[arg(long, default_value_t = DEFAULT_OSC_PORT)]
    pub port: u16,
}

/// The role this process invocation selects, per the first argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Supervisor,
    PrintVersion,
    Detector,
    Device(String),
}

impl Cli {
    pub fn role(&self) -> Role {
        match self.arg.as_deref() {
            None => Role::Supervisor,
            Some("-v") => Role::PrintVersion,
            Some("-d") => Role::Detector,
            Some(devnode) => Role::Device(devnode.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(arg: Option<&str>) -> Cli {
        Cli { arg: arg.map(str::to_string), port: DEFAULT_OSC_PORT }
    }

    #[test]
    fn no_argument_starts_supervisor() {
        assert_eq!(cli(None).role(), Role::Supervisor);
    }

    #[test]
    fn dash_v_prints_version() {
        assert_eq!(cli(Some("-v")).role(), Role::PrintVersion);
    }

    #[test]
    fn dash_d_is_detector() {
        assert_eq!(cli(Some("-d")).role(), Role::Detector);
    }

    #[test]
    fn other_string_is_device_node() {
        assert_eq!(cli(Some("/dev/ttyUSB0")).role(), Role::Device("/dev/ttyUSB0".into()));
    }
}

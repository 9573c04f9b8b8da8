//! Entry point for the `serialosc` binary. Dispatches to one of four roles
//! based on `argv[1]`: supervisor (no argument), version print (`-v`),
//! detector child (`-d`), or device subprocess (any other string).

use clap::Parser;
use serialosc_supervisor::cli::{Cli, Role};
use serialosc_supervisor::supervisor::Supervisor;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    serialosc_supervisor::logging::init();

    match cli.role() {
        Role::PrintVersion => {
            println!("serialosc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Role::Detector => Ok(serialosc_supervisor::detector::run()?),
        Role::Device(devnode) => Ok(serialosc_supervisor::device::run(&devnode)?),
        Role::Supervisor => {
            let mut supervisor = Supervisor::start(cli.port)?;
            supervisor.run()?;
            Ok(())
        }
    }
}

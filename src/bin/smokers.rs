//! Runs one session of the rendezvous, configured by the environment (see
//! [`smokers_rendezvous::config`]), and logs its progress to stdout.

#![allow(unused_crate_dependencies)] // Ignore the lib crate's deps that are supplied here also.

use smokers_rendezvous::{run, Config};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;


fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        },
    };
    match run(&config) {
        Ok(report) if report.interrupted => {
            info!(rounds = report.rounds, "keyboard interrupt received, terminated");
            ExitCode::SUCCESS
        },
        Ok(report) => {
            info!(rounds = report.rounds, published = report.published, "done");
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        },
    }
}

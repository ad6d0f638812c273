//! Command-line entry point for the event management server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::error;

use ems::{MAX_SESSIONS, Server, ServerConfig};

#[derive(Parser)]
#[command(version, about = "Event management server over a host-local named pipe")]
struct Args {
    /// Path of the rendezvous pipe clients connect on.
    pipe_path: PathBuf,

    /// Catalog access delay applied to every operation, in microseconds.
    #[clap(default_value_t = 0)]
    access_delay_us: u64,

    /// Number of worker threads serving sessions.
    #[clap(long, default_value_t = MAX_SESSIONS)]
    workers: usize,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    // Bad arguments must exit 1 like every other startup failure, so keep
    // clap from calling exit(2) itself. --help and --version also land in
    // the Err arm; those are not failures.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let failure = err.use_stderr();
            let _ = err.print();
            return if failure {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = ServerConfig::new(args.pipe_path)
        .access_delay(Duration::from_micros(args.access_delay_us))
        .workers(args.workers);
    let server = match Server::new(config) {
        Ok(server) => server,
        Err(err) => {
            error!("startup failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("server failed: {err}");
            ExitCode::FAILURE
        }
    }
}

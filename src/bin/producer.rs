//! `producer` — stream one file into the shared-memory channel.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use shmpress::config::DEFAULT_CHANNEL_NAME;
use shmpress::producer::{self, ProducerOptions};

#[derive(Parser)]
#[command(
    name = "producer",
    version,
    about = "Read a file, compress it block by block, and stream it through shared memory"
)]
struct Args {
    /// File to transfer.
    input: PathBuf,

    /// Name of the POSIX shared memory object to create.
    #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
    channel: String,

    /// Compression worker threads (defaults to the number of CPUs).
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            // Help and version are not usage errors.
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let opts = ProducerOptions {
        channel_name: args.channel,
        workers: args.workers.unwrap_or_else(shmpress::config::default_nb_workers),
    };

    let result = producer::run(&args.input, &opts)
        .with_context(|| format!("transfer of {} failed", args.input.display()));
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("producer: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

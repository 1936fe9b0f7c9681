//! `consumer` — receive a stream from the shared-memory channel into a file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use shmpress::config::DEFAULT_CHANNEL_NAME;
use shmpress::consumer::{self, ConsumerOptions};

#[derive(Parser)]
#[command(
    name = "consumer",
    version,
    about = "Receive a compressed block stream from shared memory and rebuild the file"
)]
struct Args {
    /// File to write (created or truncated).
    output: PathBuf,

    /// Name of the POSIX shared memory object to attach to.
    #[arg(long, default_value = DEFAULT_CHANNEL_NAME)]
    channel: String,

    /// Decompression worker threads (defaults to the number of CPUs).
    #[arg(long)]
    workers: Option<usize>,

    /// Skip blocks that fail to decompress instead of aborting.
    /// The output will be missing those bytes.
    #[arg(long)]
    skip_corrupt: bool,
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

    let opts = ConsumerOptions {
        channel_name: args.channel,
        workers: args.workers.unwrap_or_else(shmpress::config::default_nb_workers),
        skip_corrupt: args.skip_corrupt,
    };

    let result = consumer::run(&args.output, &opts)
        .with_context(|| format!("receive into {} failed", args.output.display()));
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("consumer: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

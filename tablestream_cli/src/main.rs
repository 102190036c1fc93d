mod cli_options;

use std::fs::File;
use std::io::{self, Read};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use common::log::tracing_factory::TracingFactory;
use common::TsResult;
use tablestream::{DatabaseLoader, MemoryBackend, StreamParser};

use crate::cli_options::{CliArgs, LoadSummary};

const PROGRAM_NAME: &str = "tablestream-load";

fn main() -> ExitCode {
    let args = CliArgs::parse();

    TracingFactory::init_log(args.debug);

    match run(&args) {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(rendered) => println!("{}", rendered),
                Err(e) => error!("failed to render summary: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::from(3),
    }
}

fn run(args: &CliArgs) -> TsResult<LoadSummary> {
    let input: Box<dyn Read> = match &args.stream {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin()),
    };

    let backend = MemoryBackend::new();
    let mut loader = DatabaseLoader::new(
        backend,
        PROGRAM_NAME,
        args.include_paths(),
        args.schema.clone(),
        args.target.clone(),
    );
    let mut parser = StreamParser::new(input);

    if let Err(e) = parser.run(&mut loader) {
        // one line: offset, event number, failure kind
        error!(
            "{}: error at byte offset {}, event {}: {}",
            PROGRAM_NAME,
            parser.offset(),
            parser.event_num(),
            e
        );
        return Err(e);
    }

    info!(
        "{}: loaded {} events, {} bytes",
        PROGRAM_NAME,
        parser.event_num(),
        parser.offset()
    );
    Ok(LoadSummary::from_backend(
        loader.database_name(),
        loader.backend(),
    ))
}

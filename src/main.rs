//! `dune-query`: run a saved query (or follow an existing execution) and
//! print the final result as JSON.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use duneapi_client::{DuneClient, DuneError, ExecutionService, Result, ResultsResponse};

#[derive(Parser, Debug)]
#[command(name = "dune-query", version, about = "Run a Dune query and print its results")]
struct Cli {
    /// The ID of the query to execute
    #[arg(short = 'q', long = "query-id", conflicts_with = "execution_id", required_unless_present = "execution_id")]
    query_id: Option<i64>,

    /// ID of an existing execution to wait for
    #[arg(short = 'e', long = "execution-id")]
    execution_id: Option<String>,

    /// Parameters to pass to the query, as a JSON object
    #[arg(short = 'p', long = "params", default_value = "{}")]
    params: String,

    /// Max number of consecutive errors tolerated before giving up (0 = no limit)
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Seconds between polls
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(result) => match serde_json::to_string(&result) {
            Ok(out) => {
                println!("{out}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to encode result as json: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("failed to retrieve results: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ResultsResponse> {
    let service = ExecutionService::new(DuneClient::from_env_vars()?);
    let poll_interval = Duration::from_secs(cli.poll_interval);

    let mut execution = match (cli.query_id, cli.execution_id) {
        (_, Some(execution_id)) => service.execution(execution_id),
        (Some(query_id), None) => {
            let params = parse_params(&cli.params)?;
            service.run_query(query_id, params).await?
        }
        (None, None) => {
            return Err(DuneError::config(
                "must provide exactly one of --query-id and --execution-id",
            ))
        }
    };

    execution
        .wait_get_results(poll_interval, cli.max_retries)
        .await
}

fn parse_params(raw: &str) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
    let params: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| DuneError::config(format!("failed to parse query parameters: {e}")))?;
    Ok(Some(params).filter(|p| !p.is_empty()))
}

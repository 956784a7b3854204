mod client;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use crate::client::{ScrapeApiClient, ScrapeRequest, ScrapeResponse};

#[derive(Parser)]
#[command(name = "scrapeapi", version, about = "Client for the scrapeapi job service")]
struct Cli {
    /// Base URL of the scrapeapi server
    #[arg(long, env = "SCRAPEAPI_URL", default_value = "http://localhost:8080", global = true)]
    server: String,

    /// Correlation id sent as the X-Trace-ID header
    #[arg(long, global = true)]
    trace_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is up
    Health,

    /// Queue a scrape job and print the queued snapshot
    Submit(RequestArgs),

    /// Print the current snapshot of a job
    Poll {
        /// Request id returned at submission
        request_id: String,
    },

    /// Queue a scrape job and wait until it finishes
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Seconds between polls
        #[arg(long, default_value_t = 2)]
        interval: u64,

        /// Give up after this many seconds
        #[arg(long)]
        wait_timeout: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Graph {
    Smart,
    Multi,
    Search,
}

impl Graph {
    fn as_str(self) -> &'static str {
        match self {
            Graph::Smart => "smart",
            Graph::Multi => "multi",
            Graph::Search => "search",
        }
    }
}

#[derive(Args)]
struct RequestArgs {
    /// Extraction strategy
    #[arg(short, long, value_enum, default_value_t = Graph::Smart)]
    graph: Graph,

    /// What to extract, in plain language
    #[arg(short, long)]
    prompt: String,

    /// Target page
    #[arg(short, long)]
    url: Option<String>,

    /// File whose contents are sent as raw HTML
    #[arg(long)]
    html_file: Option<PathBuf>,

    /// Source for the multi graph (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Search graph query (defaults to the prompt)
    #[arg(long)]
    search_query: Option<String>,

    /// Search graph result count
    #[arg(long)]
    max_results: Option<u32>,

    /// Path to a JSON Schema file constraining the output
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// LLM model, e.g. "openai/gpt-4o-mini"
    #[arg(short, long, env = "SCRAPEAPI_MODEL")]
    model: Option<String>,

    /// Server-side job timeout in seconds
    #[arg(long)]
    timeout: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrapeapi=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ScrapeApiClient::new(&cli.server)?.with_trace_id(cli.trace_id);

    match cli.command {
        Commands::Health => {
            let health = client.health().await?;
            print_json(&health)?;
        }
        Commands::Submit(args) => {
            let job = client.start_scrape(&build_request(args)?).await?;
            print_json(&job)?;
        }
        Commands::Poll { request_id } => {
            let job = client.get_scrape(&request_id).await?;
            print_json(&job)?;
            if !job.is_terminal() {
                tracing::info!(status = %job.status, "Job not finished yet");
            }
        }
        Commands::Run {
            request,
            interval,
            wait_timeout,
        } => {
            let job = client
                .scrape_and_wait(
                    &build_request(request)?,
                    Duration::from_secs(interval.max(1)),
                    wait_timeout.map(Duration::from_secs),
                )
                .await?;
            print_result(&job)?;
        }
    }

    Ok(())
}

fn build_request(args: RequestArgs) -> Result<ScrapeRequest> {
    let website_html = args
        .html_file
        .as_deref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read HTML file: {}", path.display()))
        })
        .transpose()?;

    let output_schema = args.schema.as_deref().map(load_schema).transpose()?;

    let llm = args.model.map(|model| {
        let mut llm = Map::new();
        llm.insert("model".to_string(), Value::String(model));
        llm
    });

    Ok(ScrapeRequest {
        graph: args.graph.as_str().to_string(),
        user_prompt: args.prompt,
        website_url: args.url,
        website_html,
        sources: (!args.sources.is_empty()).then_some(args.sources),
        search_query: args.search_query,
        max_results: args.max_results,
        output_schema,
        llm,
        timeout_sec: args.timeout,
        ..ScrapeRequest::default()
    })
}

fn load_schema(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
    serde_json::from_str(&text).context("Invalid JSON in schema file")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the extracted data, warning on stderr when it missed the schema.
fn print_result(job: &ScrapeResponse) -> Result<()> {
    let Some(result) = &job.result else {
        return print_json(job);
    };
    if let Some(validation) = result.get("schema_validation")
        && validation.get("ok") == Some(&Value::Bool(false))
    {
        tracing::warn!(
            error = validation.get("error").and_then(serde_json::Value::as_str).unwrap_or(""),
            "Result does not match the output schema"
        );
    }
    print_json(result.get("data").unwrap_or(result))
}

//! apiflow: a declarative YAML-driven API workflow runner.
//!
//! A workflow config describes a sequence of steps (HTTP requests,
//! conditionals, loops, iterations) plus global settings and an output
//! projection. The runner executes the steps in order, threading a variable
//! store through every step, and optionally prints a JSON document of
//! selected variables at the end.

mod client;
mod context;
mod definition;
mod env;
mod errors;
mod expr;
mod output;
mod runner;
mod steps;
mod store;
mod template;

use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{error, Level};

use client::{HttpClient, Request, ReqwestClient, DEFAULT_TIMEOUT_MS};

#[derive(Parser)]
#[command(name = "apiflow")]
#[command(about = "Declarative API workflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the workflow described by a YAML config file.
    Run {
        /// Path to the workflow config file.
        config: PathBuf,

        /// Enables debug logging.
        #[arg(short = 'D', long)]
        debug: bool,

        /// Extra variable and header expressions: inline JSON when the
        /// argument starts with '{', otherwise a path to a JSON file.
        #[arg(short = 'E', long)]
        env: Option<String>,

        /// Extra global header expression, as "key:value". Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Extra variable expression, as "name=value". Repeatable.
        #[arg(short = 'V', long = "var")]
        vars: Vec<String>,
    },

    /// Sends a single HTTP request and prints the response.
    Http {
        /// HTTP method (GET, POST, PUT, DELETE, ...).
        method: String,
        /// Target URL.
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            debug,
            env,
            headers,
            vars,
        } => {
            init_logging(debug);

            let outcome = async {
                let input = read_piped_input()?;
                let workflow = runner::Runner {
                    config_path: config,
                    env,
                    headers,
                    vars,
                };

                let mut stdout = std::io::stdout();
                workflow.run(input, &mut stdout).await
            }
            .await;

            if let Err(e) = outcome {
                error!("{:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Http { method, url } => {
            init_logging(false);

            if let Err(e) = send_once(&method, &url).await {
                error!("{:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Reads stdin when it is piped or redirected; a terminal yields nothing.
fn read_piped_input() -> Result<Option<String>> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .context("failed to read input")?;

    if buffer.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(buffer))
    }
}

/// One-shot request outside any workflow: sends METHOD URL and prints the
/// response status and body.
async fn send_once(method: &str, url: &str) -> Result<()> {
    let transport = ReqwestClient::new(DEFAULT_TIMEOUT_MS)?;

    let response = transport
        .send(Request {
            method: method.to_uppercase(),
            url: url.to_string(),
            ..Request::default()
        })
        .await?;

    println!("{}", response.status);
    if !response.body.is_empty() {
        println!("{}", String::from_utf8_lossy(&response.body));
    }

    Ok(())
}

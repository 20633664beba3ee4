use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use conduit_core::{OrchestrationClient, Request};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod api;
mod config;

use config::{AppState, ConduitConfig};

#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "Resilient orchestration of calls to MCP capability providers", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CONDUIT_CONFIG", default_value = "conduit.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Host to bind to (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides [server].port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Invoke a capability once and print the response as JSON
    Invoke {
        capability: String,

        /// JSON payload
        #[arg(default_value = "{}")]
        payload: String,

        /// Provider to try first
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        caller: Option<String>,

        /// Overall deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Connect to every provider and print the health report
    Health,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "conduit=info,tower_http=info".into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = ConduitConfig::load(&args.config)?;
    let client = Arc::new(config.build_client()?);

    let command = args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    });

    let code = match command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(client.clone(), &format!("{}:{}", host, port)).await?;
            ExitCode::SUCCESS
        }
        Command::Invoke {
            capability,
            payload,
            provider,
            caller,
            timeout_ms,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;

            let mut request = Request::new(capability, payload);
            if let Some(provider) = provider {
                request = request.with_provider(provider);
            }
            if let Some(caller) = caller {
                request = request.with_caller(caller);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(Duration::from_millis(ms));
            }

            let response = client.invoke(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            if response.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Health => {
            connect(&client).await;
            println!("{}", serde_json::to_string_pretty(&client.get_health())?);
            ExitCode::SUCCESS
        }
    };

    client.shutdown().await;
    Ok(code)
}

/// Warm up provider connections; failures leave the provider to its breaker
async fn connect(client: &OrchestrationClient) {
    for (provider, result) in client.connect_all().await {
        match result {
            Ok(()) => tracing::info!(provider = %provider, "Provider connected"),
            Err(e) => tracing::warn!(provider = %provider, error = %e, "Provider unavailable at startup"),
        }
    }
}

async fn serve(client: Arc<OrchestrationClient>, addr: &str) -> Result<()> {
    tracing::info!(
        providers = client.registry().len(),
        "Starting Conduit orchestration server"
    );
    connect(&client).await;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    };

    api::serve(addr, AppState::new(client), shutdown).await
}

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use triage_agents::ports_http::{
    check_endpoint, HttpClassificationPort, HttpGenerationPort, HttpRetrievalPort, HttpTicketSink,
};
use triage_agents::{PortEndpoints, Query, RunOptions, WorkflowConfig, WorkflowEngine};

/// Run one support query through the triage workflow and print the
/// resulting record as JSON.
#[derive(Parser)]
#[command(name = "triage-agents")]
struct Cli {
    /// The support query text.
    query: String,

    /// Session identifier to attach to the query.
    #[arg(long)]
    session: Option<String>,

    /// Signal that a prior answer in this session did not help.
    #[arg(long)]
    dissatisfied: bool,

    /// Override the retrieval top-k.
    #[arg(long)]
    top_k: Option<usize>,

    /// Probe the backend /health endpoints before running.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = WorkflowConfig::default();
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }
    let endpoints = PortEndpoints::default();
    info!(
        retrieval = %endpoints.retrieval_url,
        classify = %endpoints.classify_url,
        generate = %endpoints.generate_url,
        tickets = %endpoints.ticket_url,
        "triage engine starting"
    );

    if cli.check {
        let client = reqwest::Client::new();
        for (name, url) in [
            ("retrieval", &endpoints.retrieval_url),
            ("classify", &endpoints.classify_url),
            ("generate", &endpoints.generate_url),
            ("tickets", &endpoints.ticket_url),
        ] {
            if !check_endpoint(&client, url).await {
                tracing::warn!(backend = name, url = %url, "backend health check failed");
            }
        }
    }

    let engine = WorkflowEngine::new(
        Arc::new(HttpRetrievalPort::new(&endpoints.retrieval_url)),
        Arc::new(HttpClassificationPort::new(&endpoints.classify_url)),
        Arc::new(HttpGenerationPort::new(&endpoints.generate_url)),
        Arc::new(HttpTicketSink::new(&endpoints.ticket_url)),
        config,
    );

    let mut query = Query::new(cli.query);
    if let Some(session) = cli.session {
        query = query.with_session(session);
    }
    let opts = if cli.dissatisfied {
        RunOptions::dissatisfied()
    } else {
        RunOptions::default()
    };

    let result = engine.run(query, opts).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

// Copyright 2026 Spec Resolver Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use clap::Parser;
use spec_resolver::fetcher::FetchOptions;
use spec_resolver::renderer::chromium::ChromiumRenderer;
use spec_resolver::renderer::{Renderer, StaticRenderer};
use spec_resolver::{Config, Fetcher, HttpFetcher, Refresh, Resolver, SpecRequest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "spec-resolver",
    about = "Resolve a specification into its final rendered document",
    version
)]
struct Cli {
    /// URL of the specification, or a path to a local HTML file
    source: String,

    /// URL a local file should be treated as living at
    #[arg(long)]
    base_url: Option<String>,

    /// Config file (defaults to $SPEC_RESOLVER_CONFIG, then ./config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refresh policy: once, force, never, or a max age in seconds
    #[arg(long)]
    refresh: Option<Refresh>,

    /// Print the resolved HTML instead of a summary
    #[arg(long)]
    html: bool,

    /// Output results as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short)]
    verbose: bool,

    /// Skip Chromium and parse documents without executing scripts
    #[arg(long)]
    static_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "spec_resolver=debug" } else { "spec_resolver=info" };
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?);
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = Config::load(cli.config.as_deref())?;
    let mut options = FetchOptions::from_config(&config);
    if let Some(refresh) = cli.refresh {
        options = options.with_refresh(refresh);
    }

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::from_config(&config));
    let renderer: Arc<dyn Renderer> = if cli.static_only {
        Arc::new(StaticRenderer::new())
    } else {
        match ChromiumRenderer::launch(&config, Arc::clone(&fetcher), options.clone()).await {
            Ok(chromium) => Arc::new(chromium),
            Err(e) => {
                warn!("Failed to initialize Chromium: {e:#}");
                warn!("Running in static mode (ReSpec documents will not be rendered)");
                Arc::new(StaticRenderer::new())
            }
        }
    };

    let resolver = Resolver::builder()
        .fetcher(fetcher)
        .renderer(Arc::clone(&renderer))
        .fetch_options(options)
        .render_timeout(Duration::from_secs(config.render_timeout_secs))
        .max_hops(config.max_hops)
        .build();

    let request = request_for(&cli)?;
    let result = resolver.resolve(request).await;

    if let Err(e) = renderer.shutdown().await {
        warn!("renderer shutdown failed: {e}");
    }

    let resolved = match result {
        Ok(resolved) => resolved,
        Err(e) => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "error": true, "message": e.to_string() })
                );
            } else {
                eprintln!("  Error: {e}");
            }
            std::process::exit(1);
        }
    };

    info!(
        "resolved {} ({} hop(s))",
        resolved.generator, resolved.hops
    );

    if cli.html {
        println!("{}", resolved.document.html());
    } else if cli.json {
        let summary = serde_json::json!({
            "url": resolved.url.as_ref().map(|u| u.as_str()),
            "generator": resolved.generator,
            "hops": resolved.hops,
            "title": resolved.document.title(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}  {}  hops={}  {}",
            resolved.url.as_ref().map(|u| u.as_str()).unwrap_or("-"),
            resolved.generator,
            resolved.hops,
            resolved.document.title().unwrap_or_default()
        );
    }

    Ok(())
}

/// URLs are fetched; anything else is read as a local HTML file.
fn request_for(cli: &Cli) -> Result<SpecRequest> {
    if url::Url::parse(&cli.source).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
        return Ok(SpecRequest::Url(cli.source.clone()));
    }

    let path = PathBuf::from(&cli.source);
    let html = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let url = match &cli.base_url {
        Some(url) => Some(url.clone()),
        None => std::fs::canonicalize(&path)
            .ok()
            .and_then(|abs| url::Url::from_file_path(abs).ok())
            .map(String::from),
    };
    Ok(SpecRequest::Html {
        html,
        url,
        response_url: None,
    })
}

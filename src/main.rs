//! Ad Sandbox CLI
//!
//! Single-shot mode:
//!   ad-sandbox <api-endpoint> <slot-id> [page-url]
//!
//! Server mode (persistent process, reads from stdin):
//!   ad-sandbox --server <api-endpoint> [page-url]
//!
//! Sanitize mode (creative markup on stdin, sanitized markup on stdout):
//!   ad-sandbox --sanitize [csp-nonce | auto]
//!
//! Environment:
//!   ADSERVER_SDK_CONFIG  page-level config object (JSON, camelCase keys)
//!   ADSERVER_CACHE_FILE  persist the banner cache to this JSON file
//!   RUST_LOG             log filter (default `ad_sandbox=info`)
//!
//! Protocol (server mode):
//!   Request (stdin), one per line:
//!     demo-leaderboard 728x90
//!
//!   Response (stdout):
//!     Status:Ok
//!     Length:1234
//!
//!     <div class="adserver-banner" ...>...</div>
//!
//!   Error response:
//!     Status:Error
//!     Length:19
//!
//!     HTTP 404: Not Found

use ad_sandbox::{
    generate_nonce, FileStorage, HeadlessPage, HttpTransport, MemoryStorage, PartialConfig,
    RenderOptions, RenderResult, Sanitizer, Sdk, SlotContainer, Storage, GLOBAL_CONFIG_NAME,
};
use anyhow::{anyhow, Result};
use std::io::{BufRead, Read, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

const DEFAULT_PAGE_URL: &str = "http://localhost/";

fn print_usage() {
    eprintln!("Ad Sandbox - Ad delivery and safe-rendering engine");
    eprintln!();
    eprintln!("Single-shot mode:");
    eprintln!("  ad-sandbox <api-endpoint> <slot-id> [page-url]");
    eprintln!();
    eprintln!("Server mode (persistent process):");
    eprintln!("  ad-sandbox --server <api-endpoint> [page-url]");
    eprintln!();
    eprintln!("Sanitize mode:");
    eprintln!("  ad-sandbox --sanitize [csp-nonce | auto] < creative.html");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  ad-sandbox https://ads.example.com/api/v1 demo-leaderboard https://blog.example.com/");
    eprintln!("  ad-sandbox --server https://ads.example.com/api/v1");
}

fn init_tracing(global_config: Option<&str>) {
    let debug = global_config
        .and_then(|json| PartialConfig::from_global_json(json).ok())
        .and_then(|config| config.debug)
        .unwrap_or(false);
    let default_filter = if debug { "ad_sandbox=debug" } else { "ad_sandbox=info" };

    // stdout carries rendered markup, logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build a ready SDK for `page_url`, with `api_endpoint` taking priority over
/// the environment config.
fn create_sdk(api_endpoint: &str, page_url: &str, global_config: Option<&str>) -> Result<Sdk> {
    let location =
        Url::parse(page_url).map_err(|e| anyhow!("Invalid page URL '{}': {}", page_url, e))?;

    let storage: Arc<dyn Storage> = match std::env::var("ADSERVER_CACHE_FILE") {
        Ok(path) => Arc::new(FileStorage::new(path)),
        Err(_) => Arc::new(MemoryStorage::new()),
    };

    let sdk = Sdk::new(
        HttpTransport::new()?,
        Arc::new(HeadlessPage::new(location)),
        storage,
    );

    let overrides = PartialConfig {
        api_endpoint: Some(api_endpoint.to_string()),
        ..Default::default()
    };
    sdk.init(overrides, PartialConfig::default(), global_config)?;

    Ok(sdk)
}

/// Parse a server-mode request line: `<slot-id> [WIDTHxHEIGHT]`.
fn parse_request(line: &str) -> Result<(String, RenderOptions)> {
    let mut parts = line.split_whitespace();
    let slot_id = parts
        .next()
        .ok_or_else(|| anyhow!("Empty request"))?
        .to_string();

    let mut options = RenderOptions::default();
    if let Some(size) = parts.next() {
        let (width, height) = size
            .split_once('x')
            .ok_or_else(|| anyhow!("Invalid size '{}', expected WIDTHxHEIGHT", size))?;
        options.width = Some(width.parse().map_err(|e| anyhow!("Invalid width: {}", e))?);
        options.height = Some(height.parse().map_err(|e| anyhow!("Invalid height: {}", e))?);
    }

    Ok((slot_id, options))
}

/// Rendered markup for a successful result, the error message otherwise.
fn response_body(result: &RenderResult, container: &SlotContainer) -> (bool, String) {
    if result.success {
        return (true, container.inner_html());
    }

    let message = result
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Render failed".to_string());
    (false, message)
}

/// Run in single-shot mode
async fn run_single_shot(
    api_endpoint: &str,
    slot_id: &str,
    page_url: &str,
    global_config: Option<&str>,
) -> Result<()> {
    let sdk = create_sdk(api_endpoint, page_url, global_config)?;

    let container = SlotContainer::for_slot(slot_id);
    let result = sdk
        .render(slot_id, &container, RenderOptions::default())
        .await?;

    info!(slot = slot_id, method = %result.method, success = result.success, "Rendered");

    let (ok, body) = response_body(&result, &container);
    if !ok {
        return Err(anyhow!(body));
    }

    println!("{}", body);
    Ok(())
}

/// Run in server mode (persistent process, reads requests from stdin)
async fn run_server(api_endpoint: &str, page_url: &str, global_config: Option<&str>) -> Result<()> {
    // One SDK for the whole session so the banner cache carries over
    let sdk = create_sdk(api_endpoint, page_url, global_config)?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    info!("Server ready, reading from stdin");

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            // EOF - stdin closed, exit gracefully
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (slot_id, options) = match parse_request(line) {
            Ok(request) => request,
            Err(e) => {
                write_response(&mut stdout, false, &e.to_string())?;
                continue;
            }
        };

        let container = SlotContainer::for_slot(&slot_id);
        match sdk.render(&slot_id, &container, options).await {
            Ok(result) => {
                let (ok, body) = response_body(&result, &container);
                write_response(&mut stdout, ok, &body)?;
            }
            Err(e) => {
                error!(slot = %slot_id, error = %e, "Render rejected");
                write_response(&mut stdout, false, &e.to_string())?;
            }
        }
    }

    info!(cached = sdk.cache_size(), "Server shutting down");
    sdk.destroy();
    Ok(())
}

/// Sanitize creative markup from stdin
fn run_sanitize(nonce: Option<&str>) -> Result<()> {
    let sanitizer = match nonce {
        Some("auto") => {
            let nonce = generate_nonce();
            info!(nonce = %nonce, "Generated CSP nonce");
            Sanitizer::with_nonce(&nonce)?
        }
        Some(nonce) => Sanitizer::with_nonce(nonce)?,
        None => Sanitizer::new(),
    };

    let mut html = String::new();
    std::io::stdin().read_to_string(&mut html)?;

    let mut stdout = std::io::stdout();
    write!(stdout, "{}", sanitizer.sanitize(&html))?;
    stdout.flush()?;
    Ok(())
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", body.len())?;
    writeln!(stdout)?;
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let global_config = std::env::var("ADSERVER_SDK_CONFIG").ok();
    let global_config = global_config.as_deref();

    init_tracing(global_config);
    if global_config.is_some() {
        info!(object = GLOBAL_CONFIG_NAME, "Using page config from ADSERVER_SDK_CONFIG");
    }

    if args.len() < 2 {
        print_usage();
        return Err(anyhow!("Missing required arguments"));
    }

    match args[1].as_str() {
        "--sanitize" => run_sanitize(args.get(2).map(String::as_str)),
        "--server" => {
            let Some(api_endpoint) = args.get(2) else {
                print_usage();
                return Err(anyhow!("Server mode requires api-endpoint argument"));
            };
            let page_url = args.get(3).map_or(DEFAULT_PAGE_URL, String::as_str);
            run_server(api_endpoint, page_url, global_config).await
        }
        _ => {
            if args.len() < 3 {
                print_usage();
                return Err(anyhow!("Missing required arguments"));
            }
            let page_url = args.get(3).map_or(DEFAULT_PAGE_URL, String::as_str);
            run_single_shot(&args[1], &args[2], page_url, global_config).await
        }
    }
}

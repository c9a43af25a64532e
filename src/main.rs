use std::time::Duration;

use harbor::config::ServerConfig;
use harbor::http::request::Request;
use harbor::http::response::Response;
use harbor::server::HttpServer;
use harbor::server::handler::TracingRequestLogger;
use tracing_subscriber::EnvFilter;

fn hello(_request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
    response.set_content_type("text/plain; charset=utf-8")?;
    response.write_str("Hello from Harbor\n")?;
    Ok(())
}

fn echo(request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
    let content_type = request
        .header("Content-Type")
        .unwrap_or("application/octet-stream")
        .to_string();
    response.set_content_type(&content_type)?;
    response.write(request.body())?;
    Ok(())
}

/// Streams a short countdown from a background task.
fn countdown(_request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
    response.set_content_type("text/plain; charset=utf-8")?;
    response.set_chunked(true)?;

    let mut pending = response.suspend()?;
    tokio::spawn(async move {
        for n in (1..=3).rev() {
            tokio::time::sleep(Duration::from_millis(250)).await;
            if pending.write_str(&format!("{n}\n")).is_err() {
                return;
            }
        }
        if let Err(e) = pending.finish() {
            tracing::warn!(error = %e, "countdown could not finish");
        }
    });

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(&path)?,
        None => ServerConfig::load(),
    };

    let config = config
        .logger(TracingRequestLogger)
        .request_handler("/hello", hello)
        .request_handler("/echo", echo)
        .request_handler("/countdown", countdown);

    let server = HttpServer::listen(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    server.shutdown().await?;

    Ok(())
}

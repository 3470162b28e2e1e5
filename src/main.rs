//! `relaywire` binary: keeps a channel pool open to a relay and answers
//! `GET /<app>/is_alive` health checks.

mod cli;

use clap::Parser;
use relaywire::{
    CredentialSource,
    Frame,
    Response,
    gateway::{FnGateway, Gateway, GatewayError},
    start_pool,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_metrics_exporter(&cli)?;

    let source = match &cli.nonce {
        Some(nonce) => CredentialSource::Nonce {
            app_name: cli.app_name.clone(),
            nonce: hex::decode(nonce)?,
        },
        None => CredentialSource::Debug {
            app_name: cli.app_name.clone(),
            connection_count: cli.connections,
        },
    };

    let handle = start_pool(cli.relay, &source, health_gateway(&cli.app_name))?;
    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_metrics_exporter(cli: &cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        log::info!("serving metrics: addr={addr}");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics_exporter(cli: &cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.metrics_addr.is_some() {
        log::warn!("--metrics-addr ignored: built without the metrics feature");
    }
    Ok(())
}

fn health_gateway(app_name: &str) -> impl Gateway {
    let alive_path = format!("/{app_name}/is_alive");
    FnGateway::new(move |request: Frame| {
        let alive = request.method() == Some(&b"GET"[..]) && request.target() == Some(alive_path.as_bytes());
        async move {
            Ok::<_, GatewayError>(if alive {
                Response::new(200).with_body("OK")
            } else {
                Response::new(404)
            })
        }
    })
}

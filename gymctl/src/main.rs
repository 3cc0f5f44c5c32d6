use clap::Parser;
use gymctl::{Application, Config, config::PaymentConfig, telemetry};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// One line per optional integration, printed by `--validate`
fn describe(config: &Config) -> Vec<String> {
    let payments = match &config.payment {
        Some(PaymentConfig::Stripe(_)) => "stripe",
        Some(PaymentConfig::Dummy(_)) => "dummy",
        None => "disabled",
    };
    vec![
        format!("listen: {}", config.bind_address()),
        format!("payments: {payments}"),
        format!(
            "cron notifications: {}",
            if config.notifications.cron_secret.is_some() { "enabled" } else { "disabled" }
        ),
        format!("metrics: {}", config.enable_metrics),
        format!("otel export: {}", config.enable_otel_export),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must happen before any reqwest client is built
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = gymctl::config::Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        for line in describe(&config) {
            println!("  {line}");
        }
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!("{:?}", args);

    Application::new(config).await?.serve(shutdown_signal()).await
}

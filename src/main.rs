use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use incident_bot::agent::Agent;
use incident_bot::attachments::LocalAttachmentStore;
use incident_bot::channels::{Channel, TelegramChannel};
use incident_bot::config::AppConfig;
use incident_bot::conversation::IncidentDesk;
use incident_bot::mail::SmtpMailDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = load_config().context("Failed to load configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("🚨 Incident bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Attachments: {}", config.attachments_dir.display());
    eprintln!("   Reports to: {}", config.mail.destination);

    let telegram = Arc::new(TelegramChannel::new(&config.telegram));
    if let Err(e) = telegram.health_check().await {
        tracing::warn!(error = %e, "Telegram health check failed; polling anyway");
    }

    let attachments = Arc::new(LocalAttachmentStore::new(
        config.attachments_dir.clone(),
        telegram.clone(),
    ));
    let mailer = Arc::new(SmtpMailDispatcher::new(config.mail.clone()));
    let desk = Arc::new(IncidentDesk::new(attachments, mailer));

    Agent::new(telegram, desk)
        .run()
        .await
        .context("Incident bot stopped with an error")?;

    Ok(())
}

fn load_config() -> incident_bot::error::Result<AppConfig> {
    let config = AppConfig::from_env()?;
    config.prepare_dirs()?;
    Ok(config)
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "incident-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

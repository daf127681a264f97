use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;

use mail_triage::channels::{GmailConnector, TelegramNotifier, spawn_triage_poller};
use mail_triage::config::TriageConfig;
use mail_triage::llm::{LlmConfig, create_provider};
use mail_triage::pipeline::{ActionRouter, Classifier, Composer, TriageProcessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let triage_config = TriageConfig::from_env().context("triage configuration")?;
    let llm_config = LlmConfig::from_env().context("LLM configuration")?;
    let connector = Arc::new(GmailConnector::from_env().context("Gmail setup")?);
    let notifier = TelegramNotifier::from_env().context("Telegram setup")?;

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", llm_config.model, llm_config.backend);
    eprintln!("   Mailbox: {}", connector.address());
    eprintln!(
        "   Polling: every {}s, lookback {}s",
        triage_config.poll_interval.as_secs(),
        triage_config.lookback.as_secs()
    );
    if triage_config.dry_run {
        eprintln!("   Dry run: compose only, no notify/reply/trash");
    }
    eprintln!("   Press Ctrl-C to stop.\n");

    // Create LLM provider
    let llm = create_provider(&llm_config)?;

    let router = ActionRouter::new(
        Composer::new(Arc::clone(&llm)),
        Arc::new(notifier),
        triage_config.notify_recipient.clone(),
    )
    .with_dry_run(triage_config.dry_run);
    let processor = Arc::new(TriageProcessor::new(Classifier::new(llm), router));

    let (handle, shutdown) = spawn_triage_poller(connector, processor, triage_config);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    tracing::info!("Shutdown requested");
    shutdown.store(true, Ordering::Relaxed);
    // The flag is checked on the next tick; do not wait out a full interval.
    handle.abort();
    let _ = handle.await;

    Ok(())
}

use tokio_util::sync::CancellationToken;

use brignext_worker::WorkerSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    brignext_observability::init();

    let settings = WorkerSettings::from_env();
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown signal received");
        on_signal.cancel();
    });

    brignext_worker::run(settings, cancel).await
}

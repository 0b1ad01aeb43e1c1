use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use courier_app::{AppConfig, traffic};
use courier_booking::RandomSampler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    courier_observability::init(&config.log)?;

    let app = courier_app::start(&config.dispatch, Arc::new(RandomSampler)).await?;

    let stop_traffic = CancellationToken::new();
    let traffic = config
        .traffic_interval
        .map(|interval| traffic::spawn(app.command_bus(), interval, stop_traffic.clone()));

    tracing::info!(name = %config.dispatch.name, "running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    stop_traffic.cancel();
    if let Some(traffic) = traffic {
        if let Err(err) = traffic.await {
            tracing::warn!(error = %err, "traffic generator ended abnormally");
        }
    }

    let report = app.report().report();
    tracing::info!(
        bookings = report.bookings,
        total_charge = report.total_charge,
        "final financial report"
    );
    app.shutdown().await;
    Ok(())
}

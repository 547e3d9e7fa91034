use std::sync::Arc;

use tokio::io::Stdout;

use kwatch_renderer::PathExpression;
use kwatch_sync::RemoteSource;

use crate::error::DaemonError;
use crate::lifecycle::{self, ShutdownReport};
use crate::settings::WatchSettings;

/// Build a runtime and watch until a termination signal, writing event
/// lines to stdout.
pub fn start_blocking(
    source: Arc<dyn RemoteSource>,
    settings: WatchSettings,
) -> Result<ShutdownReport<Stdout>, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;
    let result = runtime.block_on(run(source, settings));
    // Watch readers may still be parked on open connections.
    runtime.shutdown_background();
    result
}

/// Watch until a termination signal or a fatal reflector error.
pub async fn run(
    source: Arc<dyn RemoteSource>,
    settings: WatchSettings,
) -> Result<ShutdownReport<Stdout>, DaemonError> {
    let expression = PathExpression::compile(&settings.jsonpath)?;
    let handle = lifecycle::start(source, &settings, expression, tokio::io::stdout());
    lifecycle::wait_for_shutdown(handle).await
}

use std::sync::Arc;

use postqueue_core::scheduler::{DryRunPostCallback, PostCallback, PostCallbackFactory};
use postqueue_core::{Config, Result};
use tracing::info;

/// Boot the API server.
///
/// The browser automation that performs real posts is an embedder concern;
/// the bundled server dispatches through the dry-run callback, which logs
/// and reports success.
pub async fn run(config: Config) -> Result<()> {
    info!(
        host = %config.server.host,
        port = config.server.port,
        backend = %config.storage.backend,
        "starting postqueue server"
    );

    let factory: PostCallbackFactory =
        Arc::new(|_platform| Arc::new(DryRunPostCallback) as Arc<dyn PostCallback>);

    postqueue_api::run(config, factory).await
}

use thiserror::Error;

/// Error surface for the dispatcher and lifecycle controller.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("sync error: {0}")]
    Sync(#[from] kwatch_sync::SyncError),

    #[error("invalid jsonpath template: {0}")]
    Template(#[from] kwatch_renderer::CompileError),

    /// The output sink is gone; nothing more can be delivered.
    #[error("failed to write event output: {0}")]
    Sink(#[source] std::io::Error),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

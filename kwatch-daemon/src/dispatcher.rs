//! Dispatcher: the single consumer of the delta queue.
//!
//! Pops one event at a time, renders it, writes one line to the sink and
//! flushes before taking the next.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use kwatch_core::ChangeEvent;
use kwatch_renderer::PathExpression;
use kwatch_sync::{DeltaConsumer, Popped};

use crate::error::DaemonError;

/// What the dispatcher hands back once the queue is closed and drained.
#[derive(Debug)]
pub struct Dispatched<W> {
    pub sink: W,
    pub lines: u64,
}

/// Render one event as an output line, without the trailing newline.
///
/// ```text
/// add <object>
/// update <old> to <new>
/// delete <object>
/// ```
pub fn format_event(expression: &PathExpression, event: &ChangeEvent) -> String {
    match event {
        ChangeEvent::Added(record) => format!("add {}", expression.render_record(record)),
        ChangeEvent::Modified { old, new } => format!(
            "update {} to {}",
            expression.render_record(old),
            expression.render_record(new)
        ),
        ChangeEvent::Deleted(record) => format!("delete {}", expression.render_record(record)),
    }
}

/// Drain `queue` into `sink` until the queue closes.
///
/// A write failure ends dispatch: the sink is assumed gone for good.
pub async fn dispatch<W>(
    mut queue: DeltaConsumer,
    expression: PathExpression,
    mut sink: W,
) -> Result<Dispatched<W>, DaemonError>
where
    W: AsyncWrite + Unpin,
{
    let mut lines = 0u64;
    loop {
        let event = match queue.pop().await {
            Popped::Event(event) => event,
            Popped::Closed => break,
        };
        trace!(key = %event.key(), verb = event.verb(), "dispatching");

        let mut line = format_event(&expression, &event);
        line.push('\n');
        sink.write_all(line.as_bytes())
            .await
            .map_err(DaemonError::Sink)?;
        sink.flush().await.map_err(DaemonError::Sink)?;
        lines += 1;
    }
    debug!(lines, "dispatcher drained");
    Ok(Dispatched { sink, lines })
}

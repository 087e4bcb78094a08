//! Line-delimited stdio transport.
//!
//! One JSON envelope per input line, one JSON response per output line.
//! Calls are handled concurrently; responses are written in completion
//! order, so clients that pipeline requests should send an `id`.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

/// Serve tool calls from `reader` until EOF, writing responses to `writer`.
///
/// Returns the writer once every in-flight call has answered. Cancelling
/// `cancel` stops reading and cancels in-flight polls.
pub async fn serve_lines<R, W>(
    dispatcher: Arc<Dispatcher>,
    reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> std::io::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut calls = JoinSet::new();
    let mut lines = reader.lines();
    let mut reading = true;

    loop {
        tokio::select! {
            () = cancel.cancelled(), if reading => {
                tracing::info!("Stdio transport cancelled");
                reading = false;
            }
            line = lines.next_line(), if reading => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    let tx = tx.clone();
                    let cancel = cancel.child_token();
                    calls.spawn(async move {
                        let response = dispatcher.dispatch_text(&line, &cancel).await;
                        let _ = tx.send(response);
                    });
                }
                None => {
                    tracing::debug!("Stdin closed");
                    reading = false;
                }
            },
            Some(response) = rx.recv() => {
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Some(joined) = calls.join_next(), if !calls.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Stdio tool call task failed");
                }
            }
            else => break,
        }
        if !reading && calls.is_empty() {
            break;
        }
    }

    // Flush responses queued by calls that finished on the last turn.
    drop(tx);
    while let Some(response) = rx.recv().await {
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(writer)
}

/// Serve tool calls over the process's stdin/stdout.
pub async fn serve_stdio(
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    serve_lines(dispatcher, reader, tokio::io::stdout(), cancel).await?;
    Ok(())
}

//! Generic batch-and-flush primitive.
//!
//! A `Command<In, Out>` shape with an `mpsc`-channel-plus-background-task
//! structure, and a size-or-deadline flush race via `tokio::select!`. The
//! one addition is a timeout-bounded `batch_process_with_timeout` so
//! callers (the translation aggregator) can fall back to an un-batched
//! call when a flush doesn't happen in time, per the aggregator's fallback
//! contract for requests that can't wait out a full batching window.

use std::{
    fmt::Debug,
    time::{Duration, Instant},
};

use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};
use tracing_unwrap::ResultExt;

/// Commands for batch processing.
#[derive(Debug)]
pub enum Command<In, Out> {
    /// Add an item to the current batch; the result comes back through the
    /// paired oneshot channel.
    Add((In, oneshot::Sender<Out>)),
    /// Flush whatever is currently queued, even if short of `batch_size`.
    Flush,
}

/// Start a batch-processing background task and return a command sender.
///
/// `batch_size` is the item count that triggers an immediate flush;
/// `max_delay` is the maximum time the first item in a new batch waits for
/// company before a flush fires regardless of size.
pub fn start_batch_process<In, Out, F>(
    batch_size: usize,
    max_delay: Duration,
    max_capacity: usize,
    process: F,
) -> mpsc::Sender<Command<In, Out>>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(Vec<In>) -> Vec<Out> + Send + Copy + 'static,
{
    let (tx, mut rx) = mpsc::channel(max_capacity);
    tokio::spawn(async move {
        let mut queue = Vec::new();
        let mut timeout = None;
        while let Some(command) = tokio::select! {
            _ = async { timeout.as_mut().unwrap().await }, if timeout.is_some() => Some(Command::Flush),
            x = rx.recv() => x,
        } {
            let need_flush = match command {
                Command::Add(x) => {
                    if queue.is_empty() {
                        timeout = Some(Box::pin(sleep(max_delay)));
                    }
                    queue.push(x);
                    queue.len() == batch_size
                }
                Command::Flush => true,
            };

            if need_flush {
                timeout = None;
                if queue.is_empty() {
                    continue;
                }
                let batch = std::mem::take(&mut queue);
                let (inputs, senders): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
                let outputs = tokio::task::spawn_blocking(move || process(inputs))
                    .await
                    .unwrap_or_log();
                for (sender, output) in senders.into_iter().zip(outputs) {
                    if sender.send(output).is_err() {
                        tracing::warn!("receiver dropped before receiving batched result");
                    }
                }
            }
        }
    });
    tx
}

/// Enqueue one item and await its result, optionally forcing an immediate
/// flush of the whole queue.
pub async fn batch_process<In: Debug, Out: Debug>(
    sender: &mpsc::Sender<Command<In, Out>>,
    value: In,
    flush: bool,
) -> Out {
    let (tx, rx) = oneshot::channel();
    sender
        .send(Command::Add((value, tx)))
        .await
        .expect_or_log("error sending to batch processing channel");
    if flush {
        sender
            .send(Command::Flush)
            .await
            .expect_or_log("error sending to batch processing channel");
    }
    rx.await
        .expect_or_log("error receiving from batch processing channel")
}

/// Same as `batch_process`, but bounded by `timeout`: if the batch hasn't
/// flushed in time the caller gets `None` back and the oneshot is
/// abandoned (the cancellation-drops-silently contract means a late
/// flush's `send` on this channel simply fails and is logged, not
/// treated as an error).
pub async fn batch_process_with_timeout<In: Debug, Out: Debug>(
    sender: &mpsc::Sender<Command<In, Out>>,
    value: In,
    timeout: Duration,
) -> Option<Out> {
    let (tx, rx) = oneshot::channel();
    sender
        .send(Command::Add((value, tx)))
        .await
        .expect_or_log("error sending to batch processing channel");
    tokio::time::timeout(timeout, rx).await.ok()?.ok()
}

/// Run a processing function over a batch, logging the model name, batch
/// size and elapsed time.
pub fn log_processing_function<In, Out, F>(
    name: &'static str,
    process: F,
    batch: Vec<In>,
) -> Vec<Out>
where
    F: Fn(Vec<In>) -> anyhow::Result<Vec<Out>>,
{
    let start_time = Instant::now();
    let res = process(batch).expect_or_log("batch processing function failed");
    let elapsed = Instant::now() - start_time;
    tracing::info!("{} processed {} requests in {:#?}", name, res.len(), elapsed);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let sender = start_batch_process::<i32, i32, _>(2, Duration::from_secs(5), 8, |batch| {
            batch.into_iter().map(|x| x * 2).collect()
        });
        let a = batch_process(&sender, 1, false);
        let b = batch_process(&sender, 2, false);
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, 2);
        assert_eq!(b, 4);
    }

    #[tokio::test]
    async fn flushes_on_deadline() {
        let sender =
            start_batch_process::<i32, i32, _>(100, Duration::from_millis(20), 8, |batch| {
                batch.into_iter().map(|x| x + 1).collect()
            });
        let out = batch_process(&sender, 41, false).await;
        assert_eq!(out, 42);
    }
}

//! Batch Aggregator (C5) specialization for translation requests.
//!
//! Builds on the same command/flush shape as
//! `sidecar_core::batching::start_batch_process`, but run here as a
//! purpose-built loop rather than through that generic helper: each
//! flush needs to stay grouped by `(source_lang, target_lang)` (one
//! background task per pair, created lazily), use a dynamic max batch
//! size derived from VRAM headroom, and fall back to a direct call when a
//! flush doesn't happen inside 10s - three things the generic primitive's
//! single fixed `(batch_size, Out)` shape doesn't model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use sidecar_core::engine::{TranslationEngine, TranslationOutcome};
use sidecar_core::errors::EngineError;

/// Max wait for the first item in a batch to gather company.
const MAX_DELAY: Duration = Duration::from_millis(30);
/// Bound on how long a caller waits for its flush before falling back to
/// a direct, unbatched translate call.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Coarse VRAM headroom bands driving the dynamic max batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VramHeadroom {
    Low,
    Mid,
    High,
}

impl VramHeadroom {
    /// Capped by the engine's own static maximum (32, per
    /// `CTranslate2Engine.MAX_BATCH_SIZE`).
    fn max_batch_size(self) -> usize {
        match self {
            VramHeadroom::Low => 32,
            VramHeadroom::Mid => 16,
            VramHeadroom::High => 8,
        }
    }
}

type PairKey = (String, String);
type ReplySender = oneshot::Sender<Result<TranslationOutcome, EngineError>>;

struct QueueItem {
    text: String,
    reply: ReplySender,
}

static ENGINE: OnceCell<Arc<dyn TranslationEngine>> = OnceCell::new();
static CHANNELS: OnceCell<Mutex<HashMap<PairKey, mpsc::Sender<QueueItem>>>> = OnceCell::new();

/// Install the engine instance the aggregator dispatches batches to. Must
/// be called once during bootstrap before any `translate_via_aggregator`
/// call.
pub fn install_engine(engine: Arc<dyn TranslationEngine>) {
    ENGINE
        .set(engine)
        .unwrap_or_else(|_| tracing::warn!("translation engine already installed in aggregator"));
}

fn channel_for_pair(source_lang: &str, target_lang: &str, headroom: VramHeadroom) -> mpsc::Sender<QueueItem> {
    let channels = CHANNELS.get_or_init(|| Mutex::new(HashMap::new()));
    let key = (source_lang.to_string(), target_lang.to_string());
    let mut guard = channels.lock().unwrap_or_else(|poison| poison.into_inner());
    if let Some(sender) = guard.get(&key) {
        return sender.clone();
    }
    let batch_size = headroom.max_batch_size();
    let sender = spawn_pair_worker(key.clone(), batch_size);
    guard.insert(key, sender.clone());
    sender
}

/// One background task per `(source_lang, target_lang)`, flushing on
/// batch-size-reached or `MAX_DELAY`-elapsed, the same race
/// `start_batch_process` runs via `tokio::select!`.
fn spawn_pair_worker(key: PairKey, batch_size: usize) -> mpsc::Sender<QueueItem> {
    let (tx, mut rx) = mpsc::channel::<QueueItem>(2 * batch_size);
    tokio::spawn(async move {
        let (source_lang, target_lang) = key;
        let mut queue: Vec<QueueItem> = Vec::new();
        loop {
            let item = if queue.is_empty() {
                rx.recv().await
            } else {
                tokio::select! {
                    _ = sleep(MAX_DELAY) => None,
                    x = rx.recv() => x,
                }
            };

            match item {
                Some(item) => {
                    queue.push(item);
                    if queue.len() < batch_size {
                        continue;
                    }
                }
                None if queue.is_empty() => break,
                None => {}
            }

            let batch = std::mem::take(&mut queue);
            dispatch_batch(batch, &source_lang, &target_lang).await;
        }
    });
    tx
}

async fn dispatch_batch(batch: Vec<QueueItem>, source_lang: &str, target_lang: &str) {
    let engine = ENGINE.get().expect("aggregator engine not installed").clone();
    let texts: Vec<String> = batch.iter().map(|item| item.text.clone()).collect();
    let result = engine.translate_batch(&texts, source_lang, target_lang).await;

    match result {
        Ok(outcomes) => {
            for (item, outcome) in batch.into_iter().zip(outcomes) {
                let _ = item.reply.send(Ok(outcome));
            }
        }
        Err(err) => {
            for item in batch {
                let _ = item.reply.send(Err(clone_engine_error(&err)));
            }
        }
    }
}

fn clone_engine_error(err: &EngineError) -> EngineError {
    match err {
        EngineError::ModelNotLoaded => EngineError::ModelNotLoaded,
        EngineError::UnsupportedLanguage(lang) => EngineError::UnsupportedLanguage(lang.clone()),
        EngineError::TextTooLong { tokens, max } => {
            EngineError::TextTooLong { tokens: *tokens, max: *max }
        }
        EngineError::BatchSizeExceeded { size, max } => {
            EngineError::BatchSizeExceeded { size: *size, max: *max }
        }
        EngineError::InvalidInput(msg) => EngineError::InvalidInput(msg.clone()),
        EngineError::InferenceFailed(msg) => EngineError::InferenceFailed(msg.clone()),
        EngineError::ResourceExhausted(msg) => EngineError::ResourceExhausted(msg.clone()),
    }
}

/// Enqueue `text` for translation through the aggregator, grouped with
/// any other in-flight requests for the same language pair. Falls back to
/// a direct, unbatched `engine.translate` call if the queue doesn't flush
/// within `FALLBACK_TIMEOUT` - a caller that gives up waiting drops its
/// oneshot, and the worker's later `send` on it is then simply ignored,
/// which is the cancellation-drops-silently contract.
pub async fn translate_via_aggregator(
    text: String,
    source_lang: String,
    target_lang: String,
    headroom: VramHeadroom,
) -> Result<TranslationOutcome, EngineError> {
    let sender = channel_for_pair(&source_lang, &target_lang, headroom);
    let (reply, reply_rx) = oneshot::channel();

    if sender.send(QueueItem { text: text.clone(), reply }).await.is_err() {
        return direct_fallback(&text, &source_lang, &target_lang).await;
    }

    match tokio::time::timeout(FALLBACK_TIMEOUT, reply_rx).await {
        Ok(Ok(result)) => result,
        _ => direct_fallback(&text, &source_lang, &target_lang).await,
    }
}

async fn direct_fallback(
    text: &str,
    source_lang: &str,
    target_lang: &str,
) -> Result<TranslationOutcome, EngineError> {
    tracing::warn!("aggregator flush timed out, falling back to direct translate");
    let engine = ENGINE.get().expect("aggregator engine not installed");
    engine.translate(text, source_lang, target_lang).await
}

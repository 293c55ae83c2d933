//! Block source contract and an in-process implementation.
//!
//! A [`BlockSource`] delivers finalized blocks, in height order, to a
//! [`BlockHandler`]. When the handler fails the same block is delivered again
//! after [`FetchOptions::retry_interval`], unless
//! [`FetchOptions::skip_errored_blocks`] is set and the error is skippable.
//! Height-gate errors are always redelivered, and cancellation ends delivery
//! without reporting an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::types::Block;

/// Called with the height and error of every failed delivery.
pub type ErrorHook = Arc<dyn Fn(u64, &IndexerError) + Send + Sync>;

/// Delivery policy shared by every block source.
#[derive(Clone)]
pub struct FetchOptions {
    /// Delay before redelivering a block whose handler failed.
    pub retry_interval: Duration,
    /// Delay between polls once the source has no newer block.
    pub retry_last_block_interval: Duration,
    /// Move past a block whose handler failed instead of redelivering it.
    /// Gate errors such as a height gap are redelivered regardless.
    pub skip_errored_blocks: bool,
    pub on_error: Option<ErrorHook>,
}

impl FetchOptions {
    pub fn with_error_hook(mut self, hook: impl Fn(u64, &IndexerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            retry_last_block_interval: Duration::from_secs(1),
            skip_errored_blocks: false,
            on_error: None,
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("retry_interval", &self.retry_interval)
            .field("retry_last_block_interval", &self.retry_last_block_interval)
            .field("skip_errored_blocks", &self.skip_errored_blocks)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Receives blocks from a [`BlockSource`].
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn handle_block(&self, block: &Block) -> Result<(), IndexerError>;
}

/// Produces finalized blocks starting at a given height.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Deliver blocks from `from_height` onward until the source is exhausted
    /// or `cancel` fires.
    async fn fetch_blocks(
        &self,
        from_height: u64,
        handler: &dyn BlockHandler,
        opts: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<(), IndexerError>;
}

// ─── MemoryBlockSource ────────────────────────────────────────────────────────

/// Serves blocks held in memory.
///
/// In replay mode (the default) delivery ends at the first height with no
/// block. In follow mode the source waits for [`MemoryBlockSource::push`]
/// instead, polling every `retry_last_block_interval`.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockSource {
    blocks: Arc<Mutex<BTreeMap<u64, Block>>>,
    follow: bool,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let source = Self::new();
        {
            let mut map = source.lock_or_recover();
            for block in blocks {
                map.insert(block.height, block);
            }
        }
        source
    }

    /// Parse newline-delimited JSON blocks. Blank lines are ignored.
    pub fn from_ndjson(input: &str) -> Result<Self, IndexerError> {
        let mut blocks = Vec::new();
        for (line_no, line) in input.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let block: Block = serde_json::from_str(line).map_err(|e| {
                IndexerError::Source(format!("line {}: invalid block: {e}", line_no + 1))
            })?;
            blocks.push(block);
        }
        Ok(Self::from_blocks(blocks))
    }

    /// Keep waiting for new blocks instead of returning when caught up.
    pub fn following(mut self) -> Self {
        self.follow = true;
        self
    }

    pub fn push(&self, block: Block) {
        self.lock_or_recover().insert(block.height, block);
    }

    pub fn len(&self) -> usize {
        self.lock_or_recover().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, height: u64) -> Option<Block> {
        self.lock_or_recover().get(&height).cloned()
    }

    // The map holds plain data, so a panic in another holder cannot leave it
    // half-updated.
    fn lock_or_recover(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Block>> {
        self.blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sleep for `delay`; `false` if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn fetch_blocks(
        &self,
        from_height: u64,
        handler: &dyn BlockHandler,
        opts: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<(), IndexerError> {
        let mut height = from_height;

        while !cancel.is_cancelled() {
            let Some(block) = self.get(height) else {
                if !self.follow {
                    tracing::debug!(height, "memory source exhausted");
                    return Ok(());
                }
                if !pause(opts.retry_last_block_interval, &cancel).await {
                    break;
                }
                continue;
            };

            match handler.handle_block(&block).await {
                Ok(()) => height += 1,
                Err(e) if e.is_aborted() => {
                    tracing::info!(height, reason = %e, "block not started");
                    break;
                }
                Err(e) => {
                    tracing::warn!(height, error = %e, "block handler failed");
                    if let Some(hook) = &opts.on_error {
                        hook(height, &e);
                    }
                    if opts.skip_errored_blocks && e.is_skippable() {
                        tracing::warn!(height, "skipping errored block");
                        height += 1;
                    } else if !pause(opts.retry_interval, &cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(height, "block delivery cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn block(height: u64) -> Block {
        Block {
            height,
            time: chrono::DateTime::from_timestamp(1_600_000_000 + height as i64, 0).unwrap(),
            messages: vec![],
        }
    }

    /// Records delivered heights; fails the first `fail_first` deliveries,
    /// with a height gap instead of a storage error when `gap` is set.
    #[derive(Default)]
    struct Recording {
        seen: AsyncMutex<Vec<u64>>,
        fail_first: usize,
        gap: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BlockHandler for Recording {
        async fn handle_block(&self, block: &Block) -> Result<(), IndexerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push(block.height);
            if call < self.fail_first {
                if self.gap {
                    return Err(IndexerError::HeightTooHigh {
                        requested: block.height,
                        expected: block.height - 1,
                    });
                }
                return Err(IndexerError::Storage("transient".into()));
            }
            Ok(())
        }
    }

    /// Fails every delivery as a cancelled consumer would.
    struct Cancelled;

    #[async_trait]
    impl BlockHandler for Cancelled {
        async fn handle_block(&self, block: &Block) -> Result<(), IndexerError> {
            Err(IndexerError::Aborted {
                reason: format!("cancelled before block {}", block.height),
            })
        }
    }

    fn fast() -> FetchOptions {
        FetchOptions {
            retry_interval: Duration::from_millis(1),
            retry_last_block_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn replays_in_order_from_height() {
        let source = MemoryBlockSource::from_blocks((1..=5).map(block));
        let handler = Recording::default();
        source
            .fetch_blocks(3, &handler, &fast(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*handler.seen.lock().await, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn failed_block_is_redelivered() {
        let source = MemoryBlockSource::from_blocks((1..=2).map(block));
        let handler = Recording {
            fail_first: 2,
            ..Default::default()
        };
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let opts = fast().with_error_hook(move |height, _| {
            assert_eq!(height, 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source
            .fetch_blocks(1, &handler, &opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*handler.seen.lock().await, vec![1, 1, 1, 2]);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skip_flag_moves_past_failures() {
        let source = MemoryBlockSource::from_blocks((1..=3).map(block));
        let handler = Recording {
            fail_first: 1,
            ..Default::default()
        };
        let opts = FetchOptions {
            skip_errored_blocks: true,
            ..fast()
        };
        source
            .fetch_blocks(1, &handler, &opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*handler.seen.lock().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn skip_flag_still_redelivers_a_gap() {
        let source = MemoryBlockSource::from_blocks((2..=3).map(block));
        let handler = Recording {
            fail_first: 2,
            gap: true,
            ..Default::default()
        };
        let opts = FetchOptions {
            skip_errored_blocks: true,
            ..fast()
        };
        source
            .fetch_blocks(2, &handler, &opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*handler.seen.lock().await, vec![2, 2, 2, 3]);
    }

    #[tokio::test]
    async fn abort_ends_delivery_without_error_hook() {
        let source = MemoryBlockSource::from_blocks((1..=3).map(block));
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let opts = FetchOptions {
            skip_errored_blocks: true,
            ..fast()
        }
        .with_error_hook(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source
            .fetch_blocks(1, &Cancelled, &opts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn follow_mode_stops_on_cancel() {
        let source = MemoryBlockSource::from_blocks([block(1)]).following();
        let handler = Arc::new(Recording::default());
        let cancel = CancellationToken::new();

        let task = {
            let source = source.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                source.fetch_blocks(1, handler.as_ref(), &fast(), cancel).await
            })
        };

        source.push(block(2));
        while handler.seen.lock().await.len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(*handler.seen.lock().await, vec![1, 2]);
    }

    #[test]
    fn ndjson_parsing() {
        let input = r#"
{"height":1,"time":"2021-03-01T00:00:00Z","messages":[]}

{"height":2,"time":"2021-03-01T00:00:05Z","messages":[{"type":"Follow","owner":"a","whom":"b"}]}
"#;
        let source = MemoryBlockSource::from_ndjson(input).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.get(2).unwrap().messages.len(), 1);

        let err = MemoryBlockSource::from_ndjson("{not json}").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}

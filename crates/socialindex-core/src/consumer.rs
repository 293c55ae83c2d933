//! The consumer: wires a [`BlockSource`] to a [`HeightGate`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::gate::HeightGate;
use crate::handler::HandlerRegistry;
use crate::source::{BlockHandler, BlockSource, FetchOptions};
use crate::types::Block;

/// Pulls blocks from a source and applies each one exactly once.
pub struct Consumer {
    gate: Arc<dyn HeightGate>,
    source: Arc<dyn BlockSource>,
    registry: Arc<HandlerRegistry>,
    options: FetchOptions,
}

impl Consumer {
    pub fn new(
        gate: Arc<dyn HeightGate>,
        source: Arc<dyn BlockSource>,
        registry: HandlerRegistry,
        options: FetchOptions,
    ) -> Self {
        Self {
            gate,
            source,
            registry: Arc::new(registry),
            options,
        }
    }

    /// Health check: the last committed height.
    pub async fn ping(&self) -> Result<u64, IndexerError> {
        self.gate.height().await
    }

    /// Consume blocks from the stored height plus one until the source is
    /// exhausted or `cancel` fires. A block already being applied when the
    /// token fires is allowed to finish.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), IndexerError> {
        let from = self.gate.height().await? + 1;
        tracing::info!(from, "consumer starting");

        let applier = Applier {
            gate: self.gate.clone(),
            registry: self.registry.clone(),
            cancel: cancel.clone(),
        };
        self.source
            .fetch_blocks(from, &applier, &self.options, cancel)
            .await?;

        let height = self.gate.height().await?;
        tracing::info!(height, "consumer stopped");
        Ok(())
    }
}

struct Applier {
    gate: Arc<dyn HeightGate>,
    registry: Arc<HandlerRegistry>,
    cancel: CancellationToken,
}

#[async_trait]
impl BlockHandler for Applier {
    async fn handle_block(&self, block: &Block) -> Result<(), IndexerError> {
        if self.cancel.is_cancelled() {
            return Err(IndexerError::Aborted {
                reason: format!("cancelled before block {}", block.height),
            });
        }

        let started = Instant::now();
        match self.gate.apply_block(block, &self.registry).await {
            Ok(()) => {
                tracing::info!(
                    height = block.height,
                    msgs = block.messages.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "block applied"
                );
                Ok(())
            }
            Err(e) if e.is_already_applied() => {
                tracing::info!(height = block.height, "block already applied");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

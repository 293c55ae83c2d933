//! Height gate and the transactional mutation contract.
//!
//! A storage backend exposes two things to the pipeline:
//!
//! - [`Mutations`]: the write operations a message handler may perform, bound
//!   to one open transaction.
//! - [`HeightGate`]: applies a whole block exactly once. It takes the height
//!   lock, checks the requested height against the stored one, runs the
//!   dispatcher against a [`Mutations`] view of the transaction, advances the
//!   height, refreshes derived views and commits. Any failure rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IndexerError;
use crate::handler::HandlerRegistry;
use crate::types::{Block, LikeWeight, NewPost, PostId, Profile};

// ─── Mutations ────────────────────────────────────────────────────────────────

/// Write operations available to handlers inside one block transaction.
///
/// Nothing done through this trait is visible to readers until the enclosing
/// [`HeightGate::apply_block`] commits.
#[async_trait]
pub trait Mutations: Send {
    /// Insert a post. A duplicate id is a storage error.
    async fn create_post(&mut self, post: &NewPost) -> Result<(), IndexerError>;

    /// Soft-delete a live post. Returns [`IndexerError::NotFound`] if the post
    /// is absent or already deleted.
    async fn delete_post(
        &mut self,
        id: &PostId,
        deleted_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError>;

    /// Whether a post row exists, soft-deleted or not.
    async fn post_exists(&mut self, id: &PostId) -> Result<bool, IndexerError>;

    /// Current like weight of `liked_by` on the post, `None` if never liked.
    async fn like_weight(
        &mut self,
        id: &PostId,
        liked_by: &str,
    ) -> Result<Option<LikeWeight>, IndexerError>;

    /// Upsert a like. Returns [`IndexerError::NotFound`] if the post row is absent.
    async fn set_like(
        &mut self,
        id: &PostId,
        liked_by: &str,
        weight: LikeWeight,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError>;

    async fn follow(&mut self, follower: &str, followee: &str) -> Result<(), IndexerError>;

    async fn unfollow(&mut self, follower: &str, followee: &str) -> Result<(), IndexerError>;

    /// Append a ledger entry of `amount` uPDV.
    async fn add_pdv(
        &mut self,
        address: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError>;

    /// Purge every ledger entry of `address`.
    async fn reset_account(&mut self, address: &str) -> Result<(), IndexerError>;

    async fn has_pdv_history(&mut self, address: &str) -> Result<bool, IndexerError>;

    /// Upsert a profile. An existing row keeps its `created_at`; `updated_at`
    /// always takes the new value.
    async fn set_profile(&mut self, profile: &Profile) -> Result<(), IndexerError>;
}

// ─── HeightGate ───────────────────────────────────────────────────────────────

/// Exactly-once, strictly ordered block application.
#[async_trait]
pub trait HeightGate: Send + Sync {
    /// Apply `block` if and only if its height is the stored height plus one.
    ///
    /// Blocks until the height lock is available. Returns
    /// [`IndexerError::HeightTooLow`] for an already applied block and
    /// [`IndexerError::HeightTooHigh`] for a gap; in both cases nothing changes.
    async fn apply_block(
        &self,
        block: &Block,
        registry: &HandlerRegistry,
    ) -> Result<(), IndexerError>;

    /// The last committed height (0 before the first block).
    async fn height(&self) -> Result<u64, IndexerError>;
}

/// Compare a requested height against the stored one.
pub fn check_height(requested: u64, stored: u64) -> Result<(), IndexerError> {
    let expected = stored + 1;
    if requested > expected {
        return Err(IndexerError::HeightTooHigh {
            requested,
            expected,
        });
    }
    if requested < expected {
        return Err(IndexerError::HeightTooLow {
            requested,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_height_passes() {
        assert!(check_height(1, 0).is_ok());
        assert!(check_height(6, 5).is_ok());
    }

    #[test]
    fn gap_is_too_high() {
        match check_height(7, 5) {
            Err(IndexerError::HeightTooHigh { requested, expected }) => {
                assert_eq!((requested, expected), (7, 6));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn replay_is_too_low() {
        assert!(check_height(5, 5).unwrap_err().is_already_applied());
        assert!(check_height(1, 5).unwrap_err().is_already_applied());
    }
}

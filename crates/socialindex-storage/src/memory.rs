//! In-memory storage backend.
//!
//! Keeps every table in RAM and mirrors the Postgres backend's semantics:
//! a block is applied against a private working copy of the tables, derived
//! views are recomputed from it, and the result is published as one immutable
//! snapshot. Readers always see the last published snapshot.
//!
//! Each block clones every table and rebuilds every view, so replaying `n`
//! blocks costs O(n²) overall. Meant for development and tests, not for
//! long replays.
//!
//! All data is lost when the process exits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use socialindex_core::error::IndexerError;
use socialindex_core::gate::{check_height, HeightGate, Mutations};
use socialindex_core::handler::HandlerRegistry;
use socialindex_core::pdv;
use socialindex_core::query::{dedup_preserving_order, ListPostsParams, Queries};
use socialindex_core::stats;
use socialindex_core::types::{
    Block, DateValue, DecentrStats, LikeWeight, NewPost, Post, PostId, Profile, ProfileStats,
    ProfileSummary,
};

// ─── Tables ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PostRow {
    post: NewPost,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl PostRow {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct LikeRow {
    weight: LikeWeight,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    address: String,
    amount: i64,
    at: DateTime<Utc>,
}

/// Base tables. Cloned into a working copy for every block.
#[derive(Debug, Clone, Default)]
struct Tables {
    height: u64,
    posts: BTreeMap<PostId, PostRow>,
    slugs: HashMap<String, PostId>,
    likes: BTreeMap<(PostId, String), LikeRow>,
    /// `(follower, followee)`
    follows: BTreeSet<(String, String)>,
    profiles: BTreeMap<String, Profile>,
    ledger: Vec<LedgerEntry>,
}

// ─── Views ────────────────────────────────────────────────────────────────────

/// Committed tables plus the views derived from them.
#[derive(Debug, Default)]
struct Snapshot {
    tables: Tables,
    /// Live posts with their like aggregates.
    calculated_post: BTreeMap<PostId, Post>,
    post_stats: HashMap<PostId, Vec<DateValue>>,
    profile_stats: HashMap<String, Vec<DateValue>>,
    posts_count: HashMap<String, u32>,
}

impl Snapshot {
    fn materialize(tables: Tables) -> Self {
        let mut calculated_post = BTreeMap::new();
        let mut posts_count: HashMap<String, u32> = HashMap::new();
        for (id, row) in tables.posts.iter().filter(|(_, row)| row.is_live()) {
            let p = &row.post;
            calculated_post.insert(
                id.clone(),
                Post {
                    owner: id.owner.clone(),
                    uuid: id.uuid.clone(),
                    slug: p.slug.clone(),
                    title: p.title.clone(),
                    category: p.category,
                    preview_image: p.preview_image.clone(),
                    text: p.text.clone(),
                    created_at: p.created_at,
                    likes: 0,
                    dislikes: 0,
                    updv: 0,
                },
            );
            *posts_count.entry(id.owner.clone()).or_default() += 1;
        }

        let mut like_entries: HashMap<PostId, Vec<(DateTime<Utc>, i64)>> = HashMap::new();
        for ((id, _), like) in &tables.likes {
            let Some(post) = calculated_post.get_mut(id) else {
                continue;
            };
            match like.weight {
                LikeWeight::Up => post.likes += 1,
                LikeWeight::Down => post.dislikes += 1,
                LikeWeight::Zero => {}
            }
            let value = i64::from(like.weight.value()) * pdv::UPDV_PER_LIKE;
            post.updv += value;
            like_entries
                .entry(id.clone())
                .or_default()
                .push((like.at, value));
        }
        let post_stats = like_entries
            .into_iter()
            .map(|(id, entries)| (id, stats::cumulative_series(entries)))
            .collect();

        let mut ledger_by_address: HashMap<&str, Vec<(DateTime<Utc>, i64)>> = HashMap::new();
        for entry in &tables.ledger {
            ledger_by_address
                .entry(entry.address.as_str())
                .or_default()
                .push((entry.at, entry.amount));
        }
        let profile_stats = ledger_by_address
            .into_iter()
            .map(|(address, entries)| (address.to_string(), stats::cumulative_series(entries)))
            .collect();

        Self {
            tables,
            calculated_post,
            post_stats,
            profile_stats,
            posts_count,
        }
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// Working copy of the tables a block is applied to.
struct MemoryTransaction {
    tables: Tables,
}

#[async_trait]
impl Mutations for MemoryTransaction {
    async fn create_post(&mut self, post: &NewPost) -> Result<(), IndexerError> {
        if self.tables.posts.contains_key(&post.id) {
            return Err(IndexerError::Storage(format!(
                "duplicate key value violates unique constraint \"post_pkey\": {}",
                post.id
            )));
        }
        if self.tables.slugs.contains_key(&post.slug) {
            return Err(IndexerError::Storage(format!(
                "duplicate key value violates unique constraint \"post_slug_key\": {}",
                post.slug
            )));
        }
        self.tables.slugs.insert(post.slug.clone(), post.id.clone());
        self.tables.posts.insert(
            post.id.clone(),
            PostRow {
                post: post.clone(),
                deleted_at: None,
                deleted_by: None,
            },
        );
        Ok(())
    }

    async fn delete_post(
        &mut self,
        id: &PostId,
        deleted_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        match self.tables.posts.get_mut(id) {
            Some(row) if row.is_live() => {
                row.deleted_at = Some(at);
                row.deleted_by = Some(deleted_by.to_string());
                Ok(())
            }
            _ => Err(IndexerError::NotFound),
        }
    }

    async fn post_exists(&mut self, id: &PostId) -> Result<bool, IndexerError> {
        Ok(self.tables.posts.contains_key(id))
    }

    async fn like_weight(
        &mut self,
        id: &PostId,
        liked_by: &str,
    ) -> Result<Option<LikeWeight>, IndexerError> {
        Ok(self
            .tables
            .likes
            .get(&(id.clone(), liked_by.to_string()))
            .map(|l| l.weight))
    }

    async fn set_like(
        &mut self,
        id: &PostId,
        liked_by: &str,
        weight: LikeWeight,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        if !self.tables.posts.contains_key(id) {
            return Err(IndexerError::NotFound);
        }
        self.tables
            .likes
            .insert((id.clone(), liked_by.to_string()), LikeRow { weight, at });
        Ok(())
    }

    async fn follow(&mut self, follower: &str, followee: &str) -> Result<(), IndexerError> {
        self.tables
            .follows
            .insert((follower.to_string(), followee.to_string()));
        Ok(())
    }

    async fn unfollow(&mut self, follower: &str, followee: &str) -> Result<(), IndexerError> {
        self.tables
            .follows
            .remove(&(follower.to_string(), followee.to_string()));
        Ok(())
    }

    async fn add_pdv(
        &mut self,
        address: &str,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        self.tables.ledger.push(LedgerEntry {
            address: address.to_string(),
            amount,
            at,
        });
        Ok(())
    }

    async fn reset_account(&mut self, address: &str) -> Result<(), IndexerError> {
        self.tables.ledger.retain(|e| e.address != address);
        Ok(())
    }

    async fn has_pdv_history(&mut self, address: &str) -> Result<bool, IndexerError> {
        Ok(self.tables.ledger.iter().any(|e| e.address == address))
    }

    async fn set_profile(&mut self, profile: &Profile) -> Result<(), IndexerError> {
        let mut row = profile.clone();
        if let Some(existing) = self.tables.profiles.get(&profile.address) {
            row.created_at = existing.created_at;
        }
        self.tables.profiles.insert(row.address.clone(), row);
        Ok(())
    }
}

// ─── InMemoryStorage ──────────────────────────────────────────────────────────

/// In-memory indexer storage.
#[derive(Default)]
pub struct InMemoryStorage {
    /// Held for the whole of `apply_block`: the height lock.
    writer: Mutex<()>,
    committed: RwLock<Arc<Snapshot>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, IndexerError> {
        self.committed
            .read()
            .map(|s| Arc::clone(&*s))
            .map_err(|e| IndexerError::Lock(format!("snapshot read: {e}")))
    }

    fn publish(&self, snapshot: Snapshot) -> Result<(), IndexerError> {
        let mut guard = self
            .committed
            .write()
            .map_err(|e| IndexerError::Lock(format!("snapshot write: {e}")))?;
        *guard = Arc::new(snapshot);
        Ok(())
    }

    /// Number of ledger entries (including initial balances).
    pub fn ledger_len(&self) -> Result<usize, IndexerError> {
        Ok(self.snapshot()?.tables.ledger.len())
    }

    /// Net ledger balance of `address` in uPDV.
    pub fn balance(&self, address: &str) -> Result<i64, IndexerError> {
        Ok(self
            .snapshot()?
            .tables
            .ledger
            .iter()
            .filter(|e| e.address == address)
            .map(|e| e.amount)
            .sum())
    }

    /// Whether `follower` follows `followee`.
    pub fn is_following(&self, follower: &str, followee: &str) -> Result<bool, IndexerError> {
        Ok(self
            .snapshot()?
            .tables
            .follows
            .contains(&(follower.to_string(), followee.to_string())))
    }

    /// Who soft-deleted a post, if it is deleted.
    pub fn deleted_by(&self, id: &PostId) -> Result<Option<String>, IndexerError> {
        Ok(self
            .snapshot()?
            .tables
            .posts
            .get(id)
            .and_then(|row| row.deleted_by.clone()))
    }
}

#[async_trait]
impl HeightGate for InMemoryStorage {
    async fn apply_block(
        &self,
        block: &Block,
        registry: &HandlerRegistry,
    ) -> Result<(), IndexerError> {
        let _lock = self.writer.lock().await;

        let current = self.snapshot()?;
        check_height(block.height, current.tables.height)?;

        let mut tx = MemoryTransaction {
            tables: current.tables.clone(),
        };
        if let Err(e) = registry.dispatch(block, &mut tx).await {
            tracing::warn!(height = block.height, error = %e, "block rolled back");
            return Err(e);
        }

        tx.tables.height = block.height;
        self.publish(Snapshot::materialize(tx.tables))?;
        tracing::debug!(height = block.height, "block committed");
        Ok(())
    }

    async fn height(&self) -> Result<u64, IndexerError> {
        Ok(self.snapshot()?.tables.height)
    }
}

#[async_trait]
impl Queries for InMemoryStorage {
    async fn indexed_height(&self) -> Result<u64, IndexerError> {
        Ok(self.snapshot()?.tables.height)
    }

    async fn list_posts(&self, params: &ListPostsParams) -> Result<Vec<Post>, IndexerError> {
        params.validate()?;
        let snap = self.snapshot()?;

        let cursor = match &params.after {
            Some(id) => match snap.calculated_post.get(id) {
                Some(post) => Some(post),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut posts: Vec<&Post> = snap
            .calculated_post
            .iter()
            .filter(|(_, post)| params.matches(post))
            .filter(|(id, _)| {
                params.liked_by.as_ref().map_or(true, |liker| {
                    snap.tables
                        .likes
                        .contains_key(&((*id).clone(), liker.clone()))
                })
            })
            .filter(|(id, _)| {
                params.followed_by.as_ref().map_or(true, |follower| {
                    snap.tables
                        .follows
                        .contains(&(follower.clone(), id.owner.clone()))
                })
            })
            .map(|(_, post)| post)
            .filter(|post| cursor.map_or(true, |c| params.is_after(post, c)))
            .collect();

        posts.sort_by(|a, b| params.compare(a, b));
        posts.truncate(params.limit as usize);
        Ok(posts.into_iter().cloned().collect())
    }

    async fn get_post(&self, id: &PostId) -> Result<Post, IndexerError> {
        self.snapshot()?
            .calculated_post
            .get(id)
            .cloned()
            .ok_or(IndexerError::NotFound)
    }

    async fn get_post_by_slug(&self, slug: &str) -> Result<Post, IndexerError> {
        let snap = self.snapshot()?;
        snap.tables
            .slugs
            .get(slug)
            .and_then(|id| snap.calculated_post.get(id))
            .cloned()
            .ok_or(IndexerError::NotFound)
    }

    async fn get_profiles(
        &self,
        addresses: &[String],
    ) -> Result<Vec<ProfileSummary>, IndexerError> {
        let snap = self.snapshot()?;
        Ok(dedup_preserving_order(addresses)
            .into_iter()
            .filter_map(|address| {
                let profile = snap.tables.profiles.get(&address)?.clone();
                Some(ProfileSummary {
                    posts_count: snap.posts_count.get(&address).copied().unwrap_or(0),
                    profile,
                })
            })
            .collect())
    }

    async fn get_profile_stats(
        &self,
        addresses: &[String],
    ) -> Result<Vec<ProfileStats>, IndexerError> {
        let snap = self.snapshot()?;
        Ok(dedup_preserving_order(addresses)
            .into_iter()
            .map(|address| ProfileStats {
                posts_count: snap.posts_count.get(&address).copied().unwrap_or(0),
                stats: snap.profile_stats.get(&address).cloned().unwrap_or_default(),
                address,
            })
            .collect())
    }

    async fn get_post_stats(
        &self,
        ids: &[PostId],
    ) -> Result<HashMap<PostId, Vec<DateValue>>, IndexerError> {
        let snap = self.snapshot()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                snap.post_stats
                    .get(id)
                    .filter(|series| !series.is_empty())
                    .map(|series| (id.clone(), series.clone()))
            })
            .collect())
    }

    async fn get_decentr_stats(&self) -> Result<DecentrStats, IndexerError> {
        let snap = self.snapshot()?;
        Ok(stats::decentr_stats(
            snap.tables
                .ledger
                .iter()
                .map(|e| (e.address.as_str(), e.amount, e.at)),
        ))
    }

    async fn get_ddv_stats(&self) -> Result<Vec<DateValue>, IndexerError> {
        let snap = self.snapshot()?;
        Ok(stats::ddv_series(
            snap.tables.ledger.iter().map(|e| (e.at, e.amount)),
        ))
    }

    async fn get_likes(
        &self,
        liked_by: &str,
        ids: &[PostId],
    ) -> Result<HashMap<PostId, LikeWeight>, IndexerError> {
        let snap = self.snapshot()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                snap.tables
                    .likes
                    .get(&(id.clone(), liked_by.to_string()))
                    .map(|like| (id.clone(), like.weight))
            })
            .collect())
    }
}

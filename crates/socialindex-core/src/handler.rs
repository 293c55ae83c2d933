//! Message handlers and the dispatch registry.
//!
//! Each chain message kind maps to exactly one [`MessageHandler`]. The
//! [`HandlerRegistry`] routes a block's messages, in order, to their handlers
//! against the block's open transaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IndexerError;
use crate::gate::Mutations;
use crate::pdv;
use crate::types::{Block, LikeWeight, Message, MessageKind, NewPost, PostId, Profile};

/// Per-block information passed to every handler.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    pub height: u64,
    /// Timestamp every mutation in this block is stamped with.
    pub time: DateTime<Utc>,
}

impl From<&Block> for BlockContext {
    fn from(block: &Block) -> Self {
        Self {
            height: block.height,
            time: block.time,
        }
    }
}

/// Handles one kind of chain message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The message kind this handler is registered under.
    fn kind(&self) -> MessageKind;

    async fn handle(
        &self,
        msg: &Message,
        ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError>;
}

fn unexpected(expected: MessageKind, msg: &Message) -> IndexerError {
    IndexerError::Other(format!(
        "{expected} handler received {:?} message",
        msg.kind()
    ))
}

// ─── Built-in handlers ────────────────────────────────────────────────────────

pub struct CreatePostHandler;

#[async_trait]
impl MessageHandler for CreatePostHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::CreatePost
    }

    async fn handle(
        &self,
        msg: &Message,
        ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::CreatePost { post } = msg else {
            return Err(unexpected(self.kind(), msg));
        };
        tx.create_post(&NewPost::from_payload(post, ctx.time)).await
    }
}

pub struct DeletePostHandler;

#[async_trait]
impl MessageHandler for DeletePostHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::DeletePost
    }

    async fn handle(
        &self,
        msg: &Message,
        ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::DeletePost {
            post_owner,
            post_uuid,
            owner,
        } = msg
        else {
            return Err(unexpected(self.kind(), msg));
        };

        let id = PostId::new(post_owner.clone(), post_uuid.clone());
        match tx.delete_post(&id, owner, ctx.time).await {
            Err(e) if e.is_not_found() => {
                tracing::info!(height = ctx.height, post = %id, "delete of missing post ignored");
                Ok(())
            }
            other => other,
        }
    }
}

pub struct SetLikeHandler;

#[async_trait]
impl MessageHandler for SetLikeHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::SetLike
    }

    async fn handle(
        &self,
        msg: &Message,
        ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::SetLike {
            post_owner,
            post_uuid,
            owner,
            weight,
        } = msg
        else {
            return Err(unexpected(self.kind(), msg));
        };

        let id = PostId::new(post_owner.clone(), post_uuid.clone());
        if !tx.post_exists(&id).await? {
            tracing::info!(height = ctx.height, post = %id, "like of missing post ignored");
            return Ok(());
        }

        let previous = tx.like_weight(&id, owner).await?.unwrap_or(LikeWeight::Zero);
        let delta = weight.delta_from(previous);
        if delta != 0 {
            tx.add_pdv(post_owner, delta, ctx.time).await?;
        }
        tx.set_like(&id, owner, *weight, ctx.time).await
    }
}

pub struct FollowHandler;

#[async_trait]
impl MessageHandler for FollowHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::Follow
    }

    async fn handle(
        &self,
        msg: &Message,
        _ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::Follow { owner, whom } = msg else {
            return Err(unexpected(self.kind(), msg));
        };
        tx.follow(owner, whom).await
    }
}

pub struct UnfollowHandler;

#[async_trait]
impl MessageHandler for UnfollowHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::Unfollow
    }

    async fn handle(
        &self,
        msg: &Message,
        _ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::Unfollow { owner, whom } = msg else {
            return Err(unexpected(self.kind(), msg));
        };
        tx.unfollow(owner, whom).await
    }
}

pub struct DistributeRewardsHandler;

#[async_trait]
impl MessageHandler for DistributeRewardsHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::DistributeRewards
    }

    async fn handle(
        &self,
        msg: &Message,
        ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::DistributeRewards { rewards, .. } = msg else {
            return Err(unexpected(self.kind(), msg));
        };
        for reward in rewards {
            let amount = pdv::parse_pdv(&reward.reward)?;
            tx.add_pdv(&reward.receiver, amount, ctx.time).await?;
        }
        Ok(())
    }
}

pub struct ResetAccountHandler;

#[async_trait]
impl MessageHandler for ResetAccountHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::ResetAccount
    }

    async fn handle(
        &self,
        msg: &Message,
        _ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::ResetAccount { address, .. } = msg else {
            return Err(unexpected(self.kind(), msg));
        };
        tx.reset_account(address).await
    }
}

pub struct SetProfileHandler;

#[async_trait]
impl MessageHandler for SetProfileHandler {
    fn kind(&self) -> MessageKind {
        MessageKind::SetProfile
    }

    async fn handle(
        &self,
        msg: &Message,
        ctx: &BlockContext,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let Message::SetProfile {
            owner,
            first_name,
            last_name,
            bio,
            avatar,
            gender,
            birthday,
        } = msg
        else {
            return Err(unexpected(self.kind(), msg));
        };

        if !tx.has_pdv_history(owner).await? {
            tx.add_pdv(owner, pdv::INITIAL_BALANCE, pdv::sentinel_time())
                .await?;
        }

        tx.set_profile(&Profile {
            address: owner.clone(),
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            bio: bio.clone(),
            avatar: avatar.clone(),
            gender: gender.clone(),
            birthday: birthday.clone(),
            created_at: ctx.time,
            updated_at: ctx.time,
        })
        .await
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Routes messages to their handler by [`MessageKind`].
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A registry with a handler for every known message kind.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CreatePostHandler));
        registry.register(Arc::new(DeletePostHandler));
        registry.register(Arc::new(SetLikeHandler));
        registry.register(Arc::new(FollowHandler));
        registry.register(Arc::new(UnfollowHandler));
        registry.register(Arc::new(DistributeRewardsHandler));
        registry.register(Arc::new(ResetAccountHandler));
        registry.register(Arc::new(SetProfileHandler));
        registry
    }

    /// Register a handler, replacing any previous one for the same kind.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run every message of `block` through its handler, in order.
    ///
    /// Messages without a registered handler are skipped. The first handler
    /// error stops dispatch; the caller must roll back.
    pub async fn dispatch(
        &self,
        block: &Block,
        tx: &mut dyn Mutations,
    ) -> Result<(), IndexerError> {
        let ctx = BlockContext::from(block);
        for (index, msg) in block.messages.iter().enumerate() {
            let handler = msg.kind().and_then(|k| self.handlers.get(&k));
            let Some(handler) = handler else {
                tracing::debug!(height = block.height, index, ?msg, "skipping unhandled message");
                continue;
            };

            tracing::debug!(height = block.height, index, kind = %handler.kind(), "dispatching");
            handler
                .handle(msg, &ctx, tx)
                .await
                .map_err(|e| IndexerError::Handler {
                    handler: handler.kind().to_string(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, PostPayload, Reward};
    use std::collections::{HashMap, HashSet};

    /// Records every mutation; post/like state is tracked for SetLike.
    #[derive(Default)]
    struct Recorder {
        posts: HashMap<PostId, bool>,
        likes: HashMap<(PostId, String), LikeWeight>,
        ledger: Vec<(String, i64, DateTime<Utc>)>,
        follows: HashSet<(String, String)>,
        profiles: Vec<Profile>,
        fail_follow: bool,
    }

    #[async_trait]
    impl Mutations for Recorder {
        async fn create_post(&mut self, post: &NewPost) -> Result<(), IndexerError> {
            self.posts.insert(post.id.clone(), false);
            Ok(())
        }
        async fn delete_post(
            &mut self,
            id: &PostId,
            _by: &str,
            _at: DateTime<Utc>,
        ) -> Result<(), IndexerError> {
            match self.posts.get_mut(id) {
                Some(deleted) if !*deleted => {
                    *deleted = true;
                    Ok(())
                }
                _ => Err(IndexerError::NotFound),
            }
        }
        async fn post_exists(&mut self, id: &PostId) -> Result<bool, IndexerError> {
            Ok(self.posts.contains_key(id))
        }
        async fn like_weight(
            &mut self,
            id: &PostId,
            liked_by: &str,
        ) -> Result<Option<LikeWeight>, IndexerError> {
            Ok(self.likes.get(&(id.clone(), liked_by.to_string())).copied())
        }
        async fn set_like(
            &mut self,
            id: &PostId,
            liked_by: &str,
            weight: LikeWeight,
            _at: DateTime<Utc>,
        ) -> Result<(), IndexerError> {
            self.likes.insert((id.clone(), liked_by.to_string()), weight);
            Ok(())
        }
        async fn follow(&mut self, a: &str, b: &str) -> Result<(), IndexerError> {
            if self.fail_follow {
                return Err(IndexerError::Storage("boom".into()));
            }
            self.follows.insert((a.into(), b.into()));
            Ok(())
        }
        async fn unfollow(&mut self, a: &str, b: &str) -> Result<(), IndexerError> {
            self.follows.remove(&(a.to_string(), b.to_string()));
            Ok(())
        }
        async fn add_pdv(
            &mut self,
            address: &str,
            amount: i64,
            at: DateTime<Utc>,
        ) -> Result<(), IndexerError> {
            self.ledger.push((address.into(), amount, at));
            Ok(())
        }
        async fn reset_account(&mut self, address: &str) -> Result<(), IndexerError> {
            self.ledger.retain(|(a, _, _)| a != address);
            Ok(())
        }
        async fn has_pdv_history(&mut self, address: &str) -> Result<bool, IndexerError> {
            Ok(self.ledger.iter().any(|(a, _, _)| a == address))
        }
        async fn set_profile(&mut self, profile: &Profile) -> Result<(), IndexerError> {
            self.profiles.push(profile.clone());
            Ok(())
        }
    }

    fn block(height: u64, messages: Vec<Message>) -> Block {
        Block {
            height,
            time: DateTime::from_timestamp(1_600_000_000 + height as i64, 0).unwrap(),
            messages,
        }
    }

    fn create(owner: &str, uuid: &str) -> Message {
        Message::CreatePost {
            post: PostPayload {
                owner: owner.into(),
                uuid: uuid.into(),
                title: "title".into(),
                category: Category::WorldNews,
                preview_image: String::new(),
                text: "text".into(),
            },
        }
    }

    fn like(owner: &str, uuid: &str, liker: &str, weight: LikeWeight) -> Message {
        Message::SetLike {
            post_owner: owner.into(),
            post_uuid: uuid.into(),
            owner: liker.into(),
            weight,
        }
    }

    #[tokio::test]
    async fn like_appends_delta_to_post_owner() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder::default();
        let b = block(
            1,
            vec![
                create("alice", "p1"),
                like("alice", "p1", "bob", LikeWeight::Up),
                like("alice", "p1", "bob", LikeWeight::Up),
                like("alice", "p1", "bob", LikeWeight::Down),
            ],
        );
        registry.dispatch(&b, &mut tx).await.unwrap();

        let amounts: Vec<i64> = tx.ledger.iter().map(|(_, a, _)| *a).collect();
        assert_eq!(amounts, vec![pdv::UPDV_PER_LIKE, -2 * pdv::UPDV_PER_LIKE]);
        assert!(tx.ledger.iter().all(|(a, _, t)| a == "alice" && *t == b.time));
        assert_eq!(
            tx.likes[&(PostId::new("alice", "p1"), "bob".to_string())],
            LikeWeight::Down
        );
    }

    #[tokio::test]
    async fn like_of_absent_post_is_skipped() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder::default();
        registry
            .dispatch(&block(1, vec![like("ghost", "p", "bob", LikeWeight::Up)]), &mut tx)
            .await
            .unwrap();
        assert!(tx.ledger.is_empty());
        assert!(tx.likes.is_empty());
    }

    #[tokio::test]
    async fn double_delete_is_tolerated() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder::default();
        let delete = Message::DeletePost {
            post_owner: "alice".into(),
            post_uuid: "p1".into(),
            owner: "alice".into(),
        };
        let b = block(1, vec![create("alice", "p1"), delete.clone(), delete]);
        registry.dispatch(&b, &mut tx).await.unwrap();
        assert!(tx.posts[&PostId::new("alice", "p1")]);
    }

    #[tokio::test]
    async fn set_profile_seeds_initial_balance_once() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder::default();
        let profile = Message::SetProfile {
            owner: "carol".into(),
            first_name: "Carol".into(),
            last_name: String::new(),
            bio: String::new(),
            avatar: String::new(),
            gender: String::new(),
            birthday: String::new(),
        };
        registry
            .dispatch(&block(1, vec![profile.clone(), profile]), &mut tx)
            .await
            .unwrap();

        assert_eq!(tx.ledger.len(), 1);
        assert_eq!(tx.ledger[0].1, pdv::INITIAL_BALANCE);
        assert_eq!(tx.ledger[0].2, pdv::sentinel_time());
        assert_eq!(tx.profiles.len(), 2);
    }

    #[tokio::test]
    async fn rewards_and_reset() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder::default();
        let b = block(
            1,
            vec![
                Message::DistributeRewards {
                    owner: "supervisor".into(),
                    rewards: vec![
                        Reward { receiver: "dave".into(), reward: "0.0001".into() },
                        Reward { receiver: "erin".into(), reward: "2".into() },
                    ],
                },
                Message::ResetAccount { owner: "supervisor".into(), address: "dave".into() },
            ],
        );
        registry.dispatch(&b, &mut tx).await.unwrap();
        assert_eq!(tx.ledger.len(), 1);
        assert_eq!(tx.ledger[0].0, "erin");
        assert_eq!(tx.ledger[0].1, 2 * pdv::PDV_DENOMINATOR);
    }

    #[tokio::test]
    async fn unknown_messages_are_skipped() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder::default();
        registry
            .dispatch(&block(1, vec![Message::Unknown, create("a", "b")]), &mut tx)
            .await
            .unwrap();
        assert_eq!(tx.posts.len(), 1);
    }

    #[tokio::test]
    async fn first_error_stops_dispatch() {
        let registry = HandlerRegistry::standard();
        let mut tx = Recorder {
            fail_follow: true,
            ..Default::default()
        };
        let b = block(
            1,
            vec![
                Message::Follow { owner: "a".into(), whom: "b".into() },
                create("a", "p"),
            ],
        );
        let err = registry.dispatch(&b, &mut tx).await.unwrap_err();
        match err {
            IndexerError::Handler { handler, source } => {
                assert_eq!(handler, "Follow");
                assert!(matches!(*source, IndexerError::Storage(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(tx.posts.is_empty());
    }

    #[test]
    fn standard_covers_every_kind() {
        let registry = HandlerRegistry::standard();
        for kind in MessageKind::ALL {
            assert!(registry.handles(kind), "{kind} not registered");
        }
    }
}

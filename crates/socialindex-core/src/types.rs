//! Shared types for the indexing pipeline and the read model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IndexerError;
use crate::pdv;

// ─── PostId ───────────────────────────────────────────────────────────────────

/// Primary key of a post: the owner's address plus the client-chosen uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId {
    pub owner: String,
    pub uuid: String,
}

impl PostId {
    pub fn new(owner: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            uuid: uuid.into(),
        }
    }

    /// Stable, URL-safe identifier derived from the full id.
    ///
    /// `hex(SHA-256("owner/uuid"))[..32]`: 128 bits, so a collision on the
    /// unique slug column cannot wedge block application in practice.
    pub fn slug(&self) -> String {
        let hash = Sha256::digest(self.to_string().as_bytes());
        hex::encode(&hash[..16])
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.uuid)
    }
}

impl FromStr for PostId {
    type Err = IndexerError;

    /// Parse the `owner/uuid` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [owner, uuid] if !owner.is_empty() && !uuid.is_empty() => Ok(Self::new(*owner, *uuid)),
            _ => Err(IndexerError::Validation(format!("invalid post id '{s}'"))),
        }
    }
}

// ─── LikeWeight ───────────────────────────────────────────────────────────────

/// Signed weight of a like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum LikeWeight {
    Down,
    #[default]
    Zero,
    Up,
}

impl LikeWeight {
    pub fn value(self) -> i8 {
        match self {
            Self::Down => -1,
            Self::Zero => 0,
            Self::Up => 1,
        }
    }

    /// Ledger delta (in uPDV) for the post owner when a like moves from
    /// `previous` to `self`.
    pub fn delta_from(self, previous: LikeWeight) -> i64 {
        (i64::from(self.value()) - i64::from(previous.value())) * pdv::UPDV_PER_LIKE
    }
}

impl TryFrom<i8> for LikeWeight {
    type Error = IndexerError;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Self::Down),
            0 => Ok(Self::Zero),
            1 => Ok(Self::Up),
            other => Err(IndexerError::Validation(format!("invalid like weight {other}"))),
        }
    }
}

impl From<LikeWeight> for i8 {
    fn from(w: LikeWeight) -> Self {
        w.value()
    }
}

// ─── Category ─────────────────────────────────────────────────────────────────

/// Post category as defined by the community module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Category {
    WorldNews = 1,
    TravelAndTourism = 2,
    ScienceAndTechnology = 3,
    StrangeWorld = 4,
    ArtsAndEntertainment = 5,
    WritersAndWriting = 6,
    HealthAndFitness = 7,
    CryptoAndBlockchain = 8,
    Sports = 9,
}

impl TryFrom<u8> for Category {
    type Error = IndexerError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            1 => Self::WorldNews,
            2 => Self::TravelAndTourism,
            3 => Self::ScienceAndTechnology,
            4 => Self::StrangeWorld,
            5 => Self::ArtsAndEntertainment,
            6 => Self::WritersAndWriting,
            7 => Self::HealthAndFitness,
            8 => Self::CryptoAndBlockchain,
            9 => Self::Sports,
            other => {
                return Err(IndexerError::Validation(format!("invalid category value {other}")))
            }
        })
    }
}

impl From<Category> for u8 {
    fn from(c: Category) -> Self {
        c as u8
    }
}

// ─── Block & messages ─────────────────────────────────────────────────────────

/// A finalized block as delivered by the block source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    /// Block time; every mutation in the block is stamped with it.
    pub time: DateTime<Utc>,
    /// Decoded messages of all transactions, in order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Post body carried by [`Message::CreatePost`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    pub owner: String,
    pub uuid: String,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub preview_image: String,
    #[serde(default)]
    pub text: String,
}

/// A single reward inside [`Message::DistributeRewards`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub receiver: String,
    /// Decimal PDV amount, e.g. `"0.0001"`.
    pub reward: String,
}

/// Decoded chain message. Kinds this indexer does not know decode to
/// [`Message::Unknown`] and are skipped by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    CreatePost {
        post: PostPayload,
    },
    DeletePost {
        post_owner: String,
        post_uuid: String,
        /// Who deleted the post (owner or moderator).
        owner: String,
    },
    SetLike {
        post_owner: String,
        post_uuid: String,
        /// The liker.
        owner: String,
        weight: LikeWeight,
    },
    Follow {
        owner: String,
        whom: String,
    },
    Unfollow {
        owner: String,
        whom: String,
    },
    DistributeRewards {
        owner: String,
        rewards: Vec<Reward>,
    },
    ResetAccount {
        owner: String,
        address: String,
    },
    SetProfile {
        owner: String,
        #[serde(default)]
        first_name: String,
        #[serde(default)]
        last_name: String,
        #[serde(default)]
        bio: String,
        #[serde(default)]
        avatar: String,
        #[serde(default)]
        gender: String,
        #[serde(default)]
        birthday: String,
    },
    #[serde(other)]
    Unknown,
}

impl Message {
    /// The dispatch key of this message, `None` for unknown kinds.
    pub fn kind(&self) -> Option<MessageKind> {
        Some(match self {
            Self::CreatePost { .. } => MessageKind::CreatePost,
            Self::DeletePost { .. } => MessageKind::DeletePost,
            Self::SetLike { .. } => MessageKind::SetLike,
            Self::Follow { .. } => MessageKind::Follow,
            Self::Unfollow { .. } => MessageKind::Unfollow,
            Self::DistributeRewards { .. } => MessageKind::DistributeRewards,
            Self::ResetAccount { .. } => MessageKind::ResetAccount,
            Self::SetProfile { .. } => MessageKind::SetProfile,
            Self::Unknown => return None,
        })
    }
}

/// Message kinds the dispatcher can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    CreatePost,
    DeletePost,
    SetLike,
    Follow,
    Unfollow,
    DistributeRewards,
    ResetAccount,
    SetProfile,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        Self::CreatePost,
        Self::DeletePost,
        Self::SetLike,
        Self::Follow,
        Self::Unfollow,
        Self::DistributeRewards,
        Self::ResetAccount,
        Self::SetProfile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatePost => "CreatePost",
            Self::DeletePost => "DeletePost",
            Self::SetLike => "SetLike",
            Self::Follow => "Follow",
            Self::Unfollow => "Unfollow",
            Self::DistributeRewards => "DistributeRewards",
            Self::ResetAccount => "ResetAccount",
            Self::SetProfile => "SetProfile",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Write model ──────────────────────────────────────────────────────────────

/// A post row as inserted by the mutation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub id: PostId,
    pub slug: String,
    pub title: String,
    pub category: Category,
    pub preview_image: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl NewPost {
    pub fn from_payload(p: &PostPayload, created_at: DateTime<Utc>) -> Self {
        let id = PostId::new(p.owner.clone(), p.uuid.clone());
        Self {
            slug: id.slug(),
            id,
            title: p.title.clone(),
            category: p.category,
            preview_image: p.preview_image.clone(),
            text: p.text.clone(),
            created_at,
        }
    }
}

/// Denormalized profile fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub address: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub avatar: String,
    pub gender: String,
    pub birthday: String,
    /// First time the profile was written.
    pub created_at: DateTime<Utc>,
    /// Last time the profile was written.
    pub updated_at: DateTime<Utc>,
}

// ─── Read model ───────────────────────────────────────────────────────────────

/// A live post joined with its calculated aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub owner: String,
    pub uuid: String,
    pub slug: String,
    pub title: String,
    pub category: Category,
    pub preview_image: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub likes: u32,
    pub dislikes: u32,
    /// Net like value in uPDV.
    pub updv: i64,
}

impl Post {
    pub fn id(&self) -> PostId {
        PostId::new(self.owner.clone(), self.uuid.clone())
    }
}

/// A profile with its number of live posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    #[serde(flatten)]
    pub profile: Profile,
    pub posts_count: u32,
}

/// One point of a dated series. `value` is in uPDV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateValue {
    pub date: NaiveDate,
    pub value: i64,
}

/// Per-address balance series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub address: String,
    pub posts_count: u32,
    /// Cumulative balance at the end of each date, ascending, sentinel excluded.
    pub stats: Vec<DateValue>,
}

/// System-wide ledger aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecentrStats {
    /// Average net balance per account, uPDV.
    pub adv: f64,
    /// Total distributed value (every non-initial entry), uPDV.
    pub ddv: i64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

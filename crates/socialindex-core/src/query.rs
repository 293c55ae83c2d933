//! Read-side contract: list parameters, keyset ordering and the [`Queries`] trait.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::{
    Category, DateValue, DecentrStats, LikeWeight, Post, PostId, ProfileStats, ProfileSummary,
};

/// Page size used when none is requested.
pub const DEFAULT_LIMIT: u32 = 20;
/// Largest page a single request may ask for.
pub const MAX_LIMIT: u32 = 100;

// ─── Sorting ──────────────────────────────────────────────────────────────────

/// Primary sort column of [`Queries::list_posts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    CreatedAt,
    Likes,
    Dislikes,
    Pdv,
}

impl SortBy {
    /// Column name in the `calculated_post` view.
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Likes => "likes",
            Self::Dislikes => "dislikes",
            Self::Pdv => "updv",
        }
    }

    /// The value of this column for `post`.
    pub fn key(self, post: &Post) -> SortKey {
        match self {
            Self::CreatedAt => SortKey::Time(post.created_at),
            Self::Likes => SortKey::Int(i64::from(post.likes)),
            Self::Dislikes => SortKey::Int(i64::from(post.dislikes)),
            Self::Pdv => SortKey::Int(post.updv),
        }
    }
}

impl FromStr for SortBy {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" => Ok(Self::CreatedAt),
            "likesCount" => Ok(Self::Likes),
            "dislikesCount" => Ok(Self::Dislikes),
            "pdv" => Ok(Self::Pdv),
            other => Err(IndexerError::Validation(format!("invalid sortBy '{other}'"))),
        }
    }
}

/// A resolved sort value. Values of one [`SortBy`] are always the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Time(DateTime<Utc>),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Comparison operator selecting rows that come after a cursor.
    pub fn comparator(self) -> &'static str {
        match self {
            Self::Asc => ">",
            Self::Desc => "<",
        }
    }

    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

impl FromStr for Order {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(IndexerError::Validation(format!("invalid orderBy '{other}'"))),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

// ─── ListPostsParams ──────────────────────────────────────────────────────────

/// Filters, ordering and keyset cursor of a post listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPostsParams {
    pub sort_by: SortBy,
    pub order: Order,
    pub category: Option<Category>,
    pub owner: Option<String>,
    /// Only posts this address has a like row on (any weight).
    pub liked_by: Option<String>,
    /// Only posts whose owner this address follows.
    pub followed_by: Option<String>,
    /// Exclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    pub exclude_negative: bool,
    pub exclude_neutral: bool,
    /// Last post of the previous page.
    pub after: Option<PostId>,
    pub limit: u32,
}

impl Default for ListPostsParams {
    fn default() -> Self {
        Self {
            sort_by: SortBy::default(),
            order: Order::default(),
            category: None,
            owner: None,
            liked_by: None,
            followed_by: None,
            from: None,
            to: None,
            exclude_negative: false,
            exclude_neutral: false,
            after: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ListPostsParams {
    /// Parse the read API's string parameters (`sortBy`, `orderBy`, `category`,
    /// `owner`, `likedBy`, `followedBy`, `from`, `to`, `excludeNegative`,
    /// `excludeNeutral`, `after`, `limit`). Unknown keys are ignored.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, IndexerError> {
        let mut params = Self::default();
        let non_empty = |key: &str| query.get(key).map(String::as_str).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("sortBy") {
            params.sort_by = v.parse()?;
        }
        if let Some(v) = non_empty("orderBy") {
            params.order = v.parse()?;
        }
        if let Some(v) = non_empty("category") {
            let raw: u8 = v
                .parse()
                .map_err(|_| IndexerError::Validation(format!("invalid category '{v}'")))?;
            params.category = Some(Category::try_from(raw)?);
        }
        params.owner = non_empty("owner").map(str::to_owned);
        params.liked_by = non_empty("likedBy").map(str::to_owned);
        params.followed_by = non_empty("followedBy").map(str::to_owned);
        if let Some(v) = non_empty("from") {
            params.from = Some(parse_unix("from", v)?);
        }
        if let Some(v) = non_empty("to") {
            params.to = Some(parse_unix("to", v)?);
        }
        if let Some(v) = non_empty("excludeNegative") {
            params.exclude_negative = parse_flag("excludeNegative", v)?;
        }
        if let Some(v) = non_empty("excludeNeutral") {
            params.exclude_neutral = parse_flag("excludeNeutral", v)?;
        }
        if let Some(v) = non_empty("after") {
            params.after = Some(v.parse()?);
        }
        if let Some(v) = non_empty("limit") {
            params.limit = v
                .parse()
                .map_err(|_| IndexerError::Validation(format!("invalid limit '{v}'")))?;
        }

        params.validate()?;
        Ok(params)
    }

    /// Reject parameter combinations no backend can serve.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(IndexerError::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from >= to {
                return Err(IndexerError::Validation(format!(
                    "from ({from}) must be before to ({to})"
                )));
            }
        }
        Ok(())
    }

    /// Column predicates (category, owner, time window, value exclusions).
    /// The `liked_by` / `followed_by` joins are the backend's job.
    pub fn matches(&self, post: &Post) -> bool {
        if self.category.is_some_and(|c| c != post.category) {
            return false;
        }
        if self.owner.as_deref().is_some_and(|o| o != post.owner) {
            return false;
        }
        if self.from.is_some_and(|from| post.created_at <= from) {
            return false;
        }
        if self.to.is_some_and(|to| post.created_at >= to) {
            return false;
        }
        if self.exclude_negative && post.updv < 0 {
            return false;
        }
        if self.exclude_neutral && post.updv == 0 {
            return false;
        }
        true
    }

    /// Listing order: sort column, then owner, then uuid, all in `order`.
    pub fn compare(&self, a: &Post, b: &Post) -> Ordering {
        let ord = self
            .sort_by
            .key(a)
            .cmp(&self.sort_by.key(b))
            .then_with(|| a.owner.cmp(&b.owner))
            .then_with(|| a.uuid.cmp(&b.uuid));
        self.order.apply(ord)
    }

    /// Whether `post` comes strictly after `cursor` in listing order.
    pub fn is_after(&self, post: &Post, cursor: &Post) -> bool {
        self.compare(post, cursor) == Ordering::Greater
    }
}

fn parse_unix(key: &str, v: &str) -> Result<DateTime<Utc>, IndexerError> {
    v.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| IndexerError::Validation(format!("invalid {key} '{v}'")))
}

fn parse_flag(key: &str, v: &str) -> Result<bool, IndexerError> {
    v.parse::<bool>()
        .map_err(|_| IndexerError::Validation(format!("invalid {key} '{v}'")))
}

// ─── Queries ──────────────────────────────────────────────────────────────────

/// Read API over committed state. Implementations never observe a partially
/// applied block.
#[async_trait]
pub trait Queries: Send + Sync {
    /// Last committed height.
    async fn indexed_height(&self) -> Result<u64, IndexerError>;

    async fn list_posts(&self, params: &ListPostsParams) -> Result<Vec<Post>, IndexerError>;

    /// A live post by id; [`IndexerError::NotFound`] if absent or deleted.
    async fn get_post(&self, id: &PostId) -> Result<Post, IndexerError>;

    async fn get_post_by_slug(&self, slug: &str) -> Result<Post, IndexerError>;

    /// Resolve `owner/uuid` ids and bare slugs alike.
    async fn get_post_by_slug_or_id(&self, key: &str) -> Result<Post, IndexerError> {
        if key.contains('/') {
            let id: PostId = key.parse()?;
            self.get_post(&id).await
        } else {
            self.get_post_by_slug(key).await
        }
    }

    /// Existing profiles among `addresses`, in request order.
    async fn get_profiles(&self, addresses: &[String])
        -> Result<Vec<ProfileSummary>, IndexerError>;

    /// One entry per distinct requested address, in request order.
    async fn get_profile_stats(
        &self,
        addresses: &[String],
    ) -> Result<Vec<ProfileStats>, IndexerError>;

    /// Cumulative like value per date for each requested post that has likes.
    async fn get_post_stats(
        &self,
        ids: &[PostId],
    ) -> Result<HashMap<PostId, Vec<DateValue>>, IndexerError>;

    async fn get_decentr_stats(&self) -> Result<DecentrStats, IndexerError>;

    /// Cumulative distributed value per date.
    async fn get_ddv_stats(&self) -> Result<Vec<DateValue>, IndexerError>;

    /// Like weights `liked_by` has on each of `ids`; posts never liked are absent.
    async fn get_likes(
        &self,
        liked_by: &str,
        ids: &[PostId],
    ) -> Result<HashMap<PostId, LikeWeight>, IndexerError>;
}

/// Drop duplicates while keeping first-seen order.
pub fn dedup_preserving_order<T: Clone + Eq + std::hash::Hash>(items: &[T]) -> Vec<T> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items
        .iter()
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(owner: &str, uuid: &str, created: i64, likes: u32, updv: i64) -> Post {
        Post {
            owner: owner.into(),
            uuid: uuid.into(),
            slug: PostId::new(owner, uuid).slug(),
            title: String::new(),
            category: Category::WorldNews,
            preview_image: String::new(),
            text: String::new(),
            created_at: DateTime::from_timestamp(created, 0).unwrap(),
            likes,
            dislikes: 0,
            updv,
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn from_query_defaults() {
        let p = ListPostsParams::from_query(&HashMap::new()).unwrap();
        assert_eq!(p, ListPostsParams::default());
        assert_eq!(p.limit, DEFAULT_LIMIT);
        assert_eq!(p.order, Order::Desc);
    }

    #[test]
    fn from_query_parses_everything() {
        let p = ListPostsParams::from_query(&query(&[
            ("sortBy", "likesCount"),
            ("orderBy", "asc"),
            ("category", "8"),
            ("owner", "alice"),
            ("likedBy", "bob"),
            ("followedBy", "carol"),
            ("from", "1600000000"),
            ("to", "1600000100"),
            ("excludeNegative", "true"),
            ("excludeNeutral", "false"),
            ("after", "alice/p1"),
            ("limit", "50"),
        ]))
        .unwrap();

        assert_eq!(p.sort_by, SortBy::Likes);
        assert_eq!(p.order, Order::Asc);
        assert_eq!(p.category, Some(Category::CryptoAndBlockchain));
        assert_eq!(p.owner.as_deref(), Some("alice"));
        assert_eq!(p.liked_by.as_deref(), Some("bob"));
        assert_eq!(p.followed_by.as_deref(), Some("carol"));
        assert!(p.exclude_negative);
        assert!(!p.exclude_neutral);
        assert_eq!(p.after, Some(PostId::new("alice", "p1")));
        assert_eq!(p.limit, 50);
    }

    #[test]
    fn from_query_rejects_bad_values() {
        for pairs in [
            vec![("sortBy", "title")],
            vec![("orderBy", "up")],
            vec![("category", "10")],
            vec![("limit", "0")],
            vec![("limit", "101")],
            vec![("after", "nocursor")],
            vec![("from", "yesterday")],
            vec![("from", "200"), ("to", "100")],
        ] {
            let err = ListPostsParams::from_query(&query(&pairs)).unwrap_err();
            assert!(matches!(err, IndexerError::Validation(_)), "{pairs:?}");
        }
    }

    #[test]
    fn ties_broken_by_owner_then_uuid() {
        let params = ListPostsParams {
            sort_by: SortBy::Likes,
            order: Order::Desc,
            ..Default::default()
        };
        let mut posts = vec![
            post("a", "1", 0, 5, 0),
            post("b", "1", 0, 5, 0),
            post("a", "2", 0, 5, 0),
            post("c", "1", 0, 9, 0),
        ];
        posts.sort_by(|x, y| params.compare(x, y));
        let ids: Vec<String> = posts.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, ["c/1", "b/1", "a/2", "a/1"]);

        assert!(params.is_after(&posts[2], &posts[1]));
        assert!(!params.is_after(&posts[1], &posts[1]));
    }

    #[test]
    fn column_predicates() {
        let mut params = ListPostsParams {
            exclude_negative: true,
            ..Default::default()
        };
        assert!(params.matches(&post("a", "1", 10, 0, 0)));
        assert!(!params.matches(&post("a", "1", 10, 0, -1)));

        params.exclude_neutral = true;
        assert!(!params.matches(&post("a", "1", 10, 0, 0)));
        assert!(params.matches(&post("a", "1", 10, 0, 3)));

        params.from = DateTime::from_timestamp(10, 0);
        assert!(!params.matches(&post("a", "1", 10, 0, 3)));
        assert!(params.matches(&post("a", "1", 11, 0, 3)));
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let items = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(dedup_preserving_order(&items), ["b", "a", "c"].map(String::from));
    }
}

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

/// Karma credited to an author when their new content is seeded with a self-upvote.
pub const SEED_KARMA_DELTA: i64 = 1;

/// Divisor applied to the creation timestamp in the hot ranking.
pub const HOT_DECAY_SECONDS: f64 = 3600.0;

pub const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ScoreError {
    #[error("validation error: {0}")]
    Validation(String),
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(UserId);
ulid_id!(PostId);
ulid_id!(CommentId);
ulid_id!(ReplyId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Upvote,
    Downvote,
}

impl VoteDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }

    /// Parse a direction at the caller boundary. Anything other than the two
    /// directions (or their `up`/`down` short forms) is rejected here so the
    /// state machine never sees it.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upvote" | "up" => Some(Self::Upvote),
            "downvote" | "down" => Some(Self::Downvote),
            _ => None,
        }
    }
}

/// Per-(item, user) vote state. Derived from vote-set membership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoteState {
    Neutral,
    Upvoted,
    Downvoted,
}

impl VoteState {
    /// Signed contribution of this state to the item's net points and the author's karma.
    #[must_use]
    pub fn weight(self) -> i64 {
        match self {
            Self::Upvoted => 1,
            Self::Neutral => 0,
            Self::Downvoted => -1,
        }
    }

    /// Repeating the current direction returns to `Neutral`; the opposite
    /// direction flips directly.
    #[must_use]
    pub fn transition(self, direction: VoteDirection) -> Self {
        match (self, direction) {
            (Self::Upvoted, VoteDirection::Upvote) | (Self::Downvoted, VoteDirection::Downvote) => {
                Self::Neutral
            }
            (_, VoteDirection::Upvote) => Self::Upvoted,
            (_, VoteDirection::Downvote) => Self::Downvoted,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Upvoted => "upvoted",
            Self::Downvoted => "downvoted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Post,
    Comment,
    Reply,
}

impl ItemKind {
    /// Replies accrue to comment karma.
    #[must_use]
    pub fn karma_kind(self) -> KarmaKind {
        match self {
            Self::Post => KarmaKind::Post,
            Self::Comment | Self::Reply => KarmaKind::Comment,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KarmaKind {
    Post,
    Comment,
}

/// Per-user karma cache. Only ever adjusted by deltas returned from a vote or a seed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Karma {
    pub post_karma: i64,
    pub comment_karma: i64,
}

impl Karma {
    pub fn apply(&mut self, kind: KarmaKind, delta: i64) {
        match kind {
            KarmaKind::Post => self.post_karma = self.post_karma.saturating_add(delta),
            KarmaKind::Comment => self.comment_karma = self.comment_karma.saturating_add(delta),
        }
    }

    #[must_use]
    pub fn get(&self, kind: KarmaKind) -> i64 {
        match kind {
            KarmaKind::Post => self.post_karma,
            KarmaKind::Comment => self.comment_karma,
        }
    }

    #[must_use]
    pub fn total(&self) -> i64 {
        self.post_karma.saturating_add(self.comment_karma)
    }
}

/// The two vote sets of a votable item. A user is in at most one of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct VoteSets {
    #[serde(default)]
    upvoters: BTreeSet<UserId>,
    #[serde(default)]
    downvoters: BTreeSet<UserId>,
}

impl VoteSets {
    /// Sets for freshly created content: the author upvotes their own item.
    #[must_use]
    pub fn seeded(author: UserId) -> Self {
        Self { upvoters: BTreeSet::from([author]), downvoters: BTreeSet::new() }
    }

    /// Build vote sets from a loaded snapshot.
    ///
    /// # Errors
    /// Returns [`ScoreError::Validation`] when a user appears in both sets.
    pub fn from_parts(
        upvoters: impl IntoIterator<Item = UserId>,
        downvoters: impl IntoIterator<Item = UserId>,
    ) -> Result<Self, ScoreError> {
        let votes = Self {
            upvoters: upvoters.into_iter().collect(),
            downvoters: downvoters.into_iter().collect(),
        };
        votes.validate()?;
        Ok(votes)
    }

    /// # Errors
    /// Returns [`ScoreError::Validation`] when the upvoter and downvoter sets intersect.
    pub fn validate(&self) -> Result<(), ScoreError> {
        if let Some(user) = self.upvoters.intersection(&self.downvoters).next() {
            return Err(ScoreError::Validation(format!(
                "user {user} MUST NOT be both an upvoter and a downvoter"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn upvoters(&self) -> &BTreeSet<UserId> {
        &self.upvoters
    }

    #[must_use]
    pub fn downvoters(&self) -> &BTreeSet<UserId> {
        &self.downvoters
    }

    #[must_use]
    pub fn upvotes(&self) -> u64 {
        u64::try_from(self.upvoters.len()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn downvotes(&self) -> u64 {
        u64::try_from(self.downvoters.len()).unwrap_or(u64::MAX)
    }

    /// `|upvoters| - |downvoters|`, unfloored.
    #[must_use]
    pub fn raw_points(&self) -> i64 {
        raw_points(self.upvotes(), self.downvotes())
    }

    #[must_use]
    pub fn state_of(&self, user: UserId) -> VoteState {
        if self.upvoters.contains(&user) {
            VoteState::Upvoted
        } else if self.downvoters.contains(&user) {
            VoteState::Downvoted
        } else {
            VoteState::Neutral
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct VoteOutcome {
    pub votes: VoteSets,
    pub previous: VoteState,
    pub next: VoteState,
    pub raw_points: i64,
    /// Signed amount to add to the item author's karma counter.
    pub karma_delta: i64,
}

/// Run one toggle transition for `voter` against a vote-set snapshot.
///
/// The voter is removed from both sets before being placed in the set that
/// matches the next state, so the sets stay disjoint no matter what the
/// previous state was.
#[must_use]
pub fn apply_vote(votes: &VoteSets, voter: UserId, direction: VoteDirection) -> VoteOutcome {
    let previous = votes.state_of(voter);
    let next = previous.transition(direction);

    let mut updated = votes.clone();
    updated.upvoters.remove(&voter);
    updated.downvoters.remove(&voter);
    match next {
        VoteState::Upvoted => {
            updated.upvoters.insert(voter);
        }
        VoteState::Downvoted => {
            updated.downvoters.insert(voter);
        }
        VoteState::Neutral => {}
    }

    VoteOutcome {
        raw_points: updated.raw_points(),
        karma_delta: next.weight() - previous.weight(),
        votes: updated,
        previous,
        next,
    }
}

fn count_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn count_to_f64(value: u64) -> f64 {
    value as f64
}

fn net_magnitude(upvotes: u64, downvotes: u64) -> f64 {
    count_to_f64(upvotes.abs_diff(downvotes).max(1))
}

#[must_use]
pub fn raw_points(upvotes: u64, downvotes: u64) -> i64 {
    count_to_i64(upvotes).saturating_sub(count_to_i64(downvotes))
}

/// Net score floored at zero, used for display and `top` ordering.
#[must_use]
pub fn display_points(upvotes: u64, downvotes: u64) -> i64 {
    raw_points(upvotes, downvotes).max(0)
}

/// `upvotes / downvotes`, or exactly `1.0` while there are no downvotes.
#[must_use]
pub fn vote_ratio(upvotes: u64, downvotes: u64) -> f64 {
    if downvotes == 0 {
        return 1.0;
    }
    count_to_f64(upvotes) / count_to_f64(downvotes)
}

/// `ln(max(|up - down|, 1)) + created_at / 3600`. Newer content ranks higher
/// for the same vote magnitude. A non-finite timestamp contributes nothing.
#[must_use]
pub fn hot_algo(upvotes: u64, downvotes: u64, created_at_seconds: f64) -> f64 {
    let age_term =
        if created_at_seconds.is_finite() { created_at_seconds / HOT_DECAY_SECONDS } else { 0.0 };
    net_magnitude(upvotes, downvotes).ln() + age_term
}

/// `(up + down) / max(|up - down|, 1)`.
#[must_use]
pub fn controversial_algo(upvotes: u64, downvotes: u64) -> f64 {
    (count_to_f64(upvotes) + count_to_f64(downvotes)) / net_magnitude(upvotes, downvotes)
}

/// Fractional seconds since the Unix epoch.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn unix_seconds(at: OffsetDateTime) -> f64 {
    at.unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreCard {
    pub raw_points: i64,
    pub points_count: i64,
    pub vote_ratio: f64,
    pub hot_algo: Option<f64>,
    pub controversial_algo: f64,
}

/// Derive every score field from raw counts. `hot_algo` is only produced
/// when a creation timestamp (epoch seconds) is supplied.
#[must_use]
pub fn compute_scores(upvotes: u64, downvotes: u64, created_at_seconds: Option<f64>) -> ScoreCard {
    ScoreCard {
        raw_points: raw_points(upvotes, downvotes),
        points_count: display_points(upvotes, downvotes),
        vote_ratio: vote_ratio(upvotes, downvotes),
        hot_algo: created_at_seconds.map(|seconds| hot_algo(upvotes, downvotes, seconds)),
        controversial_algo: controversial_algo(upvotes, downvotes),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PostScores {
    pub raw_points: i64,
    pub points_count: i64,
    pub vote_ratio: f64,
    pub hot_algo: f64,
    pub controversial_algo: f64,
}

impl PostScores {
    #[must_use]
    pub fn compute(votes: &VoteSets, created_at: OffsetDateTime) -> Self {
        let (upvotes, downvotes) = (votes.upvotes(), votes.downvotes());
        let card = compute_scores(upvotes, downvotes, None);
        Self {
            raw_points: card.raw_points,
            points_count: card.points_count,
            vote_ratio: card.vote_ratio,
            hot_algo: hot_algo(upvotes, downvotes, unix_seconds(created_at)),
            controversial_algo: card.controversial_algo,
        }
    }
}

/// Anything that carries its own vote sets and an author whose karma they feed.
pub trait Votable {
    fn kind(&self) -> ItemKind;

    fn author(&self) -> UserId;

    fn votes(&self) -> &VoteSets;

    fn votes_mut(&mut self) -> &mut VoteSets;

    /// Recompute cached score fields from the current vote sets.
    fn refresh_scores(&mut self);

    /// Apply a toggle transition in place. Cached scores are left untouched
    /// until [`Votable::refresh_scores`] is called.
    fn apply_vote(&mut self, voter: UserId, direction: VoteDirection) -> VoteOutcome {
        let outcome = apply_vote(self.votes(), voter, direction);
        *self.votes_mut() = outcome.votes.clone();
        outcome
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "post_type", rename_all = "snake_case")]
pub enum PostBody {
    Text { text: String },
    Link { url: String },
    Image { image_link: String, image_id: Option<String> },
}

impl PostBody {
    #[must_use]
    pub fn post_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Link { .. } => "link",
            Self::Image { .. } => "image",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub id: ReplyId,
    pub author: UserId,
    pub body: String,
    pub votes: VoteSets,
    pub points_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Reply {
    #[must_use]
    pub fn new(author: UserId, body: impl Into<String>, created_at: OffsetDateTime) -> Self {
        let votes = VoteSets::seeded(author);
        Self {
            id: ReplyId::new(),
            author,
            body: body.into(),
            points_count: votes.raw_points(),
            votes,
            created_at,
            updated_at: created_at,
        }
    }
}

impl Votable for Reply {
    fn kind(&self) -> ItemKind {
        ItemKind::Reply
    }

    fn author(&self) -> UserId {
        self.author
    }

    fn votes(&self) -> &VoteSets {
        &self.votes
    }

    fn votes_mut(&mut self) -> &mut VoteSets {
        &mut self.votes
    }

    fn refresh_scores(&mut self) {
        self.points_count = self.votes.raw_points();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: CommentId,
    pub author: UserId,
    pub body: String,
    pub votes: VoteSets,
    pub points_count: i64,
    #[serde(default)]
    pub replies: Vec<Reply>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Comment {
    #[must_use]
    pub fn new(author: UserId, body: impl Into<String>, created_at: OffsetDateTime) -> Self {
        let votes = VoteSets::seeded(author);
        Self {
            id: CommentId::new(),
            author,
            body: body.into(),
            points_count: votes.raw_points(),
            votes,
            replies: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[must_use]
    pub fn reply(&self, reply_id: ReplyId) -> Option<&Reply> {
        self.replies.iter().find(|reply| reply.id == reply_id)
    }

    pub fn reply_mut(&mut self, reply_id: ReplyId) -> Option<&mut Reply> {
        self.replies.iter_mut().find(|reply| reply.id == reply_id)
    }
}

impl Votable for Comment {
    fn kind(&self) -> ItemKind {
        ItemKind::Comment
    }

    fn author(&self) -> UserId {
        self.author
    }

    fn votes(&self) -> &VoteSets {
        &self.votes
    }

    fn votes_mut(&mut self) -> &mut VoteSets {
        &mut self.votes
    }

    fn refresh_scores(&mut self) {
        self.points_count = self.votes.raw_points();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub author: UserId,
    pub subreddit: String,
    pub title: String,
    pub body: PostBody,
    pub votes: VoteSets,
    pub scores: PostScores,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub comment_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Post {
    #[must_use]
    pub fn new(
        author: UserId,
        subreddit: impl Into<String>,
        title: impl Into<String>,
        body: PostBody,
        created_at: OffsetDateTime,
    ) -> Self {
        let votes = VoteSets::seeded(author);
        Self {
            id: PostId::new(),
            author,
            subreddit: subreddit.into(),
            title: title.into(),
            body,
            scores: PostScores::compute(&votes, created_at),
            votes,
            comments: Vec::new(),
            comment_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Validate a loaded post and every comment and reply under it.
    ///
    /// # Errors
    /// Returns [`ScoreError::Validation`] when the title is empty or too long,
    /// or when any vote-set pair in the thread overlaps.
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.title.trim().is_empty() {
            return Err(ScoreError::Validation("post title MUST be non-empty".to_string()));
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(ScoreError::Validation(format!(
                "post title MUST be at most {MAX_TITLE_CHARS} characters"
            )));
        }

        self.votes.validate()?;
        for comment in &self.comments {
            comment.votes.validate()?;
            for reply in &comment.replies {
                reply.votes.validate()?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn comment(&self, comment_id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|comment| comment.id == comment_id)
    }

    pub fn comment_mut(&mut self, comment_id: CommentId) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|comment| comment.id == comment_id)
    }

    /// Comments plus their replies.
    pub fn refresh_comment_count(&mut self) {
        self.comment_count = self.comments.iter().map(|comment| 1 + comment.replies.len()).sum();
    }
}

impl Votable for Post {
    fn kind(&self) -> ItemKind {
        ItemKind::Post
    }

    fn author(&self) -> UserId {
        self.author
    }

    fn votes(&self) -> &VoteSets {
        &self.votes
    }

    fn votes_mut(&mut self) -> &mut VoteSets {
        &mut self.votes
    }

    fn refresh_scores(&mut self) {
        self.scores = PostScores::compute(&self.votes, self.created_at);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    New,
    Top,
    Best,
    Hot,
    Controversial,
    Old,
}

impl SortBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Top => "top",
            Self::Best => "best",
            Self::Hot => "hot",
            Self::Controversial => "controversial",
            Self::Old => "old",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "top" => Some(Self::Top),
            "best" => Some(Self::Best),
            "hot" => Some(Self::Hot),
            "controversial" => Some(Self::Controversial),
            "old" => Some(Self::Old),
            _ => None,
        }
    }

    #[must_use]
    pub fn tie_breakers(self) -> Vec<String> {
        let primary = match self {
            Self::New => "created_at desc",
            Self::Top => "points_count desc",
            Self::Best => "vote_ratio desc",
            Self::Hot => "hot_algo desc",
            Self::Controversial => "controversial_algo desc",
            Self::Old => "created_at asc",
        };
        let mut keys = vec![primary.to_string()];
        if !self.orders_by_created_at() {
            keys.push("created_at desc".to_string());
        }
        keys.push("post_id asc".to_string());
        keys
    }

    fn orders_by_created_at(self) -> bool {
        matches!(self, Self::New | Self::Old)
    }

    fn cmp(self, lhs: &Post, rhs: &Post) -> Ordering {
        let primary = match self {
            Self::New => rhs.created_at.cmp(&lhs.created_at),
            Self::Old => lhs.created_at.cmp(&rhs.created_at),
            Self::Top => rhs.scores.points_count.cmp(&lhs.scores.points_count),
            Self::Best => descending(lhs.scores.vote_ratio, rhs.scores.vote_ratio),
            Self::Hot => descending(lhs.scores.hot_algo, rhs.scores.hot_algo),
            Self::Controversial => {
                descending(lhs.scores.controversial_algo, rhs.scores.controversial_algo)
            }
        };
        let recency = if self.orders_by_created_at() {
            Ordering::Equal
        } else {
            rhs.created_at.cmp(&lhs.created_at)
        };
        primary.then(recency).then_with(|| lhs.id.cmp(&rhs.id))
    }
}

fn descending(lhs: f64, rhs: f64) -> Ordering {
    rhs.partial_cmp(&lhs).unwrap_or(Ordering::Equal)
}

/// Order posts for a listing. `None` keeps the stored order.
#[must_use]
pub fn rank_posts(posts: &[Post], sort_by: Option<SortBy>) -> Vec<&Post> {
    let mut ranked = posts.iter().collect::<Vec<_>>();
    if let Some(sort_by) = sort_by {
        ranked.sort_by(|lhs, rhs| sort_by.cmp(lhs, rhs));
    }
    ranked
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use forum_score_core::{
    rank_posts, Comment, CommentId, ItemKind, Karma, KarmaKind, Post, PostBody, PostId, Reply,
    ReplyId, SortBy, UserId, Votable, VoteDirection, VoteOutcome, VoteState, MAX_TITLE_CHARS,
    SEED_KARMA_DELTA,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use ulid::Ulid;

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const MIN_USERNAME_CHARS: usize = 3;
const MAX_USERNAME_CHARS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub karma: Karma,
    #[serde(default)]
    pub posts: Vec<PostId>,
    #[serde(default)]
    pub total_comments: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Everything the forum knows about users and content, as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForumSnapshot {
    pub format_version: u32,
    pub revision: u64,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl Default for ForumSnapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            revision: 0,
            users: Vec::new(),
            posts: Vec::new(),
        }
    }
}

impl ForumSnapshot {
    fn validate(&self) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            bail!(
                "unsupported snapshot format_version {} (expected {SNAPSHOT_FORMAT_VERSION})",
                self.format_version
            );
        }
        for post in &self.posts {
            post.validate().with_context(|| format!("invalid post {}", post.id))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotStatus {
    pub state_path: PathBuf,
    pub revision: u64,
    pub users: usize,
    pub posts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePostRequest {
    pub author: UserId,
    pub subreddit: String,
    pub title: String,
    pub body: PostBody,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddCommentRequest {
    pub post_id: PostId,
    pub author: UserId,
    pub body: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddReplyRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub author: UserId,
    pub body: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostVoteRequest {
    pub post_id: PostId,
    pub voter: UserId,
    pub direction: VoteDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentVoteRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub voter: UserId,
    pub direction: VoteDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyVoteRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub reply_id: ReplyId,
    pub voter: UserId,
    pub direction: VoteDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditCommentRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub requester: UserId,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditReplyRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub reply_id: ReplyId,
    pub requester: UserId,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteCommentRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub requester: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteReplyRequest {
    pub post_id: PostId,
    pub comment_id: CommentId,
    pub reply_id: ReplyId,
    pub requester: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionReceipt {
    pub item_kind: ItemKind,
    pub item_id: String,
    pub post_id: PostId,
    pub comment_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListPostsRequest {
    pub subreddit: Option<String>,
    pub sort: Option<SortBy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteReceipt {
    pub item_kind: ItemKind,
    pub item_id: String,
    pub voter: UserId,
    pub direction: VoteDirection,
    pub previous: VoteState,
    pub next: VoteState,
    pub raw_points: i64,
    pub points_count: i64,
    pub karma_delta: i64,
    pub author: UserId,
    pub author_karma: Karma,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostSummary {
    pub id: PostId,
    pub author: UserId,
    pub subreddit: String,
    pub title: String,
    pub post_type: String,
    pub points_count: i64,
    pub raw_points: i64,
    pub vote_ratio: f64,
    pub hot_algo: f64,
    pub controversial_algo: f64,
    pub comment_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PostSummary {
    fn from_post(post: &Post) -> Self {
        Self {
            id: post.id,
            author: post.author,
            subreddit: post.subreddit.clone(),
            title: post.title.clone(),
            post_type: post.body.post_type().to_string(),
            points_count: post.scores.points_count,
            raw_points: post.scores.raw_points,
            vote_ratio: post.scores.vote_ratio,
            hot_algo: post.scores.hot_algo,
            controversial_algo: post.scores.controversial_algo,
            comment_count: post.comment_count,
            created_at: post.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostListing {
    pub sort: Option<SortBy>,
    pub tie_breakers: Vec<String>,
    pub posts: Vec<PostSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserKarmaView {
    pub user_id: UserId,
    pub username: String,
    pub karma: Karma,
    pub total_karma: i64,
    pub total_comments: u64,
}

struct LoadedSnapshot {
    snapshot: ForumSnapshot,
    digest: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ForumScoreApi {
    state_path: PathBuf,
}

impl ForumScoreApi {
    #[must_use]
    pub fn new(state_path: PathBuf) -> Self {
        Self { state_path }
    }

    fn load(&self) -> Result<LoadedSnapshot> {
        let Some(bytes) = read_if_exists(&self.state_path)? else {
            debug!(path = %self.state_path.display(), "no snapshot on disk, starting empty");
            return Ok(LoadedSnapshot { snapshot: ForumSnapshot::default(), digest: None });
        };

        let snapshot: ForumSnapshot = serde_json::from_slice(&bytes).with_context(|| {
            format!("failed to parse forum snapshot {}", self.state_path.display())
        })?;
        snapshot.validate()?;
        debug!(
            path = %self.state_path.display(),
            revision = snapshot.revision,
            posts = snapshot.posts.len(),
            users = snapshot.users.len(),
            "loaded forum snapshot"
        );
        Ok(LoadedSnapshot { snapshot, digest: Some(digest_hex(&bytes)) })
    }

    /// Write the snapshot back, refusing if another writer replaced the file
    /// after `loaded` was read.
    ///
    /// The digest check and the rename are separate steps, so two writers that
    /// both pass the check before either renames still race and the later
    /// rename wins. Each write stages into its own temp file, so the loser
    /// never moves the winner's bytes.
    fn store(&self, loaded: LoadedSnapshot) -> Result<ForumSnapshot> {
        let on_disk = read_if_exists(&self.state_path)?.map(|bytes| digest_hex(&bytes));
        if on_disk != loaded.digest {
            warn!(
                path = %self.state_path.display(),
                revision = loaded.snapshot.revision,
                "snapshot changed underneath a pending write"
            );
            bail!(
                "forum snapshot {} changed since it was loaded; retry the operation",
                self.state_path.display()
            );
        }

        let mut snapshot = loaded.snapshot;
        snapshot.revision += 1;
        let body = serde_json::to_vec_pretty(&snapshot).context("failed to serialize snapshot")?;

        if let Some(parent) = self.state_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let mut tmp_path = self.state_path.clone().into_os_string();
        tmp_path.push(format!(".{}.tmp", Ulid::new()));
        let tmp_path = PathBuf::from(tmp_path);
        fs::write(&tmp_path, &body)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.state_path).with_context(|| {
            format!("failed to move {} into place", self.state_path.display())
        })?;

        debug!(
            path = %self.state_path.display(),
            revision = snapshot.revision,
            "stored forum snapshot"
        );
        Ok(snapshot)
    }

    /// Create an empty snapshot when none exists and report its status.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be read, parsed, or written.
    pub fn init(&self) -> Result<SnapshotStatus> {
        let loaded = self.load()?;
        let snapshot =
            if loaded.digest.is_none() { self.store(loaded)? } else { loaded.snapshot };
        Ok(SnapshotStatus {
            state_path: self.state_path.clone(),
            revision: snapshot.revision,
            users: snapshot.users.len(),
            posts: snapshot.posts.len(),
        })
    }

    /// Register a user with zeroed karma.
    ///
    /// # Errors
    /// Returns an error when the username is out of bounds or taken, or persistence fails.
    pub fn create_user(&self, input: CreateUserRequest) -> Result<User> {
        let username = input.username.trim().to_string();
        let length = username.chars().count();
        if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&length) {
            bail!(
                "Username must be between {MIN_USERNAME_CHARS} and {MAX_USERNAME_CHARS} characters."
            );
        }

        let mut loaded = self.load()?;
        if loaded.snapshot.users.iter().any(|user| user.username.eq_ignore_ascii_case(&username)) {
            bail!("Username '{username}' is already taken.");
        }

        let user = User {
            id: UserId::new(),
            username,
            karma: Karma::default(),
            posts: Vec::new(),
            total_comments: 0,
            created_at: input.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        };
        loaded.snapshot.users.push(user.clone());
        self.store(loaded)?;
        info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Create a post seeded with its author's upvote and credit the author's post karma.
    ///
    /// # Errors
    /// Returns an error when the title is empty or too long, the author is unknown,
    /// or persistence fails.
    pub fn create_post(&self, input: CreatePostRequest) -> Result<Post> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            bail!("Post title can't be empty.");
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            bail!("Post title can't be longer than {MAX_TITLE_CHARS} characters.");
        }

        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let author = find_user_mut(&mut snapshot.users, input.author)?;
        let post = Post::new(
            input.author,
            input.subreddit.trim(),
            title,
            input.body,
            input.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        );
        author.karma.apply(KarmaKind::Post, SEED_KARMA_DELTA);
        author.posts.push(post.id);
        snapshot.posts.push(post.clone());
        self.store(loaded)?;

        info!(
            post_id = %post.id,
            author = %post.author,
            subreddit = %post.subreddit,
            "post created"
        );
        Ok(post)
    }

    /// Add a seeded comment to a post.
    ///
    /// # Errors
    /// Returns an error when the body is empty, the post or author is unknown,
    /// or persistence fails.
    pub fn add_comment(&self, input: AddCommentRequest) -> Result<Comment> {
        let body = non_empty_body(&input.body, "Comment")?;

        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        let author = find_user_mut(&mut snapshot.users, input.author)?;

        let comment = Comment::new(
            input.author,
            body,
            input.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        );
        post.comments.push(comment.clone());
        post.refresh_comment_count();
        author.karma.apply(KarmaKind::Comment, SEED_KARMA_DELTA);
        author.total_comments += 1;
        self.store(loaded)?;

        info!(
            post_id = %input.post_id,
            comment_id = %comment.id,
            author = %comment.author,
            "comment added"
        );
        Ok(comment)
    }

    /// Add a seeded reply under a comment. Replies count as comments for karma.
    ///
    /// # Errors
    /// Returns an error when the body is empty, the post, comment, or author is
    /// unknown, or persistence fails.
    pub fn add_reply(&self, input: AddReplyRequest) -> Result<Reply> {
        let body = non_empty_body(&input.body, "Reply")?;

        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        let author = find_user_mut(&mut snapshot.users, input.author)?;
        let comment = find_comment_mut(post, input.comment_id)?;

        let reply = Reply::new(
            input.author,
            body,
            input.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        );
        comment.replies.push(reply.clone());
        post.refresh_comment_count();
        author.karma.apply(KarmaKind::Comment, SEED_KARMA_DELTA);
        author.total_comments += 1;
        self.store(loaded)?;

        info!(
            post_id = %input.post_id,
            comment_id = %input.comment_id,
            reply_id = %reply.id,
            author = %reply.author,
            "reply added"
        );
        Ok(reply)
    }

    /// Toggle a vote on a post and refresh every post score field.
    ///
    /// # Errors
    /// Returns an error when the post, voter, or post author is unknown, or persistence fails.
    pub fn vote_post(&self, input: PostVoteRequest) -> Result<VoteReceipt> {
        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.voter)?;

        let (outcome, author_karma) =
            cast_vote(post, &mut snapshot.users, input.voter, input.direction)?;
        let receipt = VoteReceipt::new(
            &*post,
            post.id.to_string(),
            post.scores.points_count,
            input.direction,
            input.voter,
            &outcome,
            author_karma,
        );
        self.store(loaded)?;
        log_receipt(&receipt);
        Ok(receipt)
    }

    /// Toggle a vote on a comment.
    ///
    /// # Errors
    /// Returns an error when the post, voter, comment, or comment author is unknown,
    /// or persistence fails.
    pub fn vote_comment(&self, input: CommentVoteRequest) -> Result<VoteReceipt> {
        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.voter)?;
        let comment = find_comment_mut(post, input.comment_id)?;

        let (outcome, author_karma) =
            cast_vote(comment, &mut snapshot.users, input.voter, input.direction)?;
        let receipt = VoteReceipt::new(
            &*comment,
            comment.id.to_string(),
            comment.points_count,
            input.direction,
            input.voter,
            &outcome,
            author_karma,
        );
        self.store(loaded)?;
        log_receipt(&receipt);
        Ok(receipt)
    }

    /// Toggle a vote on a reply. The parent comment's votes are not touched.
    ///
    /// # Errors
    /// Returns an error when the post, voter, comment, reply, or reply author is
    /// unknown, or persistence fails.
    pub fn vote_reply(&self, input: ReplyVoteRequest) -> Result<VoteReceipt> {
        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.voter)?;
        let comment = find_comment_mut(post, input.comment_id)?;
        let reply = find_reply_mut(comment, input.reply_id)?;

        let (outcome, author_karma) =
            cast_vote(reply, &mut snapshot.users, input.voter, input.direction)?;
        let receipt = VoteReceipt::new(
            &*reply,
            reply.id.to_string(),
            reply.points_count,
            input.direction,
            input.voter,
            &outcome,
            author_karma,
        );
        self.store(loaded)?;
        log_receipt(&receipt);
        Ok(receipt)
    }

    /// Replace a comment's body. Only its author may edit it; votes are kept.
    ///
    /// # Errors
    /// Returns an error when the body is empty, the post, requester, or comment
    /// is unknown, the requester is not the author, or persistence fails.
    pub fn edit_comment(&self, input: EditCommentRequest) -> Result<Comment> {
        let body = non_empty_body(&input.body, "Comment")?;

        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.requester)?;
        let comment = find_comment_mut(post, input.comment_id)?;
        ensure_owner(comment.author, input.requester)?;

        comment.body = body;
        comment.updated_at = OffsetDateTime::now_utc();
        let edited = comment.clone();
        self.store(loaded)?;

        info!(post_id = %input.post_id, comment_id = %edited.id, "comment edited");
        Ok(edited)
    }

    /// Replace a reply's body. Only its author may edit it; votes are kept.
    ///
    /// # Errors
    /// Returns an error when the body is empty, the post, requester, comment, or
    /// reply is unknown, the requester is not the author, or persistence fails.
    pub fn edit_reply(&self, input: EditReplyRequest) -> Result<Reply> {
        let body = non_empty_body(&input.body, "Reply")?;

        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.requester)?;
        let comment = find_comment_mut(post, input.comment_id)?;
        let reply = find_reply_mut(comment, input.reply_id)?;
        ensure_owner(reply.author, input.requester)?;

        reply.body = body;
        reply.updated_at = OffsetDateTime::now_utc();
        let edited = reply.clone();
        self.store(loaded)?;

        info!(
            post_id = %input.post_id,
            comment_id = %input.comment_id,
            reply_id = %edited.id,
            "reply edited"
        );
        Ok(edited)
    }

    /// Remove a comment and its replies, then recount the post's comments.
    /// Karma already earned by the author is not taken back.
    ///
    /// # Errors
    /// Returns an error when the post, requester, or comment is unknown, the
    /// requester is not the author, or persistence fails.
    pub fn delete_comment(&self, input: DeleteCommentRequest) -> Result<DeletionReceipt> {
        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.requester)?;
        let comment = find_comment_mut(post, input.comment_id)?;
        ensure_owner(comment.author, input.requester)?;

        post.comments.retain(|comment| comment.id != input.comment_id);
        post.refresh_comment_count();
        let receipt = DeletionReceipt {
            item_kind: ItemKind::Comment,
            item_id: input.comment_id.to_string(),
            post_id: input.post_id,
            comment_count: post.comment_count,
        };
        self.store(loaded)?;

        info!(
            post_id = %input.post_id,
            comment_id = %input.comment_id,
            comment_count = receipt.comment_count,
            "comment deleted"
        );
        Ok(receipt)
    }

    /// Remove a reply from its comment, then recount the post's comments.
    ///
    /// # Errors
    /// Returns an error when the post, requester, comment, or reply is unknown,
    /// the requester is not the author, or persistence fails.
    pub fn delete_reply(&self, input: DeleteReplyRequest) -> Result<DeletionReceipt> {
        let mut loaded = self.load()?;
        let snapshot = &mut loaded.snapshot;
        let post = find_post_mut(&mut snapshot.posts, input.post_id)?;
        ensure_user_exists(&snapshot.users, input.requester)?;
        let comment = find_comment_mut(post, input.comment_id)?;
        let reply = find_reply_mut(comment, input.reply_id)?;
        ensure_owner(reply.author, input.requester)?;

        comment.replies.retain(|reply| reply.id != input.reply_id);
        post.refresh_comment_count();
        let receipt = DeletionReceipt {
            item_kind: ItemKind::Reply,
            item_id: input.reply_id.to_string(),
            post_id: input.post_id,
            comment_count: post.comment_count,
        };
        self.store(loaded)?;

        info!(
            post_id = %input.post_id,
            comment_id = %input.comment_id,
            reply_id = %input.reply_id,
            comment_count = receipt.comment_count,
            "reply deleted"
        );
        Ok(receipt)
    }

    /// List posts, optionally restricted to one subreddit (case-insensitive) and ranked.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be read or parsed.
    pub fn list_posts(&self, input: ListPostsRequest) -> Result<PostListing> {
        let loaded = self.load()?;
        let ranked = rank_posts(&loaded.snapshot.posts, input.sort);
        let posts = ranked
            .into_iter()
            .filter(|post| match input.subreddit.as_deref() {
                Some(name) => post.subreddit.eq_ignore_ascii_case(name.trim()),
                None => true,
            })
            .map(PostSummary::from_post)
            .collect();

        Ok(PostListing {
            sort: input.sort,
            tie_breakers: input.sort.map(SortBy::tie_breakers).unwrap_or_default(),
            posts,
        })
    }

    /// # Errors
    /// Returns an error when the post does not exist or the snapshot cannot be read.
    pub fn show_post(&self, post_id: PostId) -> Result<Post> {
        let loaded = self.load()?;
        loaded
            .snapshot
            .posts
            .into_iter()
            .find(|post| post.id == post_id)
            .ok_or_else(|| post_not_found(post_id))
    }

    /// # Errors
    /// Returns an error when the user does not exist or the snapshot cannot be read.
    pub fn user_karma(&self, user_id: UserId) -> Result<UserKarmaView> {
        let loaded = self.load()?;
        let user = loaded
            .snapshot
            .users
            .into_iter()
            .find(|user| user.id == user_id)
            .ok_or_else(|| anyhow!("User does not exist in database."))?;
        Ok(UserKarmaView {
            user_id: user.id,
            total_karma: user.karma.total(),
            karma: user.karma,
            username: user.username,
            total_comments: user.total_comments,
        })
    }
}

impl VoteReceipt {
    fn new(
        item: &impl Votable,
        item_id: String,
        points_count: i64,
        direction: VoteDirection,
        voter: UserId,
        outcome: &VoteOutcome,
        author_karma: Karma,
    ) -> Self {
        Self {
            item_kind: item.kind(),
            item_id,
            voter,
            direction,
            previous: outcome.previous,
            next: outcome.next,
            raw_points: outcome.raw_points,
            points_count,
            karma_delta: outcome.karma_delta,
            author: item.author(),
            author_karma,
        }
    }
}

/// Apply a toggle to `item`, refresh its cached scores, and move the author's karma.
/// The author is resolved before anything is mutated.
fn cast_vote(
    item: &mut impl Votable,
    users: &mut [User],
    voter: UserId,
    direction: VoteDirection,
) -> Result<(VoteOutcome, Karma)> {
    let kind = item.kind();
    let author_id = item.author();
    let author = users
        .iter_mut()
        .find(|user| user.id == author_id)
        .ok_or_else(|| anyhow!("{} author does not exist in database.", author_label(kind)))?;

    let outcome = item.apply_vote(voter, direction);
    item.refresh_scores();
    author.karma.apply(kind.karma_kind(), outcome.karma_delta);
    Ok((outcome, author.karma))
}

fn author_label(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Post => "Post",
        ItemKind::Comment => "Comment",
        ItemKind::Reply => "Reply",
    }
}

fn log_receipt(receipt: &VoteReceipt) {
    info!(
        item_kind = receipt.item_kind.as_str(),
        item_id = %receipt.item_id,
        voter = %receipt.voter,
        direction = receipt.direction.as_str(),
        previous = receipt.previous.as_str(),
        next = receipt.next.as_str(),
        karma_delta = receipt.karma_delta,
        raw_points = receipt.raw_points,
        "vote applied"
    );
}

fn post_not_found(post_id: PostId) -> anyhow::Error {
    anyhow!("Post with ID: {post_id} does not exist in database.")
}

fn find_post_mut(posts: &mut [Post], post_id: PostId) -> Result<&mut Post> {
    posts.iter_mut().find(|post| post.id == post_id).ok_or_else(|| post_not_found(post_id))
}

fn find_comment_mut(post: &mut Post, comment_id: CommentId) -> Result<&mut Comment> {
    post.comment_mut(comment_id)
        .ok_or_else(|| anyhow!("Comment with ID: '{comment_id}' does not exist in database."))
}

fn find_reply_mut(comment: &mut Comment, reply_id: ReplyId) -> Result<&mut Reply> {
    comment
        .reply_mut(reply_id)
        .ok_or_else(|| anyhow!("Reply comment with ID: '{reply_id}' does not exist in database."))
}

fn ensure_owner(author: UserId, requester: UserId) -> Result<()> {
    if author == requester {
        Ok(())
    } else {
        Err(anyhow!("Access is denied."))
    }
}

fn non_empty_body(body: &str, label: &str) -> Result<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        bail!("{label} body can't be empty.");
    }
    Ok(trimmed.to_string())
}

fn find_user_mut(users: &mut [User], user_id: UserId) -> Result<&mut User> {
    users
        .iter_mut()
        .find(|user| user.id == user_id)
        .ok_or_else(|| anyhow!("User does not exist in database."))
}

fn ensure_user_exists(users: &[User], user_id: UserId) -> Result<()> {
    if users.iter().any(|user| user.id == user_id) {
        Ok(())
    } else {
        Err(anyhow!("User does not exist in database."))
    }
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use forum_score_api::{
    AddCommentRequest, AddReplyRequest, CommentVoteRequest, CreatePostRequest, CreateUserRequest,
    DeleteCommentRequest, DeleteReplyRequest, EditCommentRequest, EditReplyRequest, ForumScoreApi,
    ListPostsRequest, PostVoteRequest, ReplyVoteRequest,
};
use forum_score_core::{
    compute_scores, unix_seconds, CommentId, PostBody, PostId, ReplyId, SortBy, UserId,
    VoteDirection,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "forum-score")]
#[command(about = "Forum scoring and vote-toggle engine CLI")]
struct Cli {
    #[arg(long, global = true, env = "FORUM_SCORE_STATE", default_value = "./forum_state.json")]
    state: PathBuf,

    /// Tracing filter directive, e.g. `info` or `forum_score_api=debug`.
    #[arg(
        long,
        global = true,
        env = "FORUM_SCORE_LOG",
        default_value = "warn",
        value_parser = parse_log_directive
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute score fields from raw vote counts without touching any state.
    Score(ScoreArgs),
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Post {
        #[command(subcommand)]
        command: Box<PostCommand>,
    },
    Comment {
        #[command(subcommand)]
        command: CommentCommand,
    },
    Reply {
        #[command(subcommand)]
        command: ReplyCommand,
    },
}

#[derive(Debug, Args)]
struct ScoreArgs {
    #[arg(long)]
    upvotes: u64,
    #[arg(long)]
    downvotes: u64,
    #[arg(long, conflicts_with = "created_at_seconds")]
    created_at: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    created_at_seconds: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum StateCommand {
    Init,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Add(UserAddArgs),
    Karma(UserKarmaArgs),
}

#[derive(Debug, Args)]
struct UserAddArgs {
    #[arg(long)]
    username: String,
}

#[derive(Debug, Args)]
struct UserKarmaArgs {
    #[arg(long)]
    user_id: String,
}

#[derive(Debug, Subcommand)]
enum PostCommand {
    Add(PostAddArgs),
    Vote(PostVoteArgs),
    List(PostListArgs),
    Show(PostShowArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("content").required(true).args(["text", "link", "image_link"])))]
struct PostAddArgs {
    #[arg(long)]
    author: String,
    #[arg(long)]
    subreddit: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    link: Option<String>,
    #[arg(long)]
    image_link: Option<String>,
    #[arg(long, requires = "image_link")]
    image_id: Option<String>,
    #[arg(long)]
    created_at: Option<String>,
}

#[derive(Debug, Args)]
struct PostVoteArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    direction: DirectionArg,
}

#[derive(Debug, Args)]
struct PostListArgs {
    #[arg(long)]
    subreddit: Option<String>,
    #[arg(long)]
    sort: Option<SortArg>,
}

#[derive(Debug, Args)]
struct PostShowArgs {
    #[arg(long)]
    post_id: String,
}

#[derive(Debug, Subcommand)]
enum CommentCommand {
    Add(CommentAddArgs),
    Vote(CommentVoteArgs),
    Edit(CommentEditArgs),
    Delete(CommentTargetArgs),
}

#[derive(Debug, Args)]
struct CommentAddArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    author: String,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Args)]
struct CommentVoteArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    comment_id: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    direction: DirectionArg,
}

#[derive(Debug, Args)]
struct CommentTargetArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    comment_id: String,
    #[arg(long)]
    user_id: String,
}

#[derive(Debug, Args)]
struct CommentEditArgs {
    #[command(flatten)]
    target: CommentTargetArgs,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Subcommand)]
enum ReplyCommand {
    Add(ReplyAddArgs),
    Vote(ReplyVoteArgs),
    Edit(ReplyEditArgs),
    Delete(ReplyTargetArgs),
}

#[derive(Debug, Args)]
struct ReplyTargetArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    comment_id: String,
    #[arg(long)]
    reply_id: String,
    #[arg(long)]
    user_id: String,
}

#[derive(Debug, Args)]
struct ReplyEditArgs {
    #[command(flatten)]
    target: ReplyTargetArgs,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Args)]
struct ReplyAddArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    comment_id: String,
    #[arg(long)]
    author: String,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Args)]
struct ReplyVoteArgs {
    #[arg(long)]
    post_id: String,
    #[arg(long)]
    comment_id: String,
    #[arg(long)]
    reply_id: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    direction: DirectionArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    #[value(alias = "upvote")]
    Up,
    #[value(alias = "downvote")]
    Down,
}

impl From<DirectionArg> for VoteDirection {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Up => Self::Upvote,
            DirectionArg::Down => Self::Downvote,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    New,
    Top,
    Best,
    Hot,
    Controversial,
    Old,
}

impl From<SortArg> for SortBy {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::New => Self::New,
            SortArg::Top => Self::Top,
            SortArg::Best => Self::Best,
            SortArg::Hot => Self::Hot,
            SortArg::Controversial => Self::Controversial,
            SortArg::Old => Self::Old,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_log_directive(value: &str) -> Result<String, String> {
    EnvFilter::try_new(value)
        .map(|_| value.to_string())
        .map_err(|err| format!("invalid log filter directive `{value}`: {err}"))
}

fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    debug!(state = %cli.state.display(), "using forum snapshot");
    let api = ForumScoreApi::new(cli.state);
    match cli.command {
        Command::Score(args) => run_score(&args),
        Command::State { command: StateCommand::Init } => {
            emit_json(serde_json::to_value(api.init()?)?)
        }
        Command::User { command } => run_user(command, &api),
        Command::Post { command } => run_post(*command, &api),
        Command::Comment { command } => run_comment(command, &api),
        Command::Reply { command } => run_reply(command, &api),
    }
}

fn run_score(args: &ScoreArgs) -> Result<()> {
    let created_at_seconds = match (&args.created_at, args.created_at_seconds) {
        (Some(raw), _) => Some(unix_seconds(parse_rfc3339(raw)?)),
        (None, Some(seconds)) => Some(seconds),
        (None, None) => None,
    };
    let card = compute_scores(args.upvotes, args.downvotes, created_at_seconds);
    emit_json(json!({
        "upvotes": args.upvotes,
        "downvotes": args.downvotes,
        "created_at_seconds": created_at_seconds,
        "scores": card,
    }))
}

fn run_user(command: UserCommand, api: &ForumScoreApi) -> Result<()> {
    match command {
        UserCommand::Add(args) => {
            let user =
                api.create_user(CreateUserRequest { username: args.username, created_at: None })?;
            emit_json(serde_json::to_value(user)?)
        }
        UserCommand::Karma(args) => {
            let view = api.user_karma(parse_user_id(&args.user_id)?)?;
            emit_json(serde_json::to_value(view)?)
        }
    }
}

fn run_post(command: PostCommand, api: &ForumScoreApi) -> Result<()> {
    match command {
        PostCommand::Add(args) => {
            let body = match (args.text, args.link, args.image_link) {
                (Some(text), _, _) => PostBody::Text { text },
                (None, Some(url), _) => PostBody::Link { url },
                (None, None, Some(image_link)) => {
                    PostBody::Image { image_link, image_id: args.image_id }
                }
                (None, None, None) => {
                    return Err(anyhow!("one of --text, --link, or --image-link is required"))
                }
            };
            let created_at = args.created_at.as_deref().map(parse_rfc3339).transpose()?;
            let post = api.create_post(CreatePostRequest {
                author: parse_user_id(&args.author)?,
                subreddit: args.subreddit,
                title: args.title,
                body,
                created_at,
            })?;
            emit_json(serde_json::to_value(post)?)
        }
        PostCommand::Vote(args) => {
            let receipt = api.vote_post(PostVoteRequest {
                post_id: parse_post_id(&args.post_id)?,
                voter: parse_user_id(&args.user_id)?,
                direction: args.direction.into(),
            })?;
            emit_json(serde_json::to_value(receipt)?)
        }
        PostCommand::List(args) => {
            let listing = api.list_posts(ListPostsRequest {
                subreddit: args.subreddit,
                sort: args.sort.map(SortBy::from),
            })?;
            emit_json(serde_json::to_value(listing)?)
        }
        PostCommand::Show(args) => {
            let post = api.show_post(parse_post_id(&args.post_id)?)?;
            emit_json(serde_json::to_value(post)?)
        }
    }
}

fn run_comment(command: CommentCommand, api: &ForumScoreApi) -> Result<()> {
    match command {
        CommentCommand::Add(args) => {
            let comment = api.add_comment(AddCommentRequest {
                post_id: parse_post_id(&args.post_id)?,
                author: parse_user_id(&args.author)?,
                body: args.body,
                created_at: None,
            })?;
            emit_json(serde_json::to_value(comment)?)
        }
        CommentCommand::Vote(args) => {
            let receipt = api.vote_comment(CommentVoteRequest {
                post_id: parse_post_id(&args.post_id)?,
                comment_id: parse_comment_id(&args.comment_id)?,
                voter: parse_user_id(&args.user_id)?,
                direction: args.direction.into(),
            })?;
            emit_json(serde_json::to_value(receipt)?)
        }
        CommentCommand::Edit(args) => {
            let comment = api.edit_comment(EditCommentRequest {
                post_id: parse_post_id(&args.target.post_id)?,
                comment_id: parse_comment_id(&args.target.comment_id)?,
                requester: parse_user_id(&args.target.user_id)?,
                body: args.body,
            })?;
            emit_json(serde_json::to_value(comment)?)
        }
        CommentCommand::Delete(args) => {
            let receipt = api.delete_comment(DeleteCommentRequest {
                post_id: parse_post_id(&args.post_id)?,
                comment_id: parse_comment_id(&args.comment_id)?,
                requester: parse_user_id(&args.user_id)?,
            })?;
            emit_json(serde_json::to_value(receipt)?)
        }
    }
}

fn run_reply(command: ReplyCommand, api: &ForumScoreApi) -> Result<()> {
    match command {
        ReplyCommand::Add(args) => {
            let reply = api.add_reply(AddReplyRequest {
                post_id: parse_post_id(&args.post_id)?,
                comment_id: parse_comment_id(&args.comment_id)?,
                author: parse_user_id(&args.author)?,
                body: args.body,
                created_at: None,
            })?;
            emit_json(serde_json::to_value(reply)?)
        }
        ReplyCommand::Vote(args) => {
            let receipt = api.vote_reply(ReplyVoteRequest {
                post_id: parse_post_id(&args.post_id)?,
                comment_id: parse_comment_id(&args.comment_id)?,
                reply_id: parse_reply_id(&args.reply_id)?,
                voter: parse_user_id(&args.user_id)?,
                direction: args.direction.into(),
            })?;
            emit_json(serde_json::to_value(receipt)?)
        }
        ReplyCommand::Edit(args) => {
            let reply = api.edit_reply(EditReplyRequest {
                post_id: parse_post_id(&args.target.post_id)?,
                comment_id: parse_comment_id(&args.target.comment_id)?,
                reply_id: parse_reply_id(&args.target.reply_id)?,
                requester: parse_user_id(&args.target.user_id)?,
                body: args.body,
            })?;
            emit_json(serde_json::to_value(reply)?)
        }
        ReplyCommand::Delete(args) => {
            let receipt = api.delete_reply(DeleteReplyRequest {
                post_id: parse_post_id(&args.post_id)?,
                comment_id: parse_comment_id(&args.comment_id)?,
                reply_id: parse_reply_id(&args.reply_id)?,
                requester: parse_user_id(&args.user_id)?,
            })?;
            emit_json(serde_json::to_value(receipt)?)
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}

fn parse_ulid(value: &str) -> Result<Ulid> {
    Ulid::from_string(value).with_context(|| format!("invalid ULID: {value}"))
}

fn parse_user_id(value: &str) -> Result<UserId> {
    Ok(UserId(parse_ulid(value)?))
}

fn parse_post_id(value: &str) -> Result<PostId> {
    Ok(PostId(parse_ulid(value)?))
}

fn parse_comment_id(value: &str) -> Result<CommentId> {
    Ok(CommentId(parse_ulid(value)?))
}

fn parse_reply_id(value: &str) -> Result<ReplyId> {
    Ok(ReplyId(parse_ulid(value)?))
}

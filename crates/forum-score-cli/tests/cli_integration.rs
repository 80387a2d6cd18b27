use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_forum_score<I, S>(state: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_forum-score"))
        .arg("--state")
        .arg(state)
        .args(args)
        .env_remove("FORUM_SCORE_STATE")
        .env_remove("FORUM_SCORE_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute forum-score binary: {err}"))
}

fn run_json<I, S>(state: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_forum_score(state, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "forum-score command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let value: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(as_str(&value, "contract_version"), "cli.v1");
    value
}

fn run_failure<I, S>(state: &Path, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_forum_score(state, args);
    assert!(!output.status.success(), "command should fail");
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_f64(value: &Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or_else(|| panic!("missing number field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn add_user(state: &Path, username: &str) -> String {
    let user = run_json(state, ["user", "add", "--username", username]);
    as_str(&user, "id").to_string()
}

fn add_text_post(state: &Path, author: &str, subreddit: &str, created_at: &str) -> String {
    let post = run_json(
        state,
        [
            "post",
            "add",
            "--author",
            author,
            "--subreddit",
            subreddit,
            "--title",
            "Fixture post",
            "--text",
            "body",
            "--created-at",
            created_at,
        ],
    );
    as_str(&post, "id").to_string()
}

fn post_ids(listing: &Value) -> Vec<String> {
    listing
        .get("posts")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("listing should carry posts: {listing}"))
        .iter()
        .map(|post| as_str(post, "id").to_string())
        .collect()
}

#[test]
fn cli_score_reports_default_ratio_and_optional_hot() {
    let dir = unique_temp_dir("forum-score-cli-score");
    let state = dir.join("state.json");

    let plain = run_json(&state, ["score", "--upvotes", "5", "--downvotes", "0"]);
    let scores = &plain["scores"];
    assert_eq!(as_i64(scores, "points_count"), 5);
    assert!((as_f64(scores, "vote_ratio") - 1.0).abs() < f64::EPSILON);
    assert!(scores["hot_algo"].is_null());

    let dated = run_json(
        &state,
        ["score", "--upvotes", "2", "--downvotes", "5", "--created-at", "1970-01-01T02:00:00Z"],
    );
    let scores = &dated["scores"];
    assert_eq!(as_i64(scores, "points_count"), 0);
    assert_eq!(as_i64(scores, "raw_points"), -3);
    assert!((as_f64(scores, "hot_algo") - (3.0_f64.ln() + 2.0)).abs() < 1e-9);
    assert!(!state.exists(), "score must not create a snapshot");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cli_vote_toggle_flow_updates_points_and_karma() {
    let dir = unique_temp_dir("forum-score-cli-votes");
    let state = dir.join("state.json");

    let init = run_json(&state, ["state", "init"]);
    assert_eq!(as_i64(&init, "revision"), 1);

    let alice = add_user(&state, "alice");
    let bob = add_user(&state, "bob");
    let post = add_text_post(&state, &alice, "rust", "2024-01-01T00:00:00Z");

    let up = run_json(
        &state,
        ["post", "vote", "--post-id", &post, "--user-id", &bob, "--direction", "up"],
    );
    assert_eq!(as_str(&up, "next"), "upvoted");
    assert_eq!(as_i64(&up, "karma_delta"), 1);
    assert_eq!(as_i64(&up, "raw_points"), 2);

    let flip = run_json(
        &state,
        ["post", "vote", "--post-id", &post, "--user-id", &bob, "--direction", "downvote"],
    );
    assert_eq!(as_str(&flip, "previous"), "upvoted");
    assert_eq!(as_str(&flip, "next"), "downvoted");
    assert_eq!(as_i64(&flip, "karma_delta"), -2);

    let reset = run_json(
        &state,
        ["post", "vote", "--post-id", &post, "--user-id", &bob, "--direction", "down"],
    );
    assert_eq!(as_str(&reset, "next"), "neutral");
    assert_eq!(as_i64(&reset, "raw_points"), 1);

    let karma = run_json(&state, ["user", "karma", "--user-id", &alice]);
    assert_eq!(as_i64(&karma["karma"], "post_karma"), 1);
    assert_eq!(as_i64(&karma, "total_karma"), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cli_comment_and_reply_votes_stay_isolated() {
    let dir = unique_temp_dir("forum-score-cli-threads");
    let state = dir.join("state.json");

    let alice = add_user(&state, "alice");
    let carol = add_user(&state, "carol");
    let post = add_text_post(&state, &alice, "rust", "2024-01-01T00:00:00Z");

    let comment = run_json(
        &state,
        ["comment", "add", "--post-id", &post, "--author", &alice, "--body", "top"],
    );
    let comment_id = as_str(&comment, "id").to_string();
    let reply = run_json(
        &state,
        [
            "reply",
            "add",
            "--post-id",
            &post,
            "--comment-id",
            &comment_id,
            "--author",
            &carol,
            "--body",
            "nested",
        ],
    );
    let reply_id = as_str(&reply, "id").to_string();

    let receipt = run_json(
        &state,
        [
            "reply",
            "vote",
            "--post-id",
            &post,
            "--comment-id",
            &comment_id,
            "--reply-id",
            &reply_id,
            "--user-id",
            &alice,
            "--direction",
            "down",
        ],
    );
    assert_eq!(as_str(&receipt, "item_kind"), "reply");
    assert_eq!(as_i64(&receipt["author_karma"], "comment_karma"), 0);

    let comment_vote = run_json(
        &state,
        [
            "comment",
            "vote",
            "--post-id",
            &post,
            "--comment-id",
            &comment_id,
            "--user-id",
            &carol,
            "--direction",
            "up",
        ],
    );
    assert_eq!(as_i64(&comment_vote, "points_count"), 2);

    let shown = run_json(&state, ["post", "show", "--post-id", &post]);
    assert_eq!(as_i64(&shown, "comment_count"), 2);
    let stored_comment = &shown["comments"][0];
    assert_eq!(as_i64(stored_comment, "points_count"), 2);
    assert_eq!(as_i64(&stored_comment["replies"][0], "points_count"), 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cli_post_list_filters_and_sorts() {
    let dir = unique_temp_dir("forum-score-cli-list");
    let state = dir.join("state.json");

    let alice = add_user(&state, "alice");
    let older = add_text_post(&state, &alice, "Rust", "2024-01-01T00:00:00Z");
    let newer = add_text_post(&state, &alice, "rust", "2024-01-02T00:00:00Z");
    let other = add_text_post(&state, &alice, "golang", "2024-01-03T00:00:00Z");

    let newest = run_json(&state, ["post", "list", "--subreddit", "RUST", "--sort", "new"]);
    assert_eq!(post_ids(&newest), vec![newer.clone(), older.clone()]);
    assert_eq!(as_str(&newest, "sort"), "new");

    let oldest = run_json(&state, ["post", "list", "--sort", "old"]);
    assert_eq!(post_ids(&oldest), vec![older, newer, other]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cli_reports_missing_items_and_bad_input_on_stderr() {
    let dir = unique_temp_dir("forum-score-cli-errors");
    let state = dir.join("state.json");

    let alice = add_user(&state, "alice");
    let missing_post = "01K1D3A7E9J5MNNN8F5JVCJY51";
    let stderr = run_failure(
        &state,
        ["post", "vote", "--post-id", missing_post, "--user-id", &alice, "--direction", "up"],
    );
    assert!(stderr.contains("does not exist in database"), "stderr: {stderr}");

    let stderr = run_failure(
        &state,
        ["post", "vote", "--post-id", missing_post, "--user-id", &alice, "--direction", "sideways"],
    );
    assert!(stderr.contains("sideways"), "stderr: {stderr}");

    let stderr = run_failure(&state, ["user", "add", "--username", "al"]);
    assert!(stderr.contains("between 3 and 20"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cli_rejects_an_unparseable_log_filter() {
    let dir = unique_temp_dir("forum-score-cli-log");
    let state = dir.join("state.json");

    let stderr = run_failure(
        &state,
        ["--log-level", "forum_score_api=loud", "score", "--upvotes", "1", "--downvotes", "0"],
    );
    assert!(stderr.contains("invalid log filter directive"), "stderr: {stderr}");

    let quiet = run_json(
        &state,
        ["--log-level", "forum_score_api=debug", "score", "--upvotes", "1", "--downvotes", "0"],
    );
    assert_eq!(as_i64(&quiet["scores"], "points_count"), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn cli_edits_and_deletes_comments_and_replies() {
    let dir = unique_temp_dir("forum-score-cli-delete");
    let state = dir.join("state.json");

    let alice = add_user(&state, "alice");
    let carol = add_user(&state, "carol");
    let post = add_text_post(&state, &alice, "rust", "2024-01-01T00:00:00Z");
    let comment = run_json(
        &state,
        ["comment", "add", "--post-id", &post, "--author", &alice, "--body", "top"],
    );
    let comment_id = as_str(&comment, "id").to_string();
    let reply = run_json(
        &state,
        [
            "reply",
            "add",
            "--post-id",
            &post,
            "--comment-id",
            &comment_id,
            "--author",
            &carol,
            "--body",
            "nested",
        ],
    );
    let reply_id = as_str(&reply, "id").to_string();

    let stderr = run_failure(
        &state,
        ["comment", "delete", "--post-id", &post, "--comment-id", &comment_id, "--user-id", &carol],
    );
    assert!(stderr.contains("Access is denied."), "stderr: {stderr}");

    let edited = run_json(
        &state,
        [
            "reply",
            "edit",
            "--post-id",
            &post,
            "--comment-id",
            &comment_id,
            "--reply-id",
            &reply_id,
            "--user-id",
            &carol,
            "--body",
            "nested, revised",
        ],
    );
    assert_eq!(as_str(&edited, "body"), "nested, revised");

    let removed = run_json(
        &state,
        [
            "reply",
            "delete",
            "--post-id",
            &post,
            "--comment-id",
            &comment_id,
            "--reply-id",
            &reply_id,
            "--user-id",
            &carol,
        ],
    );
    assert_eq!(as_i64(&removed, "comment_count"), 1);

    let removed = run_json(
        &state,
        ["comment", "delete", "--post-id", &post, "--comment-id", &comment_id, "--user-id", &alice],
    );
    assert_eq!(as_str(&removed, "item_kind"), "comment");
    assert_eq!(as_i64(&removed, "comment_count"), 0);

    let shown = run_json(&state, ["post", "show", "--post-id", &post]);
    assert_eq!(as_i64(&shown, "comment_count"), 0);

    let _ = fs::remove_dir_all(&dir);
}

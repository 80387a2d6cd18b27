use criterion::{criterion_group, criterion_main, Criterion};
use forum_score_core::{
    apply_vote, compute_scores, rank_posts, Post, PostBody, SortBy, UserId, Votable,
    VoteDirection, VoteSets,
};
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

fn mk_post(index: u32) -> Post {
    let created_at = OffsetDateTime::UNIX_EPOCH + Duration::minutes(i64::from(index));
    let mut post = Post::new(
        UserId::new(),
        "bench",
        format!("bench post {index}"),
        PostBody::Text { text: "benchmark fixture".to_string() },
        created_at,
    );
    for voter in 0..(index % 50) {
        let direction =
            if voter % 3 == 0 { VoteDirection::Downvote } else { VoteDirection::Upvote };
        let _ = post.apply_vote(UserId(Ulid(u128::from(voter))), direction);
    }
    post.refresh_scores();
    post
}

fn bench_toggle(c: &mut Criterion) {
    let voters = (0..1_000_u128).map(|seed| UserId(Ulid(seed))).collect::<Vec<_>>();
    let (upvoters, downvoters) = voters.split_at(500);
    let votes = match VoteSets::from_parts(upvoters.iter().copied(), downvoters.iter().copied()) {
        Ok(votes) => votes,
        Err(err) => panic!("benchmark vote sets should be disjoint: {err}"),
    };

    c.bench_function("apply_vote_flip_1000_voters", |b| {
        b.iter(|| apply_vote(&votes, voters[10], VoteDirection::Downvote));
    });
}

fn bench_scores(c: &mut Criterion) {
    c.bench_function("compute_scores_with_timestamp", |b| {
        b.iter(|| compute_scores(1_234, 567, Some(1_700_000_000.0)));
    });
}

fn bench_ranking(c: &mut Criterion) {
    let posts = (0..1_000).map(mk_post).collect::<Vec<_>>();

    c.bench_function("rank_posts_hot_1000_posts", |b| {
        b.iter(|| rank_posts(&posts, Some(SortBy::Hot)).len());
    });
}

criterion_group!(scoring_benches, bench_toggle, bench_scores, bench_ranking);
criterion_main!(scoring_benches);

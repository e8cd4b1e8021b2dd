//! Read-only harness: summarizes the health of active clusters — story
//! candidacy rate, review backlog, and staleness — as a quick operator
//! sanity check between cluster-sync runs.

use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use storyclust::domain::cluster;
use storyclust::services::{db, operator_snapshot};

#[derive(Parser)]
#[command(about = "Summarizes active-cluster health: story candidacy, review backlog, staleness")]
struct Args {
    #[arg(long, default_value_t = 24)]
    hours: i64,
    #[arg(long, default_value_t = 2000)]
    limit: i64,
    #[arg(long, default_value = "google")]
    provider: String,
    #[arg(long, default_value = "text-embedding-004")]
    model: String,
    #[arg(long, default_value_t = 2)]
    stale_hours: i64,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    run_at: chrono::DateTime<Utc>,
    hours: i64,
    provider: String,
    model: String,
    total_clusters: usize,
    story_candidates: usize,
    missing_headline: usize,
    never_reviewed: usize,
    stale_but_active: usize,
    average_member_count: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::connect(&database_url, 5).await;

    let clusters = cluster::fetch_active_unmerged_clusters(&pool, args.hours, args.limit)
        .await
        .expect("failed to load active clusters");

    let total_clusters = clusters.len();
    let story_candidates = clusters.iter().filter(|c| c.is_story_candidate).count();
    let missing_headline = clusters.iter().filter(|c| c.headline.is_none()).count();
    let never_reviewed = clusters.iter().filter(|c| c.reviewed_at.is_none()).count();
    let stale_but_active = clusters
        .iter()
        .filter(|c| {
            c.last_seen_at
                .map(|t| Utc::now() - t > chrono::Duration::hours(args.stale_hours))
                .unwrap_or(false)
        })
        .count();
    let average_member_count = if total_clusters == 0 {
        0.0
    } else {
        clusters.iter().map(|c| c.member_count as f64).sum::<f64>() / total_clusters as f64
    };

    println!("active unmerged clusters touched in the last {} hours: {total_clusters}", args.hours);
    println!("  story candidates:   {story_candidates}");
    println!("  missing headline:   {missing_headline}");
    println!("  never reviewed:     {never_reviewed}");
    println!("  stale but active:   {stale_but_active} (> {} h since last_seen_at)", args.stale_hours);
    println!("  average member count: {average_member_count:.2}");

    let snapshot = Snapshot {
        run_at: Utc::now(),
        hours: args.hours,
        provider: args.provider,
        model: args.model,
        total_clusters,
        story_candidates,
        missing_headline,
        never_reviewed,
        stale_but_active,
        average_member_count,
    };

    match operator_snapshot::write_snapshot("cluster-health-check", snapshot.run_at, &snapshot) {
        Ok(path) => println!("wrote snapshot to {}", path.display()),
        Err(e) => eprintln!("failed to write snapshot: {e}"),
    }
}

//! Read-only harness: runs cluster-sync's similarity-graph construction at
//! a sweep of thresholds over the same candidate pool and reports how many
//! components each produces, to judge how sensitive clustering is to
//! `SIMILARITY_THRESHOLD` before changing it in production.

use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use storyclust::domain::cluster;
use storyclust::services::{db, operator_snapshot};
use storyclust::workers::cluster_sync;

#[derive(Parser)]
#[command(about = "Compares cluster-sync connected components across similarity thresholds")]
struct Args {
    #[arg(long, default_value_t = 24)]
    hours: i64,
    #[arg(long, default_value_t = 2000)]
    limit: usize,
    #[arg(long, default_value = "google")]
    provider: String,
    #[arg(long, default_value = "text-embedding-004")]
    model: String,
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.90, 0.92, 0.94, 0.96])]
    thresholds: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct ThresholdResult {
    threshold: f64,
    component_count: usize,
    singleton_count: usize,
    largest_component: usize,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    run_at: chrono::DateTime<Utc>,
    hours: i64,
    provider: String,
    model: String,
    candidate_count: usize,
    results: Vec<ThresholdResult>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::connect(&database_url, 5).await;

    let mut candidates = cluster::fetch_sync_candidates(&pool, args.hours)
        .await
        .expect("failed to load sync candidates");
    candidates.truncate(args.limit);

    println!("{:<10} {:>12} {:>12} {:>16}", "threshold", "components", "singletons", "largest");
    let results: Vec<ThresholdResult> = args
        .thresholds
        .iter()
        .map(|&threshold| {
            let components = cluster_sync::build_components(&candidates, threshold);
            let singleton_count = components.iter().filter(|c| c.len() == 1).count();
            let largest_component = components.iter().map(|c| c.len()).max().unwrap_or(0);
            println!(
                "{:<10.2} {:>12} {:>12} {:>16}",
                threshold,
                components.len(),
                singleton_count,
                largest_component
            );
            ThresholdResult {
                threshold,
                component_count: components.len(),
                singleton_count,
                largest_component,
            }
        })
        .collect();

    let snapshot = Snapshot {
        run_at: Utc::now(),
        hours: args.hours,
        provider: args.provider,
        model: args.model,
        candidate_count: candidates.len(),
        results,
    };

    match operator_snapshot::write_snapshot("cluster-stability-eval", snapshot.run_at, &snapshot) {
        Ok(path) => println!("wrote snapshot to {}", path.display()),
        Err(e) => eprintln!("failed to write snapshot: {e}"),
    }
}

//! Read-only harness: re-embeds a recent sample of normalized posts under a
//! candidate provider/model (without touching the stored embedding column)
//! and previews the story clusters that embedding space would produce.

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use storyclust::config::{EmbeddingProvider, PipelineConfig};
use storyclust::domain::post;
use storyclust::services::{db, embed, operator_snapshot};
use storyclust::services::vector;

#[derive(Parser)]
#[command(about = "Previews the story groupings a candidate embedding provider/model would produce")]
struct Args {
    #[arg(long, default_value_t = 24)]
    hours: i64,
    #[arg(long, default_value_t = 300)]
    limit: i64,
    #[arg(long, default_value = "google")]
    provider: String,
    #[arg(long, default_value = "text-embedding-004")]
    model: String,
    #[arg(long, default_value_t = 0.94)]
    similarity_threshold: f64,
}

#[derive(Debug, Serialize)]
struct PreviewGroup {
    headline: String,
    member_headlines: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Snapshot {
    run_at: chrono::DateTime<Utc>,
    hours: i64,
    provider: String,
    model: String,
    similarity_threshold: f64,
    sampled_posts: usize,
    embedded_posts: usize,
    groups: Vec<PreviewGroup>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::connect(&database_url, 5).await;

    let mut config = PipelineConfig::from_env();
    config.embedding_provider = EmbeddingProvider::from_env(&args.provider);
    config.embedding_model = args.model.clone();
    let config = Arc::new(config);

    let posts = post::fetch_recent_normalized_posts(&pool, args.hours, args.limit)
        .await
        .expect("failed to load recent normalized posts");

    let mut headlines = Vec::new();
    let mut embeddings = Vec::new();
    for p in &posts {
        let Some(headline) = &p.normalized_headline else { continue };
        match embed::embed_headline(&config, headline).await {
            Ok(vector) => {
                headlines.push(headline.clone());
                embeddings.push(vector);
            }
            Err(e) => eprintln!("skipping post {}: embedding failed: {e}", p.id),
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, embedding) in embeddings.iter().enumerate() {
        let mut joined = false;
        for group in &mut groups {
            let representative = &embeddings[group[0]];
            if vector::cosine_similarity(embedding, representative) >= args.similarity_threshold {
                group.push(i);
                joined = true;
                break;
            }
        }
        if !joined {
            groups.push(vec![i]);
        }
    }

    println!("{} posts embedded, {} preview groups", embeddings.len(), groups.len());
    let preview_groups: Vec<PreviewGroup> = groups
        .iter()
        .filter(|g| g.len() > 1)
        .map(|group| {
            let member_headlines: Vec<String> = group.iter().map(|&i| headlines[i].clone()).collect();
            println!("- {} ({} members)", member_headlines[0], member_headlines.len());
            PreviewGroup {
                headline: member_headlines[0].clone(),
                member_headlines,
            }
        })
        .collect();

    let snapshot = Snapshot {
        run_at: Utc::now(),
        hours: args.hours,
        provider: args.provider,
        model: args.model,
        similarity_threshold: args.similarity_threshold,
        sampled_posts: posts.len(),
        embedded_posts: embeddings.len(),
        groups: preview_groups,
    };

    match operator_snapshot::write_snapshot("embedding-story-preview", snapshot.run_at, &snapshot) {
        Ok(path) => println!("wrote snapshot to {}", path.display()),
        Err(e) => eprintln!("failed to write snapshot: {e}"),
    }
}

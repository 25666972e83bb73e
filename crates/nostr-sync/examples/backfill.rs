// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::sync::Arc;

use nostr_sync::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter("info,nostr_sync::backfill=debug")
        .init();

    let pool = RelayPool::default();
    let store = Arc::new(MemoryStore::new());
    let checkpoints = Checkpoints::new(store.clone());
    let relays = load_relays(store.as_ref()).await?;

    let author = PublicKey::from_hex("82341f882b6eabcd2ba7f1ef90aad961cf074af15b9ef44a09f9d2a8fbfbe6a2")?;
    let since = checkpoints.load("jack-notes").await?;

    let mut filter = BackfillFilter::new().kind(Kind::TextNote).author(author);
    if let Some(since) = since {
        filter = filter.since(since);
    }

    let until = Timestamp::now();
    let stats = backfill_events(
        &pool,
        relays,
        filter.until(until),
        BackfillOptions::new().batch_size(100).max_batches(3),
        |event: Event| async move {
            println!("{} {}", event.created_at, event.id);
            Ok(())
        },
    )
    .on_progress(|stats| println!("{} events so far", stats.total_events))
    .await?;

    let checkpoint = checkpoints.advance("jack-notes", &stats, until).await?;
    println!("Done: {stats:?}, checkpoint at {checkpoint}");

    pool.shutdown();

    Ok(())
}

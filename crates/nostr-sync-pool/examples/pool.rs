// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

use std::time::Duration;

use nostr_sync_pool::prelude::*;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter("info,nostr_sync_pool::relay=trace")
        .init();

    let pool = RelayPool::default();
    let relays = [
        RelayUrl::parse("wss://relay.damus.io")?,
        RelayUrl::parse("wss://nos.lol")?,
    ];

    let filter = Filter::new().kind(Kind::TextNote).limit(5);
    let mut sub = pool.subscribe(relays.clone(), vec![filter])?;

    let mut eose: usize = 0;
    while let Some(item) = sub.next().await {
        match item {
            SubscriptionEvent::Event { relay_url, event } => {
                println!("{relay_url}: {}", event.id)
            }
            SubscriptionEvent::EndOfStoredEvents { relay_url } => {
                println!("{relay_url}: EOSE");
                eose += 1;
                if eose == relays.len() {
                    break;
                }
            }
        }
    }
    sub.unsubscribe();

    for inspection in pool.inspect() {
        println!("{inspection:?}");
    }

    pool.shutdown();
    tokio::time::sleep(Duration::from_secs(1)).await;

    Ok(())
}

//! End-to-end throughput benchmark for Beacon.
//!
//! Every client subscribes to and publishes on the broadcast channel of one
//! facility, so each message sent is delivered to every connected client.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws/benchmark?subscribe-broadcast&publish-broadcast";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Beacon end-to-end throughput benchmark");
    println!("  Server must be running: cargo run --release -p beacon-server");
    println!("  Target: {}", url);
    println!();

    run_pubsub_benchmark(num_clients, url).await;
}

async fn run_pubsub_benchmark(num_clients: usize, url: String) {
    println!("Pub/Sub benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(&url, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("Results");
    println!("  Clients:        {:>10}", num_clients);
    println!("  Duration:       {:>10.2}s", elapsed.as_secs_f64());
    println!("  Delivered:      {:>10}", total_messages);
    println!("  Throughput:     {:>10.0} msg/s", msgs_per_sec);
    println!("  Per-client:     {:>10.0} msg/s", msgs_per_sec_per_client);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    barrier.wait().await;

    let publish_msg = Message::Text("x".repeat(64));

    // Full duplex: count deliveries while the send loop runs.
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(_) | Message::Binary(_)) = result {
                message_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    loop {
        if sender.send(publish_msg.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

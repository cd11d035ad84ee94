//! End-to-end throughput benchmark for Impulse.
//!
//! Connects `N` receivers under one username and one sender that signals
//! that username as fast as it can, then counts deliveries over real
//! WebSocket connections.
//!
//! ```bash
//! e2e_throughput [receivers] [username] [url]
//! ```
//!
//! The username must exist in the server's account file.

use futures_util::{SinkExt, StreamExt};
use impulse_protocol::{codec, Role, WireMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_receivers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let username = args.get(2).cloned().unwrap_or_else(|| "bench".to_string());
    let url = args.get(3).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Impulse End-to-End Throughput Benchmark              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_signal_benchmark(num_receivers, username, url).await;
}

async fn run_signal_benchmark(num_receivers: usize, username: String, url: String) {
    println!("📊 Signal Benchmark: {} receivers as '{}'", num_receivers, username);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let delivered = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_receivers + 1));

    let mut handles = Vec::new();

    // Spawn receiver tasks
    for receiver_id in 0..num_receivers {
        let delivered = Arc::clone(&delivered);
        let barrier = Arc::clone(&barrier);
        let username = username.clone();
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_receiver(&url, &username, delivered, barrier).await {
                eprintln!("Receiver {} error: {}", receiver_id, e);
            }
        }));
    }

    // Wait for all receivers to register
    barrier.wait().await;
    // Registration is not acknowledged; give the relay a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("✓ All {} receivers registered", num_receivers);

    {
        let sent = Arc::clone(&sent);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_sender(&url, &username, sent).await {
                eprintln!("Sender error: {}", e);
            }
        }));
    }

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counters and start measurement
    delivered.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_delivered = delivered.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    let signals_per_sec = total_sent as f64 / elapsed.as_secs_f64();
    let deliveries_per_sec = total_delivered as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Receivers:            {:>10}                           ║",
        num_receivers
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Signals Sent:         {:>10}                           ║",
        total_sent
    );
    println!(
        "║  Deliveries:           {:>10}                           ║",
        total_delivered
    );
    println!(
        "║  Signals:              {:>10.0} msg/s                    ║",
        signals_per_sec
    );
    println!(
        "║  Deliveries:           {:>10.0} msg/s                    ║",
        deliveries_per_sec
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_receiver(
    url: &str,
    username: &str,
    delivered: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let register = codec::encode_text(&WireMessage::register(Role::Receiver, username))?;
    sender.send(Message::Text(register)).await?;

    barrier.wait().await;

    while let Some(result) = receiver.next().await {
        match result? {
            Message::Text(_) | Message::Binary(_) => {
                delivered.fetch_add(1, Ordering::Relaxed);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

async fn run_sender(url: &str, username: &str, sent: Arc<AtomicU64>) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Keep reading so pings are answered and the sender is not evicted.
    let reader = tokio::spawn(async move { while receiver.next().await.is_some() {} });

    let signal = Message::Text(codec::encode_text(&WireMessage::signal(username, "ring"))?);

    // Send loop - no waiting, just blast messages
    loop {
        if sender.send(signal.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        // Small yield to not starve the reader task
        tokio::task::yield_now().await;
    }

    reader.abort();
    Ok(())
}

//! Concurrent load through the full pipeline. Checks that every request is
//! accounted for exactly once under contention.

use std::time::{Duration, Instant};

use serde_json::Value;

mod common;

#[tokio::test]
async fn test_load_accounting() {
    let backend = common::start_programmable_backend(|| async {
        (200, r#"{"ok":true}"#.to_string())
    })
    .await;

    let mut config = common::isolated_config(&[("products", format!("http://{backend}"))]);
    config.rate_limit.max_requests = 10_000;
    let gateway = common::start_gateway(config).await;

    // Wait for the listener to accept.
    let client = common::client();
    let health = gateway.url("/health");
    let up = common::eventually(Duration::from_secs(5), || {
        let request = client.get(&health);
        async move { request.send().await.is_ok() }
    })
    .await;
    assert!(up, "gateway never came up");

    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let start = Instant::now();
    let mut tasks = Vec::new();
    for task_id in 0..concurrency {
        let client = client.clone();
        let url = gateway.url(&format!("/api/products/{task_id}"));
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }
    let duration = start.elapsed();

    assert!(!all_latencies.is_empty(), "No successful requests recorded");
    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {total_requests}");
    println!("Concurrency:    {concurrency}");
    println!("Total Duration: {duration:?}");
    println!("Requests/sec:   {:.2}", total_requests as f64 / duration.as_secs_f64());
    println!("P50 Latency:    {p50:?}");
    println!("P99 Latency:    {p99:?}");
    println!("Success Rate:   {}/{}", all_latencies.len(), total_requests);
    println!("-------------------------\n");

    let summary: Value = client
        .get(gateway.url("/metrics/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Every proxied request recorded once, whatever its outcome.
    let recorded = summary["total_requests"].as_u64().unwrap() as usize;
    assert!(recorded >= all_latencies.len() && recorded <= total_requests);
    assert_eq!(
        summary["successful_requests"].as_u64().unwrap() as usize,
        all_latencies.len()
    );
    assert_eq!(summary["top_routes"].as_array().unwrap().len(), 5);
    assert_eq!(summary["top_routes"][0]["requests"], requests_per_task as u64);
}

//! Test Complaint Client
//!
//! Sends generated complaint narratives to the predict subject and logs the
//! replies. Optionally requests a model reload first.

use anyhow::Context;
use async_nats::HeaderMap;
use complaint_classifier::server::{decode_reply, API_KEY_HEADER};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const LOAN: &[&str] = &[
    "I have an issue with my loan.",
    "My student loan servicer applied my payment to the wrong account",
    "The lender added a late fee to my loan even though I paid on time",
    "I was never told the interest rate on my auto loan would change",
];

const CREDIT_CARD: &[&str] = &[
    "My credit card was charged twice for the same purchase",
    "The card issuer raised my APR without notice",
    "I disputed a fraudulent charge on my card and it was denied",
    "Annual fee on my credit card was charged after I cancelled",
];

const OFF_TOPIC: &[&str] = &[
    "The cryptocurrency exchange froze my wallet withdrawal",
    "My buy now pay later app keeps splitting the order into new plans",
    "The peer to peer transfer went to a stranger and nobody will reverse it",
];

/// Complaint text generator for testing
struct ComplaintGenerator {
    rng: rand::rngs::ThreadRng,
}

impl ComplaintGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// A narrative in the style of the training corpus
    fn generate_in_distribution(&mut self) -> String {
        let pool = if self.rng.gen_bool(0.5) { LOAN } else { CREDIT_CARD };
        self.decorate(pool)
    }

    /// A narrative about products the model never saw
    fn generate_drifted(&mut self) -> String {
        self.decorate(OFF_TOPIC)
    }

    fn decorate(&mut self, pool: &[&str]) -> String {
        let base = pool.choose(&mut self.rng).copied().unwrap_or("I have a complaint");
        match self.rng.gen_range(0..3) {
            0 => base.to_string(),
            1 => format!("{} This has happened {} times.", base, self.rng.gen_range(2..6)),
            _ => format!("Hello, {} Please help.", base.to_lowercase()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_client=info".parse()?),
        )
        .init();

    info!("Starting Test Complaint Client");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("complaints.predict");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
    let drift_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let reload_version: Option<u32> = args.get(6).and_then(|s| s.parse().ok());
    let manage_subject = std::env::var("COMPLAINTS_MANAGE_SUBJECT")
        .unwrap_or_else(|_| "complaints.model.manage".to_string());
    let api_key = std::env::var("COMPLAINTS_API_KEY").unwrap_or_else(|_| "mysecretkey".to_string());

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        drift_rate = drift_rate,
        delay_ms = delay_ms,
        reload_version = ?reload_version,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, drift_rate).await;
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, api_key.as_str());

    if let Some(version) = reload_version {
        let payload = serde_json::to_vec(&json!({ "version": version }))?;
        let message = client
            .request_with_headers(manage_subject.clone(), headers.clone(), payload.into())
            .await
            .context("Manage request failed")?;
        let reply = decode_reply(&message.payload)?;
        info!(status = reply.status, body = %reply.body, "Manage reply");
    }

    let mut generator = ComplaintGenerator::new();
    let mut rng = rand::thread_rng();
    let mut categories: HashMap<String, u64> = HashMap::new();
    let mut failures = 0u64;

    for i in 0..count {
        let text = if rng.gen_bool(drift_rate.clamp(0.0, 1.0)) {
            generator.generate_drifted()
        } else {
            generator.generate_in_distribution()
        };
        let payload = serde_json::to_vec(&json!({ "text": text }))?;

        let message = client
            .request_with_headers(subject.to_string(), headers.clone(), payload.into())
            .await
            .context("Predict request failed")?;
        let reply = decode_reply(&message.payload)?;

        if reply.status == 200 {
            let category = reply.body["category"].as_str().unwrap_or("").to_string();
            info!(request = i + 1, text = %text, category = %category, "Prediction");
            *categories.entry(category).or_insert(0) += 1;
        } else {
            failures += 1;
            warn!(request = i + 1, status = reply.status, body = %reply.body, "Request failed");
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(sent = count, failures = failures, categories = ?categories, "Completed");
    Ok(())
}

async fn run_dry_mode(count: u64, drift_rate: f64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = ComplaintGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let text = if rng.gen_bool(drift_rate.clamp(0.0, 1.0)) {
            generator.generate_drifted()
        } else {
            generator.generate_in_distribution()
        };
        let json = serde_json::to_string(&json!({ "text": text }))?;
        info!("Sample request {}: {}", i + 1, json);
    }

    Ok(())
}

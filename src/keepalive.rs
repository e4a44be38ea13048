//! Keep-alive pinger.
//!
//! Some hosting platforms idle a service that receives no inbound HTTP
//! traffic. When configured, the bot requests its own public URL on a fixed
//! interval.

use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::KeepaliveSettings;
use crate::Result;

const PING_TIMEOUT_SECS: u64 = 15;

/// Request `url` once and return the HTTP status code.
pub async fn ping_once(client: &Client, url: &str) -> Result<u16> {
    let response = client.get(url).send().await?;
    Ok(response.status().as_u16())
}

/// Spawn the ping loop. Errors are logged and never stop the loop.
pub fn spawn_keepalive(settings: KeepaliveSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = Client::builder()
            .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
            .user_agent("channel_keeper/keepalive")
            .build()
            .unwrap_or_default();

        let mut ticker = interval(Duration::from_secs(settings.interval_secs));
        loop {
            ticker.tick().await;
            match ping_once(&client, &settings.url).await {
                Ok(status) => info!(url = %settings.url, status, "Keep-alive ping"),
                Err(err) => warn!(url = %settings.url, "Keep-alive ping failed: {}", err),
            }
        }
    })
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::models::Opportunity;

/// Anything that can hand us scored candidates. Scoring happens upstream.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_opportunities(&self) -> Result<Vec<Opportunity>>;
}

/// Feeds answer either with a bare array or wrapped in `opportunities`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedResponse {
    Wrapped { opportunities: Vec<Opportunity> },
    Bare(Vec<Opportunity>),
}

/// Polls an HTTP endpoint that returns already-scored opportunities as JSON
#[derive(Debug, Clone)]
pub struct HttpOpportunitySource {
    client: Client,
    url: String,
}

impl HttpOpportunitySource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .context("Failed to create HTTP client")?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl OpportunitySource for HttpOpportunitySource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_opportunities(&self) -> Result<Vec<Opportunity>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to reach opportunity feed {}", self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Opportunity feed {} returned {}: {}", self.url, status, error_text);
        }

        let feed: FeedResponse = response
            .json()
            .await
            .context("Failed to parse opportunity feed response")?;
        let opportunities = match feed {
            FeedResponse::Wrapped { opportunities } => opportunities,
            FeedResponse::Bare(opportunities) => opportunities,
        };

        debug!("Feed {} returned {} opportunities", self.url, opportunities.len());
        Ok(opportunities)
    }
}

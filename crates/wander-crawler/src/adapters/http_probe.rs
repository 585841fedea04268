use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;

use crate::collab::AvailabilityProbe;

lazy_static! {
    static ref HTTP_CLI: reqwest::Client = reqwest::ClientBuilder::new()
        .gzip(true)
        .deflate(true)
        .build()
        .expect("Couldn't build HTTP client");
}

/// Checks a node by fetching its page.
///
/// The URL template must contain an `{id}` placeholder. Gone or not-found
/// responses mean the node is unavailable, other failures are errors.
#[derive(Debug, Clone)]
pub struct HttpAvailabilityProbe {
    client: reqwest::Client,
    url_template: String,
    user_agent: String,
}

impl HttpAvailabilityProbe {
    pub fn new(url_template: impl Into<String>, user_agent: impl Into<String>) -> anyhow::Result<Self> {
        let url_template = url_template.into();
        if !url_template.contains("{id}") {
            anyhow::bail!("Missing {{id}} placeholder in probe URL {url_template}");
        }
        Ok(Self {
            client: HTTP_CLI.clone(),
            url_template,
            user_agent: user_agent.into(),
        })
    }

    /// Uses `client` instead of the shared one.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn url_for(&self, node_id: &str) -> String {
        self.url_template.replace("{id}", node_id)
    }
}

#[async_trait]
impl AvailabilityProbe for HttpAvailabilityProbe {
    async fn is_available(&self, node_id: &str) -> anyhow::Result<bool> {
        let url = self.url_for(node_id);
        let resp = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => {
                log::debug!("Probe {url} answered {}", resp.status());
                Ok(false)
            }
            s => anyhow::bail!("Couldn't probe {url} got: {s}"),
        }
    }
}

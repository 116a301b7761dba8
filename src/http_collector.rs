use crate::collector::{ErrorCollector, ErrorReport};
use async_trait::async_trait;
use reqwest::Client;
use std::error::Error;

/// Collector that POSTs each [`ErrorReport`] as JSON to an HTTP endpoint.
///
/// The report's environment and level are also passed as query parameters
/// so the receiving side can route without parsing the body.
#[derive(Clone)]
pub struct HttpCollector {
    client: Client,
    /// Endpoint URL without query, e.g. "https://collector.example/api/errors".
    url: String,
}

impl HttpCollector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    fn endpoint(&self, report: &ErrorReport) -> String {
        let mut query = format!("level={}", report.level.as_str());
        if let Some(environment) = &report.environment {
            query.push_str(&format!("&environment={}", urlencoding::encode(environment)));
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, query)
    }
}

#[async_trait]
impl ErrorCollector for HttpCollector {
    async fn report(&self, report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>> {
        let resp = self.client.post(self.endpoint(report)).json(report).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("collector rejected report with status {}: {}", status, text).into())
        }
    }
}

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::decoder::ByteStream;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::model::CompletionRequest;
use crate::transport::CompletionTransport;

/// Streaming chat completions against an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAi {
    http: HttpClient,
    endpoint: String,
    org: Option<String>,
    name: String, // usually "openai"
    api_key: SecretString,
}

impl OpenAi {
    pub fn new(
        http: HttpClient,
        api_key: SecretString,
        endpoint: String,
        org: Option<String>,
    ) -> Self {
        Self {
            http,
            api_key,
            endpoint,
            org,
            name: "openai".into(),
        }
    }

    /// Build from config, reading the key from the configured environment variable.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        Ok(Self::new(
            http,
            cfg.api_key()?,
            cfg.client.endpoint.clone(),
            cfg.client.organization.clone(),
        ))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAi::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            format!("{server_base}/v1/chat/completions"),
            None,
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        h
    }
}

#[async_trait]
impl CompletionTransport for OpenAi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, req: &CompletionRequest) -> CoreResult<ByteStream> {
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let body = self
            .http
            .post_event_stream(&self.endpoint, req, &hdrs)
            .await
            .map_err(|e| e.with_provider(&self.name))?;
        let name = self.name.clone();
        Ok(body.map_err(move |e| e.with_provider(&name)).boxed())
    }
}

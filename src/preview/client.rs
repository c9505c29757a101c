use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::stream::{is_stream_content_type, parse_stream, Fragment, STREAM_MIME};
use crate::error::PreviewError;
use crate::types::PreviewRequest;

/// A rendered preview, either whole or as targeted fragments
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewResponse {
    Html(String),
    Stream(Vec<Fragment>),
}

#[async_trait]
pub trait PreviewFetcher: Send + Sync {
    async fn fetch(&self, request: &PreviewRequest) -> Result<PreviewResponse, PreviewError>;
}

pub struct HttpPreviewFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpPreviewFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PreviewError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        // Arrays and objects travel as one JSON-encoded parameter
        other => other.to_string(),
    }
}

/// Query parameters for a preview request.
///
/// `step_index` comes first, then one `step[<key>]` entry per record key.
pub fn query_pairs(request: &PreviewRequest) -> Vec<(String, String)> {
    let mut pairs = vec![("step_index".to_string(), request.step_index.to_string())];

    if let Ok(Value::Object(map)) = serde_json::to_value(&request.record) {
        for (key, value) in map.iter() {
            if key == "index" {
                continue;
            }
            pairs.push((format!("step[{}]", key), param_value(value)));
        }
    }

    pairs
}

#[async_trait]
impl PreviewFetcher for HttpPreviewFetcher {
    async fn fetch(&self, request: &PreviewRequest) -> Result<PreviewResponse, PreviewError> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, format!("{}, text/html", STREAM_MIME))
            .query(&query_pairs(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PreviewError::Status {
                status: status.as_u16(),
            });
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_stream_content_type)
            .unwrap_or(false);
        let body = response.text().await?;

        debug!(
            step_index = request.step_index,
            request_id = request.request_id,
            stream = is_stream,
            "preview response received"
        );

        if is_stream {
            Ok(PreviewResponse::Stream(parse_stream(&body)?))
        } else {
            Ok(PreviewResponse::Html(body))
        }
    }
}

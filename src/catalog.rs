//! Variable catalog
//!
//! Known variable names for the current workflow. Reloads build a complete
//! new set and swap it in whole, so readers see either the old set or the
//! new one, never a mix. Each reload takes a generation number and only the
//! most recently started one may swap its result in.

use async_trait::async_trait;
use indexmap::IndexSet;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::types::VariableToken;

/// Where variable names come from
#[async_trait]
pub trait VariableSource: Send + Sync {
    async fn fetch_variables(&self) -> Result<Vec<String>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct VariablesResponse {
    variables: Vec<String>,
}

/// `GET <variables_url>` returning `{ "variables": [..] }`
pub struct HttpVariableSource {
    client: reqwest::Client,
    url: String,
}

impl HttpVariableSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Build a source from a URL template containing `{workflow_id}`.
    pub fn for_workflow(
        template: &str,
        workflow_id: &str,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        if workflow_id.trim().is_empty() {
            return Err(CatalogError::MissingWorkflow);
        }
        Self::new(template.replace("{workflow_id}", workflow_id), timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl VariableSource for HttpVariableSource {
    async fn fetch_variables(&self) -> Result<Vec<String>, CatalogError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
            });
        }

        let body: VariablesResponse = response.json().await?;
        Ok(body.variables)
    }
}

/// Shared, read-mostly set of variable names.
#[derive(Debug, Default)]
pub struct VariableCatalog {
    entries: RwLock<Arc<IndexSet<String>>>,
    generation: AtomicU64,
}

impl VariableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<IndexSet<String>> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Current names as tokens, in catalog order.
    pub fn tokens(&self) -> Vec<VariableToken> {
        self.snapshot()
            .iter()
            .map(|name| VariableToken { name: name.clone() })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Replace the whole set. Duplicates keep their first position.
    ///
    /// Any reload still in flight is superseded.
    pub fn replace<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let next = Arc::new(normalize(names));
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    pub fn clear(&self) {
        self.replace(std::iter::empty());
    }

    /// Fetch from `source` and swap the result in.
    ///
    /// On failure the previous set is kept and the error is returned for the
    /// caller to report; it is never fatal. A result that lands after a newer
    /// reload or replace has started is dropped, and the current size is
    /// returned instead.
    pub async fn reload(&self, source: &dyn VariableSource) -> Result<usize, CatalogError> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match source.fetch_variables().await {
            Ok(names) => {
                let next = Arc::new(normalize(names));
                let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
                if self.generation.load(Ordering::SeqCst) != ticket {
                    debug!(ticket, "superseded catalog reload dropped");
                    return Ok(guard.len());
                }
                *guard = next;
                debug!(count = guard.len(), ticket, "variable catalog reloaded");
                Ok(guard.len())
            }
            Err(e) => {
                warn!(error = %e, "variable catalog reload failed, keeping previous set");
                Err(e)
            }
        }
    }

    /// Case-insensitive substring match, in catalog order.
    pub fn filter(&self, query: &str) -> Vec<String> {
        let needle = query.trim().to_lowercase();
        self.snapshot()
            .iter()
            .filter(|name| needle.is_empty() || name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

fn normalize<I>(names: I) -> IndexSet<String>
where
    I: IntoIterator<Item = String>,
{
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

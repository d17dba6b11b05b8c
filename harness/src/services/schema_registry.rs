//! Schema registry REST client

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::BackendResult;
use crate::traits::{SchemaRegistryClient, SchemaRegistryConnector};

#[derive(Debug, Clone, Default)]
pub struct HttpSchemaRegistryConnector {
    client: reqwest::Client,
}

impl HttpSchemaRegistryConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaRegistryConnector for HttpSchemaRegistryConnector {
    async fn connect(&self, url: &str) -> BackendResult<Arc<dyn SchemaRegistryClient>> {
        Ok(Arc::new(HttpSchemaRegistryClient::new(self.client.clone(), url)?))
    }
}

#[derive(Debug, Clone)]
pub struct HttpSchemaRegistryClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpSchemaRegistryClient {
    pub fn new(client: reqwest::Client, url: &str) -> BackendResult<Self> {
        let mut base = Url::parse(url)?;
        // join() replaces the last segment unless the path ends in a slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    pub fn subjects_url(&self) -> BackendResult<Url> {
        Ok(self.base.join("subjects")?)
    }
}

/// Body of `GET /subjects`: a JSON array of subject names
fn parse_subjects(body: &[u8]) -> BackendResult<Vec<String>> {
    Ok(serde_json::from_slice(body)?)
}

#[async_trait]
impl SchemaRegistryClient for HttpSchemaRegistryClient {
    async fn subjects(&self) -> BackendResult<Vec<String>> {
        let body = self
            .client
            .get(self.subjects_url()?)
            .header("Accept", "application/vnd.schemaregistry.v1+json")
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        parse_subjects(&body)
    }
}

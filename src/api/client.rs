use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;

/// Campaign backend REST client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(
      &config.api.url,
      token,
      Duration::from_secs(config.api.timeout_secs),
    )
  }

  pub fn with_token(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
    let base = base_url_with_slash(base_url)?;
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  /// URL of a collection or of one row in it
  pub fn endpoint(&self, resource: &str, id: Option<u64>) -> Result<Url> {
    let path = match id {
      Some(id) => format!("{}/{}", resource, id),
      None => resource.to_string(),
    };
    self
      .base
      .join(&path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    self.http.request(method, url).bearer_auth(&self.token)
  }

  async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response to {}: {}", what, e))?;

    if !status.is_success() {
      return Err(eyre!("Failed to {}: HTTP {} {}", what, status, body.trim()));
    }

    debug!(what, status = status.as_u16(), bytes = body.len(), "Backend response");

    if body.trim().is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
  }

  /// Get a whole collection (or summary object) as raw JSON
  pub async fn get_collection(&self, resource: &str) -> Result<Value> {
    let url = self.endpoint(resource, None)?;
    self
      .send(self.request(Method::GET, url), &format!("get {}", resource))
      .await
  }

  /// Create a row, returning the backend's representation of it
  pub async fn create<B: Serialize + ?Sized>(&self, resource: &str, body: &B) -> Result<Value> {
    let url = self.endpoint(resource, None)?;
    self
      .send(
        self.request(Method::POST, url).json(body),
        &format!("create {}", resource),
      )
      .await
  }

  pub async fn update<B: Serialize + ?Sized>(
    &self,
    resource: &str,
    id: u64,
    body: &B,
  ) -> Result<Value> {
    let url = self.endpoint(resource, Some(id))?;
    self
      .send(
        self.request(Method::PUT, url).json(body),
        &format!("update {} {}", resource, id),
      )
      .await
  }

  pub async fn delete(&self, resource: &str, id: u64) -> Result<()> {
    let url = self.endpoint(resource, Some(id))?;
    self
      .send(
        self.request(Method::DELETE, url),
        &format!("delete {} {}", resource, id),
      )
      .await?;
    Ok(())
  }
}

/// `Url::join` drops the last path segment unless it ends with a slash.
fn base_url_with_slash(base_url: &str) -> Result<Url> {
  let mut base = base_url.trim().to_string();
  if !base.ends_with('/') {
    base.push('/');
  }
  Url::parse(&base).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))
}

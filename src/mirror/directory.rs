//! Upstream customer/item/employee directory.

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::resources::MirrorResource;
use crate::error::{Error, RemoteError, Result};
use crate::sync::http::{parse_base_url, send};

/// Source of full datasets for the mirror cache.
#[async_trait]
pub trait UpstreamDirectory: Send + Sync {
  /// Every item of a resource, in upstream order.
  async fn fetch_all<T: MirrorResource>(&self) -> std::result::Result<Vec<T>, RemoteError>;
}

/// Directory client following `?page=&pageSize=` pagination.
#[derive(Clone)]
pub struct HttpDirectory {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
  page_size: usize,
}

impl HttpDirectory {
  pub fn new(base_url: &str, token: Option<String>, page_size: usize, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base: parse_base_url(base_url)?,
      token,
      page_size: page_size.max(1),
    })
  }

  fn page_url(&self, resource: &str, page: usize) -> std::result::Result<Url, RemoteError> {
    let mut url = self
      .base
      .join(resource)
      .map_err(|e| RemoteError::rejected(format!("Invalid resource {}: {}", resource, e)))?;
    url
      .query_pairs_mut()
      .append_pair("page", &page.to_string())
      .append_pair("pageSize", &self.page_size.to_string());
    Ok(url)
  }
}

#[async_trait]
impl UpstreamDirectory for HttpDirectory {
  async fn fetch_all<T: MirrorResource>(&self) -> std::result::Result<Vec<T>, RemoteError> {
    let mut items = Vec::new();
    let mut page = 1;

    loop {
      let url = self.page_url(T::resource(), page)?;
      let mut request = self.client.request(Method::GET, url);
      if let Some(token) = &self.token {
        request = request.bearer_auth(token);
      }

      let batch: Vec<T> = send(request)
        .await?
        .json()
        .await
        .map_err(|e| RemoteError::transient(format!("Malformed {} page: {}", T::resource(), e)))?;

      let count = batch.len();
      items.extend(batch);
      // A short page is the last one
      if count < self.page_size {
        break;
      }
      page += 1;
    }

    debug!("Fetched {} {} in {} pages", items.len(), T::resource(), page);
    Ok(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_url() {
    let directory =
      HttpDirectory::new("https://dir.example.com/v1", None, 250, Duration::from_secs(5)).unwrap();
    assert_eq!(
      directory.page_url("customers", 3).unwrap().as_str(),
      "https://dir.example.com/v1/customers?page=3&pageSize=250"
    );
  }
}

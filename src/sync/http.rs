//! `reqwest` client for the case study API.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::remote::{BinaryUpload, PushOutcome, RemoteApi};
use crate::entities::EntityKind;
use crate::error::{Error, RemoteError, Result};
use crate::queue::{ChangePayload, EntityChange};

#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

#[derive(Deserialize)]
struct CreatedResponse {
  id: serde_json::Value,
}

#[derive(Deserialize)]
struct UploadResponse {
  url: String,
}

impl HttpRemote {
  pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    let base = parse_base_url(base_url)?;
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  fn resource_url(&self, collection: &str, id: Option<&str>) -> std::result::Result<Url, RemoteError> {
    let mut url = self
      .base
      .join(collection)
      .map_err(|e| RemoteError::rejected(format!("Invalid endpoint {}: {}", collection, e)))?;
    if let Some(id) = id {
      url
        .path_segments_mut()
        .map_err(|_| RemoteError::rejected("Base URL cannot carry a path"))?
        .push(id);
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn push<T: Serialize + Sync>(
    &self,
    collection: &str,
    change: &EntityChange<T>,
  ) -> std::result::Result<PushOutcome, RemoteError> {
    match change {
      EntityChange::Create { fields, .. } => {
        let url = self.resource_url(collection, None)?;
        let response = send(self.request(Method::POST, url).json(fields)).await?;
        let created: CreatedResponse = response
          .json()
          .await
          .map_err(|e| RemoteError::transient(format!("Malformed create response: {}", e)))?;
        let remote_id = match created.id {
          serde_json::Value::String(s) => s,
          other => other.to_string(),
        };
        Ok(PushOutcome {
          remote_id: Some(remote_id),
        })
      }
      EntityChange::Update { id, fields } => {
        let url = self.resource_url(collection, Some(id))?;
        send(self.request(Method::PUT, url).json(fields)).await?;
        Ok(PushOutcome::default())
      }
      EntityChange::Delete { id } => {
        let url = self.resource_url(collection, Some(id))?;
        match send(self.request(Method::DELETE, url)).await {
          Ok(_) => Ok(PushOutcome::default()),
          // Already gone on the server
          Err(e) if e.status == Some(404) => Ok(PushOutcome::default()),
          Err(e) => Err(e),
        }
      }
    }
  }
}

#[async_trait]
impl RemoteApi for HttpRemote {
  async fn upload_binary(&self, upload: BinaryUpload) -> std::result::Result<String, RemoteError> {
    let mut url = self.resource_url("uploads", None)?;
    url
      .query_pairs_mut()
      .append_pair("fieldName", &upload.field_name)
      .append_pair("fileName", &upload.file_name);

    let response = send(
      self
        .request(Method::POST, url)
        .header(reqwest::header::CONTENT_TYPE, upload.mime_type)
        .body(upload.bytes),
    )
    .await?;

    let uploaded: UploadResponse = response
      .json()
      .await
      .map_err(|e| RemoteError::transient(format!("Malformed upload response: {}", e)))?;
    Ok(uploaded.url)
  }

  async fn push_change(
    &self,
    payload: &ChangePayload,
  ) -> std::result::Result<PushOutcome, RemoteError> {
    let collection = collection_path(payload.entity());
    match payload {
      ChangePayload::Case(change) => self.push(collection, change).await,
      ChangePayload::Comment(change) => self.push(collection, change).await,
      ChangePayload::SavedReference(change) => self.push(collection, change).await,
    }
  }

  async fn ping(&self) -> std::result::Result<(), RemoteError> {
    let url = self.resource_url("health", None)?;
    send(self.request(Method::GET, url)).await?;
    Ok(())
  }
}

pub(crate) fn parse_base_url(base_url: &str) -> Result<Url> {
  let mut base =
    Url::parse(base_url).map_err(|e| Error::Config(format!("Invalid URL {}: {}", base_url, e)))?;
  // Url::join replaces the last segment unless the path ends with a slash
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  Ok(base)
}

pub(crate) async fn send(builder: RequestBuilder) -> std::result::Result<Response, RemoteError> {
  let response = builder
    .send()
    .await
    .map_err(|e| RemoteError::transient(format!("Request failed: {}", e)))?;

  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = if status == StatusCode::NOT_FOUND {
    String::new()
  } else {
    response.text().await.unwrap_or_default()
  };
  Err(RemoteError::from_status(status.as_u16(), body.trim()))
}

fn collection_path(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Case => "cases",
    EntityKind::Comment => "comments",
    EntityKind::SavedReference => "saved-references",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resource_urls() {
    let remote = HttpRemote::new("https://cases.example.com/api", None, Duration::from_secs(5)).unwrap();
    assert_eq!(
      remote.resource_url("cases", None).unwrap().as_str(),
      "https://cases.example.com/api/cases"
    );
    assert_eq!(
      remote.resource_url("saved-references", Some("a b")).unwrap().as_str(),
      "https://cases.example.com/api/saved-references/a%20b"
    );
  }

  #[test]
  fn test_invalid_base_url_is_config_error() {
    assert!(matches!(
      HttpRemote::new("not a url", None, Duration::from_secs(5)),
      Err(Error::Config(_))
    ));
  }
}

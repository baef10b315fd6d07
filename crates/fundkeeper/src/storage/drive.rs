//! Google Drive v3 object store.

use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{Folder, ListedObject, ObjectStore, StorageError, StoredObject};
use crate::config::StorageConfig;
use crate::crypto::generate_token;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

// Refresh slightly before Google says the token dies.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct OAuthCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct DriveObjectStore {
    http: Client,
    credentials: OAuthCredentials,
    parent_folder_id: Option<String>,
    configured: [Option<String>; 2],
    resolved: [OnceCell<String>; 2],
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    parents: Vec<&'a str>,
}

fn slot(folder: Folder) -> usize {
    match folder {
        Folder::Contributions => 0,
        Folder::Causes => 1,
    }
}

fn require(value: &Option<String>, key: &str) -> Result<String, StorageError> {
    value
        .clone()
        .ok_or_else(|| StorageError::NotConfigured(format!("{key} is required")))
}

fn url_id_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"/d/([A-Za-z0-9_-]+)").expect("valid regex"),
            Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("valid regex"),
        ]
    })
}

/// Extract a Drive file id from either `.../d/<id>/...` or `...?id=<id>` URLs.
pub(crate) fn drive_id_from_url(url: &str) -> Option<String> {
    url_id_patterns()
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn public_url(id: &str) -> String {
    format!("https://drive.google.com/uc?id={id}")
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_related(boundary: &str, metadata: &str, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn check(resp: Response) -> Result<Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Status {
        status: status.as_u16(),
        body,
    })
}

impl DriveObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = OAuthCredentials {
            client_id: require(&config.oauth_client_id, "GDRIVE_OAUTH_CLIENT_ID")?,
            client_secret: require(&config.oauth_client_secret, "GDRIVE_OAUTH_CLIENT_SECRET")?,
            refresh_token: require(&config.oauth_refresh_token, "GDRIVE_OAUTH_REFRESH_TOKEN")?,
        };

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            credentials,
            parent_folder_id: config.parent_folder_id.clone(),
            configured: [config.contribution_folder_id.clone(), config.cause_folder_id.clone()],
            resolved: [OnceCell::new(), OnceCell::new()],
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let token: TokenResponse = check(resp).await?.json().await?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        debug!(lifetime_secs = lifetime.as_secs(), "Drive access token refreshed");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(token.access_token)
    }

    async fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, StorageError> {
        Ok(builder.bearer_auth(self.access_token().await?))
    }

    async fn folder_id(&self, folder: Folder) -> Result<String, StorageError> {
        let idx = slot(folder);
        if let Some(id) = &self.configured[idx] {
            return Ok(id.clone());
        }
        self.resolved[idx]
            .get_or_try_init(|| self.find_or_create_folder(folder))
            .await
            .cloned()
    }

    async fn find_or_create_folder(&self, folder: Folder) -> Result<String, StorageError> {
        let parent = self.parent_folder_id.as_deref().ok_or_else(|| {
            StorageError::NotConfigured(format!(
                "no folder id for {} and GDRIVE_PARENT_FOLDER_ID is not set",
                folder.name()
            ))
        })?;

        let q = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME}' and '{}' in parents and trashed = false",
            query_literal(folder.name()),
            query_literal(parent)
        );
        let req = self
            .authed(self.http.get(FILES_URL))
            .await?
            .query(&[("q", q.as_str()), ("fields", "files(id,name)")]);
        let found: FileList = check(req.send().await?).await?.json().await?;
        if let Some(existing) = found.files.into_iter().next() {
            debug!(folder = folder.name(), id = %existing.id, "Drive folder found");
            return Ok(existing.id);
        }

        let req = self.authed(self.http.post(FILES_URL)).await?.json(&FileMetadata {
            name: folder.name(),
            mime_type: Some(FOLDER_MIME),
            parents: vec![parent],
        });
        let created: DriveFile = check(req.send().await?).await?.json().await?;
        info!(folder = folder.name(), id = %created.id, "Drive folder created");
        Ok(created.id)
    }

    async fn make_public(&self, id: &str) -> Result<(), StorageError> {
        let req = self
            .authed(self.http.post(format!("{FILES_URL}/{id}/permissions")))
            .await?
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }));
        check(req.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for DriveObjectStore {
    async fn upload(
        &self,
        folder: Folder,
        bytes: Vec<u8>,
        mime_type: &str,
        name: &str,
    ) -> Result<StoredObject, StorageError> {
        let folder_id = self.folder_id(folder).await?;
        let metadata = serde_json::to_string(&FileMetadata {
            name,
            mime_type: None,
            parents: vec![folder_id.as_str()],
        })
        .map_err(|e| StorageError::Protocol(e.to_string()))?;

        let boundary = format!("fundkeeper-{}", generate_token().map_err(|e| StorageError::Protocol(e.to_string()))?);
        let body = multipart_related(&boundary, &metadata, mime_type, &bytes);

        let req = self
            .authed(self.http.post(UPLOAD_URL))
            .await?
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let file: DriveFile = check(req.send().await?).await?.json().await?;

        if let Err(e) = self.make_public(&file.id).await {
            // Nobody else knows this id yet; drop it rather than leak it.
            if let Err(cleanup) = self.delete(&file.id).await {
                warn!(id = %file.id, error = %cleanup, "Failed to delete Drive file after permission error");
            }
            return Err(e);
        }

        debug!(id = %file.id, object_name = name, folder = folder.name(), "Drive upload complete");
        Ok(StoredObject {
            public_url: public_url(&file.id),
            id: file.id,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let resp = self
            .authed(self.http.delete(format!("{FILES_URL}/{id}")))
            .await?
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(id, "Drive file already gone");
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }

    async fn list(&self, folder: Folder) -> Result<Vec<ListedObject>, StorageError> {
        let folder_id = self.folder_id(folder).await?;
        let q = format!("'{}' in parents and trashed = false", query_literal(&folder_id));

        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.clone()),
                ("fields", "nextPageToken,files(id,name,createdTime)".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let req = self.authed(self.http.get(FILES_URL)).await?.query(&params);
            let page: FileList = check(req.send().await?).await?.json().await?;

            for file in page.files {
                let created_at = file
                    .created_time
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.timestamp())
                    .ok_or_else(|| StorageError::Protocol(format!("file {} has no createdTime", file.id)))?;
                out.push(ListedObject {
                    id: file.id,
                    name: file.name,
                    created_at,
                });
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(out)
    }

    fn id_from_url(&self, url: &str) -> Option<String> {
        drive_id_from_url(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_come_from_both_url_shapes() {
        assert_eq!(
            drive_id_from_url("https://drive.google.com/file/d/1AbC_d-9/view?usp=sharing"),
            Some("1AbC_d-9".to_string())
        );
        assert_eq!(
            drive_id_from_url("https://drive.google.com/uc?id=XYZ123&export=view"),
            Some("XYZ123".to_string())
        );
        assert_eq!(
            drive_id_from_url("https://drive.google.com/uc?export=view&id=q_q"),
            Some("q_q".to_string())
        );
        assert_eq!(drive_id_from_url("https://example.org/picture.png"), None);
    }

    #[test]
    fn public_url_round_trips_through_extraction() {
        assert_eq!(drive_id_from_url(&public_url("abc-DEF_1")), Some("abc-DEF_1".to_string()));
    }

    #[test]
    fn query_literals_are_escaped() {
        assert_eq!(query_literal(r"it's a\b"), r"it\'s a\\b");
    }

    #[test]
    fn multipart_body_has_both_parts() {
        let body = multipart_related("B", r#"{"name":"x"}"#, "image/png", b"PNG");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--B\r\nContent-Type: application/json"));
        assert!(text.contains("Content-Type: image/png\r\n\r\nPNG\r\n--B--"));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let config = crate::config::Config::for_tests("sqlite::memory:").storage;
        let err = DriveObjectStore::new(&config).err().unwrap();
        assert!(matches!(err, StorageError::NotConfigured(ref m) if m.contains("GDRIVE_OAUTH_CLIENT_ID")));
    }
}

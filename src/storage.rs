use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use google_authz::TokenSource;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::BlobStore;

const UPLOAD_ENDPOINT: &str = "https://storage.googleapis.com/upload/storage/v1/b";
const OBJECTS_ENDPOINT: &str = "https://storage.googleapis.com/storage/v1/b";
const DOWNLOAD_ENDPOINT: &str = "https://firebasestorage.googleapis.com/v0/b";
const DOWNLOAD_TOKENS_KEY: &str = "firebaseStorageDownloadTokens";

/// Cloud Storage bucket backing the app's image uploads.
pub struct BucketStore {
    client: reqwest::Client,
    token_source: Arc<TokenSource>,
    bucket: String,
}

impl BucketStore {
    pub fn new(token_source: TokenSource, bucket: &str) -> Self {
        BucketStore {
            client: reqwest::Client::new(),
            token_source: Arc::new(token_source),
            bucket: bucket.to_string(),
        }
    }

    async fn authorization(&self) -> Result<String> {
        let token = self
            .token_source
            .token()
            .await
            .map_err(|e| anyhow!("could not obtain storage access token: {}", e))?;
        Ok(format!("{} {}", token.token_type, token.access_token))
    }
}

/// Object resource as written on upload and returned by a metadata GET.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResource {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ObjectResource {
    pub fn with_download_token(name: &str, content_type: &str, token: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(DOWNLOAD_TOKENS_KEY.to_string(), token.to_string());
        ObjectResource {
            name: name.to_string(),
            content_type: content_type.to_string(),
            metadata,
        }
    }

    /// First of the comma-separated download tokens, if any.
    pub fn download_token(&self) -> Option<&str> {
        self.metadata
            .get(DOWNLOAD_TOKENS_KEY)?
            .split(',')
            .map(str::trim)
            .find(|token| !token.is_empty())
    }
}

fn object_url(base: &str, bucket: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("{} cannot be a base URL", base))?
        .push(bucket)
        .push("o")
        .push(path);
    Ok(url)
}

/// Token-bearing download URL for `path` inside `bucket`. The object path
/// is a single URL segment, so its slashes are escaped.
pub fn download_url_for(bucket: &str, path: &str, token: &str) -> Result<Url> {
    let mut url = object_url(DOWNLOAD_ENDPOINT, bucket, path)?;
    url.query_pairs_mut()
        .append_pair("alt", "media")
        .append_pair("token", token);
    Ok(url)
}

/// Body of a `multipart/related` upload: object metadata, then the media.
pub fn multipart_body(
    boundary: &str,
    object: &ObjectResource,
    content_type: &str,
    bytes: &[u8],
) -> Result<Vec<u8>> {
    let metadata = serde_json::to_string(object)?;

    let mut body = Vec::with_capacity(bytes.len() + metadata.len() + 256);
    for line in &[
        format!("--{}", boundary),
        "Content-Type: application/json; charset=UTF-8".to_string(),
        String::new(),
        metadata,
        format!("--{}", boundary),
        format!("Content-Type: {}", content_type),
        String::new(),
    ] {
        body.extend_from_slice(line.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    Ok(body)
}

#[async_trait]
impl BlobStore for BucketStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let authorization = self.authorization().await?;

        let object = ObjectResource::with_download_token(
            path,
            content_type,
            &Uuid::new_v4().to_string(),
        );
        let boundary = format!("chat-upload-{}", Uuid::new_v4().simple());
        let body = multipart_body(&boundary, &object, content_type, &bytes)?;

        let mut url = Url::parse(UPLOAD_ENDPOINT)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("upload endpoint cannot be a base URL"))?
            .push(&self.bucket)
            .push("o");
        url.set_query(Some(&serde_urlencoded::to_string(&[("uploadType", "multipart")])?));

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .with_context(|| format!("uploading {}", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("upload of {} failed with {}: {}", path, status, body));
        }

        Ok(())
    }

    /// Reads the object's metadata and builds the URL from its download token.
    async fn download_url(&self, path: &str) -> Result<String> {
        let authorization = self.authorization().await?;
        let url = object_url(OBJECTS_ENDPOINT, &self.bucket, path)?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .with_context(|| format!("reading metadata of {}", path))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(anyhow!("no object at {}", path));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("metadata of {} failed with {}: {}", path, status, body));
        }

        let object: ObjectResource = response
            .json()
            .await
            .with_context(|| format!("decoding metadata of {}", path))?;
        let token = object
            .download_token()
            .with_context(|| format!("{} has no download token", path))?;

        Ok(download_url_for(&self.bucket, path, token)?.to_string())
    }
}

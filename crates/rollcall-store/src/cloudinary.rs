//! Cloudinary signed image upload.
//!
//! Signature: lowercase hex SHA-256 over the alphabetically sorted
//! `key=value` pairs of the signed parameters joined with `&`, followed
//! directly by the API secret.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use rollcall_core::{ObjectStore, ObjectStoreError};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Optional folder the uploads land in.
    pub folder: Option<String>,
}

pub struct CloudinaryStore {
    client: Client,
    config: CloudinaryConfig,
    api_base: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Build the string that gets hashed, from unsorted `(key, value)` pairs.
fn string_to_sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{joined}{api_secret}")
}

fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let digest = Sha256::digest(string_to_sign(params, api_secret).as_bytes());
    format!("{digest:x}")
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Result<Self, ObjectStoreError> {
        let client = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| ObjectStoreError::Upload(e.to_string()))?;
        Ok(Self {
            client,
            config,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", self.api_base, self.config.cloud_name)
    }

    fn signed_params(&self, public_id: &str, timestamp: i64) -> Vec<(&'static str, String)> {
        let mut params = vec![("public_id", public_id.to_string()), ("timestamp", timestamp.to_string())];
        if let Some(folder) = &self.config.folder {
            params.push(("folder", folder.clone()));
        }
        params
    }
}

#[async_trait::async_trait]
impl ObjectStore for CloudinaryStore {
    async fn upload(&self, name_hint: &str, jpeg: Vec<u8>) -> Result<String, ObjectStoreError> {
        let public_id = format!("{name_hint}_{}", uuid::Uuid::new_v4().simple());
        let params = self.signed_params(&public_id, chrono::Utc::now().timestamp());
        let signature = sign(&params, &self.config.api_secret);

        let mut form = Form::new().part("file", Part::bytes(jpeg).file_name(format!("{public_id}.jpg")));
        for (key, value) in params {
            form = form.text(key, value);
        }
        form = form
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let resp = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Upload(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Upload(format!("HTTP {status}: {body}")));
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Upload(e.to_string()))?;
        tracing::debug!(url = %body.secure_url, "photo uploaded to cloudinary");
        Ok(body.secure_url)
    }

    fn kind(&self) -> &'static str {
        "cloudinary"
    }
}

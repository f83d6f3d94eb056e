//! Profile picture hosting on ImageKit.

use bytes::Bytes;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_UPLOAD_URL: &str = "https://upload.imagekit.io/api/v1/files/upload";
pub const DEFAULT_API_URL: &str = "https://api.imagekit.io/v1";
pub const PROFILE_FOLDER: &str = "profile-pictures";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image host request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image host rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("image uploads are not configured")]
    Disabled,
}

#[derive(Clone, Debug)]
pub struct ImageKitConfig {
    pub private_key: String,
    pub upload_url: String,
    pub api_url: String,
}

impl ImageKitConfig {
    pub fn new(private_key: String) -> Self {
        Self {
            private_key,
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub url: String,
    pub file_id: String,
}

pub enum ImageHost {
    ImageKit { client: Client, config: ImageKitConfig },
    Disabled,
}

impl ImageHost {
    pub fn imagekit(config: ImageKitConfig) -> Result<Self, ImageError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(ImageHost::ImageKit { client, config })
    }

    pub async fn upload(
        &self,
        bytes: Bytes,
        file_name: &str,
        folder: &str,
    ) -> Result<UploadedImage, ImageError> {
        let ImageHost::ImageKit { client, config } = self else {
            return Err(ImageError::Disabled);
        };
        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::stream_with_length(bytes.clone(), bytes.len() as u64)
                    .file_name(file_name.to_string()),
            )
            .text("fileName", file_name.to_string())
            .text("folder", folder.to_string());
        let response = client
            .post(&config.upload_url)
            .basic_auth(&config.private_key, Some(""))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn delete(&self, file_id: &str) -> Result<(), ImageError> {
        let ImageHost::ImageKit { client, config } = self else {
            return Err(ImageError::Disabled);
        };
        let url = format!("{}/files/{file_id}", config.api_url.trim_end_matches('/'));
        let response = client
            .delete(url)
            .basic_auth(&config.private_key, Some(""))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

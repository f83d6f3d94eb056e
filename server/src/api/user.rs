use apnasquad_types::{
    api::{PageQuery, DEFAULT_PAGE_LIMIT},
    ProfilePatch, Transaction, MAX_NAME_LENGTH, MIN_NAME_LENGTH,
};
use axum::{
    extract::{FromRequest, Multipart, Request, State as AxumState},
    http::header,
    response::Response,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ok, present, ApiQuery, Pagination};
use crate::auth::AuthUser;
use crate::error::{ApiError, Result};
use crate::images::PROFILE_FOLDER;
use crate::App;

const PROFILE_IMAGE_FIELD: &str = "profileImage";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProfileForm {
    name: Option<String>,
    bgmi_id: Option<String>,
    phone: Option<String>,
    upi_id: Option<String>,
    upi_name: Option<String>,
    team_name: Option<String>,
}

impl ProfileForm {
    fn set(&mut self, field: &str, value: String) {
        let slot = match field {
            "name" => &mut self.name,
            "bgmiId" => &mut self.bgmi_id,
            "phone" => &mut self.phone,
            "upiId" => &mut self.upi_id,
            "upiName" => &mut self.upi_name,
            "teamName" => &mut self.team_name,
            _ => return,
        };
        *slot = Some(value);
    }

    fn into_patch(self) -> Result<ProfilePatch> {
        let name = present(self.name);
        if let Some(name) = &name {
            let length = name.chars().count();
            if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&length) {
                return Err(ApiError::bad_request(format!(
                    "Name must be between {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH} characters long"
                )));
            }
        }
        Ok(ProfilePatch {
            name,
            bgmi_id: self.bgmi_id.map(|value| value.trim().to_string()),
            phone: self.phone.map(|value| value.trim().to_string()),
            upi_id: self.upi_id.map(|value| value.trim().to_string()),
            upi_name: self.upi_name.map(|value| value.trim().to_string()),
            team_name: self.team_name.map(|value| value.trim().to_string()),
            avatar: None,
            file_id: None,
        })
    }
}

struct ProfileImage {
    file_name: String,
    bytes: Bytes,
}

async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(ProfileForm, Option<ProfileImage>)> {
    let mut form = ProfileForm::default();
    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == PROFILE_IMAGE_FIELD {
            let is_image = field
                .content_type()
                .is_some_and(|content_type| content_type.starts_with("image/"));
            if !is_image {
                return Err(ApiError::bad_request("Profile image must be an image file"));
            }
            let file_name = field
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| "profile-image".to_string());
            let bytes = field.bytes().await?;
            if !bytes.is_empty() {
                image = Some(ProfileImage { file_name, bytes });
            }
        } else {
            form.set(&name, field.text().await?);
        }
    }
    Ok((form, image))
}

/// Accepts either a JSON body or a multipart form carrying `profileImage`.
pub(super) async fn update_profile(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    req: Request,
) -> Result<Response> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));
    let (form, image) = if is_multipart {
        let multipart = Multipart::from_request(req, &app).await?;
        read_multipart(multipart).await?
    } else {
        let Json(form) = Json::<ProfileForm>::from_request(req, &app).await?;
        (form, None)
    };

    let mut patch = form.into_patch()?;
    let uploaded = match image {
        Some(image) => {
            let uploaded = app
                .images
                .upload(image.bytes, &image.file_name, PROFILE_FOLDER)
                .await
                .map_err(|err| {
                    ApiError::internal(
                        "Error while uploading profile picture, please try again",
                        err,
                    )
                })?;
            patch.avatar = Some(uploaded.url.clone());
            patch.file_id = Some(uploaded.file_id.clone());
            Some(uploaded)
        }
        None => None,
    };

    let updated = app
        .store
        .update_profile(&user.id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if uploaded.is_some() && !user.file_id.is_empty() {
        if let Err(err) = app.images.delete(&user.file_id).await {
            tracing::warn!(error = %err, file_id = %user.file_id, "failed to delete old profile image");
        }
    }

    Ok(ok(updated, "Profile updated successfully"))
}

#[derive(Serialize)]
struct TransactionsPage {
    transactions: Vec<Transaction>,
    pagination: Pagination,
}

pub(super) async fn transactions(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Response> {
    let page = query.resolve(DEFAULT_PAGE_LIMIT);
    let (transactions, total) = app.store.transactions_for_user(&user.id, page).await?;
    Ok(ok(
        TransactionsPage {
            transactions,
            pagination: Pagination::new(page, total),
        },
        "Transactions fetched successfully",
    ))
}

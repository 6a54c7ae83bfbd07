use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use warta_db::{MediaStore, NewPost, PostError, PostRecord, UpdatePost};

use super::{
    forms::{self, FormDescriptor, PostForm},
    ApiError, AppState,
};

/// Posts shown per listing page.
pub(super) const PAGE_SIZE: u32 = 5;

pub(super) const MSG_STORED: &str = "Data Berhasil Disimpan!";
pub(super) const MSG_UPDATED: &str = "Data Berhasil Diupdate!";
pub(super) const MSG_DESTROYED: &str = "Data Berhasil Dihapus!";

#[derive(Debug, Deserialize, IntoParams)]
pub(super) struct ListQuery {
    page: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub(super) struct PostResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image: String,
    pub image_url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PostRecord> for PostResponse {
    fn from(record: PostRecord) -> Self {
        let image_url = MediaStore::url_path(&record.image);
        let created_at = record.created_at.to_rfc3339();
        let updated_at = record.updated_at.to_rfc3339();

        Self {
            id: record.id,
            title: record.title,
            content: record.content,
            image: record.image,
            image_url,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub(super) struct PostListResponse {
    pub data: Vec<PostResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub(super) struct MessageResponse {
    pub message: String,
}

/// Multipart payload accepted by the store and update operations. Handlers
/// read the parts manually; this type only feeds the OpenAPI document.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub(super) struct PostFormBody {
    title: String,
    content: String,
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

#[utoipa::path(
    get,
    path = "/posts",
    params(ListQuery),
    responses((status = 200, description = "Page of posts, newest first", body = PostListResponse))
)]
pub(super) async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PostListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let offset = (page - 1).saturating_mul(PAGE_SIZE);

    let total = state.db.count_posts().await.map_err(ApiError::internal)?;
    let records = state
        .db
        .list_posts(PAGE_SIZE, offset)
        .await
        .map_err(ApiError::internal)?;

    let has_more = u64::from(offset) + u64::from(PAGE_SIZE) < total;
    Ok(Json(PostListResponse {
        data: records.into_iter().map(PostResponse::from).collect(),
        page,
        per_page: PAGE_SIZE,
        total,
        has_more,
    }))
}

#[utoipa::path(
    get,
    path = "/posts/create",
    responses((status = 200, description = "Form descriptor for creating a post", body = FormDescriptor))
)]
pub(super) async fn create_form() -> Json<FormDescriptor> {
    Json(forms::create_form_descriptor())
}

#[utoipa::path(
    post,
    path = "/posts",
    request_body(content = PostFormBody, content_type = "multipart/form-data"),
    responses(
        (status = 303, description = "Post created; redirects to the listing", body = MessageResponse),
        (status = 422, description = "Validation failed", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    )
)]
pub(super) async fn store_post(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_post_form(multipart).await?;
    let valid = forms::validate_store(form).map_err(ApiError::validation)?;

    let filename = state
        .media
        .put(&valid.image.bytes, valid.image.kind)
        .map_err(ApiError::storage)?;

    let record = state
        .db
        .create_post(NewPost {
            title: &valid.title,
            content: &valid.content,
            image: &filename,
        })
        .await
        .map_err(ApiError::storage)?;

    info!(id = %record.id, image = %record.image, "post created");
    Ok(redirect_to_index(MSG_STORED))
}

#[utoipa::path(
    get,
    path = "/posts/{id}",
    params(("id" = Uuid, Path, description = "Post identifier")),
    responses(
        (status = 200, description = "Post details", body = PostResponse),
        (status = 404, description = "Post not found", body = ErrorBody)
    )
)]
pub(super) async fn show_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PostResponse>, ApiError> {
    let record = state
        .db
        .fetch_post(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| PostError::NotFound(id))?;

    Ok(Json(PostResponse::from(record)))
}

#[utoipa::path(
    get,
    path = "/posts/{id}/edit",
    params(("id" = Uuid, Path, description = "Post identifier")),
    responses(
        (status = 200, description = "Form descriptor prefilled with the post", body = FormDescriptor),
        (status = 404, description = "Post not found", body = ErrorBody)
    )
)]
pub(super) async fn edit_form(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FormDescriptor>, ApiError> {
    let record = state
        .db
        .fetch_post(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| PostError::NotFound(id))?;

    Ok(Json(forms::edit_form_descriptor(&record)))
}

#[utoipa::path(
    put,
    path = "/posts/{id}",
    params(("id" = Uuid, Path, description = "Post identifier")),
    request_body(content = PostFormBody, content_type = "multipart/form-data"),
    responses(
        (status = 303, description = "Post updated; redirects to the listing", body = MessageResponse),
        (status = 404, description = "Post not found", body = ErrorBody),
        (status = 422, description = "Validation failed", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    )
)]
pub(super) async fn update_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_post_form(multipart).await?;
    let valid = forms::validate_update(form).map_err(ApiError::validation)?;

    let previous = state
        .db
        .fetch_post(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| PostError::NotFound(id))?;

    let new_image = match valid.image {
        Some(image) => {
            let filename = state
                .media
                .put(&image.bytes, image.kind)
                .map_err(ApiError::storage)?;
            // Identical content hashes to the same name; only drop the old
            // file when the name actually changed.
            if filename != previous.image {
                discard_image(&state.media, &previous.image);
            }
            Some(filename)
        }
        None => None,
    };

    let record = state
        .db
        .update_post(
            id,
            UpdatePost {
                title: &valid.title,
                content: &valid.content,
                image: new_image.as_deref(),
            },
        )
        .await
        .map_err(ApiError::storage)?
        .ok_or_else(|| PostError::NotFound(id))?;

    info!(id = %record.id, image = %record.image, "post updated");
    Ok(redirect_to_index(MSG_UPDATED))
}

#[utoipa::path(
    delete,
    path = "/posts/{id}",
    params(("id" = Uuid, Path, description = "Post identifier")),
    responses(
        (status = 303, description = "Post deleted; redirects to the listing", body = MessageResponse),
        (status = 404, description = "Post not found", body = ErrorBody)
    )
)]
pub(super) async fn destroy_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let record = state
        .db
        .fetch_post(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| PostError::NotFound(id))?;

    discard_image(&state.media, &record.image);

    if !state.db.delete_post(id).await.map_err(ApiError::storage)? {
        return Err(PostError::NotFound(id).into());
    }

    info!(id = %id, "post destroyed");
    Ok(redirect_to_index(MSG_DESTROYED))
}

/// Collects the known form fields from a multipart request. Unknown parts are
/// skipped; an empty image part counts as no upload.
async fn read_post_form(mut multipart: Multipart) -> Result<PostForm, ApiError> {
    let mut form = PostForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };

        match name.as_str() {
            "title" => form.title = Some(field.text().await?),
            "content" => form.content = Some(field.text().await?),
            "image" => {
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    form.image = Some(bytes.to_vec());
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Best-effort removal of a stored image. The record operation proceeds
/// regardless of the file's fate, so failures are only logged.
fn discard_image(media: &MediaStore, filename: &str) {
    if let Err(error) = media.delete(filename) {
        warn!(image = %filename, %error, "failed to delete stored image");
    }
}

fn redirect_to_index(message: &str) -> Response {
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, "/posts")],
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
        .into_response()
}

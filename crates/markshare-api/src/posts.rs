use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use markshare_db::{NewPost, PostChanges, PostRow, parse_timestamp};
use markshare_types::api::{
    AuthorSummary, CreatePostRequest, MessageResponse, Pagination, PostPage, PostResponse,
    PublicPostResponse, UpdatePostRequest,
};

use crate::error::ApiError;
use crate::extract::Payload;
use crate::middleware::Viewer;
use crate::{AppState, run_db};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
/// Upper bound on a document's content, in bytes.
pub const MAX_CONTENT_SIZE: usize = 1024 * 1024;

const CONTENT_TOO_LARGE: &str = "Content size exceeds the 1MB limit";

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    /// Resolves defaults and clamps the page size. Returns `(page, limit, offset)`.
    fn resolve(&self) -> Result<(u32, u32, u64), ApiError> {
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 || limit == 0 {
            return Err(ApiError::validation("page and limit must be positive"));
        }
        let limit = limit.min(MAX_PAGE_SIZE);
        let offset = u64::from(page - 1) * u64::from(limit);
        Ok((page, limit, offset))
    }
}

fn page_params(
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<(u32, u32, u64), ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    query.resolve()
}

/// "My documents": the viewer's own posts plus every public one, newest first.
pub async fn list_posts(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<PostPage<PostResponse>>, ApiError> {
    let (page, limit, offset) = page_params(query)?;
    let viewer_id = viewer.user_id();

    let rows = {
        let viewer_id = viewer_id.clone();
        run_db(&state, move |db| {
            db.list_visible_posts(viewer_id.as_deref(), limit, offset)
        })
        .await?
    };

    let mut posts = Vec::with_capacity(rows.rows.len());
    for row in rows.rows {
        if !row.is_visible_to(viewer_id.as_deref()) {
            error!(post_id = %row.id, viewer = ?viewer_id, "listing returned a post the viewer cannot see");
            return Err(anyhow::anyhow!("visibility check failed for post {}", row.id).into());
        }
        posts.push(post_response(row)?);
    }

    Ok(Json(PostPage {
        posts,
        pagination: Pagination::new(page, limit, rows.total),
    }))
}

/// "Explore": public posts ranked by upvotes, with the viewer's own vote.
pub async fn list_public_posts(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<PostPage<PublicPostResponse>>, ApiError> {
    let (page, limit, offset) = page_params(query)?;
    let viewer_id = viewer.user_id();

    let rows = run_db(&state, move |db| {
        db.list_public_posts(viewer_id.as_deref(), limit, offset)
    })
    .await?;

    let posts = rows
        .rows
        .into_iter()
        .map(|row| {
            Ok(PublicPostResponse {
                post: post_response(row.post)?,
                user_vote: row.user_vote,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(PostPage {
        posts,
        pagination: Pagination::new(page, limit, rows.total),
    }))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Payload(req): Payload<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let author_id = viewer.require()?.sub.to_string();

    if req.title.trim().is_empty() || req.content.trim().is_empty() {
        return Err(ApiError::validation("Title and content are required"));
    }
    check_content_size(&req.content)?;

    let row = run_db(&state, move |db| {
        db.create_post(
            &NewPost {
                author_id: &author_id,
                title: &req.title,
                content: &req.content,
                is_public: req.is_public,
            },
            Utc::now(),
        )
    })
    .await?;

    info!(post_id = %row.id, author_id = %row.author_id, is_public = row.is_public, "post created");
    Ok((StatusCode::CREATED, Json(post_response(row)?)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = load_post(&state, &id).await?;

    if !post.is_visible_to(viewer.user_id().as_deref()) {
        return Err(ApiError::unauthorized());
    }

    Ok(Json(post_response(post)?))
}

pub async fn update_post(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
    Payload(req): Payload<UpdatePostRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    let user_id = viewer.require()?.sub.to_string();
    let post = load_post(&state, &id).await?;
    if post.author_id != user_id {
        return Err(ApiError::unauthorized());
    }

    if req.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::validation("Title cannot be empty"));
    }
    if let Some(content) = &req.content {
        check_content_size(content)?;
    }

    let updated = run_db(&state, move |db| {
        db.update_post(
            &post.id,
            &PostChanges {
                title: req.title.as_deref(),
                content: req.content.as_deref(),
                is_public: req.is_public,
            },
            Utc::now(),
        )
    })
    .await?
    .ok_or_else(ApiError::post_not_found)?;

    info!(post_id = %updated.id, "post updated");
    Ok(Json(post_response(updated)?))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_id = viewer.require()?.sub.to_string();
    let post = load_post(&state, &id).await?;
    if post.author_id != user_id {
        return Err(ApiError::unauthorized());
    }

    let post_id = post.id;
    let deleted = {
        let post_id = post_id.clone();
        run_db(&state, move |db| db.delete_post(&post_id)).await?
    };
    if !deleted {
        return Err(ApiError::post_not_found());
    }

    info!(%post_id, "post deleted");
    Ok(Json(MessageResponse::new("Post deleted successfully")))
}

/// Looks a post up by its path id. Malformed ids are reported as missing.
async fn load_post(state: &AppState, id: &str) -> Result<PostRow, ApiError> {
    let id = Uuid::parse_str(id)
        .map_err(|_| ApiError::post_not_found())?
        .to_string();

    run_db(state, move |db| db.get_post(&id))
        .await?
        .ok_or_else(ApiError::post_not_found)
}

fn check_content_size(content: &str) -> Result<(), ApiError> {
    if content.len() > MAX_CONTENT_SIZE {
        return Err(ApiError::validation(CONTENT_TOO_LARGE));
    }
    Ok(())
}

pub(crate) fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("corrupt id '{raw}': {e}"))
}

pub(crate) fn post_response(row: PostRow) -> anyhow::Result<PostResponse> {
    let author_id = parse_id(&row.author_id)?;

    Ok(PostResponse {
        id: parse_id(&row.id)?,
        title: row.title,
        content: row.content,
        is_public: row.is_public,
        author_id,
        upvotes: row.upvotes,
        downvotes: row.downvotes,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        author: AuthorSummary {
            id: author_id,
            name: row.author_name,
            image: row.author_image,
        },
    })
}

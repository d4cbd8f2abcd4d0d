use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::info;
use uuid::Uuid;

use markshare_db::VoteOutcome;
use markshare_types::VoteType;
use markshare_types::api::{VoteRequest, VoteResponse};

use crate::error::ApiError;
use crate::extract::Payload;
use crate::middleware::Viewer;
use crate::{AppState, run_db};

/// Casts, switches or withdraws the caller's vote on a public post.
pub async fn cast_vote(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<String>,
    Payload(req): Payload<VoteRequest>,
) -> Result<Json<VoteResponse>, ApiError> {
    let user_id = viewer.require()?.sub.to_string();

    let vote: VoteType = req
        .kind
        .parse()
        .map_err(|_| ApiError::validation("Invalid vote type"))?;
    let post_id = Uuid::parse_str(&id).map_err(|_| ApiError::post_not_found())?;

    let outcome = {
        let post_id = post_id.to_string();
        let user_id = user_id.clone();
        run_db(&state, move |db| db.cast_vote(&post_id, &user_id, vote)).await?
    };

    let tally = match outcome {
        VoteOutcome::Applied(tally) => tally,
        VoteOutcome::PostNotFound => return Err(ApiError::post_not_found()),
        VoteOutcome::PostPrivate => {
            return Err(ApiError::InvalidState("Cannot vote on private posts".into()));
        }
    };

    info!(%post_id, %user_id, %vote, user_vote = ?tally.user_vote, "vote cast");

    Ok(Json(VoteResponse {
        post_id,
        upvotes: tally.upvotes,
        downvotes: tally.downvotes,
        user_vote: tally.user_vote,
    }))
}

//! HTTP request handlers for the API endpoints.

use std::convert::Infallible;

use actix_web::{HttpResponse, web};
use paddle_mirror_database::DateRange;
use paddle_mirror_ingest::{IngestError, IngestOutcome};
use paddle_mirror_server_models::{
    ApiCancelResponse, ApiCancelled, ApiError, ApiHealth, ApiMessage, ApiUser, StatusFrame,
    UserQueryParams,
};
use paddle_mirror_user_models::UserRecord;
use tokio_util::sync::CancellationToken;

use crate::AppState;

fn users_json(users: Vec<UserRecord>) -> HttpResponse {
    let api_users: Vec<ApiUser> = users.into_iter().map(ApiUser::from).collect();
    HttpResponse::Ok().json(api_users)
}

/// Maps a failed run to its HTTP response.
fn ingest_error_response(e: &IngestError) -> HttpResponse {
    match e {
        IngestError::MissingSettings | IngestError::InvalidSettings(_) => {
            HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
        }
        IngestError::AlreadyRunning => HttpResponse::Conflict().json(ApiError::new(e.to_string())),
        IngestError::Remote { code, message } => HttpResponse::BadGateway().json(ApiError {
            error: message.clone(),
            code: Some(*code),
        }),
        IngestError::Transport { .. } => {
            HttpResponse::BadGateway().json(ApiError::new(e.to_string()))
        }
        IngestError::Database(_) => {
            HttpResponse::InternalServerError().json(ApiError::new("Failed to store users"))
        }
    }
}

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        ingesting: state.controller.is_running(),
    })
}

/// `POST /api/users`
///
/// Runs one ingestion and returns the full stored user set. The run is
/// spawned so that a client abort cancels it cooperatively (between
/// pages) instead of dropping an in-flight fetch.
#[allow(clippy::future_not_send)]
pub async fn start_ingestion(state: web::Data<AppState>) -> HttpResponse {
    let cancel = CancellationToken::new();
    let abort_guard = cancel.clone().drop_guard();

    let controller = state.controller.clone();
    let token = cancel.clone();
    let handle = actix_web::rt::spawn(async move { controller.run(&token).await });

    let result = handle.await;
    let _ = abort_guard.disarm();

    match result {
        Ok(Ok(IngestOutcome::Completed(users))) => users_json(users),
        Ok(Ok(IngestOutcome::Cancelled)) => HttpResponse::Ok().json(ApiCancelled::default()),
        Ok(Err(e)) => {
            log::error!("Ingestion failed: {e}");
            ingest_error_response(&e)
        }
        Err(e) => {
            log::error!("Ingestion task failed: {e}");
            HttpResponse::InternalServerError().json(ApiError::new("Ingestion task failed"))
        }
    }
}

/// `GET /api/users`
///
/// Returns every stored user, or those whose signup date falls within the
/// inclusive `start_date`/`end_date` range, date-ascending.
pub async fn list_users(
    state: web::Data<AppState>,
    params: web::Query<UserQueryParams>,
) -> HttpResponse {
    let params = params.into_inner();

    let range = match DateRange::parse(params.start_date, params.end_date) {
        Ok(range) => range,
        Err(e) => return HttpResponse::BadRequest().json(ApiError::new(e.to_string())),
    };

    match state.store.get_users(&range).await {
        Ok(users) => users_json(users),
        Err(e) => {
            log::error!("Failed to query users: {e}");
            HttpResponse::InternalServerError().json(ApiError::new("Failed to query users"))
        }
    }
}

/// `DELETE /api/users`
pub async fn delete_users(state: web::Data<AppState>) -> HttpResponse {
    match state.store.delete_all_users().await {
        Ok(deleted) => HttpResponse::Ok().json(ApiMessage {
            success: true,
            message: format!("All users deleted ({deleted})"),
        }),
        Err(e) => {
            log::error!("Failed to delete users: {e}");
            HttpResponse::InternalServerError().json(ApiError::new("Failed to delete users"))
        }
    }
}

/// `POST /api/users/cancel`
pub async fn cancel_ingestion(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiCancelResponse {
        was_running: state.controller.cancel_active(),
    })
}

/// `GET /api/users/status`
///
/// Server-push stream of status frames. Opening a new stream detaches the
/// previous one; past events are not replayed.
pub async fn status_stream(state: web::Data<AppState>) -> HttpResponse {
    let mut rx = state.channel.subscribe();

    let stream = async_stream::stream! {
        while let Some(status) = rx.recv().await {
            match StatusFrame::from(status).to_sse() {
                Ok(frame) => yield Ok::<_, Infallible>(web::Bytes::from(frame)),
                Err(e) => log::error!("Failed to encode status frame: {e}"),
            }
        }
        log::debug!("Status stream closed");
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

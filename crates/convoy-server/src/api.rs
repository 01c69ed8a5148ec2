//! REST surface for notifications and presence.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use convoy_core::{
    DeliveryError, Intent, NewNotification, NotificationId, Page, ReadOutcome, StoreError, Viewer,
};
use convoy_protocol::{NotificationPayload, OnlineDriver, UserType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Notification and presence routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/:id/read", patch(mark_read))
        .route(
            "/notifications/:id",
            axum::routing::delete(delete_notification),
        )
        .route("/presence/drivers", get(online_drivers))
}

/// Errors returned by the REST handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        let store = match self {
            ApiError::BadRequest(_) => return (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Internal(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            ApiError::Delivery(DeliveryError::Validation(_)) => {
                return (StatusCode::BAD_REQUEST, "validation_failed")
            }
            ApiError::Delivery(DeliveryError::Store(e)) | ApiError::Store(e) => e,
        };
        match store {
            StoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            metrics::record_error("api");
        }
        let body = Json(serde_json::json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

fn parse_id(raw: &str) -> Result<NotificationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid notification id: {}", raw)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    user_id: String,
    user_type: UserType,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    notifications: Vec<NotificationPayload>,
    unread_count: usize,
    total: usize,
    limit: usize,
    offset: usize,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    if query.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId is required".to_string()));
    }
    let viewer = Viewer::new(query.user_id, query.user_type);
    let page = state
        .store
        .page_for(
            &viewer,
            Page {
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;

    Ok(Json(ListResponse {
        notifications: page.items.iter().map(|n| n.to_payload()).collect(),
        unread_count: page.unread,
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

#[derive(Debug, Serialize)]
struct CreateResponse {
    notification: NotificationPayload,
    pushed: usize,
}

async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<NewNotification>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let report = state.router.deliver(Intent::Notify(draft)).await?;
    metrics::record_pushes("new_notification", report.pushed, report.dropped());

    let notification = report
        .persisted
        .ok_or_else(|| ApiError::Internal("Notification was not persisted".to_string()))?;

    metrics::record_notification_created();

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            notification: notification.to_payload(),
            pushed: report.pushed,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadBody {
    user_id: String,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_id(&id)?;
    let outcome = state.store.mark_read(id, &body.user_id).await?;
    Ok(Json(serde_json::json!({
        "id": id,
        "alreadyRead": outcome == ReadOutcome::AlreadyRead,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkAllReadBody {
    user_id: String,
    user_type: UserType,
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MarkAllReadBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let viewer = Viewer::new(body.user_id, body.user_type);
    let marked = state.store.mark_all_read(&viewer).await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn online_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<OnlineDriver>> {
    Json(state.registry.online_drivers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::app;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use convoy_core::{outbox, Connection, Inbox, Push};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    fn connect(state: &AppState, conn: &str, user: &str, user_type: UserType) -> Inbox {
        let (tx, rx) = outbox();
        state
            .registry
            .register(Connection::new(conn, user, user_type, user, tx));
        rx
    }

    async fn call(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app(Arc::clone(state))
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(state: &Arc<AppState>, draft: Value) -> String {
        let (status, body) = call(state, Method::POST, "/notifications", Some(draft)).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["notification"]["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_error_status_mapping() {
        let internal = ApiError::Internal("Notification was not persisted".into());
        assert_eq!(internal.status().0, StatusCode::INTERNAL_SERVER_ERROR);

        let missing = ApiError::Store(StoreError::NotFound(NotificationId::generate()));
        assert_eq!(missing.status().0, StatusCode::NOT_FOUND);

        let down = ApiError::Delivery(DeliveryError::Store(StoreError::Unavailable(
            "db offline".into(),
        )));
        assert_eq!(down.status().0, StatusCode::SERVICE_UNAVAILABLE);

        let invalid = ApiError::Delivery(DeliveryError::Validation("body is required".into()));
        assert_eq!(invalid.status(), (StatusCode::BAD_REQUEST, "validation_failed"));
    }

    #[tokio::test]
    async fn test_health() {
        let state = state();
        let (status, body) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_create_pushes_and_lists() {
        let state = state();
        let mut tab1 = connect(&state, "c1", "p-42", UserType::Passenger);
        let mut tab2 = connect(&state, "c2", "p-42", UserType::Passenger);

        let (status, body) = call(
            &state,
            Method::POST,
            "/notifications",
            Some(json!({
                "recipientType": "passenger",
                "recipientId": "p-42",
                "title": "Booking Confirmed",
                "message": "Seat 4A",
                "priority": "high"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["pushed"], 2);
        assert_eq!(body["notification"]["title"], "Booking Confirmed");

        for inbox in [&mut tab1, &mut tab2] {
            assert!(matches!(
                inbox.try_recv().unwrap().as_ref(),
                Push::Notification(n) if n.title == "Booking Confirmed"
            ));
        }

        let (status, body) = call(
            &state,
            Method::GET,
            "/notifications?userId=p-42&userType=passenger",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unreadCount"], 1);
        assert_eq!(body["total"], 1);
        assert_eq!(body["limit"], 20);
        assert_eq!(body["notifications"].as_array().unwrap().len(), 1);

        let (_, body) = call(
            &state,
            Method::GET,
            "/notifications?userId=p-43&userType=passenger",
            None,
        )
        .await;
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn test_create_rejects_incomplete_draft() {
        let state = state();
        let (status, body) = call(
            &state,
            Method::POST,
            "/notifications",
            Some(json!({ "recipientType": "driver", "message": "no title" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let state = state();
        let id = create(
            &state,
            json!({ "recipientType": "driver", "title": "Shift", "message": "6am" }),
        )
        .await;
        let uri = format!("/notifications/{}/read", id);

        let (status, body) = call(&state, Method::PATCH, &uri, Some(json!({ "userId": "d-1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alreadyRead"], false);

        let (status, body) = call(&state, Method::PATCH, &uri, Some(json!({ "userId": "d-1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alreadyRead"], true);

        let (_, body) = call(
            &state,
            Method::GET,
            "/notifications?userId=d-1&userType=driver",
            None,
        )
        .await;
        assert_eq!(body["unreadCount"], 0);

        let (_, body) = call(
            &state,
            Method::GET,
            "/notifications?userId=d-2&userType=driver",
            None,
        )
        .await;
        assert_eq!(body["unreadCount"], 1);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let state = state();
        let missing = NotificationId::generate();

        let (status, body) = call(
            &state,
            Method::PATCH,
            &format!("/notifications/{}/read", missing),
            Some(json!({ "userId": "d-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = call(
            &state,
            Method::DELETE,
            "/notifications/not-a-uuid",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mark_all_read_and_delete() {
        let state = state();
        let first = create(
            &state,
            json!({ "recipientType": "all", "title": "Holiday", "message": "Closed" }),
        )
        .await;
        create(
            &state,
            json!({ "recipientType": "driver", "title": "Fuel", "message": "Prices up" }),
        )
        .await;

        let (status, body) = call(
            &state,
            Method::POST,
            "/notifications/read-all",
            Some(json!({ "userId": "d-1", "userType": "driver" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["marked"], 2);

        let uri = format!("/notifications/{}", first);
        let (status, _) = call(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(
            &state,
            Method::GET,
            "/notifications?userId=p-1&userType=passenger",
            None,
        )
        .await;
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn test_online_drivers() {
        let state = state();
        let _a = connect(&state, "c1", "d-1", UserType::Driver);
        let _b = connect(&state, "c2", "d-1", UserType::Driver);
        let _p = connect(&state, "c3", "p-1", UserType::Passenger);

        let (status, body) = call(&state, Method::GET, "/presence/drivers", None).await;
        assert_eq!(status, StatusCode::OK);
        let drivers = body.as_array().unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0]["userId"], "d-1");
        assert_eq!(drivers[0]["connections"], 2);
    }
}

//! The admin REST surface (§6): `GET`/`PUT /admin/actions`,
//! `DELETE /admin/actions/<id>`. Grounded on `agent::api::build_router`'s
//! shape (a plain `axum::Router` built from a shared handle, routes
//! returning `serde_json::Value` bodies, errors mapped to a JSON body plus
//! status code at the edge).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use maintenance_engine::Feature;
use maintenance_types::MaintenanceError;

pub fn router(feature: Arc<Feature>) -> Router {
    Router::new()
        .route("/admin/actions", get(list_actions).put(put_action))
        .route("/admin/actions/{id}", delete(delete_action))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(feature)
}

struct ApiError(MaintenanceError);

impl From<MaintenanceError> for ApiError {
    fn from(e: MaintenanceError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.error_num() {
            400 => StatusCode::BAD_REQUEST,
            404 => StatusCode::NOT_FOUND,
            409 => StatusCode::CONFLICT,
            502 => StatusCode::BAD_GATEWAY,
            503 => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "errorNum": self.0.error_num(), "errorMessage": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    details: bool,
}

async fn list_actions(State(feature): State<Arc<Feature>>, Query(query): Query<ListQuery>) -> Json<serde_json::Value> {
    let registry: Vec<serde_json::Value> = feature
        .registry
        .snapshot()
        .into_iter()
        .map(|action| {
            let mut json = action.to_json();
            if !query.details {
                if let Some(obj) = json.as_object_mut() {
                    obj.remove("description");
                }
            }
            json
        })
        .collect();
    Json(serde_json::json!({ "registry": registry }))
}

/// `{ "name": "DropIndex", "database": "d", "collection": "c", "shard":
/// "s1", "index": "idx1", "priority": 2 }`. `name` and `priority` pick the
/// action kind and queue priority; every other field becomes a string
/// parameter on the resulting `ActionDescription`.
async fn put_action(
    State(feature): State<Arc<Feature>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let object = body
        .as_object()
        .ok_or_else(|| ApiError(MaintenanceError::BadParameter("request body must be a JSON object".into())))?;
    let name = object
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError(MaintenanceError::BadParameter("missing required parameter `name`".into())))?;
    let priority = object.get("priority").and_then(|v| v.as_i64()).unwrap_or(maintenance_types::priority::NORMAL as i64) as i32;

    let mut description = maintenance_types::ActionDescription::new(name, priority);
    if let Some(properties) = object.get("properties") {
        description = description.with_properties(properties.clone());
    }
    for (key, value) in object {
        if key == "name" || key == "priority" || key == "properties" {
            continue;
        }
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        description = description.with(key.clone(), value);
    }

    let action = feature.add_action(description, false)?;
    Ok(Json(action.to_json()))
}

async fn delete_action(State(feature): State<Arc<Feature>>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    feature.delete_action(id)?;
    Ok(StatusCode::NO_CONTENT)
}

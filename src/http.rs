use crate::compose::{ComposeError, OutfitRequest, encode_png};
use crate::profile::{self, ProfileError, ProfileReference};
use crate::state::AppState;
use axum::Json;
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, warn};

const MISSING_SLOTS_HEADER: &str = "X-Outfit-Missing-Slots";
const ERROR_HEADER: &str = "X-Outfit-Error";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api", get(render_profile))
        .route("/outfit-image", get(render_outfit))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn render_profile(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let params = QueryParams::parse(raw_query.as_deref());
    let (Some(region), Some(uid), Some(key)) =
        (params.first("region"), params.first("uid"), params.first("key"))
    else {
        return Err(ApiError::bad_request("Missing region, uid, or key parameter"));
    };
    require_active_key(&state, key)?;

    let reference = ProfileReference {
        region: region.to_string(),
        uid: uid.to_string(),
    };
    let payload = state
        .profiles
        .fetch(&reference)
        .await
        .map_err(map_profile_error)?;
    let request = profile::extract(&payload).map_err(map_profile_error)?;
    render_png(&state, &request).await
}

async fn render_outfit(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let params = QueryParams::parse(raw_query.as_deref());
    let Some(key) = params.first("key") else {
        return Err(ApiError::bad_request("Missing key parameter"));
    };
    require_active_key(&state, key)?;

    let skill_ids = params
        .all("item_id")
        .map(|raw| parse_item_id(raw).map(Some))
        .collect::<Result<Vec<_>, _>>()?;
    let request = OutfitRequest {
        skill_ids,
        avatar_id: params.first("avatar").map(parse_item_id).transpose()?,
        weapon_skin_id: params.first("weaponSkin").map(parse_item_id).transpose()?,
        pet_skin_id: params.first("petSkin").map(parse_item_id).transpose()?,
    };
    render_png(&state, &request).await
}

fn require_active_key(state: &AppState, key: &str) -> Result<(), ApiError> {
    if state.keys.is_active(key) {
        Ok(())
    } else {
        debug!("rejected inactive api key");
        Err(ApiError::forbidden("Invalid or inactive API key"))
    }
}

fn parse_item_id(raw: &str) -> Result<u64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(&format!("Invalid item id: {raw}")))
}

async fn render_png(state: &AppState, request: &OutfitRequest) -> Result<Response, ApiError> {
    let composite = state
        .compositor
        .compose(request)
        .await
        .map_err(map_compose_error)?;
    let missing_slots = composite.missing_slots;
    let canvas = composite.canvas;
    let bytes = task::spawn_blocking(move || encode_png(&canvas))
        .await
        .map_err(generation_failed)?
        .map_err(generation_failed)?;
    Ok(png_response(bytes, missing_slots))
}

fn png_response(bytes: Vec<u8>, missing_slots: usize) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if missing_slots > 0 {
        headers.insert(MISSING_SLOTS_HEADER, HeaderValue::from(missing_slots));
    }
    (StatusCode::OK, headers, bytes).into_response()
}

/// First-value-wins view over the raw query string. Empty values count as
/// absent.
struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
        Self { pairs }
    }

    fn first(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
    pub log_detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }),
            log_detail: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn with_log_detail(mut self, detail: String) -> Self {
        if !detail.is_empty() {
            self.log_detail = Some(detail);
        }
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_message = extract_error_message(&self.body);
        if self.status.is_server_error() {
            warn!(
                status = %self.status,
                error = error_message.as_deref().unwrap_or_default(),
                detail = self.log_detail.as_deref().unwrap_or_default(),
                "request failed"
            );
        }
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(message) = error_message {
            if let Ok(value) = HeaderValue::from_str(&sanitize_error_header(&message)) {
                response.headers_mut().insert(ERROR_HEADER, value);
            }
        }
        response
    }
}

fn extract_error_message(body: &Value) -> Option<String> {
    let Value::Object(map) = body else {
        return None;
    };
    map.get("error")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

fn sanitize_error_header(value: &str) -> String {
    let mut sanitized: String = value
        .chars()
        .filter(|ch| ch.is_ascii() && !ch.is_control())
        .collect();
    sanitized.truncate(200);
    sanitized
}

fn map_profile_error(error: ProfileError) -> ApiError {
    let detail = error.to_string();
    match error {
        ProfileError::MissingField(_) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing equipped skills or avatar data",
        )
        .with_log_detail(detail),
        ProfileError::MissingSection(_) | ProfileError::InvalidUrl | ProfileError::Upstream(_) => {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch valid profile data",
            )
            .with_log_detail(detail)
        }
    }
}

fn map_compose_error(error: ComposeError) -> ApiError {
    generation_failed(error)
}

fn generation_failed(detail: impl Display) -> ApiError {
    let message = format!("Image generation failed: {detail}");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, &message)
}

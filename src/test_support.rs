//! Local stand-in for the background host, icon API and profile API.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

pub const BACKGROUND_WIDTH: u32 = 800;
pub const BACKGROUND_HEIGHT: u32 = 700;
pub const BACKGROUND_COLOR: Rgba<u8> = Rgba([20, 24, 40, 255]);

pub const MISSING_ITEM: u64 = 404;
pub const CORRUPT_ITEM: u64 = 500;
pub const TRANSPARENT_ITEM: u64 = 777;
/// Answers only after `SLOW_RESPONSE`, well past any test fetch timeout.
pub const SLOW_ITEM: u64 = 999;
pub const SLOW_RESPONSE: Duration = Duration::from_secs(3);

pub const KNOWN_UID: &str = "12345";
pub const FULL_UID: &str = "67890";
pub const NO_AVATAR_UID: &str = "11111";
pub const MALFORMED_UID: &str = "22222";

const ICON_SIDE: u32 = 32;
const ICON_LATENCY: Duration = Duration::from_millis(20);

#[derive(Default)]
pub struct Hits {
    background: AtomicUsize,
    icons: AtomicUsize,
    profiles: AtomicUsize,
    icons_in_flight: AtomicUsize,
    max_icons_in_flight: AtomicUsize,
}

impl Hits {
    pub fn background(&self) -> usize {
        self.background.load(Ordering::SeqCst)
    }

    pub fn icons(&self) -> usize {
        self.icons.load(Ordering::SeqCst)
    }

    pub fn profiles(&self) -> usize {
        self.profiles.load(Ordering::SeqCst)
    }

    pub fn max_icons_in_flight(&self) -> usize {
        self.max_icons_in_flight.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.background() + self.icons() + self.profiles()
    }
}

pub struct Upstream {
    pub base_url: String,
    pub hits: Arc<Hits>,
}

pub async fn spawn_upstream() -> Upstream {
    let hits = Arc::new(Hits::default());
    let app = Router::new()
        .route("/background.png", get(background))
        .route("/icon", get(icon))
        .route("/player-info", get(player_info))
        .with_state(hits.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Upstream {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// Deterministic opaque color per item id so tests can spot each icon.
pub fn color_for(item_id: u64) -> Rgba<u8> {
    Rgba([
        (item_id.wrapping_mul(37) % 200 + 40) as u8,
        (item_id.wrapping_mul(91) % 200 + 40) as u8,
        (item_id.wrapping_mul(53) % 200 + 40) as u8,
        255,
    ])
}

pub fn encode_png_bytes(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn solid_rgb_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 90)
        .encode_image(&image)
        .unwrap();
    bytes
}

fn png_response(image: &RgbaImage) -> Response {
    (
        [(header::CONTENT_TYPE, "image/png")],
        encode_png_bytes(image),
    )
        .into_response()
}

async fn background(State(hits): State<Arc<Hits>>) -> Response {
    hits.background.fetch_add(1, Ordering::SeqCst);
    png_response(&RgbaImage::from_pixel(
        BACKGROUND_WIDTH,
        BACKGROUND_HEIGHT,
        BACKGROUND_COLOR,
    ))
}

#[derive(Deserialize)]
struct IconQuery {
    item_id: u64,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn icon(State(hits): State<Arc<Hits>>, Query(query): Query<IconQuery>) -> Response {
    hits.icons.fetch_add(1, Ordering::SeqCst);
    let now = hits.icons_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    let _in_flight = InFlight(&hits.icons_in_flight);
    hits.max_icons_in_flight.fetch_max(now, Ordering::SeqCst);
    let latency = if query.item_id == SLOW_ITEM {
        SLOW_RESPONSE
    } else {
        ICON_LATENCY
    };
    tokio::time::sleep(latency).await;
    match query.item_id {
        MISSING_ITEM => StatusCode::NOT_FOUND.into_response(),
        CORRUPT_ITEM => (
            [(header::CONTENT_TYPE, "image/png")],
            b"\x89PNG but not really".to_vec(),
        )
            .into_response(),
        TRANSPARENT_ITEM => png_response(&RgbaImage::from_pixel(130, 130, Rgba([0, 0, 0, 0]))),
        item_id => png_response(&RgbaImage::from_pixel(
            ICON_SIDE,
            ICON_SIDE,
            color_for(item_id),
        )),
    }
}

#[derive(Deserialize)]
struct ProfileQuery {
    uid: String,
    #[allow(dead_code)]
    region: String,
}

async fn player_info(State(hits): State<Arc<Hits>>, Query(query): Query<ProfileQuery>) -> Response {
    hits.profiles.fetch_add(1, Ordering::SeqCst);
    let payload = match query.uid.as_str() {
        KNOWN_UID => json!({
            "profileInfo": {"equipedSkills": [1, 2, 3], "avatarId": 99}
        }),
        FULL_UID => json!({
            "basicInfo": {"nickname": "fixture", "weaponSkinShows": [31]},
            "profileInfo": {
                "equipedSkills": [1, 2, 3, 4, 5, 6, 7],
                "avatarId": 99,
                "weaponSkinShows": [30]
            },
            "petInfo": {"id": 1300000041u64, "skinId": 41}
        }),
        NO_AVATAR_UID => json!({
            "profileInfo": {"equipedSkills": [1, 2]}
        }),
        MALFORMED_UID => {
            return (
                [(header::CONTENT_TYPE, "application/json")],
                "{\"profileInfo\": ",
            )
                .into_response();
        }
        _ => return (StatusCode::NOT_FOUND, "player not found").into_response(),
    };
    axum::Json(payload).into_response()
}

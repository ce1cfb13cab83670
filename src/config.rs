use crate::layout::LayoutTable;
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_BACKGROUND_URL: &str = "https://iili.io/39iE4rF.jpg";
const DEFAULT_PROFILE_API_URL: &str = "https://razor-info.vercel.app/player-info";
const DEFAULT_ICON_API_URL: &str = "https://pika-ffitmes-api.vercel.app/";
const DEFAULT_SYSTEM_FONT_PATHS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub background_url: String,
    pub profile_api_url: String,
    pub icon_api_url: String,
    pub icon_watermark: String,
    pub icon_api_key: String,
    pub api_keys: HashMap<String, bool>,
    pub fetch_timeout: Duration,
    pub max_image_bytes: usize,
    pub max_decoded_pixels: u64,
    pub slot_fetch_concurrency: usize,
    pub max_in_flight_requests: usize,
    pub label_text: String,
    pub label_font_path: Option<PathBuf>,
    pub system_font_paths: Vec<PathBuf>,
    pub label_font_size: f32,
    pub layout: LayoutTable,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 5000);

        let background_url =
            env::var("BACKGROUND_URL").unwrap_or_else(|_| DEFAULT_BACKGROUND_URL.to_string());
        let profile_api_url =
            env::var("PROFILE_API_URL").unwrap_or_else(|_| DEFAULT_PROFILE_API_URL.to_string());
        let icon_api_url =
            env::var("ICON_API_URL").unwrap_or_else(|_| DEFAULT_ICON_API_URL.to_string());
        for (key, value) in [
            ("BACKGROUND_URL", &background_url),
            ("PROFILE_API_URL", &profile_api_url),
            ("ICON_API_URL", &icon_api_url),
        ] {
            url::Url::parse(value).with_context(|| format!("{key} must be an absolute url"))?;
        }
        let icon_watermark = env::var("ICON_WATERMARK").unwrap_or_else(|_| "TaitanApi".to_string());
        let icon_api_key = env::var("ICON_API_KEY").unwrap_or_else(|_| "PikaApis".to_string());

        let api_keys = match env::var("API_KEYS") {
            Ok(raw) => serde_json::from_str::<HashMap<String, bool>>(&raw)
                .context("API_KEYS must be a JSON object of key to active flag")?,
            Err(_) => default_api_keys(),
        };
        if !api_keys.values().any(|active| *active) {
            warn!("API_KEYS has no active key; every render request will be rejected");
        }

        let fetch_timeout = Duration::from_secs(parse_u64("FETCH_TIMEOUT_SECONDS", 5).max(1));
        let max_image_bytes = parse_usize("MAX_IMAGE_BYTES", 10 * 1024 * 1024);
        let max_decoded_pixels = parse_u64("MAX_DECODED_PIXELS", 16_000_000);
        let slot_fetch_concurrency = parse_usize("SLOT_FETCH_CONCURRENCY", 4).max(1);
        let max_in_flight_requests = parse_usize("MAX_IN_FLIGHT_REQUESTS", 256);

        let label_text = env::var("LABEL_TEXT").unwrap_or_else(|_| "BNGX".to_string());
        let label_font_path = match env::var("LABEL_FONT_PATH") {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("off") {
                    None
                } else {
                    Some(PathBuf::from(trimmed))
                }
            }
            Err(_) => None,
        };
        let system_font_paths = parse_list_env("SYSTEM_FONT_PATHS")
            .unwrap_or_else(|| {
                DEFAULT_SYSTEM_FONT_PATHS
                    .iter()
                    .map(|path| path.to_string())
                    .collect()
            })
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let label_font_size = parse_f32("LABEL_FONT_SIZE", 24.0);
        if !(label_font_size.is_finite() && label_font_size > 0.0) {
            return Err(anyhow!("LABEL_FONT_SIZE must be a positive number"));
        }

        let layout = match parse_json_env_strict::<LayoutTable>("LAYOUT_JSON")? {
            Some(layout) => layout,
            None => LayoutTable::default(),
        };
        layout.validate().context("invalid LAYOUT_JSON")?;

        Ok(Self {
            host,
            port,
            background_url,
            profile_api_url,
            icon_api_url,
            icon_watermark,
            icon_api_key,
            api_keys,
            fetch_timeout,
            max_image_bytes,
            max_decoded_pixels,
            slot_fetch_concurrency,
            max_in_flight_requests,
            label_text,
            label_font_path,
            system_font_paths,
            label_font_size,
            layout,
        })
    }
}

fn default_api_keys() -> HashMap<String, bool> {
    HashMap::from([
        ("BNGX".to_string(), true),
        ("20DAY".to_string(), true),
        ("busy".to_string(), false),
    ])
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_f32(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_json_env_strict<T: DeserializeOwned>(key: &str) -> Result<Option<T>> {
    let raw = match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };
    let parsed = serde_json::from_str(&raw).with_context(|| format!("{key} is not valid JSON"))?;
    Ok(Some(parsed))
}

fn parse_list_env(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    if raw.trim_start().starts_with('[') {
        serde_json::from_str(&raw).ok()
    } else {
        let list = raw
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>();
        if list.is_empty() { None } else { Some(list) }
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        background_url: format!("{base_url}/background.png"),
        profile_api_url: format!("{base_url}/player-info"),
        icon_api_url: format!("{base_url}/icon"),
        icon_watermark: "TaitanApi".to_string(),
        icon_api_key: "PikaApis".to_string(),
        api_keys: default_api_keys(),
        fetch_timeout: Duration::from_secs(5),
        max_image_bytes: 4 * 1024 * 1024,
        max_decoded_pixels: 4_000_000,
        slot_fetch_concurrency: 4,
        max_in_flight_requests: 16,
        label_text: "BNGX".to_string(),
        label_font_path: None,
        system_font_paths: Vec::new(),
        label_font_size: 24.0,
        layout: LayoutTable::default(),
    }
}

use crate::compose::{Compositor, IconSource};
use crate::config::Config;
use crate::fetch::ImageFetcher;
use crate::keys::ApiKeyTable;
use crate::label::{LabelFont, LabelStyle};
use crate::profile::ProfileClient;
use anyhow::Result;
use image::Rgba;
use std::sync::Arc;

const LABEL_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub keys: ApiKeyTable,
    pub profiles: ProfileClient,
    pub compositor: Compositor,
}

impl AppState {
    pub fn new(config: Config, font: LabelFont) -> Result<Self> {
        let fetcher = ImageFetcher::new(
            config.fetch_timeout,
            config.max_image_bytes,
            config.max_decoded_pixels,
        )?;
        let icons = IconSource::new(
            &config.icon_api_url,
            config.icon_watermark.clone(),
            config.icon_api_key.clone(),
        )?;
        let label = LabelStyle {
            text: config.label_text.clone(),
            size_px: config.label_font_size,
            color: LABEL_COLOR,
        };
        let compositor = Compositor::new(
            fetcher.clone(),
            icons,
            config.layout.clone(),
            Arc::new(font),
            label,
            config.background_url.clone(),
            config.slot_fetch_concurrency,
        );
        let profiles = ProfileClient::new(fetcher, config.profile_api_url.clone());
        Ok(Self {
            keys: ApiKeyTable::new(config.api_keys.clone()),
            profiles,
            compositor,
            config: Arc::new(config),
        })
    }
}

use crate::fetch::{FetchError, ImageFetcher};
use crate::label::{LabelFont, LabelStyle};
use crate::layout::{LayoutTable, SKILL_SLOT_COUNT, SlotPosition, SlotSize};
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, warn};
use url::Url;

const LABEL_GAP_PX: i64 = 5;

/// Item ids to composite. Skill entries are positional; `None` leaves that
/// slot empty without shifting the ones after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutfitRequest {
    pub skill_ids: Vec<Option<u64>>,
    pub avatar_id: Option<u64>,
    pub weapon_skin_id: Option<u64>,
    pub pet_skin_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Skill(usize),
    Avatar,
    WeaponSkin,
    PetSkin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySpec {
    pub kind: OverlayKind,
    pub item_id: u64,
    pub position: SlotPosition,
    pub size: SlotSize,
}

#[derive(Debug)]
pub struct Composite {
    pub canvas: RgbaImage,
    pub rendered_slots: usize,
    pub missing_slots: usize,
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("background image unavailable: {0}")]
    Background(#[source] FetchError),
    #[error("render worker failed")]
    Worker(#[from] JoinError),
}

/// Builds icon URLs for the item image API.
#[derive(Debug, Clone)]
pub struct IconSource {
    endpoint: Url,
    watermark: String,
    key: String,
}

impl IconSource {
    pub fn new(endpoint: &str, watermark: String, key: String) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        Ok(Self {
            endpoint,
            watermark,
            key,
        })
    }

    pub fn url_for(&self, item_id: u64) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("item_id", &item_id.to_string())
            .append_pair("watermark", &self.watermark)
            .append_pair("key", &self.key);
        url.into()
    }
}

#[derive(Clone)]
pub struct Compositor {
    fetcher: ImageFetcher,
    icons: Arc<IconSource>,
    layout: Arc<LayoutTable>,
    font: Arc<LabelFont>,
    label: LabelStyle,
    background_url: String,
    slot_concurrency: usize,
}

impl Compositor {
    pub fn new(
        fetcher: ImageFetcher,
        icons: IconSource,
        layout: LayoutTable,
        font: Arc<LabelFont>,
        label: LabelStyle,
        background_url: String,
        slot_concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            icons: Arc::new(icons),
            layout: Arc::new(layout),
            font,
            label,
            background_url,
            slot_concurrency: slot_concurrency.max(1),
        }
    }

    pub async fn compose(&self, request: &OutfitRequest) -> Result<Composite, ComposeError> {
        let canvas = self
            .fetcher
            .fetch_image(&self.background_url)
            .await
            .map_err(ComposeError::Background)?;
        let specs = plan_overlays(request, &self.layout, canvas.width(), canvas.height());
        debug!(
            canvas_width = canvas.width(),
            canvas_height = canvas.height(),
            slots = specs.len(),
            "overlay plan ready"
        );

        let mut results: Vec<Option<Result<RgbaImage, FetchError>>> =
            Vec::with_capacity(specs.len());
        results.resize_with(specs.len(), || None);
        let mut join_set = JoinSet::new();
        for (idx, spec) in specs.iter().enumerate() {
            // At most `slot_concurrency` slot fetches in flight.
            if join_set.len() >= self.slot_concurrency {
                if let Some(joined) = join_set.join_next().await {
                    let (done, result) = joined?;
                    results[done] = Some(result);
                }
            }
            let fetcher = self.fetcher.clone();
            let url = self.icons.url_for(spec.item_id);
            let size = spec.size;
            join_set.spawn(async move { (idx, load_overlay(&fetcher, &url, size).await) });
        }
        while let Some(joined) = join_set.join_next().await {
            let (idx, result) = joined?;
            results[idx] = Some(result);
        }

        let font = self.font.clone();
        let label = self.label.clone();
        let composite = task::spawn_blocking(move || {
            paste_overlays(canvas, &specs, results, &font, &label)
        })
        .await?;
        debug!(
            rendered_slots = composite.rendered_slots,
            missing_slots = composite.missing_slots,
            "composite finished"
        );
        Ok(composite)
    }
}

/// Resolves slot assignments in paste order: skills, avatar, weapon skin,
/// pet skin. Skills past the sixth are dropped.
pub fn plan_overlays(
    request: &OutfitRequest,
    layout: &LayoutTable,
    canvas_width: u32,
    canvas_height: u32,
) -> Vec<OverlaySpec> {
    let size = layout.slot_size;
    let mut specs = Vec::with_capacity(SKILL_SLOT_COUNT + 3);
    for (index, (item_id, position)) in request
        .skill_ids
        .iter()
        .zip(layout.skill_slots.iter())
        .take(SKILL_SLOT_COUNT)
        .enumerate()
    {
        if let Some(item_id) = item_id {
            specs.push(OverlaySpec {
                kind: OverlayKind::Skill(index),
                item_id: *item_id,
                position: *position,
                size,
            });
        }
    }
    if request.skill_ids.len() > SKILL_SLOT_COUNT {
        debug!(
            dropped = request.skill_ids.len() - SKILL_SLOT_COUNT,
            "skills beyond fixed slots ignored"
        );
    }
    if let Some(item_id) = request.avatar_id {
        specs.push(OverlaySpec {
            kind: OverlayKind::Avatar,
            item_id,
            position: layout.avatar_position(canvas_width, canvas_height),
            size,
        });
    }
    if let Some(item_id) = request.weapon_skin_id {
        specs.push(OverlaySpec {
            kind: OverlayKind::WeaponSkin,
            item_id,
            position: layout.weapon_skin_slot,
            size,
        });
    }
    if let Some(item_id) = request.pet_skin_id {
        match layout.pet_skin_slot {
            Some(position) => specs.push(OverlaySpec {
                kind: OverlayKind::PetSkin,
                item_id,
                position,
                size,
            }),
            None => debug!(item_id, "layout has no pet slot, pet skin skipped"),
        }
    }
    specs
}

async fn load_overlay(
    fetcher: &ImageFetcher,
    url: &str,
    size: SlotSize,
) -> Result<RgbaImage, FetchError> {
    let image = fetcher.fetch_image(url).await?;
    if image.dimensions() == (size.width, size.height) {
        return Ok(image);
    }
    let resized = task::spawn_blocking(move || {
        imageops::resize(&image, size.width, size.height, FilterType::Lanczos3)
    })
    .await?;
    Ok(resized)
}

fn paste_overlays(
    mut canvas: RgbaImage,
    specs: &[OverlaySpec],
    results: Vec<Option<Result<RgbaImage, FetchError>>>,
    font: &LabelFont,
    label: &LabelStyle,
) -> Composite {
    let mut rendered_slots = 0usize;
    let mut missing_slots = 0usize;
    for (spec, result) in specs.iter().zip(results) {
        match result {
            Some(Ok(overlay)) => {
                imageops::overlay(&mut canvas, &overlay, spec.position.x, spec.position.y);
                rendered_slots += 1;
                if spec.kind == OverlayKind::Avatar {
                    stamp_label(&mut canvas, font, label, spec);
                }
            }
            Some(Err(err)) => {
                warn!(
                    error = %err,
                    kind = ?spec.kind,
                    item_id = spec.item_id,
                    "overlay load failed, slot left empty"
                );
                missing_slots += 1;
            }
            None => {
                warn!(kind = ?spec.kind, item_id = spec.item_id, "overlay result missing");
                missing_slots += 1;
            }
        }
    }
    Composite {
        canvas,
        rendered_slots,
        missing_slots,
    }
}

fn stamp_label(canvas: &mut RgbaImage, font: &LabelFont, label: &LabelStyle, avatar: &OverlaySpec) {
    if label.text.is_empty() {
        return;
    }
    let (text_width, _) = font.measure(&label.text, label.size_px);
    let x = avatar.position.x + (avatar.size.width as i64 - text_width as i64).div_euclid(2);
    let y = avatar.position.y + avatar.size.height as i64 + LABEL_GAP_PX;
    font.draw(canvas, x as i32, y as i32, label);
}

pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    canvas.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

//! Text stamping for the avatar label.
//!
//! Resolution order is the `LABEL_FONT_PATH` override, then the font bundled
//! into the binary, then each system font path, then a built-in 5x7 bitmap
//! face. The last step cannot fail.

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

const BITMAP_GLYPH_WIDTH: u32 = 5;
const BITMAP_GLYPH_HEIGHT: u32 = 7;
const BITMAP_NOMINAL_PX: f32 = 8.0;

pub struct LabelFont {
    face: FontFace,
    source: FontSource,
}

enum FontFace {
    Outline(FontVec),
    Bitmap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    Custom(PathBuf),
    Bundled,
    System(PathBuf),
    Builtin,
}

#[derive(Debug, Clone)]
pub struct LabelStyle {
    pub text: String,
    pub size_px: f32,
    pub color: Rgba<u8>,
}

impl fmt::Display for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSource::Custom(path) => write!(f, "custom:{}", path.display()),
            FontSource::Bundled => write!(f, "bundled:DejaVuSans-Bold"),
            FontSource::System(path) => write!(f, "system:{}", path.display()),
            FontSource::Builtin => write!(f, "builtin-bitmap"),
        }
    }
}

impl LabelFont {
    pub fn resolve(custom: Option<&Path>, system: &[PathBuf]) -> Self {
        Self::resolve_with(custom, Some(BUNDLED_FONT), system)
    }

    fn resolve_with(custom: Option<&Path>, bundled: Option<&[u8]>, system: &[PathBuf]) -> Self {
        if let Some(path) = custom {
            if let Some(font) = Self::from_file(path, FontSource::Custom(path.to_path_buf())) {
                return font;
            }
            warn!(path = %path.display(), "LABEL_FONT_PATH unusable, falling back");
        }
        if let Some(bytes) = bundled {
            match FontVec::try_from_vec(bytes.to_vec()) {
                Ok(font) => return Self::outline(font, FontSource::Bundled),
                Err(err) => warn!(error = %err, "bundled label font failed to parse"),
            }
        }
        for path in system {
            if let Some(font) = Self::from_file(path, FontSource::System(path.clone())) {
                return font;
            }
        }
        info!("no label font file loaded, using builtin bitmap face");
        Self::builtin()
    }

    fn from_file(path: &Path, source: FontSource) -> Option<Self> {
        match load_outline(path) {
            Ok(font) => Some(Self::outline(font, source)),
            Err(reason) => {
                debug!(path = %path.display(), reason = %reason, "label font unavailable");
                None
            }
        }
    }

    fn outline(font: FontVec, source: FontSource) -> Self {
        info!(source = %source, "label font loaded");
        Self {
            face: FontFace::Outline(font),
            source,
        }
    }

    pub fn builtin() -> Self {
        Self {
            face: FontFace::Bitmap,
            source: FontSource::Builtin,
        }
    }

    pub fn source(&self) -> &FontSource {
        &self.source
    }

    pub fn measure(&self, text: &str, size_px: f32) -> (u32, u32) {
        match &self.face {
            FontFace::Outline(font) => text_size(PxScale::from(size_px), font, text),
            FontFace::Bitmap => {
                let scale = bitmap_scale(size_px);
                let count = text.chars().count() as u32;
                if count == 0 {
                    return (0, 0);
                }
                let width = count * (BITMAP_GLYPH_WIDTH + 1) * scale - scale;
                (width, BITMAP_GLYPH_HEIGHT * scale)
            }
        }
    }

    pub fn draw(&self, canvas: &mut RgbaImage, x: i32, y: i32, style: &LabelStyle) {
        match &self.face {
            FontFace::Outline(font) => draw_text_mut(
                canvas,
                style.color,
                x,
                y,
                PxScale::from(style.size_px),
                font,
                &style.text,
            ),
            FontFace::Bitmap => draw_bitmap_text(canvas, x, y, style),
        }
    }
}

fn load_outline(path: &Path) -> Result<FontVec, String> {
    let data = std::fs::read(path).map_err(|err| err.to_string())?;
    FontVec::try_from_vec(data).map_err(|err| err.to_string())
}

fn bitmap_scale(size_px: f32) -> u32 {
    (size_px / BITMAP_NOMINAL_PX).round().max(1.0) as u32
}

fn draw_bitmap_text(canvas: &mut RgbaImage, x: i32, y: i32, style: &LabelStyle) {
    let scale = bitmap_scale(style.size_px) as i32;
    let advance = (BITMAP_GLYPH_WIDTH as i32 + 1) * scale;
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    let mut pen_x = x;
    for ch in style.text.chars() {
        let rows = glyph_rows(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..BITMAP_GLYPH_WIDTH as i32 {
                if bits & (0b10000 >> col) == 0 {
                    continue;
                }
                let cell_x = pen_x + col * scale;
                let cell_y = y + row as i32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = cell_x + dx;
                        let py = cell_y + dy;
                        if px >= 0 && py >= 0 && px < width && py < height {
                            canvas.put_pixel(px as u32, py as u32, style.color);
                        }
                    }
                }
            }
        }
        pen_x += advance;
    }
}

fn glyph_rows(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        // unknown glyphs render as '?'
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn white_style(text: &str) -> LabelStyle {
        LabelStyle {
            text: text.to_string(),
            size_px: 24.0,
            color: Rgba([255, 255, 255, 255]),
        }
    }

    fn font_file(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn resolve_defaults_to_bundled_font() {
        let font = LabelFont::resolve(None, &[PathBuf::from("/also/missing.ttf")]);
        assert_eq!(font.source(), &FontSource::Bundled);
        let (width, height) = font.measure("BNGX", 24.0);
        assert!(width > 0 && height > 0);
    }

    #[test]
    fn resolve_prefers_override_file() {
        let custom = font_file(BUNDLED_FONT);
        let font = LabelFont::resolve(Some(custom.path()), &[]);
        assert_eq!(font.source(), &FontSource::Custom(custom.path().to_path_buf()));
    }

    #[test]
    fn unusable_override_falls_back_to_bundled() {
        let garbage = font_file(b"not a font");
        let font = LabelFont::resolve(Some(garbage.path()), &[]);
        assert_eq!(font.source(), &FontSource::Bundled);
    }

    #[test]
    fn system_font_used_when_bundled_font_unusable() {
        let system = font_file(BUNDLED_FONT);
        let font = LabelFont::resolve_with(
            None,
            Some(&b"broken bundle"[..]),
            &[PathBuf::from("/also/missing.ttf"), system.path().to_path_buf()],
        );
        assert_eq!(font.source(), &FontSource::System(system.path().to_path_buf()));
    }

    #[test]
    fn resolve_falls_back_to_builtin_when_nothing_loads() {
        let garbage = font_file(b"not a font");
        let font = LabelFont::resolve_with(
            Some(Path::new("/nonexistent/label.ttf")),
            None,
            &[garbage.path().to_path_buf(), PathBuf::from("/also/missing.ttf")],
        );
        assert_eq!(font.source(), &FontSource::Builtin);
    }

    #[test]
    fn bitmap_measure_scales_with_size() {
        let font = LabelFont::builtin();
        assert_eq!(font.measure("BNGX", 24.0), (69, 21));
        assert_eq!(font.measure("BNGX", 8.0), (23, 7));
        assert_eq!(font.measure("", 24.0), (0, 0));
    }

    #[test]
    fn bitmap_draw_stays_within_measured_box() {
        let font = LabelFont::builtin();
        let style = white_style("BNGX");
        let (width, height) = font.measure(&style.text, style.size_px);
        let mut canvas = RgbaImage::from_pixel(120, 40, Rgba([0, 0, 0, 0]));
        font.draw(&mut canvas, 10, 5, &style);
        let mut painted = 0;
        for (x, y, pixel) in canvas.enumerate_pixels() {
            if pixel.0[3] == 0 {
                continue;
            }
            painted += 1;
            assert!(x >= 10 && x < 10 + width, "x {x} outside label");
            assert!(y >= 5 && y < 5 + height, "y {y} outside label");
        }
        assert!(painted > 0);
    }

    #[test]
    fn bitmap_draw_clips_at_canvas_edge() {
        let font = LabelFont::builtin();
        let mut canvas = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 0]));
        font.draw(&mut canvas, -4, 6, &white_style("W?"));
        assert_eq!(canvas.dimensions(), (10, 10));
    }
}

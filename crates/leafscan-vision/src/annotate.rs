//! Drawing detection overlays onto frames.

use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use leafscan_models::Detection;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusttype::{Font, Scale};

use crate::detector::RawDetection;
use crate::error::{VisionError, VisionResult};
use crate::glyphs;

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PADDING: i32 = 2;

/// Display color for a class id.
///
/// Seeded by the class id so a class always renders in the same color. Very
/// dark colors are lifted so boxes stay visible on black frames.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    let mut rng = StdRng::seed_from_u64(class_id as u64);
    let mut channels = [
        rng.random_range(0..255u8),
        rng.random_range(0..255u8),
        rng.random_range(0..255u8),
    ];
    if channels.iter().all(|c| *c < 64) {
        let brightest = (0..3).max_by_key(|i| channels[*i]).unwrap_or(0);
        channels[brightest] |= 0x80;
    }
    Rgb(channels)
}

/// Label text shown above a box.
pub fn label_text(detection: &Detection) -> String {
    format!("{}: {:.2}", detection.label, detection.confidence)
}

/// TrueType font used for box labels.
pub struct LabelFont {
    font: Font<'static>,
    scale: Scale,
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>, px: f32) -> VisionResult<Self> {
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| VisionError::internal("Invalid label font data"))?;
        Ok(Self {
            font,
            scale: Scale::uniform(px),
        })
    }

    pub fn load(path: impl AsRef<Path>, px: f32) -> VisionResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VisionError::FileNotFound(path.to_path_buf()));
        }
        Self::from_bytes(std::fs::read(path)?, px)
    }
}

/// Draws labelled boxes, using the built-in bitmap font unless a TrueType font is given.
pub struct Annotator {
    font: Option<LabelFont>,
    thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            thickness: 2,
        }
    }
}

impl Annotator {
    pub fn new(font: Option<LabelFont>) -> Self {
        Self {
            font,
            ..Default::default()
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every detection. `raw` supplies class ids for colors and must be
    /// index-aligned with `detections`.
    pub fn annotate(&self, image: &mut RgbImage, raw: &[RawDetection], detections: &[Detection]) {
        for (r, det) in raw.iter().zip(detections) {
            self.draw(image, r.class_id, det);
        }
    }

    /// Draw one box with its label tab.
    pub fn draw(&self, image: &mut RgbImage, class_id: usize, detection: &Detection) {
        let (width, height) = image.dimensions();
        let Some(bbox) = detection.bbox.clamp_to(width, height) else {
            return;
        };
        let color = class_color(class_id);

        for inset in 0..self.thickness as i32 {
            let w = bbox.width() as i32 + 1 - 2 * inset;
            let h = bbox.height() as i32 + 1 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        let text = label_text(detection);
        let (text_w, text_h) = match &self.font {
            Some(f) => text_size(f.scale, &f.font, &text),
            None => glyphs::text_size(&text),
        };

        let tab_w = (text_w + 2 * LABEL_PADDING).clamp(1, width as i32);
        let tab_h = (text_h + 2 * LABEL_PADDING).clamp(1, height as i32);
        // Above the box when there is room, otherwise inside its top edge.
        let tab_y = if bbox.y1 >= tab_h { bbox.y1 - tab_h } else { bbox.y1 };
        let tab_x = bbox.x1.min(width as i32 - tab_w).max(0);
        let tab_y = tab_y.min(height as i32 - tab_h).max(0);

        draw_filled_rect_mut(
            image,
            Rect::at(tab_x, tab_y).of_size(tab_w as u32, tab_h as u32),
            color,
        );

        let (text_x, text_y) = (tab_x + LABEL_PADDING, tab_y + LABEL_PADDING);
        match &self.font {
            Some(f) => draw_text_mut(image, TEXT_COLOR, text_x, text_y, f.scale, &f.font, &text),
            None => glyphs::draw_text(image, TEXT_COLOR, text_x, text_y, &text),
        }
    }
}

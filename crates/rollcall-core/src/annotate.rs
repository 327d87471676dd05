//! Frame annotation for the live preview.

use crate::types::MatchResult;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: i32 = 2;
const LABEL_BAR_HEIGHT: i32 = 35;
const LABEL_SCALE: f32 = 20.0;

/// Draws boxes and labels for match results onto a full-resolution frame.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator that draws boxes and label bars but no text.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontVec) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TrueType/OpenType font for label text. Falls back to boxes only.
    pub fn from_font_file(path: &Path) -> Self {
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self::with_font(font),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "label font unavailable; drawing boxes only");
                Self::new()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every result onto `frame`. Purely cosmetic.
    pub fn annotate(&self, frame: &mut RgbImage, results: &[MatchResult]) {
        for result in results {
            self.annotate_one(frame, result);
        }
    }

    fn annotate_one(&self, frame: &mut RgbImage, result: &MatchResult) {
        let r = result.region.clamp_to(frame.width(), frame.height());
        let (w, h) = (r.width(), r.height());
        if w == 0 || h == 0 {
            return;
        }
        let color = if result.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };

        for inset in 0..BOX_THICKNESS.min(w / 2).min(h / 2) {
            let rect = Rect::at(r.left + inset, r.top + inset)
                .of_size((w - 2 * inset) as u32, (h - 2 * inset) as u32);
            draw_hollow_rect_mut(frame, rect, color);
        }

        let bar_h = LABEL_BAR_HEIGHT.min(h);
        let bar = Rect::at(r.left, r.bottom - bar_h).of_size(w as u32, bar_h as u32);
        draw_filled_rect_mut(frame, bar, color);

        if let Some(font) = &self.font {
            let y = r.bottom - bar_h + (bar_h - LABEL_SCALE as i32).max(0) / 2;
            draw_text_mut(
                frame,
                TEXT_COLOR,
                r.left + 6,
                y,
                PxScale::from(LABEL_SCALE),
                font,
                &result.label(),
            );
        }
    }
}

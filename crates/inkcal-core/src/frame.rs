//! Panel frame compositing.
//!
//! Two bit planes the size of the 7.5" panel: the mono plane (1 = white,
//! 0 = black) and the chromatic plane (0 = inked in the accent colour).
//! Decoded image rows land here first; the battery overlay and the error
//! banner are composited on top before the frame is pushed to the panel or
//! persisted to storage.

use core::fmt::Write;

use crate::battery::BatteryTier;
use crate::glyphs::{self, GLYPH_WIDTH};

pub const WIDTH: usize = 800;
pub const HEIGHT: usize = 480;
pub const ROW_BYTES: usize = WIDTH / 8;
pub const PLANE_BYTES: usize = ROW_BYTES * HEIGHT;

/// What a pixel should show.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ink {
    White,
    Black,
    Chromatic,
}

// Battery icon geometry, drawn procedurally at the top-right corner.
const ICON_W: usize = 32;
const ICON_H: usize = 16;
const ICON_X: usize = 708;
const ICON_Y: usize = 8;
const ICON_FILL_W: usize = 24;

pub struct PanelFrame {
    mono: [u8; PLANE_BYTES],
    chroma: [u8; PLANE_BYTES],
}

impl PanelFrame {
    /// An all-white frame.
    pub const fn new() -> Self {
        Self {
            mono: [0xFF; PLANE_BYTES],
            chroma: [0xFF; PLANE_BYTES],
        }
    }

    pub fn clear(&mut self) {
        self.mono.fill(0xFF);
        self.chroma.fill(0xFF);
    }

    /// Copies one decoded row into the frame. Rows narrower than the panel
    /// leave the remainder untouched; `y` out of range is ignored.
    pub fn write_row(&mut self, y: usize, mono: &[u8], chroma: &[u8]) {
        if y >= HEIGHT {
            return;
        }
        let base = y * ROW_BYTES;
        let n = mono.len().min(ROW_BYTES);
        self.mono[base..base + n].copy_from_slice(&mono[..n]);
        let n = chroma.len().min(ROW_BYTES);
        self.chroma[base..base + n].copy_from_slice(&chroma[..n]);
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, ink: Ink) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let idx = y * ROW_BYTES + x / 8;
        let bit = 0x80u8 >> (x % 8);
        match ink {
            Ink::White => {
                self.mono[idx] |= bit;
                self.chroma[idx] |= bit;
            }
            Ink::Black => {
                self.mono[idx] &= !bit;
                self.chroma[idx] |= bit;
            }
            Ink::Chromatic => {
                self.mono[idx] |= bit;
                self.chroma[idx] &= !bit;
            }
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Ink {
        let idx = y * ROW_BYTES + x / 8;
        let bit = 0x80u8 >> (x % 8);
        if self.chroma[idx] & bit == 0 {
            Ink::Chromatic
        } else if self.mono[idx] & bit == 0 {
            Ink::Black
        } else {
            Ink::White
        }
    }

    /// Both planes, mono first, for the panel push and the storage dump.
    pub fn planes(&self) -> (&[u8; PLANE_BYTES], &[u8; PLANE_BYTES]) {
        (&self.mono, &self.chroma)
    }

    /// Mutable planes for restoring a stored frame.
    pub fn planes_mut(&mut self) -> (&mut [u8; PLANE_BYTES], &mut [u8; PLANE_BYTES]) {
        (&mut self.mono, &mut self.chroma)
    }

    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, ink: Ink) {
        for yy in y..(y + h).min(HEIGHT) {
            for xx in x..(x + w).min(WIDTH) {
                self.set_pixel(xx, yy, ink);
            }
        }
    }

    /// Draws `text` with the built-in 5x7 face, scaled up by `scale`.
    pub fn draw_text(&mut self, x: usize, y: usize, scale: usize, ink: Ink, text: &str) {
        let mut cx = x;
        for c in text.chars() {
            let columns = glyphs::glyph(c);
            for (col, bits) in columns.iter().enumerate() {
                for row in 0..glyphs::GLYPH_HEIGHT {
                    if bits & (1 << row) != 0 {
                        self.fill_rect(cx + col * scale, y + row * scale, scale, scale, ink);
                    }
                }
            }
            cx += (GLYPH_WIDTH + 1) * scale;
        }
    }

    /// Pixel width of `text` at `scale`, trailing inter-glyph gap excluded.
    pub fn text_width(text: &str, scale: usize) -> usize {
        let n = text.chars().count();
        if n == 0 {
            0
        } else {
            n * (GLYPH_WIDTH + 1) * scale - scale
        }
    }

    /// Composites the battery icon and percentage label in the top-right
    /// corner. `inverted` renders in white for placement over the error
    /// banner.
    pub fn draw_battery(&mut self, percent: u8, inverted: bool) {
        let ink = if inverted { Ink::White } else { Ink::Black };

        // Body outline with a nub on the right.
        let body_w = ICON_W - 4;
        self.fill_rect(ICON_X, ICON_Y, body_w, ICON_H, ink);
        let hollow = if inverted { Ink::Black } else { Ink::White };
        self.fill_rect(ICON_X + 2, ICON_Y + 2, body_w - 4, ICON_H - 4, hollow);
        self.fill_rect(ICON_X + body_w, ICON_Y + 4, 4, ICON_H - 8, ink);

        let fill = match BatteryTier::from_percent(percent) {
            BatteryTier::Full => ICON_FILL_W,
            BatteryTier::Half => ICON_FILL_W / 2,
            BatteryTier::Low => ICON_FILL_W / 4,
            BatteryTier::Empty => 0,
        };
        self.fill_rect(ICON_X + 2, ICON_Y + 2, fill, ICON_H - 4, ink);

        let mut label = heapless::String::<8>::new();
        let _ = write!(label, "{percent}%");
        self.draw_text(ICON_X + ICON_W + 8, ICON_Y + 1, 2, ink, &label);
    }

    /// Composites the failure banner: a black band across the top with the
    /// message centered in white and the current time at the left edge.
    /// Whatever image the frame held stays visible below the band.
    pub fn compose_error(&mut self, msg: &str, timestamp: &str) {
        const BAND_H: usize = 80;
        self.fill_rect(0, 0, WIDTH, BAND_H, Ink::Black);

        let w = Self::text_width(msg, 3);
        let x = WIDTH.saturating_sub(w) / 2;
        self.draw_text(x, 36, 3, Ink::White, msg);
        self.draw_text(12, 8, 2, Ink::White, timestamp);
    }
}

impl Default for PanelFrame {
    fn default() -> Self {
        Self::new()
    }
}

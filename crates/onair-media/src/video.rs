//! Procedural video: an RGB canvas the renderer draws into, and pooled
//! I420 frames converted from it.

use crate::error::{MediaError, Result};
use onair_core::{BufferLog, NativeMemoryBlock};
use onair_midi::NoteTracker;

pub type Rgb = [u8; 3];

/// A packed 24-bit RGB drawing surface.
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: NativeMemoryBlock<u8>,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: NativeMemoryBlock::new(width * height * 3),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * 3;
        let p = &self.pixels.as_slice()[i..i + 3];
        Some([p[0], p[1], p[2]])
    }

    pub fn fill(&mut self, color: Rgb) {
        for px in self.pixels.as_mut_slice().chunks_exact_mut(3) {
            px.copy_from_slice(&color);
        }
    }

    /// Fills the rectangle, clipped to the canvas.
    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: Rgb) {
        let x_end = (x + w).min(self.width);
        let y_end = (y + h).min(self.height);
        if x >= x_end || y >= y_end {
            return;
        }
        let stride = self.width * 3;
        let data = self.pixels.as_mut_slice();
        for row in y..y_end {
            let line = &mut data[row * stride + x * 3..row * stride + x_end * 3];
            for px in line.chunks_exact_mut(3) {
                px.copy_from_slice(&color);
            }
        }
    }

    #[inline]
    pub fn log(&self) -> &BufferLog {
        self.pixels.log()
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut BufferLog {
        self.pixels.log_mut()
    }

    /// Converts to I420 with BT.601 studio-swing coefficients. Chroma is
    /// the average of each 2x2 block.
    pub fn to_i420(&self, frame: &mut VideoFrame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(MediaError::Format(format!(
                "canvas is {}x{}, frame is {}x{}",
                self.width, self.height, frame.width, frame.height
            )));
        }
        let (w, h) = (self.width, self.height);
        let rgb = self.pixels.as_slice();
        let (y_plane, u_plane, v_plane) = frame.planes_mut();

        for (i, px) in rgb.chunks_exact(3).enumerate() {
            y_plane[i] = luma(px[0], px[1], px[2]);
        }

        let cw = w / 2;
        for cy in 0..h / 2 {
            for cx in 0..cw {
                let (mut r, mut g, mut b) = (0i32, 0i32, 0i32);
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let i = ((cy * 2 + dy) * w + cx * 2 + dx) * 3;
                    r += rgb[i] as i32;
                    g += rgb[i + 1] as i32;
                    b += rgb[i + 2] as i32;
                }
                let (u, v) = chroma(r / 4, g / 4, b / 4);
                u_plane[cy * cw + cx] = u;
                v_plane[cy * cw + cx] = v;
            }
        }
        frame.log_mut().merge(self.log());
        Ok(())
    }
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

#[inline]
fn chroma(r: i32, g: i32, b: i32) -> (u8, u8) {
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

/// One planar I420 picture: full-size Y followed by quarter-size U and V.
pub struct VideoFrame {
    width: usize,
    height: usize,
    data: NativeMemoryBlock<u8>,
    timestamp_us: u64,
}

impl VideoFrame {
    /// Dimensions must be even.
    pub fn new(width: usize, height: usize) -> Self {
        let luma = width * height;
        Self {
            width,
            height,
            data: NativeMemoryBlock::new(luma + luma / 2),
            timestamp_us: 0,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    #[inline]
    pub fn set_timestamp_us(&mut self, timestamp_us: u64) {
        self.timestamp_us = timestamp_us;
    }

    fn plane_sizes(&self) -> (usize, usize) {
        let luma = self.width * self.height;
        (luma, luma / 4)
    }

    pub fn y(&self) -> &[u8] {
        let (luma, _) = self.plane_sizes();
        &self.data.as_slice()[..luma]
    }

    pub fn u(&self) -> &[u8] {
        let (luma, chroma) = self.plane_sizes();
        &self.data.as_slice()[luma..luma + chroma]
    }

    pub fn v(&self) -> &[u8] {
        let (luma, chroma) = self.plane_sizes();
        &self.data.as_slice()[luma + chroma..luma + 2 * chroma]
    }

    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (luma, chroma) = self.plane_sizes();
        let (y, rest) = self.data.as_mut_slice().split_at_mut(luma);
        let (u, v) = rest.split_at_mut(chroma);
        (y, u, &mut v[..chroma])
    }

    /// All three planes, contiguous.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.data.address()
    }

    #[inline]
    pub fn log(&self) -> &BufferLog {
        self.data.log()
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut BufferLog {
        self.data.log_mut()
    }
}

const PALETTE: [Rgb; 12] = [
    [230, 57, 70],
    [244, 162, 97],
    [233, 196, 106],
    [138, 201, 38],
    [42, 157, 143],
    [38, 166, 209],
    [69, 123, 157],
    [94, 96, 206],
    [155, 93, 229],
    [241, 91, 181],
    [254, 228, 64],
    [0, 187, 249],
];

/// Draws held notes as vertical bars (pitch on x, velocity on height) and a
/// marker sweeping left to right once per `sweep_period_us`.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    pub background: Rgb,
    pub marker: Rgb,
    pub sweep_period_us: u64,
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self {
            background: [16, 16, 24],
            marker: [255, 255, 255],
            sweep_period_us: 4_000_000,
        }
    }
}

impl FrameRenderer {
    pub fn render(&self, notes: &NoteTracker, now_us: u64, canvas: &mut Canvas) {
        let (w, h) = (canvas.width(), canvas.height());
        canvas.fill(self.background);

        let key_width = (w / 128).max(1);
        for (note, active) in notes.active() {
            let x = note as usize * w / 128;
            let bar = (h * active.velocity as usize / 127).max(1);
            canvas.fill_rect(x, h - bar, key_width, bar, PALETTE[note as usize % 12]);
        }

        if self.sweep_period_us > 0 && w > 0 {
            let phase = now_us % self.sweep_period_us;
            let x = (phase as u128 * w as u128 / self.sweep_period_us as u128) as usize;
            canvas.fill_rect(x, 0, 2, h, self.marker);
        }
    }
}

//! Pure calculation functions for thumbnail and mosaic geometry.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::Size;

/// Largest number of children a mosaic samples from.
pub const MAX_MOSAIC_CANDIDATES: usize = 50;

/// Dimensions that fit `source` inside `bounds` while keeping its aspect
/// ratio. Never upscales, and never returns a zero edge.
///
/// # Examples
/// ```
/// # use webfs::thumb::calculations::fit_within;
/// # use webfs::thumb::Size;
/// // 800x600 into 140x140 → 140x105
/// assert_eq!(fit_within((800, 600), Size::new(140, 140)), (140, 105));
///
/// // already small enough → unchanged
/// assert_eq!(fit_within((64, 32), Size::new(140, 140)), (64, 32));
/// ```
pub fn fit_within(source: (u32, u32), bounds: Size) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w <= bounds.width && src_h <= bounds.height {
        return (src_w, src_h);
    }

    let scale = f64::min(
        bounds.width as f64 / src_w as f64,
        bounds.height as f64 / src_h as f64,
    );
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, bounds.width.max(1));
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, bounds.height.max(1));
    (w, h)
}

/// Grid shape for a mosaic with `candidates` thumbable children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub cols: u32,
    pub rows: u32,
}

impl Grid {
    /// Thresholds: 1 → 1×1, 2 → 1×2, 3 → 1×3, 4–8 → 2×2, 9+ → 3×3
    /// (columns × rows). Zero candidates has no grid.
    pub fn for_candidates(candidates: usize) -> Option<Self> {
        let (cols, rows) = match candidates {
            0 => return None,
            1 => (1, 1),
            2 => (1, 2),
            3 => (1, 3),
            4..=8 => (2, 2),
            _ => (3, 3),
        };
        Some(Self { cols, rows })
    }

    pub fn cells(self) -> usize {
        (self.cols * self.rows) as usize
    }

    /// Pixel size of one cell on a canvas of `canvas` size.
    pub fn cell_size(self, canvas: Size) -> Size {
        Size::new(canvas.width / self.cols, canvas.height / self.rows)
    }

    /// Cell positions in fill order: column by column, top to bottom.
    pub fn positions(self) -> impl Iterator<Item = (u32, u32)> {
        (0..self.cols).flat_map(move |x| (0..self.rows).map(move |y| (x, y)))
    }
}

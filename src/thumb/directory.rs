//! Directory Thumber.
//!
//! A directory carrying an icon file (`.icon.png`, `.icon.jpg` or
//! `.icon.jpeg`) is shown as that icon. Otherwise its thumbnail is a mosaic:
//! up to [`MAX_MOSAIC_CANDIDATES`] children that some Thumber accepts are
//! collected, a grid is picked from their count (see [`Grid`]), and each cell
//! is filled with the thumbnail of a randomly drawn candidate, scaled to
//! cover the cell and cropped around its center. A candidate
//! that fails to render is dropped and the cell is retried with another one.
//! Running out of candidates before the grid is full fails the whole mosaic.
//!
//! Subdirectories only take part while the render is allowed to go deeper
//! (see [`RenderContext::can_descend`]).

use super::calculations::{Grid, MAX_MOSAIC_CANDIDATES};
use super::image::{ImageThumber, fill_image};
use super::{RenderContext, Size, ThumbError, Thumber};
use crate::fs::Resource;
use image::{DynamicImage, RgbImage, imageops};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use tracing::warn;

/// Reserved file names that mark a directory icon, in priority order.
pub const ICON_NAMES: &[&str] = &[".icon.png", ".icon.jpg", ".icon.jpeg"];

/// The icon file of `dir`, if it has one.
pub fn find_icon(dir: &Resource) -> io::Result<Option<Resource>> {
    for name in ICON_NAMES {
        if let Some(icon) = dir.child(name)?
            && !icon.is_dir()
        {
            return Ok(Some(icon));
        }
    }
    Ok(None)
}

/// Whether `dir` has an icon file. Unreadable directories have none.
pub fn has_icon(dir: &Resource) -> bool {
    matches!(find_icon(dir), Ok(Some(_)))
}

pub struct DirectoryThumber {
    icon: ImageThumber,
    rng: Mutex<StdRng>,
}

impl DirectoryThumber {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible mosaics.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            icon: ImageThumber::new(),
            rng: Mutex::new(rng),
        }
    }

    fn icon_thumb(&self, dir: &Resource, size: Size) -> Result<Option<DynamicImage>, ThumbError> {
        match find_icon(dir)? {
            Some(icon) => Ok(Some(self.icon.render(icon.path(), size)?)),
            None => Ok(None),
        }
    }

    /// Children eligible for the mosaic, paired with the Thumber that will
    /// render them.
    fn candidates<'r>(
        &self,
        dir: &Resource,
        ctx: &RenderContext<'r>,
    ) -> Result<Vec<(Resource, &'r dyn Thumber)>, ThumbError> {
        let mut candidates = Vec::new();
        for child in dir.children()? {
            if child.is_hidden() || (child.is_dir() && !ctx.can_descend()) {
                continue;
            }
            match ctx.registry().find(&child) {
                Ok(Some(thumber)) => candidates.push((child, thumber)),
                Ok(None) => {}
                Err(err) => {
                    warn!(path = %child.path().display(), error = %err, "skipping mosaic candidate");
                }
            }
            if candidates.len() == MAX_MOSAIC_CANDIDATES {
                break;
            }
        }
        Ok(candidates)
    }

    fn mosaic_thumb(
        &self,
        dir: &Resource,
        size: Size,
        ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        let mut candidates = self.candidates(dir, ctx)?;
        let grid = Grid::for_candidates(candidates.len()).ok_or(ThumbError::NoCandidates)?;
        let cell = grid.cell_size(size);
        if cell.is_empty() {
            return Err(ThumbError::InvalidSize(size));
        }

        let mut canvas = RgbImage::new(size.width, size.height);
        for (x, y) in grid.positions() {
            let tile = loop {
                if candidates.is_empty() {
                    return Err(ThumbError::Exhausted);
                }
                let pick = self.rng.lock().gen_range(0..candidates.len());
                let (child, thumber) = candidates.swap_remove(pick);
                match thumber.thumb(&child, cell, ctx) {
                    Ok(tile) => break tile,
                    Err(err) => {
                        warn!(path = %child.path().display(), error = %err, "Error while drawing cell");
                    }
                }
            };
            let tile = fill_image(tile, cell).to_rgb8();
            imageops::replace(
                &mut canvas,
                &tile,
                i64::from(x * cell.width),
                i64::from(y * cell.height),
            );
        }
        Ok(DynamicImage::ImageRgb8(canvas))
    }
}

impl Default for DirectoryThumber {
    fn default() -> Self {
        Self::new()
    }
}

impl Thumber for DirectoryThumber {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        Ok(resource.is_dir())
    }

    fn thumb(
        &self,
        resource: &Resource,
        size: Size,
        ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        match self.icon_thumb(resource, size) {
            Ok(Some(icon)) => return Ok(icon),
            Ok(None) => {}
            Err(err) => {
                warn!(path = %resource.path().display(), error = %err, "unusable directory icon, composing mosaic");
            }
        }
        self.mosaic_thumb(resource, size, &ctx.descend()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingThumber, SolidThumber, create_test_png};
    use crate::thumb::Registry;
    use image::Rgb;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    fn dir_with_files(n: usize) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for i in 0..n {
            fs::write(tmp.path().join(format!("file{i:02}.bin")), b"x").unwrap();
        }
        tmp
    }

    fn solid_registry() -> (Registry, std::sync::Arc<Mutex<Vec<Size>>>) {
        let solid = SolidThumber::new("solid", RED);
        let sizes = std::sync::Arc::clone(&solid.sizes);
        let mut registry = Registry::new();
        registry.register(solid);
        registry.register(DirectoryThumber::with_seed(7));
        (registry, sizes)
    }

    fn render(registry: &Registry, dir: &Path, size: Size) -> Result<DynamicImage, ThumbError> {
        let resource = Resource::from_path(dir).unwrap();
        DirectoryThumber::with_seed(1).thumb(&resource, size, &RenderContext::new(registry))
    }

    // =========================================================================
    // Icons
    // =========================================================================

    #[test]
    fn has_icon_detects_marker_files() {
        let tmp = TempDir::new().unwrap();
        let dir = Resource::from_path(tmp.path()).unwrap();
        assert!(!has_icon(&dir));
        fs::write(tmp.path().join(".icon.jpeg"), b"").unwrap();
        assert!(has_icon(&dir));
    }

    #[test]
    fn icon_takes_priority_over_mosaic() {
        let tmp = dir_with_files(4);
        create_test_png(&tmp.path().join(".icon.png"), 30, 20);
        let (registry, sizes) = solid_registry();

        let image = render(&registry, tmp.path(), Size::new(140, 140)).unwrap();
        assert_eq!((image.width(), image.height()), (30, 20));
        assert!(sizes.lock().is_empty(), "no mosaic cell should be rendered");
    }

    #[test]
    fn broken_icon_falls_back_to_mosaic() {
        let tmp = dir_with_files(1);
        fs::write(tmp.path().join(".icon.png"), b"not an image").unwrap();
        let (registry, sizes) = solid_registry();

        let image = render(&registry, tmp.path(), Size::new(60, 60)).unwrap();
        assert_eq!((image.width(), image.height()), (60, 60));
        assert_eq!(sizes.lock().len(), 1);
    }

    // =========================================================================
    // Mosaic
    // =========================================================================

    #[test]
    fn grid_follows_candidate_count() {
        // (children, expected cell size on a 180x180 canvas)
        let cases = [
            (1, Size::new(180, 180)),
            (2, Size::new(180, 90)),
            (3, Size::new(180, 60)),
            (7, Size::new(90, 90)),
            (12, Size::new(60, 60)),
        ];
        for (children, cell) in cases {
            let tmp = dir_with_files(children);
            let (registry, sizes) = solid_registry();
            render(&registry, tmp.path(), Size::new(180, 180)).unwrap();

            let sizes = sizes.lock();
            let expected_cells = Grid::for_candidates(children).unwrap().cells();
            assert_eq!(sizes.len(), expected_cells, "{children} children");
            assert!(sizes.iter().all(|s| *s == cell), "{children} children: {sizes:?}");
        }
    }

    #[test]
    fn tiles_cover_their_cells() {
        let tmp = dir_with_files(3);
        let (registry, _) = solid_registry();
        let image = render(&registry, tmp.path(), Size::new(140, 140))
            .unwrap()
            .to_rgb8();

        // 1x3 grid of 140x46 cells; the last 2 rows stay background.
        for y in [0, 45, 46, 91, 92, 137] {
            assert_eq!(*image.get_pixel(70, y), RED, "row {y}");
        }
        assert_eq!(*image.get_pixel(70, 139), Rgb([0, 0, 0]));
    }

    #[test]
    fn small_tiles_are_scaled_to_cover_their_cells() {
        let tmp = TempDir::new().unwrap();
        for i in 0..2 {
            image::RgbImage::from_pixel(10, 5, RED)
                .save_with_format(tmp.path().join(format!("{i}.png")), image::ImageFormat::Png)
                .unwrap();
        }
        let mut registry = Registry::new();
        registry.register(ImageThumber::new());

        // 1x2 grid of 100x50 cells.
        let image = render(&registry, tmp.path(), Size::new(100, 100))
            .unwrap()
            .to_rgb8();
        for (x, y) in [(0, 0), (99, 49), (99, 50), (99, 99), (50, 75)] {
            let pixel = image.get_pixel(x, y);
            assert!(pixel[0] > 200 && pixel[1] < 40, "({x}, {y}) is {pixel:?}");
        }
    }

    #[test]
    fn all_candidates_failing_is_exhausted() {
        let tmp = dir_with_files(2);
        let mut registry = Registry::new();
        registry.register(FailingThumber);

        let err = render(&registry, tmp.path(), Size::new(140, 140)).unwrap_err();
        assert!(matches!(err, ThumbError::Exhausted), "got {err:?}");
    }

    #[test]
    fn failing_cell_is_retried_with_another_candidate() {
        // Eight candidates make a 2x2 grid. Even if all four broken files are
        // drawn first, four good ones remain.
        let tmp = TempDir::new().unwrap();
        for i in 0..4 {
            create_test_png(&tmp.path().join(format!("good{i}.png")), 8, 8);
            fs::write(tmp.path().join(format!("bad{i}.png")), b"broken").unwrap();
        }
        let mut registry = Registry::new();
        registry.register(ImageThumber::new());

        let image = render(&registry, tmp.path(), Size::new(16, 16)).unwrap();
        assert_eq!((image.width(), image.height()), (16, 16));
    }

    #[test]
    fn empty_directory_has_no_candidates() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.txt"), "not thumbable").unwrap();
        let mut registry = Registry::new();
        registry.register(ImageThumber::new());

        let err = render(&registry, tmp.path(), Size::new(140, 140)).unwrap_err();
        assert!(matches!(err, ThumbError::NoCandidates), "got {err:?}");
    }

    #[test]
    fn hidden_children_are_not_candidates() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".DS_Store"), b"x").unwrap();
        let (registry, _) = solid_registry();
        let err = render(&registry, tmp.path(), Size::new(140, 140)).unwrap_err();
        assert!(matches!(err, ThumbError::NoCandidates));
    }

    #[test]
    fn candidates_are_capped() {
        let tmp = dir_with_files(MAX_MOSAIC_CANDIDATES + 10);
        let (registry, _) = solid_registry();
        let thumber = DirectoryThumber::with_seed(3);
        let ctx = RenderContext::new(&registry).descend().unwrap();
        let found = thumber
            .candidates(&Resource::from_path(tmp.path()).unwrap(), &ctx)
            .unwrap();
        assert_eq!(found.len(), MAX_MOSAIC_CANDIDATES);
    }

    // =========================================================================
    // Depth
    // =========================================================================

    #[test]
    fn subdirectories_skipped_at_default_depth() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("a.bin"), b"x").unwrap();
        let (registry, _) = solid_registry();

        let err = render(&registry, tmp.path(), Size::new(140, 140)).unwrap_err();
        assert!(matches!(err, ThumbError::NoCandidates), "got {err:?}");
    }

    #[test]
    fn subdirectories_join_when_depth_allows() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("a.bin"), b"x").unwrap();
        let (registry, sizes) = solid_registry();
        let registry = registry.with_max_depth(2);

        let image = render(&registry, tmp.path(), Size::new(140, 140)).unwrap();
        assert_eq!((image.width(), image.height()), (140, 140));
        // The nested mosaic rendered the file inside `sub`.
        assert_eq!(*sizes.lock(), vec![Size::new(140, 140)]);
    }

    #[test]
    fn zero_depth_refuses_directories() {
        let tmp = dir_with_files(1);
        let (registry, _) = solid_registry();
        let registry = registry.with_max_depth(0);
        let err = render(&registry, tmp.path(), Size::new(140, 140)).unwrap_err();
        assert!(matches!(err, ThumbError::DepthExceeded(0)));
    }

    #[test]
    fn accepts_only_directories() {
        let tmp = dir_with_files(1);
        let thumber = DirectoryThumber::new();
        assert!(thumber.accepts(&Resource::from_path(tmp.path()).unwrap()).unwrap());
        let file = Resource::from_path(tmp.path().join("file00.bin")).unwrap();
        assert!(!thumber.accepts(&file).unwrap());
    }
}

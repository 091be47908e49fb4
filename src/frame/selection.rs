//! Pixel candidate selection.
//!
//! The initializer only consumes a [`SelectionMap`] per level through the
//! [`PixelSelector`] trait. [`GradientSelector`] is a block-maximum selector:
//! the image is tiled into blocks sized for the requested density and the
//! strongest-gradient pixel of each block is kept if it clears a threshold.
//! On level 0 blocks that stay empty are retried at 2x and 4x the block size
//! with a lower threshold, and the winners are tagged with tier 2 and 4.

use super::pyramid::PyramidLevel;

/// Per-pixel selection result: 0 = not selected, otherwise a priority tier.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionMap {
    width: usize,
    height: usize,
    tiers: Vec<u8>,
}

impl SelectionMap {
    /// Map with nothing selected.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            tiers: vec![0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Tier at `(x, y)`, 0 when unselected or out of bounds.
    pub fn tier(&self, x: usize, y: usize) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.tiers[x + y * self.width]
    }

    pub fn set(&mut self, x: usize, y: usize, tier: u8) {
        if x < self.width && y < self.height {
            self.tiers[x + y * self.width] = tier;
        }
    }

    pub fn num_selected(&self) -> usize {
        self.tiers.iter().filter(|&&t| t != 0).count()
    }
}

/// Source of trackable pixel candidates.
pub trait PixelSelector {
    /// Select roughly `target_points` pixels of `level`.
    fn select(&mut self, level: &PyramidLevel, level_index: usize, target_points: f64)
        -> SelectionMap;
}

/// Block-maximum gradient selector.
#[derive(Debug, Clone)]
pub struct GradientSelector {
    /// Minimum gradient magnitude for a tier-1 pixel.
    pub min_gradient: f64,
}

impl Default for GradientSelector {
    fn default() -> Self {
        Self { min_gradient: 3.0 }
    }
}

impl GradientSelector {
    /// Keep the best pixel of every `block`-sized tile that has no selection yet.
    fn select_blocks(
        &self,
        level: &PyramidLevel,
        map: &mut SelectionMap,
        block: usize,
        threshold_sq: f64,
        tier: u8,
    ) {
        let (w, h) = (level.width(), level.height());
        for by in (0..h).step_by(block) {
            for bx in (0..w).step_by(block) {
                let x_end = (bx + block).min(w);
                let y_end = (by + block).min(h);

                let mut occupied = false;
                let mut best: Option<(usize, usize, f64)> = None;
                for y in by..y_end {
                    for x in bx..x_end {
                        if map.tier(x, y) != 0 {
                            occupied = true;
                        }
                        let g = level.gradient_sq_norm(x, y);
                        if best.map_or(true, |(_, _, b)| g > b) {
                            best = Some((x, y, g));
                        }
                    }
                }

                if occupied {
                    continue;
                }
                if let Some((x, y, g)) = best {
                    if g > threshold_sq {
                        map.set(x, y, tier);
                    }
                }
            }
        }
    }
}

impl PixelSelector for GradientSelector {
    fn select(
        &mut self,
        level: &PyramidLevel,
        level_index: usize,
        target_points: f64,
    ) -> SelectionMap {
        let mut map = SelectionMap::empty(level.width(), level.height());
        if target_points <= 0.0 {
            return map;
        }

        let pixels = (level.width() * level.height()) as f64;
        let block = ((pixels / target_points).sqrt().floor() as usize).max(1);
        let threshold_sq = self.min_gradient * self.min_gradient;

        self.select_blocks(level, &mut map, block, threshold_sq, 1);
        if level_index == 0 {
            self.select_blocks(level, &mut map, 2 * block, threshold_sq * 0.75 * 0.75, 2);
            self.select_blocks(level, &mut map, 4 * block, threshold_sq * 0.5 * 0.5, 4);
        }
        map
    }
}

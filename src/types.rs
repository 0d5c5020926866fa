// types.rs - Shared data model: render configuration and the block grid.

use serde::{Deserialize, Serialize};

/// Monotonic identity for a [`Block`], used instead of reference identity so
/// dispatch results can be matched against the expected in-flight block even
/// after a block has been cloned across task boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

/// An axis-aligned rectangle of viewport pixels, at most `block_size` on a
/// side. The unit of work handed to a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Block {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Anti-alias sampling level accepted by a [`crate::renderer::BlockRenderer`].
pub const VALID_ANTI_ALIAS_LEVELS: [u8; 4] = [1, 2, 4, 8];

/// Immutable configuration for one `start()` call. Constructed once per
/// render request and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Edge length, in pixels, of a (possibly fractional at the edges) block.
    pub block_size: u32,
    pub width: u32,
    pub height: u32,
    pub anti_alias: u8,
    /// Enable the de-banding post-process on the presented frame buffer.
    pub de_band: bool,
    /// Opaque bag handed to workers verbatim at `set_scene` time. The
    /// scheduler never interprets it.
    #[serde(default)]
    pub render_params: serde_json::Value,
}

impl RenderConfig {
    /// Validate the synchronous, pre-frame configuration errors (§7 kind 1).
    /// `start()` rejects before any worker or event is touched.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.block_size == 0 {
            return Err(crate::error::SchedulerError::InvalidConfig {
                reason: "block_size must be >= 1".into(),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(crate::error::SchedulerError::InvalidConfig {
                reason: "viewport dimensions must be >= 1".into(),
            });
        }
        if !VALID_ANTI_ALIAS_LEVELS.contains(&self.anti_alias) {
            return Err(crate::error::SchedulerError::InvalidConfig {
                reason: format!(
                    "anti_alias must be one of {VALID_ANTI_ALIAS_LEVELS:?}, got {}",
                    self.anti_alias
                ),
            });
        }
        Ok(())
    }

    /// Number of block columns, `ceil(width / block_size)`.
    pub fn cols(&self) -> u32 {
        self.width.div_ceil(self.block_size)
    }

    /// Number of block rows, `ceil(height / block_size)`.
    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.block_size)
    }

    pub fn total_blocks(&self) -> u32 {
        self.cols() * self.rows()
    }
}

/// Enumerate the full block grid for `cfg` in row-major order, each tagged
/// with a fresh [`BlockId`] starting at `first_id`. Edge blocks are clamped
/// to the remaining viewport (§4.1 step 3).
pub fn enumerate_blocks(cfg: &RenderConfig, first_id: u64) -> Vec<Block> {
    let bs = cfg.block_size;
    let mut blocks = Vec::with_capacity(cfg.total_blocks() as usize);
    let mut next_id = first_id;

    for by in 0..cfg.rows() {
        for bx in 0..cfg.cols() {
            let x = bx * bs;
            let y = by * bs;
            let width = bs.min(cfg.width - x);
            let height = bs.min(cfg.height - y);
            blocks.push(Block {
                id: BlockId(next_id),
                x,
                y,
                width,
                height,
            });
            next_id += 1;
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(bs: u32, w: u32, h: u32) -> RenderConfig {
        RenderConfig {
            block_size: bs,
            width: w,
            height: h,
            anti_alias: 1,
            de_band: false,
            render_params: serde_json::Value::Null,
        }
    }

    #[test]
    fn rejects_zero_block_size() {
        assert!(cfg(0, 100, 100).validate().is_err());
    }

    #[test]
    fn rejects_zero_viewport() {
        assert!(cfg(16, 0, 100).validate().is_err());
        assert!(cfg(16, 100, 0).validate().is_err());
    }

    #[test]
    fn rejects_bad_anti_alias() {
        let mut c = cfg(16, 100, 100);
        c.anti_alias = 3;
        assert!(c.validate().is_err());
    }

    #[test]
    fn evenly_divisible_grid() {
        let c = cfg(128, 256, 256);
        assert_eq!(c.total_blocks(), 4);
        let blocks = enumerate_blocks(&c, 0);
        let origins: std::collections::HashSet<_> =
            blocks.iter().map(|b| (b.x, b.y)).collect();
        assert_eq!(
            origins,
            std::collections::HashSet::from([(0, 0), (128, 0), (0, 128), (128, 128)])
        );
        for b in &blocks {
            assert_eq!(b.width, 128);
            assert_eq!(b.height, 128);
        }
    }

    #[test]
    fn fractional_edge_blocks() {
        let c = cfg(100, 250, 100);
        let blocks = enumerate_blocks(&c, 0);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], Block { id: BlockId(0), x: 0, y: 0, width: 100, height: 100 });
        assert_eq!(blocks[1], Block { id: BlockId(1), x: 100, y: 0, width: 100, height: 100 });
        assert_eq!(blocks[2], Block { id: BlockId(2), x: 200, y: 0, width: 50, height: 100 });

        let total_area: u64 = blocks.iter().map(|b| b.area()).sum();
        assert_eq!(total_area, c.width as u64 * c.height as u64);
    }

    #[test]
    fn single_oversized_block() {
        let c = cfg(512, 256, 256);
        assert_eq!(c.total_blocks(), 1);
        let blocks = enumerate_blocks(&c, 0);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].width, 256);
        assert_eq!(blocks[0].height, 256);
    }

    #[test]
    fn ids_are_monotonic_from_first_id() {
        let c = cfg(128, 256, 256);
        let blocks = enumerate_blocks(&c, 42);
        let ids: Vec<u64> = blocks.iter().map(|b| b.id.0).collect();
        assert_eq!(ids, vec![42, 43, 44, 45]);
    }
}

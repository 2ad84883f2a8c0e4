#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Canvas-backed render surface adapter.
//!
//! A [`CanvasSurface`] owns the glyphs it creates and hands out opaque
//! handles. Handles are never reused within a surface's lifetime, so a stale
//! handle always resolves to [`ItemGone`] instead of a different glyph.

use std::collections::BTreeMap;

use glam::Vec2;
use symbol_siege_core::{GlyphHandle, GlyphPoint, GlyphRect, ItemGone, RenderSurface};

const GLYPH_WIDTH: f32 = 16.0;
const GLYPH_HEIGHT: f32 = 28.0;

/// In-memory canvas that owns glyph lifetimes.
#[derive(Debug, Default)]
pub struct CanvasSurface {
    next_handle: u64,
    glyphs: BTreeMap<GlyphHandle, Glyph>,
}

impl CanvasSurface {
    /// Creates an empty canvas.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of glyphs currently on the canvas.
    #[must_use]
    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    /// Iterates over the live glyphs in handle order.
    pub fn glyphs(&self) -> impl Iterator<Item = (GlyphHandle, char, GlyphPoint)> + '_ {
        self.glyphs.iter().map(|(handle, glyph)| {
            (*handle, glyph.ch, GlyphPoint::new(glyph.origin.x, glyph.origin.y))
        })
    }
}

impl RenderSurface for CanvasSurface {
    fn create_glyph(&mut self, ch: char, at: GlyphPoint) -> GlyphHandle {
        let handle = GlyphHandle::new(self.next_handle);
        self.next_handle += 1;
        let _ = self.glyphs.insert(
            handle,
            Glyph {
                ch,
                origin: Vec2::new(at.x(), at.y()),
            },
        );
        handle
    }

    fn move_glyph(&mut self, handle: GlyphHandle, to: GlyphPoint) -> Result<(), ItemGone> {
        let glyph = self.glyphs.get_mut(&handle).ok_or(ItemGone(handle))?;
        glyph.origin = Vec2::new(to.x(), to.y());
        Ok(())
    }

    fn delete_glyph(&mut self, handle: GlyphHandle) -> Result<(), ItemGone> {
        match self.glyphs.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ItemGone(handle)),
        }
    }

    fn bounds_of(&self, handle: GlyphHandle) -> Result<GlyphRect, ItemGone> {
        let glyph = self.glyphs.get(&handle).ok_or(ItemGone(handle))?;
        let max = glyph.origin + Vec2::new(GLYPH_WIDTH, GLYPH_HEIGHT);
        Ok(GlyphRect::new(
            GlyphPoint::new(glyph.origin.x, glyph.origin.y),
            GlyphPoint::new(max.x, max.y),
        ))
    }

    fn clear(&mut self) {
        if !self.glyphs.is_empty() {
            log::debug!("canvas cleared {} glyphs", self.glyphs.len());
        }
        self.glyphs.clear();
    }
}

#[derive(Clone, Copy, Debug)]
struct Glyph {
    ch: char,
    origin: Vec2,
}

#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Glyph lifecycle broker between the board and theft surfaces.
//!
//! The broker listens to the event stream and keeps the two render surfaces
//! in step with symbol ownership: a reveal materializes a glyph on the board,
//! a completed theft migrates it to the theft surface. Migration deletes the
//! source glyph before creating the destination one; a handle that is already
//! gone is tolerated, because the surface may have dropped it independently.
//! Every materialized glyph is reported back to the world as an
//! `AttachGlyph` command carrying the epoch and occurrence it was produced
//! for, which is what keeps arrival notifications exactly-once.

use symbol_siege_core::{
    Command, Epoch, Event, GlyphPoint, RenderSurface, Surface, SymbolKey, SymbolSnapshot,
};

const CHAR_WIDTH: f32 = 18.0;
const LINE_HEIGHT: f32 = 32.0;
const THEFT_SPACING: f32 = 22.0;

/// Broker that owns the board and theft surfaces.
#[derive(Debug)]
pub struct TransportBroker<S> {
    board: S,
    theft: S,
    epoch: Epoch,
    theft_count: u32,
}

impl<S: RenderSurface> TransportBroker<S> {
    /// Creates a broker over the provided surfaces.
    #[must_use]
    pub fn new(board: S, theft: S) -> Self {
        Self {
            board,
            theft,
            epoch: Epoch::ZERO,
            theft_count: 0,
        }
    }

    /// Board surface, for adapters that present it.
    #[must_use]
    pub fn board(&self) -> &S {
        &self.board
    }

    /// Theft surface, for adapters that present it.
    #[must_use]
    pub fn theft(&self) -> &S {
        &self.theft
    }

    /// Consumes world events, mutating the surfaces and reporting each
    /// materialized glyph back as a command.
    pub fn handle(&mut self, events: &[Event], out_commands: &mut Vec<Command>) {
        for event in events {
            match event {
                Event::ProblemLoaded { epoch, .. } => {
                    self.epoch = *epoch;
                    self.theft_count = 0;
                    self.board.clear();
                    self.theft.clear();
                }
                Event::SymbolRevealed { symbol } => {
                    self.materialize(symbol, out_commands);
                }
                Event::SymbolStolen { symbol, .. } => {
                    self.migrate(symbol, out_commands);
                }
                _ => {}
            }
        }
    }

    /// Creates a board glyph for a freshly placed symbol.
    fn materialize(&mut self, symbol: &SymbolSnapshot, out_commands: &mut Vec<Command>) {
        let at = board_position(symbol.key);
        let handle = self.board.create_glyph(symbol.ch, at);
        out_commands.push(Command::AttachGlyph {
            key: symbol.key,
            occurrence: symbol.occurrence,
            epoch: self.epoch,
            surface: Surface::Board,
            handle,
        });
    }

    /// Moves a stolen symbol's glyph from the board to the theft surface.
    fn migrate(&mut self, symbol: &SymbolSnapshot, out_commands: &mut Vec<Command>) {
        if let Some(glyph) = symbol.glyph {
            if let Err(gone) = self.board.delete_glyph(glyph.handle) {
                // The surface already dropped it; migration proceeds.
                log::debug!("stale board glyph during migration: {gone}");
            }
        }
        let at = GlyphPoint::new(f32::from(u16::try_from(self.theft_count).unwrap_or(u16::MAX)) * THEFT_SPACING, 0.0);
        self.theft_count += 1;
        let handle = self.theft.create_glyph(symbol.ch, at);
        out_commands.push(Command::AttachGlyph {
            key: symbol.key,
            occurrence: symbol.occurrence,
            epoch: self.epoch,
            surface: Surface::Theft,
            handle,
        });
    }
}

/// Deterministic board position for a symbol.
#[must_use]
pub fn board_position(key: SymbolKey) -> GlyphPoint {
    GlyphPoint::new(
        f32::from(u16::try_from(key.index()).unwrap_or(u16::MAX)) * CHAR_WIDTH,
        f32::from(u16::try_from(key.step()).unwrap_or(u16::MAX)) * LINE_HEIGHT,
    )
}

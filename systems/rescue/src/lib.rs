#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure system that arbitrates player rescue attempts.
//!
//! A rescue succeeds only while the worm is still approaching: the worm must
//! be alive, it must be hunting exactly the named symbol, and the symbol must
//! still be in `Targeted`. Once physical transport begins the window has
//! closed. The arbiter checks these conditions against the latest views and
//! fails closed on anything it cannot confirm; the world re-validates the
//! resulting command, so a stale success here still resolves correctly.

use symbol_siege_core::{Command, RescueError, SymbolKey, SymbolLocation, SymbolView, WormId, WormView};

/// Stateless arbiter for rescue attempts.
#[derive(Clone, Copy, Debug, Default)]
pub struct RescueArbiter;

impl RescueArbiter {
    /// Creates a new rescue arbiter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Judges one rescue attempt against the provided views.
    ///
    /// On success the returned command must still be applied to the world,
    /// which re-checks the same conditions authoritatively.
    pub fn arbitrate(
        &self,
        worm: WormId,
        key: SymbolKey,
        worms: &WormView,
        symbols: &SymbolView,
    ) -> Result<Command, RescueError> {
        let Some(snapshot) = worms.get(worm) else {
            return Err(RescueError::WormGone);
        };
        if snapshot.target != Some(key) {
            return Err(RescueError::WrongSymbol);
        }
        match symbols.get(key).map(|symbol| symbol.location) {
            Some(SymbolLocation::Targeted) => Ok(Command::ResolveRescue { worm, key }),
            Some(SymbolLocation::InTransit) => Err(RescueError::TransportUnderway),
            _ => Err(RescueError::WrongSymbol),
        }
    }
}

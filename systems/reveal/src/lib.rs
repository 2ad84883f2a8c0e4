#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure system that turns player reveal requests into world commands.
//!
//! The engine mirrors the step gate from the event stream so that requests
//! against locked steps are filtered before they ever reach the world, and it
//! remembers which symbols have been stolen so those requests pass through as
//! re-supplies regardless of the gate. The world remains authoritative; this
//! filter only removes requests that are certain to be rejected.

use std::collections::BTreeSet;

use symbol_siege_core::{Command, Event, SymbolKey};

/// Reveal engine that gates player requests on the active step.
#[derive(Debug, Default)]
pub struct RevealEngine {
    active_step: u32,
    step_count: u32,
    stolen: BTreeSet<SymbolKey>,
}

impl RevealEngine {
    /// Creates a reveal engine with no loaded problem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Step currently accepting reveal requests.
    #[must_use]
    pub fn active_step(&self) -> u32 {
        self.active_step
    }

    /// Consumes world events, tracking the step gate and stolen symbols.
    pub fn handle(&mut self, events: &[Event]) {
        for event in events {
            match event {
                Event::ProblemLoaded { step_count, .. } => {
                    self.active_step = 0;
                    self.step_count = *step_count;
                    self.stolen.clear();
                }
                Event::StepCompleted { step } => {
                    self.active_step = step.saturating_add(1).min(self.step_count);
                }
                Event::SymbolStolen { symbol, .. } => {
                    let _ = self.stolen.insert(symbol.key);
                }
                Event::SymbolRevealed { symbol } => {
                    let _ = self.stolen.remove(&symbol.key);
                }
                Event::SymbolReclaimed { symbol } => {
                    let _ = self.stolen.remove(&symbol.key);
                }
                _ => {}
            }
        }
    }

    /// Translates one player request into commands, dropping requests the
    /// world would certainly reject.
    pub fn request(&self, key: SymbolKey, out_commands: &mut Vec<Command>) {
        if self.stolen.contains(&key) {
            // Re-supply bypasses the step gate.
            out_commands.push(Command::Reveal { key });
            return;
        }
        if key.step() != self.active_step {
            log::debug!(
                "reveal request for {key:?} dropped: step {} is active",
                self.active_step
            );
            return;
        }
        out_commands.push(Command::Reveal { key });
    }
}

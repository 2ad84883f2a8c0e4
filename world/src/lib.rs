#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative state management for Symbol Siege.
//!
//! The world owns the symbol registry, the active worm set, and the epoch
//! counter. It is the only writer of a symbol's location: every mutation
//! arrives as a [`Command`] through [`apply`], is validated against the
//! location state machine, and is answered with broadcast [`Event`]s.
//! Recoverable outcomes (losing a targeting race, a failed rescue, a reveal
//! against a locked step) become events; a transition that violates the
//! state machine is a caller bug and is returned as an error instead.

use std::{collections::BTreeMap, time::Duration};

use symbol_siege_core::{
    Command, Epoch, Event, GlyphHandle, GlyphRef, ProblemStep, RescueError, RevealError, Surface,
    SymbolKey, SymbolLocation, SymbolSnapshot, TransitionError, TransportProgress, WormBehavior,
    WormId, WELCOME_BANNER,
};

/// Number of discrete ticks an uninterrupted transport timeline executes.
pub const TRANSPORT_TICKS: u8 = 8;

/// Represents the authoritative Symbol Siege world state.
#[derive(Debug)]
pub struct World {
    banner: &'static str,
    epoch: Epoch,
    clock: Duration,
    symbols: BTreeMap<SymbolKey, Symbol>,
    worms: Vec<Worm>,
    next_worm: u32,
    step_count: u32,
    active_step: u32,
    solved: bool,
}

impl World {
    /// Creates an empty world; symbols appear once a problem is loaded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            banner: WELCOME_BANNER,
            epoch: Epoch::ZERO,
            clock: Duration::ZERO,
            symbols: BTreeMap::new(),
            worms: Vec::new(),
            next_worm: 0,
            step_count: 0,
            active_step: 0,
            solved: false,
        }
    }

    fn worm(&self, id: WormId) -> Option<&Worm> {
        self.worms.iter().find(|worm| worm.id == id)
    }

    fn worm_mut(&mut self, id: WormId) -> Option<&mut Worm> {
        self.worms.iter_mut().find(|worm| worm.id == id)
    }

    fn remove_worm(&mut self, id: WormId) {
        if let Some(position) = self.worms.iter().position(|worm| worm.id == id) {
            let _ = self.worms.remove(position);
        }
    }

    /// Validated registry transition; the single writer of `location`.
    fn transition(&mut self, key: SymbolKey, to: SymbolLocation) -> Result<(), TransitionError> {
        let symbol = self
            .symbols
            .get_mut(&key)
            .ok_or(TransitionError::UnknownSymbol { key })?;
        let from = symbol.location;
        if !legal_transition(from, to) {
            return Err(TransitionError::Illegal { key, from, to });
        }
        symbol.location = to;
        log::debug!("symbol {key:?} moved {from:?} -> {to:?}");
        Ok(())
    }

    fn snapshot(&self, key: SymbolKey) -> Option<SymbolSnapshot> {
        self.symbols
            .get(&key)
            .map(|symbol| symbol.snapshot(key))
    }

    fn step_is_complete(&self, step: u32) -> bool {
        !self.symbols.iter().any(|(key, symbol)| {
            key.step() == step && !symbol.placeholder && symbol.location == SymbolLocation::Hidden
        })
    }

    /// Places every placeholder of the step the moment it becomes active.
    fn auto_fill_placeholders(&mut self, step: u32) -> Result<(), TransitionError> {
        let keys: Vec<SymbolKey> = self
            .symbols
            .iter()
            .filter(|(key, symbol)| {
                key.step() == step
                    && symbol.placeholder
                    && symbol.location == SymbolLocation::Hidden
            })
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.transition(key, SymbolLocation::Placed)?;
        }
        Ok(())
    }

    /// Advances the active step past every completed step, emitting one
    /// `StepCompleted` per step and auto-filling placeholders of each newly
    /// activated step.
    fn settle_steps(&mut self, out_events: &mut Vec<Event>) -> Result<(), TransitionError> {
        while self.active_step < self.step_count && self.step_is_complete(self.active_step) {
            out_events.push(Event::StepCompleted {
                step: self.active_step,
            });
            self.active_step += 1;
            if self.active_step < self.step_count {
                self.auto_fill_placeholders(self.active_step)?;
            }
        }
        Ok(())
    }

    fn check_solved(&mut self, out_events: &mut Vec<Event>) {
        if self.solved || self.active_step < self.step_count {
            return;
        }
        let all_placed = self
            .symbols
            .values()
            .all(|symbol| symbol.placeholder || symbol.location == SymbolLocation::Placed);
        if !all_placed {
            return;
        }
        self.solved = true;
        for worm in &mut self.worms {
            worm.behavior = WormBehavior::Idle;
            worm.target = None;
            worm.transport = None;
        }
        out_events.push(Event::ProblemSolved);
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Reports whether the provided edge is part of the location state machine.
///
/// `Stolen` has no outgoing edges: it is terminal for an occurrence, and
/// re-supply replaces the occurrence instead of transitioning out of it.
#[must_use]
pub fn legal_transition(from: SymbolLocation, to: SymbolLocation) -> bool {
    use SymbolLocation::{Hidden, InTransit, Placed, Reclaimed, Stolen, Targeted};
    matches!(
        (from, to),
        (Hidden, Placed)
            | (Placed, Targeted)
            | (Targeted, InTransit)
            | (Targeted, Reclaimed)
            | (Reclaimed, Placed)
            | (InTransit, Stolen)
    )
}

/// Applies the provided command to the world, mutating state deterministically.
///
/// Recoverable outcomes are reported through `out_events`; an error means the
/// caller requested a transition the state machine forbids.
pub fn apply(
    world: &mut World,
    command: Command,
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    match command {
        Command::LoadProblem { steps } => load_problem(world, &steps, out_events),
        Command::Tick { dt } => {
            world.clock = world.clock.saturating_add(dt);
            out_events.push(Event::TimeAdvanced { dt });
            Ok(())
        }
        Command::Reveal { key } => reveal(world, key, out_events),
        Command::SpawnWorm => {
            if world.solved {
                log::debug!("spawn ignored: problem already solved");
                return Ok(());
            }
            let id = WormId::new(world.next_worm);
            world.next_worm += 1;
            world.worms.push(Worm {
                id,
                behavior: WormBehavior::Wandering,
                target: None,
                transport: None,
            });
            out_events.push(Event::WormSpawned { worm: id });
            Ok(())
        }
        Command::TargetSymbol { worm, key } => target_symbol(world, worm, key, out_events),
        Command::BeginTransport { worm, key } => begin_transport(world, worm, key, out_events),
        Command::AdvanceTransport { worm, key } => advance_transport(world, worm, key, out_events),
        Command::ResolveRescue { worm, key } => resolve_rescue(world, worm, key, out_events),
        Command::AttachGlyph {
            key,
            occurrence,
            epoch,
            surface,
            handle,
        } => {
            attach_glyph(world, key, occurrence, epoch, surface, handle, out_events);
            Ok(())
        }
    }
}

fn load_problem(
    world: &mut World,
    steps: &[ProblemStep],
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    world.epoch = world.epoch.next();
    world.symbols.clear();
    world.worms.clear();
    world.solved = false;
    world.active_step = 0;
    world.step_count = u32::try_from(steps.len()).unwrap_or(u32::MAX);

    for (step_index, step) in steps.iter().enumerate() {
        for (char_index, entry) in step.chars().iter().enumerate() {
            let key = SymbolKey::new(step_index as u32, char_index as u32);
            let _ = world.symbols.insert(
                key,
                Symbol {
                    ch: entry.ch,
                    placeholder: entry.placeholder,
                    occurrence: 1,
                    location: SymbolLocation::Hidden,
                    glyph: None,
                    targeted_by: None,
                },
            );
        }
    }

    out_events.push(Event::ProblemLoaded {
        epoch: world.epoch,
        step_count: world.step_count,
    });

    if world.step_count > 0 {
        world.auto_fill_placeholders(0)?;
    }
    world.settle_steps(out_events)?;
    world.check_solved(out_events);
    log::info!(
        "problem loaded: epoch {}, {} steps",
        world.epoch.get(),
        world.step_count
    );
    Ok(())
}

fn reveal(
    world: &mut World,
    key: SymbolKey,
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    let Some(location) = world.symbols.get(&key).map(|symbol| symbol.location) else {
        log::warn!("reveal named unknown symbol {key:?}");
        out_events.push(Event::RevealRejected {
            key,
            reason: RevealError::UnknownSymbol,
        });
        return Ok(());
    };

    match location {
        SymbolLocation::Stolen => {
            // Re-supply: a fresh occurrence enters Placed; the stolen
            // occurrence stays terminal.
            if let Some(symbol) = world.symbols.get_mut(&key) {
                symbol.occurrence += 1;
                symbol.location = SymbolLocation::Placed;
                symbol.glyph = None;
                let snapshot = symbol.snapshot(key);
                out_events.push(Event::SymbolRevealed { symbol: snapshot });
            }
            world.check_solved(out_events);
            Ok(())
        }
        SymbolLocation::Hidden => {
            if key.step() != world.active_step {
                out_events.push(Event::RevealRejected {
                    key,
                    reason: RevealError::StepLocked,
                });
                return Ok(());
            }
            world.transition(key, SymbolLocation::Placed)?;
            if let Some(snapshot) = world.snapshot(key) {
                out_events.push(Event::SymbolRevealed { symbol: snapshot });
            }
            world.settle_steps(out_events)?;
            world.check_solved(out_events);
            Ok(())
        }
        // Already on the board in some form; revealing again is a no-op.
        SymbolLocation::Placed
        | SymbolLocation::Targeted
        | SymbolLocation::InTransit
        | SymbolLocation::Reclaimed => {
            log::debug!("reveal of {key:?} ignored: already {location:?}");
            Ok(())
        }
    }
}

fn target_symbol(
    world: &mut World,
    worm_id: WormId,
    key: SymbolKey,
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    let Some(worm) = world.worm(worm_id) else {
        log::warn!("targeting request from unknown worm {worm_id:?}");
        return Ok(());
    };
    if worm.behavior != WormBehavior::Wandering {
        out_events.push(Event::TargetUnavailable { worm: worm_id, key });
        return Ok(());
    }
    // Placeholders hold the line's shape; they are never worth stealing.
    let available = world
        .symbols
        .get(&key)
        .map(|symbol| {
            !symbol.placeholder
                && symbol.location == SymbolLocation::Placed
                && symbol.targeted_by.is_none()
        })
        .unwrap_or(false);
    if !available {
        // The race loser re-selects; this is a normal outcome.
        out_events.push(Event::TargetUnavailable { worm: worm_id, key });
        return Ok(());
    }

    world.transition(key, SymbolLocation::Targeted)?;
    let snapshot = match world.symbols.get_mut(&key) {
        Some(symbol) => {
            symbol.targeted_by = Some(worm_id);
            symbol.snapshot(key)
        }
        None => return Ok(()),
    };
    if let Some(worm) = world.worm_mut(worm_id) {
        worm.behavior = WormBehavior::Hunting;
        worm.target = Some(key);
    }
    out_events.push(Event::SymbolTargeted {
        worm: worm_id,
        symbol: snapshot,
    });
    Ok(())
}

fn begin_transport(
    world: &mut World,
    worm_id: WormId,
    key: SymbolKey,
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    let Some(worm) = world.worm(worm_id) else {
        log::debug!("transport start dropped: worm {worm_id:?} is gone");
        return Ok(());
    };
    if worm.behavior != WormBehavior::Hunting || worm.target != Some(key) {
        log::debug!("transport start dropped: stale stage for worm {worm_id:?}");
        return Ok(());
    }
    let holds = world
        .symbols
        .get(&key)
        .map(|symbol| {
            symbol.location == SymbolLocation::Targeted && symbol.targeted_by == Some(worm_id)
        })
        .unwrap_or(false);
    if !holds {
        // The symbol was moved from under the worm; its timeline yields.
        abort_worm(world, worm_id);
        out_events.push(Event::TransportAborted { worm: worm_id, key });
        return Ok(());
    }

    world.transition(key, SymbolLocation::InTransit)?;
    if let Some(worm) = world.worm_mut(worm_id) {
        worm.behavior = WormBehavior::Transporting;
        worm.transport = Some(TransportProgress::new(0, TRANSPORT_TICKS));
    }
    if let Some(snapshot) = world.snapshot(key) {
        out_events.push(Event::TransportStarted {
            worm: worm_id,
            symbol: snapshot,
        });
    }
    Ok(())
}

fn advance_transport(
    world: &mut World,
    worm_id: WormId,
    key: SymbolKey,
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    let Some(worm) = world.worm(worm_id) else {
        log::debug!("transport tick dropped: worm {worm_id:?} is gone");
        return Ok(());
    };
    if worm.behavior != WormBehavior::Transporting || worm.target != Some(key) {
        log::debug!("transport tick dropped: stale stage for worm {worm_id:?}");
        return Ok(());
    }
    let holds = world
        .symbols
        .get(&key)
        .map(|symbol| {
            symbol.location == SymbolLocation::InTransit && symbol.targeted_by == Some(worm_id)
        })
        .unwrap_or(false);
    if !holds {
        abort_worm(world, worm_id);
        out_events.push(Event::TransportAborted { worm: worm_id, key });
        return Ok(());
    }

    let progress = world
        .worm(worm_id)
        .and_then(|worm| worm.transport)
        .unwrap_or(TransportProgress::new(0, TRANSPORT_TICKS));
    let advanced = TransportProgress::new(progress.completed().saturating_add(1), progress.total());
    if !advanced.is_final() {
        if let Some(worm) = world.worm_mut(worm_id) {
            worm.transport = Some(advanced);
        }
        out_events.push(Event::TransportAdvanced {
            worm: worm_id,
            key,
            progress: advanced,
        });
        return Ok(());
    }

    world.transition(key, SymbolLocation::Stolen)?;
    let snapshot = match world.symbols.get_mut(&key) {
        Some(symbol) => {
            symbol.targeted_by = None;
            symbol.snapshot(key)
        }
        None => return Ok(()),
    };
    abort_worm(world, worm_id);
    log::info!("worm {} stole symbol {key:?}", worm_id.get());
    out_events.push(Event::SymbolStolen {
        worm: worm_id,
        symbol: snapshot,
    });
    Ok(())
}

fn abort_worm(world: &mut World, worm_id: WormId) {
    if let Some(worm) = world.worm_mut(worm_id) {
        worm.behavior = WormBehavior::Wandering;
        worm.target = None;
        worm.transport = None;
    }
}

fn resolve_rescue(
    world: &mut World,
    worm_id: WormId,
    key: SymbolKey,
    out_events: &mut Vec<Event>,
) -> Result<(), TransitionError> {
    let Some(worm) = world.worm(worm_id) else {
        out_events.push(Event::RescueFailed {
            worm: worm_id,
            key,
            reason: RescueError::WormGone,
        });
        return Ok(());
    };
    if worm.target != Some(key) {
        out_events.push(Event::RescueFailed {
            worm: worm_id,
            key,
            reason: RescueError::WrongSymbol,
        });
        return Ok(());
    }
    let location = world.symbols.get(&key).map(|symbol| symbol.location);
    match location {
        Some(SymbolLocation::Targeted) => {
            // Atomic from the caller's perspective: Reclaimed is never
            // observable outside this block.
            world.transition(key, SymbolLocation::Reclaimed)?;
            world.transition(key, SymbolLocation::Placed)?;
            let snapshot = match world.symbols.get_mut(&key) {
                Some(symbol) => {
                    symbol.targeted_by = None;
                    symbol.snapshot(key)
                }
                None => return Ok(()),
            };
            world.remove_worm(worm_id);
            log::info!("symbol {key:?} rescued from worm {}", worm_id.get());
            out_events.push(Event::SymbolReclaimed { symbol: snapshot });
            out_events.push(Event::WormKilled { worm: worm_id });
            world.check_solved(out_events);
            Ok(())
        }
        Some(SymbolLocation::InTransit) => {
            out_events.push(Event::RescueFailed {
                worm: worm_id,
                key,
                reason: RescueError::TransportUnderway,
            });
            Ok(())
        }
        _ => {
            out_events.push(Event::RescueFailed {
                worm: worm_id,
                key,
                reason: RescueError::WrongSymbol,
            });
            Ok(())
        }
    }
}

fn attach_glyph(
    world: &mut World,
    key: SymbolKey,
    occurrence: u32,
    epoch: Epoch,
    surface: Surface,
    handle: GlyphHandle,
    out_events: &mut Vec<Event>,
) {
    if epoch != world.epoch {
        log::debug!("glyph attach dropped: stale epoch {}", epoch.get());
        return;
    }
    let Some(symbol) = world.symbols.get_mut(&key) else {
        log::debug!("glyph attach dropped: unknown symbol {key:?}");
        return;
    };
    if symbol.occurrence != occurrence {
        log::debug!("glyph attach dropped: stale occurrence {occurrence} for {key:?}");
        return;
    }
    let glyph = GlyphRef { surface, handle };
    if symbol.glyph == Some(glyph) {
        // Duplicate attach; arrival already fired.
        return;
    }
    symbol.glyph = Some(glyph);
    out_events.push(Event::GlyphArrived { key, surface });
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::time::Duration;

    use super::World;
    use symbol_siege_core::{
        Epoch, SymbolKey, SymbolLocation, SymbolSnapshot, SymbolView, WormSnapshot, WormView,
    };

    /// Retrieves the welcome banner that adapters may display to players.
    #[must_use]
    pub fn welcome_banner(world: &World) -> &'static str {
        world.banner
    }

    /// Epoch of the currently loaded problem.
    #[must_use]
    pub fn epoch(world: &World) -> Epoch {
        world.epoch
    }

    /// Simulated time accumulated by the world clock.
    #[must_use]
    pub fn clock(world: &World) -> Duration {
        world.clock
    }

    /// Index of the step currently accepting reveals; equals the step count
    /// once every step has completed.
    #[must_use]
    pub fn active_step(world: &World) -> u32 {
        world.active_step
    }

    /// Number of steps in the loaded problem.
    #[must_use]
    pub fn step_count(world: &World) -> u32 {
        world.step_count
    }

    /// Reports whether the loaded problem has been solved.
    #[must_use]
    pub fn is_solved(world: &World) -> bool {
        world.solved
    }

    /// Looks up a single symbol; `None` for unknown keys.
    #[must_use]
    pub fn symbol(world: &World, key: SymbolKey) -> Option<SymbolSnapshot> {
        world.snapshot(key)
    }

    /// Captures a read-only view of every symbol in the loaded problem.
    #[must_use]
    pub fn symbol_view(world: &World) -> SymbolView {
        SymbolView::from_snapshots(
            world
                .symbols
                .iter()
                .map(|(key, symbol)| symbol.snapshot(*key))
                .collect(),
        )
    }

    /// Lazy, restartable iterator over the `Placed` symbols of one step.
    pub fn placed_symbols(
        world: &World,
        step: u32,
    ) -> impl Iterator<Item = SymbolSnapshot> + '_ {
        world
            .symbols
            .iter()
            .filter(move |(key, symbol)| {
                key.step() == step
                    && !symbol.placeholder
                    && symbol.location == SymbolLocation::Placed
            })
            .map(|(key, symbol)| symbol.snapshot(*key))
    }

    /// Captures a read-only view of the active worm set.
    #[must_use]
    pub fn worm_view(world: &World) -> WormView {
        WormView::from_snapshots(
            world
                .worms
                .iter()
                .map(|worm| WormSnapshot {
                    id: worm.id,
                    behavior: worm.behavior,
                    target: worm.target,
                    transport: worm.transport,
                })
                .collect(),
        )
    }
}

#[derive(Clone, Debug)]
struct Symbol {
    ch: char,
    placeholder: bool,
    occurrence: u32,
    location: SymbolLocation,
    glyph: Option<GlyphRef>,
    targeted_by: Option<WormId>,
}

impl Symbol {
    fn snapshot(&self, key: SymbolKey) -> SymbolSnapshot {
        SymbolSnapshot {
            key,
            ch: self.ch,
            placeholder: self.placeholder,
            occurrence: self.occurrence,
            location: self.location,
            glyph: self.glyph,
            targeted_by: self.targeted_by,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Worm {
    id: WormId,
    behavior: WormBehavior,
    target: Option<SymbolKey>,
    transport: Option<TransportProgress>,
}

#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Facade that wires the world and its systems into one playable session.
//!
//! The session owns the authoritative world plus the reveal, threat, rescue,
//! and transport systems, and runs the command/event pump that connects them:
//! every player action or clock tick becomes commands, the world answers with
//! events, the systems react with follow-up commands, and the loop repeats
//! until the frame is quiet. Everything the outside world needs to present is
//! available as drained events and read-only views.

use std::time::Duration;

use symbol_siege_core::{
    Command, Event, ProblemSource, RenderSurface, RescueError, SymbolKey, SymbolView,
    TransitionError, WormId, WormView,
};
use symbol_siege_system_rescue::RescueArbiter;
use symbol_siege_system_reveal::RevealEngine;
use symbol_siege_system_threat::{Config as ThreatConfig, ThreatManager};
use symbol_siege_system_transport::TransportBroker;
use symbol_siege_world::{self as world, query, World};

/// Playable session over a pair of render surfaces.
#[derive(Debug)]
pub struct Session<S> {
    world: World,
    reveal: RevealEngine,
    threat: ThreatManager,
    rescue: RescueArbiter,
    broker: TransportBroker<S>,
    journal: Vec<Event>,
}

impl<S: RenderSurface> Session<S> {
    /// Creates a session with no loaded problem.
    #[must_use]
    pub fn new(board: S, theft: S, threat_config: ThreatConfig) -> Self {
        Self {
            world: World::new(),
            reveal: RevealEngine::new(),
            threat: ThreatManager::new(threat_config),
            rescue: RescueArbiter::new(),
            broker: TransportBroker::new(board, theft),
            journal: Vec::new(),
        }
    }

    /// Banner shown when the experience starts.
    #[must_use]
    pub fn welcome_banner(&self) -> &'static str {
        query::welcome_banner(&self.world)
    }

    /// Replaces the current problem, invalidating every in-flight timeline.
    pub fn load_problem<P: ProblemSource + ?Sized>(
        &mut self,
        problem: &P,
    ) -> Result<(), TransitionError> {
        self.run(Command::LoadProblem {
            steps: problem.steps(),
        })
    }

    /// Advances the simulation clock, letting due worm stages fire.
    pub fn tick(&mut self, dt: Duration) -> Result<(), TransitionError> {
        self.run(Command::Tick { dt })
    }

    /// Submits a player reveal request for the named symbol.
    pub fn reveal(&mut self, key: SymbolKey) -> Result<(), TransitionError> {
        let mut commands = Vec::new();
        self.reveal.request(key, &mut commands);
        for command in commands {
            self.run(command)?;
        }
        Ok(())
    }

    /// Resolves a player rescue attempt; `Ok(true)` means the symbol was
    /// reclaimed and the worm destroyed.
    pub fn attempt_rescue(
        &mut self,
        worm: WormId,
        key: SymbolKey,
    ) -> Result<bool, TransitionError> {
        let verdict = self.rescue.arbitrate(
            worm,
            key,
            &query::worm_view(&self.world),
            &query::symbol_view(&self.world),
        );
        let command = match verdict {
            Ok(command) => command,
            Err(reason) => {
                log::debug!("rescue of {key:?} declined: {reason:?}");
                return Ok(false);
            }
        };

        // The world re-validates; watch the new events for the reclaim.
        let watermark = self.journal.len();
        self.run(command)?;
        let reclaimed = self.journal[watermark..].iter().any(|event| {
            matches!(event, Event::SymbolReclaimed { symbol } if symbol.key == key)
        });
        Ok(reclaimed)
    }

    /// Reason a rescue attempt would fail right now, if it would.
    #[must_use]
    pub fn rescue_obstacle(&self, worm: WormId, key: SymbolKey) -> Option<RescueError> {
        self.rescue
            .arbitrate(
                worm,
                key,
                &query::worm_view(&self.world),
                &query::symbol_view(&self.world),
            )
            .err()
    }

    /// Drains every event recorded since the previous drain.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.journal)
    }

    /// Read-only view of every symbol in the loaded problem.
    #[must_use]
    pub fn symbols(&self) -> SymbolView {
        query::symbol_view(&self.world)
    }

    /// Read-only view of the active worm set.
    #[must_use]
    pub fn worms(&self) -> WormView {
        query::worm_view(&self.world)
    }

    /// Step currently accepting reveals.
    #[must_use]
    pub fn active_step(&self) -> u32 {
        query::active_step(&self.world)
    }

    /// Reports whether the loaded problem has been solved.
    #[must_use]
    pub fn is_solved(&self) -> bool {
        query::is_solved(&self.world)
    }

    /// Board surface, for adapters that present it.
    #[must_use]
    pub fn board(&self) -> &S {
        self.broker.board()
    }

    /// Theft surface, for adapters that present it.
    #[must_use]
    pub fn theft(&self) -> &S {
        self.broker.theft()
    }

    /// Applies one command and pumps system reactions until the frame is
    /// quiet. Events accumulate in the journal in the order they fired.
    fn run(&mut self, command: Command) -> Result<(), TransitionError> {
        let mut events = Vec::new();
        world::apply(&mut self.world, command, &mut events)?;

        loop {
            if events.is_empty() {
                break;
            }
            self.reveal.handle(&events);
            self.journal.extend(events.iter().cloned());

            let worms = query::worm_view(&self.world);
            let symbols = query::symbol_view(&self.world);
            let mut commands = Vec::new();
            self.threat.handle(&events, &worms, &symbols, &mut commands);
            self.broker.handle(&events, &mut commands);

            events.clear();
            for command in commands {
                world::apply(&mut self.world, command, &mut events)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use symbol_siege_core::{
        GlyphHandle, GlyphPoint, GlyphRect, ItemGone, ProblemStep, SymbolLocation, WormBehavior,
    };

    #[derive(Debug, Default)]
    struct FakeSurface {
        next: u64,
        glyphs: BTreeMap<GlyphHandle, (char, GlyphPoint)>,
    }

    impl RenderSurface for FakeSurface {
        fn create_glyph(&mut self, ch: char, at: GlyphPoint) -> GlyphHandle {
            let handle = GlyphHandle::new(self.next);
            self.next += 1;
            let _ = self.glyphs.insert(handle, (ch, at));
            handle
        }

        fn move_glyph(&mut self, handle: GlyphHandle, to: GlyphPoint) -> Result<(), ItemGone> {
            match self.glyphs.get_mut(&handle) {
                Some(entry) => {
                    entry.1 = to;
                    Ok(())
                }
                None => Err(ItemGone(handle)),
            }
        }

        fn delete_glyph(&mut self, handle: GlyphHandle) -> Result<(), ItemGone> {
            match self.glyphs.remove(&handle) {
                Some(_) => Ok(()),
                None => Err(ItemGone(handle)),
            }
        }

        fn bounds_of(&self, handle: GlyphHandle) -> Result<GlyphRect, ItemGone> {
            match self.glyphs.get(&handle) {
                Some((_, at)) => {
                    Ok(GlyphRect::new(*at, GlyphPoint::new(at.x() + 1.0, at.y() + 1.0)))
                }
                None => Err(ItemGone(handle)),
            }
        }

        fn clear(&mut self) {
            self.glyphs.clear();
        }
    }

    struct ScriptedProblem(Vec<&'static str>);

    impl ProblemSource for ScriptedProblem {
        fn step_count(&self) -> usize {
            self.0.len()
        }

        fn step(&self, index: usize) -> ProblemStep {
            ProblemStep::from_text(self.0[index])
        }
    }

    fn session() -> Session<FakeSurface> {
        Session::new(
            FakeSurface::default(),
            FakeSurface::default(),
            ThreatConfig::new(
                Duration::from_secs(1),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_millis(250),
                13,
            ),
        )
    }

    fn two_step_problem() -> ScriptedProblem {
        ScriptedProblem(vec!["x = 7", "7 = x"])
    }

    fn reveal_step(session: &mut Session<FakeSurface>, step: u32) {
        let keys: Vec<SymbolKey> = session
            .symbols()
            .iter()
            .filter(|s| s.key.step() == step && !s.placeholder)
            .map(|s| s.key)
            .collect();
        for key in keys {
            session.reveal(key).expect("reveal applies");
        }
    }

    /// Ticks until a worm reaches the provided behavior, panicking if the
    /// simulated minute elapses first.
    fn tick_until(
        session: &mut Session<FakeSurface>,
        behavior: WormBehavior,
    ) -> (WormId, SymbolKey) {
        for _ in 0..240 {
            session.tick(Duration::from_millis(250)).expect("tick applies");
            if let Some(worm) = session
                .worms()
                .iter()
                .find(|worm| worm.behavior == behavior)
            {
                let key = worm.target.expect("worm with this behavior has a target");
                return (worm.id, key);
            }
        }
        panic!("no worm reached {behavior:?} within the time limit");
    }

    #[test]
    fn welcome_banner_greets_the_player() {
        let session = session();
        assert_eq!(session.welcome_banner(), "Welcome to Symbol Siege.");
    }

    #[test]
    fn loading_a_problem_spawns_the_initial_worms() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        assert_eq!(session.worms().len(), 2);
        assert_eq!(session.active_step(), 0);
    }

    #[test]
    fn reveals_materialize_board_glyphs() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        reveal_step(&mut session, 0);

        assert_eq!(session.board().glyphs.len(), 3);
        let events = session.drain_events();
        let arrivals = events
            .iter()
            .filter(|event| matches!(event, Event::GlyphArrived { .. }))
            .count();
        assert_eq!(arrivals, 3, "each reveal is confirmed exactly once");
    }

    #[test]
    fn locked_step_reveals_are_filtered_before_the_world() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        session.reveal(SymbolKey::new(1, 0)).expect("request runs");

        let events = session.drain_events();
        assert!(!events
            .iter()
            .any(|event| matches!(event, Event::RevealRejected { .. })));
        assert!(session.board().glyphs.is_empty());
    }

    #[test]
    fn rescue_during_the_approach_reclaims_the_symbol() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        reveal_step(&mut session, 0);

        let (worm, key) = tick_until(&mut session, WormBehavior::Hunting);
        let rescued = session.attempt_rescue(worm, key).expect("rescue resolves");
        assert!(rescued);
        assert!(session.worms().get(worm).is_none());
        assert_eq!(
            session.symbols().get(key).map(|s| s.location),
            Some(SymbolLocation::Placed)
        );
    }

    #[test]
    fn rescue_after_transport_begins_is_declined() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        reveal_step(&mut session, 0);

        let (worm, key) = tick_until(&mut session, WormBehavior::Transporting);
        assert_eq!(
            session.rescue_obstacle(worm, key),
            Some(RescueError::TransportUnderway)
        );
        let rescued = session.attempt_rescue(worm, key).expect("rescue resolves");
        assert!(!rescued);
        assert_eq!(
            session.symbols().get(key).map(|s| s.location),
            Some(SymbolLocation::InTransit)
        );
    }

    #[test]
    fn theft_moves_the_glyph_and_resupply_restores_the_board() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        reveal_step(&mut session, 0);
        let _ = session.drain_events();

        // Let a theft run to completion.
        let mut stolen = None;
        for _ in 0..240 {
            session.tick(Duration::from_millis(250)).expect("tick applies");
            let events = session.drain_events();
            stolen = events.iter().find_map(|event| match event {
                Event::SymbolStolen { symbol, .. } => Some(symbol.key),
                _ => None,
            });
            if stolen.is_some() {
                break;
            }
        }
        let stolen = stolen.expect("a theft completes within the time limit");

        assert_eq!(session.theft().glyphs.len(), 1);
        assert_eq!(
            session.symbols().get(stolen).map(|s| s.location),
            Some(SymbolLocation::Stolen)
        );

        session.reveal(stolen).expect("re-supply applies");
        let snapshot = *session.symbols().get(stolen).expect("symbol exists");
        assert_eq!(snapshot.location, SymbolLocation::Placed);
        assert_eq!(snapshot.occurrence, 2);
        assert!(snapshot.glyph.is_some(), "a fresh board glyph is attached");
    }

    #[test]
    fn solving_the_problem_parks_the_session() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        reveal_step(&mut session, 0);
        reveal_step(&mut session, 1);

        assert!(session.is_solved());
        for worm in session.worms().iter() {
            assert_eq!(worm.behavior, WormBehavior::Idle);
        }

        // Idle worms never act again.
        let _ = session.drain_events();
        for _ in 0..40 {
            session.tick(Duration::from_millis(250)).expect("tick applies");
        }
        let events = session.drain_events();
        assert!(events
            .iter()
            .all(|event| matches!(event, Event::TimeAdvanced { .. })));
    }

    #[test]
    fn reloading_discards_worms_and_surfaces() {
        let mut session = session();
        session
            .load_problem(&two_step_problem())
            .expect("problem loads");
        reveal_step(&mut session, 0);
        let _ = tick_until(&mut session, WormBehavior::Transporting);

        session
            .load_problem(&ScriptedProblem(vec!["y - 1 = 2"]))
            .expect("problem loads");
        assert!(session.board().glyphs.is_empty());
        assert!(session.theft().glyphs.is_empty());
        assert_eq!(session.worms().len(), 2, "a fresh worm pair spawns");
        assert!(session
            .worms()
            .iter()
            .all(|worm| worm.behavior == WormBehavior::Wandering));
    }
}

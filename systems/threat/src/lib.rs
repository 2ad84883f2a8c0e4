#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic threat system that drives worm timelines.
//!
//! Every worm lives on a timeline of delayed stages: wander for a while, pick
//! a target, approach it, then carry it off tick by tick. The stages sit in a
//! deadline queue keyed by simulated time. Before a due stage turns into a
//! command it is re-validated three ways: the epoch captured at schedule time
//! must still be current, the worm must still be alive, and the worm must
//! still agree about its target. A stage that fails any check is dropped
//! silently; the world never sees commands from invalidated timelines.

use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap},
    time::Duration,
};

use symbol_siege_core::{
    Command, Epoch, Event, SymbolKey, SymbolLocation, SymbolView, WormBehavior, WormId, WormView,
};

const RNG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const RNG_INCREMENT: u64 = 1;

/// Configuration parameters required to construct the threat system.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    wander_delay: Duration,
    retry_delay: Duration,
    approach_duration: Duration,
    tick_interval: Duration,
    rng_seed: u64,
    initial_worms: usize,
    max_worms: usize,
    boost_factor: f64,
    boost_duration: Duration,
}

impl Config {
    /// Creates a configuration with the provided timeline cadence and seed.
    #[must_use]
    pub const fn new(
        wander_delay: Duration,
        retry_delay: Duration,
        approach_duration: Duration,
        tick_interval: Duration,
        rng_seed: u64,
    ) -> Self {
        Self {
            wander_delay,
            retry_delay,
            approach_duration,
            tick_interval,
            rng_seed,
            initial_worms: 2,
            max_worms: 5,
            boost_factor: 1.35,
            boost_duration: Duration::from_secs(10),
        }
    }

    /// Overrides the worm population bounds.
    #[must_use]
    pub const fn with_population(mut self, initial_worms: usize, max_worms: usize) -> Self {
        self.initial_worms = initial_worms;
        self.max_worms = max_worms;
        self
    }
}

/// Pure system that schedules and validates worm timeline stages.
#[derive(Debug)]
pub struct ThreatManager {
    config: Config,
    clock: Duration,
    epoch: Epoch,
    rng_state: u64,
    queue: BinaryHeap<Reverse<Stage>>,
    next_seq: u64,
    alive: BTreeSet<WormId>,
    boost_until: Option<Duration>,
    dormant: bool,
}

impl ThreatManager {
    /// Creates a threat system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Duration::ZERO,
            epoch: Epoch::ZERO,
            rng_state: config.rng_seed,
            queue: BinaryHeap::new(),
            next_seq: 0,
            alive: BTreeSet::new(),
            boost_until: None,
            dormant: false,
        }
    }

    /// Number of stages currently waiting in the deadline queue.
    #[must_use]
    pub fn pending_stages(&self) -> usize {
        self.queue.len()
    }

    /// Consumes events and immutable views to emit the next command batch.
    pub fn handle(
        &mut self,
        events: &[Event],
        worms: &WormView,
        symbols: &SymbolView,
        out_commands: &mut Vec<Command>,
    ) {
        for event in events {
            self.observe(event, out_commands);
        }
        if self.dormant {
            return;
        }
        self.drain_due(worms, symbols, out_commands);
    }

    fn observe(&mut self, event: &Event, out_commands: &mut Vec<Command>) {
        match event {
            Event::ProblemLoaded { epoch, .. } => {
                self.epoch = *epoch;
                self.queue.clear();
                self.alive.clear();
                self.boost_until = None;
                self.dormant = false;
                let spawns = self.config.initial_worms.min(self.config.max_worms);
                for _ in 0..spawns {
                    out_commands.push(Command::SpawnWorm);
                }
            }
            Event::TimeAdvanced { dt } => {
                self.clock = self.clock.saturating_add(*dt);
                if let Some(until) = self.boost_until {
                    if self.clock >= until {
                        self.boost_until = None;
                    }
                }
            }
            Event::StepCompleted { .. } => {
                self.boost_until = Some(self.clock.saturating_add(self.config.boost_duration));
                if self.alive.len() < self.config.max_worms {
                    out_commands.push(Command::SpawnWorm);
                }
            }
            Event::ProblemSolved => {
                self.dormant = true;
                self.queue.clear();
            }
            Event::WormSpawned { worm } => {
                let _ = self.alive.insert(*worm);
                self.schedule(*worm, self.config.wander_delay, StageKind::SelectTarget);
            }
            Event::WormKilled { worm } => {
                let _ = self.alive.remove(worm);
            }
            Event::TargetUnavailable { worm, .. } => {
                self.schedule(*worm, self.config.retry_delay, StageKind::SelectTarget);
            }
            Event::SymbolTargeted { worm, symbol } => {
                self.schedule(
                    *worm,
                    self.config.approach_duration,
                    StageKind::BeginTransport { key: symbol.key },
                );
            }
            Event::TransportStarted { worm, symbol } => {
                self.schedule(
                    *worm,
                    self.config.tick_interval,
                    StageKind::TransportTick { key: symbol.key },
                );
            }
            Event::TransportAdvanced { worm, key, .. } => {
                self.schedule(
                    *worm,
                    self.config.tick_interval,
                    StageKind::TransportTick { key: *key },
                );
            }
            Event::SymbolStolen { worm, .. } | Event::TransportAborted { worm, .. } => {
                self.schedule(*worm, self.config.wander_delay, StageKind::SelectTarget);
            }
            _ => {}
        }
    }

    /// Schedules a stage after the provided base delay, compressed while the
    /// post-step speed boost is active.
    fn schedule(&mut self, worm: WormId, base_delay: Duration, kind: StageKind) {
        if self.dormant {
            return;
        }
        let delay = if self.boost_until.is_some() {
            base_delay.div_f64(self.config.boost_factor)
        } else {
            base_delay
        };
        let stage = Stage {
            due: self.clock.saturating_add(delay),
            seq: self.next_seq,
            epoch: self.epoch,
            worm,
            kind,
        };
        self.next_seq += 1;
        self.queue.push(Reverse(stage));
    }

    fn drain_due(
        &mut self,
        worms: &WormView,
        symbols: &SymbolView,
        out_commands: &mut Vec<Command>,
    ) {
        while let Some(Reverse(stage)) = self.queue.peek().copied() {
            if stage.due > self.clock {
                break;
            }
            let _ = self.queue.pop();
            self.fire(stage, worms, symbols, out_commands);
        }
    }

    fn fire(
        &mut self,
        stage: Stage,
        worms: &WormView,
        symbols: &SymbolView,
        out_commands: &mut Vec<Command>,
    ) {
        if stage.epoch != self.epoch {
            log::debug!("stage dropped: epoch {} is stale", stage.epoch.get());
            return;
        }
        let Some(worm) = worms.get(stage.worm) else {
            log::debug!("stage dropped: worm {} is gone", stage.worm.get());
            return;
        };

        match stage.kind {
            StageKind::SelectTarget => {
                if worm.behavior != WormBehavior::Wandering {
                    log::debug!(
                        "selection dropped: worm {} is {:?}",
                        stage.worm.get(),
                        worm.behavior
                    );
                    return;
                }
                match self.select_target(symbols) {
                    Some(key) => out_commands.push(Command::TargetSymbol {
                        worm: stage.worm,
                        key,
                    }),
                    None => {
                        // Nothing on the board yet; keep wandering.
                        self.schedule(stage.worm, self.config.retry_delay, StageKind::SelectTarget);
                    }
                }
            }
            StageKind::BeginTransport { key } => {
                if worm.behavior != WormBehavior::Hunting || worm.target != Some(key) {
                    log::debug!(
                        "transport start dropped: worm {} no longer hunts {key:?}",
                        stage.worm.get()
                    );
                    return;
                }
                out_commands.push(Command::BeginTransport {
                    worm: stage.worm,
                    key,
                });
            }
            StageKind::TransportTick { key } => {
                if worm.behavior != WormBehavior::Transporting || worm.target != Some(key) {
                    log::debug!(
                        "transport tick dropped: worm {} no longer carries {key:?}",
                        stage.worm.get()
                    );
                    return;
                }
                out_commands.push(Command::AdvanceTransport {
                    worm: stage.worm,
                    key,
                });
            }
        }
    }

    /// Picks a steal target among placed, unthreatened symbols.
    fn select_target(&mut self, symbols: &SymbolView) -> Option<SymbolKey> {
        let candidates: Vec<SymbolKey> = symbols
            .iter()
            .filter(|symbol| {
                !symbol.placeholder
                    && symbol.location == SymbolLocation::Placed
                    && symbol.targeted_by.is_none()
            })
            .map(|symbol| symbol.key)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let value = self.advance_rng();
        let index = (value % candidates.len() as u64) as usize;
        Some(candidates[index])
    }

    fn advance_rng(&mut self) -> u64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(RNG_MULTIPLIER)
            .wrapping_add(RNG_INCREMENT);
        self.rng_state
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Stage {
    due: Duration,
    seq: u64,
    epoch: Epoch,
    worm: WormId,
    kind: StageKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum StageKind {
    SelectTarget,
    BeginTransport { key: SymbolKey },
    TransportTick { key: SymbolKey },
}

#[cfg(test)]
mod tests {
    use super::{Config, ThreatManager};
    use std::time::Duration;
    use symbol_siege_core::{
        Command, Epoch, Event, SymbolKey, SymbolLocation, SymbolSnapshot, SymbolView,
        TransportProgress, WormBehavior, WormId, WormSnapshot, WormView,
    };

    fn config() -> Config {
        Config::new(
            Duration::from_secs(3),
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_millis(500),
            7,
        )
    }

    fn placed(step: u32, index: u32) -> SymbolSnapshot {
        SymbolSnapshot {
            key: SymbolKey::new(step, index),
            ch: 'x',
            placeholder: false,
            occurrence: 1,
            location: SymbolLocation::Placed,
            glyph: None,
            targeted_by: None,
        }
    }

    fn worm(id: u32, behavior: WormBehavior, target: Option<SymbolKey>) -> WormSnapshot {
        WormSnapshot {
            id: WormId::new(id),
            behavior,
            target,
            transport: None,
        }
    }

    fn loaded(epoch: u64) -> Event {
        Event::ProblemLoaded {
            epoch: Epoch::new(epoch),
            step_count: 2,
        }
    }

    fn tick(secs: u64) -> Event {
        Event::TimeAdvanced {
            dt: Duration::from_secs(secs),
        }
    }

    #[test]
    fn problem_load_requests_the_initial_worm_pair() {
        let mut threat = ThreatManager::new(config());
        let mut out = Vec::new();
        threat.handle(
            &[loaded(1)],
            &WormView::default(),
            &SymbolView::default(),
            &mut out,
        );
        assert_eq!(out, vec![Command::SpawnWorm, Command::SpawnWorm]);
    }

    #[test]
    fn wandering_worm_selects_a_target_after_the_wander_delay() {
        let mut threat = ThreatManager::new(config());
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Wandering, None)]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0), placed(0, 2)]);

        let mut out = Vec::new();
        threat.handle(
            &[loaded(1), Event::WormSpawned { worm: WormId::new(0) }],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        threat.handle(&[tick(2)], &worms, &symbols, &mut out);
        assert!(out.is_empty(), "wander delay has not elapsed");

        threat.handle(&[tick(1)], &worms, &symbols, &mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            Command::TargetSymbol { worm, .. } if worm == WormId::new(0)
        ));
    }

    #[test]
    fn selection_with_empty_board_is_rescheduled() {
        let mut threat = ThreatManager::new(config());
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Wandering, None)]);

        let mut out = Vec::new();
        threat.handle(
            &[loaded(1), Event::WormSpawned { worm: WormId::new(0) }],
            &worms,
            &SymbolView::default(),
            &mut out,
        );
        out.clear();

        threat.handle(&[tick(3)], &worms, &SymbolView::default(), &mut out);
        assert!(out.is_empty());
        assert_eq!(threat.pending_stages(), 1, "retry stage must be queued");

        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);
        threat.handle(&[tick(1)], &worms, &symbols, &mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Command::TargetSymbol { .. }));
    }

    #[test]
    fn lost_targeting_race_retries_after_the_retry_delay() {
        let mut threat = ThreatManager::new(config());
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Wandering, None)]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);

        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::TargetUnavailable {
                    worm: WormId::new(0),
                    key: SymbolKey::new(0, 0),
                },
            ],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        threat.handle(&[tick(1)], &worms, &symbols, &mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Command::TargetSymbol { .. }));
    }

    #[test]
    fn hunting_worm_begins_transport_after_the_approach() {
        let mut threat = ThreatManager::new(config());
        let key = SymbolKey::new(0, 0);
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Hunting, Some(key))]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);

        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::SymbolTargeted {
                    worm: WormId::new(0),
                    symbol: placed(0, 0),
                },
            ],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        threat.handle(&[tick(2)], &worms, &symbols, &mut out);
        assert_eq!(
            out,
            vec![Command::BeginTransport {
                worm: WormId::new(0),
                key,
            }]
        );
    }

    #[test]
    fn transport_ticks_follow_the_configured_cadence() {
        let mut threat = ThreatManager::new(config());
        let key = SymbolKey::new(0, 0);
        let mut worms =
            WormView::from_snapshots(vec![worm(0, WormBehavior::Transporting, Some(key))]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);

        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::TransportStarted {
                    worm: WormId::new(0),
                    symbol: placed(0, 0),
                },
            ],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        threat.handle(
            &[Event::TimeAdvanced {
                dt: Duration::from_millis(500),
            }],
            &worms,
            &symbols,
            &mut out,
        );
        assert_eq!(
            out,
            vec![Command::AdvanceTransport {
                worm: WormId::new(0),
                key,
            }]
        );
        out.clear();

        // The world reports the advance; the next tick is scheduled from it.
        worms = WormView::from_snapshots(vec![WormSnapshot {
            id: WormId::new(0),
            behavior: WormBehavior::Transporting,
            target: Some(key),
            transport: Some(TransportProgress::new(1, 8)),
        }]);
        threat.handle(
            &[Event::TransportAdvanced {
                worm: WormId::new(0),
                key,
                progress: TransportProgress::new(1, 8),
            }],
            &worms,
            &symbols,
            &mut out,
        );
        assert!(out.is_empty());

        threat.handle(
            &[Event::TimeAdvanced {
                dt: Duration::from_millis(500),
            }],
            &worms,
            &symbols,
            &mut out,
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn stages_from_a_previous_epoch_are_dropped() {
        let mut threat = ThreatManager::new(config());
        let key = SymbolKey::new(0, 0);
        let worms =
            WormView::from_snapshots(vec![worm(0, WormBehavior::Transporting, Some(key))]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);

        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::TransportStarted {
                    worm: WormId::new(0),
                    symbol: placed(0, 0),
                },
            ],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        // A reload clears the queue; even a surviving stage would be stale.
        threat.handle(&[loaded(2)], &WormView::default(), &SymbolView::default(), &mut out);
        out.clear();
        threat.handle(
            &[tick(10)],
            &WormView::default(),
            &SymbolView::default(),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn stages_for_dead_worms_are_dropped() {
        let mut threat = ThreatManager::new(config());
        let key = SymbolKey::new(0, 0);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Hunting, Some(key))]);

        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::SymbolTargeted {
                    worm: WormId::new(0),
                    symbol: placed(0, 0),
                },
            ],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        // The rescue killed the worm before its approach completed.
        threat.handle(
            &[
                Event::WormKilled {
                    worm: WormId::new(0),
                },
                tick(2),
            ],
            &WormView::default(),
            &symbols,
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn stages_that_disagree_with_the_worm_target_are_dropped() {
        let mut threat = ThreatManager::new(config());
        let stale = SymbolKey::new(0, 0);
        let current = SymbolKey::new(0, 2);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0), placed(0, 2)]);

        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::SymbolTargeted {
                    worm: WormId::new(0),
                    symbol: placed(0, 0),
                },
            ],
            &WormView::from_snapshots(vec![worm(0, WormBehavior::Hunting, Some(stale))]),
            &symbols,
            &mut out,
        );
        out.clear();

        // By the time the stage is due the worm hunts a different symbol.
        threat.handle(
            &[tick(2)],
            &WormView::from_snapshots(vec![worm(0, WormBehavior::Hunting, Some(current))]),
            &symbols,
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn step_completion_spawns_a_reinforcement_and_boosts_cadence() {
        let mut threat = ThreatManager::new(config());
        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::WormSpawned { worm: WormId::new(0) },
                Event::WormSpawned { worm: WormId::new(1) },
                Event::StepCompleted { step: 0 },
            ],
            &WormView::default(),
            &SymbolView::default(),
            &mut out,
        );
        let spawns = out
            .iter()
            .filter(|command| matches!(command, Command::SpawnWorm))
            .count();
        assert_eq!(spawns, 3, "two initial worms plus one reinforcement");

        // Boosted wander delay: 3s / 1.35 elapses before the plain 3s would.
        out.clear();
        let worms = WormView::from_snapshots(vec![
            worm(0, WormBehavior::Wandering, None),
            worm(1, WormBehavior::Wandering, None),
            worm(2, WormBehavior::Wandering, None),
        ]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0), placed(0, 2)]);
        threat.handle(
            &[
                Event::WormSpawned { worm: WormId::new(2) },
                Event::TimeAdvanced {
                    dt: Duration::from_millis(2300),
                },
            ],
            &worms,
            &symbols,
            &mut out,
        );
        let selections = out
            .iter()
            .filter(|command| matches!(command, Command::TargetSymbol { worm, .. } if *worm == WormId::new(2)))
            .count();
        assert_eq!(selections, 1);
    }

    #[test]
    fn reinforcements_respect_the_population_cap() {
        let mut threat = ThreatManager::new(config().with_population(2, 2));
        let mut out = Vec::new();
        threat.handle(
            &[
                loaded(1),
                Event::WormSpawned { worm: WormId::new(0) },
                Event::WormSpawned { worm: WormId::new(1) },
                Event::StepCompleted { step: 0 },
            ],
            &WormView::default(),
            &SymbolView::default(),
            &mut out,
        );
        let spawns = out
            .iter()
            .filter(|command| matches!(command, Command::SpawnWorm))
            .count();
        assert_eq!(spawns, 2, "the cap blocks the reinforcement");
    }

    #[test]
    fn solved_problem_parks_the_threat() {
        let mut threat = ThreatManager::new(config());
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Wandering, None)]);
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0)]);

        let mut out = Vec::new();
        threat.handle(
            &[loaded(1), Event::WormSpawned { worm: WormId::new(0) }],
            &worms,
            &symbols,
            &mut out,
        );
        out.clear();

        threat.handle(&[Event::ProblemSolved], &worms, &symbols, &mut out);
        assert_eq!(threat.pending_stages(), 0);

        threat.handle(&[tick(60)], &worms, &symbols, &mut out);
        assert!(out.is_empty(), "a dormant threat never emits commands");
    }

    #[test]
    fn target_selection_is_deterministic_for_a_fixed_seed() {
        let symbols = SymbolView::from_snapshots(vec![placed(0, 0), placed(0, 2), placed(0, 4)]);
        let worms = WormView::from_snapshots(vec![worm(0, WormBehavior::Wandering, None)]);
        let script = [
            loaded(1),
            Event::WormSpawned { worm: WormId::new(0) },
            tick(3),
        ];

        let mut first = Vec::new();
        ThreatManager::new(config()).handle(&script, &worms, &symbols, &mut first);
        let mut second = Vec::new();
        ThreatManager::new(config()).handle(&script, &worms, &symbols, &mut second);
        assert_eq!(first, second);
    }
}

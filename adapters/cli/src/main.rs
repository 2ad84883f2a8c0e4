#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs a scripted Symbol Siege session.
//!
//! A seeded bot plays in the player's place: it reveals solution characters,
//! re-supplies stolen ones, and gambles on rescues while the worms do their
//! work. Every run narrates the event stream to stdout and finishes by
//! printing an encoded progress string that a later run can resume from.

mod progress_transfer;

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use rand::{Rng as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use symbol_siege_core::{
    Event, ProblemSource, ProblemStep, SymbolKey, SymbolLocation, WormBehavior,
};
use symbol_siege_system_session::Session;
use symbol_siege_surface::CanvasSurface;
use symbol_siege_system_threat::Config as ThreatConfig;

use crate::progress_transfer::ProgressSnapshot;

/// Command-line arguments accepted by the Symbol Siege demo.
#[derive(Debug, Parser)]
#[command(name = "symbol-siege", about = "Scripted Symbol Siege session")]
struct Args {
    /// Solution step text; repeat the flag once per step.
    #[arg(long = "step")]
    steps: Vec<String>,

    /// Seed shared by the bot and the worm timelines.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Maximum number of simulation ticks before the run stops.
    #[arg(long, default_value_t = 480)]
    ticks: u32,

    /// Simulated milliseconds per tick.
    #[arg(long, default_value_t = 250)]
    tick_ms: u64,

    /// Encoded progress string from a previous run to resume from.
    #[arg(long)]
    resume: Option<String>,
}

/// Entry point for the Symbol Siege command-line interface.
fn main() -> Result<()> {
    env_logger::init();
    run(Args::parse())
}

fn run(args: Args) -> Result<()> {
    let threat_config = ThreatConfig::new(
        Duration::from_secs(2),
        Duration::from_millis(750),
        Duration::from_secs(2),
        Duration::from_millis(400),
        args.seed,
    );
    let mut session = Session::new(CanvasSurface::new(), CanvasSurface::new(), threat_config);
    log::info!("bot seeded with {} for {} ticks", args.seed, args.ticks);
    println!("{}", session.welcome_banner());

    let resumed = args
        .resume
        .as_deref()
        .map(|value| {
            ProgressSnapshot::decode(value).with_context(|| {
                format!(
                    "expected a '{}' progress string",
                    progress_transfer::SNAPSHOT_HEADER
                )
            })
        })
        .transpose()?;

    let steps = match &resumed {
        Some(snapshot) => snapshot.steps.clone(),
        None if args.steps.is_empty() => {
            vec!["x + 5 = 12".to_owned(), "x = 7".to_owned()]
        }
        None => args.steps.clone(),
    };
    let problem = TextProblem(steps.clone());
    session.load_problem(&problem)?;
    narrate(&session.drain_events());

    if let Some(snapshot) = &resumed {
        // Keys sort step-first, so replaying in order re-opens each gate.
        let mut revealed = snapshot.revealed.clone();
        revealed.sort();
        for key in revealed {
            session.reveal(key)?;
        }
        narrate(&session.drain_events());
        println!(
            "resumed at step {} of {}",
            session.active_step() + 1,
            steps.len()
        );
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    for _ in 0..args.ticks {
        session.tick(Duration::from_millis(args.tick_ms))?;
        narrate(&session.drain_events());

        if rng.gen_bool(0.35) {
            if let Some(key) = next_reveal(&session) {
                session.reveal(key)?;
                narrate(&session.drain_events());
            }
        }

        let hunts: Vec<_> = session
            .worms()
            .iter()
            .filter(|worm| worm.behavior == WormBehavior::Hunting)
            .filter_map(|worm| worm.target.map(|key| (worm.id, key)))
            .collect();
        for (worm, key) in hunts {
            if rng.gen_bool(0.5) {
                let rescued = session.attempt_rescue(worm, key)?;
                if rescued {
                    println!("! rescued ({}, {})", key.step(), key.index());
                } else {
                    println!("! rescue of ({}, {}) failed", key.step(), key.index());
                }
                narrate(&session.drain_events());
            }
        }

        if session.is_solved() {
            break;
        }
    }

    if session.is_solved() {
        println!("problem solved");
    } else {
        println!("time ran out");
    }

    let progress = capture_progress(&session, &steps);
    println!("resume with: {}", progress.encode());
    Ok(())
}

/// Picks the bot's next reveal: stolen symbols first, then the lowest hidden
/// symbol of the active step.
fn next_reveal(session: &Session<CanvasSurface>) -> Option<SymbolKey> {
    let symbols = session.symbols();
    if let Some(stolen) = symbols
        .iter()
        .find(|symbol| symbol.location == SymbolLocation::Stolen)
    {
        return Some(stolen.key);
    }
    let active = session.active_step();
    let next = symbols
        .iter()
        .find(|symbol| {
            symbol.key.step() == active
                && !symbol.placeholder
                && symbol.location == SymbolLocation::Hidden
        })
        .map(|symbol| symbol.key);
    next
}

fn capture_progress(session: &Session<CanvasSurface>, steps: &[String]) -> ProgressSnapshot {
    let symbols = session.symbols();
    let revealed = symbols
        .iter()
        .filter(|symbol| !symbol.placeholder && symbol.location != SymbolLocation::Hidden)
        .map(|symbol| symbol.key)
        .collect();
    ProgressSnapshot {
        step_count: u32::try_from(steps.len()).unwrap_or(u32::MAX),
        active_step: session.active_step(),
        steps: steps.to_vec(),
        revealed,
    }
}

fn narrate(events: &[Event]) {
    for event in events {
        match event {
            Event::ProblemLoaded { step_count, .. } => {
                println!("problem loaded with {step_count} steps");
            }
            Event::SymbolRevealed { symbol } => {
                println!(
                    "+ '{}' placed at ({}, {})",
                    symbol.ch,
                    symbol.key.step(),
                    symbol.key.index()
                );
            }
            Event::StepCompleted { step } => println!("step {} complete", step + 1),
            Event::ProblemSolved => println!("every symbol is home"),
            Event::WormSpawned { worm } => println!("worm {} emerges", worm.get()),
            Event::SymbolTargeted { worm, symbol } => {
                println!(
                    "worm {} eyes '{}' at ({}, {})",
                    worm.get(),
                    symbol.ch,
                    symbol.key.step(),
                    symbol.key.index()
                );
            }
            Event::TransportStarted { worm, symbol } => {
                println!("worm {} grabs '{}'", worm.get(), symbol.ch);
            }
            Event::SymbolStolen { worm, symbol } => {
                println!("worm {} made off with '{}'", worm.get(), symbol.ch);
            }
            Event::SymbolReclaimed { symbol } => {
                println!("'{}' wrestled back onto the board", symbol.ch);
            }
            Event::WormKilled { worm } => println!("worm {} destroyed", worm.get()),
            _ => {}
        }
    }
}

/// Problem whose steps come from literal text lines.
#[derive(Clone, Debug)]
struct TextProblem(Vec<String>);

impl ProblemSource for TextProblem {
    fn step_count(&self) -> usize {
        self.0.len()
    }

    fn step(&self, index: usize) -> ProblemStep {
        ProblemStep::from_text(&self.0[index])
    }
}

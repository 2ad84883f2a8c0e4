#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Symbol Siege engine.
//!
//! This crate defines the message surface that connects adapters, the
//! authoritative world, and pure systems. Adapters and systems submit
//! [`Command`] values describing desired mutations, the world executes those
//! commands via its `apply` entry point, and then broadcasts [`Event`] values
//! for systems to react to deterministically. Systems consume event streams,
//! query immutable snapshots, and respond exclusively with new command
//! batches.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical banner emitted when the experience boots.
pub const WELCOME_BANNER: &str = "Welcome to Symbol Siege.";

/// Position of one solution character, keyed by step and column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    step: u32,
    index: u32,
}

impl SymbolKey {
    /// Creates a new symbol key for the provided step and character index.
    #[must_use]
    pub const fn new(step: u32, index: u32) -> Self {
        Self { step, index }
    }

    /// Zero-based solution step that contains the character.
    #[must_use]
    pub const fn step(&self) -> u32 {
        self.step
    }

    /// Zero-based character index within the step.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

/// Unique identifier assigned to a worm for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WormId(u32);

impl WormId {
    /// Creates a new worm identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Generation counter bumped once per problem load.
///
/// Every scheduled timeline stage captures the epoch active at schedule
/// time; a stage whose captured epoch no longer matches the current one must
/// become a silent no-op. This is the mechanism that makes mid-flight worm
/// timelines safe across level transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epoch(u64);

impl Epoch {
    /// Epoch value before the first problem has been loaded.
    pub const ZERO: Self = Self(0);

    /// Creates an epoch with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the epoch.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Returns the epoch that follows this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Opaque handle to a glyph owned by a render surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlyphHandle(u64);

impl GlyphHandle {
    /// Creates a glyph handle with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the handle.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// The two independent rendering surfaces a symbol can appear on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Surface {
    /// The solution board where revealed characters live.
    Board,
    /// The theft surface where stolen characters rematerialize.
    Theft,
}

/// Where a solution character currently lives.
///
/// Transitions are only legal along the closed edge set enforced by the
/// world's registry: Hidden→Placed, Placed→Targeted, Targeted→InTransit,
/// Targeted→Reclaimed, Reclaimed→Placed, InTransit→Stolen. `Stolen` is
/// terminal for an occurrence; re-supplying the character re-enters `Placed`
/// as a fresh occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolLocation {
    /// Not yet revealed by the player.
    Hidden,
    /// Revealed and resting on the board surface.
    Placed,
    /// A worm has declared intent to steal this symbol.
    Targeted,
    /// Physical transport toward the theft surface is underway.
    InTransit,
    /// The theft completed; terminal for this occurrence.
    Stolen,
    /// Transient state during a successful rescue; never observable.
    Reclaimed,
}

/// Behavior state of a worm agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WormBehavior {
    /// Roaming without a target.
    Wandering,
    /// Approaching a targeted symbol.
    Hunting,
    /// Carrying a symbol toward the theft surface.
    Transporting,
    /// Parked; the problem has been solved.
    Idle,
}

/// Discrete progress along an active transport timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportProgress {
    completed: u8,
    total: u8,
}

impl TransportProgress {
    /// Creates a progress marker from completed and total tick counts.
    #[must_use]
    pub const fn new(completed: u8, total: u8) -> Self {
        Self { completed, total }
    }

    /// Number of transport ticks already executed.
    #[must_use]
    pub const fn completed(&self) -> u8 {
        self.completed
    }

    /// Total number of ticks the transport requires.
    #[must_use]
    pub const fn total(&self) -> u8 {
        self.total
    }

    /// Reports whether the final tick has executed.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.completed >= self.total
    }

    /// Normalized 0..1 position along the transport timeline.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        f32::from(self.completed) / f32::from(self.total)
    }
}

/// Point on a render surface expressed in surface units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphPoint {
    x: f32,
    y: f32,
}

impl GlyphPoint {
    /// Creates a new point from surface coordinates.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Horizontal coordinate in surface units.
    #[must_use]
    pub const fn x(&self) -> f32 {
        self.x
    }

    /// Vertical coordinate in surface units.
    #[must_use]
    pub const fn y(&self) -> f32 {
        self.y
    }
}

/// Axis-aligned rectangle on a render surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphRect {
    min: GlyphPoint,
    max: GlyphPoint,
}

impl GlyphRect {
    /// Constructs a rectangle from its minimum and maximum corners.
    #[must_use]
    pub const fn new(min: GlyphPoint, max: GlyphPoint) -> Self {
        Self { min, max }
    }

    /// Upper-left corner of the rectangle.
    #[must_use]
    pub const fn min(&self) -> GlyphPoint {
        self.min
    }

    /// Lower-right corner of the rectangle.
    #[must_use]
    pub const fn max(&self) -> GlyphPoint {
        self.max
    }
}

/// Non-owning reference to the glyph currently displaying a symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlyphRef {
    /// Surface that owns the glyph.
    pub surface: Surface,
    /// Handle of the glyph on that surface.
    pub handle: GlyphHandle,
}

/// One line of the solution text, with whitespace marked as placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProblemStep {
    chars: Vec<ProblemChar>,
}

impl ProblemStep {
    /// Builds a step from its literal text; whitespace becomes placeholders.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self {
            chars: text
                .chars()
                .map(|ch| ProblemChar {
                    ch,
                    placeholder: ch.is_whitespace(),
                })
                .collect(),
        }
    }

    /// Ordered characters composing the step.
    #[must_use]
    pub fn chars(&self) -> &[ProblemChar] {
        &self.chars
    }

    /// Number of characters in the step, placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Reports whether the step contains no characters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

/// One character of a solution step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProblemChar {
    /// The literal character.
    pub ch: char,
    /// Placeholders never participate in the state machine.
    pub placeholder: bool,
}

/// Supplies the character universe a loaded problem instantiates.
pub trait ProblemSource {
    /// Number of solution steps in the problem.
    fn step_count(&self) -> usize;

    /// Retrieves the step at the provided index.
    fn step(&self, index: usize) -> ProblemStep;

    /// Collects every step in order.
    fn steps(&self) -> Vec<ProblemStep> {
        (0..self.step_count()).map(|index| self.step(index)).collect()
    }
}

/// Commands that express all permissible world mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Discards the previous epoch wholesale and instantiates a new problem.
    LoadProblem {
        /// Ordered solution steps of the new problem.
        steps: Vec<ProblemStep>,
    },
    /// Advances the simulation clock by the provided delta time.
    Tick {
        /// Duration of simulated time that elapsed since the previous tick.
        dt: Duration,
    },
    /// Requests that the player reveal (or re-supply) a symbol.
    Reveal {
        /// Symbol the player acted on.
        key: SymbolKey,
    },
    /// Requests that a new worm join the active worm set.
    SpawnWorm,
    /// Requests that a worm declare intent to steal a placed symbol.
    TargetSymbol {
        /// Worm attempting to acquire the target.
        worm: WormId,
        /// Symbol the worm wants to steal.
        key: SymbolKey,
    },
    /// Requests that a hunting worm begin physically transporting its target.
    BeginTransport {
        /// Worm that reached its target.
        worm: WormId,
        /// Symbol the worm is threatening.
        key: SymbolKey,
    },
    /// Advances an active transport timeline by one discrete tick.
    AdvanceTransport {
        /// Worm carrying the symbol.
        worm: WormId,
        /// Symbol in transit.
        key: SymbolKey,
    },
    /// Resolves a player rescue attempt against the live theft state.
    ResolveRescue {
        /// Worm the player is trying to stop.
        worm: WormId,
        /// Symbol the player is trying to save.
        key: SymbolKey,
    },
    /// Records a glyph materialized by the transport broker.
    AttachGlyph {
        /// Symbol the glyph displays.
        key: SymbolKey,
        /// Occurrence the glyph was produced for.
        occurrence: u32,
        /// Epoch captured when the migration was initiated.
        epoch: Epoch,
        /// Surface that owns the new glyph.
        surface: Surface,
        /// Handle of the new glyph.
        handle: GlyphHandle,
    },
}

/// Events broadcast by the world after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Announces that a new problem replaced the previous epoch.
    ProblemLoaded {
        /// Epoch assigned to the new problem.
        epoch: Epoch,
        /// Number of solution steps instantiated.
        step_count: u32,
    },
    /// Indicates that the simulation clock advanced.
    TimeAdvanced {
        /// Duration of simulated time that elapsed in the tick.
        dt: Duration,
    },
    /// Confirms that a symbol entered `Placed`, by reveal or re-supply.
    SymbolRevealed {
        /// Snapshot of the symbol after the transition.
        symbol: SymbolSnapshot,
    },
    /// Reports that a reveal request was rejected as a normal outcome.
    RevealRejected {
        /// Symbol the request named.
        key: SymbolKey,
        /// Specific reason the reveal did not happen.
        reason: RevealError,
    },
    /// Announces that a step has no remaining hidden characters.
    StepCompleted {
        /// Zero-based index of the completed step.
        step: u32,
    },
    /// Announces that every symbol of every step is placed.
    ProblemSolved,
    /// Confirms that a worm joined the active worm set.
    WormSpawned {
        /// Identifier assigned to the new worm.
        worm: WormId,
    },
    /// Announces that a worm declared intent to steal a symbol.
    SymbolTargeted {
        /// Worm that acquired the target.
        worm: WormId,
        /// Snapshot of the threatened symbol.
        symbol: SymbolSnapshot,
    },
    /// Reports that a targeting request lost the race for a symbol.
    TargetUnavailable {
        /// Worm whose request was declined.
        worm: WormId,
        /// Symbol the request named.
        key: SymbolKey,
    },
    /// Confirms that physical transport of a symbol began.
    TransportStarted {
        /// Worm carrying the symbol.
        worm: WormId,
        /// Snapshot of the symbol in transit.
        symbol: SymbolSnapshot,
    },
    /// Reports one discrete tick of an active transport timeline.
    TransportAdvanced {
        /// Worm carrying the symbol.
        worm: WormId,
        /// Symbol in transit.
        key: SymbolKey,
        /// Progress after the tick.
        progress: TransportProgress,
    },
    /// Reports that a transport timeline was invalidated mid-flight.
    TransportAborted {
        /// Worm whose timeline was abandoned.
        worm: WormId,
        /// Symbol the timeline referenced.
        key: SymbolKey,
    },
    /// Announces that a theft completed.
    SymbolStolen {
        /// Worm that completed the theft.
        worm: WormId,
        /// Snapshot of the stolen symbol.
        symbol: SymbolSnapshot,
    },
    /// Announces that a rescue returned a symbol to the board.
    SymbolReclaimed {
        /// Snapshot of the reclaimed symbol, already back in `Placed`.
        symbol: SymbolSnapshot,
    },
    /// Confirms that a worm left the active worm set.
    WormKilled {
        /// Identifier of the destroyed worm.
        worm: WormId,
    },
    /// Reports that a rescue attempt failed as a normal game outcome.
    RescueFailed {
        /// Worm the attempt named.
        worm: WormId,
        /// Symbol the attempt named.
        key: SymbolKey,
        /// Specific reason the rescue failed.
        reason: RescueError,
    },
    /// Confirms that a migrated glyph was recorded, exactly once.
    GlyphArrived {
        /// Symbol the glyph displays.
        key: SymbolKey,
        /// Surface that owns the glyph.
        surface: Surface,
    },
}

/// Reasons a reveal request may be declined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevealError {
    /// The key names no symbol in the current epoch.
    UnknownSymbol,
    /// The symbol belongs to a step that is not yet active.
    StepLocked,
}

/// Reasons a rescue attempt may fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RescueError {
    /// The worm no longer exists.
    WormGone,
    /// The worm is not threatening the named symbol.
    WrongSymbol,
    /// Physical transport already began; the rescue window has closed.
    TransportUnderway,
}

/// Errors raised by the world's registry when a command is malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The key names no symbol in the current epoch.
    #[error("unknown symbol ({step}, {index})", step = .key.step(), index = .key.index())]
    UnknownSymbol {
        /// Key that failed to resolve.
        key: SymbolKey,
    },
    /// The requested edge is not part of the location state machine.
    #[error("illegal transition {from:?} -> {to:?} for ({step}, {index})", step = .key.step(), index = .key.index())]
    Illegal {
        /// Symbol the transition named.
        key: SymbolKey,
        /// Location before the attempted transition.
        from: SymbolLocation,
        /// Location the transition requested.
        to: SymbolLocation,
    },
}

/// Raised by a render surface when a handle no longer exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("glyph {handle} no longer exists", handle = .0.get())]
pub struct ItemGone(pub GlyphHandle);

/// Drawing facility a surface adapter provides to the engine.
///
/// Two independent instances exist: the board surface and the theft surface.
/// Implementations own glyph lifetimes; the engine only ever holds handles.
pub trait RenderSurface {
    /// Materializes a glyph for the provided character.
    fn create_glyph(&mut self, ch: char, at: GlyphPoint) -> GlyphHandle;

    /// Moves an existing glyph to a new position.
    fn move_glyph(&mut self, handle: GlyphHandle, to: GlyphPoint) -> Result<(), ItemGone>;

    /// Deletes a glyph, releasing its handle.
    fn delete_glyph(&mut self, handle: GlyphHandle) -> Result<(), ItemGone>;

    /// Reports the bounding rectangle of a glyph.
    fn bounds_of(&self, handle: GlyphHandle) -> Result<GlyphRect, ItemGone>;

    /// Removes every glyph from the surface.
    fn clear(&mut self);
}

/// Immutable representation of a single symbol's state used for queries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SymbolSnapshot {
    /// Position of the symbol within the solution text.
    pub key: SymbolKey,
    /// The literal character.
    pub ch: char,
    /// Placeholders never participate in the state machine.
    pub placeholder: bool,
    /// Occurrence counter; bumped on re-supply after a theft.
    pub occurrence: u32,
    /// Where the symbol currently lives.
    pub location: SymbolLocation,
    /// Glyph currently displaying the symbol, if any.
    pub glyph: Option<GlyphRef>,
    /// Worm currently threatening the symbol, if any.
    pub targeted_by: Option<WormId>,
}

/// Read-only snapshot describing all symbols of the loaded problem.
#[derive(Clone, Debug, Default)]
pub struct SymbolView {
    snapshots: Vec<SymbolSnapshot>,
}

impl SymbolView {
    /// Creates a new symbol view from the provided snapshots.
    #[must_use]
    pub fn from_snapshots(mut snapshots: Vec<SymbolSnapshot>) -> Self {
        snapshots.sort_by_key(|snapshot| snapshot.key);
        Self { snapshots }
    }

    /// Iterator over the captured snapshots in deterministic key order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolSnapshot> {
        self.snapshots.iter()
    }

    /// Looks up the snapshot for the provided key.
    #[must_use]
    pub fn get(&self, key: SymbolKey) -> Option<&SymbolSnapshot> {
        self.snapshots
            .binary_search_by_key(&key, |snapshot| snapshot.key)
            .ok()
            .map(|index| &self.snapshots[index])
    }

    /// Consumes the view, yielding the underlying snapshots.
    #[must_use]
    pub fn into_vec(self) -> Vec<SymbolSnapshot> {
        self.snapshots
    }
}

/// Immutable representation of a single worm's state used for queries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WormSnapshot {
    /// Unique identifier assigned to the worm.
    pub id: WormId,
    /// Current behavior state.
    pub behavior: WormBehavior,
    /// Symbol the worm is threatening, if any.
    pub target: Option<SymbolKey>,
    /// Progress along the active transport, if one is underway.
    pub transport: Option<TransportProgress>,
}

/// Read-only snapshot describing the active worm set.
#[derive(Clone, Debug, Default)]
pub struct WormView {
    snapshots: Vec<WormSnapshot>,
}

impl WormView {
    /// Creates a new worm view from the provided snapshots.
    #[must_use]
    pub fn from_snapshots(mut snapshots: Vec<WormSnapshot>) -> Self {
        snapshots.sort_by_key(|snapshot| snapshot.id);
        Self { snapshots }
    }

    /// Iterator over the captured snapshots in deterministic id order.
    pub fn iter(&self) -> impl Iterator<Item = &WormSnapshot> {
        self.snapshots.iter()
    }

    /// Looks up the snapshot for the provided worm.
    #[must_use]
    pub fn get(&self, id: WormId) -> Option<&WormSnapshot> {
        self.snapshots
            .binary_search_by_key(&id, |snapshot| snapshot.id)
            .ok()
            .map(|index| &self.snapshots[index])
    }

    /// Number of worms captured by the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Reports whether the worm set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Consumes the view, yielding the underlying snapshots.
    #[must_use]
    pub fn into_vec(self) -> Vec<WormSnapshot> {
        self.snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Epoch, GlyphHandle, ProblemStep, RescueError, RevealError, SymbolKey, SymbolLocation,
        SymbolSnapshot, SymbolView, Surface, TransportProgress, WormId,
    };
    use serde::{de::DeserializeOwned, Serialize};

    fn assert_round_trip<T>(value: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let bytes = bincode::serialize(value).expect("serialize");
        let restored: T = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(&restored, value);
    }

    #[test]
    fn symbol_key_round_trips_through_bincode() {
        assert_round_trip(&SymbolKey::new(3, 11));
    }

    #[test]
    fn worm_id_round_trips_through_bincode() {
        assert_round_trip(&WormId::new(42));
    }

    #[test]
    fn epoch_round_trips_through_bincode() {
        assert_round_trip(&Epoch::new(7));
    }

    #[test]
    fn glyph_handle_round_trips_through_bincode() {
        assert_round_trip(&GlyphHandle::new(99));
    }

    #[test]
    fn location_and_errors_round_trip_through_bincode() {
        assert_round_trip(&SymbolLocation::InTransit);
        assert_round_trip(&Surface::Theft);
        assert_round_trip(&RevealError::StepLocked);
        assert_round_trip(&RescueError::TransportUnderway);
    }

    #[test]
    fn epoch_next_is_monotonic() {
        let epoch = Epoch::new(5);
        assert!(epoch.next() > epoch);
        assert_eq!(epoch.next().get(), 6);
    }

    #[test]
    fn problem_step_marks_whitespace_as_placeholder() {
        let step = ProblemStep::from_text("x + 5 = 12");
        let placeholders: Vec<bool> = step.chars().iter().map(|c| c.placeholder).collect();
        assert_eq!(
            placeholders,
            vec![false, true, false, true, false, true, false, true, false, false]
        );
        assert_eq!(step.len(), 10);
    }

    #[test]
    fn transport_progress_fraction_is_normalized() {
        let progress = TransportProgress::new(3, 8);
        assert!((progress.fraction() - 0.375).abs() < f32::EPSILON);
        assert!(!progress.is_final());
        assert!(TransportProgress::new(8, 8).is_final());
        assert!((TransportProgress::new(0, 0).fraction() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn symbol_view_sorts_and_resolves_keys() {
        let snapshot = |step, index| SymbolSnapshot {
            key: SymbolKey::new(step, index),
            ch: 'x',
            placeholder: false,
            occurrence: 1,
            location: SymbolLocation::Hidden,
            glyph: None,
            targeted_by: None,
        };
        let view = SymbolView::from_snapshots(vec![snapshot(1, 0), snapshot(0, 2), snapshot(0, 0)]);
        let keys: Vec<SymbolKey> = view.iter().map(|s| s.key).collect();
        assert_eq!(
            keys,
            vec![
                SymbolKey::new(0, 0),
                SymbolKey::new(0, 2),
                SymbolKey::new(1, 0)
            ]
        );
        assert!(view.get(SymbolKey::new(0, 2)).is_some());
        assert!(view.get(SymbolKey::new(2, 0)).is_none());
    }
}

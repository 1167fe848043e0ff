//! Abstract sources: where a stack value came from.
//!
//! A [`Source`] marks the provenance of a value on the analyser's abstract
//! stack — a constant, a named local, an intermediate produced by some
//! opcode, or the merge of several sources at a branch target. Sources
//! carry the bookkeeping the instruction graph and the bytecode-to-IL
//! driver need: has this value *escaped* (been observed by an operation
//! that forces a boxed representation), and which opcodes *consume* it.
//!
//! Sources are handles into an arena owned by the analyser (see
//! `crate::bytecode::analyzer::Analyzer`), not a pointer graph: merges hold
//! a sorted list of handles rather than back-pointers into values, so the
//! arena can be dropped as one unit when the analyser is dropped.

use ahash::AHashMap;

/// Arena handle for a [`Source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u32);

impl SourceId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a value on the abstract stack came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A literal from the code object's constant pool.
    Constant,
    /// The current value of a named local at the point it was loaded.
    Local(u16),
    /// An intermediate value produced by the opcode at this bytecode index.
    Opcode(usize),
    /// The merge of two or more sources at a branch target; handles are
    /// kept in ascending order so merge results compare structurally.
    Merge(Vec<SourceId>),
    /// Synthesized stack content with no traceable producer (e.g. the
    /// exception triple pushed at a handler's entry point).
    Synthetic,
}

/// A single stack slot's provenance record.
///
/// `consumers` maps an opcode index that pops this source off the stack to
/// the stack depth (from the top, 0-based) at which it was consumed — the
/// instruction graph needs this to assign edge positions.
#[derive(Debug, Clone)]
pub struct Source {
    origin: Origin,
    escaped: bool,
    consumers: AHashMap<usize, u16>,
}

impl Source {
    #[must_use]
    fn new(origin: Origin) -> Self {
        Self {
            origin,
            escaped: false,
            consumers: AHashMap::default(),
        }
    }

    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    #[must_use]
    pub const fn has_escaped(&self) -> bool {
        self.escaped
    }

    /// Marks this source as observed by an operation that forces a boxed
    /// representation. Escape is monotonic: once set it is never cleared.
    pub fn mark_escaped(&mut self) {
        self.escaped = true;
    }

    pub fn record_consumer(&mut self, consumer_pc: usize, stack_position: u16) {
        self.consumers.insert(consumer_pc, stack_position);
    }

    #[must_use]
    pub fn consumed_position(&self, consumer_pc: usize) -> Option<u16> {
        self.consumers.get(&consumer_pc).copied()
    }

    #[must_use]
    pub fn consumers(&self) -> impl Iterator<Item = (usize, u16)> + '_ {
        self.consumers.iter().map(|(&pc, &pos)| (pc, pos))
    }
}

/// Owns all sources created during one analysis run.
///
/// Freed as a unit when the analyser is dropped; the instruction graph only
/// ever borrows an immutable view of this arena.
#[derive(Debug, Clone, Default)]
pub struct SourceArena {
    sources: Vec<Source>,
}

impl SourceArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, origin: Origin) -> SourceId {
        let id = SourceId(u32::try_from(self.sources.len()).expect("source arena overflow"));
        self.sources.push(Source::new(origin));
        id
    }

    /// Allocates the merge of `sources`, deduplicating and sorting handles
    /// so that merging the same set of sources in any order yields an
    /// equal-looking `Origin::Merge`.
    pub fn alloc_merge(&mut self, mut sources: Vec<SourceId>) -> SourceId {
        sources.sort_unstable();
        sources.dedup();
        if sources.len() == 1 {
            return sources[0];
        }
        self.alloc(Origin::Merge(sources))
    }

    #[must_use]
    pub fn get(&self, id: SourceId) -> &Source {
        &self.sources[id.index()]
    }

    pub fn get_mut(&mut self, id: SourceId) -> &mut Source {
        &mut self.sources[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterates every handle allocated in this arena, in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        (0..self.sources.len()).map(|i| SourceId(u32::try_from(i).expect("source arena overflow")))
    }
}

/// A value on the analyser's stack, paired with its provenance.
///
/// `source` is `None` only for synthesized stack pushes that are never
/// observed by a later opcode (the spec's escape hatch for pushes that
/// exist purely to keep stack depth consistent).
#[derive(Debug, Clone, Copy)]
pub struct ValueWithSource {
    pub value: crate::value::AbstractValue,
    pub source: Option<SourceId>,
}

impl ValueWithSource {
    #[must_use]
    pub const fn new(value: crate::value::AbstractValue, source: SourceId) -> Self {
        Self { value, source: Some(source) }
    }

    #[must_use]
    pub const fn synthesized(value: crate::value::AbstractValue) -> Self {
        Self { value, source: None }
    }
}

//! Compile-time block stack and exception-handler tree.
//!
//! Mirrors the bytecode verifier's runtime block stack: a LIFO of lexical
//! protected regions (loops, try, except, finally) that both the analyser
//! (for preprocessing block starts and break targets) and the driver (for
//! raise-and-free tails) maintain in lockstep with emission order.

use smallvec::SmallVec;

/// Arena handle for an [`ExceptionHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u32);

/// Kind of lexical protected region on the block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    Try,
    Except,
    Finally,
}

/// Flags carried by a [`BlockInfo`]; kept as a small bitset rather than
/// several bool fields since the driver tests combinations of these
/// together when deciding break/continue targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFlags(u8);

impl BlockFlags {
    pub const HAS_HANDLER: Self = Self(0b001);
    pub const IS_LOOP_BODY: Self = Self(0b010);
    pub const FINALLY_PENDING: Self = Self(0b100);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A single entry on the compile-time block stack.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub end_offset: usize,
    pub kind: BlockKind,
    pub continue_offset: Option<usize>,
    pub current_handler: Option<HandlerId>,
    pub flags: BlockFlags,
}

/// LIFO block stack. Popping a `Try` block transforms it into its handler
/// block in place (entry to the handler body), per spec §4.5.
#[derive(Debug, Clone, Default)]
pub struct BlockStack {
    blocks: SmallVec<[BlockInfo; 8]>,
}

/// Raised when the block stack is popped more times than pushed, or a
/// `BREAK_LOOP`/`CONTINUE_LOOP` targets a block that isn't on the stack —
/// both are broken block nesting, a `CompileError::Malformed` case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokenBlockNesting;

impl BlockStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn push(&mut self, block: BlockInfo) {
        self.blocks.push(block);
    }

    pub fn pop(&mut self) -> Result<BlockInfo, BrokenBlockNesting> {
        self.blocks.pop().ok_or(BrokenBlockNesting)
    }

    /// `POP_BLOCK`: pops the top block; if it was a `Try`, pushes back a
    /// transformed `Except` block entering the handler body, carrying the
    /// same handler id forward.
    pub fn pop_block(&mut self) -> Result<BlockInfo, BrokenBlockNesting> {
        let popped = self.pop()?;
        if popped.kind == BlockKind::Try {
            self.blocks.push(BlockInfo { kind: BlockKind::Except, ..popped });
        }
        Ok(popped)
    }

    #[must_use]
    pub fn top(&self) -> Option<&BlockInfo> {
        self.blocks.last()
    }

    /// Blocks from the top of the stack down to and including the nearest
    /// enclosing `Loop` block, used by `BREAK_LOOP`/`CONTINUE_LOOP` to know
    /// which for-iter locals must be freed before branching.
    #[must_use]
    pub fn blocks_to_nearest_loop(&self) -> &[BlockInfo] {
        let Some(loop_index) = self.blocks.iter().rposition(|b| b.kind == BlockKind::Loop) else {
            return &[];
        };
        &self.blocks[loop_index..]
    }

    #[must_use]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &BlockInfo> {
        self.blocks.iter()
    }
}

/// A per-depth raise-and-free label chain: one label per live stack depth
/// at which a raise could occur inside this handler's protected region.
/// Jumping into `labels[k]` frees `k` live stack entries (in reverse push
/// order) before falling through into the handler body.
#[derive(Debug, Clone, Default)]
pub struct RaiseAndFreeTails {
    /// `labels[depth]` is the entry point for a raise with `depth` live
    /// stack entries above the handler's base.
    labels: Vec<crate::il::emitter::Label>,
}

impl RaiseAndFreeTails {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_depth(&mut self, depth: usize, mut make_label: impl FnMut() -> crate::il::emitter::Label) {
        while self.labels.len() <= depth {
            self.labels.push(make_label());
        }
    }

    #[must_use]
    pub fn label_for_depth(&self, depth: usize) -> Option<crate::il::emitter::Label> {
        self.labels.get(depth).copied()
    }

    /// How many depth-indexed links of this chain have been built so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Appends the next link in the chain; callers must push in ascending
    /// depth order since `label_for_depth` indexes positionally.
    pub fn push(&mut self, label: crate::il::emitter::Label) {
        self.labels.push(label);
    }
}

/// Node in the exception-handler tree, rooted at the function-level
/// (unhandled-exception) handler. One [`ExceptionHandler`] per
/// `SETUP_FINALLY`/`SETUP_EXCEPT`.
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    pub id: HandlerId,
    pub entry: crate::il::emitter::Label,
    pub raise_and_free: RaiseAndFreeTails,
    pub parent: Option<HandlerId>,
}

/// States for one handler's lifecycle (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Inactive,
    TryBody,
    InHandler,
    PostHandler,
}

impl HandlerState {
    #[must_use]
    pub const fn enter_try(self) -> Self {
        Self::TryBody
    }

    #[must_use]
    pub const fn raise_inside_try(self) -> Self {
        Self::InHandler
    }

    #[must_use]
    pub const fn exit_body_normally(self) -> Self {
        Self::PostHandler
    }

    #[must_use]
    pub const fn handler_end(self) -> Self {
        Self::Inactive
    }
}

/// Arena owning every handler created during one compile, plus the
/// function-level rethrow handler all unmatched raises ultimately target.
#[derive(Debug, Clone, Default)]
pub struct HandlerArena {
    handlers: Vec<ExceptionHandler>,
}

impl HandlerArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, entry: crate::il::emitter::Label, parent: Option<HandlerId>) -> HandlerId {
        let id = HandlerId(u32::try_from(self.handlers.len()).expect("handler arena overflow"));
        self.handlers.push(ExceptionHandler { id, entry, raise_and_free: RaiseAndFreeTails::new(), parent });
        id
    }

    #[must_use]
    pub fn get(&self, id: HandlerId) -> &ExceptionHandler {
        &self.handlers[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: HandlerId) -> &mut ExceptionHandler {
        &mut self.handlers[id.0 as usize]
    }

    #[must_use]
    pub fn parent_chain(&self, id: HandlerId) -> impl Iterator<Item = HandlerId> + '_ {
        let mut current = Some(id);
        std::iter::from_fn(move || {
            let id = current?;
            current = self.get(id).parent;
            Some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: BlockKind) -> BlockInfo {
        BlockInfo { end_offset: 0, kind, continue_offset: None, current_handler: None, flags: BlockFlags::empty() }
    }

    #[test]
    fn pop_block_transforms_try_into_handler() {
        let mut stack = BlockStack::new();
        stack.push(block(BlockKind::Try));
        let popped = stack.pop_block().unwrap();
        assert_eq!(popped.kind, BlockKind::Try);
        assert_eq!(stack.top().unwrap().kind, BlockKind::Except);
    }

    #[test]
    fn popping_empty_stack_is_broken_nesting() {
        let mut stack = BlockStack::new();
        assert_eq!(stack.pop_block(), Err(BrokenBlockNesting));
    }

    #[test]
    fn handler_state_machine_transitions() {
        let s = HandlerState::Inactive;
        let s = s.enter_try();
        assert_eq!(s, HandlerState::TryBody);
        let s = s.raise_inside_try();
        assert_eq!(s, HandlerState::InHandler);
    }
}

//! Reactive Context
//!
//! The reactive context tracks which node is currently being recomputed and
//! what it has read so far. This is what makes dependency discovery
//! automatic: when a node is read, the read is attributed to the node at
//! the top of the stack.
//!
//! # Implementation
//!
//! Each [`Runtime`] keeps one stack per OS thread. Evaluating a dirty node
//! pushes a frame for it, runs its producer and pops the frame again. A
//! producer that reads another dirty node simply nests a second frame on
//! top, so the stack grows and shrinks with the call stack.
//!
//! Popping is done by the [`ReactiveContext`] guard so a producer that
//! returns an error, or panics, can never leave a stale frame behind. A
//! frame dropped without being finished also gives back the subscriptions
//! its reads added.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::runtime::Runtime;
use crate::graph::NodeId;

/// An entry in the context stack: one producer invocation in flight.
#[derive(Debug, Clone)]
pub(crate) struct EvalFrame {
    /// The node whose producer is running.
    pub owner: NodeId,
    /// Nodes read by that producer so far, in read order.
    pub new_sources: IndexSet<NodeId>,
}

type Stack = SmallVec<[EvalFrame; 8]>;

/// Per-thread evaluation stacks belonging to one runtime.
#[derive(Debug, Default)]
pub(crate) struct ContextStacks {
    stacks: HashMap<ThreadId, Stack>,
}

impl ContextStacks {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack(&self) -> Option<&Stack> {
        self.stacks.get(&thread::current().id())
    }

    fn stack_mut(&mut self) -> Option<&mut Stack> {
        self.stacks.get_mut(&thread::current().id())
    }

    pub fn push(&mut self, owner: NodeId) {
        self.stacks
            .entry(thread::current().id())
            .or_default()
            .push(EvalFrame {
                owner,
                new_sources: IndexSet::new(),
            });
    }

    /// Pop the top frame of the current thread.
    pub fn pop(&mut self, owner: NodeId) -> Option<EvalFrame> {
        let thread = thread::current().id();
        let stack = self.stacks.get_mut(&thread)?;
        let frame = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(&thread);
        }

        // Verify we're popping the right frame.
        if let Some(frame) = &frame {
            debug_assert_eq!(
                frame.owner, owner,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                owner, frame.owner
            );
        }
        frame
    }

    /// The frame reads are currently attributed to, if any.
    pub fn current(&self) -> Option<&EvalFrame> {
        self.stack().and_then(|stack| stack.last())
    }

    /// Record that the current frame's owner read `source`.
    pub fn record(&mut self, source: NodeId) {
        if let Some(frame) = self.stack_mut().and_then(|stack| stack.last_mut()) {
            frame.new_sources.insert(source);
        }
    }

    /// Whether `id`'s producer is running anywhere on this thread's stack.
    pub fn is_evaluating(&self, id: NodeId) -> bool {
        self.stack()
            .map(|stack| stack.iter().any(|frame| frame.owner == id))
            .unwrap_or(false)
    }

    /// Number of frames on this thread's stack.
    pub fn depth(&self) -> usize {
        self.stack().map(|stack| stack.len()).unwrap_or(0)
    }
}

/// Guard that pops the evaluation frame when dropped.
///
/// This keeps the context stack balanced on every exit path of a producer,
/// including panics.
pub(crate) struct ReactiveContext<'rt> {
    runtime: &'rt Runtime,
    owner: NodeId,
    finished: bool,
}

impl<'rt> ReactiveContext<'rt> {
    /// Push a frame for `owner`. Reads made until the guard is finished or
    /// dropped are attributed to it.
    pub fn enter(runtime: &'rt Runtime, owner: NodeId) -> Self {
        runtime.push_frame(owner);
        Self {
            runtime,
            owner,
            finished: false,
        }
    }

    /// Pop the frame and return what the producer read.
    pub fn finish(mut self) -> IndexSet<NodeId> {
        self.finished = true;
        self.runtime
            .pop_frame(self.owner)
            .map(|frame| frame.new_sources)
            .unwrap_or_default()
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.runtime.abandon_frame(self.owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn id(n: u64) -> NodeId {
        NodeId::from(KeyData::from_ffi(n))
    }

    #[test]
    fn stacks_track_owner() {
        let mut stacks = ContextStacks::new();
        assert!(stacks.current().is_none());
        assert_eq!(stacks.depth(), 0);

        stacks.push(id(1));
        assert_eq!(stacks.current().map(|f| f.owner), Some(id(1)));
        assert_eq!(stacks.depth(), 1);

        stacks.pop(id(1));
        assert!(stacks.current().is_none());
        assert_eq!(stacks.depth(), 0);
    }

    #[test]
    fn reads_go_to_the_top_frame() {
        let mut stacks = ContextStacks::new();
        stacks.push(id(1));
        stacks.record(id(10));

        stacks.push(id(2));
        stacks.record(id(20));
        stacks.record(id(21));
        stacks.record(id(20));

        let inner = stacks.pop(id(2)).unwrap();
        assert_eq!(inner.new_sources.iter().copied().collect::<Vec<_>>(), vec![id(20), id(21)]);

        let outer = stacks.pop(id(1)).unwrap();
        assert_eq!(outer.new_sources.iter().copied().collect::<Vec<_>>(), vec![id(10)]);
    }

    #[test]
    fn nested_frames_are_all_evaluating() {
        let mut stacks = ContextStacks::new();
        stacks.push(id(1));
        stacks.push(id(2));

        assert!(stacks.is_evaluating(id(1)));
        assert!(stacks.is_evaluating(id(2)));
        assert!(!stacks.is_evaluating(id(3)));
    }

    #[test]
    fn record_without_frame_is_ignored() {
        let mut stacks = ContextStacks::new();
        stacks.record(id(1));
        assert_eq!(stacks.depth(), 0);
    }

    #[test]
    fn other_threads_see_their_own_stack() {
        let mut stacks = ContextStacks::new();
        stacks.push(id(1));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(stacks.depth(), 0);
                assert!(!stacks.is_evaluating(id(1)));
            });
        });
        assert_eq!(stacks.depth(), 1);
    }

    #[test]
    fn guard_pops_on_drop() {
        let runtime = Runtime::new();
        let owner = id(5);
        {
            let _ctx = ReactiveContext::enter(&runtime, owner);
            assert!(runtime.is_tracking());
        }
        assert!(!runtime.is_tracking());
    }
}

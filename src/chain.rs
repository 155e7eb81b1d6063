//! # Chains
//!
//! A chain is a queue of flowables bound, over time, to a rolling sequence
//! of containers supplied by later pages. It drains into whatever
//! container it is currently bound to; on overflow it records which
//! flowable was interrupted and that flowable's partial state, and reports
//! that it needs another container. Bound to a new one, it resumes exactly
//! there.
//!
//! Chain state persists across pages within one layout pass and is reset
//! at the start of each full pass.
//!
//! A flowable styled `keep-with-next` is never left alone at a container
//! bottom: if its successor cannot start in the same container, the drain
//! rolls back to just before it and both move on together.

use std::rc::Rc;

use crate::document::{CtxSnapshot, RenderCtx};
use crate::error::Fatal;
use crate::flowable::{FlowOutcome, FlowState, Flowable};
use crate::layout::{Checkpoint, ContainerArena, ContainerId, EPSILON};
use crate::style::StyleChain;

/// Where a chain stands: the next flowable to start, and the interrupted
/// one's resume state, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainState {
    pub next: usize,
    pub in_progress: Option<FlowState>,
    /// Serial of the most recent container binding this pass. Completion
    /// only counts when reported from the latest binding, so an earlier,
    /// already-overflowed binding is never mistaken for the end.
    pub bindings: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every flowable rendered; the chain is empty.
    Done,
    /// The bound container ran out of room mid-flowable.
    NeedsContainer,
    /// A float was placed for the first time; the page must re-render.
    Reflow,
}

pub struct Chain {
    flowables: Rc<Vec<Flowable>>,
    pub state: ChainState,
}

/// Rollback point protecting a completed keep-with-next flowable: when
/// its successor cannot start in the same container, everything since the
/// hold is discarded and both move on together.
struct Hold {
    checkpoint: Checkpoint,
    snapshot: CtxSnapshot,
    index: usize,
}

impl Chain {
    pub fn new(flowables: Rc<Vec<Flowable>>) -> Self {
        Chain { flowables, state: ChainState::default() }
    }

    /// Reset for a new layout pass.
    pub fn reset(&mut self) {
        self.state = ChainState::default();
    }

    pub fn is_done(&self) -> bool {
        self.state.next >= self.flowables.len() && self.state.in_progress.is_none()
    }

    /// Bind to `container` and drain until done or out of room. Flowables
    /// render in document order; the last descender threads between them.
    pub fn render_into(
        &mut self,
        ctx: &mut RenderCtx<'_>,
        arena: &mut ContainerArena,
        container: ContainerId,
    ) -> Result<ChainStatus, Fatal> {
        self.state.bindings += 1;
        let binding = self.state.bindings;
        let mut descender = 0.0;
        let mut held: Option<Hold> = None;

        while self.state.next < self.flowables.len() {
            let index = self.state.next;
            let resume = self.state.in_progress.take();
            let flowable = &self.flowables[index];
            let wants_next = resume.is_none()
                && index + 1 < self.flowables.len()
                && ctx
                    .sheet
                    .keep_with_next(&flowable.label(), &StyleChain::root(&flowable.style))?;
            // The hold is only set on a partially-used container; a pair
            // that cannot start together even on a fresh one splits rather
            // than looping forever.
            if wants_next && held.is_none() && arena.cursor(container) > EPSILON {
                held = Some(Hold {
                    checkpoint: arena.checkpoint(),
                    snapshot: ctx.snapshot(),
                    index,
                });
            }
            match flowable.flow(ctx, arena, container, None, descender, resume)? {
                FlowOutcome::Complete { descender: d } => {
                    descender = d;
                    self.state.next += 1;
                    if !wants_next {
                        held = None;
                    }
                }
                FlowOutcome::Overflow(state) => {
                    if state.is_pristine() {
                        if let Some(hold) = held.take() {
                            if index > hold.index {
                                arena.restore(&hold.checkpoint);
                                ctx.restore(hold.snapshot);
                                self.state.next = hold.index;
                                self.state.in_progress =
                                    Some(self.flowables[hold.index].initial_state());
                                return Ok(ChainStatus::NeedsContainer);
                            }
                        }
                    }
                    self.state.in_progress = Some(state);
                    return Ok(ChainStatus::NeedsContainer);
                }
                FlowOutcome::Reflow => return Ok(ChainStatus::Reflow),
            }
        }

        if binding == self.state.bindings {
            Ok(ChainStatus::Done)
        } else {
            Ok(ChainStatus::NeedsContainer)
        }
    }
}

//! # Container Tree
//!
//! Every piece of content lands in a container: a rectangular region with
//! a downward cursor. Containers live in a single owning arena and refer
//! to each other by id — parents own their children's ids, children keep a
//! non-owning id back to their parent, and nothing holds a reference into
//! the arena across a mutation.
//!
//! Sizes and positions are lazy [`Dim`] expressions. A footnote region's
//! height is a literal that grows as notes arrive; the body's height is
//! "content height minus that literal", so the body sees every growth at
//! its next `advance` without anyone pushing updates around.
//!
//! `advance` is the only operation that can fail, and its failure —
//! [`Overflow`] — is a value, not an error. The call that would cross the
//! boundary fails; the content that did fit stays placed.

use std::mem;

use crate::backend::DrawCommand;
use crate::dimension::Dim;

/// Tolerance for cursor/height comparisons, absorbing accumulated
/// floating-point error in advance sums.
pub const EPSILON: f64 = 0.01;

/// The continuation signal: the container is out of room. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// Growth behavior of a container.
#[derive(Debug, Clone)]
pub enum ContainerKind {
    /// Height is what it is; crossing it overflows.
    Fixed,
    /// Height grows on demand, overflowing only past `max_height`.
    DownExpanding { max_height: Option<f64> },
    /// Grows like [`ContainerKind::DownExpanding`] but is anchored at its
    /// bottom edge: callers give it a `top` expression of the form
    /// `anchor − height`, so growth extends it upward.
    UpExpanding { max_height: Option<f64> },
    /// Unlimited, never auto-placed. Used to measure content off-page.
    Virtual,
}

/// Index of a container in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(usize);

pub struct Container {
    pub kind: ContainerKind,
    /// Offset from the parent's origin.
    pub left: Dim,
    pub top: Dim,
    pub width: Dim,
    pub height: Dim,
    /// How much of the height has been consumed, in points.
    pub cursor: f64,
    parent: Option<ContainerId>,
    children: Vec<ContainerId>,
    draw: Vec<DrawCommand>,
}

/// Saved arena shape for a scoped, rollback-guaranteed layout attempt.
pub struct Checkpoint {
    node_count: usize,
    saved: Vec<NodeState>,
}

struct NodeState {
    cursor: f64,
    draw_len: usize,
    children_len: usize,
    /// Height to restore, for nodes whose height is a growable literal.
    height: Option<f64>,
}

/// The single owner of every container on a page.
#[derive(Default)]
pub struct ContainerArena {
    nodes: Vec<Container>,
}

impl ContainerArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parentless container (a page root, or a free-standing
    /// virtual container).
    pub fn add_root(&mut self, width: Dim, height: Dim, kind: ContainerKind) -> ContainerId {
        self.push(None, Dim::zero(), Dim::zero(), width, height, kind)
    }

    /// Create a container owned by `parent`.
    pub fn new_child(
        &mut self,
        parent: ContainerId,
        left: Dim,
        top: Dim,
        width: Dim,
        height: Dim,
        kind: ContainerKind,
    ) -> ContainerId {
        let id = self.push(Some(parent), left, top, width, height, kind);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// A free-standing virtual container for measuring content.
    pub fn new_virtual(&mut self, width: f64) -> ContainerId {
        self.add_root(Dim::pt(width), Dim::pt(0.0), ContainerKind::Virtual)
    }

    /// A child region starting at the parent's current cursor, `left`
    /// points in, spanning the parent's remaining height as a live
    /// expression — if the parent's height shrinks (footnotes arriving),
    /// the region sees it. Virtual parents get virtual regions.
    pub fn sub_region(&mut self, parent: ContainerId, left: f64, width: f64) -> ContainerId {
        let node = &self.nodes[parent.0];
        let top = node.cursor;
        if matches!(node.kind, ContainerKind::Virtual) {
            return self.new_child(
                parent,
                Dim::pt(left),
                Dim::pt(top),
                Dim::pt(width),
                Dim::pt(0.0),
                ContainerKind::Virtual,
            );
        }
        let height = &node.height.clone() - &Dim::pt(top);
        self.new_child(
            parent,
            Dim::pt(left),
            Dim::pt(top),
            Dim::pt(width),
            height,
            ContainerKind::Fixed,
        )
    }

    /// Move a measured (usually virtual) container's commands into another
    /// container at an offset. This is the explicit placement virtual
    /// containers require.
    pub fn adopt_draws(&mut self, from: ContainerId, into: ContainerId, dx: f64, dy: f64) {
        let mut commands = mem::take(&mut self.nodes[from.0].draw);
        for command in &mut commands {
            command.translate(dx, dy);
        }
        self.nodes[into.0].draw.extend(commands);
    }

    fn push(
        &mut self,
        parent: Option<ContainerId>,
        left: Dim,
        top: Dim,
        width: Dim,
        height: Dim,
        kind: ContainerKind,
    ) -> ContainerId {
        let id = ContainerId(self.nodes.len());
        self.nodes.push(Container {
            kind,
            left,
            top,
            width,
            height,
            cursor: 0.0,
            parent,
            children: Vec::new(),
            draw: Vec::new(),
        });
        id
    }

    pub fn width(&self, id: ContainerId) -> f64 {
        self.nodes[id.0].width.value()
    }

    pub fn cursor(&self, id: ContainerId) -> f64 {
        self.nodes[id.0].cursor
    }

    pub fn height(&self, id: ContainerId) -> f64 {
        self.nodes[id.0].height.value()
    }

    /// Height not yet consumed. Infinite for virtual containers.
    pub fn remaining(&self, id: ContainerId) -> f64 {
        let node = &self.nodes[id.0];
        match node.kind {
            ContainerKind::Virtual => f64::INFINITY,
            ContainerKind::Fixed => (node.height.value() - node.cursor).max(0.0),
            ContainerKind::DownExpanding { max_height }
            | ContainerKind::UpExpanding { max_height } => match max_height {
                Some(max) => (max - node.cursor).max(0.0),
                None => f64::INFINITY,
            },
        }
    }

    /// Whether `advance(id, amount)` would succeed, without growing or
    /// moving anything. Used when a line needs room for its hanging
    /// descender that it will not actually consume.
    pub fn can_advance(&self, id: ContainerId, amount: f64) -> bool {
        let node = &self.nodes[id.0];
        let target = node.cursor + amount;
        match node.kind {
            ContainerKind::Virtual => true,
            ContainerKind::Fixed => target <= node.height.value() + EPSILON,
            ContainerKind::DownExpanding { max_height }
            | ContainerKind::UpExpanding { max_height } => {
                max_height.map_or(true, |max| target <= max + EPSILON)
            }
        }
    }

    /// Move the cursor down by `amount` points.
    ///
    /// Fixed containers fail on the call that would cross their height.
    /// Expanding containers grow first and fail only past their maximum.
    /// Virtual containers never fail; their height tracks the cursor.
    pub fn advance(&mut self, id: ContainerId, amount: f64) -> Result<(), Overflow> {
        let node = &mut self.nodes[id.0];
        let target = node.cursor + amount;
        match node.kind {
            ContainerKind::Virtual => {
                node.cursor = target;
                node.height.set(target);
                Ok(())
            }
            ContainerKind::Fixed => {
                if target > node.height.value() + EPSILON {
                    Err(Overflow)
                } else {
                    node.cursor = target;
                    Ok(())
                }
            }
            ContainerKind::DownExpanding { max_height }
            | ContainerKind::UpExpanding { max_height } => {
                let current = node.height.value();
                if target > current + EPSILON {
                    if let Some(max) = max_height {
                        if target > max + EPSILON {
                            return Err(Overflow);
                        }
                    }
                    node.height.grow(target - current);
                }
                node.cursor = target;
                Ok(())
            }
        }
    }

    /// Record a drawing command in this container's local coordinates.
    pub fn draw(&mut self, id: ContainerId, command: DrawCommand) {
        self.nodes[id.0].draw.push(command);
    }

    pub fn draw_count(&self, id: ContainerId) -> usize {
        self.nodes[id.0].draw.len()
    }

    /// Composite this container's content onto its parent, depth-first:
    /// own commands first, each non-virtual child's after, all offset by
    /// the child's position. After placing, the container's own list is
    /// empty — its drawing is never partially visible.
    pub fn place(&mut self, id: ContainerId) {
        let children = self.nodes[id.0].children.clone();
        for child in children {
            if !matches!(self.nodes[child.0].kind, ContainerKind::Virtual) {
                self.place(child);
            }
        }
        if let Some(parent) = self.nodes[id.0].parent {
            let dx = self.nodes[id.0].left.value();
            let dy = self.nodes[id.0].top.value();
            let mut commands = mem::take(&mut self.nodes[id.0].draw);
            for command in &mut commands {
                command.translate(dx, dy);
            }
            self.nodes[parent.0].draw.extend(commands);
        }
    }

    /// Take the composited command list of a root container.
    pub fn take_draw(&mut self, id: ContainerId) -> Vec<DrawCommand> {
        mem::take(&mut self.nodes[id.0].draw)
    }

    /// Widest extent of the content drawn so far, in local coordinates.
    /// This is the "natural width" measurement virtual containers exist for.
    pub fn content_width(&self, id: ContainerId) -> f64 {
        let mut widest: f64 = 0.0;
        for command in &self.nodes[id.0].draw {
            let right = match command {
                DrawCommand::GlyphRun { x, glyphs, .. } => {
                    x + glyphs
                        .last()
                        .map(|g| g.x + g.glyph.advance)
                        .unwrap_or(0.0)
                }
                DrawCommand::Rule { x, width, .. } => x + width,
                DrawCommand::Image { x, width, .. } => x + width,
            };
            widest = widest.max(right);
        }
        widest
    }

    /// Snapshot the arena for a speculative attempt.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            node_count: self.nodes.len(),
            saved: self
                .nodes
                .iter()
                .map(|n| NodeState {
                    cursor: n.cursor,
                    draw_len: n.draw.len(),
                    children_len: n.children.len(),
                    height: n.height.is_literal().then(|| n.height.value()),
                })
                .collect(),
        }
    }

    /// Discard everything rendered since `checkpoint` was taken: nodes
    /// created, commands drawn, cursors advanced, literal heights grown.
    /// The failure then propagates as if nothing had been attempted.
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.nodes.truncate(checkpoint.node_count);
        for (node, saved) in self.nodes.iter_mut().zip(&checkpoint.saved) {
            node.cursor = saved.cursor;
            node.draw.truncate(saved.draw_len);
            node.children.truncate(saved.children_len);
            if let Some(h) = saved.height {
                node.height.set(h);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DrawCommand;

    fn fixed(arena: &mut ContainerArena, height: f64) -> ContainerId {
        arena.add_root(Dim::pt(100.0), Dim::pt(height), ContainerKind::Fixed)
    }

    #[test]
    fn test_advance_fails_on_the_crossing_call() {
        let mut arena = ContainerArena::new();
        let c = fixed(&mut arena, 100.0);
        assert!(arena.advance(c, 60.0).is_ok());
        assert!(arena.advance(c, 40.0).is_ok()); // exactly full
        assert_eq!(arena.advance(c, 0.1), Err(Overflow));
        // The failed call did not move the cursor.
        assert!((arena.cursor(c) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_advance_never_exceeds_height() {
        let mut arena = ContainerArena::new();
        let c = fixed(&mut arena, 50.0);
        let mut total = 0.0;
        for _ in 0..20 {
            if arena.advance(c, 7.0).is_ok() {
                total += 7.0;
            }
        }
        assert!(total <= 50.0 + EPSILON);
        assert_eq!(arena.cursor(c), total);
    }

    #[test]
    fn test_down_expanding_grows_then_hits_max() {
        let mut arena = ContainerArena::new();
        let c = arena.add_root(
            Dim::pt(100.0),
            Dim::pt(0.0),
            ContainerKind::DownExpanding { max_height: Some(30.0) },
        );
        assert!(arena.advance(c, 20.0).is_ok());
        assert!((arena.height(c) - 20.0).abs() < 1e-9);
        assert!(arena.advance(c, 10.0).is_ok());
        assert_eq!(arena.advance(c, 5.0), Err(Overflow));
        // Height never shrank.
        assert!((arena.height(c) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_expanding_height_feeds_sibling_expression() {
        let mut arena = ContainerArena::new();
        let note_height = Dim::pt(0.0);
        let notes = arena.add_root(
            Dim::pt(100.0),
            note_height.clone(),
            ContainerKind::UpExpanding { max_height: None },
        );
        let body = arena.add_root(
            Dim::pt(100.0),
            Dim::pt(100.0) - note_height,
            ContainerKind::Fixed,
        );
        assert!(arena.advance(body, 80.0).is_ok());
        // A footnote arrives; the body's remaining room shrinks live.
        assert!(arena.advance(notes, 30.0).is_ok());
        assert_eq!(arena.advance(body, 10.0), Err(Overflow));
    }

    #[test]
    fn test_virtual_never_overflows_and_tracks_height() {
        let mut arena = ContainerArena::new();
        let v = arena.new_virtual(100.0);
        for _ in 0..100 {
            assert!(arena.advance(v, 50.0).is_ok());
        }
        assert!((arena.height(v) - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_place_composites_depth_first_with_offsets() {
        let mut arena = ContainerArena::new();
        let root = fixed(&mut arena, 100.0);
        let child = arena.new_child(
            root,
            Dim::pt(10.0),
            Dim::pt(20.0),
            Dim::pt(50.0),
            Dim::pt(50.0),
            ContainerKind::Fixed,
        );
        arena.draw(root, DrawCommand::Rule { x: 0.0, y: 0.0, width: 5.0, thickness: 1.0 });
        arena.draw(child, DrawCommand::Rule { x: 1.0, y: 2.0, width: 5.0, thickness: 1.0 });
        arena.place(root);
        let commands = arena.take_draw(root);
        assert_eq!(commands.len(), 2);
        // Own command first, child's after, offset by the child position.
        match &commands[1] {
            DrawCommand::Rule { x, y, .. } => {
                assert_eq!(*x, 11.0);
                assert_eq!(*y, 22.0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_virtual_children_are_not_auto_placed() {
        let mut arena = ContainerArena::new();
        let root = fixed(&mut arena, 100.0);
        let v = arena.new_child(
            root,
            Dim::zero(),
            Dim::zero(),
            Dim::pt(50.0),
            Dim::pt(0.0),
            ContainerKind::Virtual,
        );
        arena.draw(v, DrawCommand::Rule { x: 0.0, y: 0.0, width: 5.0, thickness: 1.0 });
        arena.place(root);
        assert!(arena.take_draw(root).is_empty());
        assert_eq!(arena.draw_count(v), 1);
    }

    #[test]
    fn test_checkpoint_restore_discards_the_attempt() {
        let mut arena = ContainerArena::new();
        let root = fixed(&mut arena, 100.0);
        let notes_height = Dim::pt(0.0);
        let notes = arena.add_root(
            Dim::pt(100.0),
            notes_height,
            ContainerKind::DownExpanding { max_height: None },
        );
        arena.advance(root, 10.0).unwrap();
        arena.draw(root, DrawCommand::Rule { x: 0.0, y: 0.0, width: 1.0, thickness: 1.0 });

        let cp = arena.checkpoint();

        arena.advance(root, 50.0).unwrap();
        arena.advance(notes, 25.0).unwrap();
        arena.draw(root, DrawCommand::Rule { x: 9.0, y: 9.0, width: 1.0, thickness: 1.0 });
        let scratch = arena.new_child(
            root,
            Dim::zero(),
            Dim::zero(),
            Dim::pt(10.0),
            Dim::pt(10.0),
            ContainerKind::Fixed,
        );
        arena.draw(scratch, DrawCommand::Rule { x: 0.0, y: 0.0, width: 1.0, thickness: 1.0 });

        arena.restore(&cp);
        assert!((arena.cursor(root) - 10.0).abs() < 1e-9);
        assert_eq!(arena.draw_count(root), 1);
        assert!((arena.height(notes) - 0.0).abs() < 1e-9);
        assert!((arena.cursor(notes) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_content_width_measures_glyph_runs() {
        use crate::backend::PlacedGlyph;
        use crate::font::{FontSpec, Glyph};
        let mut arena = ContainerArena::new();
        let v = arena.new_virtual(1000.0);
        arena.draw(
            v,
            DrawCommand::GlyphRun {
                x: 10.0,
                y: 0.0,
                font: FontSpec::new("Any", 10.0),
                glyphs: vec![
                    PlacedGlyph { glyph: Glyph { id: 1, ch: 'a', advance: 5.0 }, x: 0.0 },
                    PlacedGlyph { glyph: Glyph { id: 2, ch: 'b', advance: 5.0 }, x: 5.0 },
                ],
            },
        );
        assert!((arena.content_width(v) - 20.0).abs() < 1e-9);
    }
}

use std::collections::VecDeque;

use sirix_types::NodeKey;

use crate::predicate::Predicate;
use crate::source::{NodeSource, NodeView};

/// Each direct child of `parent`, left to right.
pub struct ChildAxis<'s, S: NodeSource> {
    source: &'s S,
    next: Option<NodeKey>,
}

impl<'s, S: NodeSource> ChildAxis<'s, S> {
    pub fn new(source: &'s S, parent: NodeKey) -> Self {
        let next = source.view(parent).and_then(|v| v.first_child());
        Self { source, next }
    }
}

impl<'s, S: NodeSource> Iterator for ChildAxis<'s, S> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        let current = self.next.take()?;
        self.next = self.source.view(current).and_then(|v| v.right_sibling());
        Some(current)
    }
}

/// Pre-order walk of `start`'s subtree, optionally including `start` itself.
pub struct DescendantAxis<'s, S: NodeSource> {
    source: &'s S,
    // (key, is_scope_root) — a scope-root's own right sibling lies outside
    // the subtree and must never be pushed.
    stack: Vec<(NodeKey, bool)>,
}

impl<'s, S: NodeSource> DescendantAxis<'s, S> {
    pub fn new(source: &'s S, start: NodeKey, include_self: bool) -> Self {
        let mut stack = Vec::new();
        if include_self {
            stack.push((start, true));
        } else if let Some(child) = source.view(start).and_then(|v| v.first_child()) {
            stack.push((child, false));
        }
        Self { source, stack }
    }
}

impl<'s, S: NodeSource> Iterator for DescendantAxis<'s, S> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        let (current, is_scope_root) = self.stack.pop()?;
        if let Some(view) = self.source.view(current) {
            if !is_scope_root {
                if let Some(sibling) = view.right_sibling() {
                    self.stack.push((sibling, false));
                }
            }
            if let Some(child) = view.first_child() {
                self.stack.push((child, false));
            }
        }
        Some(current)
    }
}

enum Frame {
    Enter(NodeKey),
    Exit(NodeKey),
}

/// Post-order walk of `start`'s subtree, optionally including `start`
/// itself (spec §4.9: drives `remove`'s children-then-node teardown).
pub struct PostOrderAxis<'s, S: NodeSource> {
    source: &'s S,
    stack: Vec<Frame>,
}

impl<'s, S: NodeSource> PostOrderAxis<'s, S> {
    pub fn new(source: &'s S, start: NodeKey, include_self: bool) -> Self {
        let mut stack = Vec::new();
        if include_self {
            stack.push(Frame::Enter(start));
        } else {
            for child in ChildAxis::new(source, start).collect::<Vec<_>>().into_iter().rev() {
                stack.push(Frame::Enter(child));
            }
        }
        Self { source, stack }
    }
}

impl<'s, S: NodeSource> Iterator for PostOrderAxis<'s, S> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        loop {
            match self.stack.pop()? {
                Frame::Exit(key) => return Some(key),
                Frame::Enter(key) => {
                    self.stack.push(Frame::Exit(key));
                    for child in ChildAxis::new(self.source, key).collect::<Vec<_>>().into_iter().rev() {
                        self.stack.push(Frame::Enter(child));
                    }
                }
            }
        }
    }
}

/// Breadth-first walk of `start`'s subtree, optionally restricted to a
/// single relative depth (`filter_level`, 0 = `start`) and optionally
/// including `start` itself.
pub struct LevelOrderAxis<'s, S: NodeSource> {
    source: &'s S,
    queue: VecDeque<(NodeKey, u32)>,
    filter_level: Option<u32>,
}

impl<'s, S: NodeSource> LevelOrderAxis<'s, S> {
    pub fn new(source: &'s S, start: NodeKey, filter_level: Option<u32>, include_self: bool) -> Self {
        let mut queue = VecDeque::new();
        if include_self {
            queue.push_back((start, 0));
        } else {
            for child in ChildAxis::new(source, start) {
                queue.push_back((child, 1));
            }
        }
        Self {
            source,
            queue,
            filter_level,
        }
    }
}

impl<'s, S: NodeSource> Iterator for LevelOrderAxis<'s, S> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        loop {
            let (key, level) = self.queue.pop_front()?;
            for child in ChildAxis::new(self.source, key) {
                self.queue.push_back((child, level + 1));
            }
            match self.filter_level {
                Some(wanted) if wanted != level => continue,
                _ => return Some(key),
            }
        }
    }
}

/// Wraps any node-key axis with a conjunction of predicates, short-circuit
/// evaluated left to right.
pub struct FilterAxis<'s, S: NodeSource, I: Iterator<Item = NodeKey>> {
    source: &'s S,
    inner: I,
    predicates: Vec<Box<dyn Predicate<S>>>,
}

impl<'s, S: NodeSource, I: Iterator<Item = NodeKey>> FilterAxis<'s, S, I> {
    pub fn new(source: &'s S, inner: I, predicates: Vec<Box<dyn Predicate<S>>>) -> Self {
        Self {
            source,
            inner,
            predicates,
        }
    }
}

impl<'s, S: NodeSource, I: Iterator<Item = NodeKey>> Iterator for FilterAxis<'s, S, I> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        for key in self.inner.by_ref() {
            if self.predicates.iter().all(|p| p.matches(self.source, key)) {
                return Some(key);
            }
        }
        None
    }
}

use crate::error::HeadersError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStack {
    Past,
    Future,
}

impl HistoryStack {
    fn opposite(self) -> Self {
        match self {
            HistoryStack::Past => HistoryStack::Future,
            HistoryStack::Future => HistoryStack::Past,
        }
    }
}

impl fmt::Display for HistoryStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryStack::Past => f.write_str("past"),
            HistoryStack::Future => f.write_str("future"),
        }
    }
}

/// Back/forward stacks of raw query strings, most recent at the front.
#[derive(Debug, Clone)]
pub struct QueryHistory {
    past: VecDeque<String>,
    future: VecDeque<String>,
    depth: usize,
}

impl Default for QueryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

impl QueryHistory {
    pub fn new(depth: usize) -> Self {
        QueryHistory {
            past: VecDeque::new(),
            future: VecDeque::new(),
            depth: depth.max(1),
        }
    }

    fn stack(&self, which: HistoryStack) -> &VecDeque<String> {
        match which {
            HistoryStack::Past => &self.past,
            HistoryStack::Future => &self.future,
        }
    }

    fn stack_mut(&mut self, which: HistoryStack) -> &mut VecDeque<String> {
        match which {
            HistoryStack::Past => &mut self.past,
            HistoryStack::Future => &mut self.future,
        }
    }

    /// Push onto `which`; a repeat of its top entry is ignored and the
    /// oldest entry is dropped once the stack is full.
    pub fn push(&mut self, query: &str, which: HistoryStack) {
        let depth = self.depth;
        let stack = self.stack_mut(which);
        if stack.front().map(String::as_str) == Some(query) {
            return;
        }
        stack.push_front(query.to_string());
        stack.truncate(depth);
    }

    pub fn pop(&mut self, which: HistoryStack) -> Result<String, HeadersError> {
        self.stack_mut(which)
            .pop_front()
            .ok_or(HeadersError::HistoryEmpty(which))
    }

    /// Pop from `which` and, if something came back, push `current` onto
    /// the opposite stack. The popped query is the one to run next.
    pub fn navigate(&mut self, which: HistoryStack, current: Option<&str>) -> Option<String> {
        let query = self.pop(which).ok()?;
        if let Some(current) = current {
            self.push(current, which.opposite());
        }
        Some(query)
    }

    /// Empty both stacks.
    pub fn forget(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    pub fn entries(&self, which: HistoryStack) -> impl Iterator<Item = &str> {
        self.stack(which).iter().map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self, which: HistoryStack) -> usize {
        self.stack(which).len()
    }
}

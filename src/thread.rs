//! Thread-tree prefix drawing.
//!
//! The engine is fed one [`ThreadDescriptor`] per row, in display order, and
//! keeps a stack with one entry per open ancestor depth telling whether a
//! vertical connector still has to be drawn in that column.

use crate::message::ThreadDescriptor;

/// One glyph in its plain-ASCII and Unicode renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub ascii: &'static str,
    pub fancy: &'static str,
}

impl Glyph {
    pub const fn new(ascii: &'static str, fancy: &'static str) -> Self {
        Glyph { ascii, fancy }
    }

    pub fn get(&self, fancy: bool) -> &'static str {
        if fancy {
            self.fancy
        } else {
            self.ascii
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadGlyphs {
    pub child: Glyph,
    pub last_child: Glyph,
    pub connection: Glyph,
    pub blank: Glyph,
    pub orphan: Glyph,
    pub single_orphan: Glyph,
    pub duplicate: Glyph,
}

impl Default for ThreadGlyphs {
    fn default() -> Self {
        // connection and blank must have equal width in each mode
        ThreadGlyphs {
            child: Glyph::new("|>", "┣▶ "),
            last_child: Glyph::new("L", "┗▶ "),
            connection: Glyph::new("|", "┃ "),
            blank: Glyph::new(" ", "  "),
            orphan: Glyph::new("<>", "┗▶"),
            single_orphan: Glyph::new("<>", "┗▶"),
            duplicate: Glyph::new("=", "≡ "),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThreadPrefixEngine {
    glyphs: ThreadGlyphs,
    fancy: bool,
    connectors: Vec<bool>,
}

impl ThreadPrefixEngine {
    pub fn new(fancy: bool) -> Self {
        Self::with_glyphs(ThreadGlyphs::default(), fancy)
    }

    pub fn with_glyphs(glyphs: ThreadGlyphs, fancy: bool) -> Self {
        ThreadPrefixEngine {
            glyphs,
            fancy,
            connectors: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.connectors.clear();
    }

    /// Open connectors, innermost last.
    #[cfg(test)]
    pub fn connectors(&self) -> &[bool] {
        &self.connectors
    }

    pub fn compute_prefix(&mut self, thread: &ThreadDescriptor) -> String {
        let fancy = self.fancy;
        let mut prefix = String::new();

        if thread.depth == 0 {
            self.connectors.clear();
        } else {
            // upstream paths can jump levels; pad or trim to the parent depth
            self.connectors.resize(thread.depth as usize - 1, false);
            for &open in &self.connectors {
                let glyph = if open {
                    &self.glyphs.connection
                } else {
                    &self.glyphs.blank
                };
                prefix.push_str(glyph.get(fancy));
            }
            let tail = if thread.is_empty_parent && thread.is_first_child {
                if thread.is_last_child {
                    &self.glyphs.single_orphan
                } else {
                    &self.glyphs.orphan
                }
            } else if thread.is_last_child {
                &self.glyphs.last_child
            } else {
                &self.glyphs.child
            };
            prefix.push_str(tail.get(fancy));
        }

        if thread.has_child && !thread.is_last_child {
            self.connectors.push(true);
        }

        if thread.is_duplicate {
            prefix.push_str(self.glyphs.duplicate.get(fancy));
        }
        prefix
    }
}

//! Indented output sink.
//!
//! The sink accumulates the whole output file in memory. During a function
//! body it switches into section mode: writes land in an ordered list of
//! `(condition, buffer)` pairs so that a label decoration can be dropped
//! afterwards when nothing ever branched to it. Indentation state is shared
//! across the mode switch, so section buffers carry their final indentation
//! baked in.

use std::collections::BTreeSet;

const INDENT_STEP: usize = 2;

/// One deferred piece of a function body. A section with a condition is only
/// emitted when the condition name is in the function's include set.
#[derive(Debug)]
pub struct FuncSection {
    pub cond: Option<String>,
    buf: String,
}

#[derive(Debug, Default)]
pub struct Sink {
    out: String,
    sections: Vec<FuncSection>,
    in_func: bool,
    indent: usize,
    pending_indent: bool,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    fn target(&mut self) -> &mut String {
        if self.in_func {
            &mut self
                .sections
                .last_mut()
                .expect("section mode always has a current section")
                .buf
        } else {
            &mut self.out
        }
    }

    fn flush_indent(&mut self) {
        if self.pending_indent {
            self.pending_indent = false;
            let indent = self.indent;
            let target = self.target();
            for _ in 0..indent {
                target.push(' ');
            }
        }
    }

    pub fn write(&mut self, s: &str) {
        self.flush_indent();
        self.target().push_str(s);
    }

    /// End the line; the next write starts with the current indentation.
    pub fn newline(&mut self) {
        self.pending_indent = false;
        self.target().push('\n');
        self.pending_indent = true;
    }

    pub fn open_brace(&mut self) {
        self.write("{");
        self.indent += INDENT_STEP;
        self.newline();
    }

    pub fn close_brace(&mut self) {
        debug_assert!(self.indent >= INDENT_STEP);
        self.indent -= INDENT_STEP;
        self.write("}");
    }

    /// Enter section mode for one function body.
    pub fn begin_func_sections(&mut self) {
        debug_assert!(!self.in_func);
        self.in_func = true;
        self.sections.push(FuncSection {
            cond: None,
            buf: String::new(),
        });
    }

    /// Start a new section. Pending indentation is flushed into the previous
    /// section first, so dropping a conditional section never eats the line's
    /// indent.
    pub fn push_func_section(&mut self, cond: Option<String>) {
        debug_assert!(self.in_func);
        self.flush_indent();
        self.sections.push(FuncSection {
            cond,
            buf: String::new(),
        });
    }

    /// Leave section mode, returning the buffered body pieces.
    pub fn take_func_sections(&mut self) -> Vec<FuncSection> {
        debug_assert!(self.in_func);
        self.in_func = false;
        std::mem::take(&mut self.sections)
    }

    /// Append buffered sections, skipping conditional ones whose condition is
    /// not in `includes`.
    pub fn append_func_sections(&mut self, sections: Vec<FuncSection>, includes: &BTreeSet<String>) {
        debug_assert!(!self.in_func);
        for section in sections {
            let keep = match &section.cond {
                None => true,
                Some(cond) => includes.contains(cond),
            };
            if keep {
                self.out.push_str(&section.buf);
            }
        }
    }

    pub fn into_string(self) -> String {
        debug_assert!(!self.in_func);
        self.out
    }
}

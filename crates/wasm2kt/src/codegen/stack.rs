//! Symbolic value stack with dependency and effect tracking.
//!
//! Every Wasm operand slot is mirrored by a deferred [`StackValue`]: the
//! Kotlin text that would produce the value, its parse precedence, what it
//! reads and what it writes. Values fold into larger expressions until a
//! structural event forces a spill, which materializes each pending entry
//! into its canonical per-slot variable.
//!
//! The value stack is never longer than the type stack. A missing entry on
//! top means the slot already lives in its spill variable; `sync_values`
//! materializes those lazily as bare variable references.

use super::symbols::mangle_type;
use super::KotlinWriter;
use crate::ir::ValueType;
use std::collections::BTreeSet;

/// Parenthesization ranks for generated Kotlin. Lower binds tighter; 0 is a
/// bare identifier or self-delimiting literal that never needs parens.
pub(crate) mod prec {
    /// Spill variables and literals.
    pub const ATOM: u8 = 0;
    /// Local and global reads: atoms that carry a dependency.
    pub const READ: u8 = 1;
    /// Postfix calls and member access.
    pub const POSTFIX: u8 = 2;
    /// Unary prefix minus.
    pub const PREFIX: u8 = 3;
    /// `*` and `/`.
    pub const MUL: u8 = 4;
    /// `+` and `-`.
    pub const ADD: u8 = 5;
    /// Named infix functions: `and`, `or`, `xor`, `shl`, `shr`, `ushr`.
    pub const INFIX_FN: u8 = 7;
    /// Ordered comparisons.
    pub const COMPARE: u8 = 10;
    /// `==` and `!=`.
    pub const EQUALITY: u8 = 11;
}

/// What a deferred expression reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DependsOn {
    pub locals: BTreeSet<String>,
    pub globals: BTreeSet<String>,
    pub memory: bool,
}

impl DependsOn {
    pub fn union(&mut self, other: &DependsOn) {
        self.locals.extend(other.locals.iter().cloned());
        self.globals.extend(other.globals.iter().cloned());
        self.memory |= other.memory;
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty() && self.globals.is_empty() && !self.memory
    }
}

/// What a deferred expression writes, plus whether it can trap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SideEffects {
    pub locals: BTreeSet<String>,
    pub globals: BTreeSet<String>,
    /// Calls may write any global; modeled as a blanket flag.
    pub all_globals: bool,
    pub memory: bool,
    pub can_trap: bool,
}

impl SideEffects {
    pub fn union(&mut self, other: &SideEffects) {
        self.locals.extend(other.locals.iter().cloned());
        self.globals.extend(other.globals.iter().cloned());
        self.all_globals |= other.all_globals;
        self.memory |= other.memory;
        self.can_trap |= other.can_trap;
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
            && self.globals.is_empty()
            && !self.all_globals
            && !self.memory
            && !self.can_trap
    }
}

/// A deferred expression fragment mirroring one operand-stack slot.
#[derive(Debug, Clone)]
pub(crate) struct StackValue {
    pub value: String,
    pub precedence: u8,
    pub depends_on: DependsOn,
    pub side_effects: SideEffects,
}

impl StackValue {
    /// A bare variable reference: never parenthesized, no dependencies.
    pub fn var(name: String) -> Self {
        Self {
            value: name,
            precedence: prec::ATOM,
            depends_on: DependsOn::default(),
            side_effects: SideEffects::default(),
        }
    }

    /// A literal. Literal text is self-delimiting (negative values come
    /// pre-parenthesized from the formatter).
    pub fn literal(text: String) -> Self {
        Self::var(text)
    }

    /// Combine operand metadata into a new fragment.
    pub fn merged(value: String, precedence: u8, parts: &[&StackValue]) -> Self {
        let mut depends_on = DependsOn::default();
        let mut side_effects = SideEffects::default();
        for part in parts {
            depends_on.union(&part.depends_on);
            side_effects.union(&part.side_effects);
        }
        Self {
            value,
            precedence,
            depends_on,
            side_effects,
        }
    }

    /// Text for use as a left operand (or the receiver of a postfix op) of an
    /// operator at `op_prec`: parenthesized iff this binds looser.
    pub fn left_of(&self, op_prec: u8) -> String {
        if self.precedence > op_prec {
            format!("({})", self.value)
        } else {
            self.value.clone()
        }
    }

    /// Text for use as a right operand: equal precedence also needs parens
    /// for the left-associative operators emitted here.
    pub fn right_of(&self, op_prec: u8) -> String {
        if self.precedence >= op_prec {
            format!("({})", self.value)
        } else {
            self.value.clone()
        }
    }
}

impl KotlinWriter<'_> {
    // ─── Type stack ─────────────────────────────────────────────────────────

    pub(crate) fn mark_type_stack(&self) -> usize {
        self.type_stack.len()
    }

    /// Truncate both stacks to `mark`. Callers at structural boundaries have
    /// already synced or deliberately discarded the values above.
    pub(crate) fn reset_type_stack(&mut self, mark: usize) {
        debug_assert!(mark <= self.type_stack.len());
        self.type_stack.truncate(mark);
        self.value_stack.truncate(mark.min(self.value_stack.len()));
    }

    pub(crate) fn stack_type(&self, depth: usize) -> ValueType {
        self.type_stack[self.type_stack.len() - 1 - depth]
    }

    pub(crate) fn push_types(&mut self, types: &[ValueType]) {
        self.type_stack.extend_from_slice(types);
    }

    pub(crate) fn drop_types(&mut self, count: usize) {
        debug_assert!(count <= self.type_stack.len());
        debug_assert!(self.value_stack.len() + count <= self.type_stack.len());
        self.type_stack.truncate(self.type_stack.len() - count);
    }

    // ─── Spill variables ────────────────────────────────────────────────────

    /// The canonical variable for a stack slot of a given type, defined on
    /// first use and reused for the function's lifetime.
    pub(crate) fn stack_var(&mut self, slot: usize, ty: ValueType) -> String {
        if let Some(name) = self.stack_var_map.get(&(slot, ty)) {
            return name.clone();
        }
        let raw = format!("{}{}", mangle_type(ty), slot);
        let name = self.define_local(&raw);
        self.stack_var_map.insert((slot, ty), name.clone());
        name
    }

    // ─── Value stack ────────────────────────────────────────────────────────

    /// Materialize implicit top-of-stack slots as bare variable references so
    /// that `|value_stack| == |type_stack|`.
    pub(crate) fn sync_values(&mut self) {
        for slot in self.value_stack.len()..self.type_stack.len() {
            let ty = self.type_stack[slot];
            let name = self.stack_var(slot, ty);
            self.value_stack.push(StackValue::var(name));
        }
    }

    /// Pop the top deferred value. The type stack is left alone; callers drop
    /// types once all operands are popped.
    pub(crate) fn pop_value(&mut self) -> StackValue {
        self.sync_values();
        self.value_stack.pop().expect("value stack underflow")
    }

    /// Pop `count` values, returned in stack order (bottom first).
    pub(crate) fn pop_values(&mut self, count: usize) -> Vec<StackValue> {
        self.sync_values();
        let at = self.value_stack.len() - count;
        self.value_stack.split_off(at)
    }

    /// Push the result of an opcode: one new type-stack slot carrying a
    /// deferred value.
    pub(crate) fn push_value(&mut self, ty: ValueType, value: StackValue) {
        self.sync_values();
        self.type_stack.push(ty);
        self.value_stack.push(value);
    }

    /// Spill every pending entry below `upto` into its canonical slot
    /// variable. Entries already living in their own slot variable are left
    /// alone, which makes back-to-back spills no-ops.
    pub(crate) fn spill_values_upto(&mut self, upto: usize) {
        let upto = upto.min(self.value_stack.len());
        for slot in 0..upto {
            let ty = self.type_stack[slot];
            let name = self.stack_var(slot, ty);
            let entry = &self.value_stack[slot];
            if entry.precedence == prec::ATOM && entry.value == name {
                continue;
            }
            let text = format!("{name} = {};", entry.value);
            self.out.write(&text);
            self.out.newline();
            self.value_stack[slot] = StackValue::var(name);
        }
    }

    /// Spill the whole stack. Run before any emit that introduces a control
    /// flow join, crosses a label, performs a call or store, writes a local
    /// or global, or branches.
    pub(crate) fn spill_values(&mut self) {
        self.spill_values_upto(self.value_stack.len());
    }

    /// Drop the top slot. A pending value with side effects still has to
    /// execute, so it is emitted as an expression statement after the rest of
    /// the stack spills.
    pub(crate) fn drop_value(&mut self) {
        let value = self.pop_value();
        self.drop_types(1);
        if !value.side_effects.is_empty() {
            self.spill_values();
            let text = format!("{};", value.value);
            self.out.write(&text);
            self.out.newline();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_unions_dependencies_and_effects() {
        let mut a = StackValue::var("w2k_i0".to_string());
        a.depends_on.locals.insert("w2k_x".to_string());
        a.side_effects.can_trap = true;
        let mut b = StackValue::var("w2k_i1".to_string());
        b.depends_on.globals.insert("w2k_g".to_string());
        b.depends_on.memory = true;
        b.side_effects.memory = true;

        let c = StackValue::merged("w2k_i0 + w2k_i1".to_string(), prec::ADD, &[&a, &b]);
        assert!(c.depends_on.locals.contains("w2k_x"));
        assert!(c.depends_on.globals.contains("w2k_g"));
        assert!(c.depends_on.memory);
        assert!(c.side_effects.can_trap);
        assert!(c.side_effects.memory);
        // Effect monotonicity: the fold is a superset of each part.
        for part in [&a, &b] {
            assert!(c.depends_on.locals.is_superset(&part.depends_on.locals));
            assert!(c.side_effects.locals.is_superset(&part.side_effects.locals));
        }
    }

    #[test]
    fn left_operand_parenthesized_when_looser() {
        let sum = StackValue {
            value: "a + b".to_string(),
            precedence: prec::ADD,
            depends_on: DependsOn::default(),
            side_effects: SideEffects::default(),
        };
        assert_eq!(sum.left_of(prec::MUL), "(a + b)");
        assert_eq!(sum.left_of(prec::ADD), "a + b");
        assert_eq!(sum.right_of(prec::ADD), "(a + b)");
        assert_eq!(sum.left_of(prec::COMPARE), "a + b");

        let atom = StackValue::var("x".to_string());
        assert_eq!(atom.left_of(prec::POSTFIX), "x");
        assert_eq!(atom.right_of(prec::PREFIX), "x");
    }
}

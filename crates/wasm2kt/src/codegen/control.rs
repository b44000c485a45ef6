//! Control-flow translation: structured constructs, branches and exceptions.
//!
//! Forward-jump semantics come from `label@ do { ... } while (false);` with
//! `break@label`; loops use `label@ while (true) { ... break; }` with
//! `continue@label` for back edges. Branch values land in the target label's
//! canonical stack slots before the jump. Exception delegation travels as a
//! sentinel `DelegateException` whose level counts down through enclosing
//! handlers.

use super::stack::prec;
use super::{KotlinWriter, LabelKind};
use crate::ir::{ExprList, Signature, TryKind};
use anyhow::Result;
use std::collections::BTreeMap;

impl KotlinWriter<'_> {
    /// Open the `label@ ` decoration (conditional on use) and the construct
    /// header, and return the defined label symbol.
    fn open_labeled(&mut self, label: &str, header: &str) -> String {
        let name = self.define_local(label);
        self.out.push_func_section(Some(name.clone()));
        self.out.write(&format!("{name}@ "));
        self.out.push_func_section(None);
        self.out.write(header);
        self.out.open_brace();
        name
    }

    pub(crate) fn write_block(
        &mut self,
        label: &str,
        sig: &Signature,
        body: &ExprList,
    ) -> Result<()> {
        self.spill_values();
        let mark = self.mark_type_stack() - sig.params.len();
        let name = self.open_labeled(label, "do ");
        self.push_label(LabelKind::Block, name, sig.results.clone(), mark);

        self.write_expr_list(body)?;
        if !self.unreachable {
            self.spill_values();
        }
        self.unreachable = false;
        self.reset_type_stack(mark);
        self.pop_label();

        self.out.close_brace();
        self.out.write(" while (false);");
        self.out.newline();
        self.push_types(&sig.results);
        Ok(())
    }

    pub(crate) fn write_loop(
        &mut self,
        label: &str,
        sig: &Signature,
        body: &ExprList,
    ) -> Result<()> {
        self.spill_values();
        let mark = self.mark_type_stack() - sig.params.len();
        if body.is_empty() {
            self.reset_type_stack(mark);
            self.push_types(&sig.results);
            return Ok(());
        }

        let name = self.open_labeled(label, "while (true) ");
        self.push_label(LabelKind::Loop, name, sig.params.clone(), mark);

        self.write_expr_list(body)?;
        if !self.unreachable {
            self.spill_values();
        }
        self.unreachable = false;
        self.reset_type_stack(mark);
        self.pop_label();

        self.out.write("break;");
        self.out.newline();
        self.out.close_brace();
        self.out.newline();
        self.push_types(&sig.results);
        Ok(())
    }

    pub(crate) fn write_if(
        &mut self,
        label: &str,
        sig: &Signature,
        then_body: &ExprList,
        else_body: &ExprList,
    ) -> Result<()> {
        let cond = self.pop_value();
        self.drop_types(1);
        self.spill_values();
        let mark = self.mark_type_stack() - sig.params.len();

        let name = self.open_labeled(label, "do ");
        self.out
            .write(&format!("if ({}.inz()) ", cond.left_of(prec::POSTFIX)));
        self.out.open_brace();
        self.push_label(LabelKind::If, name, sig.results.clone(), mark);

        self.write_expr_list(then_body)?;
        if !self.unreachable {
            self.spill_values();
        }
        self.unreachable = false;
        self.reset_type_stack(mark);

        if !else_body.is_empty() {
            self.push_types(&sig.params);
            self.out.close_brace();
            self.out.write(" else ");
            self.out.open_brace();

            self.write_expr_list(else_body)?;
            if !self.unreachable {
                self.spill_values();
            }
            self.unreachable = false;
            self.reset_type_stack(mark);
        }

        self.pop_label();
        self.out.close_brace();
        self.out.newline();
        self.out.close_brace();
        self.out.write(" while (false);");
        self.out.newline();
        self.push_types(&sig.results);
        Ok(())
    }

    // ─── Branches ───────────────────────────────────────────────────────────

    /// Emit a branch to the label at `depth`: move the in-flight values into
    /// the target's slots, then jump. Written inline without a trailing
    /// newline so `br_if` and `br_table` arms can wrap it.
    pub(crate) fn write_branch(&mut self, depth: u32) {
        let index = self.label_stack.len() - 1 - depth as usize;
        if self.label_stack[index].kind == LabelKind::Func {
            self.write_func_return(true);
            return;
        }

        let (kind, name, sig, base, first_use) = {
            let label = &mut self.label_stack[index];
            let first_use = !label.used;
            label.used = true;
            (
                label.kind,
                label.name.clone(),
                label.sig.clone(),
                label.type_stack_size,
                first_use,
            )
        };
        if first_use {
            self.func_includes.insert(name.clone());
        }

        // Values below the branch arity still carry pending effects; those
        // must execute before the jump.
        let n = sig.len();
        let len = self.type_stack.len();
        self.spill_values_upto(len - n);
        self.sync_values();
        for (i, ty) in sig.iter().enumerate() {
            let target = self.stack_var(base + i, *ty);
            let source = self.value_stack[len - n + i].clone();
            if source.precedence == prec::ATOM && source.value == target {
                continue;
            }
            self.out.write(&format!("{target} = {}; ", source.value));
        }

        match kind {
            LabelKind::Loop => self.out.write(&format!("continue@{name};")),
            _ => self.out.write(&format!("break@{name};")),
        }
    }

    pub(crate) fn write_br_if(&mut self, depth: u32) {
        let cond = self.pop_value();
        self.drop_types(1);
        // The branch may not be taken: every pending value must materialize
        // here, so the conditional arm only copies slots.
        self.spill_values();
        self.out
            .write(&format!("if ({}.inz()) {{ ", cond.left_of(prec::POSTFIX)));
        self.write_branch(depth);
        self.out.write(" }");
        self.out.newline();
    }

    pub(crate) fn write_br_table(&mut self, targets: &[u32], default: u32) {
        let index = self.pop_value();
        self.drop_types(1);
        self.spill_values();

        self.out.write(&format!("when ({}) ", index.value));
        self.out.open_brace();

        // Duplicate targets coalesce into one arm with a case list.
        let mut order: Vec<u32> = Vec::new();
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (case, depth) in targets.iter().enumerate() {
            let cases = groups.entry(*depth).or_default();
            if cases.is_empty() {
                order.push(*depth);
            }
            cases.push(case);
        }

        for depth in order {
            let cases: Vec<String> = groups[&depth].iter().map(|c| c.to_string()).collect();
            self.out.write(&format!("{} -> {{ ", cases.join(", ")));
            self.write_branch(depth);
            self.out.write(" }");
            self.out.newline();
        }
        self.out.write("else -> { ");
        self.write_branch(default);
        self.out.write(" }");
        self.out.newline();

        self.out.close_brace();
        self.out.newline();
        self.unreachable = true;
    }

    // ─── Exceptions ─────────────────────────────────────────────────────────

    /// Sentinel level for an exception delegated to the label at `depth`
    /// (resolved with the delegating try's own label already popped). A
    /// handler seeing level 0 takes the exception as its own; each one in
    /// between decrements and rethrows.
    fn delegation_level(&self, depth: u32) -> usize {
        let index = self.label_stack.len() - 1 - depth as usize;
        let target = &self.label_stack[index];
        self.try_stack.len()
            - target.try_catch_size
            - usize::from(target.kind == LabelKind::Try)
    }

    pub(crate) fn write_try(
        &mut self,
        label: &str,
        sig: &Signature,
        body: &ExprList,
        kind: &TryKind,
    ) -> Result<()> {
        // A try with no handler arms degenerates to a block.
        if let TryKind::Catch { catches, catch_all } = kind {
            if catches.is_empty() && catch_all.is_none() {
                return self.write_block(label, sig, body);
            }
        }

        self.spill_values();
        let mark = self.mark_type_stack() - sig.params.len();
        let name = self.open_labeled(label, "do ");

        let binding = match kind {
            TryKind::Catch { .. } => {
                let binding = self.define_local(&format!("{label}_ex"));
                self.out.write(&format!("var {binding}: Exception? = null"));
                self.out.newline();
                Some(binding)
            }
            TryKind::Delegate { .. } => None,
        };

        self.out.write("try ");
        self.out.open_brace();
        self.out.write("do ");
        self.out.open_brace();

        self.push_label(LabelKind::Try, name.clone(), sig.results.clone(), mark);
        self.try_stack.push(name.clone());
        self.write_expr_list(body)?;
        if !self.unreachable {
            self.spill_values();
        }
        self.unreachable = false;
        self.reset_type_stack(mark);
        self.try_stack.pop();

        self.out.close_brace();
        self.out.write(" while (false);");
        self.out.newline();
        if binding.is_some() {
            // Normal completion skips the dispatch below the handlers.
            self.out.write(&format!("break@{name};"));
            self.out.newline();
            self.mark_label_used(&name);
        }
        self.out.close_brace();

        match kind {
            TryKind::Delegate { depth } => {
                self.pop_label();
                let level = self.delegation_level(*depth);
                self.write_catch_arm(
                    "wasm_rt_impl.DelegateException",
                    &[
                        "if (e.level > 0) { e.level -= 1; throw e }".to_string(),
                        format!("throw wasm_rt_impl.DelegateException({level}, e.inner);"),
                    ],
                );
                self.write_catch_arm("wasm_rt_impl.WasmTrapException", &["throw e;".to_string()]);
                self.write_catch_arm(
                    "Exception",
                    &[format!("throw wasm_rt_impl.DelegateException({level}, e);")],
                );
                self.out.newline();
            }
            TryKind::Catch { catches, catch_all } => {
                let binding = binding.expect("catch kind always binds");
                self.write_catch_arm(
                    "wasm_rt_impl.DelegateException",
                    &[
                        "if (e.level > 0) { e.level -= 1; throw e }".to_string(),
                        format!("{binding} = e.inner"),
                    ],
                );
                self.write_catch_arm("wasm_rt_impl.WasmTrapException", &["throw e;".to_string()]);
                self.write_catch_arm("Exception", &[format!("{binding} = e")]);
                self.out.newline();

                // Tag dispatch, emitted once; both binding arms funnel here.
                self.label_stack
                    .last_mut()
                    .expect("try label is on the stack")
                    .catch_binding = Some(binding.clone());

                for clause in catches {
                    let tag_sym = self.tag_sym(clause.tag);
                    let tag_sig = self.module.tag_sig(clause.tag).clone();

                    let mut params = Vec::with_capacity(tag_sig.params.len());
                    let mut binds = Vec::with_capacity(tag_sig.params.len());
                    for (i, ty) in tag_sig.params.iter().enumerate() {
                        let param = self.define_local(&format!("x{i}"));
                        let slot = self.stack_var(mark + i, *ty);
                        binds.push(format!("{slot} = {param}"));
                        params.push(param);
                    }
                    let binder = if params.is_empty() {
                        "{ }".to_string()
                    } else {
                        format!("{{ {} -> {} }}", params.join(", "), binds.join("; "))
                    };

                    self.out
                        .write(&format!("if ({tag_sym}.check({binding}!!) {binder}) "));
                    self.out.open_brace();
                    self.reset_type_stack(mark);
                    self.push_types(&tag_sig.params);
                    self.write_expr_list(&clause.body)?;
                    if !self.unreachable {
                        self.spill_values();
                        self.out.write(&format!("break@{name};"));
                        self.out.newline();
                        self.mark_label_used(&name);
                    }
                    self.unreachable = false;
                    self.reset_type_stack(mark);
                    self.out.close_brace();
                    self.out.newline();
                }

                if let Some(all_body) = catch_all {
                    self.reset_type_stack(mark);
                    self.write_expr_list(all_body)?;
                    if !self.unreachable {
                        self.spill_values();
                        self.out.write(&format!("break@{name};"));
                        self.out.newline();
                        self.mark_label_used(&name);
                    }
                    self.unreachable = false;
                    self.reset_type_stack(mark);
                } else {
                    self.out.write(&format!("throw {binding}!!;"));
                    self.out.newline();
                }
                self.pop_label();
            }
        }

        self.reset_type_stack(mark);
        self.out.close_brace();
        self.out.write(" while (false);");
        self.out.newline();
        self.push_types(&sig.results);
        Ok(())
    }

    fn write_catch_arm(&mut self, exception_type: &str, body: &[String]) {
        self.out.write(&format!(" catch (e: {exception_type}) "));
        self.out.open_brace();
        for line in body {
            self.out.write(line);
            self.out.newline();
        }
        self.out.close_brace();
    }

    fn mark_label_used(&mut self, name: &str) {
        if let Some(label) = self
            .label_stack
            .iter_mut()
            .rev()
            .find(|l| l.name == name)
        {
            if label.used {
                return;
            }
            label.used = true;
        }
        self.func_includes.insert(name.to_string());
    }
}

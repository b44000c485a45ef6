//! Expression translator: per-opcode lowering over the symbolic value stack.
//!
//! Every handler pops its operand fragments, folds them into a new deferred
//! fragment when the opcode is pure, or spills the stack and emits a
//! statement when it is not. Comparison results debooleanize with `.btoInt()`
//! so the i32 0/1 convention holds everywhere; branch conditions go back to
//! Boolean with `.inz()`.

use super::literals::const_literal;
use super::stack::{prec, StackValue};
use super::KotlinWriter;
use crate::ir::{
    BinaryOp, CompareOp, Const, ConvertOp, Expr, ExprList, LoadOp, StoreOp, UnaryOp, ValueType,
};
use anyhow::{bail, Result};

fn load_fn_name(op: LoadOp) -> &'static str {
    match op {
        LoadOp::I32Load => "i32_load",
        LoadOp::I64Load => "i64_load",
        LoadOp::F32Load => "f32_load",
        LoadOp::F64Load => "f64_load",
        LoadOp::I32Load8S => "i32_load8_s",
        LoadOp::I32Load8U => "i32_load8_u",
        LoadOp::I32Load16S => "i32_load16_s",
        LoadOp::I32Load16U => "i32_load16_u",
        LoadOp::I64Load8S => "i64_load8_s",
        LoadOp::I64Load8U => "i64_load8_u",
        LoadOp::I64Load16S => "i64_load16_s",
        LoadOp::I64Load16U => "i64_load16_u",
        LoadOp::I64Load32S => "i64_load32_s",
        LoadOp::I64Load32U => "i64_load32_u",
    }
}

fn store_fn_name(op: StoreOp) -> &'static str {
    match op {
        StoreOp::I32Store => "i32_store",
        StoreOp::I64Store => "i64_store",
        StoreOp::F32Store => "f32_store",
        StoreOp::F64Store => "f64_store",
        StoreOp::I32Store8 => "i32_store8",
        StoreOp::I32Store16 => "i32_store16",
        StoreOp::I64Store8 => "i64_store8",
        StoreOp::I64Store16 => "i64_store16",
        StoreOp::I64Store32 => "i64_store32",
    }
}

impl KotlinWriter<'_> {
    /// Translate an expression list. A taken branch marks the rest of the
    /// list unreachable; the enclosing construct clears the flag.
    pub(crate) fn write_expr_list(&mut self, exprs: &ExprList) -> Result<()> {
        for expr in exprs {
            if self.unreachable {
                break;
            }
            self.write_expr(expr)?;
        }
        Ok(())
    }

    fn write_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Block { label, sig, body } => self.write_block(label, sig, body)?,
            Expr::Loop { label, sig, body } => self.write_loop(label, sig, body)?,
            Expr::If {
                label,
                sig,
                then_body,
                else_body,
            } => self.write_if(label, sig, then_body, else_body)?,
            Expr::Try {
                label,
                sig,
                body,
                kind,
            } => self.write_try(label, sig, body, kind)?,

            Expr::Br { depth } => {
                self.write_branch(*depth);
                self.out.newline();
                self.unreachable = true;
            }
            Expr::BrIf { depth } => self.write_br_if(*depth),
            Expr::BrTable { targets, default } => self.write_br_table(targets, *default),
            Expr::Return => {
                self.write_func_return(true);
                self.out.newline();
                self.unreachable = true;
            }
            Expr::Unreachable => {
                self.spill_values();
                self.out
                    .write("throw wasm_rt_impl.UnreachableException(\"unreachable\");");
                self.out.newline();
                self.unreachable = true;
            }
            Expr::Nop => {}
            Expr::Drop => self.drop_value(),

            Expr::Const(c) => self.write_const(c),
            Expr::Binary(op) => self.write_binary(*op),
            Expr::Compare(op) => self.write_compare(*op),
            Expr::Convert(op) => self.write_convert(*op),
            Expr::Unary(op) => self.write_unary(*op),

            Expr::Load { op, memory, offset } => self.write_load(*op, *memory, *offset),
            Expr::Store { op, memory, offset } => self.write_store(*op, *memory, *offset),

            Expr::LocalGet { index } => self.write_local_get(*index),
            Expr::LocalSet { index } => self.write_local_set(*index),
            Expr::LocalTee { index } => self.write_local_tee(*index),
            Expr::GlobalGet { index } => self.write_global_get(*index),
            Expr::GlobalSet { index } => self.write_global_set(*index),

            Expr::Select => self.write_select(),
            Expr::Call { func } => self.write_call(*func),
            Expr::CallIndirect { type_idx, table } => self.write_call_indirect(*type_idx, *table),

            Expr::MemorySize { memory } => {
                let mem = self.memory_sym(*memory);
                let mut value = StackValue::merged(format!("{mem}.pages"), prec::POSTFIX, &[]);
                value.depends_on.memory = true;
                self.push_value(ValueType::I32, value);
            }
            Expr::MemoryGrow { memory } => {
                let delta = self.pop_value();
                self.drop_types(1);
                self.spill_values();
                let mem = self.memory_sym(*memory);
                let mut value = StackValue::merged(
                    format!("{mem}.resize({})", delta.value),
                    prec::POSTFIX,
                    &[&delta],
                );
                value.side_effects.memory = true;
                self.push_value(ValueType::I32, value);
            }
            Expr::MemoryFill { memory } => {
                let [d, v, n] = self.pop_bulk_args();
                let mem = self.memory_sym(*memory);
                self.write_stmt(format!("{mem}.fill({d}, {v}, {n});"));
            }
            Expr::MemoryCopy { dst, src } => {
                let [d, s, n] = self.pop_bulk_args();
                let dst = self.memory_sym(*dst);
                let src = self.memory_sym(*src);
                self.write_stmt(format!("{dst}.copy_from({src}, {d}, {s}, {n});"));
            }
            Expr::MemoryInit { segment, memory } => {
                let [d, s, n] = self.pop_bulk_args();
                let mem = self.memory_sym(*memory);
                self.write_stmt(format!(
                    "{mem}.memory_init(wasm_rt_impl.loadb64(data_segment_data_{segment}), {d}, {s}, {n});"
                ));
            }
            Expr::DataDrop { segment } => {
                self.spill_values();
                self.write_stmt(format!("data_segment_data_{segment} = \"\";"));
            }
            Expr::TableCopy { dst, src } => {
                let [d, s, n] = self.pop_bulk_args();
                let dst = self.table_sym(*dst);
                let src = self.table_sym(*src);
                self.write_stmt(format!("{dst}.copy_from({src}, {d}, {s}, {n});"));
            }
            Expr::TableInit { segment, table } => {
                let [d, s, n] = self.pop_bulk_args();
                let table = self.table_sym(*table);
                self.write_stmt(format!(
                    "{table}.table_init(elem_segment_{segment}, {d}, {s}, {n});"
                ));
            }
            Expr::ElemDrop { segment } => {
                self.spill_values();
                self.write_stmt(format!("elem_segment_{segment} = arrayOf();"));
            }

            Expr::Throw { tag } => {
                let sig = self.module.tag_sig(*tag).clone();
                let args = self.pop_values(sig.params.len());
                self.drop_types(sig.params.len());
                self.spill_values();
                let tag_sym = self.tag_sym(*tag);
                let arg_text: Vec<&str> = args.iter().map(|a| a.value.as_str()).collect();
                self.write_stmt(format!(
                    "throw {tag_sym}.newException() {{ it({}) }};",
                    arg_text.join(", ")
                ));
                self.unreachable = true;
            }
            Expr::Rethrow { depth } => {
                let label = self.label_at(*depth);
                let Some(binding) = label.catch_binding.clone() else {
                    bail!("rethrow target is not an active catch");
                };
                self.write_stmt(format!("throw {binding}!!;"));
                self.unreachable = true;
            }
        }
        Ok(())
    }

    fn write_stmt(&mut self, text: String) {
        self.out.write(&text);
        self.out.newline();
    }

    /// Pop the `(d, s, n)` style argument triple of a bulk operation and
    /// spill, returning the three texts in push order.
    fn pop_bulk_args(&mut self) -> [String; 3] {
        let n = self.pop_value();
        let s = self.pop_value();
        let d = self.pop_value();
        self.drop_types(3);
        self.spill_values();
        [d.value, s.value, n.value]
    }

    fn write_const(&mut self, c: &Const) {
        let value = StackValue::literal(const_literal(c));
        self.push_value(c.ty(), value);
    }

    // ─── Folding helpers ────────────────────────────────────────────────────

    fn fold_infix(&mut self, op: &str, op_prec: u8, ty: ValueType) {
        let rhs = self.pop_value();
        let lhs = self.pop_value();
        self.drop_types(2);
        let text = format!("{} {op} {}", lhs.left_of(op_prec), rhs.right_of(op_prec));
        let value = StackValue::merged(text, op_prec, &[&lhs, &rhs]);
        self.push_value(ty, value);
    }

    /// Binary helper call, e.g. `wasm_rt_impl.I32_DIV_S(a, b)`.
    fn fold_call2(&mut self, callee: &str, ty: ValueType, can_trap: bool) {
        let rhs = self.pop_value();
        let lhs = self.pop_value();
        self.drop_types(2);
        let text = format!("{callee}({}, {})", lhs.value, rhs.value);
        let mut value = StackValue::merged(text, prec::POSTFIX, &[&lhs, &rhs]);
        value.side_effects.can_trap |= can_trap;
        self.push_value(ty, value);
    }

    /// Unary helper call.
    fn fold_call1(&mut self, callee: &str, ty: ValueType, can_trap: bool) {
        let operand = self.pop_value();
        self.drop_types(1);
        let text = format!("{callee}({})", operand.value);
        let mut value = StackValue::merged(text, prec::POSTFIX, &[&operand]);
        value.side_effects.can_trap |= can_trap;
        self.push_value(ty, value);
    }

    /// Postfix member chain, e.g. `.toLong()` or `.isz()`.
    fn fold_postfix(&mut self, op: &str, ty: ValueType) {
        let operand = self.pop_value();
        self.drop_types(1);
        let text = format!("{}{op}", operand.left_of(prec::POSTFIX));
        let value = StackValue::merged(text, prec::POSTFIX, &[&operand]);
        self.push_value(ty, value);
    }

    /// Shift with the Wasm count masking provided by Kotlin; i64 shift counts
    /// are narrowed to Int first.
    fn fold_shift(&mut self, op: &str, ty: ValueType) {
        let rhs = self.pop_value();
        let lhs = self.pop_value();
        self.drop_types(2);
        let count = if ty == ValueType::I64 {
            format!("{}.toInt()", rhs.left_of(prec::POSTFIX))
        } else {
            rhs.right_of(prec::INFIX_FN)
        };
        let text = format!("{} {op} {count}", lhs.left_of(prec::INFIX_FN));
        let value = StackValue::merged(text, prec::INFIX_FN, &[&lhs, &rhs]);
        self.push_value(ty, value);
    }

    fn fold_compare(&mut self, op: &str, op_prec: u8) {
        let rhs = self.pop_value();
        let lhs = self.pop_value();
        self.drop_types(2);
        let text = format!(
            "({} {op} {}).btoInt()",
            lhs.left_of(op_prec),
            rhs.right_of(op_prec)
        );
        let value = StackValue::merged(text, prec::POSTFIX, &[&lhs, &rhs]);
        self.push_value(ValueType::I32, value);
    }

    fn fold_compare_unsigned(&mut self, cls: &str, op: &str) {
        let rhs = self.pop_value();
        let lhs = self.pop_value();
        self.drop_types(2);
        let text = format!(
            "({cls}.compareUnsigned({}, {}) {op} 0).btoInt()",
            lhs.value, rhs.value
        );
        let value = StackValue::merged(text, prec::POSTFIX, &[&lhs, &rhs]);
        self.push_value(ValueType::I32, value);
    }

    // ─── Numeric lowering tables ────────────────────────────────────────────

    fn write_binary(&mut self, op: BinaryOp) {
        use BinaryOp::*;
        let ty = op.ty();
        match op {
            I32Add | I64Add | F32Add | F64Add => self.fold_infix("+", prec::ADD, ty),
            I32Sub | I64Sub | F32Sub | F64Sub => self.fold_infix("-", prec::ADD, ty),
            I32Mul | I64Mul | F32Mul | F64Mul => self.fold_infix("*", prec::MUL, ty),
            F32Div | F64Div => self.fold_infix("/", prec::MUL, ty),

            I32DivS => self.fold_call2("wasm_rt_impl.I32_DIV_S", ty, true),
            I64DivS => self.fold_call2("wasm_rt_impl.I64_DIV_S", ty, true),
            I32DivU | I64DivU => self.fold_call2("wasm_rt_impl.DIV_U", ty, true),
            I32RemS => self.fold_call2("wasm_rt_impl.I32_REM_S", ty, true),
            I64RemS => self.fold_call2("wasm_rt_impl.I64_REM_S", ty, true),
            I32RemU | I64RemU => self.fold_call2("wasm_rt_impl.REM_U", ty, true),

            I32And | I64And => self.fold_infix("and", prec::INFIX_FN, ty),
            I32Or | I64Or => self.fold_infix("or", prec::INFIX_FN, ty),
            I32Xor | I64Xor => self.fold_infix("xor", prec::INFIX_FN, ty),

            I32Shl | I64Shl => self.fold_shift("shl", ty),
            I32ShrS | I64ShrS => self.fold_shift("shr", ty),
            I32ShrU | I64ShrU => self.fold_shift("ushr", ty),

            I32Rotl => self.fold_call2("wasm_rt_impl.I32_ROTL", ty, false),
            I64Rotl => self.fold_call2("wasm_rt_impl.I64_ROTL", ty, false),
            I32Rotr => self.fold_call2("wasm_rt_impl.I32_ROTR", ty, false),
            I64Rotr => self.fold_call2("wasm_rt_impl.I64_ROTR", ty, false),

            F32Min | F64Min => self.fold_call2("wasm_rt_impl.MIN", ty, false),
            F32Max | F64Max => self.fold_call2("wasm_rt_impl.MAX", ty, false),
            F32Copysign | F64Copysign => self.fold_call2("Math.copySign", ty, false),
        }
    }

    fn write_compare(&mut self, op: CompareOp) {
        use CompareOp::*;
        match op {
            I32Eq | I64Eq | F32Eq | F64Eq => self.fold_compare("==", prec::EQUALITY),
            I32Ne | I64Ne | F32Ne | F64Ne => self.fold_compare("!=", prec::EQUALITY),

            I32LtS | I64LtS | F32Lt | F64Lt => self.fold_compare("<", prec::COMPARE),
            I32LeS | I64LeS | F32Le | F64Le => self.fold_compare("<=", prec::COMPARE),
            I32GtS | I64GtS | F32Gt | F64Gt => self.fold_compare(">", prec::COMPARE),
            I32GeS | I64GeS | F32Ge | F64Ge => self.fold_compare(">=", prec::COMPARE),

            I32LtU => self.fold_compare_unsigned("java.lang.Integer", "<"),
            I32LeU => self.fold_compare_unsigned("java.lang.Integer", "<="),
            I32GtU => self.fold_compare_unsigned("java.lang.Integer", ">"),
            I32GeU => self.fold_compare_unsigned("java.lang.Integer", ">="),
            I64LtU => self.fold_compare_unsigned("java.lang.Long", "<"),
            I64LeU => self.fold_compare_unsigned("java.lang.Long", "<="),
            I64GtU => self.fold_compare_unsigned("java.lang.Long", ">"),
            I64GeU => self.fold_compare_unsigned("java.lang.Long", ">="),
        }
    }

    fn write_convert(&mut self, op: ConvertOp) {
        use ConvertOp::*;
        let ty = op.result_ty();
        match op {
            I32Eqz | I64Eqz => self.fold_postfix(".isz()", ty),

            I64ExtendI32S => self.fold_postfix(".toLong()", ty),
            I64ExtendI32U => {
                let operand = self.pop_value();
                self.drop_types(1);
                let text = format!("{}.toLong() and 0xFFFFFFFFL", operand.left_of(prec::POSTFIX));
                let value = StackValue::merged(text, prec::INFIX_FN, &[&operand]);
                self.push_value(ty, value);
            }
            I32WrapI64 => self.fold_postfix(".toInt()", ty),

            I32TruncF32S => self.fold_call1("wasm_rt_impl.I32_TRUNC_S_F32", ty, true),
            I32TruncF64S => self.fold_call1("wasm_rt_impl.I32_TRUNC_S_F64", ty, true),
            I64TruncF32S => self.fold_call1("wasm_rt_impl.I64_TRUNC_S_F32", ty, true),
            I64TruncF64S => self.fold_call1("wasm_rt_impl.I64_TRUNC_S_F64", ty, true),
            I32TruncF32U => self.fold_call1("wasm_rt_impl.I32_TRUNC_U_F32", ty, true),
            I32TruncF64U => self.fold_call1("wasm_rt_impl.I32_TRUNC_U_F64", ty, true),
            I64TruncF32U => self.fold_call1("wasm_rt_impl.I64_TRUNC_U_F32", ty, true),
            I64TruncF64U => self.fold_call1("wasm_rt_impl.I64_TRUNC_U_F64", ty, true),

            // Kotlin's checked casts saturate, which is exactly trunc_sat.
            I32TruncSatF32S | I32TruncSatF64S => self.fold_postfix(".toInt()", ty),
            I64TruncSatF32S | I64TruncSatF64S => self.fold_postfix(".toLong()", ty),
            I32TruncSatF32U => self.fold_call1("wasm_rt_impl.I32_TRUNC_SAT_U_F32", ty, false),
            I32TruncSatF64U => self.fold_call1("wasm_rt_impl.I32_TRUNC_SAT_U_F64", ty, false),
            I64TruncSatF32U => self.fold_call1("wasm_rt_impl.I64_TRUNC_SAT_U_F32", ty, false),
            I64TruncSatF64U => self.fold_call1("wasm_rt_impl.I64_TRUNC_SAT_U_F64", ty, false),

            F32ConvertI32S | F32ConvertI64S => self.fold_postfix(".toFloat()", ty),
            F64ConvertI32S | F64ConvertI64S => self.fold_postfix(".toDouble()", ty),
            F32ConvertI32U => self.fold_call1("wasm_rt_impl.UIntToFloat", ty, false),
            F64ConvertI32U => self.fold_call1("wasm_rt_impl.UIntToDouble", ty, false),
            F32ConvertI64U => self.fold_call1("wasm_rt_impl.ULongToFloat", ty, false),
            F64ConvertI64U => self.fold_call1("wasm_rt_impl.ULongToDouble", ty, false),

            F32DemoteF64 => self.fold_postfix(".toFloat()", ty),
            F64PromoteF32 => self.fold_postfix(".toDouble()", ty),

            F32ReinterpretI32 => self.fold_call1("Float.fromBits", ty, false),
            F64ReinterpretI64 => self.fold_call1("Double.fromBits", ty, false),
            I32ReinterpretF32 | I64ReinterpretF64 => self.fold_postfix(".toRawBits()", ty),
        }
    }

    fn write_unary(&mut self, op: UnaryOp) {
        use UnaryOp::*;
        let ty = op.ty();
        match op {
            I32Clz => self.fold_postfix(".countLeadingZeroBits()", ty),
            I64Clz => self.fold_postfix(".countLeadingZeroBits().toLong()", ty),
            I32Ctz => self.fold_postfix(".countTrailingZeroBits()", ty),
            I64Ctz => self.fold_postfix(".countTrailingZeroBits().toLong()", ty),
            I32Popcnt => self.fold_postfix(".countOneBits()", ty),
            I64Popcnt => self.fold_postfix(".countOneBits().toLong()", ty),

            F32Neg | F64Neg => {
                let operand = self.pop_value();
                self.drop_types(1);
                let text = format!("-{}", operand.right_of(prec::PREFIX));
                let value = StackValue::merged(text, prec::PREFIX, &[&operand]);
                self.push_value(ty, value);
            }
            F32Abs | F64Abs => self.fold_call1("wasm_rt_impl.abs", ty, false),
            F32Sqrt | F64Sqrt => self.fold_call1("kotlin.math.sqrt", ty, false),
            F32Ceil | F64Ceil => self.fold_call1("wasm_rt_impl.ceil", ty, false),
            F32Floor | F64Floor => self.fold_call1("wasm_rt_impl.floor", ty, false),
            F32Trunc | F64Trunc => self.fold_call1("wasm_rt_impl.truncate", ty, false),
            F32Nearest | F64Nearest => self.fold_call1("kotlin.math.round", ty, false),

            I32Extend8S => self.fold_postfix(".toByte().toInt()", ty),
            I32Extend16S => self.fold_postfix(".toShort().toInt()", ty),
            I64Extend8S => self.fold_postfix(".toByte().toLong()", ty),
            I64Extend16S => self.fold_postfix(".toShort().toLong()", ty),
            I64Extend32S => self.fold_postfix(".toInt().toLong()", ty),
        }
    }

    // ─── Memory access ──────────────────────────────────────────────────────

    fn write_load(&mut self, op: LoadOp, memory: u32, offset: u64) {
        let addr = self.pop_value();
        self.drop_types(1);
        let mem = self.memory_sym(memory);
        let mut text = format!("{mem}.{}({}", load_fn_name(op), addr.value);
        if offset != 0 {
            text.push_str(&format!(", {}", offset as i32));
        }
        text.push(')');
        let mut value = StackValue::merged(text, prec::POSTFIX, &[&addr]);
        value.depends_on.memory = true;
        value.side_effects.can_trap = true;
        self.push_value(op.result_ty(), value);
    }

    fn write_store(&mut self, op: StoreOp, memory: u32, offset: u64) {
        let value = self.pop_value();
        let addr = self.pop_value();
        self.drop_types(2);
        self.spill_values();
        let mem = self.memory_sym(memory);
        let mut text = format!("{mem}.{}({}", store_fn_name(op), addr.value);
        if offset != 0 {
            text.push_str(&format!(", {}", offset as i32));
        }
        text.push_str(&format!(", {});", value.value));
        self.write_stmt(text);
    }

    // ─── Locals, globals, select ────────────────────────────────────────────

    fn write_local_get(&mut self, index: u32) {
        let ty = self.local_type(index);
        let sym = self.local_sym(index);
        let mut value = StackValue::merged(sym.clone(), prec::READ, &[]);
        value.depends_on.locals.insert(sym);
        self.push_value(ty, value);
    }

    fn write_local_set(&mut self, index: u32) {
        let value = self.pop_value();
        self.drop_types(1);
        self.spill_values();
        let sym = self.local_sym(index);
        self.write_stmt(format!("{sym} = {};", value.value));
    }

    fn write_local_tee(&mut self, index: u32) {
        let value = self.pop_value();
        let sym = self.local_sym(index);
        let text = format!("{}.also {{ {sym} = it }}", value.left_of(prec::POSTFIX));
        let mut tee = StackValue::merged(text, prec::POSTFIX, &[&value]);
        tee.side_effects.locals.insert(sym);
        self.value_stack.push(tee);
    }

    fn write_global_get(&mut self, index: u32) {
        let ty = self.module.globals[index as usize].ty;
        let sym = self.global_var_sym(index);
        let mut value = StackValue::merged(sym.clone(), prec::READ, &[]);
        value.depends_on.globals.insert(sym);
        self.push_value(ty, value);
    }

    fn write_global_set(&mut self, index: u32) {
        let value = self.pop_value();
        self.drop_types(1);
        self.spill_values();
        let sym = self.global_var_sym(index);
        self.write_stmt(format!("{sym} = {};", value.value));
    }

    /// `select` keeps Wasm's operand evaluation order through a runtime
    /// helper whose parameters are declared in push order.
    fn write_select(&mut self) {
        let ty = self.stack_type(2);
        let cond = self.pop_value();
        let if_false = self.pop_value();
        let if_true = self.pop_value();
        self.drop_types(3);
        let text = format!(
            "wasm_rt_impl.select({}, {}, {})",
            if_true.value, if_false.value, cond.value
        );
        let value = StackValue::merged(text, prec::POSTFIX, &[&if_true, &if_false, &cond]);
        self.push_value(ty, value);
    }

    // ─── Calls ──────────────────────────────────────────────────────────────

    /// Common tail of direct and indirect calls: a statement for zero
    /// results, a deferred value for one, a continuation lambda binding the
    /// extras into their slots for several.
    fn finish_call(
        &mut self,
        call_text: String,
        operands: &[StackValue],
        results: &[ValueType],
    ) {
        match results.len() {
            0 => self.write_stmt(format!("{call_text};")),
            1 => {
                let parts: Vec<&StackValue> = operands.iter().collect();
                let mut value = StackValue::merged(call_text, prec::POSTFIX, &parts);
                value.depends_on.memory = true;
                value.side_effects.all_globals = true;
                value.side_effects.memory = true;
                value.side_effects.can_trap = true;
                self.push_value(results[0], value);
            }
            n => {
                let base = self.type_stack.len();
                let primary = self.stack_var(base, results[0]);
                let mut params = Vec::with_capacity(n - 1);
                let mut binds = Vec::with_capacity(n - 1);
                for (i, ty) in results.iter().enumerate().skip(1) {
                    let param = self.define_local(&format!("mv{i}"));
                    let slot = self.stack_var(base + i, *ty);
                    binds.push(format!("{slot} = {param}"));
                    params.push(param);
                }
                self.write_stmt(format!(
                    "{primary} = {call_text} {{ {} -> {} }};",
                    params.join(", "),
                    binds.join("; ")
                ));
                self.push_types(results);
            }
        }
    }

    fn write_call(&mut self, func: u32) {
        let sig = self.module.func_sig(func).clone();
        let args = self.pop_values(sig.params.len());
        self.drop_types(sig.params.len());
        self.spill_values();
        let callee = self.func_sym(func);
        let arg_text: Vec<&str> = args.iter().map(|a| a.value.as_str()).collect();
        let call_text = format!("{callee}({})", arg_text.join(", "));
        self.finish_call(call_text, &args, &sig.results);
    }

    fn write_call_indirect(&mut self, type_idx: u32, table: u32) {
        let sig = self.module.types[type_idx as usize].clone();
        let index = self.pop_value();
        self.drop_types(1);
        let args = self.pop_values(sig.params.len());
        self.drop_types(sig.params.len());
        self.spill_values();
        self.call_indirect_decls.insert(type_idx, sig.clone());

        let mut parts = vec![self.table_sym(table)];
        parts.extend(args.iter().map(|a| a.value.clone()));
        parts.push(index.value.clone());
        let call_text = format!("CALL_INDIRECT_{type_idx}({})", parts.join(", "));

        let mut operands = args;
        operands.push(index);
        self.finish_call(call_text, &operands, &sig.results);
    }
}

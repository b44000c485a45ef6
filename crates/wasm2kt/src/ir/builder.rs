//! IR builder: turns a [`ParsedModule`](crate::parser::ParsedModule) into the
//! structured [`Module`] IR.
//!
//! Two jobs happen here. First, every index space is stitched together with
//! imports in front and every item gets a raw name — the debug name when the
//! binary carries one and reading them is enabled, a synthesized `f0`/`p0`/
//! `g0`-style name otherwise. Second, each function body is rebuilt from the
//! flat operator stream into the nested expression tree the translator
//! consumes, using a frame stack that mirrors the `block`/`end` bracketing.

use crate::ir::*;
use crate::parser::{
    DataSegmentKind, ElementSegmentKind, ImportKindInfo, ParsedInitExpr, ParsedModule,
};
use crate::TranspileOptions;
use anyhow::{bail, Context, Result};
use wasmparser::{BlockType, Operator};

/// Classify an opcode for the fatal "unimplemented" message.
fn opcode_class(op: &Operator) -> String {
    let name = format!("{op:?}");
    for prefix in ["V128", "I8x16", "I16x8", "I32x4", "I64x2", "F32x4", "F64x2"] {
        if name.starts_with(prefix) {
            return "SIMD support".to_string();
        }
    }
    if name.contains("Atomic") {
        return "threads support".to_string();
    }
    if name.starts_with("ReturnCall") {
        return "tail call support".to_string();
    }
    if name.starts_with("Ref") || name.starts_with("Table") || name.starts_with("CallRef") {
        return "reference types support".to_string();
    }
    format!("opcode {name}")
}

fn init_expr(parsed: &ParsedInitExpr) -> InitExpr {
    match *parsed {
        ParsedInitExpr::I32(v) => InitExpr::Const(Const::I32(v)),
        ParsedInitExpr::I64(v) => InitExpr::Const(Const::I64(v)),
        ParsedInitExpr::F32(bits) => InitExpr::Const(Const::F32(bits)),
        ParsedInitExpr::F64(bits) => InitExpr::Const(Const::F64(bits)),
        ParsedInitExpr::GlobalGet(idx) => InitExpr::GlobalGet(idx),
    }
}

// ─── Body building ──────────────────────────────────────────────────────────

enum Construct {
    Func,
    Block {
        label: String,
        sig: Signature,
    },
    Loop {
        label: String,
        sig: Signature,
    },
    If {
        label: String,
        sig: Signature,
        /// Set when `else` is reached; the frame then collects the else arm.
        then_body: Option<ExprList>,
    },
    Try {
        label: String,
        sig: Signature,
        /// Set when the first catch arm is reached.
        body: Option<ExprList>,
        catches: Vec<CatchClause>,
        /// Which arm the frame is currently collecting.
        current: Option<CatchTarget>,
    },
}

enum CatchTarget {
    Tag(u32),
    All,
}

struct Frame {
    construct: Construct,
    exprs: ExprList,
}

struct BodyBuilder<'a> {
    types: &'a [Signature],
    frames: Vec<Frame>,
    label_index: u32,
    done: bool,
}

impl<'a> BodyBuilder<'a> {
    fn new(types: &'a [Signature]) -> Self {
        Self {
            types,
            frames: vec![Frame {
                construct: Construct::Func,
                exprs: Vec::new(),
            }],
            label_index: 0,
            done: false,
        }
    }

    fn block_sig(&self, bt: BlockType) -> Result<Signature> {
        Ok(match bt {
            BlockType::Empty => Signature::default(),
            BlockType::Type(vt) => Signature {
                params: Vec::new(),
                results: vec![ValueType::from_wasmparser(vt)?],
            },
            BlockType::FuncType(idx) => self
                .types
                .get(idx as usize)
                .cloned()
                .context("block type index out of range")?,
        })
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}{}", self.label_index);
        self.label_index += 1;
        label
    }

    fn push(&mut self, expr: Expr) {
        self.frames
            .last_mut()
            .expect("frame stack never empties before the final end")
            .exprs
            .push(expr);
    }

    fn open(&mut self, construct: Construct) {
        self.frames.push(Frame {
            construct,
            exprs: Vec::new(),
        });
    }

    /// Finish the pending catch arm of a try frame, if one is open.
    fn seal_catch_arm(
        current: &mut Option<CatchTarget>,
        catches: &mut Vec<CatchClause>,
        catch_all: &mut Option<ExprList>,
        exprs: ExprList,
    ) {
        match current.take() {
            Some(CatchTarget::Tag(tag)) => catches.push(CatchClause { tag, body: exprs }),
            Some(CatchTarget::All) => *catch_all = Some(exprs),
            None => unreachable!("sealing a catch arm outside any arm"),
        }
    }

    /// Handle `end`: close the innermost construct, or finish the body.
    fn end(&mut self) -> Result<()> {
        let frame = self.frames.pop().context("unbalanced end")?;
        let exprs = frame.exprs;
        match frame.construct {
            Construct::Func => {
                self.frames.push(Frame {
                    construct: Construct::Func,
                    exprs,
                });
                self.done = true;
            }
            Construct::Block { label, sig } => {
                self.push(Expr::Block {
                    label,
                    sig,
                    body: exprs,
                });
            }
            Construct::Loop { label, sig } => {
                self.push(Expr::Loop {
                    label,
                    sig,
                    body: exprs,
                });
            }
            Construct::If {
                label,
                sig,
                then_body,
            } => {
                let (then_body, else_body) = match then_body {
                    Some(then_body) => (then_body, exprs),
                    None => (exprs, Vec::new()),
                };
                self.push(Expr::If {
                    label,
                    sig,
                    then_body,
                    else_body,
                });
            }
            Construct::Try {
                label,
                sig,
                body,
                mut catches,
                mut current,
            } => {
                let mut catch_all = None;
                let body = match body {
                    Some(body) => {
                        Self::seal_catch_arm(&mut current, &mut catches, &mut catch_all, exprs);
                        body
                    }
                    None => exprs,
                };
                self.push(Expr::Try {
                    label,
                    sig,
                    body,
                    kind: TryKind::Catch { catches, catch_all },
                });
            }
        }
        Ok(())
    }

    fn operator(&mut self, op: Operator) -> Result<()> {
        match op {
            Operator::Block { blockty } => {
                let sig = self.block_sig(blockty)?;
                let label = self.fresh_label("B");
                self.open(Construct::Block { label, sig });
            }
            Operator::Loop { blockty } => {
                let sig = self.block_sig(blockty)?;
                let label = self.fresh_label("L");
                self.open(Construct::Loop { label, sig });
            }
            Operator::If { blockty } => {
                let sig = self.block_sig(blockty)?;
                let label = self.fresh_label("I");
                self.open(Construct::If {
                    label,
                    sig,
                    then_body: None,
                });
            }
            Operator::Else => {
                let frame = self.frames.last_mut().context("else outside if")?;
                match &mut frame.construct {
                    Construct::If { then_body, .. } if then_body.is_none() => {
                        *then_body = Some(std::mem::take(&mut frame.exprs));
                    }
                    _ => bail!("else outside if"),
                }
            }
            Operator::Try { blockty } => {
                let sig = self.block_sig(blockty)?;
                let label = self.fresh_label("T");
                self.open(Construct::Try {
                    label,
                    sig,
                    body: None,
                    catches: Vec::new(),
                    current: None,
                });
            }
            Operator::Catch { tag_index } => self.catch_arm(CatchTarget::Tag(tag_index))?,
            Operator::CatchAll => self.catch_arm(CatchTarget::All)?,
            Operator::Delegate { relative_depth } => {
                // Delegate terminates the try without a matching end.
                let frame = self.frames.pop().context("delegate outside try")?;
                match frame.construct {
                    Construct::Try {
                        label,
                        sig,
                        body: None,
                        catches,
                        current: None,
                    } if catches.is_empty() => {
                        self.push(Expr::Try {
                            label,
                            sig,
                            body: frame.exprs,
                            kind: TryKind::Delegate {
                                depth: relative_depth,
                            },
                        });
                    }
                    _ => bail!("delegate after catch"),
                }
            }
            Operator::End => self.end()?,

            Operator::Br { relative_depth } => self.push(Expr::Br {
                depth: relative_depth,
            }),
            Operator::BrIf { relative_depth } => self.push(Expr::BrIf {
                depth: relative_depth,
            }),
            Operator::BrTable { targets } => {
                let default = targets.default();
                let targets = targets
                    .targets()
                    .collect::<Result<Vec<_>, _>>()
                    .context("reading br_table targets")?;
                self.push(Expr::BrTable { targets, default });
            }
            Operator::Return => self.push(Expr::Return),
            Operator::Unreachable => self.push(Expr::Unreachable),
            Operator::Nop => self.push(Expr::Nop),
            Operator::Drop => self.push(Expr::Drop),
            Operator::Select | Operator::TypedSelect { .. } => self.push(Expr::Select),

            Operator::Call { function_index } => self.push(Expr::Call {
                func: function_index,
            }),
            Operator::CallIndirect {
                type_index,
                table_index,
            } => self.push(Expr::CallIndirect {
                type_idx: type_index,
                table: table_index,
            }),

            Operator::Throw { tag_index } => self.push(Expr::Throw { tag: tag_index }),
            Operator::Rethrow { relative_depth } => self.push(Expr::Rethrow {
                depth: relative_depth,
            }),

            Operator::I32Const { value } => self.push(Expr::Const(Const::I32(value))),
            Operator::I64Const { value } => self.push(Expr::Const(Const::I64(value))),
            Operator::F32Const { value } => self.push(Expr::Const(Const::F32(value.bits()))),
            Operator::F64Const { value } => self.push(Expr::Const(Const::F64(value.bits()))),

            Operator::LocalGet { local_index } => self.push(Expr::LocalGet { index: local_index }),
            Operator::LocalSet { local_index } => self.push(Expr::LocalSet { index: local_index }),
            Operator::LocalTee { local_index } => self.push(Expr::LocalTee { index: local_index }),
            Operator::GlobalGet { global_index } => {
                self.push(Expr::GlobalGet {
                    index: global_index,
                });
            }
            Operator::GlobalSet { global_index } => {
                self.push(Expr::GlobalSet {
                    index: global_index,
                });
            }

            Operator::MemorySize { mem } => self.push(Expr::MemorySize { memory: mem }),
            Operator::MemoryGrow { mem } => self.push(Expr::MemoryGrow { memory: mem }),
            Operator::MemoryFill { mem } => self.push(Expr::MemoryFill { memory: mem }),
            Operator::MemoryCopy { dst_mem, src_mem } => self.push(Expr::MemoryCopy {
                dst: dst_mem,
                src: src_mem,
            }),
            Operator::MemoryInit { data_index, mem } => self.push(Expr::MemoryInit {
                segment: data_index,
                memory: mem,
            }),
            Operator::DataDrop { data_index } => self.push(Expr::DataDrop {
                segment: data_index,
            }),
            Operator::TableCopy {
                dst_table,
                src_table,
            } => self.push(Expr::TableCopy {
                dst: dst_table,
                src: src_table,
            }),
            Operator::TableInit { elem_index, table } => self.push(Expr::TableInit {
                segment: elem_index,
                table,
            }),
            Operator::ElemDrop { elem_index } => self.push(Expr::ElemDrop {
                segment: elem_index,
            }),

            // Loads and stores.
            Operator::I32Load { memarg } => self.load(LoadOp::I32Load, memarg),
            Operator::I64Load { memarg } => self.load(LoadOp::I64Load, memarg),
            Operator::F32Load { memarg } => self.load(LoadOp::F32Load, memarg),
            Operator::F64Load { memarg } => self.load(LoadOp::F64Load, memarg),
            Operator::I32Load8S { memarg } => self.load(LoadOp::I32Load8S, memarg),
            Operator::I32Load8U { memarg } => self.load(LoadOp::I32Load8U, memarg),
            Operator::I32Load16S { memarg } => self.load(LoadOp::I32Load16S, memarg),
            Operator::I32Load16U { memarg } => self.load(LoadOp::I32Load16U, memarg),
            Operator::I64Load8S { memarg } => self.load(LoadOp::I64Load8S, memarg),
            Operator::I64Load8U { memarg } => self.load(LoadOp::I64Load8U, memarg),
            Operator::I64Load16S { memarg } => self.load(LoadOp::I64Load16S, memarg),
            Operator::I64Load16U { memarg } => self.load(LoadOp::I64Load16U, memarg),
            Operator::I64Load32S { memarg } => self.load(LoadOp::I64Load32S, memarg),
            Operator::I64Load32U { memarg } => self.load(LoadOp::I64Load32U, memarg),
            Operator::I32Store { memarg } => self.store(StoreOp::I32Store, memarg),
            Operator::I64Store { memarg } => self.store(StoreOp::I64Store, memarg),
            Operator::F32Store { memarg } => self.store(StoreOp::F32Store, memarg),
            Operator::F64Store { memarg } => self.store(StoreOp::F64Store, memarg),
            Operator::I32Store8 { memarg } => self.store(StoreOp::I32Store8, memarg),
            Operator::I32Store16 { memarg } => self.store(StoreOp::I32Store16, memarg),
            Operator::I64Store8 { memarg } => self.store(StoreOp::I64Store8, memarg),
            Operator::I64Store16 { memarg } => self.store(StoreOp::I64Store16, memarg),
            Operator::I64Store32 { memarg } => self.store(StoreOp::I64Store32, memarg),

            // Binary operators.
            Operator::I32Add => self.push(Expr::Binary(BinaryOp::I32Add)),
            Operator::I32Sub => self.push(Expr::Binary(BinaryOp::I32Sub)),
            Operator::I32Mul => self.push(Expr::Binary(BinaryOp::I32Mul)),
            Operator::I32DivS => self.push(Expr::Binary(BinaryOp::I32DivS)),
            Operator::I32DivU => self.push(Expr::Binary(BinaryOp::I32DivU)),
            Operator::I32RemS => self.push(Expr::Binary(BinaryOp::I32RemS)),
            Operator::I32RemU => self.push(Expr::Binary(BinaryOp::I32RemU)),
            Operator::I32And => self.push(Expr::Binary(BinaryOp::I32And)),
            Operator::I32Or => self.push(Expr::Binary(BinaryOp::I32Or)),
            Operator::I32Xor => self.push(Expr::Binary(BinaryOp::I32Xor)),
            Operator::I32Shl => self.push(Expr::Binary(BinaryOp::I32Shl)),
            Operator::I32ShrS => self.push(Expr::Binary(BinaryOp::I32ShrS)),
            Operator::I32ShrU => self.push(Expr::Binary(BinaryOp::I32ShrU)),
            Operator::I32Rotl => self.push(Expr::Binary(BinaryOp::I32Rotl)),
            Operator::I32Rotr => self.push(Expr::Binary(BinaryOp::I32Rotr)),
            Operator::I64Add => self.push(Expr::Binary(BinaryOp::I64Add)),
            Operator::I64Sub => self.push(Expr::Binary(BinaryOp::I64Sub)),
            Operator::I64Mul => self.push(Expr::Binary(BinaryOp::I64Mul)),
            Operator::I64DivS => self.push(Expr::Binary(BinaryOp::I64DivS)),
            Operator::I64DivU => self.push(Expr::Binary(BinaryOp::I64DivU)),
            Operator::I64RemS => self.push(Expr::Binary(BinaryOp::I64RemS)),
            Operator::I64RemU => self.push(Expr::Binary(BinaryOp::I64RemU)),
            Operator::I64And => self.push(Expr::Binary(BinaryOp::I64And)),
            Operator::I64Or => self.push(Expr::Binary(BinaryOp::I64Or)),
            Operator::I64Xor => self.push(Expr::Binary(BinaryOp::I64Xor)),
            Operator::I64Shl => self.push(Expr::Binary(BinaryOp::I64Shl)),
            Operator::I64ShrS => self.push(Expr::Binary(BinaryOp::I64ShrS)),
            Operator::I64ShrU => self.push(Expr::Binary(BinaryOp::I64ShrU)),
            Operator::I64Rotl => self.push(Expr::Binary(BinaryOp::I64Rotl)),
            Operator::I64Rotr => self.push(Expr::Binary(BinaryOp::I64Rotr)),
            Operator::F32Add => self.push(Expr::Binary(BinaryOp::F32Add)),
            Operator::F32Sub => self.push(Expr::Binary(BinaryOp::F32Sub)),
            Operator::F32Mul => self.push(Expr::Binary(BinaryOp::F32Mul)),
            Operator::F32Div => self.push(Expr::Binary(BinaryOp::F32Div)),
            Operator::F32Min => self.push(Expr::Binary(BinaryOp::F32Min)),
            Operator::F32Max => self.push(Expr::Binary(BinaryOp::F32Max)),
            Operator::F32Copysign => self.push(Expr::Binary(BinaryOp::F32Copysign)),
            Operator::F64Add => self.push(Expr::Binary(BinaryOp::F64Add)),
            Operator::F64Sub => self.push(Expr::Binary(BinaryOp::F64Sub)),
            Operator::F64Mul => self.push(Expr::Binary(BinaryOp::F64Mul)),
            Operator::F64Div => self.push(Expr::Binary(BinaryOp::F64Div)),
            Operator::F64Min => self.push(Expr::Binary(BinaryOp::F64Min)),
            Operator::F64Max => self.push(Expr::Binary(BinaryOp::F64Max)),
            Operator::F64Copysign => self.push(Expr::Binary(BinaryOp::F64Copysign)),

            // Comparisons.
            Operator::I32Eq => self.push(Expr::Compare(CompareOp::I32Eq)),
            Operator::I32Ne => self.push(Expr::Compare(CompareOp::I32Ne)),
            Operator::I32LtS => self.push(Expr::Compare(CompareOp::I32LtS)),
            Operator::I32LtU => self.push(Expr::Compare(CompareOp::I32LtU)),
            Operator::I32GtS => self.push(Expr::Compare(CompareOp::I32GtS)),
            Operator::I32GtU => self.push(Expr::Compare(CompareOp::I32GtU)),
            Operator::I32LeS => self.push(Expr::Compare(CompareOp::I32LeS)),
            Operator::I32LeU => self.push(Expr::Compare(CompareOp::I32LeU)),
            Operator::I32GeS => self.push(Expr::Compare(CompareOp::I32GeS)),
            Operator::I32GeU => self.push(Expr::Compare(CompareOp::I32GeU)),
            Operator::I64Eq => self.push(Expr::Compare(CompareOp::I64Eq)),
            Operator::I64Ne => self.push(Expr::Compare(CompareOp::I64Ne)),
            Operator::I64LtS => self.push(Expr::Compare(CompareOp::I64LtS)),
            Operator::I64LtU => self.push(Expr::Compare(CompareOp::I64LtU)),
            Operator::I64GtS => self.push(Expr::Compare(CompareOp::I64GtS)),
            Operator::I64GtU => self.push(Expr::Compare(CompareOp::I64GtU)),
            Operator::I64LeS => self.push(Expr::Compare(CompareOp::I64LeS)),
            Operator::I64LeU => self.push(Expr::Compare(CompareOp::I64LeU)),
            Operator::I64GeS => self.push(Expr::Compare(CompareOp::I64GeS)),
            Operator::I64GeU => self.push(Expr::Compare(CompareOp::I64GeU)),
            Operator::F32Eq => self.push(Expr::Compare(CompareOp::F32Eq)),
            Operator::F32Ne => self.push(Expr::Compare(CompareOp::F32Ne)),
            Operator::F32Lt => self.push(Expr::Compare(CompareOp::F32Lt)),
            Operator::F32Gt => self.push(Expr::Compare(CompareOp::F32Gt)),
            Operator::F32Le => self.push(Expr::Compare(CompareOp::F32Le)),
            Operator::F32Ge => self.push(Expr::Compare(CompareOp::F32Ge)),
            Operator::F64Eq => self.push(Expr::Compare(CompareOp::F64Eq)),
            Operator::F64Ne => self.push(Expr::Compare(CompareOp::F64Ne)),
            Operator::F64Lt => self.push(Expr::Compare(CompareOp::F64Lt)),
            Operator::F64Gt => self.push(Expr::Compare(CompareOp::F64Gt)),
            Operator::F64Le => self.push(Expr::Compare(CompareOp::F64Le)),
            Operator::F64Ge => self.push(Expr::Compare(CompareOp::F64Ge)),

            // Conversions.
            Operator::I32Eqz => self.push(Expr::Convert(ConvertOp::I32Eqz)),
            Operator::I64Eqz => self.push(Expr::Convert(ConvertOp::I64Eqz)),
            Operator::I32WrapI64 => self.push(Expr::Convert(ConvertOp::I32WrapI64)),
            Operator::I64ExtendI32S => self.push(Expr::Convert(ConvertOp::I64ExtendI32S)),
            Operator::I64ExtendI32U => self.push(Expr::Convert(ConvertOp::I64ExtendI32U)),
            Operator::I32TruncF32S => self.push(Expr::Convert(ConvertOp::I32TruncF32S)),
            Operator::I32TruncF32U => self.push(Expr::Convert(ConvertOp::I32TruncF32U)),
            Operator::I32TruncF64S => self.push(Expr::Convert(ConvertOp::I32TruncF64S)),
            Operator::I32TruncF64U => self.push(Expr::Convert(ConvertOp::I32TruncF64U)),
            Operator::I64TruncF32S => self.push(Expr::Convert(ConvertOp::I64TruncF32S)),
            Operator::I64TruncF32U => self.push(Expr::Convert(ConvertOp::I64TruncF32U)),
            Operator::I64TruncF64S => self.push(Expr::Convert(ConvertOp::I64TruncF64S)),
            Operator::I64TruncF64U => self.push(Expr::Convert(ConvertOp::I64TruncF64U)),
            Operator::I32TruncSatF32S => self.push(Expr::Convert(ConvertOp::I32TruncSatF32S)),
            Operator::I32TruncSatF32U => self.push(Expr::Convert(ConvertOp::I32TruncSatF32U)),
            Operator::I32TruncSatF64S => self.push(Expr::Convert(ConvertOp::I32TruncSatF64S)),
            Operator::I32TruncSatF64U => self.push(Expr::Convert(ConvertOp::I32TruncSatF64U)),
            Operator::I64TruncSatF32S => self.push(Expr::Convert(ConvertOp::I64TruncSatF32S)),
            Operator::I64TruncSatF32U => self.push(Expr::Convert(ConvertOp::I64TruncSatF32U)),
            Operator::I64TruncSatF64S => self.push(Expr::Convert(ConvertOp::I64TruncSatF64S)),
            Operator::I64TruncSatF64U => self.push(Expr::Convert(ConvertOp::I64TruncSatF64U)),
            Operator::F32ConvertI32S => self.push(Expr::Convert(ConvertOp::F32ConvertI32S)),
            Operator::F32ConvertI32U => self.push(Expr::Convert(ConvertOp::F32ConvertI32U)),
            Operator::F32ConvertI64S => self.push(Expr::Convert(ConvertOp::F32ConvertI64S)),
            Operator::F32ConvertI64U => self.push(Expr::Convert(ConvertOp::F32ConvertI64U)),
            Operator::F64ConvertI32S => self.push(Expr::Convert(ConvertOp::F64ConvertI32S)),
            Operator::F64ConvertI32U => self.push(Expr::Convert(ConvertOp::F64ConvertI32U)),
            Operator::F64ConvertI64S => self.push(Expr::Convert(ConvertOp::F64ConvertI64S)),
            Operator::F64ConvertI64U => self.push(Expr::Convert(ConvertOp::F64ConvertI64U)),
            Operator::F32DemoteF64 => self.push(Expr::Convert(ConvertOp::F32DemoteF64)),
            Operator::F64PromoteF32 => self.push(Expr::Convert(ConvertOp::F64PromoteF32)),
            Operator::I32ReinterpretF32 => self.push(Expr::Convert(ConvertOp::I32ReinterpretF32)),
            Operator::I64ReinterpretF64 => self.push(Expr::Convert(ConvertOp::I64ReinterpretF64)),
            Operator::F32ReinterpretI32 => self.push(Expr::Convert(ConvertOp::F32ReinterpretI32)),
            Operator::F64ReinterpretI64 => self.push(Expr::Convert(ConvertOp::F64ReinterpretI64)),

            // Unary operators.
            Operator::I32Clz => self.push(Expr::Unary(UnaryOp::I32Clz)),
            Operator::I32Ctz => self.push(Expr::Unary(UnaryOp::I32Ctz)),
            Operator::I32Popcnt => self.push(Expr::Unary(UnaryOp::I32Popcnt)),
            Operator::I64Clz => self.push(Expr::Unary(UnaryOp::I64Clz)),
            Operator::I64Ctz => self.push(Expr::Unary(UnaryOp::I64Ctz)),
            Operator::I64Popcnt => self.push(Expr::Unary(UnaryOp::I64Popcnt)),
            Operator::F32Abs => self.push(Expr::Unary(UnaryOp::F32Abs)),
            Operator::F32Neg => self.push(Expr::Unary(UnaryOp::F32Neg)),
            Operator::F32Ceil => self.push(Expr::Unary(UnaryOp::F32Ceil)),
            Operator::F32Floor => self.push(Expr::Unary(UnaryOp::F32Floor)),
            Operator::F32Trunc => self.push(Expr::Unary(UnaryOp::F32Trunc)),
            Operator::F32Nearest => self.push(Expr::Unary(UnaryOp::F32Nearest)),
            Operator::F32Sqrt => self.push(Expr::Unary(UnaryOp::F32Sqrt)),
            Operator::F64Abs => self.push(Expr::Unary(UnaryOp::F64Abs)),
            Operator::F64Neg => self.push(Expr::Unary(UnaryOp::F64Neg)),
            Operator::F64Ceil => self.push(Expr::Unary(UnaryOp::F64Ceil)),
            Operator::F64Floor => self.push(Expr::Unary(UnaryOp::F64Floor)),
            Operator::F64Trunc => self.push(Expr::Unary(UnaryOp::F64Trunc)),
            Operator::F64Nearest => self.push(Expr::Unary(UnaryOp::F64Nearest)),
            Operator::F64Sqrt => self.push(Expr::Unary(UnaryOp::F64Sqrt)),
            Operator::I32Extend8S => self.push(Expr::Unary(UnaryOp::I32Extend8S)),
            Operator::I32Extend16S => self.push(Expr::Unary(UnaryOp::I32Extend16S)),
            Operator::I64Extend8S => self.push(Expr::Unary(UnaryOp::I64Extend8S)),
            Operator::I64Extend16S => self.push(Expr::Unary(UnaryOp::I64Extend16S)),
            Operator::I64Extend32S => self.push(Expr::Unary(UnaryOp::I64Extend32S)),

            op => bail!("unimplemented: {}", opcode_class(&op)),
        }
        Ok(())
    }

    fn load(&mut self, op: LoadOp, memarg: wasmparser::MemArg) {
        self.push(Expr::Load {
            op,
            memory: memarg.memory,
            offset: memarg.offset,
        });
    }

    fn store(&mut self, op: StoreOp, memarg: wasmparser::MemArg) {
        self.push(Expr::Store {
            op,
            memory: memarg.memory,
            offset: memarg.offset,
        });
    }

    fn catch_arm(&mut self, target: CatchTarget) -> Result<()> {
        let frame = self.frames.last_mut().context("catch outside try")?;
        match &mut frame.construct {
            Construct::Try {
                body,
                catches,
                current,
                ..
            } => {
                let exprs = std::mem::take(&mut frame.exprs);
                if body.is_none() {
                    *body = Some(exprs);
                } else {
                    // A previous catch arm ends here. catch_all is always the
                    // last arm, so it is sealed only at end.
                    match current.take() {
                        Some(CatchTarget::Tag(tag)) => {
                            catches.push(CatchClause { tag, body: exprs });
                        }
                        Some(CatchTarget::All) | None => bail!("catch after catch_all"),
                    }
                }
                *current = Some(target);
                Ok(())
            }
            _ => bail!("catch outside try"),
        }
    }

    fn finish(mut self) -> Result<ExprList> {
        if !self.done || self.frames.len() != 1 {
            bail!("function body ended with unbalanced control");
        }
        Ok(self.frames.pop().expect("one frame remains").exprs)
    }
}

/// Parse and structure one function body.
fn build_body(body: &[u8], types: &[Signature]) -> Result<ExprList> {
    let mut builder = BodyBuilder::new(types);
    let mut reader = wasmparser::BinaryReader::new(body, 0);
    while !builder.done {
        let op = reader.read_operator().context("failed to read operator")?;
        builder.operator(op)?;
    }
    builder.finish()
}

// ─── Module assembly ────────────────────────────────────────────────────────

/// Build the structured module IR from a parsed module.
pub fn build_module(parsed: &ParsedModule, options: &TranspileOptions) -> Result<Module> {
    let use_names = options.read_debug_names;
    let mut module = Module::default();

    for (i, ty) in parsed.types.iter().enumerate() {
        let params = ty
            .params()
            .iter()
            .map(|vt| ValueType::from_wasmparser(*vt))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("type {i}"))?;
        let results = ty
            .results()
            .iter()
            .map(|vt| ValueType::from_wasmparser(*vt))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("type {i}"))?;
        if !options.features.multi_value && results.len() > 1 {
            bail!("multi-value results require --enable-multi-value");
        }
        module.types.push(Signature { params, results });
    }

    // Imports claim the low indices of every space, in declaration order.
    for import in &parsed.imports {
        let (kind, index) = match &import.kind {
            ImportKindInfo::Function(type_idx) => {
                let index = module.funcs.len() as u32;
                let n_params = module.types[*type_idx as usize].params.len();
                module.funcs.push(Func {
                    name: format!("f{index}"),
                    type_idx: *type_idx,
                    param_names: (0..n_params).map(|i| format!("p{i}")).collect(),
                    locals: Vec::new(),
                    body: Vec::new(),
                });
                module.num_func_imports += 1;
                (ExternalKind::Func, index)
            }
            ImportKindInfo::Global { val_type, mutable } => {
                let index = module.globals.len() as u32;
                module.globals.push(Global {
                    name: format!("g{index}"),
                    ty: ValueType::from_wasmparser(*val_type)?,
                    mutable: *mutable,
                    init: None,
                });
                module.num_global_imports += 1;
                (ExternalKind::Global, index)
            }
            ImportKindInfo::Memory(mem) => {
                let index = module.memories.len() as u32;
                module.memories.push(MemoryDef {
                    name: format!("M{index}"),
                    initial_pages: mem.initial_pages,
                    maximum_pages: mem.maximum_pages,
                });
                module.num_memory_imports += 1;
                (ExternalKind::Memory, index)
            }
            ImportKindInfo::Table(tbl) => {
                let index = module.tables.len() as u32;
                module.tables.push(TableDef {
                    name: format!("T{index}"),
                    initial_size: tbl.initial_size,
                    max_size: tbl.max_size,
                });
                module.num_table_imports += 1;
                (ExternalKind::Table, index)
            }
            ImportKindInfo::Tag(type_idx) => {
                let index = module.tags.len() as u32;
                module.tags.push(TagDef {
                    name: format!("t{index}"),
                    type_idx: *type_idx,
                });
                module.num_tag_imports += 1;
                (ExternalKind::Tag, index)
            }
        };
        module.imports.push(Import {
            module: import.module_name.clone(),
            field: import.name.clone(),
            kind,
            index,
        });
    }

    // Local definitions follow.
    for (i, func) in parsed.functions.iter().enumerate() {
        let func_index = (module.num_func_imports + i) as u32;
        let sig = &module.types[func.type_idx as usize];
        let n_params = sig.params.len();

        let param_names = (0..n_params)
            .map(|p| {
                use_names
                    .then(|| parsed.names.locals.get(&(func_index, p as u32)).cloned())
                    .flatten()
                    .unwrap_or_else(|| format!("p{p}"))
            })
            .collect();
        let locals = func
            .locals
            .iter()
            .enumerate()
            .map(|(l, vt)| {
                let local_index = (n_params + l) as u32;
                let name = use_names
                    .then(|| parsed.names.locals.get(&(func_index, local_index)).cloned())
                    .flatten()
                    .unwrap_or_else(|| format!("l{local_index}"));
                Ok((name, ValueType::from_wasmparser(*vt)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let body = build_body(&func.body, &module.types)
            .with_context(|| format!("failed to build IR for function {func_index}"))?;

        module.funcs.push(Func {
            name: format!("f{func_index}"),
            type_idx: func.type_idx,
            param_names,
            locals,
            body,
        });
    }
    for (i, mem) in parsed.memories.iter().enumerate() {
        let index = module.memories.len();
        debug_assert_eq!(index, module.num_memory_imports + i);
        module.memories.push(MemoryDef {
            name: format!("M{index}"),
            initial_pages: mem.initial_pages,
            maximum_pages: mem.maximum_pages,
        });
    }
    for (i, tbl) in parsed.tables.iter().enumerate() {
        let index = module.tables.len();
        debug_assert_eq!(index, module.num_table_imports + i);
        module.tables.push(TableDef {
            name: format!("T{index}"),
            initial_size: tbl.initial_size,
            max_size: tbl.max_size,
        });
    }
    for tag in &parsed.tags {
        let index = module.tags.len();
        module.tags.push(TagDef {
            name: format!("t{index}"),
            type_idx: tag.type_idx,
        });
    }
    for global in &parsed.globals {
        let index = module.globals.len();
        module.globals.push(Global {
            name: format!("g{index}"),
            ty: ValueType::from_wasmparser(global.val_type)?,
            mutable: global.mutable,
            init: Some(init_expr(&global.init)),
        });
    }

    // Debug names override the synthesized defaults.
    if use_names {
        for (idx, name) in &parsed.names.funcs {
            if let Some(f) = module.funcs.get_mut(*idx as usize) {
                f.name = name.clone();
            }
        }
        for (idx, name) in &parsed.names.globals {
            if let Some(g) = module.globals.get_mut(*idx as usize) {
                g.name = name.clone();
            }
        }
        for (idx, name) in &parsed.names.memories {
            if let Some(m) = module.memories.get_mut(*idx as usize) {
                m.name = name.clone();
            }
        }
        for (idx, name) in &parsed.names.tables {
            if let Some(t) = module.tables.get_mut(*idx as usize) {
                t.name = name.clone();
            }
        }
        for (idx, name) in &parsed.names.tags {
            if let Some(t) = module.tags.get_mut(*idx as usize) {
                t.name = name.clone();
            }
        }
    }

    for export in &parsed.exports {
        module.exports.push(Export {
            name: export.name.clone(),
            kind: match export.kind {
                crate::parser::ExportKind::Func => ExternalKind::Func,
                crate::parser::ExportKind::Table => ExternalKind::Table,
                crate::parser::ExportKind::Memory => ExternalKind::Memory,
                crate::parser::ExportKind::Global => ExternalKind::Global,
                crate::parser::ExportKind::Tag => ExternalKind::Tag,
            },
            index: export.index,
        });
    }

    for seg in &parsed.element_segments {
        module.elem_segments.push(ElemSegment {
            kind: match &seg.kind {
                ElementSegmentKind::Active {
                    table_index,
                    offset,
                } => ElemKind::Active {
                    table: *table_index,
                    offset: init_expr(offset),
                },
                ElementSegmentKind::Passive => ElemKind::Passive,
                ElementSegmentKind::Declared => ElemKind::Declared,
            },
            func_indices: seg.func_indices.clone(),
        });
    }

    for seg in &parsed.data_segments {
        module.data_segments.push(DataSegmentDef {
            kind: match &seg.kind {
                DataSegmentKind::Active {
                    memory_index,
                    offset,
                } => DataKind::Active {
                    memory: *memory_index,
                    offset: init_expr(offset),
                },
                DataSegmentKind::Passive => DataKind::Passive,
            },
            data: seg.data.clone(),
        });
    }

    module.start = parsed.start;

    log::debug!(
        "built IR: {} functions ({} imported), {} memories, {} tables, {} tags",
        module.funcs.len(),
        module.num_func_imports,
        module.memories.len(),
        module.tables.len(),
        module.tags.len()
    );

    Ok(module)
}

//! WebAssembly module reader.
//!
//! This module wraps the `wasmparser` crate to extract structured information
//! from `.wasm` binary files. The binary is validated up front; everything
//! downstream assumes a well-typed module.

use crate::Features;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use wasmparser::{
    BinaryReader, ExternalKind, FuncType, Name, NameSectionReader, Parser, Payload, TypeRef,
    ValType, Validator, WasmFeatures,
};

/// A single memory declared or imported by the module.
#[derive(Debug, Clone)]
pub struct MemoryInfo {
    /// Initial size in pages (64 KiB each).
    pub initial_pages: u64,
    /// Maximum size in pages (None = no declared maximum).
    pub maximum_pages: Option<u64>,
}

/// A table declared or imported by the module.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Initial number of entries.
    pub initial_size: u64,
    /// Maximum number of entries (None = no declared maximum).
    pub max_size: Option<u64>,
}

/// Information about a single Wasm global variable.
#[derive(Debug, Clone)]
pub struct GlobalInfo {
    /// The value type of the global.
    pub val_type: ValType,
    /// Whether the global is mutable.
    pub mutable: bool,
    /// The constant initializer expression.
    pub init: ParsedInitExpr,
}

/// Parsed constant initializer expression. Validated Wasm restricts these to
/// a single const instruction or a read of an imported global.
#[derive(Debug, Clone, Copy)]
pub enum ParsedInitExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(u32),
}

/// An exception tag declared by the module.
#[derive(Debug, Clone)]
pub struct TagInfo {
    /// Index into the type section describing the payload signature.
    pub type_idx: u32,
}

/// An element segment.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub kind: ElementSegmentKind,
    /// Function indices the segment carries.
    pub func_indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub enum ElementSegmentKind {
    /// Copied into a table at instantiation.
    Active { table_index: u32, offset: ParsedInitExpr },
    /// Only usable through `table.init`.
    Passive,
    /// Declares functions for `ref.func`; carries no table contents.
    Declared,
}

/// A data segment.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub kind: DataSegmentKind,
    /// Raw bytes.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum DataSegmentKind {
    /// Copied into a memory at instantiation.
    Active { memory_index: u32, offset: ParsedInitExpr },
    /// Only usable through `memory.init`.
    Passive,
}

/// An export from the Wasm module.
#[derive(Debug, Clone)]
pub struct ExportInfo {
    /// The exported field name, verbatim.
    pub name: String,
    /// What kind of item is exported.
    pub kind: ExportKind,
    /// Index into the corresponding index space.
    pub index: u32,
}

/// Kind of export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

/// An import from the host environment.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    /// The import module name (e.g., "env").
    pub module_name: String,
    /// The import field name (e.g., "log").
    pub name: String,
    /// What kind of item is imported.
    pub kind: ImportKindInfo,
}

/// Kind of import.
#[derive(Debug, Clone)]
pub enum ImportKindInfo {
    /// Imported function (index into the type section).
    Function(u32),
    /// Imported global.
    Global { val_type: ValType, mutable: bool },
    /// Imported memory.
    Memory(MemoryInfo),
    /// Imported table.
    Table(TableInfo),
    /// Imported exception tag (index into the type section).
    Tag(u32),
}

/// Debug names harvested from the custom "name" section.
#[derive(Debug, Clone, Default)]
pub struct DebugNames {
    pub funcs: HashMap<u32, String>,
    /// (function index, local index) -> name. Covers params and locals.
    pub locals: HashMap<(u32, u32), String>,
    pub globals: HashMap<u32, String>,
    pub memories: HashMap<u32, String>,
    pub tables: HashMap<u32, String>,
    pub tags: HashMap<u32, String>,
}

/// A single function in the module.
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    /// Index into the type section.
    pub type_idx: u32,
    /// Declared local variable types (parameters live in the function type).
    pub locals: Vec<ValType>,
    /// Function body bytecode (parsed later by the IR builder).
    pub body: Vec<u8>,
}

/// Parsed WebAssembly module.
#[derive(Debug, Clone, Default)]
pub struct ParsedModule {
    /// Type section: function signatures.
    pub types: Vec<FuncType>,
    /// Local (non-imported) functions.
    pub functions: Vec<ParsedFunction>,
    /// Memories declared by the module (imported memories live in `imports`).
    pub memories: Vec<MemoryInfo>,
    /// Tables declared by the module.
    pub tables: Vec<TableInfo>,
    /// Exception tags declared by the module.
    pub tags: Vec<TagInfo>,
    /// Element segments.
    pub element_segments: Vec<ElementSegment>,
    /// Globals declared by the module.
    pub globals: Vec<GlobalInfo>,
    /// Data segments.
    pub data_segments: Vec<DataSegment>,
    /// Exports.
    pub exports: Vec<ExportInfo>,
    /// Imports, in declaration order.
    pub imports: Vec<ImportInfo>,
    /// Start function index, if any.
    pub start: Option<u32>,
    /// Debug names, if the binary carries a name section.
    pub names: DebugNames,
}

impl ParsedModule {
    pub fn num_imports_of(&self, pred: impl Fn(&ImportKindInfo) -> bool) -> usize {
        self.imports.iter().filter(|i| pred(&i.kind)).count()
    }

    pub fn num_func_imports(&self) -> usize {
        self.num_imports_of(|k| matches!(k, ImportKindInfo::Function(_)))
    }
}

fn wasm_features(features: &Features) -> WasmFeatures {
    let mut wf = WasmFeatures::MUTABLE_GLOBAL
        | WasmFeatures::SATURATING_FLOAT_TO_INT
        | WasmFeatures::SIGN_EXTENSION
        | WasmFeatures::FLOATS
        | WasmFeatures::MULTI_VALUE;
    if features.exceptions {
        wf |= WasmFeatures::EXCEPTIONS;
    }
    if features.bulk_memory {
        wf |= WasmFeatures::BULK_MEMORY | WasmFeatures::REFERENCE_TYPES;
    }
    if features.tail_call {
        wf |= WasmFeatures::TAIL_CALL;
    }
    if features.multi_memory {
        wf |= WasmFeatures::MULTI_MEMORY;
    }
    wf
}

/// Evaluate a wasmparser ConstExpr into our ParsedInitExpr.
fn eval_const_expr(const_expr: wasmparser::ConstExpr) -> Result<ParsedInitExpr> {
    let mut reader = const_expr.get_operators_reader();
    let op = reader.read().context("reading const expr operator")?;
    match op {
        wasmparser::Operator::I32Const { value } => Ok(ParsedInitExpr::I32(value)),
        wasmparser::Operator::I64Const { value } => Ok(ParsedInitExpr::I64(value)),
        wasmparser::Operator::F32Const { value } => Ok(ParsedInitExpr::F32(value.bits())),
        wasmparser::Operator::F64Const { value } => Ok(ParsedInitExpr::F64(value.bits())),
        wasmparser::Operator::GlobalGet { global_index } => {
            Ok(ParsedInitExpr::GlobalGet(global_index))
        }
        _ => bail!("unsupported const expression operator: {:?}", op),
    }
}

/// Parse an element segment.
fn parse_element_segment(element: wasmparser::Element) -> Result<ElementSegment> {
    let kind = match element.kind {
        wasmparser::ElementKind::Active {
            table_index,
            offset_expr,
        } => ElementSegmentKind::Active {
            table_index: table_index.unwrap_or(0),
            offset: eval_const_expr(offset_expr)?,
        },
        wasmparser::ElementKind::Passive => ElementSegmentKind::Passive,
        wasmparser::ElementKind::Declared => ElementSegmentKind::Declared,
    };

    let mut func_indices = Vec::new();
    match element.items {
        wasmparser::ElementItems::Functions(funcs) => {
            for func_idx in funcs {
                func_indices.push(func_idx.context("reading element func index")?);
            }
        }
        wasmparser::ElementItems::Expressions(..) => {
            bail!("expression-based element segments not supported");
        }
    }

    Ok(ElementSegment { kind, func_indices })
}

/// Parse a data segment.
fn parse_data_segment(data: wasmparser::Data) -> Result<DataSegment> {
    let kind = match data.kind {
        wasmparser::DataKind::Active {
            memory_index,
            offset_expr,
        } => DataSegmentKind::Active {
            memory_index,
            offset: eval_const_expr(offset_expr)?,
        },
        wasmparser::DataKind::Passive => DataSegmentKind::Passive,
    };
    Ok(DataSegment {
        kind,
        data: data.data.to_vec(),
    })
}

/// Parse a function code section entry, extracting locals and bytecode.
fn parse_code_entry(body: wasmparser::FunctionBody, type_idx: u32) -> Result<ParsedFunction> {
    let mut locals = Vec::new();
    let locals_reader = body.get_locals_reader().context("getting locals reader")?;
    for local in locals_reader {
        let (count, val_type) = local.context("reading local")?;
        for _ in 0..count {
            locals.push(val_type);
        }
    }

    let operators_reader = body
        .get_operators_reader()
        .context("getting operators reader")?;
    let mut binary_reader = operators_reader.get_binary_reader();
    let remaining = binary_reader.bytes_remaining();
    let body_bytes = binary_reader
        .read_bytes(remaining)
        .context("reading body bytes")?;

    Ok(ParsedFunction {
        type_idx,
        locals,
        body: body_bytes.to_vec(),
    })
}

/// Harvest function/local/global/... names from the "name" custom section.
fn parse_name_section(data: &[u8], offset: usize, names: &mut DebugNames) -> Result<()> {
    let reader = NameSectionReader::new(BinaryReader::new(data, offset));
    for subsection in reader {
        let subsection = subsection.context("reading name subsection")?;
        match subsection {
            Name::Function(map) => {
                for naming in map {
                    let naming = naming?;
                    names.funcs.insert(naming.index, naming.name.to_string());
                }
            }
            Name::Local(map) => {
                for indirect in map {
                    let indirect = indirect?;
                    for naming in indirect.names {
                        let naming = naming?;
                        names
                            .locals
                            .insert((indirect.index, naming.index), naming.name.to_string());
                    }
                }
            }
            Name::Global(map) => {
                for naming in map {
                    let naming = naming?;
                    names.globals.insert(naming.index, naming.name.to_string());
                }
            }
            Name::Memory(map) => {
                for naming in map {
                    let naming = naming?;
                    names.memories.insert(naming.index, naming.name.to_string());
                }
            }
            Name::Table(map) => {
                for naming in map {
                    let naming = naming?;
                    names.tables.insert(naming.index, naming.name.to_string());
                }
            }
            Name::Tag(map) => {
                for naming in map {
                    let naming = naming?;
                    names.tags.insert(naming.index, naming.name.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parse and validate a WebAssembly binary into a structured module.
pub fn parse_wasm(wasm_bytes: &[u8], features: &Features) -> Result<ParsedModule> {
    Validator::new_with_features(wasm_features(features))
        .validate_all(wasm_bytes)
        .context("validation failed")?;

    let parser = Parser::new(0);
    let mut module = ParsedModule::default();
    let mut function_types: Vec<u32> = Vec::new();

    for payload in parser.parse_all(wasm_bytes) {
        let payload = payload.context("parsing wasm payload")?;

        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    let rec_group = rec_group.context("reading rec group")?;
                    for sub_type in rec_group.types() {
                        match &sub_type.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(func_ty) => {
                                module.types.push(func_ty.clone());
                            }
                            // GC types never reach here on the accepted
                            // feature set; validation rejects them first.
                            _ => bail!("unimplemented: GC types"),
                        }
                    }
                }
            }

            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.context("reading import")?;
                    let kind = match import.ty {
                        TypeRef::Func(type_idx) => ImportKindInfo::Function(type_idx),
                        TypeRef::Global(global_ty) => ImportKindInfo::Global {
                            val_type: global_ty.content_type,
                            mutable: global_ty.mutable,
                        },
                        TypeRef::Memory(mem_ty) => ImportKindInfo::Memory(MemoryInfo {
                            initial_pages: mem_ty.initial,
                            maximum_pages: mem_ty.maximum,
                        }),
                        TypeRef::Table(table_ty) => ImportKindInfo::Table(TableInfo {
                            initial_size: table_ty.initial as u64,
                            max_size: table_ty.maximum.map(|m| m as u64),
                        }),
                        TypeRef::Tag(tag_ty) => ImportKindInfo::Tag(tag_ty.func_type_idx),
                    };
                    module.imports.push(ImportInfo {
                        module_name: import.module.to_string(),
                        name: import.name.to_string(),
                        kind,
                    });
                }
            }

            Payload::FunctionSection(reader) => {
                for func_type_idx in reader {
                    function_types.push(func_type_idx.context("reading function type index")?);
                }
            }

            Payload::TagSection(reader) => {
                for tag in reader {
                    let tag = tag.context("reading tag")?;
                    module.tags.push(TagInfo {
                        type_idx: tag.func_type_idx,
                    });
                }
            }

            Payload::CodeSectionEntry(body) => {
                let type_idx = function_types[module.functions.len()];
                module.functions.push(parse_code_entry(body, type_idx)?);
            }

            Payload::MemorySection(reader) => {
                for mem in reader {
                    let memory_type = mem.context("reading memory type")?;
                    module.memories.push(MemoryInfo {
                        initial_pages: memory_type.initial,
                        maximum_pages: memory_type.maximum,
                    });
                }
            }

            Payload::TableSection(reader) => {
                for tbl in reader {
                    let tbl = tbl.context("reading table type")?;
                    module.tables.push(TableInfo {
                        initial_size: tbl.ty.initial as u64,
                        max_size: tbl.ty.maximum.map(|m| m as u64),
                    });
                }
            }

            Payload::ElementSection(reader) => {
                for element in reader {
                    let element = element.context("reading element segment")?;
                    module.element_segments.push(parse_element_segment(element)?);
                }
            }

            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.context("reading global")?;
                    module.globals.push(GlobalInfo {
                        val_type: global.ty.content_type,
                        mutable: global.ty.mutable,
                        init: eval_const_expr(global.init_expr)?,
                    });
                }
            }

            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("reading export")?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Global => ExportKind::Global,
                        ExternalKind::Tag => ExportKind::Tag,
                    };
                    module.exports.push(ExportInfo {
                        name: export.name.to_string(),
                        kind,
                        index: export.index,
                    });
                }
            }

            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data.context("reading data segment")?;
                    module.data_segments.push(parse_data_segment(data)?);
                }
            }

            Payload::StartSection { func, .. } => {
                module.start = Some(func);
            }

            Payload::CustomSection(c) if c.name() == "name" => {
                // A malformed name section is not a reason to fail; names
                // are advisory.
                if let Err(e) = parse_name_section(c.data(), c.data_offset(), &mut module.names) {
                    log::debug!("ignoring malformed name section: {e:#}");
                }
            }

            _ => {}
        }
    }

    log::debug!(
        "parsed module: {} types, {} imports, {} functions, {} globals",
        module.types.len(),
        module.imports.len(),
        module.functions.len(),
        module.globals.len()
    );

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(wat: &str) -> ParsedModule {
        let wasm = wat::parse_str(wat).unwrap();
        parse_wasm(&wasm, &Features::default()).unwrap()
    }

    #[test]
    fn parse_minimal_module() {
        let module = parse("(module)");
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.functions.len(), 0);
    }

    #[test]
    fn parse_add_function() {
        let module = parse(
            r#"
            (module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                )
            )
        "#,
        );
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions.len(), 1);
        assert!(module.memories.is_empty());
    }

    #[test]
    fn parse_memory_section() {
        let module = parse("(module (memory 2 10))");
        assert_eq!(module.memories.len(), 1);
        assert_eq!(module.memories[0].initial_pages, 2);
        assert_eq!(module.memories[0].maximum_pages, Some(10));
    }

    #[test]
    fn parse_mutable_global() {
        let module = parse("(module (global (mut i32) (i32.const 42)))");
        assert_eq!(module.globals.len(), 1);
        assert!(module.globals[0].mutable);
        assert_eq!(module.globals[0].val_type, ValType::I32);
        match module.globals[0].init {
            ParsedInitExpr::I32(v) => assert_eq!(v, 42),
            _ => panic!("expected i32 init value"),
        }
    }

    #[test]
    fn parse_exports() {
        let module = parse(
            r#"
            (module
                (func (param i32 i32) (result i32)
                    local.get 0 local.get 1 i32.add)
                (export "add" (func 0))
            )
        "#,
        );
        assert_eq!(module.exports.len(), 1);
        assert_eq!(module.exports[0].name, "add");
        assert_eq!(module.exports[0].kind, ExportKind::Func);
        assert_eq!(module.exports[0].index, 0);
    }

    #[test]
    fn parse_data_segment() {
        let module = parse(
            r#"
            (module
                (memory 1)
                (data (i32.const 16) "Hello")
            )
        "#,
        );
        assert_eq!(module.data_segments.len(), 1);
        match module.data_segments[0].kind {
            DataSegmentKind::Active { memory_index, offset: ParsedInitExpr::I32(16) } => {
                assert_eq!(memory_index, 0)
            }
            _ => panic!("expected active segment at offset 16"),
        }
        assert_eq!(module.data_segments[0].data, b"Hello");
    }

    #[test]
    fn parse_function_import() {
        let module = parse(
            r#"
            (module
                (import "env" "log" (func (param i32)))
                (func (result i32)
                    i32.const 42
                )
            )
        "#,
        );
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].module_name, "env");
        assert_eq!(module.imports[0].name, "log");
        assert!(matches!(
            module.imports[0].kind,
            ImportKindInfo::Function(0)
        ));
        assert_eq!(module.num_func_imports(), 1);
        assert_eq!(module.functions.len(), 1);
    }

    #[test]
    fn parse_start_section() {
        let module = parse(
            r#"
            (module
                (func)
                (start 0)
            )
        "#,
        );
        assert_eq!(module.start, Some(0));
    }

    #[test]
    fn parse_debug_names() {
        let module = parse(
            r#"
            (module
                (func $my_add (param $x i32) (param $y i32) (result i32)
                    local.get $x local.get $y i32.add)
            )
        "#,
        );
        assert_eq!(module.names.funcs.get(&0).map(String::as_str), Some("my_add"));
        assert_eq!(
            module.names.locals.get(&(0, 0)).map(String::as_str),
            Some("x")
        );
    }

    #[test]
    fn reject_invalid_module() {
        // i64.add on i32 operands must fail validation.
        let wasm = wat::parse_str(
            r#"(module (func (param i32 i32) (result i64)
                local.get 0 local.get 1 i64.add))"#,
        );
        // wat itself may reject this; if it assembles, validation must fail.
        if let Ok(bytes) = wasm {
            assert!(parse_wasm(&bytes, &Features::default()).is_err());
        }
    }
}

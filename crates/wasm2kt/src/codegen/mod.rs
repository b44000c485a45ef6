//! Code generation — emits a Kotlin source file from the module IR.
//!
//! [`KotlinWriter`] holds all translation state for one invocation: the
//! module-scope symbol tables, the per-function value/type stacks and label
//! stack, and the output sink. The module assembly order is fixed: prologue,
//! func types, imports, tags, function name pre-allocation, globals, memories,
//! tables, exports, element initializers, data initializers, function bodies,
//! start invocation, call-indirect adapters, epilogue.

mod control;
mod exprs;
mod literals;
mod sink;
mod stack;
mod symbols;

use crate::ir::{ExternalKind, InitExpr, Module, Signature, ValueType};
use crate::TranspileOptions;
use anyhow::Result;
use literals::const_literal;
use sink::Sink;
use stack::StackValue;
use std::collections::{BTreeMap, BTreeSet};
use symbols::{
    define_name, mangle_func_name, mangle_global_name, mangle_name, SymbolSet,
};

/// Import banner placed at the top of every generated file. The extension
/// functions are imported unqualified because they are applied postfix
/// everywhere; everything else stays `wasm_rt_impl.`-qualified.
const SOURCE_IMPORTS: &str = "
import wasm_rt_impl.btoInt
import wasm_rt_impl.btoLong
import wasm_rt_impl.isz
import wasm_rt_impl.inz

";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LabelKind {
    Func,
    Block,
    Loop,
    If,
    Try,
}

/// One control-flow frame. `sig` carries the types flowing over a branch to
/// this label: param types for loops, result types for everything else.
#[derive(Debug)]
pub(crate) struct Label {
    pub kind: LabelKind,
    pub name: String,
    pub sig: Vec<ValueType>,
    /// Type-stack depth the label's value slots start at.
    pub type_stack_size: usize,
    /// Try/catch-stack depth at entry, for delegation distances.
    pub try_catch_size: usize,
    pub used: bool,
    /// Identifier bound to the caught exception while this try's catch arms
    /// are being translated.
    pub catch_binding: Option<String>,
}

pub struct KotlinWriter<'a> {
    module: &'a Module,
    options: &'a TranspileOptions,
    out: Sink,

    // Module scope.
    global_syms: SymbolSet,
    global_sym_map: BTreeMap<String, String>,
    call_indirect_decls: BTreeMap<u32, Signature>,

    // Function scope, reset per function.
    cur_func: u32,
    local_syms: SymbolSet,
    local_sym_map: BTreeMap<u32, String>,
    stack_var_map: BTreeMap<(usize, ValueType), String>,
    type_stack: Vec<ValueType>,
    value_stack: Vec<StackValue>,
    label_stack: Vec<Label>,
    try_stack: Vec<String>,
    func_includes: BTreeSet<String>,
    cont_param: Option<String>,
    unreachable: bool,
}

pub(crate) fn kotlin_type(ty: ValueType) -> &'static str {
    match ty {
        ValueType::I32 => "Int",
        ValueType::I64 => "Long",
        ValueType::F32 => "Float",
        ValueType::F64 => "Double",
    }
}

fn type_enum(ty: ValueType) -> &'static str {
    match ty {
        ValueType::I32 => "Int::class",
        ValueType::I64 => "Long::class",
        ValueType::F32 => "Float::class",
        ValueType::F64 => "Double::class",
    }
}

fn default_literal(ty: ValueType) -> &'static str {
    match ty {
        ValueType::I32 | ValueType::I64 => "0",
        ValueType::F32 => "0.0f",
        ValueType::F64 => "0.0",
    }
}

/// RFC 4648 standard alphabet, emitted without padding; the decoder infers
/// the tail length from the character count.
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let n = (u32::from(chunk[0]) << 16)
            | (u32::from(chunk.get(1).copied().unwrap_or(0)) << 8)
            | u32::from(chunk.get(2).copied().unwrap_or(0));
        let chars = chunk.len() + 1;
        for i in 0..chars {
            out.push(ALPHABET[((n >> (18 - 6 * i)) & 0x3f) as usize] as char);
        }
    }
    out
}

impl<'a> KotlinWriter<'a> {
    pub fn new(module: &'a Module, options: &'a TranspileOptions) -> Self {
        Self {
            module,
            options,
            out: Sink::new(),
            global_syms: SymbolSet::new(),
            global_sym_map: BTreeMap::new(),
            call_indirect_decls: BTreeMap::new(),
            cur_func: 0,
            local_syms: SymbolSet::new(),
            local_sym_map: BTreeMap::new(),
            stack_var_map: BTreeMap::new(),
            type_stack: Vec::new(),
            value_stack: Vec::new(),
            label_stack: Vec::new(),
            try_stack: Vec::new(),
            func_includes: BTreeSet::new(),
            cont_param: None,
            unreachable: false,
        }
    }

    /// Translate the whole module into Kotlin source.
    pub fn write_module(mut self) -> Result<String> {
        self.write_source_top();
        self.write_func_types();
        self.write_imports();
        self.write_tags();
        self.allocate_funcs();
        self.write_globals();
        self.write_memories();
        self.write_tables();
        self.write_exports();
        self.write_elem_initializers();
        self.write_data_initializers();
        self.write_funcs()?;
        self.write_start();
        self.write_call_indirect_adapters();
        self.write_source_bottom();
        Ok(self.out.into_string())
    }

    // ─── Symbols ────────────────────────────────────────────────────────────

    fn define_global(&mut self, key: String, raw: &str) -> String {
        let unique = define_name(&mut self.global_syms, raw);
        self.global_sym_map.insert(key, unique.clone());
        unique
    }

    fn global_sym(&self, key: &str) -> String {
        self.global_sym_map
            .get(key)
            .unwrap_or_else(|| panic!("symbol {key} not defined"))
            .clone()
    }

    pub(crate) fn func_sym(&self, index: u32) -> String {
        self.global_sym(&format!("F:{index}"))
    }

    pub(crate) fn global_var_sym(&self, index: u32) -> String {
        self.global_sym(&format!("G:{index}"))
    }

    pub(crate) fn memory_sym(&self, index: u32) -> String {
        self.global_sym(&format!("M:{index}"))
    }

    pub(crate) fn table_sym(&self, index: u32) -> String {
        self.global_sym(&format!("T:{index}"))
    }

    pub(crate) fn tag_sym(&self, index: u32) -> String {
        self.global_sym(&format!("E:{index}"))
    }

    pub(crate) fn define_local(&mut self, raw: &str) -> String {
        define_name(&mut self.local_syms, raw)
    }

    pub(crate) fn local_sym(&self, index: u32) -> String {
        self.local_sym_map
            .get(&index)
            .unwrap_or_else(|| panic!("local {index} not defined"))
            .clone()
    }

    pub(crate) fn local_type(&self, index: u32) -> ValueType {
        let func = &self.module.funcs[self.cur_func as usize];
        let sig = self.module.func_sig(self.cur_func);
        let n_params = sig.params.len();
        if (index as usize) < n_params {
            sig.params[index as usize]
        } else {
            func.locals[index as usize - n_params].1
        }
    }

    // ─── Labels ─────────────────────────────────────────────────────────────

    pub(crate) fn push_label(
        &mut self,
        kind: LabelKind,
        name: String,
        sig: Vec<ValueType>,
        type_stack_size: usize,
    ) {
        self.label_stack.push(Label {
            kind,
            name,
            sig,
            type_stack_size,
            try_catch_size: self.try_stack.len(),
            used: false,
            catch_binding: None,
        });
    }

    pub(crate) fn pop_label(&mut self) {
        self.label_stack.pop();
    }

    pub(crate) fn label_at(&mut self, depth: u32) -> &mut Label {
        let index = self.label_stack.len() - 1 - depth as usize;
        &mut self.label_stack[index]
    }

    // ─── Kotlin type helpers ────────────────────────────────────────────────

    /// Kotlin function type for a Wasm signature. Multi-result functions take
    /// a trailing continuation that receives the non-primary results.
    fn func_type_text(&self, sig: &Signature) -> String {
        let mut params: Vec<String> = sig
            .params
            .iter()
            .map(|t| kotlin_type(*t).to_string())
            .collect();
        let ret = match sig.results.len() {
            0 => "Unit",
            _ => kotlin_type(sig.results[0]),
        };
        if sig.results.len() > 1 {
            params.push(self.continuation_type_text(&sig.results));
        }
        format!("({}) -> {}", params.join(", "), ret)
    }

    fn continuation_type_text(&self, results: &[ValueType]) -> String {
        let extras: Vec<&str> = results[1..].iter().map(|t| kotlin_type(*t)).collect();
        format!("({}) -> Unit", extras.join(", "))
    }

    fn result_type_text(&self, results: &[ValueType]) -> &'static str {
        if results.is_empty() {
            "Unit"
        } else {
            kotlin_type(results[0])
        }
    }

    fn init_expr_text(&self, init: &InitExpr) -> String {
        match init {
            InitExpr::Const(c) => const_literal(c),
            InitExpr::GlobalGet(index) => self.global_var_sym(*index),
        }
    }

    /// `this@Class::member` — a bound reference to a class member.
    fn external_ref(&self, sym: &str) -> String {
        format!("this@{}::{}", self.options.class_name, sym)
    }

    /// Reference to a function: imported functions are stored function
    /// values, local functions are referenced through the class.
    fn func_ref(&self, index: u32) -> String {
        let sym = self.func_sym(index);
        if self.module.is_imported_func(index) {
            sym
        } else {
            self.external_ref(&sym)
        }
    }

    // ─── Module sections ────────────────────────────────────────────────────

    fn write_source_top(&mut self) {
        if let Some(pkg) = &self.options.package_name {
            self.out.write(&format!("package {pkg}"));
            self.out.newline();
        }
        self.out.write(SOURCE_IMPORTS);
        self.out.write(&format!(
            "class {} (moduleRegistry: wasm_rt_impl.ModuleRegistry, name: String) ",
            self.options.class_name
        ));
        self.out.open_brace();
    }

    fn write_source_bottom(&mut self) {
        self.out.close_brace();
        self.out.newline();
    }

    fn write_func_types(&mut self) {
        self.out.newline();
        self.out.write(&format!(
            "private val func_types: IntArray = IntArray({})",
            self.module.types.len()
        ));
        self.out.newline();
        self.out.newline();
        self.out.write("init /* func_types */ ");
        self.out.open_brace();
        for (i, sig) in self.module.types.iter().enumerate() {
            let mut line = format!(
                "func_types[{i}] = wasm_rt_impl.register_func_type({}, {}",
                sig.params.len(),
                sig.results.len()
            );
            for ty in sig.params.iter().chain(sig.results.iter()) {
                line.push_str(", ");
                line.push_str(type_enum(*ty));
            }
            line.push_str(");");
            self.out.write(&line);
            self.out.newline();
        }
        self.out.close_brace();
        self.out.newline();
    }

    fn write_imports(&mut self) {
        if self.module.imports.is_empty() {
            return;
        }
        self.out.newline();

        for import in &self.module.imports {
            self.out.write(&format!(
                "/* import: '{}' '{}' */",
                import.module, import.field
            ));
            self.out.newline();

            let module_str = mangle_name(&import.module);
            let decl = match import.kind {
                ExternalKind::Func => {
                    let sig = self.module.func_sig(import.index).clone();
                    let mangled = mangle_func_name(&import.field, &sig.params, &sig.results);
                    let sym = self.define_global(format!("F:{}", import.index), &mangled);
                    format!(
                        "private var {sym}: {} = moduleRegistry.importFunc(\"{module_str}\", \"{mangled}\");",
                        self.func_type_text(&sig)
                    )
                }
                ExternalKind::Global => {
                    let global = &self.module.globals[import.index as usize];
                    let mangled = mangle_global_name(&import.field, global.ty);
                    let ty = kotlin_type(global.ty);
                    let sym = self.define_global(format!("G:{}", import.index), &mangled);
                    format!(
                        "private var {sym}: {ty} by moduleRegistry.importGlobal(\"{module_str}\", \"{mangled}\");"
                    )
                }
                ExternalKind::Memory => {
                    let mangled = mangle_name(&import.field);
                    let sym = self.define_global(format!("M:{}", import.index), &mangled);
                    format!(
                        "private var {sym}: wasm_rt_impl.Memory by moduleRegistry.importMemory(\"{module_str}\", \"{mangled}\");"
                    )
                }
                ExternalKind::Table => {
                    let mangled = mangle_name(&import.field);
                    let sym = self.define_global(format!("T:{}", import.index), &mangled);
                    format!(
                        "private var {sym}: wasm_rt_impl.Table by moduleRegistry.importTable(\"{module_str}\", \"{mangled}\");"
                    )
                }
                ExternalKind::Tag => {
                    let sig = self.module.tag_sig(import.index).clone();
                    let mangled = mangle_func_name(&import.field, &sig.params, &[]);
                    let payload = self.func_type_text(&Signature {
                        params: sig.params.clone(),
                        results: Vec::new(),
                    });
                    let sym = self.define_global(format!("E:{}", import.index), &mangled);
                    format!(
                        "private var {sym}: wasm_rt_impl.Tag<{payload}> = moduleRegistry.importTag(\"{module_str}\", \"{mangled}\");"
                    )
                }
            };
            self.out.write(&decl);
            self.out.newline();
        }
    }

    fn write_tags(&mut self) {
        if self.module.tags.len() == self.module.num_tag_imports {
            return;
        }
        self.out.newline();
        for index in self.module.num_tag_imports..self.module.tags.len() {
            let tag = &self.module.tags[index];
            let sig = self.module.tag_sig(index as u32).clone();
            let payload = self.func_type_text(&Signature {
                params: sig.params.clone(),
                results: Vec::new(),
            });
            let sym = self.define_global(format!("E:{index}"), &tag.name.clone());
            self.out.write(&format!(
                "private val {sym}: wasm_rt_impl.Tag<{payload}> = wasm_rt_impl.Tag();"
            ));
            self.out.newline();
        }
    }

    fn allocate_funcs(&mut self) {
        for index in self.module.num_func_imports..self.module.funcs.len() {
            let raw = self.module.funcs[index].name.clone();
            self.define_global(format!("F:{index}"), &raw);
        }
    }

    fn write_globals(&mut self) {
        if self.module.globals.len() != self.module.num_global_imports {
            self.out.newline();
            for index in self.module.num_global_imports..self.module.globals.len() {
                let global = &self.module.globals[index];
                let raw = global.name.clone();
                let ty = kotlin_type(global.ty);
                let sym = self.define_global(format!("G:{index}"), &raw);
                self.out.write(&format!("private var {sym}: {ty};"));
                self.out.newline();
            }
        }

        self.out.newline();
        self.out.write("init /* globals */ ");
        self.out.open_brace();
        for index in self.module.num_global_imports..self.module.globals.len() {
            let global = &self.module.globals[index];
            let init = global
                .init
                .as_ref()
                .expect("local globals carry an initializer");
            let text = format!(
                "{} = {};",
                self.global_var_sym(index as u32),
                self.init_expr_text(init)
            );
            self.out.write(&text);
            self.out.newline();
        }
        self.out.close_brace();
        self.out.newline();
    }

    fn write_memories(&mut self) {
        if self.module.memories.len() == self.module.num_memory_imports {
            return;
        }
        self.out.newline();
        for index in self.module.num_memory_imports..self.module.memories.len() {
            let raw = self.module.memories[index].name.clone();
            let sym = self.define_global(format!("M:{index}"), &raw);
            self.out.write(&format!(
                "private var {sym}: wasm_rt_impl.Memory = wasm_rt_impl.Memory(0, 0);"
            ));
            self.out.newline();
        }
    }

    fn write_tables(&mut self) {
        if self.module.tables.len() == self.module.num_table_imports {
            return;
        }
        self.out.newline();
        for index in self.module.num_table_imports..self.module.tables.len() {
            let raw = self.module.tables[index].name.clone();
            let sym = self.define_global(format!("T:{index}"), &raw);
            self.out.write(&format!(
                "private var {sym}: wasm_rt_impl.Table = wasm_rt_impl.Table(0, 0);"
            ));
            self.out.newline();
        }
    }

    fn write_exports(&mut self) {
        if self.module.exports.is_empty() {
            return;
        }
        self.out.newline();
        self.out.write("init /* exports */ ");
        self.out.open_brace();

        for export in &self.module.exports {
            self.out
                .write(&format!("/* export: '{}' */", export.name));
            self.out.newline();

            let (kind, mangled, reference) = match export.kind {
                ExternalKind::Func => {
                    let sig = self.module.func_sig(export.index);
                    let mangled = mangle_func_name(&export.name, &sig.params, &sig.results);
                    ("Func", mangled, self.func_ref(export.index))
                }
                ExternalKind::Global => {
                    let ty = self.module.globals[export.index as usize].ty;
                    let mangled = mangle_global_name(&export.name, ty);
                    let sym = self.global_var_sym(export.index);
                    ("Global", mangled, self.external_ref(&sym))
                }
                ExternalKind::Memory => {
                    let sym = self.memory_sym(export.index);
                    ("Memory", mangle_name(&export.name), self.external_ref(&sym))
                }
                ExternalKind::Table => {
                    let sym = self.table_sym(export.index);
                    ("Table", mangle_name(&export.name), self.external_ref(&sym))
                }
                ExternalKind::Tag => {
                    let sig = self.module.tag_sig(export.index);
                    let mangled = mangle_func_name(&export.name, &sig.params, &[]);
                    let sym = self.tag_sym(export.index);
                    ("Tag", mangled, self.external_ref(&sym))
                }
            };
            self.out.write(&format!(
                "moduleRegistry.export{kind}(name, \"{mangled}\", {reference});"
            ));
            self.out.newline();
        }

        self.out.close_brace();
        self.out.newline();
    }

    fn elem_entry_text(&self, func_index: u32) -> String {
        let type_idx = self.module.funcs[func_index as usize].type_idx;
        format!(
            "wasm_rt_impl.Func(func_types[{type_idx}], {})",
            self.func_ref(func_index)
        )
    }

    fn write_elem_initializers(&mut self) {
        // Passive segments become array fields usable by table.init; a
        // dropped segment is replaced with an empty array.
        let mut wrote_decl = false;
        for (i, seg) in self.module.elem_segments.iter().enumerate() {
            if !matches!(seg.kind, crate::ir::ElemKind::Passive) {
                continue;
            }
            if !wrote_decl {
                self.out.newline();
                wrote_decl = true;
            }
            let entries: Vec<String> = seg
                .func_indices
                .iter()
                .map(|f| self.elem_entry_text(*f))
                .collect();
            self.out.write(&format!(
                "private var elem_segment_{i}: Array<wasm_rt_impl.ElemSegExpr?> = arrayOf({});",
                entries.join(", ")
            ));
            self.out.newline();
        }

        self.out.newline();
        self.out.write("init /* table */ ");
        self.out.open_brace();

        let has_active = self
            .module
            .elem_segments
            .iter()
            .any(|s| matches!(s.kind, crate::ir::ElemKind::Active { .. }));
        if has_active {
            self.out.write("var offset: Int = 0;");
            self.out.newline();
        }

        for index in self.module.num_table_imports..self.module.tables.len() {
            let table = &self.module.tables[index];
            let max = table.max_size.map(|m| m as u32 as i32).unwrap_or(-1);
            let text = format!(
                "{} = wasm_rt_impl.Table({}, {});",
                self.table_sym(index as u32),
                table.initial_size,
                max
            );
            self.out.write(&text);
            self.out.newline();
        }

        for seg in &self.module.elem_segments {
            let (table, offset) = match &seg.kind {
                crate::ir::ElemKind::Active { table, offset } => (*table, offset),
                _ => continue,
            };
            let text = format!("offset = {};", self.init_expr_text(offset));
            self.out.write(&text);
            self.out.newline();
            let table_sym = self.table_sym(table);
            for (i, func_index) in seg.func_indices.iter().enumerate() {
                let text = format!(
                    "{table_sym}[offset + {i}] = {};",
                    self.elem_entry_text(*func_index)
                );
                self.out.write(&text);
                self.out.newline();
            }
        }

        self.out.close_brace();
        self.out.newline();
    }

    fn write_data_initializers(&mut self) {
        if !self.module.data_segments.is_empty() {
            self.out.newline();
        }
        for (i, seg) in self.module.data_segments.iter().enumerate() {
            // Passive segments are mutable so data.drop can empty them.
            let decl = match seg.kind {
                crate::ir::DataKind::Active { .. } => "private val",
                crate::ir::DataKind::Passive => "private var",
            };
            self.out.write(&format!(
                "{decl} data_segment_data_{i}: String = \"{}\";",
                base64_encode(&seg.data)
            ));
            self.out.newline();
        }

        self.out.newline();
        self.out.write("init /* memory */ ");
        self.out.open_brace();

        for index in self.module.num_memory_imports..self.module.memories.len() {
            let mem = &self.module.memories[index];
            let max = mem.maximum_pages.map(|m| m as u32 as i32).unwrap_or(65536);
            let text = format!(
                "{} = wasm_rt_impl.Memory({}, {});",
                self.memory_sym(index as u32),
                mem.initial_pages,
                max
            );
            self.out.write(&text);
            self.out.newline();
        }

        for (i, seg) in self.module.data_segments.iter().enumerate() {
            let (memory, offset) = match &seg.kind {
                crate::ir::DataKind::Active { memory, offset } => (*memory, offset),
                crate::ir::DataKind::Passive => continue,
            };
            let text = format!(
                "{}.put({}, wasm_rt_impl.loadb64(data_segment_data_{i}));",
                self.memory_sym(memory),
                self.init_expr_text(offset)
            );
            self.out.write(&text);
            self.out.newline();
        }

        self.out.close_brace();
        self.out.newline();
    }

    fn write_start(&mut self) {
        self.out.newline();
        self.out.write("init ");
        self.out.open_brace();
        if let Some(func) = self.module.start {
            self.out.write(&format!("{}();", self.func_sym(func)));
            self.out.newline();
        }
        self.out.close_brace();
        self.out.newline();
    }

    fn write_call_indirect_adapters(&mut self) {
        let decls = std::mem::take(&mut self.call_indirect_decls);
        for (type_idx, sig) in &decls {
            self.out.newline();

            let mut params: Vec<String> = vec!["table: wasm_rt_impl.Table".to_string()];
            let mut fwd: Vec<String> = Vec::new();
            for (i, ty) in sig.params.iter().enumerate() {
                params.push(format!("p{i}: {}", kotlin_type(*ty)));
                fwd.push(format!("p{i}"));
            }
            params.push("index: Int".to_string());
            if sig.results.len() > 1 {
                params.push(format!("k: {}", self.continuation_type_text(&sig.results)));
                fwd.push("k".to_string());
            }

            self.out.write(&format!(
                "private fun CALL_INDIRECT_{type_idx}({}): {} ",
                params.join(", "),
                self.result_type_text(&sig.results)
            ));
            self.out.open_brace();
            self.out.write(&format!(
                "return wasm_rt_impl.CALL_INDIRECT<{}>(table, func_types[{type_idx}], index)({})",
                self.func_type_text(sig),
                fwd.join(", ")
            ));
            self.out.newline();
            self.out.close_brace();
            self.out.newline();
        }
        self.call_indirect_decls = decls;
    }

    // ─── Functions ──────────────────────────────────────────────────────────

    fn write_funcs(&mut self) -> Result<()> {
        self.out.newline();
        for index in self.module.num_func_imports..self.module.funcs.len() {
            self.out.newline();
            self.write_func(index as u32)?;
        }
        Ok(())
    }

    fn write_func(&mut self, func_index: u32) -> Result<()> {
        let module = self.module;
        let func = &module.funcs[func_index as usize];
        let sig = module.func_sig(func_index);
        log::trace!("translating function {}", func.name);

        // Per-function state. Local symbols are seeded from the global scope
        // so locals shadowing module-level names get renamed.
        self.cur_func = func_index;
        self.local_syms = self.global_syms.clone();
        self.local_sym_map.clear();
        self.stack_var_map.clear();
        self.type_stack.clear();
        self.value_stack.clear();
        self.label_stack.clear();
        self.try_stack.clear();
        self.func_includes.clear();
        self.cont_param = None;
        self.unreachable = false;

        let mut param_syms = Vec::with_capacity(func.param_names.len());
        for (i, raw) in func.param_names.iter().enumerate() {
            let sym = self.define_local(raw);
            self.local_sym_map.insert(i as u32, sym.clone());
            param_syms.push(sym);
        }

        let mut decl_parts: Vec<String> = param_syms
            .iter()
            .zip(sig.params.iter())
            .map(|(sym, ty)| format!("{sym}: {}", kotlin_type(*ty)))
            .collect();
        if sig.results.len() > 1 {
            let cont = self.define_local("k");
            decl_parts.push(format!(
                "{cont}: {}",
                self.continuation_type_text(&sig.results)
            ));
            self.cont_param = Some(cont);
        }

        self.out.write(&format!(
            "private fun {}({}): {} ",
            self.func_sym(func_index),
            decl_parts.join(", "),
            self.result_type_text(&sig.results)
        ));
        self.out.open_brace();

        // Wasm locals are mutable; shadow each parameter with a var.
        for sym in &param_syms {
            self.out.write(&format!("var {sym} = {sym};"));
            self.out.newline();
        }

        // Declared locals, grouped by type, zero-initialized.
        for group in [ValueType::I32, ValueType::I64, ValueType::F32, ValueType::F64] {
            for (i, (raw, ty)) in func.locals.iter().enumerate() {
                if *ty != group {
                    continue;
                }
                let raw = raw.clone();
                let sym = self.define_local(&raw);
                self.local_sym_map
                    .insert((sig.params.len() + i) as u32, sym.clone());
                self.out.write(&format!(
                    "var {sym}: {} = {}",
                    kotlin_type(*ty),
                    default_literal(*ty)
                ));
                self.out.newline();
            }
        }

        self.out.write("try ");
        self.out.open_brace();
        self.out.begin_func_sections();

        self.push_label(LabelKind::Func, String::new(), sig.results.clone(), 0);
        self.write_expr_list(&func.body)?;
        if !self.unreachable {
            self.write_func_return(false);
            if !sig.results.is_empty() {
                self.out.newline();
            }
        }
        self.unreachable = false;
        self.pop_label();

        let sections = self.out.take_func_sections();
        self.write_stack_var_decls();
        let includes = std::mem::take(&mut self.func_includes);
        self.out.append_func_sections(sections, &includes);
        self.func_includes = includes;

        self.out.close_brace();
        self.out.write(
            " catch(e: StackOverflowError) { throw wasm_rt_impl.ExhaustionException(null, e) }",
        );
        self.out.newline();
        self.out.close_brace();
        self.out.newline();
        Ok(())
    }

    fn write_stack_var_decls(&mut self) {
        for group in [ValueType::I32, ValueType::I64, ValueType::F32, ValueType::F64] {
            let decls: Vec<String> = self
                .stack_var_map
                .iter()
                .filter(|((_, ty), _)| *ty == group)
                .map(|(_, name)| {
                    format!(
                        "var {name}: {} = {}",
                        kotlin_type(group),
                        default_literal(group)
                    )
                })
                .collect();
            for decl in decls {
                self.out.write(&decl);
                self.out.newline();
            }
        }
    }

    /// Emit a `return` in the current stack context: folded for a single
    /// result, spilled slots plus a continuation invocation for several.
    /// Written without a trailing newline so branch arms can wrap it inline.
    pub(crate) fn write_func_return(&mut self, explicit: bool) {
        let n = self.label_stack[0].sig.len();
        match n {
            0 => {
                self.spill_values();
                if explicit {
                    self.out.write("return;");
                }
            }
            1 => {
                let keep = self.type_stack.len().saturating_sub(1);
                self.spill_values_upto(keep);
                self.sync_values();
                let value = self
                    .value_stack
                    .last()
                    .expect("a result is on the stack")
                    .clone();
                let text = if value.precedence > stack::prec::POSTFIX {
                    format!("({})", value.value)
                } else {
                    value.value
                };
                self.out.write(&format!("return {text};"));
            }
            _ => {
                self.spill_values();
                let base = self.type_stack.len() - n;
                let cont = self
                    .cont_param
                    .clone()
                    .expect("multi-result functions carry a continuation");
                let extras: Vec<String> = (1..n)
                    .map(|i| self.stack_var(base + i, self.type_stack[base + i]))
                    .collect();
                let primary = self.stack_var(base, self.type_stack[base]);
                self.out
                    .write(&format!("{cont}({}); return {primary};", extras.join(", ")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::build_module;
    use crate::parser::parse_wasm;
    use crate::Features;

    fn kotlin_for(wat: &str) -> String {
        let wasm = wat::parse_str(wat).unwrap();
        let parsed = parse_wasm(&wasm, &Features::default()).unwrap();
        let module = build_module(&parsed, &TranspileOptions::default()).unwrap();
        KotlinWriter::new(&module, &TranspileOptions::default())
            .write_module()
            .unwrap()
    }

    #[test]
    fn base64_matches_rfc_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg");
        assert_eq!(base64_encode(b"fo"), "Zm8");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn class_skeleton() {
        let code = kotlin_for("(module)");
        assert!(code.contains(
            "class Wasm (moduleRegistry: wasm_rt_impl.ModuleRegistry, name: String) {"
        ));
        assert!(code.contains("private val func_types: IntArray = IntArray(0)"));
        assert!(code.contains("init /* func_types */ {"));
        assert!(code.ends_with("}\n"));
    }

    #[test]
    fn registers_func_types() {
        let code = kotlin_for(
            r#"(module (func (param i32 i64) (result f32) unreachable))"#,
        );
        assert!(code.contains(
            "func_types[0] = wasm_rt_impl.register_func_type(2, 1, Int::class, Long::class, Float::class);"
        ));
    }

    #[test]
    fn imports_use_mangled_names() {
        let code = kotlin_for(
            r#"
            (module
                (import "env" "log" (func (param i32)))
                (import "env" "mem" (memory 1))
                (import "env" "g" (global (mut i64)))
            )
        "#,
        );
        assert!(code.contains("/* import: 'env' 'log' */"));
        assert!(code.contains(
            "private var w2k_Z_logZ_vi: (Int) -> Unit = moduleRegistry.importFunc(\"Z_env\", \"Z_logZ_vi\");"
        ));
        assert!(code.contains(
            "private var w2k_Z_mem: wasm_rt_impl.Memory by moduleRegistry.importMemory(\"Z_env\", \"Z_mem\");"
        ));
        assert!(code.contains(
            "private var w2k_Z_gZ_j: Long by moduleRegistry.importGlobal(\"Z_env\", \"Z_gZ_j\");"
        ));
    }

    #[test]
    fn exports_are_registered() {
        let code = kotlin_for(
            r#"
            (module
                (func $add (param i32 i32) (result i32)
                    local.get 0 local.get 1 i32.add)
                (export "add" (func $add))
            )
        "#,
        );
        assert!(code.contains("init /* exports */ {"));
        assert!(code.contains(
            "moduleRegistry.exportFunc(name, \"Z_addZ_iii\", this@Wasm::w2k_add);"
        ));
    }

    #[test]
    fn memory_and_data_segments() {
        let code = kotlin_for(
            r#"
            (module
                (memory 2 10)
                (data (i32.const 8) "abc")
            )
        "#,
        );
        assert!(code.contains(
            "private var w2k_M0: wasm_rt_impl.Memory = wasm_rt_impl.Memory(0, 0);"
        ));
        assert!(code.contains("private val data_segment_data_0: String = \"YWJj\";"));
        assert!(code.contains("w2k_M0 = wasm_rt_impl.Memory(2, 10);"));
        assert!(code.contains("w2k_M0.put(8, wasm_rt_impl.loadb64(data_segment_data_0));"));
    }

    #[test]
    fn table_and_elements() {
        let code = kotlin_for(
            r#"
            (module
                (table 4 funcref)
                (func $f (result i32) i32.const 1)
                (elem (i32.const 1) $f $f)
            )
        "#,
        );
        assert!(code.contains(
            "private var w2k_T0: wasm_rt_impl.Table = wasm_rt_impl.Table(0, 0);"
        ));
        assert!(code.contains("w2k_T0 = wasm_rt_impl.Table(4, -1);"));
        assert!(code.contains("offset = 1;"));
        assert!(code.contains(
            "w2k_T0[offset + 0] = wasm_rt_impl.Func(func_types[0], this@Wasm::w2k_f);"
        ));
        assert!(code.contains(
            "w2k_T0[offset + 1] = wasm_rt_impl.Func(func_types[0], this@Wasm::w2k_f);"
        ));
    }

    #[test]
    fn start_function_invoked() {
        let code = kotlin_for(
            r#"
            (module
                (func $main)
                (start $main)
            )
        "#,
        );
        assert!(code.contains("w2k_main();"));
    }

    #[test]
    fn globals_initialized_in_init_block() {
        let code = kotlin_for(
            r#"
            (module
                (global $x (mut i32) (i32.const -3))
                (global $y f64 (f64.const 1))
            )
        "#,
        );
        assert!(code.contains("private var w2k_x: Int;"));
        assert!(code.contains("private var w2k_y: Double;"));
        assert!(code.contains("init /* globals */ {"));
        assert!(code.contains("w2k_x = (-3);"));
        assert!(code.contains("w2k_y = 1.0000000000000000;"));
    }
}

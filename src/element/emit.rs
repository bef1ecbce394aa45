//! Element → OpenCL C text.
//!
//! Names for declarable leaves are assigned lazily, in first-use order, by
//! a per-emission `NameTable`; two leaves that share a buffer or host
//! scalar share a name. Vectorized kernels (width > 1) address arrays
//! through `vloadN`/`vstoreN`, or through vector-typed pointers when
//! unaligned access is off.

use std::collections::HashMap;

use super::{BinaryOp, ElementId, ElementKind, Graph, LeafKey, TernaryOp, UnaryOp};
use crate::config::KernelConfiguration;
use crate::error::{Error, Result};
use crate::types::ScalarType;

/// Reserved token naming the global work-item index in emitted text.
pub const INDEX_TOKEN: &str = "index";

/// Position of the work-item inside its work-group; indexes local arrays.
pub const LOCAL_INDEX: &str = "(int)get_local_id(0)";

/// Stand-in for the stored value while an excerpt rewrites a store.
const VALUE_SENTINEL: &str = "\u{1}";

const INDENT: &str = "    ";

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every whole-word occurrence of `token` in `text`.
pub fn replace_token(text: &str, token: &str, replacement: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut prev: Option<char> = None;
    while let Some(pos) = rest.find(token) {
        let before = rest[..pos].chars().next_back().or(prev);
        let after = rest[pos + token.len()..].chars().next();
        out.push_str(&rest[..pos]);
        let bounded = !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char);
        if bounded {
            out.push_str(replacement);
        } else {
            out.push_str(token);
        }
        prev = token.chars().next_back();
        rest = &rest[pos + token.len()..];
    }
    out.push_str(rest);
    out
}

/// Single left-to-right pass; at each position the longest matching
/// placeholder wins. Substituted text is never rescanned.
fn substitute(template: &str, bindings: &[(String, String)]) -> String {
    let mut ordered: Vec<&(String, String)> = bindings.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    'scan: while i < template.len() {
        for (placeholder, text) in &ordered {
            if template[i..].starts_with(placeholder.as_str()) {
                out.push_str(text);
                i += placeholder.len();
                continue 'scan;
            }
        }
        let Some(c) = template[i..].chars().next() else {
            break;
        };
        out.push(c);
        i += c.len_utf8();
    }
    out
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", INDENT, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Names ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct NameTable {
    names: HashMap<LeafKey, String>,
    counters: HashMap<&'static str, usize>,
}

impl NameTable {
    fn name(&mut self, key: LeafKey, prefix: &'static str) -> String {
        if let Some(name) = self.names.get(&key) {
            return name.clone();
        }
        let n = self.counters.entry(prefix).or_insert(0);
        let name = format!("{}{}", prefix, n);
        *n += 1;
        self.names.insert(key, name.clone());
        name
    }
}

// ─── Emitter ───────────────────────────────────────────────────────

/// Emits kernel text for elements of one graph under one configuration.
pub struct Emitter<'g> {
    graph: &'g Graph,
    config: &'g KernelConfiguration,
    names: NameTable,
}

impl<'g> Emitter<'g> {
    pub fn new(graph: &'g Graph, config: &'g KernelConfiguration) -> Self {
        Self {
            graph,
            config,
            names: NameTable::default(),
        }
    }

    fn width(&self) -> u32 {
        self.config.vector_width.max(1)
    }

    fn type_name(&self, ty: ScalarType) -> String {
        ty.vector_name(self.width())
    }

    /// Name of a declarable leaf or loop counter; empty for expressions.
    pub fn declared_name(&mut self, id: ElementId) -> String {
        let graph = self.graph;
        let Some(key) = graph.leaf_key(id) else {
            return String::new();
        };
        let prefix = match graph.kind(id) {
            ElementKind::Global(_) | ElementKind::SubRange(_) => "buf",
            ElementKind::HostScalar(_) => "val",
            ElementKind::LocalArray { .. } => "loc",
            ElementKind::PrivateArray { .. } => "arr",
            ElementKind::PrivateVariable { .. } => "var",
            ElementKind::LoopCounter => "it",
            _ => return String::new(),
        };
        self.names.name(key, prefix)
    }

    /// Kernel parameter text; empty unless `id` is a kernel argument.
    pub fn argument_signature(&mut self, id: ElementId) -> String {
        let graph = self.graph;
        let el = graph.get(id);
        let scalar = el.scalar_type();
        match &el.kind {
            ElementKind::Global(_) | ElementKind::SubRange(_) => {
                let ty = if self.config.uses_vector_pointers() {
                    self.type_name(scalar)
                } else {
                    scalar.kernel_name().to_string()
                };
                format!("__global {} *{}", ty, self.declared_name(id))
            }
            ElementKind::HostScalar(_) => {
                format!("const {} {}", scalar.kernel_name(), self.declared_name(id))
            }
            _ => String::new(),
        }
    }

    /// In-body declaration text; empty unless `id` is declared in the kernel.
    pub fn local_declaration(&mut self, id: ElementId) -> Result<String> {
        let graph = self.graph;
        let el = graph.get(id);
        let scalar = el.scalar_type();
        let text = match &el.kind {
            ElementKind::LocalArray { capacity } => format!(
                "__local {} {}[{}]",
                scalar.kernel_name(),
                self.declared_name(id),
                capacity + self.width() as usize
            ),
            ElementKind::PrivateArray { capacity } => {
                if self.width() > 1 {
                    return Err(private_array_forbidden(self.width()));
                }
                format!(
                    "__private {} {}[{}]",
                    scalar.kernel_name(),
                    self.declared_name(id),
                    capacity
                )
            }
            ElementKind::PrivateVariable { init } => {
                let init = init.unwrap_or_else(|| crate::types::Value::zero(scalar));
                format!(
                    "__private {} {} = {}",
                    self.type_name(scalar),
                    self.declared_name(id),
                    init.literal()
                )
            }
            _ => String::new(),
        };
        Ok(text)
    }

    /// Whether reads and writes of `id` go through `vloadN`/`vstoreN`.
    fn uses_vload(&self, id: ElementId) -> bool {
        match self.graph.kind(id) {
            ElementKind::Global(_) | ElementKind::SubRange(_) => {
                self.width() > 1 && !self.config.uses_vector_pointers()
            }
            ElementKind::LocalArray { .. } => self.width() > 1,
            ElementKind::Excerpt { source, .. } => self.uses_vload(*source),
            _ => false,
        }
    }

    /// Slot expression for an array access: the global index, or the
    /// local id for group-local arrays.
    fn slot_index(&self, id: ElementId) -> &'static str {
        match self.graph.kind(id) {
            ElementKind::LocalArray { .. } => LOCAL_INDEX,
            _ => INDEX_TOKEN,
        }
    }

    fn array_read(&mut self, id: ElementId) -> String {
        let name = self.declared_name(id);
        let slot = self.slot_index(id);
        if self.uses_vload(id) {
            format!("vload{}({}, {})", self.width(), slot, name)
        } else {
            format!("{}[{}]", name, slot)
        }
    }

    /// Expression text of `id`.
    pub fn emit(&mut self, id: ElementId) -> Result<String> {
        let graph = self.graph;
        let el = graph.get(id);
        let w = self.width();
        let text = match &el.kind {
            ElementKind::Constant(v) => v.literal(),
            ElementKind::Index => INDEX_TOKEN.to_string(),
            ElementKind::ExtendedIndex => {
                if w == 1 {
                    INDEX_TOKEN.to_string()
                } else {
                    let lanes: Vec<String> = (0..w).map(|l| l.to_string()).collect();
                    format!(
                        "({} * {} + (int{})({}))",
                        INDEX_TOKEN,
                        w,
                        w,
                        lanes.join(", ")
                    )
                }
            }
            ElementKind::GroupId => "(int)get_group_id(0)".to_string(),
            ElementKind::LoopCounter
            | ElementKind::HostScalar(_)
            | ElementKind::PrivateVariable { .. } => self.declared_name(id),
            ElementKind::Global(_) | ElementKind::SubRange(_) | ElementKind::LocalArray { .. } => {
                self.array_read(id)
            }
            ElementKind::PrivateArray { .. } => {
                if w > 1 {
                    return Err(private_array_forbidden(w));
                }
                format!("{}[{}]", self.declared_name(id), INDEX_TOKEN)
            }
            ElementKind::Unary(op, a) => self.emit_unary(*op, *a)?,
            ElementKind::Binary(op, a, b) => self.emit_binary(*op, *a, *b)?,
            ElementKind::Ternary(op, a, b, c) => self.emit_ternary(*op, *a, *b, *c)?,
            ElementKind::If {
                cond,
                then_body,
                else_body,
            } => {
                if then_body.is_empty() && else_body.is_empty() {
                    return Ok(String::new());
                }
                let cond = self.emit(*cond)?;
                let then_text = self.emit_block(then_body)?;
                let mut text = format!("if ({}) {{\n{}}}", cond, then_text);
                if !else_body.is_empty() {
                    let else_text = self.emit_block(else_body)?;
                    text.push_str(&format!(" else {{\n{}}}", else_text));
                }
                text
            }
            ElementKind::Loop {
                counter,
                start,
                end,
                body,
            } => {
                if body.is_empty() {
                    return Ok(String::new());
                }
                let it = self.declared_name(*counter);
                let start = self.emit(*start)?;
                let end = self.emit(*end)?;
                let body = self.emit_block(body)?;
                format!(
                    "for (int {it} = {start}; {it} < {end}; ++{it}) {{\n{body}}}",
                    it = it,
                    start = start,
                    end = end,
                    body = body
                )
            }
            ElementKind::Barrier => "barrier(CLK_LOCAL_MEM_FENCE)".to_string(),
            ElementKind::Excerpt { source, filter } => {
                let source = self.emit(*source)?;
                let filter = self.emit(*filter)?;
                replace_token(&source, INDEX_TOKEN, &format!("({})", filter))
            }
            ElementKind::Parser { template, bindings } => {
                let mut texts = Vec::with_capacity(bindings.len());
                for (e, placeholder) in bindings {
                    texts.push((placeholder.clone(), self.emit(*e)?));
                }
                substitute(template, &texts)
            }
        };
        Ok(text)
    }

    /// Statement text: `;`-terminated unless it ends in a block, empty for
    /// control structures with no body yet.
    pub fn emit_statement(&mut self, id: ElementId) -> Result<String> {
        let text = self.emit(id)?;
        if text.is_empty() || text.ends_with('}') {
            Ok(text)
        } else {
            Ok(format!("{};", text))
        }
    }

    fn emit_block(&mut self, body: &[ElementId]) -> Result<String> {
        let mut out = String::new();
        for &stmt in body {
            let text = self.emit_statement(stmt)?;
            if text.is_empty() {
                continue;
            }
            out.push_str(&indent(&text));
            out.push('\n');
        }
        Ok(out)
    }

    /// Text storing `value` into `target`.
    pub fn emit_store(&mut self, target: ElementId, value: &str) -> Result<String> {
        let graph = self.graph;
        match graph.kind(target) {
            ElementKind::Excerpt { source, filter } => {
                let (source, filter) = (*source, *filter);
                let inner = self.emit_store(source, VALUE_SENTINEL)?;
                let filter = self.emit(filter)?;
                let rebased = replace_token(&inner, INDEX_TOKEN, &format!("({})", filter));
                Ok(rebased.replace(VALUE_SENTINEL, value))
            }
            _ if self.uses_vload(target) => Ok(format!(
                "vstore{}({}, {}, {})",
                self.width(),
                value,
                self.slot_index(target),
                self.declared_name(target)
            )),
            _ => Ok(format!("{} = {}", self.emit(target)?, value)),
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, a: ElementId) -> Result<String> {
        let is_float = self.graph.get(a).scalar_type().is_float();
        let a = self.emit(a)?;
        let text = match op {
            UnaryOp::Neg => format!("(-{})", a),
            UnaryOp::Not => format!("(!{})", a),
            UnaryOp::Abs if is_float => format!("fabs({})", a),
            UnaryOp::Convert(ty) => {
                if self.width() == 1 {
                    format!("({})({})", ty.kernel_name(), a)
                } else {
                    format!("convert_{}({})", self.type_name(ty), a)
                }
            }
            other => format!("{}({})", other.name(), a),
        };
        Ok(text)
    }

    fn emit_binary(&mut self, op: BinaryOp, a: ElementId, b: ElementId) -> Result<String> {
        let is_float = self.graph.get(a).scalar_type().is_float();
        if op == BinaryOp::Assign {
            // Target first, so its name is allocated before the value's.
            let store = self.emit_store(a, VALUE_SENTINEL)?;
            let value = self.emit(b)?;
            return Ok(store.replace(VALUE_SENTINEL, &value));
        }
        if let Some(base) = op.compound_base() {
            let read = self.emit(a)?;
            let value = self.emit(b)?;
            let symbol = base.symbol().unwrap_or("+");
            if self.uses_vload(a) {
                return self.emit_store(a, &format!("({} {} {})", read, symbol, value));
            }
            return Ok(format!("{} {}= {}", read, symbol, value));
        }
        if op.is_atomic() {
            return self.emit_atomic(op.name(), a, &[b]);
        }

        let left = self.emit(a)?;
        let right = self.emit(b)?;
        let text = match op {
            BinaryOp::Rem if is_float => format!("fmod({}, {})", left, right),
            BinaryOp::Rem => format!("({} % {})", left, right),
            BinaryOp::Min if is_float => format!("fmin({}, {})", left, right),
            BinaryOp::Max if is_float => format!("fmax({}, {})", left, right),
            BinaryOp::Min | BinaryOp::Max | BinaryOp::Pow | BinaryOp::Atan2 => {
                format!("{}({}, {})", op.name(), left, right)
            }
            _ => match op.symbol() {
                Some(sym) => format!("({} {} {})", left, sym, right),
                None => format!("{}({}, {})", op.name(), left, right),
            },
        };
        Ok(text)
    }

    fn emit_ternary(
        &mut self,
        op: TernaryOp,
        a: ElementId,
        b: ElementId,
        c: ElementId,
    ) -> Result<String> {
        if op == TernaryOp::AtomicCmpXchg {
            return self.emit_atomic(op.name(), a, &[b, c]);
        }
        let is_float = self.graph.get(a).scalar_type().is_float();
        let (x, y, z) = (self.emit(a)?, self.emit(b)?, self.emit(c)?);
        let text = match op {
            TernaryOp::Select => format!("({} ? {} : {})", x, y, z),
            TernaryOp::Mad | TernaryOp::Fma if !is_float => format!("({} * {} + {})", x, y, z),
            _ => format!("{}({}, {}, {})", op.name(), x, y, z),
        };
        Ok(text)
    }

    fn emit_atomic(&mut self, name: &str, target: ElementId, operands: &[ElementId]) -> Result<String> {
        if self.width() > 1 {
            return Err(Error::forbidden(format!(
                "{} requires vector width 1, kernel uses {}",
                name,
                self.width()
            )));
        }
        let func = if self.graph.get(target).scalar_type().is_64bit() {
            name.replacen("atomic_", "atom_", 1)
        } else {
            name.to_string()
        };
        let mut args = vec![format!("&{}", self.emit(target)?)];
        for &op in operands {
            args.push(self.emit(op)?);
        }
        Ok(format!("{}({})", func, args.join(", ")))
    }
}

fn private_array_forbidden(width: u32) -> Error {
    Error::forbidden(format!(
        "private arrays require vector width 1, kernel uses {}",
        width
    ))
}

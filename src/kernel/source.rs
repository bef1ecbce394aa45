//! Kernel source text.
//!
//! Layout: extension pragmas, the `__kernel` signature built from the
//! argument signatures, the index line, in-body declarations, then the
//! statements. One `Emitter` (and so one name table) serves the whole
//! kernel, so a leaf has the same name in the signature and the body.

use std::fmt::Write as _;

use crate::config::KernelConfiguration;
use crate::container::ExpressionContainer;
use crate::element::{Emitter, Graph, INDEX_TOKEN};
use crate::error::Result;

const BODY_INDENT: &str = "    ";

pub(crate) fn render(
    graph: &Graph,
    container: &ExpressionContainer,
    config: &KernelConfiguration,
    entry: &str,
) -> Result<String> {
    let mut emitter = Emitter::new(graph, config);
    let mut out = String::new();

    for ext in &config.required_extensions {
        let _ = writeln!(out, "#pragma OPENCL EXTENSION {} : enable", ext);
    }

    let params: Vec<String> = container
        .arguments()
        .iter()
        .map(|&arg| emitter.argument_signature(arg))
        .collect();
    let _ = writeln!(out, "__kernel void {}({})", entry, params.join(", "));
    out.push_str("{\n");
    let _ = writeln!(
        out,
        "{}const int {} = (int)get_global_id(0);",
        BODY_INDENT, INDEX_TOKEN
    );

    for &decl in container.declarations() {
        let text = emitter.local_declaration(decl)?;
        if !text.is_empty() {
            let _ = writeln!(out, "{}{};", BODY_INDENT, text);
        }
    }

    for &stmt in container.statements() {
        let text = emitter.emit_statement(stmt)?;
        for line in text.lines() {
            if line.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "{}{}", BODY_INDENT, line);
            }
        }
    }
    out.push_str("}\n");
    Ok(out)
}

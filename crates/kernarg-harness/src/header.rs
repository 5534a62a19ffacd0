//! C++ header describing the traced kernel's argument layout. The tracer is compiled against it
//! so it knows which kernel arguments to publish.

use std::path::{Path, PathBuf};

use kernarg_device::ArgSignature;

use crate::error::ToolError;

pub const DEFAULT_HEADER_PATH: &str = "/tmp/KernelArguments.hpp";

/// Renders one `argN` member per declaration and an `as_tuple()` accessor over all of them.
pub fn render_header(signature: &ArgSignature) -> String {
    let names: Vec<String> = (0..signature.len()).map(|i| format!("arg{i}")).collect();

    let mut out = String::from("#pragma once\n#include <tuple>\n\nstruct KernelArguments {\n");
    for (decl, name) in signature.decls().iter().zip(&names) {
        out.push_str(&format!("    {decl} {name};\n"));
    }
    out.push_str("\n    auto as_tuple() const {\n");
    out.push_str(&format!("        return std::tie({});\n", names.join(", ")));
    out.push_str("    }\n};\n");
    out
}

pub fn write_header(signature: &ArgSignature, path: &Path) -> Result<PathBuf, ToolError> {
    std::fs::write(path, render_header(signature)).map_err(|source| ToolError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("wrote argument header {}", path.display());
    Ok(path.to_path_buf())
}

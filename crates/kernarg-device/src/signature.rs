use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

/// Element type of a captured pointer argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    F64,
    F32,
    I32,
    Usize,
}

impl ElementType {
    /// Looks up the leading whitespace-delimited token of a C type declaration, e.g. `int*` for
    /// `"int* arg0"`. Only the four pointer spellings the tracer emits are recognised.
    pub fn from_decl(decl: &str) -> Result<Self> {
        let token = decl.split_whitespace().next().unwrap_or("");
        match token {
            "double*" => Ok(Self::F64),
            "float*" => Ok(Self::F32),
            "int*" => Ok(Self::I32),
            "std::size_t*" => Ok(Self::Usize),
            _ => Err(DeviceError::UnsupportedPointerType(token.to_string())),
        }
    }

    /// Element width in bytes. `std::size_t` follows the host word size.
    pub const fn width(self) -> usize {
        match self {
            Self::F64 => size_of::<f64>(),
            Self::F32 => size_of::<f32>(),
            Self::I32 => size_of::<i32>(),
            Self::Usize => size_of::<usize>(),
        }
    }

    pub const fn c_name(self) -> &'static str {
        match self {
            Self::F64 => "double",
            Self::F32 => "float",
            Self::I32 => "int",
            Self::Usize => "std::size_t",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Whether the tracer publishes a handle for this parameter: any pointer that is not `const`.
pub fn is_captured_pointer(decl: &str) -> bool {
    decl.contains('*') && !decl.contains("const")
}

/// Ordered C-style parameter types of the traced kernel, e.g. `["float*", "const float*", "int"]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgSignature(Vec<String>);

/// A captured pointer parameter, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerArg {
    /// Index in the full signature.
    pub position: usize,
    pub decl: String,
    pub element: ElementType,
}

impl ArgSignature {
    pub fn new<I, S>(decls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(decls.into_iter().map(Into::into).collect())
    }

    pub fn decls(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The pointer argument subset as `(position, decl)` pairs.
    pub fn captured(&self) -> impl Iterator<Item = (usize, &str)> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, decl)| is_captured_pointer(decl))
            .map(|(position, decl)| (position, decl.as_str()))
    }

    /// Number of IPC handles the producer is expected to publish.
    pub fn pointer_count(&self) -> usize {
        self.captured().count()
    }

    /// Resolves every captured pointer's element type, failing on the first unknown one.
    pub fn pointer_args(&self) -> Result<Vec<PointerArg>> {
        self.captured()
            .map(|(position, decl)| {
                Ok(PointerArg {
                    position,
                    decl: decl.to_string(),
                    element: ElementType::from_decl(decl)?,
                })
            })
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ArgSignature {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

//! Tolerance-based comparison of result sets from different variants.

use serde::{Deserialize, Serialize};

use crate::orchestrator::ArgumentBuffer;

pub const DEFAULT_RTOL: f64 = 1e-5;
pub const DEFAULT_ATOL: f64 = 1e-8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
        }
    }
}

/// Element-wise `|a - b| <= atol + rtol * |b|`. Arrays of different lengths are never close,
/// and neither is any NaN. Exactly equal values (including matching infinities) always are.
pub fn allclose(a: &[f64], b: &[f64], tol: Tolerance) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(&x, &y)| {
            x == y || (!x.is_nan() && !y.is_nan() && (x - y).abs() <= tol.atol + tol.rtol * y.abs())
        })
}

/// Verdict for one argument position across two variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgumentComparison {
    pub index: usize,
    pub position: Option<usize>,
    pub decl: Option<String>,
    pub close: bool,
}

/// Compares two result sets index by index. A result present on only one side is reported as
/// not close.
pub fn compare_results(
    lhs: &[ArgumentBuffer],
    rhs: &[ArgumentBuffer],
    tol: Tolerance,
) -> Vec<ArgumentComparison> {
    (0..lhs.len().max(rhs.len()))
        .map(|index| match (lhs.get(index), rhs.get(index)) {
            (Some(a), Some(b)) => ArgumentComparison {
                index,
                position: Some(a.position),
                decl: Some(a.decl.clone()),
                close: allclose(&a.buffer.to_f64_vec(), &b.buffer.to_f64_vec(), tol),
            },
            (a, b) => {
                let only = a.or(b);
                ArgumentComparison {
                    index,
                    position: only.map(|arg| arg.position),
                    decl: only.map(|arg| arg.decl.clone()),
                    close: false,
                }
            }
        })
        .collect()
}

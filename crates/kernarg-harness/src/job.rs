use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kernarg_device::ArgSignature;
use serde::{Deserialize, Serialize};

use crate::compare::{Tolerance, DEFAULT_ATOL, DEFAULT_RTOL};
use crate::config::SessionConfig;
use crate::error::ToolError;
use crate::header::DEFAULT_HEADER_PATH;
use crate::toolchain::{tracer_library, DEFAULT_BUILD_JOBS};

fn default_rtol() -> f64 {
    DEFAULT_RTOL
}

fn default_atol() -> f64 {
    DEFAULT_ATOL
}

/// A verification job: one kernel, several builds of the program that launches it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyJob {
    pub kernel: String,
    pub args: ArgSignature,
    /// Prebuilt tracer library. Takes precedence over `tracer_dir`.
    #[serde(default)]
    pub tracer_lib: Option<PathBuf>,
    /// Tracer source tree, built with cmake before the variants run.
    #[serde(default)]
    pub tracer_dir: Option<PathBuf>,
    #[serde(default)]
    pub header_path: Option<PathBuf>,
    /// Variant name to traced binary. Runs in name order.
    pub variants: BTreeMap<String, PathBuf>,
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    #[serde(default = "default_atol")]
    pub atol: f64,
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl VerifyJob {
    /// Reads a JSON job file. Relative binary, tracer and header paths are resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ToolError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ToolError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut job: Self = serde_json::from_str(&raw).map_err(|source| ToolError::Job {
            path: path.to_path_buf(),
            source,
        })?;
        if job.variants.is_empty() {
            return Err(ToolError::NoVariants {
                path: path.to_path_buf(),
            });
        }
        if job.tracer_lib.is_none() && job.tracer_dir.is_none() {
            return Err(ToolError::NoTracer);
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let paths = job
            .tracer_lib
            .iter_mut()
            .chain(job.tracer_dir.iter_mut())
            .chain(job.header_path.iter_mut())
            .chain(job.variants.values_mut());
        for p in paths {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
        Ok(job)
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.rtol,
            atol: self.atol,
        }
    }

    pub fn header_path(&self) -> &Path {
        self.header_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_HEADER_PATH))
    }

    pub fn build_jobs(&self) -> usize {
        self.jobs.unwrap_or(DEFAULT_BUILD_JOBS)
    }

    /// The injected library: `tracer_lib` when given, else the build output of `tracer_dir`.
    pub fn tracer_lib(&self) -> Result<PathBuf, ToolError> {
        match (&self.tracer_lib, &self.tracer_dir) {
            (Some(lib), _) => Ok(lib.clone()),
            (None, Some(dir)) => Ok(tracer_library(dir)),
            (None, None) => Err(ToolError::NoTracer),
        }
    }

    pub fn session_for(&self, binary: &Path) -> Result<SessionConfig, ToolError> {
        Ok(SessionConfig::new(
            binary,
            self.kernel.clone(),
            self.args.clone(),
            self.tracer_lib()?,
        ))
    }
}

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ToolError;

pub const DEFAULT_BUILD_JOBS: usize = 16;

/// Runs `program` in `cwd` and fails with its stderr when it exits unsuccessfully.
pub fn run_checked<I, S>(program: &str, args: I, cwd: &Path) -> Result<(), ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    tracing::debug!(cwd = %cwd.display(), "running {cmd:?}");

    let output = cmd.output().map_err(|source| ToolError::Spawn {
        program: program.to_string(),
        source,
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        tracing::error!("{program} failed with {}", output.status);
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr,
        });
    }
    Ok(())
}

/// Configures and builds the tracer with cmake, returning the built library.
pub fn build_tracer(tracer_dir: &Path, jobs: usize) -> Result<PathBuf, ToolError> {
    tracing::info!("building tracer in {}", tracer_dir.display());
    run_checked("cmake", ["-B", "build"], tracer_dir)?;
    let jobs = jobs.max(1).to_string();
    run_checked("cmake", ["--build", "build", "--parallel", jobs.as_str()], tracer_dir)?;
    Ok(tracer_library(tracer_dir))
}

pub fn tracer_library(tracer_dir: &Path) -> PathBuf {
    tracer_dir.join("build").join("lib").join("libtracer.so")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_lives_under_build_lib() {
        assert_eq!(
            tracer_library(Path::new("/opt/tracer")),
            PathBuf::from("/opt/tracer/build/lib/libtracer.so")
        );
    }

    #[test]
    fn failing_command_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_checked("sh", ["-c", "echo broken >&2; exit 4"], dir.path()).unwrap_err();
        match err {
            ToolError::Failed { program, status, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(status.code(), Some(4));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_checked("kernarg-no-such-program", ["x"], dir.path()).unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}

//! Running a [`VerifyJob`]: every variant through its own handoff, then the first variant's
//! results against each of the others.

use kernarg_device::DeviceBackend;

use crate::compare::{compare_results, ArgumentComparison};
use crate::config::Tunables;
use crate::error::ToolError;
use crate::header::write_header;
use crate::job::VerifyJob;
use crate::orchestrator::{HandoffReport, Orchestrator};
use crate::toolchain::build_tracer;

/// Verdicts of one variant against the baseline (the first variant by name).
#[derive(Clone, Debug, PartialEq)]
pub struct VariantComparison {
    pub baseline: String,
    pub variant: String,
    pub arguments: Vec<ArgumentComparison>,
}

impl VariantComparison {
    pub fn all_close(&self) -> bool {
        self.arguments.iter().all(|c| c.close)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerifyOutcome {
    /// One report per variant, in run order.
    pub reports: Vec<(String, HandoffReport)>,
    pub comparisons: Vec<VariantComparison>,
}

impl VerifyOutcome {
    pub fn all_close(&self) -> bool {
        self.comparisons.iter().all(VariantComparison::all_close)
    }
}

/// Writes the argument header, builds the tracer when only its source tree is given, and runs
/// each variant against `backend`. Any failed handoff ends the job.
pub fn run_job(
    job: &VerifyJob,
    backend: &dyn DeviceBackend,
    tunables: &Tunables,
) -> Result<VerifyOutcome, ToolError> {
    write_header(&job.args, job.header_path())?;
    if job.tracer_lib.is_none() {
        if let Some(dir) = &job.tracer_dir {
            build_tracer(dir, job.build_jobs())?;
        }
    }

    let orchestrator = Orchestrator::new(backend);
    let mut reports = Vec::with_capacity(job.variants.len());
    for (name, binary) in &job.variants {
        let config = job.session_for(binary)?.with_tunables(tunables);
        let report = orchestrator
            .run(&config)
            .map_err(|source| ToolError::Handoff {
                variant: name.clone(),
                source,
            })?;
        tracing::info!(
            variant = %name,
            arguments = report.results.len(),
            "collected results; producer {}",
            report.exit
        );
        reports.push((name.clone(), report));
    }

    let comparisons = match reports.split_first() {
        Some(((baseline, first), rest)) => rest
            .iter()
            .map(|(variant, report)| VariantComparison {
                baseline: baseline.clone(),
                variant: variant.clone(),
                arguments: compare_results(&first.results, &report.results, job.tolerance()),
            })
            .collect(),
        None => Vec::new(),
    };
    Ok(VerifyOutcome {
        reports,
        comparisons,
    })
}

//! Concurrent batch evaluation
//!
//! The batch driver fans a list of template inputs out over tokio's blocking
//! pool and fans the results back in original input order. At most
//! `max_parallel` evaluations are in flight at once; further inputs wait for
//! a free slot.
//!
//! The first failing input ends the run. Evaluations already in flight are
//! left to finish on their own and their results are dropped; nothing is
//! cancelled mid-evaluation, since external programs started by a template
//! cannot be interrupted cleanly.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xdeps_cli::batch::{BatchDriver, SandboxedPipeline};
//! use xdeps_cli::config::OptionSet;
//! use xdeps_cli::template::{EvaluationContext, TemplateInput};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ctx = EvaluationContext::new(Arc::new(OptionSet::from_specs(["ssl"])));
//! let driver = BatchDriver::new(SandboxedPipeline::new(ctx), 64);
//! let reports = driver
//!     .run(vec![TemplateInput::from_arg("srcpkgs/foo/template")])
//!     .await?;
//! for report in reports {
//!     println!("{}: {:?}", report.input, report.dependencies);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};

use crate::extract::{DependencyRecord, extract_dependencies};
use crate::template::{EvaluationContext, Template, TemplateInput};

/// Work done for one input: load, evaluate, extract.
///
/// Implementations run on blocking threads and may be called concurrently.
pub trait TemplatePipeline: Send + Sync + 'static {
    fn process(&self, input: &TemplateInput) -> Result<DependencyRecord>;
}

/// Production pipeline: parse the template and evaluate it in a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxedPipeline {
    ctx: EvaluationContext,
}

impl SandboxedPipeline {
    #[must_use]
    pub fn new(ctx: EvaluationContext) -> Self {
        Self { ctx }
    }
}

impl TemplatePipeline for SandboxedPipeline {
    fn process(&self, input: &TemplateInput) -> Result<DependencyRecord> {
        let template = Template::load(input.clone())?;
        let env = template.evaluate(&self.ctx)?;
        Ok(extract_dependencies(&env))
    }
}

/// Dependencies of one input, tagged with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateReport {
    pub index: usize,
    pub input: TemplateInput,
    pub dependencies: DependencyRecord,
}

/// Runs a [`TemplatePipeline`] over many inputs with bounded concurrency.
pub struct BatchDriver<P> {
    pipeline: Arc<P>,
    max_parallel: usize,
}

impl<P: TemplatePipeline> BatchDriver<P> {
    pub fn new(pipeline: P, max_parallel: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            max_parallel: max_parallel.max(1),
        }
    }

    #[must_use]
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Evaluate every input and return the reports in input order.
    ///
    /// Returns the first error observed, annotated with the failing input.
    pub async fn run(&self, inputs: Vec<TemplateInput>) -> Result<Vec<TemplateReport>> {
        let total = inputs.len();
        tracing::debug!(
            "Evaluating {total} template(s) with up to {} in flight",
            self.max_parallel
        );

        let mut pending = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| {
                let pipeline = Arc::clone(&self.pipeline);
                async move {
                    let task_input = input.clone();
                    let result = tokio::task::spawn_blocking(move || pipeline.process(&task_input))
                        .await
                        .context("evaluation task panicked")
                        .and_then(|result| result);
                    (index, input, result)
                }
            })
            .buffer_unordered(self.max_parallel);

        let mut slots: Vec<Option<TemplateReport>> = (0..total).map(|_| None).collect();
        while let Some((index, input, result)) = pending.next().await {
            let dependencies = result.with_context(|| input.to_string())?;
            tracing::trace!("Finished {input} ({} dependency variables)", dependencies.len());
            slots[index] = Some(TemplateReport {
                index,
                input,
                dependencies,
            });
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn inputs(count: usize) -> Vec<TemplateInput> {
        (0..count).map(|i| TemplateInput::from_arg(&format!("srcpkgs/p{i}/template"))).collect()
    }

    /// Pipeline that finishes later inputs first and records peak concurrency.
    #[derive(Default)]
    struct Counting {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<String>,
    }

    impl TemplatePipeline for Counting {
        fn process(&self, input: &TemplateInput) -> Result<DependencyRecord> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let name = input.to_string();
            let number: u64 = name
                .trim_start_matches("srcpkgs/p")
                .trim_end_matches("/template")
                .parse()
                .unwrap_or(0);
            std::thread::sleep(Duration::from_millis(20u64.saturating_sub(number % 20)));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(name.as_str()) {
                anyhow::bail!("boom");
            }
            Ok([("depends".to_string(), vec![name])].into_iter().collect())
        }
    }

    #[tokio::test]
    async fn test_reports_in_input_order() {
        let driver = BatchDriver::new(Counting::default(), 8);
        let reports = driver.run(inputs(40)).await.unwrap();
        assert_eq!(reports.len(), 40);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.index, i);
            assert_eq!(report.input.to_string(), format!("srcpkgs/p{i}/template"));
            assert_eq!(report.dependencies.get("depends").unwrap()[0], report.input.to_string());
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let driver = BatchDriver::new(Counting::default(), 3);
        driver.run(inputs(30)).await.unwrap();
        let peak = driver.pipeline.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "observed {peak} concurrent evaluations");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_with_path() {
        let pipeline = Counting {
            fail_on: Some("srcpkgs/p7/template".to_string()),
            ..Counting::default()
        };
        let driver = BatchDriver::new(pipeline, 4);
        let err = driver.run(inputs(20)).await.unwrap_err();
        assert_eq!(format!("{err:#}"), "srcpkgs/p7/template: boom");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let driver = BatchDriver::new(Counting::default(), 4);
        assert!(driver.run(Vec::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_zero_parallelism_clamped() {
        assert_eq!(BatchDriver::new(Counting::default(), 0).max_parallel(), 1);
    }
}

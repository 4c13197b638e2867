use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use xdeps_cli::batch::{BatchDriver, SandboxedPipeline, TemplatePipeline};
use xdeps_cli::config::{EngineConfig, OptionSet};
use xdeps_cli::core::XdepsError;
use xdeps_cli::extract::DependencyRecord;
use xdeps_cli::sandbox::SharedWriter;
use xdeps_cli::template::{EvaluationContext, TemplateInput};
use xdeps_cli::test_utils::{CaptureBuffer, TemplateTree, init_test_logging};

fn input(path: &std::path::Path) -> TemplateInput {
    TemplateInput::from_arg(&path.to_string_lossy())
}

/// Real sandboxed pipeline wrapped with an in-flight counter.
struct Instrumented {
    inner: SandboxedPipeline,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl TemplatePipeline for Instrumented {
    fn process(&self, input: &TemplateInput) -> Result<DependencyRecord> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let result = self.inner.process(input);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test]
async fn test_real_templates_reported_in_order() {
    init_test_logging(None);
    let tree = TemplateTree::new().unwrap();
    let inputs: Vec<_> = (0..100)
        .map(|i| input(&tree.add(&format!("p{i}"), &format!("pkgname=p{i}\ndepends=d{i}\n")).unwrap()))
        .collect();

    let config = EngineConfig::default().with_max_parallel(4).unwrap();
    let driver = BatchDriver::new(SandboxedPipeline::new(config.evaluation_context()), config.max_parallel);
    let reports = driver.run(inputs).await.unwrap();

    assert_eq!(reports.len(), 100);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.dependencies.get("depends").unwrap(), [format!("d{i}")]);
    }
}

#[tokio::test]
async fn test_peak_in_flight_never_exceeds_limit() {
    let tree = TemplateTree::new().unwrap();
    let inputs: Vec<_> = (0..64)
        .map(|i| input(&tree.add(&format!("p{i}"), "depends=x\n").unwrap()))
        .collect();

    let pipeline = Arc::new(Instrumented {
        inner: SandboxedPipeline::new(EvaluationContext::default()),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    struct Shared(Arc<Instrumented>);
    impl TemplatePipeline for Shared {
        fn process(&self, input: &TemplateInput) -> Result<DependencyRecord> {
            self.0.process(input)
        }
    }

    BatchDriver::new(Shared(Arc::clone(&pipeline)), 5).run(inputs).await.unwrap();
    let peak = pipeline.peak.load(Ordering::SeqCst);
    assert!((1..=5).contains(&peak), "peak in-flight evaluations: {peak}");
}

#[tokio::test]
async fn test_failure_kind_survives_batch_context() {
    let tree = TemplateTree::new().unwrap();
    let good = tree.add("good", "depends=x\n").unwrap();
    let bad = tree.add("bad", "pkgname=bad\nnc -l 8080\n").unwrap();

    let driver = BatchDriver::new(SandboxedPipeline::new(EvaluationContext::default()), 2);
    let err = driver.run(vec![input(&good), input(&bad)]).await.unwrap_err();

    assert!(format!("{err:#}").starts_with(&bad.display().to_string()));
    assert!(matches!(
        err.downcast_ref::<XdepsError>(),
        Some(XdepsError::UnrecognizedCommand { command, .. }) if command == "nc"
    ));
}

#[tokio::test]
async fn test_redirections_never_create_files() {
    let tree = TemplateTree::new().unwrap();
    let target = tree.root().join("written-by-template");
    let source = format!(
        "pkgname=foo\n\
         echo payload > {0}\n\
         echo more >> {0}\n\
         cat_result=\"$(read -r line < {0}; echo \"[$line]\")\"\n\
         depends=\"$cat_result\"\n",
        target.display()
    );
    let path = tree.add("foo", &source).unwrap();

    let driver = BatchDriver::new(SandboxedPipeline::new(EvaluationContext::default()), 1);
    let reports = driver.run(vec![input(&path)]).await.unwrap();

    assert!(!target.exists());
    assert_eq!(reports[0].dependencies.get("depends").unwrap(), ["[]"]);
}

#[tokio::test]
async fn test_same_inputs_same_records() {
    let tree = TemplateTree::new().unwrap();
    let path = tree
        .add(
            "foo",
            "pkgname=foo\n\
             makedepends=\"$(vopt_if doc doxygen) zlib-devel\"\n\
             depends=\"${makedepends/-devel/}>=1.2\"\n",
        )
        .unwrap();
    let ctx = EvaluationContext::new(Arc::new(OptionSet::from_specs(["doc"])));
    let driver = BatchDriver::new(SandboxedPipeline::new(ctx), 8);

    let first = driver.run(vec![input(&path); 10]).await.unwrap();
    let second = driver.run(vec![input(&path); 10]).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].dependencies.get("makedepends").unwrap(), ["doxygen", "zlib-devel"]);
    assert_eq!(first[0].dependencies.get("depends").unwrap(), ["doxygen", "zlib>=1.2"]);
}

#[tokio::test]
async fn test_diagnostics_routed_to_context_sink() {
    let tree = TemplateTree::new().unwrap();
    let path = tree.add("foo", "pkgname=foo\necho one >&2\nprintf 'two\\nthree' >&2\n").unwrap();
    let capture = CaptureBuffer::default();
    let ctx = EvaluationContext::default().with_diagnostics(SharedWriter::new(capture.clone()));

    BatchDriver::new(SandboxedPipeline::new(ctx), 1)
        .run(vec![input(&path)])
        .await
        .unwrap();
    assert_eq!(capture.contents(), "foo: one\nfoo: two\nfoo: three\n");
}

#[tokio::test]
async fn test_runaway_templates_fail_instead_of_crashing() {
    let tree = TemplateTree::new().unwrap();
    let nested = format!("x={}x{}\n", "\"$(echo ".repeat(3000), ")\"".repeat(3000));
    let cases = [
        ("evalloop", "pkgname=evalloop\ns='eval \"$s\"'\neval \"$s\"\n".to_string(), "maximum nesting level exceeded"),
        ("recurse", "pkgname=recurse\nf() { f; }\nf\n".to_string(), "maximum nesting level exceeded"),
        ("substloop", "pkgname=substloop\nf() { x=$(f); }\nf\n".to_string(), "maximum nesting level exceeded"),
        ("nested", nested, "nesting exceeds"),
    ];

    let driver = BatchDriver::new(SandboxedPipeline::new(EvaluationContext::default()), 4);
    for (name, source, expected) in cases {
        let path = tree.add(name, &source).unwrap();
        let err = driver.run(vec![input(&path)]).await.unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.starts_with(&path.display().to_string()), "{chain}");
        assert!(chain.contains(expected), "{name}: {chain}");
    }
}

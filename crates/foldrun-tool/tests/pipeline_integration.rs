//! Integration tests for the fold pipeline with a fake instance generator.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use foldrun_core::{FoldrunError, ParamOverrides, Result, RunType};
use foldrun_tool::{
    plan_folds, FoldPhase, Harvester, OverwriteDecision, OverwritePolicy, OverwritePrompt,
    Pipeline, ProcessInvoker, ToolCommand, ToolExit, ToolInvoker, ToolLayout,
};
use tokio::sync::watch;
use xmltree::{Element, XMLNode};

const TEMPLATE: &str = "<parameters><run-type>train</run-type><run-number>0</run-number>\
<set-name>none</set-name><number-of-classes>0</number-of-classes><n-grams>3</n-grams></parameters>";

/// What the fake tool saw on one invocation.
#[derive(Debug, Clone)]
struct Seen {
    run_type: RunType,
    set_name: String,
    staged_files: usize,
    installed_set_name: String,
}

/// Behaves like the real tool: reads the upload area and installed
/// parameters, writes instances and appends a `<run>` to the run log.
struct FakeTool {
    layout: ToolLayout,
    seen: Mutex<Vec<Seen>>,
}

impl FakeTool {
    fn new(layout: ToolLayout) -> Self {
        Self {
            layout,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn child(name: &str, text: &str) -> XMLNode {
    let mut el = Element::new(name);
    el.children.push(XMLNode::Text(text.to_string()));
    XMLNode::Element(el)
}

fn count_files(dir: &Path) -> usize {
    let mut n = 0;
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            n += count_files(&path);
        } else {
            n += 1;
        }
    }
    n
}

#[async_trait]
impl ToolInvoker for FakeTool {
    async fn invoke(&self, overrides: &ParamOverrides) -> Result<ToolExit> {
        let params = Element::parse(fs::File::open(&self.layout.params)?).unwrap();
        let installed_set_name = params
            .get_child("set-name")
            .and_then(|c| c.get_text())
            .unwrap()
            .into_owned();

        let kind = match overrides.run_type {
            RunType::Train => "TRAINING",
            RunType::Test => "TEST",
        };
        let workflow = format!(
            "stylenerun/data//Workflow_{}_{}_{}",
            kind, overrides.run_number, overrides.set_name
        );
        let instances = self.layout.root.join(&workflow).join("instances");
        fs::create_dir_all(&instances)?;
        let staged_files = count_files(&self.layout.upload_dir);
        fs::write(
            instances.join(format!("{}.inst", overrides.set_name)),
            format!("{staged_files}\n"),
        )?;

        let mut log = if self.layout.run_log.exists() {
            Element::parse(fs::File::open(&self.layout.run_log)?).unwrap()
        } else {
            Element::new("runs")
        };
        let mut run = Element::new("run");
        run.children.push(child("type", kind));
        run.children
            .push(child("run-number", &overrides.run_number.to_string()));
        run.children.push(child("set-name", &overrides.set_name));
        run.children.push(child("date", "6/22/11 11:26 AM"));
        run.children.push(child("workflow-map", &workflow));
        log.children.push(XMLNode::Element(run));
        log.write(fs::File::create(&self.layout.run_log)?).unwrap();

        self.seen.lock().unwrap().push(Seen {
            run_type: overrides.run_type,
            set_name: overrides.set_name.clone(),
            staged_files,
            installed_set_name,
        });
        Ok(ToolExit::default())
    }
}

struct NeverAsked;

impl OverwritePrompt for NeverAsked {
    fn ask(&mut self, destination: &Path) -> Result<OverwriteDecision> {
        panic!("unexpected overwrite prompt for {}", destination.display());
    }
}

struct Env {
    data: tempfile::TempDir,
    tool: tempfile::TempDir,
    out: tempfile::TempDir,
    template: PathBuf,
    layout: ToolLayout,
}

fn env(folds: &[&str], labels: &[&str]) -> Env {
    let data = tempfile::tempdir().unwrap();
    for fold in folds {
        for label in labels {
            let dir = data.path().join(fold).join(label);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{fold}-{label}.txt")), "one\ntoken\n").unwrap();
        }
    }
    fs::write(data.path().join(".DS_Store"), "").unwrap();

    let tool = tempfile::tempdir().unwrap();
    fs::create_dir_all(tool.path().join("stylenerun/data/uploadfiles")).unwrap();
    fs::write(tool.path().join("stylene.jar"), b"PK").unwrap();
    let layout = ToolLayout::from_root(tool.path());

    let template = tool.path().join("startparameters.xml");
    fs::write(&template, TEMPLATE).unwrap();

    Env {
        data,
        tool,
        out: tempfile::tempdir().unwrap(),
        template,
        layout,
    }
}

/// Test: three folds each held out once, instances copied per fold
#[tokio::test]
async fn test_three_fold_run() {
    let env = env(&["fold-01", "fold-02", "fold-03"], &["A", "B"]);
    env.layout.validate().unwrap();
    let plan = plan_folds(env.data.path()).unwrap();
    assert!(!env.data.path().join(".DS_Store").exists());

    let fake = FakeTool::new(env.layout.clone());
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline = Pipeline::new(env.layout.clone(), &env.template, &fake, harvester);

    let report = pipeline.run(&plan).await.expect("pipeline failed");

    assert_eq!(pipeline.phase(), FoldPhase::Done);
    assert_eq!(report.folds.len(), 3);
    assert_eq!(report.num_classes, 2);

    let seen = fake.seen();
    assert_eq!(seen.len(), 6);
    // fold-02: train on fold-01 + fold-03 (4 documents), test on fold-02 (2).
    assert_eq!(seen[2].run_type, RunType::Train);
    assert_eq!(seen[2].set_name, "fold-02");
    assert_eq!(seen[2].staged_files, 4);
    assert_eq!(seen[3].run_type, RunType::Test);
    assert_eq!(seen[3].staged_files, 2);
    assert!(seen.iter().all(|s| s.installed_set_name == s.set_name));

    for name in ["fold-01", "fold-02", "fold-03"] {
        assert!(env.out.path().join(name).join("train").join(format!("{name}.inst")).exists());
        assert!(env.out.path().join(name).join("test").join(format!("{name}.inst")).exists());
    }

    let second = &report.folds[1];
    assert!(second.handles.train.contains("TRAINING_2_fold-02"));
    assert_eq!(
        second.held_out.as_deref(),
        Some(env.data.path().join("fold-02").as_path())
    );

    // Run log holds only the last fold's pair.
    let log = foldrun_core::RunLog::load(&env.layout.run_log).unwrap();
    assert_eq!(log.records().len(), 2);
    assert!(log.records().iter().all(|r| r.set_name == "fold-03"));
}

/// Test: a single fold produces train instances only
#[tokio::test]
async fn test_single_fold_train_only() {
    let env = env(&["fold-1"], &["pos", "neg", "neutral"]);
    let plan = plan_folds(env.data.path()).unwrap();

    let fake = FakeTool::new(env.layout.clone());
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline = Pipeline::new(env.layout.clone(), &env.template, &fake, harvester);
    let report = pipeline.run(&plan).await.expect("pipeline failed");

    assert_eq!(report.folds.len(), 1);
    assert!(report.folds[0].harvested.test.is_none());
    assert!(report.folds[0].test_exit_code.is_none());
    assert_eq!(fake.seen().len(), 1);
    assert_eq!(fake.seen()[0].staged_files, 3);
    assert!(env.out.path().join("fold-01/train").is_dir());
    assert!(!env.out.path().join("fold-01/test").exists());
}

/// Test: stale runs left in the log are cleared before the fold runs
#[tokio::test]
async fn test_stale_runs_are_cleared() {
    let env = env(&["fold-01", "fold-02"], &["A"]);
    fs::write(
        &env.layout.run_log,
        "<runs><run><type>TRAINING</type><set-name>fold-01</set-name>\
         <workflow-map>stylenerun/data//Workflow_gone</workflow-map></run></runs>",
    )
    .unwrap();
    let plan = plan_folds(env.data.path()).unwrap();

    let fake = FakeTool::new(env.layout.clone());
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline = Pipeline::new(env.layout.clone(), &env.template, &fake, harvester);

    let report = pipeline.run(&plan).await.expect("pipeline failed");
    assert!(!report.folds[0].handles.train.contains("gone"));
}

/// Test: existing output with the "always" policy is replaced without asking
#[tokio::test]
async fn test_rerun_with_always_policy() {
    let env = env(&["fold-01", "fold-02"], &["A", "B"]);
    let stale = env.out.path().join("fold-01/train/stale.inst");
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "old").unwrap();
    let plan = plan_folds(env.data.path()).unwrap();

    let fake = FakeTool::new(env.layout.clone());
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Always,
        Box::new(NeverAsked),
    );
    let mut pipeline = Pipeline::new(env.layout.clone(), &env.template, &fake, harvester);
    pipeline.run(&plan).await.expect("pipeline failed");

    assert!(!stale.exists());
    assert!(env.out.path().join("fold-01/train/fold-01.inst").exists());
}

/// Test: a fatal line from the tool process fails the whole run
#[tokio::test]
async fn test_fatal_tool_output_fails_run() {
    let env = env(&["fold-01", "fold-02"], &["A"]);
    let plan = plan_folds(env.data.path()).unwrap();

    let invoker = ProcessInvoker::new(ToolCommand::custom(
        vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'Loading'; echo 'ERROR: disk full. Exiting...'".to_string(),
        ],
        env.tool.path().to_path_buf(),
        60,
    ));
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline = Pipeline::new(env.layout.clone(), &env.template, &invoker, harvester);

    let err = pipeline.run(&plan).await.unwrap_err();
    assert!(matches!(err, FoldrunError::ToolFailure(_)));
    assert_eq!(pipeline.phase(), FoldPhase::Failed);
    assert!(!env.out.path().join("fold-01").exists());
}

/// Test: a tool that logs errors but writes no run fails at correlation
#[tokio::test]
async fn test_tool_without_runs_fails_correlation() {
    let env = env(&["fold-01", "fold-02"], &["A"]);
    fs::write(&env.layout.run_log, "<runs/>").unwrap();
    let plan = plan_folds(env.data.path()).unwrap();

    let invoker = ProcessInvoker::new(ToolCommand::custom(
        vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'ERROR: retrying connection'".to_string(),
        ],
        env.tool.path().to_path_buf(),
        60,
    ));
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline = Pipeline::new(env.layout.clone(), &env.template, &invoker, harvester);

    let err = pipeline.run(&plan).await.unwrap_err();
    assert!(matches!(err, FoldrunError::EmptyRunLog(_)));
    assert_eq!(pipeline.phase(), FoldPhase::Failed);
}

/// Test: a run cancelled before it starts never reaches the tool
#[tokio::test]
async fn test_cancelled_run_fails_before_invoking() {
    let env = env(&["fold-01", "fold-02"], &["A"]);
    let plan = plan_folds(env.data.path()).unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(true);

    let fake = FakeTool::new(env.layout.clone());
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline =
        Pipeline::new(env.layout.clone(), &env.template, &fake, harvester).with_cancel(cancel_rx);

    let err = pipeline.run(&plan).await.unwrap_err();
    assert!(matches!(err, FoldrunError::Cancelled));
    assert_eq!(pipeline.phase(), FoldPhase::Failed);
    assert!(fake.seen().is_empty());
    assert!(!env.out.path().join("fold-01").exists());
}

/// Cancels the run once the wrapped tool has finished one invocation.
struct CancelAfterOne {
    inner: FakeTool,
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl ToolInvoker for CancelAfterOne {
    async fn invoke(&self, overrides: &ParamOverrides) -> Result<ToolExit> {
        let exit = self.inner.invoke(overrides).await?;
        self.cancel.send(true).ok();
        Ok(exit)
    }
}

/// Test: cancelling between tool runs stops at the next phase change
#[tokio::test]
async fn test_cancel_between_runs_stops_pipeline() {
    let env = env(&["fold-01", "fold-02"], &["A"]);
    let plan = plan_folds(env.data.path()).unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let tool = CancelAfterOne {
        inner: FakeTool::new(env.layout.clone()),
        cancel: cancel_tx,
    };
    let harvester = Harvester::new(
        env.layout.clone(),
        env.out.path(),
        OverwritePolicy::Ask,
        Box::new(NeverAsked),
    );
    let mut pipeline =
        Pipeline::new(env.layout.clone(), &env.template, &tool, harvester).with_cancel(cancel_rx);

    let err = pipeline.run(&plan).await.unwrap_err();
    assert!(matches!(err, FoldrunError::Cancelled));
    assert_eq!(pipeline.phase(), FoldPhase::Failed);
    // Train ran, test never started, nothing was harvested.
    assert_eq!(tool.inner.seen().len(), 1);
    assert!(!env.out.path().join("fold-01").exists());
}

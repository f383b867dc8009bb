mod common;

use async_trait::async_trait;
use serde_json::{Value, json};
use service_ppt::backend::{
    Backend, BackendKind, ExportFlags, ImageFormat, Presentation, ProbeReport,
};
use service_ppt::commands::register_standard_commands;
use service_ppt::config::{AppConfig, ErrorPolicy};
use service_ppt::dsl::builder::ServiceBuilder;
use service_ppt::error::{Result, ServiceError};
use service_ppt::runtime::context::ExecutionContext;
use service_ppt::runtime::engine::{AbortHandle, Engine, RunState};
use service_ppt::runtime::monitor::RecordingMonitor;
use service_ppt::runtime::node::{Command, CommandDefinition};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend whose presentations only count how often they are opened,
/// saved and closed.
#[derive(Default)]
struct CountingBackend {
    opened: Arc<AtomicUsize>,
    saved: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

struct CountingPresentation {
    open: bool,
    slides: Vec<String>,
    saved: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Presentation for CountingPresentation {
    fn kind(&self) -> BackendKind {
        BackendKind::Pptx
    }
    fn is_open(&self) -> bool {
        self.open
    }
    async fn slide_count(&mut self) -> Result<usize> {
        Ok(self.slides.len())
    }
    async fn slide_texts(&mut self, index: usize) -> Result<Vec<String>> {
        Ok(vec![self.slides[index].clone()])
    }
    async fn notes_texts(&mut self, _index: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn save(&mut self, _path: &Path) -> Result<()> {
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn insert_file_slides(&mut self, _path: &Path, _at: usize) -> Result<usize> {
        Ok(0)
    }
    async fn duplicate_slides(&mut self, sources: &[usize], insert_at: usize) -> Result<usize> {
        let copies: Vec<String> = sources.iter().map(|&i| self.slides[i].clone()).collect();
        let n = copies.len();
        self.slides.splice(insert_at..insert_at, copies);
        Ok(n)
    }
    async fn find_replace_texts(&mut self, slides: &[usize], pairs: &[(String, String)]) -> Result<usize> {
        let mut changed = 0;
        for &i in slides {
            for (find, replace) in pairs {
                if self.slides[i].contains(find.as_str()) {
                    self.slides[i] = self.slides[i].replace(find.as_str(), replace);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
    async fn render_slide(&mut self, _: usize, _: &Path, _: ImageFormat, _: ExportFlags) -> Result<()> {
        Ok(())
    }
    async fn render_shapes(
        &mut self,
        _: usize,
        _: &Path,
        _: &str,
        _: ImageFormat,
        _: ExportFlags,
    ) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for CountingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pptx
    }
    async fn open(&self, _path: &Path) -> Result<Box<dyn Presentation>> {
        self.new_presentation().await
    }
    async fn new_presentation(&self) -> Result<Box<dyn Presentation>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingPresentation {
            open: true,
            slides: vec!["{title}".to_string(), "body".to_string()],
            saved: Arc::clone(&self.saved),
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// Fails with a backend error, which ends the run.
#[derive(Debug)]
struct ExplodeCommand;

#[async_trait]
impl Command for ExplodeCommand {
    async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<()> {
        Err(ServiceError::Backend("application stopped responding".into()))
    }
}

struct ExplodeDefinition;

impl CommandDefinition for ExplodeDefinition {
    fn name(&self) -> &str {
        "Explode"
    }
    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }
    fn prepare(&self, _params: Value) -> Result<Box<dyn Command>> {
        Ok(Box::new(ExplodeCommand))
    }
}

/// Backend that logs `open#n` and `close#n` in call order. The deck
/// numbered `failing_close` reports an error when it is closed.
#[derive(Default)]
struct LoggingBackend {
    log: Arc<Mutex<Vec<String>>>,
    next: AtomicUsize,
    failing_close: Option<usize>,
}

impl LoggingBackend {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn presentation(&self) -> LoggedPresentation {
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(format!("open#{}", id));
        LoggedPresentation {
            id,
            open: true,
            fail_close: self.failing_close == Some(id),
            log: Arc::clone(&self.log),
        }
    }
}

struct LoggedPresentation {
    id: usize,
    open: bool,
    fail_close: bool,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Presentation for LoggedPresentation {
    fn kind(&self) -> BackendKind {
        BackendKind::Com
    }
    fn is_open(&self) -> bool {
        self.open
    }
    async fn slide_count(&mut self) -> Result<usize> {
        Ok(0)
    }
    async fn slide_texts(&mut self, _index: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn notes_texts(&mut self, _index: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn save(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
    async fn insert_file_slides(&mut self, _path: &Path, _at: usize) -> Result<usize> {
        Ok(0)
    }
    async fn duplicate_slides(&mut self, _sources: &[usize], _insert_at: usize) -> Result<usize> {
        Ok(0)
    }
    async fn find_replace_texts(&mut self, _slides: &[usize], _pairs: &[(String, String)]) -> Result<usize> {
        Ok(0)
    }
    async fn render_slide(&mut self, _: usize, _: &Path, _: ImageFormat, _: ExportFlags) -> Result<()> {
        Ok(())
    }
    async fn render_shapes(
        &mut self,
        _: usize,
        _: &Path,
        _: &str,
        _: ImageFormat,
        _: ExportFlags,
    ) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.log.lock().unwrap().push(format!("close#{}", self.id));
        if self.fail_close {
            return Err(ServiceError::Backend("close failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for LoggingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Com
    }
    async fn open(&self, _path: &Path) -> Result<Box<dyn Presentation>> {
        Ok(Box::new(self.presentation()))
    }
    async fn new_presentation(&self) -> Result<Box<dyn Presentation>> {
        Ok(Box::new(self.presentation()))
    }
}

fn counting_engine(backend: &Arc<CountingBackend>, monitor: Arc<RecordingMonitor>) -> Engine {
    let backend: Arc<dyn Backend> = backend.clone();
    let mut engine = Engine::new(backend).with_monitor(monitor);
    register_standard_commands(&mut engine);
    engine.register_command(Box::new(ExplodeDefinition));
    engine
}

#[tokio::test]
async fn test_disabled_commands_have_no_side_effects() {
    let temp_dir = tempfile::tempdir().unwrap();
    let out = temp_dir.path().join("out.pptx");
    let notes = temp_dir.path().join("out.txt");

    let service = ServiceBuilder::new()
        .command("OpenFile", "open").param("filename", "").disabled().build()
        .command("SetVariables", "vars").param("str_dict", json!({ "title": "x" })).disabled().build()
        .command("SaveFiles", "save")
            .param("filename", out.to_string_lossy().to_string())
            .param("notes_filename", notes.to_string_lossy().to_string())
            .disabled()
            .build()
        .command("NotARealCommand", "junk").disabled().build()
        .build();

    let backend = Arc::new(CountingBackend::default());
    let monitor = Arc::new(RecordingMonitor::new());
    let mut engine = counting_engine(&backend, monitor.clone());
    let report = engine.run(&service).await.expect("run failed");

    assert_eq!(report.skipped, vec![0, 1, 2, 3]);
    assert!(report.executed.is_empty());
    assert!(report.is_clean());
    assert_eq!(engine.state(), RunState::Completed);
    assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
    assert_eq!(backend.saved.load(Ordering::SeqCst), 0);
    assert!(!out.exists());
    assert!(!notes.exists());
    assert!(monitor.errors().is_empty());
}

#[tokio::test]
async fn test_handle_released_once_when_a_command_fails() {
    let service = ServiceBuilder::new()
        .new_presentation("open")
        .command("Explode", "boom").build()
        .save_files("save", "never.pptx")
        .build();

    let backend = Arc::new(CountingBackend::default());
    let monitor = Arc::new(RecordingMonitor::new());
    let mut engine = counting_engine(&backend, monitor.clone());
    let err = engine.run(&service).await.unwrap_err();

    assert_eq!(err.index, 1);
    assert_eq!(err.command, "boom (Explode)");
    assert!(matches!(err.source, ServiceError::Backend(_)));
    assert_eq!(engine.state(), RunState::Failed { index: 1 });
    assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
    assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
    assert_eq!(backend.saved.load(Ordering::SeqCst), 0);
    assert_eq!(monitor.errors().len(), 1);
}

#[tokio::test]
async fn test_handle_released_once_on_success() {
    let service = ServiceBuilder::new()
        .new_presentation("first")
        .new_presentation("second")
        .save_files("save", "out.pptx")
        .build();

    let backend = Arc::new(CountingBackend::default());
    let mut engine = counting_engine(&backend, Arc::new(RecordingMonitor::new()));
    let report = engine.run(&service).await.unwrap();

    assert_eq!(report.executed, vec![0, 1, 2]);
    // the first deck is closed when the second one replaces it
    assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
    assert_eq!(backend.closed.load(Ordering::SeqCst), 2);
    assert_eq!(backend.saved.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recoverable_errors_continue() {
    let service = ServiceBuilder::new()
        .new_presentation("open")
        .command("SetVariables", "bad date")
            .param("format_dict", json!({ "d": { "format_type": "DateTimeFormat", "value": "someday" } }))
            .build()
        .command("NoSuchCommand", "").build()
        .set_variables("title", &[("title", "Easter")])
        .build();

    let backend = Arc::new(CountingBackend::default());
    let monitor = Arc::new(RecordingMonitor::new());
    let mut engine = counting_engine(&backend, monitor.clone());
    let report = engine.run(&service).await.unwrap();

    assert_eq!(report.executed, vec![0, 3]);
    let failed: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
    assert_eq!(failed, vec![1, 2]);
    assert!(report.errors.iter().all(|e| matches!(e.source, ServiceError::Validation(_))));
    assert_eq!(monitor.errors().len(), 2);
    assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_policy_keeps_handle_for_resume() {
    let service = ServiceBuilder::new()
        .new_presentation("open")
        .command("DuplicateWithText", "missing find_text").build()
        .save_files("save", "out.pptx")
        .build();

    let backend = Arc::new(CountingBackend::default());
    let mut engine = counting_engine(&backend, Arc::new(RecordingMonitor::new()))
        .with_error_policy(ErrorPolicy::Stop);
    let mut ctx = engine.new_context();
    let abort = AbortHandle::new();

    let err = engine.run_from(&mut ctx, &service, 0, &abort).await.unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(engine.state(), RunState::Failed { index: 1 });
    assert!(ctx.has_presentation());
    assert_eq!(backend.closed.load(Ordering::SeqCst), 0);

    // resume after the failing step with the same open deck
    let report = engine.run_from(&mut ctx, &service, 2, &abort).await.unwrap();
    assert_eq!(report.executed, vec![2]);
    assert_eq!(engine.state(), RunState::Completed);
    assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
    assert_eq!(backend.saved.load(Ordering::SeqCst), 1);
    assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
    assert!(!ctx.has_presentation());
}

#[tokio::test]
async fn test_abort_is_checked_between_commands() {
    let service = ServiceBuilder::new()
        .new_presentation("open")
        .save_files("save", "out.pptx")
        .build();

    let backend = Arc::new(CountingBackend::default());
    let mut engine = counting_engine(&backend, Arc::new(RecordingMonitor::new()));
    let mut ctx = engine.new_context();
    let abort = AbortHandle::new();
    abort.abort();

    let err = engine.run_from(&mut ctx, &service, 0, &abort).await.unwrap_err();
    assert_eq!(err.index, 0);
    assert!(matches!(err.source, ServiceError::Aborted));
    assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_backend_unavailable_before_any_command() {
    match Engine::from_config(&AppConfig::default(), &ProbeReport::none()) {
        Err(ServiceError::BackendUnavailable(_)) => {}
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("engine started without a backend"),
    }
}

#[tokio::test]
async fn test_prompt_command_alias() {
    let service = ServiceBuilder::new()
        .command("PromptCommand", "legacy").param("message", "Hello {who}").build()
        .popup("new", "Bye")
        .build();

    let monitor = Arc::new(RecordingMonitor::new());
    let mut engine = common::pptx_engine(monitor.clone());
    assert!(engine.is_registered("PromptCommand"));
    assert!(engine.is_registered("PopupMessage"));

    let mut vars = service_ppt::runtime::variables::VariableTable::new();
    vars.set_string("who", "church");
    engine = engine.with_variables(vars);

    let report = engine.run(&service).await.unwrap();
    assert_eq!(report.executed, vec![0, 1]);
    assert_eq!(monitor.acknowledged(), vec!["Hello church", "Bye"]);
}

#[tokio::test]
async fn test_previous_deck_closed_before_next_open() {
    let service = ServiceBuilder::new()
        .new_presentation("first")
        .new_presentation("second")
        .build();

    let backend = Arc::new(LoggingBackend::default());
    let dyn_backend: Arc<dyn Backend> = backend.clone();
    let mut engine = Engine::new(dyn_backend);
    register_standard_commands(&mut engine);
    let report = engine.run(&service).await.unwrap();

    assert_eq!(report.executed, vec![0, 1]);
    assert_eq!(backend.log(), vec!["open#1", "close#1", "open#2", "close#2"]);
}

#[tokio::test]
async fn test_failed_close_does_not_open_next_deck() {
    let service = ServiceBuilder::new()
        .new_presentation("first")
        .new_presentation("second")
        .build();

    let backend = Arc::new(LoggingBackend {
        failing_close: Some(1),
        ..LoggingBackend::default()
    });
    let dyn_backend: Arc<dyn Backend> = backend.clone();
    let mut engine = Engine::new(dyn_backend);
    register_standard_commands(&mut engine);
    let err = engine.run(&service).await.unwrap_err();

    assert_eq!(err.index, 1);
    assert!(matches!(err.source, ServiceError::Backend(_)));
    // every open is matched by exactly one close
    assert_eq!(backend.log(), vec!["open#1", "close#1"]);
}

#[tokio::test]
async fn test_set_presentation_closes_new_deck_when_old_close_fails() {
    let backend = Arc::new(LoggingBackend {
        failing_close: Some(1),
        ..LoggingBackend::default()
    });
    let dyn_backend: Arc<dyn Backend> = backend.clone();
    let mut ctx = ExecutionContext::new(dyn_backend, Arc::new(RecordingMonitor::new()));

    ctx.set_presentation(Box::new(backend.presentation())).await.unwrap();
    let err = ctx
        .set_presentation(Box::new(backend.presentation()))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Backend(_)));
    assert!(!ctx.has_presentation());
    assert_eq!(backend.log(), vec!["open#1", "open#2", "close#1", "close#2"]);
}

#[tokio::test]
async fn test_resume_reopens_the_last_deck_before_start() {
    let service = ServiceBuilder::new()
        .new_presentation("first")
        .new_presentation("second")
        .popup("check", "Look at the slides")
        .build();

    let backend = Arc::new(LoggingBackend::default());
    let dyn_backend: Arc<dyn Backend> = backend.clone();
    let monitor = Arc::new(RecordingMonitor::new());
    let mut engine = Engine::new(dyn_backend).with_monitor(monitor.clone());
    register_standard_commands(&mut engine);

    let mut ctx = engine.new_context();
    assert_eq!(engine.reopen_before(&mut ctx, &service, 0).await.unwrap(), None);
    assert!(!ctx.has_presentation());

    let replayed = engine.reopen_before(&mut ctx, &service, 2).await.unwrap();
    assert_eq!(replayed, Some(1));
    assert!(ctx.has_presentation());
    // a context that already holds a deck is left alone
    assert_eq!(engine.reopen_before(&mut ctx, &service, 2).await.unwrap(), None);

    let report = engine.run_from(&mut ctx, &service, 2, &AbortHandle::new()).await.unwrap();
    assert_eq!(report.executed, vec![2]);
    assert_eq!(monitor.acknowledged(), vec!["Look at the slides"]);
    assert_eq!(backend.log(), vec!["open#1", "close#1"]);
}

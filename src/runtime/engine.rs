use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, ProbeReport, select_backend};
use crate::bible::{BibleSource, JsonBibleSource};
use crate::compiler::core::{Compiler, PlanStep};
use crate::compiler::symbols::SymbolTable;
use crate::config::{AppConfig, ErrorPolicy};
use crate::dsl::ServiceDefinition;
use crate::error::{Result, RunError, ServiceError};
use crate::hymn::{DirLyricSource, LyricSource};
use crate::runtime::context::ExecutionContext;
use crate::runtime::monitor::{LogMonitor, Monitor};
use crate::runtime::node::{Command, CommandDefinition};
use crate::runtime::variables::VariableTable;

/// Abort signal shared with the caller; checked between commands.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    /// Stopped at the command with this index.
    Failed { index: usize },
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: RunState,
    /// Indices of commands that ran to completion.
    pub executed: Vec<usize>,
    /// Indices of disabled commands.
    pub skipped: Vec<usize>,
    /// Recoverable errors reported while the run went on.
    pub errors: Vec<RunError>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Running,
            executed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A plan step bound to its command implementation.
pub enum Prepared {
    Ready(Box<dyn Command>),
    Invalid(ServiceError),
    Disabled,
}

pub struct PreparedStep {
    pub step: PlanStep,
    pub prepared: Prepared,
}

pub struct Engine {
    // Registry for Command Factories, keyed by type name and aliases
    command_registry: HashMap<String, Arc<dyn CommandDefinition>>,

    backend: Arc<dyn Backend>,
    monitor: Arc<dyn Monitor>,
    bible: Option<Arc<dyn BibleSource>>,
    lyrics: Option<Arc<dyn LyricSource>>,

    error_policy: ErrorPolicy,
    symbols: SymbolTable,
    variables: VariableTable,
    state: RunState,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            command_registry: HashMap::new(),
            backend,
            monitor: Arc::new(LogMonitor::new()),
            bible: None,
            lyrics: None,
            error_policy: ErrorPolicy::default(),
            symbols: SymbolTable::default(),
            variables: VariableTable::new(),
            state: RunState::Idle,
        }
    }

    /// Selects the backend from the probe and wires the configured data
    /// sources. Fails with `BackendUnavailable` before anything runs.
    pub fn from_config(config: &AppConfig, report: &ProbeReport) -> Result<Self> {
        let backend = select_backend(config.backend, report, config)?;
        let mut engine = Engine::new(backend)
            .with_error_policy(config.error_policy)
            .with_symbols(SymbolTable::new(config.symbols.clone()));
        if let Some(dir) = &config.bible_dir {
            engine = engine.with_bible(Arc::new(JsonBibleSource::new(dir)));
        }
        if let Some(dir) = &config.lyrics_dir {
            engine = engine.with_lyrics(Arc::new(DirLyricSource::new(dir)));
        }
        crate::commands::register_standard_commands(&mut engine);
        Ok(engine)
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_bible(mut self, bible: Arc<dyn BibleSource>) -> Self {
        self.bible = Some(bible);
        self
    }

    pub fn with_lyrics(mut self, lyrics: Arc<dyn LyricSource>) -> Self {
        self.lyrics = Some(lyrics);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    /// String variables every run starts with.
    pub fn with_variables(mut self, variables: VariableTable) -> Self {
        self.variables = variables;
        self
    }

    pub fn register_command(&mut self, definition: Box<dyn CommandDefinition>) {
        let definition: Arc<dyn CommandDefinition> = Arc::from(definition);
        for alias in definition.aliases() {
            self.command_registry
                .insert(alias.to_string(), Arc::clone(&definition));
        }
        self.command_registry
            .insert(definition.name().to_string(), definition);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.command_registry.contains_key(kind)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub fn new_context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Arc::clone(&self.backend), Arc::clone(&self.monitor))
            .with_bible(self.bible.clone())
            .with_lyrics(self.lyrics.clone());
        ctx.variables = self.variables.clone();
        ctx
    }

    /// Compiles and validates every enabled record. Invalid records are
    /// kept in place so indices stay aligned with the definition.
    pub fn prepare(&self, service: &ServiceDefinition) -> Vec<PreparedStep> {
        let plan = Compiler::new(self.symbols.clone()).compile(service);
        plan.steps
            .into_iter()
            .map(|step| {
                let prepared = if !step.enabled {
                    Prepared::Disabled
                } else {
                    match self.instantiate(&step) {
                        Ok(command) => Prepared::Ready(command),
                        Err(e) => Prepared::Invalid(e),
                    }
                };
                PreparedStep { step, prepared }
            })
            .collect()
    }

    fn instantiate(&self, step: &PlanStep) -> Result<Box<dyn Command>> {
        let def = self.command_registry.get(&step.kind).ok_or_else(|| {
            ServiceError::Validation(format!("unknown command type `{}`", step.kind))
        })?;
        def.validate(&step.data)?;
        def.prepare(step.data.clone())
    }

    /// Runs the whole definition in a fresh context. The presentation is
    /// always closed before this returns.
    pub async fn run(&mut self, service: &ServiceDefinition) -> std::result::Result<RunReport, RunError> {
        let mut ctx = self.new_context();
        let abort = AbortHandle::new();
        let result = self.run_from(&mut ctx, service, 0, &abort).await;
        if let Err(e) = ctx.close_presentation().await {
            error!(run_id = %ctx.run_id, error = %e, "failed to release presentation");
        }
        result
    }

    /// Runs from command `start` on, reusing whatever presentation `ctx`
    /// still holds.
    ///
    /// On completion, a fatal error or abort the presentation is closed. A
    /// recoverable error under `ErrorPolicy::Stop` leaves it open so the
    /// caller can fix the input and resume from the failing index.
    pub async fn run_from(
        &mut self,
        ctx: &mut ExecutionContext,
        service: &ServiceDefinition,
        start: usize,
        abort: &AbortHandle,
    ) -> std::result::Result<RunReport, RunError> {
        let steps = self.prepare(service);
        let total = steps.len();
        let mut report = RunReport::new(ctx.run_id);
        self.state = RunState::Running;
        info!(run_id = %ctx.run_id, start, commands = total, "run started");
        ctx.progress(0, "Start processing commands.");

        for PreparedStep { step, prepared } in steps.into_iter().skip(start) {
            let index = step.index;
            if abort.is_aborted() {
                warn!(run_id = %ctx.run_id, index, "run aborted");
                return Err(self.fail(ctx, RunError::new(index, step.label(), ServiceError::Aborted)).await);
            }

            let outcome = match prepared {
                Prepared::Disabled => {
                    report.skipped.push(index);
                    continue;
                }
                Prepared::Invalid(e) => Err(e),
                Prepared::Ready(command) => {
                    let percent = (index * 100 / total.max(1)).min(100) as u8;
                    ctx.progress(percent, &format!("Running {}.", step.label()));
                    info!(run_id = %ctx.run_id, index, command = %step.kind, "executing command");
                    command.execute(ctx).await
                }
            };

            let source = match outcome {
                Ok(()) => {
                    report.executed.push(index);
                    continue;
                }
                Err(source) => source,
            };

            ctx.monitor().error(&source.to_string());
            let err = RunError::new(index, step.label(), source);
            if !err.source.is_recoverable() {
                error!(run_id = %ctx.run_id, index, error = %err.source, "command failed");
                return Err(self.fail(ctx, err).await);
            }

            warn!(run_id = %ctx.run_id, index, error = %err.source, "command reported an error");
            if self.error_policy == ErrorPolicy::Stop {
                self.state = RunState::Failed { index };
                return Err(err);
            }
            report.errors.push(err);
        }

        ctx.progress(100, "Cleaning up after running all the commands.");
        if let Err(e) = ctx.close_presentation().await {
            return Err(self.fail(ctx, RunError::new(total, "close", e)).await);
        }

        self.state = RunState::Completed;
        report.state = self.state;
        info!(
            run_id = %ctx.run_id,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "run completed"
        );
        ctx.progress(100, "Processing is done successfully.");
        Ok(report)
    }

    /// Re-executes the last enabled `OpenFile` before `start` when `ctx`
    /// holds no presentation, so a run resumed in a fresh context still
    /// has a deck to work on. Edits made by the commands between that
    /// `OpenFile` and `start` are not replayed. Returns the replayed index.
    pub async fn reopen_before(
        &mut self,
        ctx: &mut ExecutionContext,
        service: &ServiceDefinition,
        start: usize,
    ) -> std::result::Result<Option<usize>, RunError> {
        if start == 0 || ctx.has_presentation() {
            return Ok(None);
        }
        let opener = self
            .prepare(service)
            .into_iter()
            .take(start)
            .filter(|p| {
                p.step.enabled
                    && self
                        .command_registry
                        .get(&p.step.kind)
                        .is_some_and(|def| def.name() == "OpenFile")
            })
            .last();
        let Some(PreparedStep { step, prepared }) = opener else {
            warn!(run_id = %ctx.run_id, start, "no OpenFile before the start index; resuming without a presentation");
            return Ok(None);
        };

        let index = step.index;
        let outcome = match prepared {
            Prepared::Ready(command) => {
                info!(run_id = %ctx.run_id, index, start, "reopening presentation before resuming");
                command.execute(ctx).await
            }
            Prepared::Invalid(e) => Err(e),
            Prepared::Disabled => return Ok(None),
        };
        match outcome {
            Ok(()) => Ok(Some(index)),
            Err(e) => Err(self.fail(ctx, RunError::new(index, step.label(), e)).await),
        }
    }

    async fn fail(&mut self, ctx: &mut ExecutionContext, err: RunError) -> RunError {
        self.state = RunState::Failed { index: err.index };
        if let Err(e) = ctx.close_presentation().await {
            error!(run_id = %ctx.run_id, error = %e, "failed to release presentation");
        }
        err
    }
}

//! # Concurrent DAG Executor
//!
//! Drives one pipeline run to completion:
//!
//! 1. Seed the run state with the provided inputs; every module starts
//!    Pending.
//! 2. Reduce inline transforms whose dependencies are available.
//! 3. Spawn every ready module (all input ports valued) as a task; branch
//!    modules and recognized higher-order modules are evaluated natively,
//!    everything else goes through the options executor and the module
//!    registry.
//! 4. On task completion, write outputs, record `Fired`, recompute the
//!    ready set, repeat.
//! 5. Terminate when the declared outputs resolve, when nothing can make
//!    progress (suspend or report Partial), on failure, cancellation, or
//!    run timeout.
//!
//! Module failures mark their nodes and cascade Skipped downstream;
//! unrelated subgraphs keep executing, and the run ends Failed with the
//! partial outputs it managed to produce.

use crate::cvalue::{CType, CValue};
use crate::ir::{DagSpec, LambdaSpec, ModuleNodeSpec, PipelineImage};
use crate::policy::options::{ModuleOperation, OptionsExecutor};
use crate::runtime::cancellation::{CancellableExecution, RunStatus};
use crate::runtime::error::ExecutionError;
use crate::runtime::eval;
use crate::runtime::lifecycle::ConstellationLifecycle;
use crate::runtime::module::{HigherOrderKind, ModuleRegistry};
use crate::runtime::signature::{
    DataSignature, NodeTiming, ResolutionSource, RunMetadata, SignatureStatus,
};
use crate::runtime::state::{ModuleStatus, RunState};
use crate::runtime::suspension::{SuspendedExecution, SuspensionStore};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Executor tuning
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Whole-run deadline; module-level timeouts are configured per call
    pub run_timeout: Option<Duration>,
    /// Collect node timings and provenance into the signature
    pub include_metadata: bool,
}

/// A run that has been started and can be cancelled or awaited
pub struct RunningExecution {
    pub cancellable: Arc<CancellableExecution>,
    pub handle: tokio::task::JoinHandle<DataSignature>,
}

/// The concurrent dataflow runtime
#[derive(Clone)]
pub struct DagExecutor {
    options: Arc<OptionsExecutor>,
    modules: Arc<ModuleRegistry>,
    lifecycle: Arc<ConstellationLifecycle>,
    suspension_store: Option<Arc<dyn SuspensionStore>>,
    config: ExecutorConfig,
}

impl DagExecutor {
    pub fn new(
        options: Arc<OptionsExecutor>,
        modules: Arc<ModuleRegistry>,
        lifecycle: Arc<ConstellationLifecycle>,
        suspension_store: Option<Arc<dyn SuspensionStore>>,
        config: ExecutorConfig,
    ) -> Self {
        DagExecutor {
            options,
            modules,
            lifecycle,
            suspension_store,
            config,
        }
    }

    /// Execute a pipeline image to completion
    pub async fn execute(
        &self,
        image: &PipelineImage,
        inputs: BTreeMap<String, CValue>,
    ) -> Result<DataSignature, ExecutionError> {
        let running = self.start(image, inputs)?;
        running
            .handle
            .await
            .map_err(|e| ExecutionError::Internal(format!("run task panicked: {e}")))
    }

    /// Start a pipeline run, returning a cancellation handle alongside the
    /// join handle
    pub fn start(
        &self,
        image: &PipelineImage,
        inputs: BTreeMap<String, CValue>,
    ) -> Result<RunningExecution, ExecutionError> {
        validate_inputs(&image.dag, &inputs)?;

        let execution_id = Uuid::new_v4();
        let ctx = RunContext::fresh(execution_id, image, inputs);
        let cancellable = CancellableExecution::new(execution_id);
        if !self.lifecycle.register_execution(Arc::clone(&cancellable)) {
            return Err(ExecutionError::NotAcceptingRuns {
                state: self.lifecycle.state().to_string(),
            });
        }

        let executor = self.clone();
        let run_cancellable = Arc::clone(&cancellable);
        let handle = tokio::spawn(async move {
            let signature = executor.run_loop(ctx, &run_cancellable).await;
            executor
                .lifecycle
                .deregister_execution(run_cancellable.execution_id);
            signature
        });

        Ok(RunningExecution {
            cancellable,
            handle,
        })
    }

    /// Rehydrate a suspended run, merge the new inputs, and re-enter the
    /// loop
    pub async fn resume_from_store(
        &self,
        handle: &str,
        additional_inputs: BTreeMap<String, CValue>,
        manually_resolved: BTreeMap<String, CValue>,
    ) -> Result<DataSignature, ExecutionError> {
        let store = self
            .suspension_store
            .as_ref()
            .ok_or(ExecutionError::NoSuspensionStore)?;
        let suspended =
            store
                .load(handle)
                .await?
                .ok_or_else(|| ExecutionError::SuspensionNotFound {
                    handle: handle.to_string(),
                })?;
        store.delete(handle).await?;

        let ctx = RunContext::resumed(suspended, additional_inputs, manually_resolved);
        let execution_id = ctx.execution_id;
        let cancellable = CancellableExecution::new(execution_id);
        if !self.lifecycle.register_execution(Arc::clone(&cancellable)) {
            return Err(ExecutionError::NotAcceptingRuns {
                state: self.lifecycle.state().to_string(),
            });
        }
        let signature = self.run_loop(ctx, &cancellable).await;
        self.lifecycle.deregister_execution(execution_id);
        Ok(signature)
    }

    #[instrument(skip_all, fields(execution = %ctx.execution_id, hash = %ctx.structural_hash))]
    async fn run_loop(
        &self,
        mut ctx: RunContext,
        cancellable: &Arc<CancellableExecution>,
    ) -> DataSignature {
        info!(
            resumption = ctx.resumption_count,
            inputs = ctx.all_inputs.len(),
            "run started"
        );
        let mut join_set: JoinSet<TaskCompletion> = JoinSet::new();
        let deadline = self
            .config
            .run_timeout
            .map(|d| tokio::time::Instant::now() + d);

        let status = loop {
            ctx.reduce_inline_transforms();
            ctx.cascade_failures();
            self.spawn_ready(&mut ctx, &mut join_set, cancellable);

            let idle = join_set.is_empty();
            if idle {
                if ctx.outputs_resolved() {
                    break if ctx.failed_data.is_empty() {
                        SignatureStatus::Completed
                    } else {
                        SignatureStatus::Failed
                    };
                }
                if !ctx.failed_data.is_empty() {
                    break SignatureStatus::Failed;
                }
                // Blocked on missing inputs: suspend when a store is
                // configured, otherwise report the partial result
                break if self.suspension_store.is_some() {
                    SignatureStatus::Suspended
                } else {
                    SignatureStatus::Partial
                };
            }

            tokio::select! {
                () = cancellable.cancelled() => {
                    join_set.abort_all();
                    ctx.skip_unfinished();
                    break match cancellable.status() {
                        RunStatus::TimedOut => SignatureStatus::TimedOut,
                        _ => SignatureStatus::Cancelled,
                    };
                }
                () = sleep_until_deadline(deadline), if deadline.is_some() => {
                    cancellable.time_out();
                    join_set.abort_all();
                    ctx.skip_unfinished();
                    break SignatureStatus::TimedOut;
                }
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok(completion)) => ctx.record_completion(completion),
                        Some(Err(join_error)) => {
                            warn!(error = %join_error, "module task aborted");
                        }
                        None => {}
                    }
                }
            }
        };

        let final_status = match status {
            SignatureStatus::Completed => RunStatus::Completed,
            SignatureStatus::Failed => RunStatus::Failed("module failures".to_string()),
            SignatureStatus::TimedOut => RunStatus::TimedOut,
            SignatureStatus::Cancelled => RunStatus::Cancelled,
            _ => RunStatus::Completed,
        };
        cancellable.complete(final_status);

        let suspension_handle = if status == SignatureStatus::Suspended {
            match self.save_suspension(&ctx).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "failed to persist suspension");
                    None
                }
            }
        } else {
            None
        };

        info!(status = ?status, "run finished");
        ctx.into_signature(status, suspension_handle, self.config.include_metadata)
    }

    async fn save_suspension(&self, ctx: &RunContext) -> Result<String, ExecutionError> {
        let store = self
            .suspension_store
            .as_ref()
            .ok_or(ExecutionError::NoSuspensionStore)?;
        let snapshot = SuspendedExecution {
            execution_id: ctx.execution_id,
            structural_hash: ctx.structural_hash.clone(),
            resumption_count: ctx.resumption_count,
            dag: ctx.dag.clone(),
            provided_inputs: ctx.all_inputs.clone(),
            computed_values: ctx.state.data.clone(),
            module_statuses: ctx.state.module_status.clone(),
            suspended_at: Utc::now(),
        };
        store.save(snapshot).await
    }

    /// Spawn every Pending module whose input ports are all valued
    fn spawn_ready(
        &self,
        ctx: &mut RunContext,
        join_set: &mut JoinSet<TaskCompletion>,
        cancellable: &Arc<CancellableExecution>,
    ) {
        let ready: Vec<Uuid> = ctx
            .dag
            .module_nodes
            .values()
            .filter(|module| {
                matches!(
                    ctx.state.module_status.get(&module.id),
                    Some(ModuleStatus::Pending)
                ) && ctx
                    .dag
                    .module_inputs(module.id)
                    .values()
                    .all(|data| ctx.state.data.contains_key(data))
            })
            .map(|module| module.id)
            .collect();

        for module_id in ready {
            let module = ctx.dag.module_nodes[&module_id].clone();
            let mut inputs: BTreeMap<String, CValue> = BTreeMap::new();
            let mut missing: Option<Uuid> = None;
            for (port, data) in ctx.dag.module_inputs(module_id) {
                match ctx.state.data.get(&data) {
                    Some(value) => {
                        inputs.insert(port, value.clone());
                    }
                    None => {
                        missing = Some(data);
                        break;
                    }
                }
            }
            if let Some(data) = missing {
                let error = ExecutionError::NodeNotFound {
                    id: data,
                    context: format!("input of module '{}'", module.name),
                };
                ctx.state.module_status.insert(
                    module_id,
                    ModuleStatus::Failed {
                        error: error.to_string(),
                    },
                );
                for (_, out) in ctx.dag.module_outputs(module_id) {
                    ctx.failed_data.insert(out);
                }
                continue;
            }

            let started_at = Utc::now();
            ctx.state.module_status.insert(
                module_id,
                ModuleStatus::Running {
                    started_at_ms: started_at.timestamp_millis(),
                },
            );
            debug!(module = %module.name, node = %module_id, "module ready, spawning");

            let options_executor = Arc::clone(&self.options);
            let registry = Arc::clone(&self.modules);
            let cancellable = Arc::clone(cancellable);
            join_set.spawn(async move {
                let start = std::time::Instant::now();
                let result = tokio::select! {
                    result = run_module(&options_executor, &registry, &module, inputs) => result,
                    () = cancellable.cancelled() => Err(ExecutionError::Cancelled),
                };
                TaskCompletion {
                    module_id,
                    started_at,
                    completed_at: Utc::now(),
                    latency_ms: start.elapsed().as_millis() as u64,
                    result,
                }
            });
        }
    }
}

fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) -> tokio::time::Sleep {
    tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now))
}

struct TaskCompletion {
    module_id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    latency_ms: u64,
    result: Result<BTreeMap<String, CValue>, ExecutionError>,
}

/// Execute one module node: branch and higher-order nodes natively, the
/// rest through the options executor against the registry
async fn run_module(
    options_executor: &OptionsExecutor,
    registry: &ModuleRegistry,
    module: &ModuleNodeSpec,
    inputs: BTreeMap<String, CValue>,
) -> Result<BTreeMap<String, CValue>, ExecutionError> {
    if module.is_branch() {
        return run_branch(&inputs);
    }
    if !module.lambdas.is_empty() {
        return run_higher_order(registry, module, &inputs);
    }

    let implementation =
        registry
            .get(&module.name)
            .ok_or_else(|| ExecutionError::ModuleNotRegistered {
                module_name: module.name.clone(),
            })?;

    // Multi-port outputs travel through the policy stack as one product
    let single_port = module.produces.len() == 1;
    let output_type = if single_port {
        module
            .produces
            .values()
            .next()
            .cloned()
            .unwrap_or(CType::Nothing)
    } else {
        CType::Product(module.produces.clone())
    };

    let op_inputs = inputs.clone();
    let op_module = Arc::clone(&implementation);
    let operation: ModuleOperation = Arc::new(move || {
        let module = Arc::clone(&op_module);
        let inputs = op_inputs.clone();
        Box::pin(async move {
            match module.run(inputs).await? {
                crate::runtime::module::ModuleOutput::Single(value) => Ok(value),
                crate::runtime::module::ModuleOutput::Ports(ports) => Ok(CValue::CProduct {
                    schema: ports.iter().map(|(k, v)| (k.clone(), v.ctype())).collect(),
                    fields: ports,
                }),
            }
        })
    });

    let value = options_executor
        .execute_with_options(
            operation,
            module.id,
            &module.name,
            &inputs,
            &module.options,
            &output_type,
            None,
        )
        .await?;

    if single_port {
        let port = module
            .produces
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "out".to_string());
        Ok([(port, value)].into_iter().collect())
    } else {
        match value {
            CValue::CProduct { fields, .. } => Ok(fields),
            other => Err(ExecutionError::Internal(format!(
                "multi-port module produced a non-product value {}",
                other.ctype()
            ))),
        }
    }
}

/// Synthetic conditional: pick `then` or `otherwise` by the boolean
fn run_branch(
    inputs: &BTreeMap<String, CValue>,
) -> Result<BTreeMap<String, CValue>, ExecutionError> {
    let cond = inputs
        .get("cond")
        .and_then(CValue::as_bool)
        .ok_or_else(|| ExecutionError::Eval {
            message: "branch condition is not a boolean".to_string(),
        })?;
    let chosen = if cond { "then" } else { "otherwise" };
    let value = inputs
        .get(chosen)
        .cloned()
        .ok_or_else(|| ExecutionError::Eval {
            message: format!("branch port '{chosen}' has no value"),
        })?;
    Ok([("out".to_string(), value)].into_iter().collect())
}

/// Native higher-order application over the list argument
fn run_higher_order(
    registry: &ModuleRegistry,
    module: &ModuleNodeSpec,
    inputs: &BTreeMap<String, CValue>,
) -> Result<BTreeMap<String, CValue>, ExecutionError> {
    let kind = registry.higher_order_kind(&module.name).ok_or_else(|| {
        ExecutionError::ModuleNotRegistered {
            module_name: module.name.clone(),
        }
    })?;
    let lambda: &LambdaSpec =
        module
            .lambdas
            .values()
            .next()
            .ok_or_else(|| ExecutionError::Internal(
                "higher-order module without a lambda".to_string(),
            ))?;
    let (elements, elem_type) = match inputs.values().find_map(|v| match v {
        CValue::CList {
            elements,
            elem_type,
        } => Some((elements, elem_type)),
        _ => None,
    }) {
        Some(found) => found,
        None => {
            return Err(ExecutionError::Eval {
                message: "higher-order module requires a list input".to_string(),
            })
        }
    };

    let apply = |element: &CValue| -> Result<CValue, ExecutionError> {
        let mut params: HashMap<String, CValue> = HashMap::new();
        if let Some(name) = lambda.params.first() {
            params.insert(name.clone(), element.clone());
        }
        eval::eval(&lambda.body, &params)
    };

    let value = match kind {
        HigherOrderKind::Map => {
            let mut mapped = Vec::with_capacity(elements.len());
            for element in elements {
                mapped.push(apply(element)?);
            }
            let elem_type = mapped.first().map_or_else(|| elem_type.clone(), CValue::ctype);
            CValue::CList {
                elements: mapped,
                elem_type,
            }
        }
        HigherOrderKind::Filter => {
            let mut kept = Vec::new();
            for element in elements {
                match apply(element)? {
                    CValue::CBoolean(true) => kept.push(element.clone()),
                    CValue::CBoolean(false) => {}
                    other => {
                        return Err(ExecutionError::Eval {
                            message: format!(
                                "filter lambda produced {}, expected a boolean",
                                other.ctype()
                            ),
                        })
                    }
                }
            }
            CValue::CList {
                elements: kept,
                elem_type: elem_type.clone(),
            }
        }
    };
    Ok([("out".to_string(), value)].into_iter().collect())
}

/// Mutable state of one run
struct RunContext {
    execution_id: Uuid,
    structural_hash: String,
    resumption_count: u32,
    dag: DagSpec,
    state: RunState,
    /// Data nodes whose producers failed
    failed_data: BTreeSet<Uuid>,
    failure_messages: BTreeMap<Uuid, String>,
    provenance: BTreeMap<String, ResolutionSource>,
    timings: BTreeMap<Uuid, NodeTiming>,
    all_inputs: BTreeMap<String, CValue>,
    started_at: DateTime<Utc>,
    reduced_transforms: HashSet<Uuid>,
}

impl RunContext {
    fn fresh(
        execution_id: Uuid,
        image: &PipelineImage,
        inputs: BTreeMap<String, CValue>,
    ) -> Self {
        let mut state = RunState::new();
        for id in image.dag.module_nodes.keys() {
            state.module_status.insert(*id, ModuleStatus::Pending);
        }
        let mut provenance = BTreeMap::new();
        for (name, node) in &image.dag.input_nodes {
            if let Some(value) = inputs.get(name) {
                state.data.insert(*node, value.clone());
                provenance.insert(name.clone(), ResolutionSource::ProvidedInput);
            }
        }
        RunContext {
            execution_id,
            structural_hash: image.structural_hash.clone(),
            resumption_count: 0,
            dag: image.dag.clone(),
            state,
            failed_data: BTreeSet::new(),
            failure_messages: BTreeMap::new(),
            provenance,
            timings: BTreeMap::new(),
            all_inputs: inputs,
            started_at: Utc::now(),
            reduced_transforms: HashSet::new(),
        }
    }

    fn resumed(
        suspended: SuspendedExecution,
        additional_inputs: BTreeMap<String, CValue>,
        manually_resolved: BTreeMap<String, CValue>,
    ) -> Self {
        let mut state = RunState {
            data: suspended.computed_values,
            module_status: suspended.module_statuses,
        };
        // Tasks never survive suspension
        for status in state.module_status.values_mut() {
            if matches!(status, ModuleStatus::Running { .. }) {
                *status = ModuleStatus::Pending;
            }
        }

        let mut provenance: BTreeMap<String, ResolutionSource> = BTreeMap::new();
        let mut all_inputs = suspended.provided_inputs;
        for (name, node) in &suspended.dag.input_nodes {
            if state.data.contains_key(node) {
                provenance.insert(name.clone(), ResolutionSource::ProvidedInput);
            }
        }
        for (name, value) in additional_inputs {
            if let Some(node) = suspended.dag.input_nodes.get(&name) {
                state.data.insert(*node, value.clone());
                provenance.insert(name.clone(), ResolutionSource::ResumedInput);
            }
            all_inputs.insert(name, value);
        }
        // Manually resolved nodes are addressed by data-node name and may
        // short-circuit a module that could not run
        let by_name: BTreeMap<String, Uuid> = suspended
            .dag
            .data_nodes
            .values()
            .map(|n| (n.name.clone(), n.id))
            .collect();
        for (name, value) in manually_resolved {
            if let Some(node) = by_name.get(&name) {
                state.data.insert(*node, value);
                provenance.insert(name, ResolutionSource::ManuallyResolved);
            }
        }

        RunContext {
            execution_id: suspended.execution_id,
            structural_hash: suspended.structural_hash,
            resumption_count: suspended.resumption_count + 1,
            dag: suspended.dag,
            state,
            failed_data: BTreeSet::new(),
            failure_messages: BTreeMap::new(),
            provenance,
            timings: BTreeMap::new(),
            all_inputs,
            started_at: Utc::now(),
            reduced_transforms: HashSet::new(),
        }
    }

    /// Reduce inline transforms to fixpoint
    fn reduce_inline_transforms(&mut self) {
        loop {
            let mut progressed = false;
            let pending: Vec<Uuid> = self
                .dag
                .inline_transforms
                .keys()
                .filter(|id| {
                    !self.reduced_transforms.contains(id)
                        && !self.state.data.contains_key(id)
                        && !self.failed_data.contains(id)
                })
                .copied()
                .collect();
            for target in pending {
                let transform = &self.dag.inline_transforms[&target];
                if transform
                    .deps
                    .values()
                    .any(|dep| self.failed_data.contains(dep))
                {
                    self.failed_data.insert(target);
                    continue;
                }
                if !transform
                    .deps
                    .values()
                    .all(|dep| self.state.data.contains_key(dep))
                {
                    continue;
                }
                let params: HashMap<String, CValue> = transform
                    .deps
                    .iter()
                    .map(|(name, dep)| (name.clone(), self.state.data[dep].clone()))
                    .collect();
                match eval::eval(&transform.expr, &params) {
                    Ok(value) => {
                        self.state.data.insert(target, value);
                        if let Some(node) = self.dag.data_nodes.get(&target) {
                            self.provenance
                                .entry(node.name.clone())
                                .or_insert(ResolutionSource::Computed);
                        }
                        self.reduced_transforms.insert(target);
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(node = %target, error = %e, "inline transform failed");
                        self.failure_messages.insert(target, e.to_string());
                        self.failed_data.insert(target);
                        progressed = true;
                    }
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// Modules with a failed input never run; their outputs fail too
    fn cascade_failures(&mut self) {
        loop {
            let mut progressed = false;
            let pending: Vec<Uuid> = self
                .dag
                .module_nodes
                .keys()
                .filter(|id| {
                    matches!(
                        self.state.module_status.get(id),
                        Some(ModuleStatus::Pending)
                    )
                })
                .copied()
                .collect();
            for module_id in pending {
                let has_failed_input = self
                    .dag
                    .module_inputs(module_id)
                    .values()
                    .any(|dep| self.failed_data.contains(dep));
                if has_failed_input {
                    self.state
                        .module_status
                        .insert(module_id, ModuleStatus::Skipped);
                    for (_, data) in self.dag.module_outputs(module_id) {
                        self.failed_data.insert(data);
                    }
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
    }

    fn record_completion(&mut self, completion: TaskCompletion) {
        let module_id = completion.module_id;
        match completion.result {
            Ok(outputs) => {
                let ports: Vec<String> = outputs.keys().cloned().collect();
                let bindings = self.dag.module_outputs(module_id);
                for (port, value) in outputs {
                    if let Some(data) = bindings.get(&port) {
                        self.state.data.insert(*data, value);
                        if let Some(node) = self.dag.data_nodes.get(data) {
                            self.provenance
                                .entry(node.name.clone())
                                .or_insert(ResolutionSource::Computed);
                        }
                    }
                }
                self.state.module_status.insert(
                    module_id,
                    ModuleStatus::Fired {
                        latency_ms: completion.latency_ms,
                        outputs: ports,
                    },
                );
                self.timings.insert(
                    module_id,
                    NodeTiming {
                        started_at: completion.started_at,
                        completed_at: completion.completed_at,
                        latency_ms: completion.latency_ms,
                    },
                );
            }
            Err(e) => {
                warn!(node = %module_id, error = %e, "module failed");
                self.state.module_status.insert(
                    module_id,
                    ModuleStatus::Failed {
                        error: e.to_string(),
                    },
                );
                for (_, data) in self.dag.module_outputs(module_id) {
                    self.failure_messages.insert(data, e.to_string());
                    self.failed_data.insert(data);
                }
            }
        }
    }

    /// Mark still-running or pending modules as skipped after an abort
    fn skip_unfinished(&mut self) {
        for status in self.state.module_status.values_mut() {
            if !status.is_terminal() {
                *status = ModuleStatus::Skipped;
            }
        }
    }

    fn outputs_resolved(&self) -> bool {
        self.dag
            .output_bindings
            .values()
            .all(|node| self.state.data.contains_key(node))
    }

    fn into_signature(
        self,
        status: SignatureStatus,
        suspension_handle: Option<String>,
        include_metadata: bool,
    ) -> DataSignature {
        let outputs: BTreeMap<String, CValue> = self
            .dag
            .output_bindings
            .iter()
            .filter_map(|(name, node)| {
                self.state
                    .data
                    .get(node)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        let pending_outputs: BTreeSet<String> = self
            .dag
            .declared_outputs
            .iter()
            .filter(|name| !outputs.contains_key(*name))
            .cloned()
            .collect();
        let missing_inputs: BTreeSet<String> = self
            .dag
            .input_nodes
            .iter()
            .filter(|(_, node)| !self.state.data.contains_key(node))
            .map(|(name, _)| name.clone())
            .collect();
        let failed_nodes: BTreeSet<String> = self
            .failed_data
            .iter()
            .filter_map(|id| self.dag.data_nodes.get(id).map(|n| n.name.clone()))
            .collect();

        let metadata = include_metadata.then(|| {
            let blocked_nodes: BTreeSet<String> = self
                .dag
                .data_nodes
                .values()
                .filter(|node| {
                    !self.state.data.contains_key(&node.id)
                        && !self.failed_data.contains(&node.id)
                })
                .map(|node| node.name.clone())
                .collect();
            RunMetadata {
                node_timings: self.timings,
                provenance: self.provenance,
                blocked_nodes,
                module_statuses: self.state.module_status.iter().map(|(k, v)| (*k, v.clone())).collect(),
            }
        });

        DataSignature {
            execution_id: self.execution_id,
            structural_hash: self.structural_hash,
            status,
            resumption_count: self.resumption_count,
            outputs,
            computed_nodes: self.state.data.into_iter().collect(),
            missing_inputs,
            pending_outputs,
            failed_nodes,
            all_inputs: self.all_inputs,
            started_at: self.started_at,
            completed_at: Utc::now(),
            suspension_handle,
            metadata,
        }
    }
}

/// Provided inputs must name declared inputs and carry compatible runtime
/// types
fn validate_inputs(
    dag: &DagSpec,
    inputs: &BTreeMap<String, CValue>,
) -> Result<(), ExecutionError> {
    for (name, value) in inputs {
        let node = dag
            .input_nodes
            .get(name)
            .and_then(|id| dag.data_nodes.get(id))
            .ok_or_else(|| ExecutionError::InvalidInput {
                message: format!("'{name}' is not a declared input"),
            })?;
        if !ctype_compatible(&value.ctype(), &node.ty) {
            return Err(ExecutionError::InvalidInput {
                message: format!(
                    "input '{name}' has type {}, expected {}",
                    value.ctype(),
                    node.ty
                ),
            });
        }
    }
    Ok(())
}

/// Structural compatibility of runtime types; `Nothing` fits anywhere
fn ctype_compatible(actual: &CType, declared: &CType) -> bool {
    match (actual, declared) {
        (CType::Nothing, _) => true,
        (CType::List(a), CType::List(b)) | (CType::Optional(a), CType::Optional(b)) => {
            ctype_compatible(a, b)
        }
        (CType::Map(ak, av), CType::Map(bk, bv)) => ak == bk && ctype_compatible(av, bv),
        (CType::Product(af), CType::Product(bf)) => bf.iter().all(|(name, ty)| {
            af.get(name)
                .is_some_and(|actual_ty| ctype_compatible(actual_ty, ty))
        }),
        _ => actual == declared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctype_compatibility_rules() {
        assert!(ctype_compatible(&CType::Nothing, &CType::Int));
        assert!(ctype_compatible(
            &CType::list(CType::Nothing),
            &CType::list(CType::Int)
        ));
        assert!(!ctype_compatible(&CType::Int, &CType::Float));
        // Width subtyping on products
        assert!(ctype_compatible(
            &CType::product([("a", CType::Int), ("b", CType::String)]),
            &CType::product([("a", CType::Int)])
        ));
        assert!(!ctype_compatible(
            &CType::product([("a", CType::Int)]),
            &CType::product([("a", CType::Int), ("b", CType::String)])
        ));
    }

    #[test]
    fn branch_picks_by_condition() {
        let inputs: BTreeMap<String, CValue> = [
            ("cond".to_string(), CValue::CBoolean(true)),
            ("then".to_string(), CValue::CInt(10)),
            ("otherwise".to_string(), CValue::CInt(20)),
        ]
        .into_iter()
        .collect();
        let outputs = run_branch(&inputs).expect("branch");
        assert_eq!(outputs["out"], CValue::CInt(10));

        let mut inputs = inputs;
        inputs.insert("cond".to_string(), CValue::CBoolean(false));
        let outputs = run_branch(&inputs).expect("branch");
        assert_eq!(outputs["out"], CValue::CInt(20));
    }
}

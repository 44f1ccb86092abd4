//! # Engine Facade
//!
//! The top-level entry point bundling compiler, store, and runtime:
//! compile programs to content-addressed images, run them by alias or
//! hash, resume suspended executions, and shut the whole thing down
//! gracefully.

use crate::ast::{Program, Span};
use crate::checker::{CompileError, TypeChecker, TypedDeclaration};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::cvalue::{decode_json, CValue, JsonBridgeError};
use crate::ir::{IrBuilder, PipelineImage};
use crate::runtime::executor::{DagExecutor, ExecutorConfig, RunningExecution};
use crate::runtime::{DataSignature, ExecutionError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Compiler + store + runtime behind one handle
pub struct Engine {
    config: EngineConfig,
    context: EngineContext,
    executor: DagExecutor,
}

impl Engine {
    pub fn new(config: EngineConfig, context: EngineContext) -> Self {
        let executor = DagExecutor::new(
            Arc::clone(&context.options_executor),
            Arc::clone(&context.modules),
            Arc::clone(&context.lifecycle),
            context.suspension_store.clone(),
            ExecutorConfig {
                run_timeout: config.executor.run_timeout_ms.map(Duration::from_millis),
                include_metadata: config.executor.include_metadata,
            },
        );
        Engine {
            config,
            context,
            executor,
        }
    }

    /// Engine with a default in-memory context
    pub fn with_defaults(config: EngineConfig) -> Self {
        let context = EngineContext::with_defaults(&config);
        Engine::new(config, context)
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check, lower, hash, and store a program
    #[instrument(skip_all)]
    pub fn compile(&self, program: &Program) -> Result<Arc<PipelineImage>, Vec<CompileError>> {
        let checker = TypeChecker::new(&self.context.functions);
        let typed = checker.check_program(program)?;

        let builder = IrBuilder::new(&self.context.functions);
        let dag = builder.build(&typed).map_err(|e| vec![e])?;

        let spans: Vec<Span> = typed
            .declarations
            .iter()
            .map(|declaration| match declaration {
                TypedDeclaration::Input { span, .. }
                | TypedDeclaration::Assignment { span, .. } => *span,
            })
            .collect();
        let image = self.context.pipelines.store(PipelineImage::new(dag, &spans));
        info!(hash = %image.structural_hash, "pipeline compiled");
        Ok(image)
    }

    /// Compile and alias in one step
    pub fn compile_named(
        &self,
        name: &str,
        program: &Program,
    ) -> Result<Arc<PipelineImage>, Vec<CompileError>> {
        let image = self.compile(program)?;
        self.context
            .pipelines
            .alias(name, image.structural_hash.clone());
        Ok(image)
    }

    /// Execute by alias or `sha256:<hash>` reference
    pub async fn run(
        &self,
        reference: &str,
        inputs: BTreeMap<String, CValue>,
    ) -> Result<DataSignature, ExecutionError> {
        let image = self
            .context
            .pipelines
            .get_by_reference(reference)
            .ok_or_else(|| ExecutionError::PipelineNotFound {
                reference: reference.to_string(),
            })?;
        self.executor.execute(&image, inputs).await
    }

    /// Execute an image directly
    pub async fn run_image(
        &self,
        image: &PipelineImage,
        inputs: BTreeMap<String, CValue>,
    ) -> Result<DataSignature, ExecutionError> {
        self.executor.execute(image, inputs).await
    }

    /// Start a run and keep the cancellation handle
    pub fn start(
        &self,
        reference: &str,
        inputs: BTreeMap<String, CValue>,
    ) -> Result<RunningExecution, ExecutionError> {
        let image = self
            .context
            .pipelines
            .get_by_reference(reference)
            .ok_or_else(|| ExecutionError::PipelineNotFound {
                reference: reference.to_string(),
            })?;
        self.executor.start(&image, inputs)
    }

    /// Resume a suspended run with additional inputs and manually resolved
    /// nodes
    pub async fn resume(
        &self,
        handle: &str,
        additional_inputs: BTreeMap<String, CValue>,
        manually_resolved: BTreeMap<String, CValue>,
    ) -> Result<DataSignature, ExecutionError> {
        self.executor
            .resume_from_store(handle, additional_inputs, manually_resolved)
            .await
    }

    /// Decode an external JSON payload against a declared input's type,
    /// enforcing the configured limits
    pub fn decode_json_input(
        &self,
        image: &PipelineImage,
        input_name: &str,
        payload: &[u8],
    ) -> Result<CValue, JsonBridgeError> {
        let ty = image
            .dag
            .input_nodes
            .get(input_name)
            .and_then(|id| image.dag.data_nodes.get(id))
            .map(|node| node.ty.clone())
            .ok_or_else(|| {
                JsonBridgeError::Decode(format!("'{input_name}' is not a declared input"))
            })?;
        decode_json(payload, &ty, &self.config.json)
    }

    /// Graceful shutdown: drain in-flight runs, then stop the scheduler
    pub async fn shutdown(&self) {
        let drain = Duration::from_millis(self.config.executor.drain_timeout_ms);
        self.context.lifecycle.shutdown(drain).await;
        self.context.scheduler.shutdown();
    }
}

//! Graph-runtime seam.
//!
//! The actual inference engine is an external collaborator; the
//! detector only needs session creation, IO introspection and a run
//! call. Tests drive a scripted session.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Graph optimization level requested from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraphOptLevel {
    Disabled,
    Basic,
    Extended,
    #[default]
    All,
}

/// Node scheduling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Parallel,
}

/// Options handed to the runtime when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Intra-op thread count.
    pub intra_op_threads: usize,
    /// Inter-op thread count; one is optimal on the target ARM cores.
    pub inter_op_threads: usize,
    /// Graph optimization level.
    pub optimization: GraphOptLevel,
    /// Node scheduling mode.
    pub execution: ExecutionMode,
    /// Enable the CPU memory arena.
    pub enable_cpu_arena: bool,
    /// Enable memory-pattern planning.
    pub enable_mem_pattern: bool,
    /// Enable buffer reuse.
    pub enable_mem_reuse: bool,
    /// Cores the session threads are pinned to; empty disables pinning.
    pub pinned_cores: Vec<usize>,
    /// Ask for an accelerator provider (NEON/XNNPACK class) when the
    /// runtime has one.
    pub prefer_accelerator: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            intra_op_threads: cores.saturating_sub(1).max(1),
            inter_op_threads: 1,
            optimization: GraphOptLevel::All,
            execution: ExecutionMode::Parallel,
            enable_cpu_arena: true,
            enable_mem_pattern: true,
            enable_mem_reuse: true,
            // Core 0 serves interrupts and the capture loops; inference
            // threads stay off it.
            pinned_cores: (1..cores).collect(),
            prefer_accelerator: true,
        }
    }
}

/// Name and shape of one model input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpec {
    pub name: String,
    /// Dimensions; -1 marks a dynamic axis.
    pub shape: Vec<i64>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("model file not found: {0}")]
    ModelMissing(std::path::PathBuf),
    #[error("runtime library error: {0}")]
    Library(String),
    #[error("session failure: {0}")]
    Session(String),
    #[error("inference failure: {0}")]
    Inference(String),
}

/// A created inference session.
pub trait InferenceSession: Send {
    /// Cached input tensor specs.
    fn inputs(&self) -> &[IoSpec];
    /// Cached output tensor specs.
    fn outputs(&self) -> &[IoSpec];
    /// Run one inference: CHW float input in, flat float output written
    /// into `output` (resized by the session).
    fn run(
        &mut self,
        input: &[f32],
        input_shape: &[i64],
        output: &mut Vec<f32>,
    ) -> Result<(), RuntimeError>;
}

/// Session factory provided by the host.
pub trait GraphRuntime {
    fn create_session(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Box<dyn InferenceSession>, RuntimeError>;
}

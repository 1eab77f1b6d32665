//! Neural ball detector: a YOLO-style single-class model driven
//! through the host's graph runtime.
//!
//! The detector owns one session, one tensor pool and the pre/post
//! processing stages. Initialization failures are typed so the
//! orchestrator can treat them as unrecoverable while inference
//! failures stay recoverable.

pub mod letterbox;
pub mod pool;
pub mod postprocess;
pub mod preprocess;
pub mod runtime;
pub mod workers;

pub use letterbox::{letterbox_image, Letterbox, LETTERBOX_FILL};
pub use pool::{PoolBusy, PoolClaim, TensorPool};
pub use postprocess::{BBox, Detection};
pub use runtime::{
    ExecutionMode, GraphOptLevel, GraphRuntime, InferenceSession, IoSpec, RuntimeError,
    SessionOptions,
};
pub use workers::{PreprocessPool, PREPROCESS_WORKERS};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralConfig {
    /// Path to the model file.
    pub model_path: PathBuf,
    /// Model input width.
    pub input_width: u32,
    /// Model input height.
    pub input_height: u32,
    /// Minimum confidence kept by postprocessing.
    pub confidence_threshold: f32,
    /// IoU above which same-class boxes are suppressed.
    pub nms_threshold: f32,
    /// Whether the model has one output class (ball) or 80 (COCO).
    pub single_class: bool,
    /// Class count when `single_class` is false.
    pub num_classes: usize,
    /// Use the per-instance tensor pool.
    pub use_memory_pool: bool,
    /// Use the SIMD preprocessing path where available.
    pub use_simd: bool,
    /// Pin session threads off core 0.
    pub pin_threads: bool,
    /// Intra-op thread override; `None` uses cores − 1.
    pub intra_op_threads: Option<usize>,
    /// Warm-up inference count at initialization.
    pub warmup_runs: usize,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ball_640.onnx"),
            input_width: 640,
            input_height: 640,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            single_class: true,
            num_classes: 1,
            use_memory_pool: true,
            use_simd: true,
            pin_threads: true,
            intra_op_threads: None,
            warmup_runs: 5,
        }
    }
}

impl NeuralConfig {
    fn session_options(&self) -> SessionOptions {
        let mut opts = SessionOptions::default();
        if let Some(n) = self.intra_op_threads {
            opts.intra_op_threads = n.max(1);
        }
        if !self.pin_threads {
            opts.pinned_cores.clear();
        }
        opts
    }
}

/// Class layout the loaded model actually has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClassMode {
    SingleClass,
    Coco80,
    /// Neither 5 nor 84 channels; config decides.
    Unknown,
}

/// Per-call performance metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerfMetrics {
    pub preprocess_ms: f32,
    pub inference_ms: f32,
    pub postprocess_ms: f32,
    pub total_ms: f32,
    pub bytes_in_pool: usize,
}

/// Detections plus the metrics of the call that produced them.
#[derive(Debug, Clone)]
pub struct DetectOutput {
    pub detections: Vec<Detection>,
    pub metrics: PerfMetrics,
}

#[derive(Debug, Error)]
pub enum NeuralError {
    #[error("model file not found: {0}")]
    ModelMissing(PathBuf),
    #[error("graph runtime rejected the session: {0}")]
    SessionCreate(#[source] RuntimeError),
    #[error("inference failed: {0}")]
    Inference(#[source] RuntimeError),
    #[error("input image is empty")]
    EmptyImage,
}

thread_local! {
    static FALLBACK_INPUT: RefCell<Vec<f32>> = const { RefCell::new(Vec::new()) };
    static FALLBACK_OUTPUT: RefCell<Vec<f32>> = const { RefCell::new(Vec::new()) };
}

fn take_fallback(cell: &'static std::thread::LocalKey<RefCell<Vec<f32>>>, len: usize) -> Vec<f32> {
    cell.with(|b| {
        let mut stored = std::mem::take(&mut *b.borrow_mut());
        stored.resize(len, 0.0);
        stored
    })
}

fn restore_fallback(cell: &'static std::thread::LocalKey<RefCell<Vec<f32>>>, buf: Vec<f32>) {
    cell.with(|b| *b.borrow_mut() = buf);
}

enum TensorBuf<'a> {
    Pooled(PoolClaim<'a>),
    Fallback(Vec<f32>),
}

impl TensorBuf<'_> {
    fn vec_mut(&mut self) -> &mut Vec<f32> {
        match self {
            TensorBuf::Pooled(claim) => claim,
            TensorBuf::Fallback(v) => v,
        }
    }

    fn restore(self, cell: &'static std::thread::LocalKey<RefCell<Vec<f32>>>) {
        if let TensorBuf::Fallback(v) = self {
            restore_fallback(cell, v);
        }
    }
}

/// The neural detector instance. Thread-confined: callers needing to
/// share one must serialise externally; the tensor pool additionally
/// rejects concurrent buffer claims.
pub struct NeuralDetector {
    config: NeuralConfig,
    session: Box<dyn InferenceSession>,
    class_mode: ModelClassMode,
    pool: Option<TensorPool>,
    total_inferences: AtomicU64,
    /// Running mean of inference_ms, stored as f32 bits.
    avg_inference_bits: AtomicU32,
}

impl NeuralDetector {
    /// Verify the model, create the runtime session, introspect the
    /// model layout and warm the session up.
    pub fn initialize(
        config: NeuralConfig,
        runtime: &dyn GraphRuntime,
    ) -> Result<Self, NeuralError> {
        if !config.model_path.exists() {
            return Err(NeuralError::ModelMissing(config.model_path.clone()));
        }
        let options = config.session_options();
        let session = runtime
            .create_session(&config.model_path, &options)
            .map_err(NeuralError::SessionCreate)?;

        let class_mode = classify_model(session.outputs());
        match class_mode {
            ModelClassMode::SingleClass if !config.single_class => {
                warn!("config declares multi-class but the model appears single-class; using single-class logic");
            }
            ModelClassMode::Coco80 if config.single_class => {
                warn!("config declares single-class but the model appears to be 80-class COCO; results may be wrong");
            }
            ModelClassMode::Unknown => {
                error!("unknown model output layout; following the configured class mode");
            }
            _ => {}
        }

        let pool = config.use_memory_pool.then(|| {
            let pool = TensorPool::default();
            let input_len = (3 * config.input_width * config.input_height) as usize;
            let preds = postprocess::prediction_count(config.input_width, config.input_height);
            pool.reserve(input_len, 84 * preds);
            pool
        });

        let mut detector = Self {
            config,
            session,
            class_mode,
            pool,
            total_inferences: AtomicU64::new(0),
            avg_inference_bits: AtomicU32::new(0),
        };
        let warmup = detector.config.warmup_runs;
        detector.warm_up(warmup);
        info!(mode = ?detector.class_mode, "neural detector initialized");
        Ok(detector)
    }

    pub fn config(&self) -> &NeuralConfig {
        &self.config
    }

    pub fn class_mode(&self) -> ModelClassMode {
        self.class_mode
    }

    /// Effective class behaviour after reconciling introspection and
    /// config.
    fn effective_single_class(&self) -> bool {
        match self.class_mode {
            ModelClassMode::SingleClass => true,
            ModelClassMode::Coco80 => false,
            ModelClassMode::Unknown => self.config.single_class,
        }
    }

    fn effective_num_classes(&self) -> usize {
        match self.class_mode {
            ModelClassMode::SingleClass => 1,
            ModelClassMode::Coco80 => 80,
            ModelClassMode::Unknown => self.config.num_classes.max(1),
        }
    }

    /// Run detection on one image.
    pub fn detect(&mut self, image: &RgbImage) -> Result<DetectOutput, NeuralError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(NeuralError::EmptyImage);
        }
        let (w, h) = (self.config.input_width, self.config.input_height);
        let input_len = (3 * w * h) as usize;
        let preds = postprocess::prediction_count(w, h);
        let single_class = self.effective_single_class();
        let num_classes = self.effective_num_classes();
        let output_len = preds * (4 + if single_class { 1 } else { num_classes });

        let total_start = Instant::now();

        // Preprocess into the pooled input buffer, or the thread-local
        // fallback when the pool is busy.
        let pre_start = Instant::now();
        let (canvas, lb) = letterbox_image(image, w, h);
        let mut input_buf = match self.pool.as_ref().and_then(|p| p.claim_input(input_len).ok()) {
            Some(claim) => TensorBuf::Pooled(claim),
            None => {
                if self.pool.is_some() {
                    debug!("input buffer busy; using thread-local fallback");
                }
                TensorBuf::Fallback(take_fallback(&FALLBACK_INPUT, input_len))
            }
        };
        preprocess::blob_from_image(&canvas, input_buf.vec_mut(), self.config.use_simd);
        let preprocess_ms = pre_start.elapsed().as_secs_f32() * 1e3;

        let mut output_buf = match self.pool.as_ref().and_then(|p| p.claim_output(output_len).ok())
        {
            Some(claim) => TensorBuf::Pooled(claim),
            None => TensorBuf::Fallback(take_fallback(&FALLBACK_OUTPUT, output_len)),
        };

        let infer_start = Instant::now();
        let shape = [1i64, 3, h as i64, w as i64];
        let run = self
            .session
            .run(input_buf.vec_mut(), &shape, output_buf.vec_mut());
        let inference_ms = infer_start.elapsed().as_secs_f32() * 1e3;
        if let Err(err) = run {
            return Err(NeuralError::Inference(err));
        }

        let post_start = Instant::now();
        let detections = postprocess::decode_predictions(
            output_buf.vec_mut(),
            preds,
            num_classes,
            single_class,
            self.config.confidence_threshold,
            &lb,
        );
        let detections = postprocess::non_max_suppression(detections, self.config.nms_threshold);
        let postprocess_ms = post_start.elapsed().as_secs_f32() * 1e3;

        let bytes_in_pool = self.pool.as_ref().map(TensorPool::bytes_allocated).unwrap_or(0);
        input_buf.restore(&FALLBACK_INPUT);
        output_buf.restore(&FALLBACK_OUTPUT);

        let metrics = PerfMetrics {
            preprocess_ms,
            inference_ms,
            postprocess_ms,
            total_ms: total_start.elapsed().as_secs_f32() * 1e3,
            bytes_in_pool,
        };
        self.update_running_mean(inference_ms);

        Ok(DetectOutput {
            detections,
            metrics,
        })
    }

    /// Sequential batch detection.
    pub fn detect_batch(&mut self, images: &[RgbImage]) -> Vec<Result<DetectOutput, NeuralError>> {
        images.iter().map(|img| self.detect(img)).collect()
    }

    /// Prime runtime allocators with zero-tensor inferences.
    pub fn warm_up(&mut self, iterations: usize) {
        let dummy = RgbImage::new(self.config.input_width, self.config.input_height);
        for _ in 0..iterations {
            if let Err(err) = self.detect(&dummy) {
                warn!(%err, "warm-up inference failed");
                break;
            }
        }
        // Warm-up calls don't count toward the running mean.
        self.total_inferences.store(0, Ordering::Relaxed);
        self.avg_inference_bits.store(0, Ordering::Relaxed);
    }

    /// Running mean of inference time, ms.
    pub fn avg_inference_ms(&self) -> f32 {
        f32::from_bits(self.avg_inference_bits.load(Ordering::Relaxed))
    }

    fn update_running_mean(&self, inference_ms: f32) {
        let n = self.total_inferences.fetch_add(1, Ordering::Relaxed) + 1;
        let mut prev_bits = self.avg_inference_bits.load(Ordering::Relaxed);
        loop {
            let prev = f32::from_bits(prev_bits);
            let next = (prev * (n - 1) as f32 + inference_ms) / n as f32;
            match self.avg_inference_bits.compare_exchange_weak(
                prev_bits,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => prev_bits = actual,
            }
        }
    }
}

/// Infer the class layout from the cached output shapes: a trailing
/// channel dim of 5 is single-class, 84 is 80-class COCO.
fn classify_model(outputs: &[IoSpec]) -> ModelClassMode {
    let Some(first) = outputs.first() else {
        return ModelClassMode::Unknown;
    };
    if first.shape.len() < 2 {
        return ModelClassMode::Unknown;
    }
    let dim1 = first.shape[1];
    let dim2 = if first.shape.len() >= 3 {
        first.shape[2]
    } else {
        0
    };
    if dim1 == 5 || dim2 == 5 {
        ModelClassMode::SingleClass
    } else if dim1 == 84 || dim2 == 84 {
        ModelClassMode::Coco80
    } else {
        ModelClassMode::Unknown
    }
}

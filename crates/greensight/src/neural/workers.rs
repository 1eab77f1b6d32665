//! Preprocessing worker pool.
//!
//! Letterboxing and blob conversion for a batch of frames run on a
//! small pool of named threads fed through a bounded queue. Workers
//! stop when the atomic flag flips or the queue disconnects; the pool
//! joins them on drop.

use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

use super::letterbox::letterbox_image;
use super::preprocess::blob_from_image;

/// Default worker count.
pub const PREPROCESS_WORKERS: usize = 4;

struct Task {
    index: usize,
    image: RgbImage,
    width: u32,
    height: u32,
    use_simd: bool,
}

struct TaskOutput {
    index: usize,
    blob: Vec<f32>,
}

/// Fixed pool of preprocessing workers.
pub struct PreprocessPool {
    tasks: Option<Sender<Task>>,
    results: Receiver<TaskOutput>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl PreprocessPool {
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (task_tx, task_rx) = bounded::<Task>(num_workers * 2);
        let (result_tx, result_rx) = bounded::<TaskOutput>(num_workers * 2);
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("preprocess-{worker_id}"))
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let task = match task_rx.recv() {
                            Ok(task) => task,
                            // Queue disconnected: the pool is dropping.
                            Err(_) => break,
                        };
                        let (canvas, _lb) = letterbox_image(&task.image, task.width, task.height);
                        let mut blob = vec![0.0f32; (3 * task.width * task.height) as usize];
                        blob_from_image(&canvas, &mut blob, task.use_simd);
                        if result_tx
                            .send(TaskOutput {
                                index: task.index,
                                blob,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })
                .expect("failed to spawn preprocessing worker");
            workers.push(handle);
        }

        Self {
            tasks: Some(task_tx),
            results: result_rx,
            stop,
            workers,
        }
    }

    /// Letterbox + blob-convert a batch; output order matches input
    /// order. Blocks until every frame is done.
    pub fn preprocess_batch(
        &self,
        images: &[RgbImage],
        width: u32,
        height: u32,
        use_simd: bool,
    ) -> Vec<Vec<f32>> {
        let Some(tasks) = &self.tasks else {
            return Vec::new();
        };
        let mut submitted = 0usize;
        for (index, image) in images.iter().enumerate() {
            let task = Task {
                index,
                image: image.clone(),
                width,
                height,
                use_simd,
            };
            if tasks.send(task).is_err() {
                warn!("preprocess queue disconnected mid-batch");
                break;
            }
            submitted += 1;
        }

        let mut blobs: Vec<Vec<f32>> = vec![Vec::new(); submitted];
        for _ in 0..submitted {
            match self.results.recv() {
                Ok(output) => blobs[output.index] = output.blob,
                Err(_) => break,
            }
        }
        blobs
    }
}

impl Default for PreprocessPool {
    fn default() -> Self {
        Self::new(PREPROCESS_WORKERS)
    }
}

impl Drop for PreprocessPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Disconnect the queue so blocked workers wake and exit.
        self.tasks.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("preprocessing worker panicked");
            }
        }
    }
}

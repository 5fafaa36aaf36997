use crate::hires::write_image_file;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

pub struct DumpJob {
    pub path: PathBuf,
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub png: bool,
}

struct DumpQueueInner {
    queue: Mutex<VecDeque<DumpJob>>,
    condvar: Condvar,
    running: AtomicBool,
    cap: usize,
}

/// Bounded job queue drained by a single worker thread. Enqueue never
/// blocks; jobs past the cap are dropped.
pub struct DumpQueue {
    inner: Arc<DumpQueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DumpQueue {
    pub fn new(cap: usize) -> Self {
        DumpQueue {
            inner: Arc::new(DumpQueueInner {
                queue: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
                running: AtomicBool::new(false),
                cap,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }

        self.inner.running.store(true, Ordering::Release);
        let inner = self.inner.clone();
        *worker = Some(
            thread::Builder::new()
                .name("hires-dump".to_string())
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn dump worker"),
        );
    }

    /// Returns false when the job was dropped because the queue is full.
    pub fn enqueue(&self, job: DumpJob) -> bool {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.len() >= self.inner.cap {
                // backpressure: drop
                return false;
            }
            queue.push_back(job);
        }
        self.inner.condvar.notify_one();
        true
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cooperative shutdown: clears the running flag, wakes the worker and
    /// joins it, then discards any leftover jobs.
    pub fn shutdown(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            self.inner.condvar.notify_all();
            if let Some(worker) = self.worker.lock().unwrap().take() {
                let _ = worker.join();
            }
        }
        self.inner.queue.lock().unwrap().clear();
    }
}

impl Drop for DumpQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &DumpQueueInner) {
    while inner.running.load(Ordering::Acquire) {
        let job = {
            let mut queue = inner.queue.lock().unwrap();
            while inner.running.load(Ordering::Acquire) && queue.is_empty() {
                queue = inner.condvar.wait(queue).unwrap();
            }
            if !inner.running.load(Ordering::Acquire) && queue.is_empty() {
                return;
            }
            match queue.pop_front() {
                Some(job) => job,
                None => continue,
            }
        };

        // skip jobs whose destination already exists
        if job.path.exists() {
            continue;
        }
        write_image_file(&job.path, &job.rgba, job.width, job.height, job.png);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_drops_past_cap() {
        // worker never started, so nothing drains
        let queue = DumpQueue::new(4);
        let mut accepted = 0;
        for i in 0..5 {
            let job = DumpJob {
                path: PathBuf::from(format!("/nonexistent/job{i}.tga")),
                rgba: vec![0; 4],
                width: 1,
                height: 1,
                png: false,
            };
            if queue.enqueue(job) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn worker_drains_and_writes() {
        let dir = std::env::temp_dir().join("nitro2d_dump_queue_test");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("out.tga");

        let queue = DumpQueue::new(16);
        queue.start();
        assert!(queue.enqueue(DumpJob {
            path: path.clone(),
            rgba: vec![255; 16],
            width: 2,
            height: 2,
            png: false,
        }));

        // the worker owns the write; poll until it lands
        for _ in 0..200 {
            if path.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        queue.shutdown();

        let (rgba, w, h) = crate::hires::tga::read_tga(&path).unwrap();
        assert_eq!((w, h), (2, 2));
        assert_eq!(rgba, vec![255; 16]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}

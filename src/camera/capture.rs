//! Background capture thread.
//!
//! The worker reads pairs from the [`FrameSource`] at the target rate and
//! publishes the most recent one into a shared slot. The UI thread copies
//! from the slot and never waits on a device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::frame::FramePair;
use super::placeholder::placeholder_pair;
use super::source::FrameSource;

const WAITING_MESSAGE: &str = "Waiting for cameras...";

/// Handles of a running worker.
struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    /// Interrupts the pacing wait.
    wake: Sender<()>,
    /// Disconnects when the worker exits.
    done: Receiver<()>,
}

/// Paced capture loop with a single-slot latest-pair buffer.
pub struct CaptureLoop {
    source: Arc<Mutex<FrameSource>>,
    slot: Arc<Mutex<Option<FramePair>>>,
    published: Arc<AtomicU64>,
    frame_size: (u32, u32),
    interval: Duration,
    stop_timeout: Duration,
    worker: Option<Worker>,
}

impl CaptureLoop {
    /// Wrap `source`. The loop starts stopped.
    pub fn new(source: FrameSource, stop_timeout: Duration) -> Self {
        let frame_size = source.frame_size();
        let interval = Duration::from_secs_f64(1.0 / source.target_fps().max(1) as f64);
        Self {
            source: Arc::new(Mutex::new(source)),
            slot: Arc::new(Mutex::new(None)),
            published: Arc::new(AtomicU64::new(0)),
            frame_size,
            interval,
            stop_timeout,
            worker: None,
        }
    }

    /// Start the capture thread. No-op if already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // A previous worker that exited on its own still holds a handle
        self.reap();

        let running = Arc::new(AtomicBool::new(true));
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let source = self.source.clone();
        let slot = self.slot.clone();
        let published = self.published.clone();
        let running_clone = running.clone();
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("stereo-capture".to_string())
            .spawn(move || {
                let _done = done_tx;
                Self::capture_thread(source, slot, published, running_clone, wake_rx, interval);
            })?;

        log::info!(
            "Capture loop started ({:.1} ms interval)",
            self.interval.as_secs_f64() * 1000.0
        );

        self.worker = Some(Worker {
            running,
            handle,
            wake: wake_tx,
            done: done_rx,
        });
        Ok(())
    }

    fn capture_thread(
        source: Arc<Mutex<FrameSource>>,
        slot: Arc<Mutex<Option<FramePair>>>,
        published: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        wake: Receiver<()>,
        interval: Duration,
    ) {
        while running.load(Ordering::Acquire) {
            let started = Instant::now();

            let pair = source.lock().read_pair();
            let previous = slot.lock().replace(pair);
            drop(previous);
            published.fetch_add(1, Ordering::Relaxed);

            let wait = interval.saturating_sub(started.elapsed());
            match wake.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                }
            }
        }

        log::info!("Capture thread stopped");
    }

    /// Stop the capture thread, waiting at most the configured timeout.
    ///
    /// A worker still stuck in a device read after the timeout is detached.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.running.store(false, Ordering::Release);
        let _ = worker.wake.try_send(());

        match worker.done.recv_timeout(self.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Capture thread did not stop within {} ms, detaching",
                    self.stop_timeout.as_millis()
                );
            }
            _ => {
                if worker.handle.join().is_err() {
                    log::error!("Capture thread panicked");
                }
            }
        }
    }

    /// Drop the handle of a worker that has already exited.
    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }

    /// Check if the capture thread is running.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| w.running.load(Ordering::Acquire) && !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Copy of the most recently published pair, or a placeholder pair if
    /// nothing has been published yet.
    pub fn latest_pair(&self) -> FramePair {
        let copy = self.slot.lock().as_ref().map(FramePair::try_clone);
        match copy {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => {
                log::error!("Failed to copy latest frame pair: {}", e);
                self.waiting_pair()
            }
            None => self.waiting_pair(),
        }
    }

    /// Read a pair on the calling thread.
    ///
    /// While the worker is running this returns the latest published pair
    /// instead, so the device is never read from two threads.
    pub fn read_direct(&self) -> FramePair {
        if self.is_running() {
            return self.latest_pair();
        }
        self.source.lock().read_pair()
    }

    fn waiting_pair(&self) -> FramePair {
        placeholder_pair(self.frame_size.0, self.frame_size.1, WAITING_MESSAGE)
    }

    /// Number of pairs published since creation.
    pub fn frames_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Configured frame size.
    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    /// Stop the worker and release both devices.
    pub fn release(&mut self) {
        self.stop();
        match self.source.try_lock_for(self.stop_timeout) {
            Some(mut source) => source.release(),
            None => log::warn!("Frame source still busy, devices released when the worker exits"),
        }
        self.slot.lock().take();
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::device::{DeviceError, FrameDevice};
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use opencv::prelude::*;

    struct SlowDevice {
        delay: Duration,
    }

    impl FrameDevice for SlowDevice {
        fn read_frame(&mut self) -> Result<Mat, DeviceError> {
            std::thread::sleep(self.delay);
            Ok(Mat::new_rows_cols_with_default(
                120,
                160,
                CV_8UC3,
                Scalar::all(200.0),
            )?)
        }

        fn release(&mut self) {}

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn synthetic_loop(fps: u32) -> CaptureLoop {
        let mut source = FrameSource::new(crate::camera::CameraBackend::Synthetic, None);
        source.initialize(0, 1, 160, 120, fps);
        CaptureLoop::new(source, Duration::from_millis(500))
    }

    fn wait_for(capture: &CaptureLoop, frames: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while capture.frames_published() < frames && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_latest_pair_before_start_is_placeholder() {
        let capture = synthetic_loop(30);
        let pair = capture.latest_pair();
        assert_eq!(pair.left.cols(), 160);
        assert_eq!(pair.left.rows(), 120);
        assert_eq!(capture.frames_published(), 0);
    }

    #[test]
    fn test_start_publishes_and_stop_halts() {
        let mut capture = synthetic_loop(100);
        capture.start().unwrap();
        assert!(capture.is_running());

        wait_for(&capture, 3);
        assert!(capture.frames_published() >= 3);

        capture.stop();
        assert!(!capture.is_running());
        let count = capture.frames_published();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(capture.frames_published(), count);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut capture = synthetic_loop(100);
        capture.start().unwrap();
        capture.start().unwrap();
        assert!(capture.is_running());
        capture.stop();
        capture.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let mut capture = synthetic_loop(100);
        capture.start().unwrap();
        wait_for(&capture, 1);
        capture.stop();

        let count = capture.frames_published();
        capture.start().unwrap();
        wait_for(&capture, count + 2);
        assert!(capture.frames_published() >= count + 2);
        capture.stop();
    }

    #[test]
    fn test_stop_wakes_long_interval() {
        // 1 fps means a one second pacing wait
        let mut capture = synthetic_loop(1);
        capture.start().unwrap();
        wait_for(&capture, 1);

        let started = Instant::now();
        capture.stop();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_stop_detaches_stuck_worker() {
        let device = Box::new(SlowDevice {
            delay: Duration::from_millis(800),
        });
        let source = FrameSource::from_devices(Some(device), None, 160, 120, 30);
        let mut capture = CaptureLoop::new(source, Duration::from_millis(100));
        capture.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        capture.stop();
        assert!(started.elapsed() < Duration::from_millis(600));
        assert!(!capture.is_running());
    }

    #[test]
    fn test_read_direct_when_stopped() {
        let capture = synthetic_loop(30);
        let pair = capture.read_direct();
        assert_eq!(pair.right.cols(), 160);
        assert_eq!(capture.frames_published(), 0);
    }

    #[test]
    fn test_release_stops_worker() {
        let mut capture = synthetic_loop(100);
        capture.start().unwrap();
        capture.release();
        assert!(!capture.is_running());
        // Devices are gone, reads fall back to placeholders
        assert_eq!(capture.read_direct().left.rows(), 120);
    }
}

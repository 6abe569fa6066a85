//! Head-pose provider.
//!
//! `HeadTracker` owns the background thread that drains raw inertial
//! samples from a [`SensorSource`] and feeds them to the host-supplied
//! [`OrientationFilter`]. The render thread asks for a time-predicted head
//! view at frame rate; one mutex serializes that read against sample
//! ingestion, and is held only for a single filter call at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use glam::{Mat4, Vec3};
use log::{info, warn};

/// Extra prediction beyond the age of the newest gyroscope sample,
/// compensating for the rendering pipeline's latency.
const PREDICTION_LOOKAHEAD_SECONDS: f64 = 1.0 / 30.0;

/// One timestamped inertial sample. Timestamps are nanoseconds on the
/// sensor clock and are only ever handed to the filter, never compared to
/// wall time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSample {
    Accelerometer { v: Vec3, timestamp_ns: i64 },
    Gyroscope { v: Vec3, timestamp_ns: i64 },
    Magnetometer { v: Vec3, timestamp_ns: i64 },
}

/// Blocking stream of inertial samples, implemented by the host's sensor
/// transport.
///
/// `next_sample` should return `None` once the underlying stream is closed;
/// tracker shutdown joins the ingestion thread, so implementations must not
/// block unboundedly after their stream ends.
pub trait SensorSource: Send + 'static {
    fn next_sample(&mut self) -> Option<SensorSample>;
}

/// The external orientation estimator.
///
/// The tracker treats this as authoritative: samples go in (already
/// remapped into the renderer's frame), and `predict` extrapolates the
/// orientation `look_ahead_seconds` past the newest gyroscope sample,
/// returning a view matrix. `predict` is expected to be O(1) and must not
/// block.
pub trait OrientationFilter: Send {
    fn reset(&mut self);
    fn process_accelerometer(&mut self, v: Vec3, timestamp_ns: i64);
    fn process_gyroscope(&mut self, v: Vec3, timestamp_ns: i64);
    fn process_magnetometer(&mut self, v: Vec3, timestamp_ns: i64);
    fn predict(&self, look_ahead_seconds: f64) -> Mat4;
}

struct FilterSlot {
    filter: Box<dyn OrientationFilter>,
    last_gyro_at: Option<Instant>,
}

struct TrackerInner {
    slot: Mutex<FilterSlot>,
    stop: AtomicBool,
    aligned_to_north: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the sample-ingestion thread and exposes the predicted head view.
///
/// Clones share the same tracker, so the host can keep a handle for
/// lifecycle calls (`start_tracking`/`stop_tracking`) while the render
/// scheduler owns another for per-frame prediction.
#[derive(Clone)]
pub struct HeadTracker {
    inner: Arc<TrackerInner>,
    /// Fixed rotation taking the filter's local frame into the renderer's
    /// world frame, applied after prediction.
    frame_correction: Mat4,
}

impl HeadTracker {
    pub fn new(filter: Box<dyn OrientationFilter>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                slot: Mutex::new(FilterSlot {
                    filter,
                    last_gyro_at: None,
                }),
                stop: AtomicBool::new(false),
                aligned_to_north: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
            frame_correction: Mat4::from_rotation_x((-90.0f32).to_radians()),
        }
    }

    /// Feed magnetometer samples to the filter, yawing the world frame to
    /// magnetic north. Off by default.
    pub fn set_aligned_to_north(&self, aligned: bool) {
        self.inner.aligned_to_north.store(aligned, Ordering::Relaxed);
    }

    /// Resets the filter and spins up the ingestion thread over `source`.
    /// A second call while tracking is a no-op.
    pub fn start_tracking<S: SensorSource>(&self, mut source: S) {
        let mut worker = self.inner.worker.lock().unwrap();
        if worker.is_some() {
            warn!("head tracker already running, ignoring start");
            return;
        }
        self.inner.stop.store(false, Ordering::Release);
        self.inner.slot.lock().unwrap().filter.reset();

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("head-tracker".into())
            .spawn(move || {
                info!("head tracker started");
                while !inner.stop.load(Ordering::Acquire) {
                    let Some(sample) = source.next_sample() else {
                        break;
                    };
                    inner.ingest(sample);
                }
                info!("head tracker stopped");
            })
            .expect("failed to spawn head tracker thread");
        *worker = Some(handle);
    }

    /// Stops ingestion and joins the background thread.
    pub fn stop_tracking(&self) {
        self.inner.stop.store(true, Ordering::Release);
        let handle = self.inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Head view predicted slightly into the future, to counter pipeline
    /// latency: the filter extrapolates by the age of the newest gyroscope
    /// sample plus a fixed look-ahead, and the result is taken into the
    /// renderer's world frame.
    pub fn last_head_view(&self) -> Mat4 {
        let predicted = {
            let slot = self.inner.slot.lock().unwrap();
            let gyro_age = slot
                .last_gyro_at
                .map_or(0.0, |at| at.elapsed().as_secs_f64());
            slot.filter.predict(gyro_age + PREDICTION_LOOKAHEAD_SECONDS)
        };
        predicted * self.frame_correction
    }
}

impl Drop for HeadTracker {
    fn drop(&mut self) {
        // Last clone out stops the worker.
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.stop.store(true, Ordering::Release);
            if let Some(handle) = self.inner.worker.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
    }
}

impl TrackerInner {
    fn ingest(&self, sample: SensorSample) {
        let mut slot = self.slot.lock().unwrap();
        match sample {
            SensorSample::Accelerometer { v, timestamp_ns } => {
                slot.filter.process_accelerometer(remap_axes(v), timestamp_ns);
            }
            SensorSample::Gyroscope { v, timestamp_ns } => {
                slot.last_gyro_at = Some(Instant::now());
                slot.filter.process_gyroscope(remap_axes(v), timestamp_ns);
            }
            SensorSample::Magnetometer { v, timestamp_ns } => {
                if self.aligned_to_north.load(Ordering::Relaxed) {
                    slot.filter.process_magnetometer(remap_axes(v), timestamp_ns);
                }
            }
        }
    }
}

/// Rotates physical sensor axes into the filter's frame: the device sits
/// landscape in the viewer, so its x/y axes are swapped relative to the
/// sensor package.
fn remap_axes(v: Vec3) -> Vec3 {
    Vec3::new(-v.y, v.x, v.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Default)]
    struct RecordingFilter {
        accel: Vec<Vec3>,
        gyro: Vec<Vec3>,
        mag: Vec<Vec3>,
        resets: u32,
    }

    struct SharedFilter(Arc<Mutex<RecordingFilter>>);

    impl OrientationFilter for SharedFilter {
        fn reset(&mut self) {
            self.0.lock().unwrap().resets += 1;
        }
        fn process_accelerometer(&mut self, v: Vec3, _timestamp_ns: i64) {
            self.0.lock().unwrap().accel.push(v);
        }
        fn process_gyroscope(&mut self, v: Vec3, _timestamp_ns: i64) {
            self.0.lock().unwrap().gyro.push(v);
        }
        fn process_magnetometer(&mut self, v: Vec3, _timestamp_ns: i64) {
            self.0.lock().unwrap().mag.push(v);
        }
        fn predict(&self, _look_ahead_seconds: f64) -> Mat4 {
            Mat4::IDENTITY
        }
    }

    struct ChannelSource(mpsc::Receiver<SensorSample>);

    impl SensorSource for ChannelSource {
        fn next_sample(&mut self) -> Option<SensorSample> {
            self.0.recv().ok()
        }
    }

    #[test]
    fn samples_are_remapped_and_fed_to_filter() {
        let record = Arc::new(Mutex::new(RecordingFilter::default()));
        let tracker = HeadTracker::new(Box::new(SharedFilter(Arc::clone(&record))));
        let (tx, rx) = mpsc::channel();
        tracker.start_tracking(ChannelSource(rx));

        tx.send(SensorSample::Accelerometer {
            v: Vec3::new(1.0, 2.0, 3.0),
            timestamp_ns: 10,
        })
        .unwrap();
        tx.send(SensorSample::Gyroscope {
            v: Vec3::new(0.5, 0.0, -0.5),
            timestamp_ns: 20,
        })
        .unwrap();
        // Magnetometer is gated behind aligned-to-north.
        tx.send(SensorSample::Magnetometer {
            v: Vec3::ONE,
            timestamp_ns: 30,
        })
        .unwrap();
        drop(tx);
        tracker.stop_tracking();

        let record = record.lock().unwrap();
        assert_eq!(record.resets, 1);
        assert_eq!(record.accel, vec![Vec3::new(-2.0, 1.0, 3.0)]);
        assert_eq!(record.gyro, vec![Vec3::new(0.0, 0.5, -0.5)]);
        assert!(record.mag.is_empty());
    }

    #[test]
    fn magnetometer_flows_when_aligned_to_north() {
        let record = Arc::new(Mutex::new(RecordingFilter::default()));
        let tracker = HeadTracker::new(Box::new(SharedFilter(Arc::clone(&record))));
        tracker.set_aligned_to_north(true);
        let (tx, rx) = mpsc::channel();
        tracker.start_tracking(ChannelSource(rx));
        tx.send(SensorSample::Magnetometer {
            v: Vec3::new(0.0, 1.0, 0.0),
            timestamp_ns: 5,
        })
        .unwrap();
        drop(tx);
        tracker.stop_tracking();
        assert_eq!(record.lock().unwrap().mag, vec![Vec3::new(-1.0, 0.0, 0.0)]);
    }

    #[test]
    fn head_view_applies_frame_correction() {
        let record = Arc::new(Mutex::new(RecordingFilter::default()));
        let tracker = HeadTracker::new(Box::new(SharedFilter(record)));
        // Identity prediction leaves only the fixed -90 degree X rotation.
        let view = tracker.last_head_view();
        let expected = Mat4::from_rotation_x((-90.0f32).to_radians());
        for col in 0..4 {
            let d = (view.col(col) - expected.col(col)).length();
            assert!(d < 1e-6, "col {col} differs by {d}");
        }
    }

    #[test]
    fn prediction_works_without_tracking() {
        let record = Arc::new(Mutex::new(RecordingFilter::default()));
        let tracker = HeadTracker::new(Box::new(SharedFilter(record)));
        // No failure mode by contract: a never-started tracker still
        // produces a usable matrix.
        let _ = tracker.last_head_view();
    }
}

//! The three stages and the wiring between them.
//!
//! ```text
//!  +---------+  call (ch 5)  +-----------+  RingChannel   +------+
//!  | Capture | ------------> | Transform | =============> | Sink | --> LogStorage
//!  +---------+  <--- reply   +-----------+  notify (ch 6) +------+
//! ```
//!
//! Each stage runs as its own task. The only state they share is the ring
//! region and the signalling endpoints handed out by [`spawn`].

pub mod capture;
pub mod sink;
pub mod transform;

pub use capture::{CaptureStage, CaptureStats};
pub use sink::{CycleOutcome, PendingBuffer, SinkStage, SinkState, SinkStats};
pub use transform::{rot13, rot13_all, TransformStage, TransformStats};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{InputSource, PipelineConfig};
use crate::data::ring_buffer::RingChannel;
use crate::data::storage::{FileLogStorage, LogStorage};
use crate::error::AppResult;
use crate::hardware::{KeySource, MockKeyboard, StdinKeyboard};
use crate::ipc::{CallServer, NotificationSet};

/// Statistics reported by every stage once the pipeline has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Capture stage counters
    pub capture: CaptureStats,
    /// Transform stage counters
    pub transform: TransformStats,
    /// Sink stage counters
    pub sink: SinkStats,
}

/// Running pipeline.
///
/// Dropping the handle leaves the stage tasks running; call
/// [`PipelineHandle::shutdown`] to stop them and collect their statistics.
#[derive(Debug)]
pub struct PipelineHandle {
    stop_capture: watch::Sender<bool>,
    stop_sink: watch::Sender<bool>,
    capture: JoinHandle<AppResult<CaptureStats>>,
    transform: JoinHandle<TransformStage>,
    sink: JoinHandle<SinkStats>,
}

impl PipelineHandle {
    /// Stop every stage and return their statistics.
    ///
    /// Capture stops first. Transform exits once its last caller is gone,
    /// and only then is the sink told to stop, so its final drain sees every
    /// byte the transform stage accepted.
    pub async fn shutdown(self) -> AppResult<PipelineReport> {
        tracing::info!("Stopping pipeline");
        // A stage that already exited has dropped its receiver.
        let _ = self.stop_capture.send(true);
        let capture = self.capture.await?;
        let transform = self.transform.await?.stats();

        let _ = self.stop_sink.send(true);
        let sink = self.sink.await?;

        let report = PipelineReport {
            capture: capture?,
            transform,
            sink,
        };
        tracing::info!(
            forwarded = report.capture.forwarded,
            dropped = report.transform.dropped,
            committed = report.sink.bytes_committed,
            "Pipeline stopped"
        );
        Ok(report)
    }
}

/// Start the pipeline with the collaborators named in `config`.
///
/// The keystroke source is stdin or the scripted text; the log goes to
/// `sink.log_path`.
pub async fn launch(config: &PipelineConfig) -> AppResult<PipelineHandle> {
    let device: Box<dyn KeySource> = match config.capture.source {
        InputSource::Stdin => Box::new(StdinKeyboard::new()),
        InputSource::Script => Box::new(MockKeyboard::new(&config.capture.script)),
    };
    let storage = FileLogStorage::new(&config.sink.log_path);
    spawn(config, device, storage).await
}

/// Wire the stages around `device` and `storage` and start their tasks.
///
/// Storage is reinitialized before the device is claimed. A device that
/// cannot be claimed aborts startup with [`crate::error::PipelineError::Device`].
pub async fn spawn<K, S>(config: &PipelineConfig, device: K, storage: S) -> AppResult<PipelineHandle>
where
    K: KeySource + 'static,
    S: LogStorage + 'static,
{
    config.validate()?;
    let channels = &config.channels;

    let ring = match &config.ring.backing_path {
        Some(path) => RingChannel::create(path, config.ring.capacity)?,
        None => RingChannel::anonymous(config.ring.capacity)?,
    };
    let (producer, consumer) = ring.split();

    let notifications = NotificationSet::new();
    let notifier = notifications.notifier(channels.sink_notify)?;

    let sink = SinkStage::start(
        consumer,
        notifications,
        channels.sink_notify,
        storage,
        &config.sink,
    )
    .await?;

    let server = CallServer::new();
    let client = server.connect(channels.transform_call);
    let capture = CaptureStage::start(device, client, &config.capture).await?;
    let transform = TransformStage::new(channels.transform_call, producer, notifier);

    let (stop_capture, capture_rx) = watch::channel(false);
    let (stop_sink, sink_rx) = watch::channel(false);

    let handle = PipelineHandle {
        stop_capture,
        stop_sink,
        sink: tokio::spawn(sink.run(sink_rx)),
        transform: tokio::spawn(
            server
                .serve(transform)
                .instrument(tracing::info_span!("transform")),
        ),
        capture: tokio::spawn(capture.run(capture_rx)),
    };
    tracing::info!(
        ring_capacity = config.ring.capacity,
        flush_window = ?config.sink.flush_window,
        "Pipeline running"
    );
    Ok(handle)
}

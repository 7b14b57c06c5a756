//! Audio Level Monitors
//!
//! Implementations of [`AudioMonitor`] for the client. [`SilentMonitor`] is
//! always available; [`CpalMonitor`] reads the default input device and is
//! compiled with the `microphone` feature.

use async_trait::async_trait;
use jarvis_core::monitor::{AudioMonitor, MonitorError};
use tokio::sync::mpsc;

/// A monitor with no device behind it. Starting always succeeds and no
/// samples are ever produced, so the avatar keeps its mode defaults.
#[derive(Debug, Default)]
pub struct SilentMonitor {
    running: bool,
}

#[async_trait]
impl AudioMonitor for SilentMonitor {
    async fn start(&mut self, _samples: mpsc::UnboundedSender<f32>) -> Result<(), MonitorError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

/// The monitor the binary uses by default for this build.
pub fn default_monitor() -> Box<dyn AudioMonitor> {
    #[cfg(feature = "microphone")]
    {
        Box::new(CpalMonitor::default())
    }
    #[cfg(not(feature = "microphone"))]
    {
        Box::new(SilentMonitor::default())
    }
}

/// Root-mean-square loudness of a buffer, scaled and clamped into `[0, 1]`.
pub fn loudness(samples: &[f32]) -> f32 {
    const GAIN: f32 = 4.0;
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    (mean_square.sqrt() * GAIN).clamp(0.0, 1.0)
}

#[cfg(feature = "microphone")]
pub use device::CpalMonitor;

#[cfg(feature = "microphone")]
mod device {
    use super::loudness;
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SizedSample};
    use jarvis_core::monitor::{AudioMonitor, MonitorError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::{mpsc, oneshot};
    use tracing::{error, info};

    /// Minimum spacing between samples, roughly one per display frame.
    const FRAME_INTERVAL: Duration = Duration::from_millis(16);

    struct Capture {
        active: Arc<AtomicBool>,
        // Dropping this ends the capture thread, which owns the stream.
        _stop: std::sync::mpsc::Sender<()>,
    }

    /// Reads loudness from the host's default input device.
    ///
    /// `cpal` streams are not `Send` on every platform, so each capture runs
    /// on its own thread that owns the stream until told to stop.
    #[derive(Default)]
    pub struct CpalMonitor {
        capture: Option<Capture>,
    }

    #[async_trait]
    impl AudioMonitor for CpalMonitor {
        async fn start(&mut self, samples: mpsc::UnboundedSender<f32>) -> Result<(), MonitorError> {
            if self.capture.is_some() {
                return Ok(());
            }

            let active = Arc::new(AtomicBool::new(true));
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
            let (ready_tx, ready_rx) = oneshot::channel();
            let thread_active = active.clone();

            std::thread::spawn(move || match open_stream(samples, thread_active) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until the monitor drops its sender.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            });

            ready_rx
                .await
                .map_err(|_| MonitorError::Stream("capture thread exited".to_string()))??;

            info!("Microphone capture started.");
            self.capture = Some(Capture {
                active,
                _stop: stop_tx,
            });
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(capture) = self.capture.take() {
                capture.active.store(false, Ordering::SeqCst);
                info!("Microphone capture stopped.");
            }
        }
    }

    fn open_stream(
        samples: mpsc::UnboundedSender<f32>,
        active: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, MonitorError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(MonitorError::NoDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| MonitorError::Denied(e.to_string()))?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stream = match format {
            cpal::SampleFormat::F32 => build::<f32>(&device, &config, samples, active),
            cpal::SampleFormat::I16 => build::<i16>(&device, &config, samples, active),
            cpal::SampleFormat::U16 => build::<u16>(&device, &config, samples, active),
            other => {
                return Err(MonitorError::Stream(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }?;
        stream
            .play()
            .map_err(|e| MonitorError::Stream(e.to_string()))?;
        Ok(stream)
    }

    fn build<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        samples: mpsc::UnboundedSender<f32>,
        active: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, MonitorError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let mut last_emit: Option<Instant> = None;
        let mut buffer = Vec::new();
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !active.load(Ordering::SeqCst)
                        || last_emit.is_some_and(|at| at.elapsed() < FRAME_INTERVAL)
                    {
                        return;
                    }
                    last_emit = Some(Instant::now());
                    buffer.clear();
                    buffer.extend(data.iter().map(|s| s.to_sample::<f32>()));
                    let _ = samples.send(loudness(&buffer));
                },
                |err| error!(error = %err, "Microphone stream error."),
                None,
            )
            .map_err(|e| MonitorError::Denied(e.to_string()))
    }
}

// Camera device abstraction and the GStreamer implementation
//
// One pipeline per device with a tee feeding two branches:
//
//   source -> capsfilter -> videoflip -> tee
//     tee -> queue (leaky) -> videoconvert -> RGB appsink   (preview stills)
//     tee -> queue -> videoconvert -> x264enc -> h264parse -> appsink (ring)
//
// The tee is what lets a still grab run concurrently with the background
// encode: the two branches never contend on a lock, so preview keeps moving
// while a recording is appending to disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use parking_lot::{Condvar, Mutex};

use super::frame::{Frame, FrameOrigin};
use super::ring::{EncodedChunk, SharedRingBuffer};
use super::{CaptureError, Result};
use crate::config::Config;

/// The shared sensor resource. Implementations must allow a still grab to
/// run concurrently with the continuous background encode without either
/// blocking the other indefinitely; mutual exclusion across *modes* is the
/// ModeController's job, not the device's.
pub trait CameraDevice: Send + Sync {
    /// Grab one decoded frame. Fails with `CaptureTimeout` when the sensor
    /// produces nothing fresh within `timeout`.
    fn capture_still(&self, timeout: Duration) -> Result<Frame>;

    /// Begin encoding the live stream into `ring`. Runs until stopped;
    /// the ring is fed regardless of the current mode.
    fn start_continuous_encode(&self, ring: SharedRingBuffer) -> Result<()>;

    fn stop_continuous_encode(&self) -> Result<()>;

    /// Release the sensor. Called exactly once on the shutdown path, after
    /// any in-flight recording has been finalized.
    fn close(&self) -> Result<()>;
}

/// Latest decoded frame from the preview branch. The sequence number lets a
/// still grab insist on a frame captured after the request was made.
struct LatestFrame {
    seq: u64,
    frame: Option<Frame>,
}

/// GStreamer-backed camera.
pub struct GstCamera {
    pipeline: gst::Pipeline,
    latest: Arc<(Mutex<LatestFrame>, Condvar)>,
    /// Destination for encoded chunks; `None` parks the encode callback
    ring_slot: Arc<Mutex<Option<SharedRingBuffer>>>,
    running: AtomicBool,
    closed: AtomicBool,
    device_label: String,
}

impl GstCamera {
    /// Build the capture pipeline for the configured device. The pipeline is
    /// left stopped; `start_continuous_encode` brings it up.
    pub fn open(config: &Config) -> Result<Self> {
        gst::init().map_err(|e| CaptureError::Pipeline(format!("GStreamer init failed: {e}")))?;

        let pipeline = gst::Pipeline::new();
        let (source, device_label) = create_source_element(config.device_index)?;

        let source_caps = gst::Caps::builder("video/x-raw")
            .field("width", config.width as i32)
            .field("height", config.height as i32)
            .field(
                "framerate",
                gst::Fraction::new(config.frame_rate.max(1) as i32, 1),
            )
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &source_caps)
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create capsfilter: {e}")))?;

        let flip = gst::ElementFactory::make("videoflip")
            .property_from_str(
                "method",
                if config.flip_horizontal {
                    "horizontal-flip"
                } else {
                    "none"
                },
            )
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create videoflip: {e}")))?;

        let tee = gst::ElementFactory::make("tee")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create tee: {e}")))?;

        // Preview branch: keep only the freshest frames, never back-pressure
        // the encoder through the tee
        let preview_queue = gst::ElementFactory::make("queue")
            .property("max-size-buffers", 2u32)
            .property_from_str("leaky", "downstream")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create queue: {e}")))?;
        let preview_convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create videoconvert: {e}")))?;
        let preview_caps = gst::ElementFactory::make("capsfilter")
            .property("caps", &gst::Caps::builder("video/x-raw").field("format", "RGB").build())
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create capsfilter: {e}")))?;
        let preview_sink = gst_app::AppSink::builder()
            .name("preview_sink")
            .max_buffers(2)
            .drop(true)
            .sync(false)
            .build();

        // Encode branch: H.264 elementary stream into the ring buffer
        let encode_queue = gst::ElementFactory::make("queue")
            .property("max-size-buffers", 60u32)
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create queue: {e}")))?;
        let encode_convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create videoconvert: {e}")))?;
        let encoder = gst::ElementFactory::make("x264enc")
            .property("key-int-max", config.frame_rate.max(1) * KEYFRAME_INTERVAL_SECS)
            .property("bitrate", 4096u32)
            .property_from_str("tune", "zerolatency")
            .property_from_str("speed-preset", "ultrafast")
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create x264enc: {e}")))?;
        let parser = gst::ElementFactory::make("h264parse")
            .property("config-interval", -1i32)
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create h264parse: {e}")))?;
        let stream_caps = gst::ElementFactory::make("capsfilter")
            .property(
                "caps",
                &gst::Caps::builder("video/x-h264")
                    .field("stream-format", "byte-stream")
                    .field("alignment", "au")
                    .build(),
            )
            .build()
            .map_err(|e| CaptureError::Pipeline(format!("Failed to create capsfilter: {e}")))?;
        let encoded_sink = gst_app::AppSink::builder()
            .name("encoded_sink")
            .sync(false)
            .build();

        pipeline
            .add_many([
                &source,
                &capsfilter,
                &flip,
                &tee,
                &preview_queue,
                &preview_convert,
                &preview_caps,
                preview_sink.upcast_ref(),
                &encode_queue,
                &encode_convert,
                &encoder,
                &parser,
                &stream_caps,
                encoded_sink.upcast_ref(),
            ])
            .map_err(|e| CaptureError::Pipeline(format!("Failed to add elements: {e}")))?;

        gst::Element::link_many([&source, &capsfilter, &flip, &tee])
            .map_err(|e| CaptureError::Pipeline(format!("Failed to link source chain: {e}")))?;
        gst::Element::link_many([
            &tee,
            &preview_queue,
            &preview_convert,
            &preview_caps,
            preview_sink.upcast_ref(),
        ])
        .map_err(|e| CaptureError::Pipeline(format!("Failed to link preview branch: {e}")))?;
        gst::Element::link_many([
            &tee,
            &encode_queue,
            &encode_convert,
            &encoder,
            &parser,
            &stream_caps,
            encoded_sink.upcast_ref(),
        ])
        .map_err(|e| CaptureError::Pipeline(format!("Failed to link encode branch: {e}")))?;

        let latest = Arc::new((
            Mutex::new(LatestFrame {
                seq: 0,
                frame: None,
            }),
            Condvar::new(),
        ));
        let ring_slot: Arc<Mutex<Option<SharedRingBuffer>>> = Arc::new(Mutex::new(None));

        // Preview callback: publish the freshest decoded frame
        let cell = latest.clone();
        let flipped = config.flip_horizontal;
        preview_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| match sink.pull_sample() {
                    Ok(sample) => {
                        if let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) {
                            if let (Ok(info), Ok(map)) =
                                (gst_video::VideoInfo::from_caps(caps), buffer.map_readable())
                            {
                                let frame = Frame {
                                    data: Arc::from(map.as_slice().to_vec()),
                                    width: info.width(),
                                    height: info.height(),
                                    flipped,
                                    origin: FrameOrigin::Preview,
                                    captured_at: Instant::now(),
                                };
                                let (lock, cond) = &*cell;
                                let mut latest = lock.lock();
                                latest.seq += 1;
                                latest.frame = Some(frame);
                                cond.notify_all();
                            }
                        }
                        Ok(gst::FlowSuccess::Ok)
                    }
                    Err(_) => Err(gst::FlowError::Error),
                })
                .build(),
        );

        // Encode callback: push chunks into whichever ring is attached.
        // The slot indirection means callbacks are set exactly once while
        // start/stop_continuous_encode stay restartable.
        let slot = ring_slot.clone();
        let default_duration_ns =
            (1_000_000_000.0 / config.frame_rate.max(1) as f64).round() as u64;
        encoded_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| match sink.pull_sample() {
                    Ok(sample) => {
                        if let Some(buffer) = sample.buffer() {
                            let pts = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
                            let duration = buffer
                                .duration()
                                .map(|t| t.nseconds())
                                .unwrap_or(default_duration_ns);
                            let is_delta = buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);
                            if let Ok(map) = buffer.map_readable() {
                                if let Some(ring) = slot.lock().as_ref() {
                                    ring.lock().push(EncodedChunk {
                                        data: map.as_slice().to_vec(),
                                        pts,
                                        duration,
                                        wall_time: Instant::now(),
                                        is_delta_unit: is_delta,
                                    });
                                }
                            }
                        }
                        Ok(gst::FlowSuccess::Ok)
                    }
                    Err(_) => Err(gst::FlowError::Error),
                })
                .build(),
        );

        log::info!(
            "camera pipeline built for {} ({}x{} @ {}fps, flip: {})",
            device_label,
            config.width,
            config.height,
            config.frame_rate,
            config.flip_horizontal
        );

        Ok(Self {
            pipeline,
            latest,
            ring_slot,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            device_label,
        })
    }

    /// Wait for caps to negotiate on the preview branch. USB cameras need
    /// time to initialize, and decoders negotiate only once data flows, so
    /// poll with a bounded retry and harvest bus errors for the report.
    fn wait_for_negotiation(&self) -> Result<()> {
        let mut bus_errors = String::new();
        for attempt in 1..=NEGOTIATION_ATTEMPTS {
            std::thread::sleep(Duration::from_millis(250));

            if self.latest.0.lock().seq > 0 {
                log::debug!("camera negotiated on attempt {attempt}");
                return Ok(());
            }

            if let Some(bus) = self.pipeline.bus() {
                while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
                    if let gst::MessageView::Error(err) = msg.view() {
                        let src = err.src().map(|s| s.name().to_string()).unwrap_or_default();
                        bus_errors.push_str(&format!("{}: {}. ", src, err.error()));
                    }
                }
            }
        }

        let _ = self.pipeline.set_state(gst::State::Null);
        Err(CaptureError::DeviceUnavailable(format!(
            "{} produced no frames within {}ms. {}",
            self.device_label,
            NEGOTIATION_ATTEMPTS * 250,
            bus_errors
        )))
    }
}

/// Encoder keyframe spacing; the ring buffer keeps this much headroom so
/// keyframe-aligned trimming never shortens the configured pre-roll.
pub const KEYFRAME_INTERVAL_SECS: u32 = 2;

const NEGOTIATION_ATTEMPTS: u32 = 20;

impl CameraDevice for GstCamera {
    fn capture_still(&self, timeout: Duration) -> Result<Frame> {
        let (lock, cond) = &*self.latest;
        let mut latest = lock.lock();
        let start_seq = latest.seq;
        let deadline = Instant::now() + timeout;
        loop {
            if latest.seq > start_seq {
                if let Some(frame) = latest.frame.clone() {
                    return Ok(frame);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::CaptureTimeout(timeout));
            }
            cond.wait_for(&mut latest, deadline - now);
        }
    }

    fn start_continuous_encode(&self, ring: SharedRingBuffer) -> Result<()> {
        *self.ring_slot.lock() = Some(ring);
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::DeviceUnavailable(format!("pipeline start: {e}")))?;
        self.wait_for_negotiation()?;
        self.running.store(true, Ordering::SeqCst);
        log::info!("continuous encode started for {}", self.device_label);
        Ok(())
    }

    fn stop_continuous_encode(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        *self.ring_slot.lock() = None;
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CaptureError::Pipeline(format!("pipeline stop: {e}")))?;
        log::info!("continuous encode stopped for {}", self.device_label);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.stop_continuous_encode();
        let _ = self.pipeline.set_state(gst::State::Null);
        log::info!("camera closed: {}", self.device_label);
        Ok(())
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        // Covers error paths where close() was never reached
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Create the platform source element for a device index.
fn create_source_element(device_index: u32) -> Result<(gst::Element, String)> {
    #[cfg(target_os = "linux")]
    {
        let device = format!("/dev/video{device_index}");
        let src = gst::ElementFactory::make("v4l2src")
            .property("device", &device)
            .build()
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("Failed to create v4l2src: {e}"))
            })?;
        Ok((src, device))
    }

    #[cfg(target_os = "windows")]
    {
        let src = gst::ElementFactory::make("mfvideosrc")
            .property("device-index", device_index)
            .build()
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("Failed to create mfvideosrc: {e}"))
            })?;
        Ok((src, format!("camera {device_index}")))
    }

    #[cfg(target_os = "macos")]
    {
        let src = gst::ElementFactory::make("avfvideosrc")
            .property("device-index", device_index as i32)
            .build()
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("Failed to create avfvideosrc: {e}"))
            })?;
        Ok((src, format!("camera {device_index}")))
    }
}

/// List available camera devices as `(id, display name)` pairs.
pub fn enumerate_cameras() -> Vec<(String, String)> {
    if gst::init().is_err() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);

    if monitor.start().is_err() {
        return devices;
    }

    for device in monitor.devices() {
        if device.device_class().contains("Video/Source") {
            let id = device
                .properties()
                .and_then(|p| p.get::<String>("device.path").ok())
                .unwrap_or_else(|| format!("camera-{}", devices.len()));
            devices.push((id, device.display_name().to_string()));
        }
    }

    monitor.stop();
    devices
}

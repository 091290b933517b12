//! In-process GStreamer media backend.
//!
//! Builds each transport with `gst::parse::launch` from the same pipeline
//! description the `gst-launch-1.0` backend uses, so both backends produce
//! identical streams. Running in-process adds what the launcher cannot
//! offer: bus diagnostics without scraping stderr, in-place restarts and
//! the `bytes-served` counter of the send sink that feeds the stall
//! watchdog.
//!
//! ```no_run
//! use std::sync::Arc;
//! use aes67::{ManagerSettings, SessionManager};
//!
//! let backend = aes67_gst::GstBackend::new().expect("GStreamer initialises");
//! let manager = SessionManager::new(ManagerSettings::default(), Arc::new(backend));
//! manager.apply_config().ok();
//! ```

use std::sync::LazyLock;

use gst::prelude::*;

use aes67::transport::{SEND_SINK_NAME, pipeline_description};
use aes67::{
    Aes67Error, Capability, Diagnostic, Direction, HealthState, Instance, MediaBackend,
    MediaPipeline, Result,
};

static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "aes67",
        gst::DebugColorFlags::empty(),
        Some("AES67 session transports"),
    )
});

/// Backend creating one `gst::Pipeline` per transport.
#[derive(Debug, Clone, Copy)]
pub struct GstBackend {
    _private: (),
}

impl GstBackend {
    /// Initialise GStreamer. Safe to call more than once.
    pub fn new() -> std::result::Result<Self, gst::glib::Error> {
        gst::init()?;
        Ok(Self { _private: () })
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn create(&self, instance: &Instance, direction: Direction) -> Result<Box<dyn MediaPipeline>> {
        let fail = |reason: String| Aes67Error::TransportCreate {
            instance_id: instance.id,
            direction: direction.as_str(),
            reason,
        };

        let description = pipeline_description(instance, direction);
        gst::info!(CAT, "instance {} {direction}: {description}", instance.id);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| fail(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| fail("description did not produce a pipeline".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| fail(e.to_string()))?;

        let sink = match direction {
            Direction::Send => pipeline.by_name(SEND_SINK_NAME),
            Direction::Receive => None,
        };

        tracing::info!(instance_id = instance.id, %direction, "pipeline playing");
        Ok(Box::new(GstPipeline { pipeline, sink }))
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = vec![Capability {
            name: "gstreamer".to_string(),
            available: true,
        }];
        caps.extend(aes67::transport::REQUIRED_ELEMENTS.iter().map(|element| Capability {
            name: format!("element_{element}"),
            available: gst::ElementFactory::find(element).is_some(),
        }));
        caps
    }
}

struct GstPipeline {
    pipeline: gst::Pipeline,
    /// `udpsink` of a send pipeline; carries `bytes-served`.
    sink: Option<gst::Element>,
}

impl MediaPipeline for GstPipeline {
    fn health(&mut self) -> HealthState {
        let (result, current, pending) = self.pipeline.state(gst::ClockTime::ZERO);
        match (result, current) {
            (Err(_), _) => HealthState::Failed,
            (Ok(_), gst::State::Playing) => HealthState::Running,
            (Ok(_), _) if pending == gst::State::Playing => HealthState::Starting,
            _ => HealthState::Stopped,
        }
    }

    fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        let Some(bus) = self.pipeline.bus() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        while let Some(msg) = bus.pop() {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    out.push(Diagnostic::Error(format!("{} ({:?})", err.error(), err.debug())));
                }
                gst::MessageView::Warning(warn) => {
                    out.push(Diagnostic::Warning(warn.error().to_string()));
                }
                gst::MessageView::Info(info) => {
                    out.push(Diagnostic::Info(info.error().to_string()));
                }
                _ => {}
            }
        }
        out
    }

    fn bytes_emitted(&mut self) -> Option<u64> {
        let sink = self.sink.as_ref()?;
        sink.find_property("bytes-served")?;
        Some(sink.property::<u64>("bytes-served"))
    }

    fn restart(&mut self) -> Result<()> {
        let _ = self.pipeline.set_state(gst::State::Null);
        self.pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| Aes67Error::TransportRestart(e.to_string()))
    }

    fn stop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            gst::warning!(CAT, "failed to stop pipeline: {e}");
        }
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

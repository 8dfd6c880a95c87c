//! Pipeline controllers driven by the UI layer.
//!
//! Each session is built once and owns its channel, so the UI only ever talks
//! to it through `on_selection_made`, `on_stream_toggle` and
//! `on_destination_changed`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::capture::camera::{Camera, CameraState};
use crate::capture::source::SourceSpec;
use crate::capture::stream::{CaptureStream, StreamStats};
use crate::capture::{self, CaptureError, Geometry, Protocol, TICK_PERIOD};
use crate::selector::{ChipEntry, Command, GateKind, NameTable, SelectorError};
use crate::transport::{
    Channel, Deliver, Destination, DuplexChannel, RequestChannel, SendOutcome, Status, TransportError,
};

/// Chip selector: one table, one request channel.
pub struct GateSession {
    gate: GateKind,
    table: NameTable,
    channel: RequestChannel,
}

impl GateSession {
    pub fn new(
        gate: GateKind,
        destination: Destination,
        deliver: Arc<dyn Deliver>,
        status_tx: mpsc::UnboundedSender<Status>,
    ) -> Self {
        Self {
            gate,
            table: gate.table(),
            channel: RequestChannel::new(deliver, destination, status_tx),
        }
    }

    pub fn gate(&self) -> GateKind {
        self.gate
    }

    pub fn entries(&self) -> Vec<ChipEntry> {
        self.table.entries()
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_ready()
    }

    pub fn destination(&self) -> Destination {
        self.channel.destination()
    }

    pub fn on_gate_changed(&mut self, gate: GateKind) {
        if gate != self.gate {
            self.gate = gate;
            self.table = gate.table();
        }
    }

    /// Sends the chip's command unless a previous one is still outstanding.
    pub fn on_selection_made(&mut self, code: u32) -> Result<SendOutcome, SelectorError> {
        let command = Command::new(code)?;
        let outcome = self.channel.send(command.to_vec());
        info!(
            gate = ?self.gate,
            code,
            chip = self.table.name_of(code).unwrap_or("?"),
            ?outcome,
            "chip selected"
        );
        Ok(outcome)
    }

    pub fn on_destination_changed(&mut self, address: &str) -> Result<(), TransportError> {
        self.channel.set_destination(Destination::http(address)?);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CameraConfig {
    pub protocol: Protocol,
    pub capture_width: u32,
    pub send_timeout: Option<Duration>,
    pub period: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Ws15,
            capture_width: capture::DEFAULT_CAPTURE_WIDTH,
            send_timeout: None,
            period: TICK_PERIOD,
        }
    }
}

/// Camera streamer: camera state, capture timer and the channel it feeds.
pub struct CameraSession {
    config: CameraConfig,
    camera: Camera,
    stream: CaptureStream,
    channel_tx: watch::Sender<Arc<Channel>>,
    deliver: Arc<dyn Deliver>,
    status_tx: mpsc::UnboundedSender<Status>,
}

impl CameraSession {
    /// `deliver` is used by the HTTP protocol; the WebSocket protocol opens its own socket.
    pub fn new(
        config: CameraConfig,
        address: &str,
        deliver: Arc<dyn Deliver>,
        status_tx: mpsc::UnboundedSender<Status>,
    ) -> anyhow::Result<Self> {
        capture::check_capture_width(config.capture_width, config.protocol.wire_format())?;
        let channel = build_channel(&config, address, deliver.clone(), status_tx.clone())?;
        if let Channel::Request(request) = &channel {
            // Empty POST so the server status shows up before streaming starts
            let outcome = request.send(Vec::new());
            info!(destination = %request.destination(), ?outcome, "connection check");
        }

        Ok(Self {
            config,
            camera: Camera::new(config.capture_width),
            stream: CaptureStream::new(config.period),
            channel_tx: watch::Sender::new(Arc::new(channel)),
            deliver,
            status_tx,
        })
    }

    pub fn camera_state(&self) -> &CameraState {
        self.camera.state()
    }

    pub fn stats(&self) -> StreamStats {
        self.stream.stats()
    }

    pub fn destination(&self) -> Destination {
        self.channel_tx.borrow().destination()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_running()
    }

    pub fn request_camera(&mut self, spec: &SourceSpec) -> Result<(), CaptureError> {
        self.camera.request(spec)
    }

    pub async fn wait_ready(&mut self) -> Result<Geometry, CaptureError> {
        self.camera.wait_ready().await
    }

    /// Starts or stops streaming. Returns whether the stream is now running.
    pub fn on_stream_toggle(&mut self) -> Result<bool, CaptureError> {
        if self.stream.is_running() {
            self.stream.stop();
            self.camera.set_streaming(false);
            return Ok(false);
        }

        let (Some(geometry), Some(source)) = (self.camera.geometry(), self.camera.source()) else {
            return Err(CaptureError::NotActive);
        };
        self.stream.start(
            source.clone(),
            geometry,
            self.config.protocol.wire_format(),
            self.channel_tx.subscribe(),
        );
        self.camera.set_streaming(true);
        Ok(true)
    }

    pub fn on_destination_changed(&mut self, address: &str) -> Result<(), TransportError> {
        let current = self.channel_tx.borrow().clone();
        match &*current {
            Channel::Request(channel) => channel.set_destination(Destination::http(address)?),
            Channel::Duplex(_) => {
                // A socket is bound to its peer; reconnect to the new one
                let channel = build_channel(&self.config, address, self.deliver.clone(), self.status_tx.clone())?;
                self.channel_tx.send_replace(Arc::new(channel));
            }
        }
        Ok(())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

fn build_channel(
    config: &CameraConfig,
    address: &str,
    deliver: Arc<dyn Deliver>,
    status_tx: mpsc::UnboundedSender<Status>,
) -> Result<Channel, TransportError> {
    Ok(match config.protocol {
        Protocol::Http24 => Channel::Request(
            RequestChannel::new(deliver, Destination::http(address)?, status_tx)
                .with_timeout(config.send_timeout),
        ),
        Protocol::Ws15 => Channel::Duplex(DuplexChannel::open(Destination::ws(address)?, status_tx)),
    })
}

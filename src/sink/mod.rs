//! Local stand-in for the emulator's receiving side.
//!
//! Accepts chip commands and camera frames over HTTP POST and WebSocket,
//! logs what arrived and optionally dumps frames as PNG files.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

use crate::capture::convert::decode_frame;
use crate::capture::WireFormat;

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:8001";

/// Largest HTTP body accepted (a little over one 24-bit frame).
const MAX_BODY: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Chip(u32),
    Frame(WireFormat),
    Unknown(usize),
}

pub fn classify(data: &[u8]) -> Payload {
    match data.len() {
        0 => Payload::Empty,
        4 => Payload::Chip(u32::from_be_bytes([data[0], data[1], data[2], data[3]])),
        len => WireFormat::from_frame_len(len).map_or(Payload::Unknown(len), Payload::Frame),
    }
}

/// Listener addresses to bind. With neither given, both defaults are used;
/// naming one runs only that listener.
pub fn listeners(http: Option<String>, ws: Option<String>) -> (Option<String>, Option<String>) {
    match (http, ws) {
        (None, None) => (Some(DEFAULT_HTTP_ADDR.to_string()), Some(DEFAULT_WS_ADDR.to_string())),
        chosen => chosen,
    }
}

pub struct Sink {
    http_addr: Option<String>,
    ws_addr: Option<String>,
    dump_dir: Option<PathBuf>,
    frames: Arc<AtomicU64>,
}

impl Sink {
    pub fn new(http_addr: Option<String>, ws_addr: Option<String>, dump_dir: Option<PathBuf>) -> Self {
        let (http_addr, ws_addr) = listeners(http_addr, ws_addr);
        Self {
            http_addr,
            ws_addr,
            dump_dir,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run(&self) -> Result<()> {
        if let Some(dir) = &self.dump_dir {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let http = match &self.http_addr {
            Some(addr) => Some(bind(addr).await?),
            None => None,
        };
        let ws = match &self.ws_addr {
            Some(addr) => Some(bind(addr).await?),
            None => None,
        };

        println!("📡 Gatelink sink");
        if let Some(listener) = &http {
            println!("   HTTP POST on  http://{}", listener.local_addr()?);
        }
        if let Some(listener) = &ws {
            println!("   WebSocket on  ws://{}", listener.local_addr()?);
        }
        if let Some(dir) = &self.dump_dir {
            println!("   Dumping frames to {}", dir.display());
        }
        println!();

        let http_task = http.map(|listener| {
            let app = http_router(self.handler());
            tokio::spawn(async move { axum::serve(listener, app).await.context("HTTP listener failed") })
        });
        let ws_task = ws.map(|listener| tokio::spawn(accept_ws(listener, self.handler())));

        if let Some(task) = http_task {
            task.await??;
        }
        if let Some(task) = ws_task {
            task.await??;
        }
        Ok(())
    }

    fn handler(&self) -> PayloadHandler {
        PayloadHandler {
            dump_dir: self.dump_dir.clone(),
            frames: self.frames.clone(),
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

#[derive(Clone)]
struct PayloadHandler {
    dump_dir: Option<PathBuf>,
    frames: Arc<AtomicU64>,
}

impl PayloadHandler {
    fn handle(&self, data: &[u8]) -> Payload {
        let payload = classify(data);
        match payload {
            Payload::Empty => println!("⚪ Empty request (connection check)"),
            Payload::Chip(code) => println!("🎴 Chip command: {}", code),
            Payload::Frame(format) => {
                let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
                println!("📷 Frame #{} ({}, {} bytes)", n, format, data.len());
                if let Some(dir) = &self.dump_dir {
                    let path = dir.join(format!("frame-{:06}.png", n));
                    match decode_frame(format, data).map(|img| img.save(&path)) {
                        Ok(Ok(())) => debug!(path = %path.display(), "frame dumped"),
                        Ok(Err(e)) => warn!(error = %e, "failed to write frame"),
                        Err(e) => warn!(error = %e, "failed to decode frame"),
                    }
                }
            }
            Payload::Unknown(len) => println!("❓ Unrecognised payload ({} bytes)", len),
        }
        payload
    }
}

/// Bodies are posted to the bare address, so every path lands here.
fn http_router(handler: PayloadHandler) -> Router {
    Router::new()
        .fallback(receive)
        .layer(DefaultBodyLimit::max(MAX_BODY))
        .with_state(handler)
}

async fn receive(State(handler): State<PayloadHandler>, method: Method, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        // Browser pages post cross-origin and preflight first
        return (
            StatusCode::NO_CONTENT,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::ACCESS_CONTROL_ALLOW_METHODS, "POST"),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            ],
        )
            .into_response();
    }
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    handler.handle(&body);
    (StatusCode::OK, [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")]).into_response()
}

async fn accept_ws(listener: TcpListener, handler: PayloadHandler) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_ws(stream, &handler).await {
                warn!(%peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_ws(stream: TcpStream, handler: &PayloadHandler) -> Result<()> {
    let mut ws_stream = accept_async(stream).await?;
    println!("🔌 WebSocket client connected");

    while let Some(msg) = ws_stream.next().await {
        match msg {
            Ok(WsMessage::Binary(data)) => {
                handler.handle(&data);
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    println!("🔌 WebSocket client disconnected");
    Ok(())
}

//! Video sinks: whatever actually fetches and renders a stream URL.
//!
//! A sink receives [`LoadRequest`]s and answers later, on its own schedule,
//! with a [`SinkEvent`] carrying the request's ticket back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::{LoadRequest, LoadTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkEventKind {
    Loaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkEvent {
    #[serde(flatten)]
    pub ticket: LoadTicket,
    pub event: SinkEventKind,
    #[serde(default)]
    pub detail: Option<String>,
}

pub type SinkEventSender = mpsc::UnboundedSender<SinkEvent>;
pub type SinkEventReceiver = mpsc::UnboundedReceiver<SinkEvent>;

pub trait PlayerSink: Send {
    fn load(&mut self, request: LoadRequest);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Checks reachability of each candidate over HTTP.
    Probe,
    /// A client plays the stream itself and reports back through the API.
    #[default]
    External,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            probe_timeout_ms: default_probe_timeout_ms(),
            accept_invalid_certs: false,
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    8000
}

pub fn build_sink(config: &SinkConfig, events: SinkEventSender) -> anyhow::Result<Box<dyn PlayerSink>> {
    Ok(match config.kind {
        SinkKind::Probe => Box::new(ProbeSink::new(config, events)?),
        SinkKind::External => Box::new(ExternalSink::default()),
    })
}

/// Considers a stream loaded when an HTTP GET for it answers with a success status.
pub struct ProbeSink {
    client: reqwest::Client,
    events: SinkEventSender,
    in_flight: Option<JoinHandle<()>>,
}

impl ProbeSink {
    pub fn new(config: &SinkConfig, events: SinkEventSender) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(Duration::from_millis(config.probe_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            events,
            in_flight: None,
        })
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

impl PlayerSink for ProbeSink {
    fn load(&mut self, request: LoadRequest) {
        self.cancel();
        let client = self.client.clone();
        let events = self.events.clone();

        self.in_flight = Some(tokio::spawn(async move {
            let LoadRequest { ticket, url } = request;
            let (event, detail) = match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => (SinkEventKind::Loaded, None),
                Ok(resp) => (SinkEventKind::Failed, Some(format!("HTTP {}", resp.status()))),
                Err(e) => (SinkEventKind::Failed, Some(e.to_string())),
            };
            debug!("Probe of {} finished: {:?} {:?}", url, event, detail);
            // The receiver only goes away on shutdown.
            let _ = events.send(SinkEvent { ticket, event, detail });
        }));
    }

    fn pause(&mut self) {
        debug!("Probe sink has nothing to pause");
    }

    fn resume(&mut self) {
        debug!("Probe sink has nothing to resume");
    }

    fn stop(&mut self) {
        self.cancel();
    }
}

impl Drop for ProbeSink {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Tracks what a remote client was asked to play; the client reports results itself.
#[derive(Debug, Default)]
pub struct ExternalSink {
    current: Option<LoadRequest>,
    paused: bool,
}

impl ExternalSink {
    pub fn current(&self) -> Option<&LoadRequest> {
        self.current.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl PlayerSink for ExternalSink {
    fn load(&mut self, request: LoadRequest) {
        info!(
            "Client asked to play {} candidate {} (epoch {}): {}",
            request.ticket.channel_id,
            request.ticket.stream_index + 1,
            request.ticket.epoch,
            request.url
        );
        self.current = Some(request);
        self.paused = false;
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = false;
    }
}

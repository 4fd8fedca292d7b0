use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::channels::Channel;
use crate::controller::{Command, Outcome, PlaybackController, SessionSnapshot, SinkCommand};
use crate::sink::{PlayerSink, SinkEvent, SinkEventKind, SinkEventReceiver};

/// A playback session wired to its sink.
///
/// Every command goes through the controller first; the sink commands it
/// queued are forwarded right after, while the caller still holds the lock.
pub struct Player {
    controller: PlaybackController,
    sink: Box<dyn PlayerSink>,
}

pub type SharedPlayer = Arc<Mutex<Player>>;

impl Player {
    pub fn new(controller: PlaybackController, sink: Box<dyn PlayerSink>) -> Self {
        Self { controller, sink }
    }

    pub fn shared(self) -> SharedPlayer {
        Arc::new(Mutex::new(self))
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller.snapshot()
    }

    fn flush(&mut self) {
        for effect in self.controller.drain_effects() {
            match effect {
                SinkCommand::Load(request) => self.sink.load(request),
                SinkCommand::Pause => self.sink.pause(),
                SinkCommand::Resume => self.sink.resume(),
                SinkCommand::Stop => self.sink.stop(),
            }
        }
    }

    pub fn start(&mut self) -> Outcome {
        let outcome = self.controller.start();
        self.flush();
        outcome
    }

    pub fn apply(&mut self, command: Command) -> Outcome {
        debug!("Applying {:?}", command);
        let outcome = self.controller.apply(command);
        self.flush();
        outcome
    }

    pub fn handle_sink_event(&mut self, event: SinkEvent) -> Outcome {
        let outcome = match event.event {
            SinkEventKind::Loaded => self.controller.report_stream_loaded(&event.ticket),
            SinkEventKind::Failed => {
                if let Some(detail) = &event.detail {
                    debug!("Sink failure for {}: {}", event.ticket.channel_id, detail);
                }
                self.controller.report_stream_failure(&event.ticket)
            }
        };
        self.flush();
        outcome
    }

    pub fn reload(&mut self, channels: Vec<Channel>, categories: &[String]) -> Outcome {
        let outcome = self.controller.reload(channels, categories);
        self.flush();
        outcome
    }
}

/// Feeds sink callbacks into the session, one at a time, until every sender is gone.
pub async fn run_sink_events(player: SharedPlayer, mut events: SinkEventReceiver) {
    while let Some(event) = events.recv().await {
        let outcome = player.lock().await.handle_sink_event(event);
        debug!("Sink event handled: {:?}", outcome);
    }
    info!("Sink event channel closed");
}

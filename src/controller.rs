//! Playback session state machine.
//!
//! The controller owns the active category, the visible channel view, the
//! active channel and the stream candidate being tried. Commands are plain
//! synchronous transitions that never fail; anything that cannot be applied
//! is reported through [`Outcome`].
//!
//! Every load the controller starts is stamped with a [`LoadTicket`]. Sink
//! callbacks carry the ticket back, and a ticket that no longer matches the
//! current `(channel, stream index, epoch)` is discarded as stale.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channels::{with_all_sentinel, Channel};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Playback {
    Idle,
    Loading,
    Playing,
    Paused,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Prev,
}

/// What a command did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    /// Accepted but nothing to do in the current state.
    Unchanged,
    NotFound,
    /// A sink callback for a load that has since been superseded.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadTicket {
    pub channel_id: String,
    pub stream_index: usize,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadRequest {
    pub ticket: LoadTicket,
    pub url: String,
}

/// Instructions for the video sink, queued by the controller and drained by the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCommand {
    Load(LoadRequest),
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetCategory { category: String },
    CycleCategory { direction: Direction },
    SelectChannel { unique_id: String },
    Step { direction: Direction },
    TogglePlayPause,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialCategory {
    #[default]
    All,
    First,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryReset {
    /// Always start over at the first visible channel.
    #[default]
    Always,
    /// Keep the active channel when it is still visible under the new category.
    PreserveActive,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub initial_category: InitialCategory,
    #[serde(default)]
    pub category_reset: CategoryReset,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub categories: Vec<String>,
    pub active_category: String,
    pub visible_channels: Vec<Channel>,
    pub active_channel: Option<Channel>,
    pub stream_index: usize,
    pub stream_url: Option<String>,
    pub playback: Playback,
    pub stream_fallback_exhausted: bool,
    pub ticket: Option<LoadTicket>,
}

pub struct PlaybackController {
    config: PlaybackConfig,
    all_label: String,
    channels: Vec<Arc<Channel>>,
    categories: Vec<String>,
    active_category: String,
    visible: Vec<Arc<Channel>>,
    active: Option<usize>,
    stream_index: usize,
    playback: Playback,
    epoch: u64,
    fallback_exhausted: bool,
    effects: Vec<SinkCommand>,
}

impl PlaybackController {
    /// Builds an idle session over the canonical channel list.
    pub fn init(
        channels: Vec<Channel>,
        categories: &[String],
        all_label: &str,
        config: PlaybackConfig,
    ) -> Self {
        let categories = with_all_sentinel(categories, all_label);
        let mut controller = Self {
            config,
            all_label: all_label.to_string(),
            channels: channels.into_iter().map(Arc::new).collect(),
            categories,
            active_category: all_label.to_string(),
            visible: Vec::new(),
            active: None,
            stream_index: 0,
            playback: Playback::Idle,
            epoch: 0,
            fallback_exhausted: false,
            effects: Vec::new(),
        };
        controller.active_category = controller.initial_category();
        controller.refilter();
        controller.active = (!controller.visible.is_empty()).then_some(0);
        info!(
            "Session initialized: channels={} categories={} active_category=\"{}\"",
            controller.channels.len(),
            controller.categories.len(),
            controller.active_category
        );
        controller
    }

    fn initial_category(&self) -> String {
        match self.config.initial_category {
            InitialCategory::All => self.all_label.clone(),
            InitialCategory::First => self
                .categories
                .iter()
                .find(|c| **c != self.all_label)
                .unwrap_or(&self.all_label)
                .clone(),
        }
    }

    fn refilter(&mut self) {
        self.visible = if self.active_category == self.all_label {
            self.channels.clone()
        } else {
            self.channels
                .iter()
                .filter(|c| c.category == self.active_category)
                .cloned()
                .collect()
        };
        metrics::VISIBLE_CHANNELS.set(self.visible.len() as f64);
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn active_category(&self) -> &str {
        &self.active_category
    }

    pub fn visible_channels(&self) -> &[Arc<Channel>] {
        &self.visible
    }

    pub fn active_channel(&self) -> Option<&Channel> {
        self.active.and_then(|i| self.visible.get(i)).map(|c| c.as_ref())
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    pub fn stream_fallback_exhausted(&self) -> bool {
        self.fallback_exhausted
    }

    pub fn current_stream(&self) -> Option<&str> {
        self.active_channel()
            .and_then(|c| c.streams.get(self.stream_index))
            .map(String::as_str)
    }

    /// Ticket of the load currently in flight or playing, if any.
    pub fn current_ticket(&self) -> Option<LoadTicket> {
        match self.playback {
            Playback::Idle => None,
            _ => self.active_channel().map(|c| LoadTicket {
                channel_id: c.unique_id.clone(),
                stream_index: self.stream_index,
                epoch: self.epoch,
            }),
        }
    }

    /// Takes the sink commands queued since the last call.
    pub fn drain_effects(&mut self) -> Vec<SinkCommand> {
        std::mem::take(&mut self.effects)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            categories: self.categories.clone(),
            active_category: self.active_category.clone(),
            visible_channels: self.visible.iter().map(|c| c.as_ref().clone()).collect(),
            active_channel: self.active_channel().cloned(),
            stream_index: self.stream_index,
            stream_url: self.current_stream().map(str::to_string),
            playback: self.playback,
            stream_fallback_exhausted: self.fallback_exhausted,
            ticket: self.current_ticket(),
        }
    }

    fn begin_load(&mut self) {
        self.epoch += 1;
        self.fallback_exhausted = false;
        let Some(channel) = self.active.and_then(|i| self.visible.get(i)).cloned() else {
            self.playback = Playback::Idle;
            self.effects.push(SinkCommand::Stop);
            return;
        };
        let Some(url) = channel.streams.get(self.stream_index).cloned() else {
            // Normalized channels always carry at least one stream.
            self.playback = Playback::Failed;
            self.effects.push(SinkCommand::Stop);
            return;
        };

        self.playback = Playback::Loading;
        debug!(
            "Loading {} stream {}/{}: {}",
            channel.unique_id,
            self.stream_index + 1,
            channel.streams.len(),
            url
        );
        self.effects.push(SinkCommand::Load(LoadRequest {
            ticket: LoadTicket {
                channel_id: channel.unique_id.clone(),
                stream_index: self.stream_index,
                epoch: self.epoch,
            },
            url,
        }));
    }

    fn tune(&mut self, position: usize) {
        self.active = Some(position);
        self.stream_index = 0;
        metrics::CHANNEL_CHANGES.inc();
        if let Some(channel) = self.visible.get(position) {
            info!(
                "Tuning channel \"{}\" ({}) with {} stream candidate(s)",
                channel.name,
                channel.unique_id,
                channel.streams.len()
            );
        }
        self.begin_load();
    }

    fn go_idle(&mut self) {
        self.active = None;
        self.stream_index = 0;
        self.playback = Playback::Idle;
        self.fallback_exhausted = false;
        self.epoch += 1;
        self.effects.push(SinkCommand::Stop);
    }

    /// Starts loading the active channel of a freshly initialized session.
    pub fn start(&mut self) -> Outcome {
        if self.playback != Playback::Idle {
            return Outcome::Unchanged;
        }
        match self.active {
            Some(position) => {
                self.tune(position);
                Outcome::Applied
            }
            None => Outcome::Unchanged,
        }
    }

    fn apply_category(&mut self, category: String, policy: CategoryReset) {
        let previous = self.active_channel().map(|c| c.unique_id.clone());
        let previous_stream = self.current_stream().map(str::to_string);
        self.active_category = category;
        self.refilter();
        info!(
            "Category \"{}\" selected: visible_channels={}",
            self.active_category,
            self.visible.len()
        );

        if self.visible.is_empty() {
            self.go_idle();
            return;
        }

        if policy == CategoryReset::PreserveActive {
            let kept = previous.and_then(|id| self.visible.iter().position(|c| c.unique_id == id));
            if let Some(position) = kept {
                // The sink keeps its load only if the same URL sits at the same index.
                let same_stream =
                    self.visible[position].streams.get(self.stream_index) == previous_stream.as_ref();
                self.active = Some(position);
                if same_stream && self.playback != Playback::Idle {
                    return;
                }
                self.tune(position);
                return;
            }
        }

        self.tune(0);
    }

    pub fn set_category(&mut self, category: &str) -> Outcome {
        if !self.categories.iter().any(|c| c == category) {
            debug!("Unknown category \"{}\" ignored", category);
            return Outcome::NotFound;
        }
        self.apply_category(category.to_string(), self.config.category_reset);
        Outcome::Applied
    }

    /// Moves the active category circularly, as a TV remote's left/right does.
    pub fn cycle_category(&mut self, direction: Direction) -> Outcome {
        let n = self.categories.len();
        if n == 0 {
            return Outcome::Unchanged;
        }
        let current = self
            .categories
            .iter()
            .position(|c| *c == self.active_category)
            .unwrap_or(0);
        let next = match direction {
            Direction::Next => (current + 1) % n,
            Direction::Prev => (current + n - 1) % n,
        };
        let category = self.categories[next].clone();
        self.apply_category(category, self.config.category_reset);
        Outcome::Applied
    }

    pub fn select_channel(&mut self, unique_id: &str) -> Outcome {
        match self.visible.iter().position(|c| c.unique_id == unique_id) {
            Some(position) => {
                self.tune(position);
                Outcome::Applied
            }
            None => {
                debug!("Channel {} is not visible in \"{}\"", unique_id, self.active_category);
                Outcome::NotFound
            }
        }
    }

    /// Zaps to the neighbouring visible channel, wrapping at both ends.
    pub fn step(&mut self, direction: Direction) -> Outcome {
        let n = self.visible.len();
        if n == 0 {
            return Outcome::Unchanged;
        }
        let position = match (self.active, direction) {
            (None, _) => 0,
            (Some(i), Direction::Next) => (i + 1) % n,
            (Some(i), Direction::Prev) => (i + n - 1) % n,
        };
        self.tune(position);
        Outcome::Applied
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.current_ticket().as_ref() == Some(ticket)
    }

    /// The sink could not load (or lost) the stream the ticket refers to.
    ///
    /// Falls back to the next candidate of the same channel; once every
    /// candidate has failed the session stays `Failed` until the caller
    /// picks another channel or category.
    pub fn report_stream_failure(&mut self, ticket: &LoadTicket) -> Outcome {
        if !self.is_current(ticket) {
            metrics::STALE_CALLBACKS.inc();
            debug!(
                "Discarding stale failure for {} stream {} (epoch {})",
                ticket.channel_id, ticket.stream_index, ticket.epoch
            );
            return Outcome::Stale;
        }
        if matches!(self.playback, Playback::Idle | Playback::Failed) {
            return Outcome::Unchanged;
        }

        let candidates = self.active_channel().map(|c| c.streams.len()).unwrap_or(0);
        if self.stream_index + 1 < candidates {
            self.stream_index += 1;
            metrics::STREAM_FALLBACKS.inc();
            warn!(
                "Stream failed for {}, falling back to candidate {}/{}",
                ticket.channel_id,
                self.stream_index + 1,
                candidates
            );
            self.begin_load();
        } else {
            self.playback = Playback::Failed;
            self.fallback_exhausted = true;
            metrics::STREAMS_EXHAUSTED.inc();
            warn!(
                "All {} stream candidate(s) failed for {}",
                candidates, ticket.channel_id
            );
            self.effects.push(SinkCommand::Stop);
        }
        Outcome::Applied
    }

    pub fn report_stream_loaded(&mut self, ticket: &LoadTicket) -> Outcome {
        if !self.is_current(ticket) {
            metrics::STALE_CALLBACKS.inc();
            debug!(
                "Discarding stale load for {} stream {} (epoch {})",
                ticket.channel_id, ticket.stream_index, ticket.epoch
            );
            return Outcome::Stale;
        }
        if self.playback != Playback::Loading {
            return Outcome::Unchanged;
        }
        self.playback = Playback::Playing;
        info!("Playing {} from candidate {}", ticket.channel_id, ticket.stream_index + 1);
        Outcome::Applied
    }

    pub fn toggle_play_pause(&mut self) -> Outcome {
        match self.playback {
            Playback::Playing => {
                self.playback = Playback::Paused;
                self.effects.push(SinkCommand::Pause);
                Outcome::Applied
            }
            Playback::Paused => {
                self.playback = Playback::Playing;
                self.effects.push(SinkCommand::Resume);
                Outcome::Applied
            }
            _ => Outcome::Unchanged,
        }
    }

    /// Swaps in a rebuilt channel list after the raw data was refreshed.
    pub fn reload(&mut self, channels: Vec<Channel>, categories: &[String]) -> Outcome {
        self.channels = channels.into_iter().map(Arc::new).collect();
        self.categories = with_all_sentinel(categories, &self.all_label);
        let category = if self.categories.contains(&self.active_category) {
            self.active_category.clone()
        } else {
            self.initial_category()
        };
        info!(
            "Channel list reloaded: channels={} categories={}",
            self.channels.len(),
            self.categories.len()
        );
        self.apply_category(category, self.config.category_reset);
        Outcome::Applied
    }

    pub fn apply(&mut self, command: Command) -> Outcome {
        match command {
            Command::SetCategory { category } => self.set_category(&category),
            Command::CycleCategory { direction } => self.cycle_category(direction),
            Command::SelectChannel { unique_id } => self.select_channel(&unique_id),
            Command::Step { direction } => self.step(direction),
            Command::TogglePlayPause => self.toggle_play_pause(),
        }
    }
}

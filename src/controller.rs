use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::channel::MessagingChannel;
use crate::listener::DeviceListener;
use crate::proto::command::{CommandHeader, Packet};
use crate::proto::parser::{ack_wire, format_packet, parse_packet};
use crate::state::DeviceState;

/// First wait for a state change after LoadRecipe is issued.
const RECIPE_LOAD_WAIT: Duration = Duration::from_millis(5_000);
/// Extended wait used when the analyzer is still loading the recipe after
/// the first window.
const RECIPE_LOAD_EXTENDED_WAIT: Duration = Duration::from_millis(20_000);

/// The one field mutated from outside the message handler, paired with the
/// single-slot wakeup flag for the start protocol.
struct StateCell {
    state: DeviceState,
    signaled: bool,
}

/// Protocol controller: the single mediator between inbound commands and the
/// device listener. Validates each command against the last reported device
/// state, drives the listener, and answers ACK/NACK over the channel.
///
/// `handle_message` runs one command to completion at a time; the start
/// protocol is the only path that blocks, and only a concurrent
/// `state_changed` notification (or a timeout) releases it.
pub struct Controller {
    listener: Arc<dyn DeviceListener>,
    channel: Arc<dyn MessagingChannel>,
    cell: Mutex<StateCell>,
    signal: Condvar,
    last_start: Mutex<Option<Packet>>,
    first_wait: Duration,
    second_wait: Duration,
}

impl Controller {
    pub fn new(listener: Arc<dyn DeviceListener>, channel: Arc<dyn MessagingChannel>) -> Self {
        Self::with_wait_windows(listener, channel, RECIPE_LOAD_WAIT, RECIPE_LOAD_EXTENDED_WAIT)
    }

    /// Constructor with injectable wait windows so tests run in milliseconds.
    pub(crate) fn with_wait_windows(
        listener: Arc<dyn DeviceListener>,
        channel: Arc<dyn MessagingChannel>,
        first_wait: Duration,
        second_wait: Duration,
    ) -> Self {
        Self {
            listener,
            channel,
            cell: Mutex::new(StateCell {
                state: DeviceState::None,
                signaled: false,
            }),
            signal: Condvar::new(),
            last_start: Mutex::new(None),
            first_wait,
            second_wait,
        }
    }

    /// Handle one raw inbound message. Never panics and never reports an
    /// error upward; malformed input folds into a NACK reply and the loop
    /// stays able to process the next message.
    pub fn handle_message(&self, raw: &str) {
        info!("<< received message: {raw}");

        let packet = parse_packet(raw);
        match packet.command {
            CommandHeader::Start => self.handle_start(raw, packet),
            CommandHeader::Stop => self.handle_stop(raw),
            CommandHeader::Flush => self.handle_flush(raw),
            CommandHeader::Finish => self.handle_finish(raw),
            // Nacks also cover parse failures; echo them back out.
            CommandHeader::Nack => self.broadcast_packet(&packet),
            // Acknowledgements and completion notices are observed silently.
            CommandHeader::Ack | CommandHeader::SamplingDone => {}
            CommandHeader::Unknown | CommandHeader::Error => {
                debug!("dropping message with header {:?}", packet.command);
            }
        }
    }

    /// State-change sink for the device listener, called at arbitrary times
    /// from the listener's own thread. Last write wins; exactly one blocked
    /// start waiter (if any) is released per notification.
    pub fn state_changed(&self, new_state: DeviceState) {
        info!("state changed: {new_state}");
        {
            let mut cell = self.cell.lock().unwrap();
            cell.state = new_state;
            cell.signaled = true;
        }
        self.signal.notify_one();

        // The run ended on its own; alert the operator unsolicited.
        if new_state == DeviceState::Stopped {
            self.broadcast_packet(&Packet::bare(CommandHeader::SamplingDone));
        }
    }

    /// Announce a device-level fault outside the normal command flow.
    pub fn broadcast_error(&self) {
        self.broadcast_packet(&Packet::bare(CommandHeader::Error));
    }

    /// The most recent accepted start request, if any run was started.
    pub fn last_start_request(&self) -> Option<Packet> {
        self.last_start.lock().unwrap().clone()
    }

    fn handle_start(&self, raw: &str, packet: Packet) {
        let entry_state = self.current_state();
        if !matches!(entry_state, DeviceState::None | DeviceState::Idle) {
            self.broadcast_packet(&Packet::nack(format!(
                "Blob Analyzer in invalid state {entry_state}, unable to accept start request."
            )));
            return;
        }

        // Arm the wait before poking the listener so a state change landing
        // between the two calls is not missed.
        self.cell.lock().unwrap().signaled = false;
        self.listener.load_recipe(&packet.recipe_name);

        let mut reached = self.wait_for_state_change(self.first_wait);
        if reached == DeviceState::LoadingRecipe {
            // Still transitioning; give the load the long window.
            reached = self.wait_for_state_change(self.second_wait);
        }

        if reached == DeviceState::Idle {
            let started_at = Local::now();
            self.listener.start(
                &packet.sample_id,
                &packet.operator,
                &packet.comment,
                &prediction_result_filename(&packet.sample_id, started_at),
                &blob_collection_subfolder(&packet.sample_id, started_at),
            );
            *self.last_start.lock().unwrap() = Some(packet);
            self.broadcast(&ack_wire(raw));
        } else {
            self.broadcast_packet(&Packet::nack(format!(
                "Blob Analyzer did not reach idle state, state= {reached}, \
                 unable to accept start request."
            )));
        }
    }

    fn handle_stop(&self, raw: &str) {
        let state = self.current_state();
        if matches!(
            state,
            DeviceState::Measuring
                | DeviceState::FlushingIdle
                | DeviceState::FlushingNone
                | DeviceState::FlushingStopped
        ) {
            self.listener.stop();
            self.broadcast(&ack_wire(raw));
        } else {
            self.broadcast_packet(&Packet::nack(format!(
                "Blob Analyzer not in running or flushing state, state= {state}"
            )));
        }
    }

    fn handle_flush(&self, raw: &str) {
        let state = self.current_state();
        if matches!(
            state,
            DeviceState::Stopped | DeviceState::Idle | DeviceState::None
        ) {
            self.listener.flush();
            self.broadcast(&ack_wire(raw));
        } else {
            self.broadcast_packet(&Packet::nack(format!(
                "Autofeeder not in stopped or idle state, state= {state}"
            )));
        }
    }

    fn handle_finish(&self, raw: &str) {
        let state = self.current_state();
        if state == DeviceState::Stopped {
            self.listener.finish();
            self.broadcast(&ack_wire(raw));
        } else {
            self.broadcast_packet(&Packet::nack(format!(
                "Autofeeder not in stopped state, state= {state}"
            )));
        }
    }

    /// Block up to `timeout` for the next state-change signal, then re-read
    /// the state regardless of outcome. Auto-reset: a completed wait
    /// consumes the signal, so a notification posted while nobody waited
    /// releases only the next single wait.
    fn wait_for_state_change(&self, timeout: Duration) -> DeviceState {
        let guard = self.cell.lock().unwrap();
        let (mut cell, _timed_out) = self
            .signal
            .wait_timeout_while(guard, timeout, |cell| !cell.signaled)
            .unwrap();
        cell.signaled = false;
        cell.state
    }

    fn current_state(&self) -> DeviceState {
        self.cell.lock().unwrap().state
    }

    fn broadcast_packet(&self, packet: &Packet) {
        self.broadcast(&format_packet(packet));
    }

    fn broadcast(&self, message: &str) {
        info!(">> sending: {message}");
        self.channel.broadcast(message);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.channel.close();
    }
}

fn blob_collection_subfolder(sample_id: &str, started_at: DateTime<Local>) -> String {
    format!("{sample_id}_{}", started_at.format("%Y%m%d_%H%M%S"))
}

fn prediction_result_filename(sample_id: &str, started_at: DateTime<Local>) -> String {
    format!(
        "PredictionResult_{sample_id}_{}.xlsx",
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/* ---------- tests ---------- */

use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::controller::Controller;
use crate::listener::DeviceListener;
use crate::state::DeviceState;

/// Stand-in device driver so the binary can be exercised end to end with a
/// plain socket client (`nc localhost 8888`). Each command reports a
/// plausible state transition back into the controller, the slow ones after
/// a configurable delay on a background thread.
pub struct SimulatedDevice {
    sink: Mutex<Weak<Controller>>,
    load_delay: Duration,
    settle_delay: Duration,
}

impl SimulatedDevice {
    pub fn new(load_delay: Duration, settle_delay: Duration) -> Self {
        Self {
            sink: Mutex::new(Weak::new()),
            load_delay,
            settle_delay,
        }
    }

    /// Wire the state-change sink. The controller and listener reference
    /// each other, so this runs after both are constructed.
    pub fn attach(&self, controller: &Arc<Controller>) {
        *self.sink.lock().unwrap() = Arc::downgrade(controller);
    }

    fn report(&self, state: DeviceState) {
        if let Some(controller) = self.sink.lock().unwrap().upgrade() {
            controller.state_changed(state);
        }
    }

    fn report_after(&self, delay: Duration, state: DeviceState) {
        let sink = self.sink.lock().unwrap().clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if let Some(controller) = sink.upgrade() {
                controller.state_changed(state);
            }
        });
    }
}

impl DeviceListener for SimulatedDevice {
    fn load_recipe(&self, recipe_name: &str) {
        if recipe_name.is_empty() {
            info!("[sim] no recipe named, reporting device error");
            if let Some(controller) = self.sink.lock().unwrap().upgrade() {
                controller.broadcast_error();
            }
            return;
        }
        info!("[sim] loading recipe {recipe_name}");
        self.report(DeviceState::LoadingRecipe);
        self.report_after(self.load_delay, DeviceState::Idle);
    }

    fn start(
        &self,
        sample_id: &str,
        operator: &str,
        comment: &str,
        prediction_result_filename: &str,
        blob_collection_subfolder: &str,
    ) {
        info!(
            "[sim] measuring sample {sample_id} for {operator} ({comment}); \
             results: {prediction_result_filename} / {blob_collection_subfolder}"
        );
        self.report(DeviceState::Measuring);
    }

    fn stop(&self) {
        info!("[sim] stopping run");
        self.report(DeviceState::FlushingStopped);
        self.report_after(self.settle_delay, DeviceState::Stopped);
    }

    fn flush(&self) {
        info!("[sim] flushing feeder");
        self.report(DeviceState::FlushingIdle);
        self.report_after(self.settle_delay, DeviceState::Idle);
    }

    fn finish(&self) {
        info!("[sim] finishing batch");
        self.report(DeviceState::None);
    }
}

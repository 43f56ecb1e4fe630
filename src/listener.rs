/// The device driver side of the controller.
///
/// All calls are fire-and-forget: the driver confirms progress only through
/// the state-change side channel (`Controller::state_changed`), possibly
/// seconds later and from its own thread.
pub trait DeviceListener: Send + Sync {
    fn load_recipe(&self, recipe_name: &str);
    fn start(
        &self,
        sample_id: &str,
        operator: &str,
        comment: &str,
        prediction_result_filename: &str,
        blob_collection_subfolder: &str,
    );
    fn stop(&self);
    fn flush(&self);
    fn finish(&self);
}

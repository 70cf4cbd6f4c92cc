use crate::services::Producer;
use crate::store::MessageStore;
use crate::worker::WorkerHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub producer: Producer,
    pub store: Arc<dyn MessageStore>,
    pub worker: Arc<WorkerHandle>,
}

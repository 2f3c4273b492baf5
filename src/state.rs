use std::sync::Arc;

use crate::bus::EventBus;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::hub::Hub;
use crate::store::Store;

/// Process-scoped collaborator bundle, built once at startup and handed to
/// every request handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub bus: Arc<dyn EventBus>,
    pub hub: Arc<Hub>,
    pub dispatcher: Arc<Dispatcher>,
}

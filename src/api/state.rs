use std::sync::Arc;

use crate::diagnostics::BaselineStore;
use crate::heartbeat::Heartbeat;
use crate::storage::TriageJournal;

#[derive(Clone)]
pub struct AppState {
    pub heartbeat: Arc<Heartbeat>,
    pub store: Arc<dyn BaselineStore>,
    pub journal: Option<TriageJournal>,
}

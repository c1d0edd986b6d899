use std::sync::Arc;

use crate::{config::Settings, jobs::JobStore};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) settings: Arc<Settings>,
    pub(crate) jobs: JobStore,
}

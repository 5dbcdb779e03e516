// ABOUTME: Shared application state handed to every axum handler (HTTP and WebSocket)

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::registry::RegistryHandle;
use crate::resume::ResumeManager;
use crate::store::Store;
use crate::tmux::TmuxAdapter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub registry: RegistryHandle,
    pub resume: Arc<ResumeManager>,
    pub local_adapter: Arc<dyn TmuxAdapter>,
    pub remote_adapters: Arc<HashMap<String, Arc<dyn TmuxAdapter>>>,
    /// Fired once on shutdown so every open connection's hub loop can break
    /// and dispose its terminal proxies instead of leaking helper sessions.
    pub shutdown: broadcast::Sender<()>,
}

impl AppState {
    /// Resolves the tmux adapter responsible for a window, by its optional host.
    pub fn adapter_for(&self, host: Option<&str>) -> Arc<dyn TmuxAdapter> {
        match host {
            Some(h) => self
                .remote_adapters
                .get(h)
                .cloned()
                .unwrap_or_else(|| self.local_adapter.clone()),
            None => self.local_adapter.clone(),
        }
    }
}

use crate::config::Settings;
use crate::core::download::DownloadOrchestrator;
use crate::core::registry::Registries;
use crate::core::transfer::TransferEngine;
use crate::models::events::DownloadEvent;
use crate::utils::events::EventSink;
use parking_lot::RwLock;
use std::sync::Arc;

/// Application-wide collaborators shared by every collection.
pub struct AppContext {
    settings: RwLock<Settings>,
    registries: Registries,
    downloads: DownloadOrchestrator,
}

impl AppContext {
    /// Must be called within a tokio runtime; spawns the download loop.
    pub fn new(
        settings: Settings,
        registries: Registries,
        engine: Arc<dyn TransferEngine>,
        download_events: EventSink<DownloadEvent>,
    ) -> Arc<Self> {
        let downloads =
            DownloadOrchestrator::spawn(engine, settings.download_limit(), download_events);
        Arc::new(Self {
            settings: RwLock::new(settings),
            registries,
            downloads,
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// The download cap is fixed when the context is built; other keys apply to the next phase.
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.settings.write());
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn downloads(&self) -> &DownloadOrchestrator {
        &self.downloads
    }
}

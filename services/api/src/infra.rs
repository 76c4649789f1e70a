use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use makler::broker::{NotificationGateway, NotifyError};
use makler::config::StorageConfig;
use makler::store::{AgentId, FileStore, GoogleSheetsStore, RecordStore, StoreError, StoreMode};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Build the record store the configuration asks for. Remote mode that fails
/// to connect degrades to the local file store, loudly: the failure and the
/// selected mode are logged, and `RecordStore::mode()` keeps the degraded
/// state observable afterwards. Call off the async runtime; the sheets
/// client owns its own.
pub(crate) fn build_store(storage: &StorageConfig) -> Result<Arc<dyn RecordStore>, StoreError> {
    if let (Some(url), Some(credential)) = (&storage.sheet_url, &storage.credential) {
        match GoogleSheetsStore::connect(url, credential) {
            Ok(store) => {
                info!(mode = ?StoreMode::Remote, "record store connected");
                return Ok(Arc::new(makler::store::CachedStore::new(store)));
            }
            Err(err) => {
                warn!(%err, "remote store connection failed, degrading to local file store");
            }
        }
    } else {
        info!("no storage credentials configured, using local file store");
    }

    let store = FileStore::open(&storage.local_path)?;
    info!(mode = ?store.mode(), path = %storage.local_path.display(), "record store ready");
    Ok(Arc::new(store))
}

/// Stand-in adapter for the external chat platform: deliveries are logged and
/// reported as successful. The real bot consumes the same trait from its own
/// process; the broker never needs to know the difference.
#[derive(Debug, Default)]
pub(crate) struct LogNotificationGateway;

impl NotificationGateway for LogNotificationGateway {
    fn send_offer(
        &self,
        agent: AgentId,
        text: &str,
        purchase_action: &str,
    ) -> Result<(), NotifyError> {
        info!(agent = %agent, lead = purchase_action, text, "offer dispatched");
        Ok(())
    }

    fn broadcast(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        info!(channel, text, "channel announcement dispatched");
        Ok(())
    }
}

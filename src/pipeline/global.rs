//! Process-wide default pipeline.
//!
//! This is the only global in the crate. Everything else receives its
//! pipeline handle explicitly.

use crate::pipeline::host::Pipeline;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;

static GLOBAL: ArcSwapOption<Pipeline> = ArcSwapOption::const_empty();

/// Install `pipeline` as the process default, returning the previous one
pub fn set_global(pipeline: Arc<Pipeline>) -> Option<Arc<Pipeline>> {
    GLOBAL.swap(Some(pipeline))
}

/// Current process default, if one was installed
pub fn global() -> Option<Arc<Pipeline>> {
    GLOBAL.load_full()
}

/// Remove the process default without shutting it down
pub fn take_global() -> Option<Arc<Pipeline>> {
    GLOBAL.swap(None)
}

/// Remove the process default and shut it down.
///
/// True when there was nothing to shut down.
pub async fn shutdown_global(timeout: Duration) -> bool {
    match take_global() {
        Some(pipeline) => pipeline.shutdown(timeout).await,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::export::InMemoryExporter;

    #[tokio::test]
    async fn test_global_slot_lifecycle() {
        let exporter = InMemoryExporter::new();
        let pipeline = Arc::new(
            Pipeline::builder(exporter.clone())
                .config(Config::default())
                .build()
                .unwrap(),
        );

        assert!(set_global(Arc::clone(&pipeline)).is_none());
        let current = global().unwrap();
        assert!(Arc::ptr_eq(&current, &pipeline));

        assert!(shutdown_global(Duration::from_secs(5)).await);
        assert!(global().is_none());
        assert!(exporter.is_shut_down());
        assert!(shutdown_global(Duration::from_secs(1)).await);
    }
}

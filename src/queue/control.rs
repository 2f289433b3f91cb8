//! Global run flag

use crate::error::Result;
use crate::queue::RUN_KEY;
use crate::store::KvStore;

use std::sync::Arc;

/// Pause and resume every worker at once
#[derive(Clone)]
pub struct RunControl {
    store: Arc<dyn KvStore>,
}

impl RunControl {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Whether workers should pick up subtasks; an unset flag means paused
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.store.get(RUN_KEY).await?.as_deref() == Some("1"))
    }

    pub async fn pause(&self) -> Result<()> {
        self.store.set(RUN_KEY, "0").await?;
        tracing::info!("Paused all workers");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.store.set(RUN_KEY, "1").await?;
        tracing::info!("Resumed all workers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_flag_toggles() {
        let control = RunControl::new(Arc::new(MemoryStore::new()));
        assert!(!control.is_running().await.unwrap());
        control.resume().await.unwrap();
        assert!(control.is_running().await.unwrap());
        control.pause().await.unwrap();
        assert!(!control.is_running().await.unwrap());
    }
}

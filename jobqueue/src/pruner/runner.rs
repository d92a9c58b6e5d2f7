use std::{ops::Sub, time::Duration};

use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::JobStore;

use super::PrunerConfig;

pub(crate) struct PrunerRunner {
    config: PrunerConfig,
    store: JobStore,
}

impl PrunerRunner {
    pub fn new(store: JobStore, config: PrunerConfig) -> Self {
        Self { store, config }
    }

    pub fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn({
            async move {
                loop {
                    let Some(next) = self.config.schedule.upcoming(Utc).next() else {
                        tracing::warn!("No future scheduled time for the job pruner");
                        break;
                    };
                    let delay = next
                        .sub(Utc::now())
                        .sub(TimeDelta::milliseconds(10))
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            self.prune();
                            // Don't run twice for the same scheduled time.
                            if let Ok(delay) = (next - Utc::now()).to_std() {
                                tokio::time::sleep(delay).await;
                            }
                        }
                        _ = cancellation_token.cancelled() => {
                            tracing::debug!("Shutting down the job pruner");
                            break;
                        },
                    }
                }
            }
        })
    }

    pub(crate) fn prune(&self) {
        let removed: usize = self
            .config
            .pruners
            .iter()
            .map(|prune_spec| self.store.prune(prune_spec))
            .sum();
        tracing::debug!(removed, "Pruned {removed} jobs");
    }
}

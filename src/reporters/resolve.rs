//! Sink address resolution kept off the reporting path.
//!
//! The first lookup runs while the reporter is built (reload thread). If it
//! fails, the scheduler retries every [`RESOLVE_RETRY`] until it succeeds, and
//! `report` only ever reads the cached result.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::scheduler::{PeriodicTask, SchedulerHandle};

pub(crate) const RESOLVE_RETRY: Duration = Duration::from_secs(30);

pub(crate) struct Resolver {
    host: String,
    slot: Arc<ArcSwapOption<SocketAddr>>,
    retry: PeriodicTask,
}

impl Resolver {
    pub(crate) fn new(kind: &str, host: String, port: u16, scheduler: &SchedulerHandle) -> Self {
        Self::with_retry(kind, host, port, scheduler, RESOLVE_RETRY)
    }

    fn with_retry(
        kind: &str,
        host: String,
        port: u16,
        scheduler: &SchedulerHandle,
        retry_period: Duration,
    ) -> Self {
        let slot = Arc::new(ArcSwapOption::empty());
        resolve_into(&slot, kind, &host, port);

        let retry = {
            let slot = slot.clone();
            let kind = kind.to_string();
            let host = host.clone();
            scheduler.every(&format!("{kind}-resolve"), retry_period, move || {
                if slot.load().is_none() {
                    resolve_into(&slot, &kind, &host, port);
                }
            })
        };
        Self { host, slot, retry }
    }

    /// Cached address, `None` until a lookup has succeeded.
    pub(crate) fn addr(&self) -> Option<SocketAddr> {
        self.slot.load_full().map(|addr| *addr)
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn stop(&self) {
        self.retry.cancel();
    }
}

fn resolve_into(slot: &ArcSwapOption<SocketAddr>, kind: &str, host: &str, port: u16) {
    match (host, port).to_socket_addrs().map(|mut addrs| addrs.next()) {
        Ok(Some(addr)) => {
            tracing::debug!(reporter = %kind, host = %host, addr = %addr, "sink address resolved");
            slot.store(Some(Arc::new(addr)));
        }
        Ok(None) => {
            tracing::warn!(reporter = %kind, host = %host, "sink host resolved to no address, will retry");
        }
        Err(e) => {
            tracing::warn!(reporter = %kind, host = %host, error = %e, "cannot resolve sink host, will retry");
        }
    }
}

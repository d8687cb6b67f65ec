use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use crate::dataplane::{Dataplane, State};

pub(crate) const ROUTE_CONFIG_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically re-applies the route configuration so rules and routes
/// removed behind the agent's back come back.
pub(crate) fn start_route_config_syncer(
    state: Arc<Mutex<State>>,
    dataplane: Arc<Dataplane>,
    cancel: CancellationToken,
    span: Span,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(ROUTE_CONFIG_SYNC_INTERVAL);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                sync_route_config(&state, &dataplane).await;
            }
            debug!("route config syncer stopped");
        }
        .instrument(span),
    )
}

pub(crate) async fn sync_route_config(state: &Mutex<State>, dataplane: &Dataplane) {
    let state = state.lock().await;
    if let Err(e) = dataplane.update_host_network_dataplane(&state).await {
        warn!(%e, "error syncing host network routes");
    }
    if !state.is_gateway {
        return;
    }
    let Some(cable) = &state.cable_routing_interface else {
        return;
    };
    if let Err(e) = dataplane.update_gateway_dataplane(&state, cable).await {
        warn!(%e, "error syncing gateway routes");
    }
}

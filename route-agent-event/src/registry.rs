use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use route_agent_crds::v1::endpoint::Endpoint;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{ANY_NETWORK_PLUGIN, Error, Handler, HandlerError, HandlerResult, Result};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub enum Event {
    TransitionToGateway,
    TransitionToNonGateway,
    LocalEndpointCreated(Arc<Endpoint>),
    LocalEndpointUpdated(Arc<Endpoint>),
    LocalEndpointRemoved(Arc<Endpoint>),
    RemoteEndpointCreated(Arc<Endpoint>),
    RemoteEndpointUpdated(Arc<Endpoint>),
    RemoteEndpointRemoved(Arc<Endpoint>),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransitionToGateway => write!(f, "TransitionToGateway"),
            Self::TransitionToNonGateway => write!(f, "TransitionToNonGateway"),
            Self::LocalEndpointCreated(ep) => write!(f, "LocalEndpointCreated({})", ep.name_any()),
            Self::LocalEndpointUpdated(ep) => write!(f, "LocalEndpointUpdated({})", ep.name_any()),
            Self::LocalEndpointRemoved(ep) => write!(f, "LocalEndpointRemoved({})", ep.name_any()),
            Self::RemoteEndpointCreated(ep) => {
                write!(f, "RemoteEndpointCreated({})", ep.name_any())
            }
            Self::RemoteEndpointUpdated(ep) => {
                write!(f, "RemoteEndpointUpdated({})", ep.name_any())
            }
            Self::RemoteEndpointRemoved(ep) => {
                write!(f, "RemoteEndpointRemoved({})", ep.name_any())
            }
        }
    }
}

/// Fans events out to the handlers registered for the active network plugin.
pub struct Registry {
    network_plugin: String,
    handlers: Vec<Arc<dyn Handler>>,
    cancel: CancellationToken,
}

impl Registry {
    pub fn new(network_plugin: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            network_plugin: network_plugin.into(),
            handlers: Vec::new(),
            cancel,
        }
    }

    pub fn add_handlers(&mut self, handlers: impl IntoIterator<Item = Arc<dyn Handler>>) {
        for handler in handlers {
            let supported = handler
                .network_plugins()
                .iter()
                .any(|p| *p == ANY_NETWORK_PLUGIN || *p == self.network_plugin);
            if supported {
                info!(
                    "registering handler {} for network plugin {}",
                    handler.name(),
                    self.network_plugin
                );
                self.handlers.push(handler);
            } else {
                info!(
                    "skipping handler {}, it does not support network plugin {}",
                    handler.name(),
                    self.network_plugin
                );
            }
        }
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub async fn init(&self) -> Result<()> {
        for handler in &self.handlers {
            handler.init().await.map_err(|source| Error::Init {
                handler: handler.name(),
                source,
            })?;
        }
        Ok(())
    }

    /// Stops every handler; failures are logged and never stop the remaining handlers.
    pub async fn stop(&self, uninstall: bool) {
        for handler in &self.handlers {
            if let Err(e) = handler.stop(uninstall).await {
                error!(%e, "handler {} failed to stop", handler.name());
            }
        }
    }

    /// Delivers the event to every handler, retrying retryable failures with
    /// backoff. Returns `Ok(false)` if any handler gave up on the event.
    pub async fn dispatch(&self, event: &Event) -> Result<bool> {
        let mut delivered = true;
        for handler in &self.handlers {
            match self.deliver(handler.as_ref(), event).await {
                Ok(ok) => delivered &= ok,
                Err(source) => {
                    return Err(Error::Fatal {
                        handler: handler.name(),
                        event: event.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(delivered)
    }

    async fn deliver(&self, handler: &dyn Handler, event: &Event) -> std::result::Result<bool, HandlerError> {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            let err = match call(handler, event).await {
                Ok(()) => return Ok(true),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };
            if attempt == MAX_ATTEMPTS {
                error!(%err, "handler {} dropped {} after {} attempts", handler.name(), event, attempt);
                break;
            }
            warn!(%err, "handler {} failed to process {}, retrying in {:?}", handler.name(), event, backoff);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        Ok(false)
    }
}

async fn call(handler: &dyn Handler, event: &Event) -> HandlerResult {
    match event {
        Event::TransitionToGateway => handler.transition_to_gateway().await,
        Event::TransitionToNonGateway => handler.transition_to_non_gateway().await,
        Event::LocalEndpointCreated(ep) => handler.local_endpoint_created(ep).await,
        Event::LocalEndpointUpdated(ep) => handler.local_endpoint_updated(ep).await,
        Event::LocalEndpointRemoved(ep) => handler.local_endpoint_removed(ep).await,
        Event::RemoteEndpointCreated(ep) => handler.remote_endpoint_created(ep).await,
        Event::RemoteEndpointUpdated(ep) => handler.remote_endpoint_updated(ep).await,
        Event::RemoteEndpointRemoved(ep) => handler.remote_endpoint_removed(ep).await,
    }
}

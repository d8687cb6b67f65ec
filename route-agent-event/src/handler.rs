use async_trait::async_trait;
use route_agent_crds::v1::endpoint::Endpoint;

use crate::HandlerError;

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receives endpoint lifecycle and gateway role events. Every event method
/// defaults to doing nothing so handlers only implement what they react to.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Network plugins this handler applies to.
    fn network_plugins(&self) -> &[&'static str];

    async fn init(&self) -> HandlerResult {
        Ok(())
    }

    async fn stop(&self, _uninstall: bool) -> HandlerResult {
        Ok(())
    }

    async fn transition_to_gateway(&self) -> HandlerResult {
        Ok(())
    }

    async fn transition_to_non_gateway(&self) -> HandlerResult {
        Ok(())
    }

    async fn local_endpoint_created(&self, _endpoint: &Endpoint) -> HandlerResult {
        Ok(())
    }

    async fn local_endpoint_updated(&self, _endpoint: &Endpoint) -> HandlerResult {
        Ok(())
    }

    async fn local_endpoint_removed(&self, _endpoint: &Endpoint) -> HandlerResult {
        Ok(())
    }

    async fn remote_endpoint_created(&self, _endpoint: &Endpoint) -> HandlerResult {
        Ok(())
    }

    async fn remote_endpoint_updated(&self, _endpoint: &Endpoint) -> HandlerResult {
        Ok(())
    }

    async fn remote_endpoint_removed(&self, _endpoint: &Endpoint) -> HandlerResult {
        Ok(())
    }
}

use std::sync::Arc;

use kube::{Api, Client};
use route_agent_crds::v1::endpoint::Endpoint;
use route_agent_event::{EndpointWatcher, Handler, Registry};
use route_agent_ovn::controllers::WatchConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span};

use crate::Result;
use crate::config::ControllerArgs;

fn ovn_handler(args: &ControllerArgs, client: Client) -> Result<route_agent_ovn::Handler> {
    let watch_config = WatchConfig {
        client: client.clone(),
        resync_period: args.resync_period(),
        node_name: args.node_name.clone(),
    };
    let config = route_agent_ovn::HandlerConfig::new(
        args.namespace.clone(),
        args.cluster_cidr.clone(),
        args.service_cidr.clone(),
        watch_config,
        client,
    )
    .with_connection_options(args.connection_options())
    .with_span(info_span!("ovn", node = %args.node_name));
    Ok(route_agent_ovn::Handler::try_default(config)?)
}

fn registry(args: &ControllerArgs, client: Client, cancel: CancellationToken) -> Result<Registry> {
    let mut registry = Registry::new(args.network_plugin.clone(), cancel);
    let ovn: Arc<dyn Handler> = Arc::new(ovn_handler(args, client)?);
    registry.add_handlers([ovn]);
    Ok(registry)
}

/// Runs the handlers against the endpoint watch until cancelled or until a
/// handler fails fatally.
pub async fn start(args: ControllerArgs, cancel: CancellationToken) -> Result<()> {
    let client = Client::try_default().await?;
    let registry = Arc::new(registry(&args, client.clone(), cancel.child_token())?);
    info!("starting route agent with handlers {:?}", registry.handler_names());
    registry.init().await?;

    let api: Api<Endpoint> = Api::namespaced(client, &args.namespace);
    let watcher = EndpointWatcher::new(registry.clone(), args.cluster_id.clone(), args.node_name.clone());
    let result = watcher.run(api, cancel).await;
    registry.stop(false).await;
    Ok(result?)
}

/// Tears down node state left by the handlers.
pub async fn uninstall(args: ControllerArgs) -> Result<()> {
    let client = Client::try_default().await?;
    let registry = registry(&args, client, CancellationToken::new())?;
    info!("uninstalling route agent handlers {:?}", registry.handler_names());
    registry.stop(true).await;
    Ok(())
}

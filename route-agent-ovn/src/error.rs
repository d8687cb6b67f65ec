use route_agent_event::HandlerError;
use thiserror::Error;

type KernelError = route_agent_kernel::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JsonConversion(#[from] serde_json::Error),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("error initializing iptables: {0}")]
    PacketFilterUnavailable(#[source] KernelError),

    #[error("unable to find the default interface on host: {0}")]
    NoDefaultInterface(#[source] KernelError),

    #[error("wireguard interface {name} not found on the node: {source}")]
    WireguardInterface { name: &'static str, source: KernelError },

    #[error("cable routing interface is not known yet, local endpoint has not been processed")]
    CableInterfaceUnknown,

    #[error("error initializing iptables chains: {0}")]
    IptablesChains(#[source] KernelError),

    #[error("error updating host network dataplane: {0}")]
    HostNetworkDataplane(#[source] KernelError),

    #[error("error updating gateway dataplane: {0}")]
    GatewayDataplane(#[source] KernelError),

    #[error("error cleaning up gateway dataplane: {0}")]
    CleanupGatewayDataplane(#[source] KernelError),

    #[error("error adding no-masquerade rules for subnet {subnet:?}: {source}")]
    AddNoMasquerade { subnet: String, source: KernelError },

    #[error("error removing no-masquerade rules for subnet {subnet:?}: {source}")]
    RemoveNoMasquerade { subnet: String, source: KernelError },

    #[error("invalid CIDR {cidr:?}: {source}")]
    InvalidCidr {
        cidr: String,
        source: ipnetwork::IpNetworkError,
    },

    #[error("remote subnet {remote} overlaps local CIDR {local}")]
    OverlappingSubnets { remote: String, local: String },

    #[error("error connecting to the OVN northbound database: {0}")]
    ConnectionHandler(#[source] Box<Error>),

    #[error("timed out connecting to {0}")]
    ControlPlaneTimeout(String),

    #[error("unsupported control plane endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("control plane connection closed")]
    ConnectionClosed,

    #[error("database {0} is not served by the control plane")]
    DatabaseMissing(String),

    #[error("logical router {0} not found")]
    RouterNotFound(String),

    #[error("ovsdb error: {0}")]
    Ovsdb(String),

    #[error("failed to start {controller}: {source}")]
    RouteController {
        controller: &'static str,
        source: kube::Error,
    },
}

impl Error {
    /// Errors after which the agent cannot do anything useful on this node.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PacketFilterUnavailable(_) | Self::NoDefaultInterface(_))
    }
}

impl From<Error> for HandlerError {
    fn from(err: Error) -> Self {
        if err.is_fatal() {
            HandlerError::Fatal(Box::new(err))
        } else {
            HandlerError::Retryable(Box::new(err))
        }
    }
}

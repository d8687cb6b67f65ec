pub mod agent;
pub mod config;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error(transparent)]
    Ovn(#[from] route_agent_ovn::Error),

    #[error(transparent)]
    Event(#[from] route_agent_event::Error),

    #[error(transparent)]
    Crds(#[from] route_agent_crds::Error),

    #[error("task failed: {0}")]
    Task(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

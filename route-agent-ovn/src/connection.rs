use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::ovsdb::OvsdbClient;
use crate::{Error, Result};

/// Database schema subset the agent reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseModel {
    pub name: &'static str,
    pub tables: &'static [&'static str],
}

pub const OVN_NORTHBOUND: DatabaseModel = DatabaseModel {
    name: "OVN_Northbound",
    tables: &["Logical_Router", "Logical_Router_Static_Route"],
};

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// `unix:<path>` or `tcp:<host>:<port>`
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            endpoint: "unix:/var/run/ovn/ovnnb_db.sock".into(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Static route on a logical router. `external_ids` identify who owns it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StaticRoute {
    pub ip_prefix: String,
    pub nexthop: String,
    pub external_ids: BTreeMap<String, String>,
}

impl fmt::Display for StaticRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.ip_prefix, self.nexthop)
    }
}

/// A static route as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRoute {
    pub uuid: String,
    pub route: StaticRoute,
}

/// External id key naming the controller that owns a static route.
pub const OWNER_KEY: &str = "submariner.io/owner";

#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Static routes of `router` whose owner external id equals `owner`.
    async fn list_static_routes(&self, router: &str, owner: &str) -> Result<Vec<StoredRoute>>;

    async fn add_static_routes(&self, router: &str, routes: &[StaticRoute]) -> Result<()>;

    async fn delete_static_routes(&self, router: &str, uuids: &[String]) -> Result<()>;
}

/// Builds an unconnected control-plane client.
pub type NewControlPlaneClientFn =
    Arc<dyn Fn(&DatabaseModel, &ConnectionOptions) -> Result<Arc<dyn ControlPlaneClient>> + Send + Sync>;

pub fn new_ovsdb_client() -> NewControlPlaneClientFn {
    Arc::new(|model, options| {
        let client = OvsdbClient::new(model.clone(), options)?;
        Ok(Arc::new(client) as Arc<dyn ControlPlaneClient>)
    })
}

/// Connected control-plane client shared by the route controllers.
pub struct ConnectionHandler {
    client: Arc<dyn ControlPlaneClient>,
}

impl ConnectionHandler {
    pub async fn init_clients(new_client: &NewControlPlaneClientFn, options: &ConnectionOptions) -> Result<Arc<Self>> {
        let client = new_client(&OVN_NORTHBOUND, options)?;
        tokio::time::timeout(options.timeout, client.connect())
            .await
            .map_err(|_| Error::ControlPlaneTimeout(options.endpoint.clone()))??;
        info!("connected to {} at {}", OVN_NORTHBOUND.name, options.endpoint);
        Ok(Arc::new(Self { client }))
    }

    pub fn client(&self) -> &Arc<dyn ControlPlaneClient> {
        &self.client
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Keeps static routes in memory, keyed by router.
    #[derive(Default)]
    pub(crate) struct FakeControlPlane {
        pub routes: Mutex<BTreeMap<String, Vec<StoredRoute>>>,
        pub calls: Mutex<Vec<String>>,
        pub fail_connect: bool,
        next_uuid: Mutex<u32>,
    }

    impl FakeControlPlane {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn routes(&self, router: &str) -> Vec<StaticRoute> {
            self.routes
                .lock()
                .unwrap()
                .get(router)
                .map(|routes| routes.iter().map(|r| r.route.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ControlPlaneClient for FakeControlPlane {
        async fn connect(&self) -> Result<()> {
            self.calls.lock().unwrap().push("connect".into());
            if self.fail_connect {
                return Err(Error::ConnectionClosed);
            }
            Ok(())
        }

        async fn list_static_routes(&self, router: &str, owner: &str) -> Result<Vec<StoredRoute>> {
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(router)
                .map(|routes| {
                    routes
                        .iter()
                        .filter(|r| r.route.external_ids.get(OWNER_KEY).map(String::as_str) == Some(owner))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn add_static_routes(&self, router: &str, routes: &[StaticRoute]) -> Result<()> {
            let mut next = self.next_uuid.lock().unwrap();
            let mut stored = self.routes.lock().unwrap();
            for route in routes {
                self.calls.lock().unwrap().push(format!("add {route}"));
                *next += 1;
                stored.entry(router.to_string()).or_default().push(StoredRoute {
                    uuid: format!("uuid-{next}"),
                    route: route.clone(),
                });
            }
            Ok(())
        }

        async fn delete_static_routes(&self, router: &str, uuids: &[String]) -> Result<()> {
            let mut stored = self.routes.lock().unwrap();
            for uuid in uuids {
                self.calls.lock().unwrap().push(format!("delete {uuid}"));
            }
            if let Some(routes) = stored.get_mut(router) {
                routes.retain(|r| !uuids.contains(&r.uuid));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_init_clients_connects() {
        let fake = Arc::new(FakeControlPlane::default());
        let client = fake.clone();
        let new_client: NewControlPlaneClientFn = Arc::new(move |model, _| {
            assert_eq!(model.name, "OVN_Northbound");
            Ok(client.clone() as Arc<dyn ControlPlaneClient>)
        });

        ConnectionHandler::init_clients(&new_client, &ConnectionOptions::default())
            .await
            .expect("connected");
        assert_eq!(fake.calls(), vec!["connect"]);
    }

    #[tokio::test]
    async fn test_init_clients_propagates_failures() {
        let failing: NewControlPlaneClientFn = Arc::new(|_, options| Err(Error::InvalidEndpoint(options.endpoint.clone())));
        let err = ConnectionHandler::init_clients(&failing, &ConnectionOptions::default())
            .await
            .err()
            .expect("factory failure");
        assert!(matches!(err, Error::InvalidEndpoint(_)));

        let unreachable = Arc::new(FakeControlPlane {
            fail_connect: true,
            ..Default::default()
        });
        let new_client: NewControlPlaneClientFn =
            Arc::new(move |_, _| Ok(unreachable.clone() as Arc<dyn ControlPlaneClient>));
        let err = ConnectionHandler::init_clients(&new_client, &ConnectionOptions::default())
            .await
            .err()
            .expect("connect failure");
        assert!(matches!(err, Error::ConnectionClosed));
    }
}

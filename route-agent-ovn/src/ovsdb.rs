//! Minimal OVSDB management protocol client (RFC 7047), enough to maintain
//! static routes on an OVN logical router.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::connection::{ConnectionOptions, ControlPlaneClient, DatabaseModel, OWNER_KEY, StaticRoute, StoredRoute};
use crate::{Error, Result};

const LOGICAL_ROUTER: &str = "Logical_Router";
const STATIC_ROUTE: &str = "Logical_Router_Static_Route";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Unix(PathBuf),
    Tcp(String),
}

fn parse_target(endpoint: &str) -> Result<Target> {
    match endpoint.split_once(':') {
        Some(("unix", path)) if !path.is_empty() => Ok(Target::Unix(PathBuf::from(path))),
        Some(("tcp", addr)) if addr.contains(':') => Ok(Target::Tcp(addr.to_string())),
        _ => Err(Error::InvalidEndpoint(endpoint.to_string())),
    }
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Splits the first complete JSON value off `buf`, returning it with the
/// number of bytes consumed.
fn next_message(buf: &[u8]) -> Result<Option<(Value, usize)>> {
    let mut messages = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match messages.next() {
        Some(Ok(value)) => Ok(Some((value, messages.byte_offset()))),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}

struct Connection {
    stream: Box<dyn Transport>,
    buf: Vec<u8>,
}

impl Connection {
    fn new(stream: Box<dyn Transport>) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn open(target: &Target) -> Result<Self> {
        let stream: Box<dyn Transport> = match target {
            Target::Unix(path) => Box::new(UnixStream::connect(path).await?),
            Target::Tcp(addr) => Box::new(TcpStream::connect(addr).await?),
        };
        Ok(Self::new(stream))
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(message)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Value> {
        loop {
            if let Some((message, used)) = next_message(&self.buf)? {
                self.buf.drain(..used);
                return Ok(message);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Sends a request and waits for its response, answering server echo
    /// requests and skipping notifications meanwhile.
    async fn request(&mut self, id: u64, method: &str, params: Value) -> Result<Value> {
        self.send(&json!({ "method": method, "params": params, "id": id }))
            .await?;
        loop {
            let message = self.recv().await?;
            if message.get("method").and_then(Value::as_str) == Some("echo") {
                let reply = json!({ "result": message["params"], "error": null, "id": message["id"] });
                self.send(&reply).await?;
                continue;
            }
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                trace!(%message, "skipping unsolicited message");
                continue;
            }
            if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
                return Err(Error::Ovsdb(error.to_string()));
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

pub struct OvsdbClient {
    model: DatabaseModel,
    target: Target,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl OvsdbClient {
    pub fn new(model: DatabaseModel, options: &ConnectionOptions) -> Result<Self> {
        Ok(Self {
            model,
            target: parse_target(&options.endpoint)?,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issues a request, (re)opening the connection when needed. Transport
    /// failures drop the connection so the next call starts fresh.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            debug!("opening ovsdb connection to {:?}", self.target);
            *guard = Some(Connection::open(&self.target).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let result = conn.request(id, method, params).await;
        if matches!(
            result,
            Err(Error::IoError(_) | Error::ConnectionClosed | Error::JsonConversion(_))
        ) {
            *guard = None;
        }
        result
    }

    async fn transact(&self, operations: Vec<Value>) -> Result<Vec<Value>> {
        let mut params = vec![json!(self.model.name)];
        params.extend(operations);
        let Value::Array(results) = self.call("transact", Value::Array(params)).await? else {
            return Err(Error::Ovsdb("transact reply is not an array".into()));
        };
        for result in &results {
            if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
                let details = result.get("details").and_then(Value::as_str).unwrap_or_default();
                return Err(Error::Ovsdb(format!("{error}: {details}")));
            }
        }
        Ok(results)
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    let pairs: Vec<Value> = map.iter().map(|(k, v)| json!([k, v])).collect();
    json!(["map", pairs])
}

fn parse_string_map(value: &Value) -> BTreeMap<String, String> {
    let pairs = match value.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::Array(pairs)]) if tag == "map" => pairs,
        _ => return BTreeMap::new(),
    };
    pairs
        .iter()
        .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(k), Value::String(v)]) => Some((k.clone(), v.clone())),
            _ => None,
        })
        .collect()
}

/// UUIDs in either a single `["uuid", ..]` atom or a `["set", [..]]`.
fn parse_uuids(value: &Value) -> Vec<String> {
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::String(uuid)]) if tag == "uuid" => vec![uuid.clone()],
        Some([Value::String(tag), Value::Array(atoms)]) if tag == "set" => atoms.iter().flat_map(parse_uuids).collect(),
        _ => Vec::new(),
    }
}

fn rows(result: &Value) -> &[Value] {
    result
        .get("rows")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn list_routes_ops(router: &str, owner: &str) -> Vec<Value> {
    let owner_ids = BTreeMap::from([(OWNER_KEY.to_string(), owner.to_string())]);
    vec![
        json!({
            "op": "select",
            "table": LOGICAL_ROUTER,
            "where": [["name", "==", router]],
            "columns": ["static_routes"],
        }),
        json!({
            "op": "select",
            "table": STATIC_ROUTE,
            "where": [["external_ids", "includes", string_map(&owner_ids)]],
            "columns": ["_uuid", "ip_prefix", "nexthop", "external_ids"],
        }),
    ]
}

/// Routes from the second select that are attached to the router from the first.
fn stored_routes(router: &str, results: &[Value]) -> Result<Vec<StoredRoute>> {
    let [router_result, route_result, ..] = results else {
        return Err(Error::Ovsdb("short transact reply".into()));
    };
    let Some(router_row) = rows(router_result).first() else {
        return Err(Error::RouterNotFound(router.to_string()));
    };
    let attached: BTreeSet<String> = parse_uuids(&router_row["static_routes"]).into_iter().collect();

    Ok(rows(route_result)
        .iter()
        .filter_map(|row| {
            let uuid = parse_uuids(&row["_uuid"]).pop()?;
            if !attached.contains(&uuid) {
                return None;
            }
            Some(StoredRoute {
                uuid,
                route: StaticRoute {
                    ip_prefix: row["ip_prefix"].as_str()?.to_string(),
                    nexthop: row["nexthop"].as_str()?.to_string(),
                    external_ids: parse_string_map(&row["external_ids"]),
                },
            })
        })
        .collect())
}

fn add_routes_ops(router: &str, routes: &[StaticRoute]) -> Vec<Value> {
    let mut ops: Vec<Value> = routes
        .iter()
        .enumerate()
        .map(|(i, route)| {
            json!({
                "op": "insert",
                "table": STATIC_ROUTE,
                "row": {
                    "ip_prefix": route.ip_prefix,
                    "nexthop": route.nexthop,
                    "external_ids": string_map(&route.external_ids),
                },
                "uuid-name": format!("route{i}"),
            })
        })
        .collect();
    let named: Vec<Value> = (0..routes.len())
        .map(|i| json!(["named-uuid", format!("route{i}")]))
        .collect();
    ops.push(json!({
        "op": "mutate",
        "table": LOGICAL_ROUTER,
        "where": [["name", "==", router]],
        "mutations": [["static_routes", "insert", ["set", named]]],
    }));
    ops
}

fn delete_routes_ops(router: &str, uuids: &[String]) -> Vec<Value> {
    let refs: Vec<Value> = uuids.iter().map(|uuid| json!(["uuid", uuid])).collect();
    vec![json!({
        "op": "mutate",
        "table": LOGICAL_ROUTER,
        "where": [["name", "==", router]],
        "mutations": [["static_routes", "delete", ["set", refs]]],
    })]
}

fn mutated_rows(results: &[Value]) -> u64 {
    results
        .last()
        .and_then(|r| r.get("count"))
        .and_then(Value::as_u64)
        .unwrap_or_default()
}

#[async_trait]
impl ControlPlaneClient for OvsdbClient {
    async fn connect(&self) -> Result<()> {
        let dbs = self.call("list_dbs", json!([])).await?;
        let served = dbs
            .as_array()
            .is_some_and(|dbs| dbs.iter().any(|db| db.as_str() == Some(self.model.name)));
        if !served {
            return Err(Error::DatabaseMissing(self.model.name.to_string()));
        }
        Ok(())
    }

    async fn list_static_routes(&self, router: &str, owner: &str) -> Result<Vec<StoredRoute>> {
        let results = self.transact(list_routes_ops(router, owner)).await?;
        stored_routes(router, &results)
    }

    async fn add_static_routes(&self, router: &str, routes: &[StaticRoute]) -> Result<()> {
        if routes.is_empty() {
            return Ok(());
        }
        let results = self.transact(add_routes_ops(router, routes)).await?;
        if mutated_rows(&results) == 0 {
            return Err(Error::RouterNotFound(router.to_string()));
        }
        Ok(())
    }

    async fn delete_static_routes(&self, router: &str, uuids: &[String]) -> Result<()> {
        if uuids.is_empty() {
            return Ok(());
        }
        self.transact(delete_routes_ops(router, uuids)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("unix:/var/run/ovn/ovnnb_db.sock").expect("unix"),
            Target::Unix("/var/run/ovn/ovnnb_db.sock".into())
        );
        assert_eq!(
            parse_target("tcp:10.0.0.5:6641").expect("tcp"),
            Target::Tcp("10.0.0.5:6641".into())
        );
        assert!(parse_target("ssl:10.0.0.5:6641").is_err());
        assert!(parse_target("tcp:10.0.0.5").is_err());
        assert!(parse_target("unix:").is_err());
    }

    #[test]
    fn test_next_message_handles_partial_and_batched_input() {
        assert!(next_message(br#"{"id": 1, "res"#).expect("partial").is_none());
        assert!(next_message(b"  ").expect("whitespace").is_none());

        let buf = br#"{"id":1}{"id":2}"#;
        let (first, used) = next_message(buf).expect("first").expect("complete");
        assert_eq!(first["id"], 1);
        let (second, _) = next_message(&buf[used..]).expect("second").expect("complete");
        assert_eq!(second["id"], 2);

        assert!(next_message(b"}{").is_err());
    }

    #[test]
    fn test_stored_routes_only_returns_attached_routes() {
        let results = vec![
            json!({"rows": [{"static_routes": ["set", [["uuid", "a"], ["uuid", "b"]]]}]}),
            json!({"rows": [
                {
                    "_uuid": ["uuid", "a"],
                    "ip_prefix": "10.1.0.0/16",
                    "nexthop": "100.64.0.2",
                    "external_ids": ["map", [["submariner.io/owner", "gateway-route"]]],
                },
                {
                    "_uuid": ["uuid", "orphan"],
                    "ip_prefix": "10.2.0.0/16",
                    "nexthop": "100.64.0.2",
                    "external_ids": ["map", [["submariner.io/owner", "gateway-route"]]],
                },
            ]}),
        ];
        let routes = stored_routes("ovn_cluster_router", &results).expect("routes");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].uuid, "a");
        assert_eq!(routes[0].route.ip_prefix, "10.1.0.0/16");
        assert_eq!(
            routes[0].route.external_ids.get(OWNER_KEY).map(String::as_str),
            Some("gateway-route")
        );

        // a single attached route comes back as a bare uuid atom
        let results = vec![json!({"rows": [{"static_routes": ["uuid", "a"]}]}), results[1].clone()];
        assert_eq!(stored_routes("ovn_cluster_router", &results).expect("routes").len(), 1);

        let missing = vec![json!({"rows": []}), json!({"rows": []})];
        assert!(matches!(
            stored_routes("ovn_cluster_router", &missing),
            Err(Error::RouterNotFound(_))
        ));
    }

    #[test]
    fn test_add_routes_ops_reference_inserted_rows() {
        let route = StaticRoute {
            ip_prefix: "10.1.0.0/16".into(),
            nexthop: "100.64.0.2".into(),
            external_ids: BTreeMap::from([(OWNER_KEY.to_string(), "gateway-route".to_string())]),
        };
        let ops = add_routes_ops("ovn_cluster_router", &[route.clone(), route]);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0]["uuid-name"], "route0");
        assert_eq!(ops[1]["row"]["external_ids"], json!(["map", [["submariner.io/owner", "gateway-route"]]]));
        assert_eq!(
            ops[2]["mutations"][0][2],
            json!(["set", [["named-uuid", "route0"], ["named-uuid", "route1"]]])
        );
        assert_eq!(mutated_rows(&[json!({"uuid": ["uuid", "x"]}), json!({"count": 1})]), 1);
    }

    async fn read_message(buf: &mut Vec<u8>, stream: &mut DuplexStream) -> Value {
        loop {
            if let Some((message, used)) = next_message(buf).expect("json") {
                buf.drain(..used);
                return message;
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "client hung up");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn test_request_answers_echo_and_skips_notifications() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(Box::new(client));

        let server = tokio::spawn(async move {
            let mut buf = Vec::new();
            let request = read_message(&mut buf, &mut server).await;
            assert_eq!(request["method"], "list_dbs");

            server
                .write_all(br#"{"method":"echo","params":["ping"],"id":"echo"}"#)
                .await
                .expect("write");
            let echo = read_message(&mut buf, &mut server).await;
            assert_eq!(echo["id"], "echo");
            assert_eq!(echo["result"], json!(["ping"]));

            server
                .write_all(br#"{"method":"update","params":[null,{}],"id":null}"#)
                .await
                .expect("write");
            let reply = json!({"result": ["OVN_Northbound"], "error": null, "id": request["id"]});
            server
                .write_all(&serde_json::to_vec(&reply).expect("json"))
                .await
                .expect("write");
        });

        let result = conn.request(7, "list_dbs", json!([])).await.expect("result");
        assert_eq!(result, json!(["OVN_Northbound"]));
        server.await.expect("server");
    }
}

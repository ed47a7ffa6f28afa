#![allow(dead_code)]
use std::{sync::Once, time::Duration};

use ravendb_client::{
    document_conventions::DocumentConventions,
    raven_command::{CommandRequest, RavenCommand, ResponseType},
    request_executor::RequestExecutor,
    server_node::ServerNode,
};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const DATABASE: &str = "Northwind";
pub const DOCS_PATH: &str = "/databases/Northwind/docs";

static TRACING: Once = Once::new();

/// Logs are only printed when `TEST_LOG` is set, since most tests expect failures.
pub fn init_tracing() {
    TRACING.call_once(|| {
        if std::env::var("TEST_LOG").is_err() {
            return;
        }
        LogTracer::init().expect("Failed to set logger");
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let formatting_layer =
            BunyanFormattingLayer::new("ravendb-client-test".into(), std::io::stdout);
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonStorageLayer)
            .with(formatting_layer);
        set_global_default(subscriber).expect("Failed to set subscriber");
    });
}

/// A handful of mock nodes making up one database group.
pub struct TestCluster {
    pub servers: Vec<MockServer>,
}

impl TestCluster {
    pub async fn start(nodes: usize) -> Self {
        init_tracing();
        let mut servers = Vec::with_capacity(nodes);
        for _ in 0..nodes {
            servers.push(MockServer::start().await);
        }
        Self { servers }
    }

    pub fn url(&self, index: usize) -> Url {
        Url::parse(&self.servers[index].uri()).expect("Mock server uri is a valid url")
    }

    pub fn urls(&self) -> Vec<Url> {
        (0..self.servers.len()).map(|i| self.url(i)).collect()
    }

    pub fn tag(index: usize) -> String {
        ((b'A' + index as u8) as char).to_string()
    }

    pub fn node(&self, index: usize) -> ServerNode {
        ServerNode::new(self.url(index), DATABASE.to_string()).with_cluster_tag(&Self::tag(index))
    }

    /// `/topology` body listing the given nodes in order.
    pub fn topology_body(&self, etag: i64, order: &[usize]) -> serde_json::Value {
        let nodes = order
            .iter()
            .map(|&i| {
                json!({
                    "Url": self.servers[i].uri(),
                    "ClusterTag": Self::tag(i),
                    "Database": DATABASE,
                    "ServerRole": "Member",
                })
            })
            .collect::<Vec<_>>();
        json!({ "Etag": etag, "Nodes": nodes })
    }

    /// Serves a topology with every node, in order, from the first node.
    pub async fn mount_topology(&self, etag: i64) {
        let order = (0..self.servers.len()).collect::<Vec<_>>();
        Mock::given(method("GET"))
            .and(path("/topology"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.topology_body(etag, &order)))
            .mount(&self.servers[0])
            .await;
    }

    pub fn executor(&self, conventions: DocumentConventions) -> RequestExecutor {
        RequestExecutor::create(self.urls(), DATABASE, conventions, reqwest::Client::new())
            .expect("Failed to create request executor")
    }

    /// Number of requests `server` received on `request_path`.
    pub async fn hits(&self, server: usize, request_path: &str) -> usize {
        self.servers[server]
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }

    /// Polls until `server` received `expected` requests on `request_path`, or a second went by.
    pub async fn wait_for_hits(&self, server: usize, request_path: &str, expected: usize) -> usize {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let hits = self.hits(server, request_path).await;
            if hits >= expected || tokio::time::Instant::now() >= deadline {
                return hits;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// What [`ReadDocument`] saw of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub body: Option<String>,
    pub from_cache: bool,
}

/// Reads `/databases/{database}/docs?id={id}` and hands the body back untouched.
pub struct ReadDocument {
    pub id: String,
}

impl ReadDocument {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl RavenCommand for ReadDocument {
    type Output = ReadResult;

    fn is_read_request(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        Ok(CommandRequest::get(docs_url(node, &self.id)?))
    }

    fn set_response(
        &self,
        response: Option<&str>,
        from_cache: bool,
    ) -> anyhow::Result<Self::Output> {
        Ok(ReadResult {
            body: response.map(str::to_string),
            from_cache,
        })
    }
}

fn docs_url(node: &ServerNode, id: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(&format!(
        "{}/databases/{}/docs",
        node.base_url(),
        node.database
    ))?;
    url.query_pairs_mut().append_pair("id", id);
    Ok(url)
}

/// Stores a document with `PUT /databases/{database}/docs?id={id}`.
pub struct WriteDocument {
    pub id: String,
}

impl WriteDocument {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl RavenCommand for WriteDocument {
    type Output = ();

    fn is_read_request(&self) -> bool {
        false
    }

    fn response_type(&self) -> ResponseType {
        ResponseType::Empty
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        Ok(CommandRequest::get(docs_url(node, &self.id)?)
            .with_body(reqwest::Method::PUT, "{}".to_string()))
    }

    fn set_response(&self, _response: Option<&str>, _from_cache: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Downloads `/databases/{database}/attachments?name={name}` as raw bytes.
pub struct ReadAttachment {
    pub name: String,
}

impl ReadAttachment {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl RavenCommand for ReadAttachment {
    type Output = Vec<u8>;

    fn is_read_request(&self) -> bool {
        true
    }

    fn response_type(&self) -> ResponseType {
        ResponseType::Raw
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        let mut url = Url::parse(&format!(
            "{}/databases/{}/attachments",
            node.base_url(),
            node.database
        ))?;
        url.query_pairs_mut().append_pair("name", &self.name);
        Ok(CommandRequest::get(url))
    }

    fn set_response(&self, _response: Option<&str>, _from_cache: bool) -> anyhow::Result<Vec<u8>> {
        Err(anyhow::anyhow!("Attachments are only read as raw bytes"))
    }

    fn set_response_raw(&self, response: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(response.to_vec())
    }
}

/// A node that answers every request with the headers and the first byte of a json body, then
/// goes silent.
pub struct StallingNode {
    pub url: Url,
}

impl StallingNode {
    pub async fn start() -> Self {
        Self::start_with_status("200 OK").await
    }

    pub async fn start_with_status(status: &'static str) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stalling node");
        let address = listener.local_addr().expect("Listener has an address");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(read) => request.extend_from_slice(&buf[..read]),
                        }
                    }
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{{",
                        status
                    );
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        Self {
            url: Url::parse(&format!("http://{}", address)).expect("Valid stalling node url"),
        }
    }
}

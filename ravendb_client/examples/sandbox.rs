//! Asks a node where its tcp endpoint lives and negotiates a heartbeats connection with it.
use ravendb_client::{
    document_conventions::DocumentConventions,
    raven_command::GetTcpInfoCommand,
    request_executor::ClusterRequestExecutor,
    tcp::{connect_tcp, negotiate_protocol_version, OperationType, TcpNegotiateParameters},
};
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("RAVEN_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    let executor = ClusterRequestExecutor::create_for_single_node(
        Url::parse(&url)?,
        DocumentConventions::default(),
        reqwest::Client::new(),
    );
    let info = executor
        .execute(&GetTcpInfoCommand::new("sandbox"), None)
        .await?;
    dbg!(&info);

    let mut stream = connect_tcp(&info).await?;
    let parameters = TcpNegotiateParameters::new(OperationType::Heartbeats, info.url.as_str());
    let features = negotiate_protocol_version(&mut stream, &parameters).await?;
    dbg!(features);

    executor.dispose();
    Ok(())
}

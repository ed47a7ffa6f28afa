use ravendb_client::{
    raven_command::{GetClusterTopologyCommand, GetDocumentsCommand},
    DocumentStoreBuilder,
};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let scheme: String = std::env::var("RAVEN_SCHEME").unwrap_or_else(|_| "http".to_string());
    let database = std::env::var("RAVEN_DATABASE").unwrap_or_else(|_| "Northwind".to_string());

    let mut document_store = DocumentStoreBuilder::new().set_database_name(&database);
    if scheme == "https" {
        document_store = document_store
            .set_client_certificate("ravendb-client_dev_cert.pem")
            .set_urls(&["https://a.free.damccull.ravendb.cloud"]);
    } else {
        document_store = document_store.set_urls(&["http://localhost:8080"]);
    }

    let document_store = document_store.build()?;

    let cluster = document_store.get_cluster_request_executor().await?;
    match cluster
        .execute(&GetClusterTopologyCommand::new(), None)
        .await
    {
        Ok((info, topology)) => {
            println!("{:#?}", info);
            println!("Cluster nodes: {:#?}", topology.nodes);
        }
        Err(e) => {
            tracing::error!("Error happened: {}", &e);
            return Err(e.into());
        }
    };

    let executor = document_store.get_request_executor(None).await?;
    let documents = executor
        .execute(&GetDocumentsCommand::by_ids(&["employees/1-A"]), None)
        .await?;
    println!("{:#?}", documents);
    println!("Database topology: {:#?}", executor.get_topology());

    document_store.close().await?;
    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    // Set up tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("ravendb-client-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}

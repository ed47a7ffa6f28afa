/*!
ravendb_client is a client library for the RavenDB document database.
It aims to compete with the existing libraries officially offered, but
using more rusty ways of doing things.

This library requires tokio and async, and uses the actor pattern to maintain
a single instance of the [`DocumentStore`] per cluster, as recommended by the
official libraries. This is designed to keep resource usage in your app to a minimum.

The [`DocumentStore`] hands out one [`RequestExecutor`](request_executor::RequestExecutor) per
database. The executor knows the topology of the database, picks the node each
[`RavenCommand`](raven_command::RavenCommand) runs on, caches responses, and fails over to
another node when one goes down.

# Example
```rust,no_run
# async fn run() -> Result<(), Box<dyn std::error::Error>> {
use ravendb_client::{raven_command::GetDocumentsCommand, DocumentStoreBuilder};

let document_store = DocumentStoreBuilder::new()
    .set_urls(&["http://localhost:8080"])
    .set_database_name("Northwind")
    .build()?;

let executor = document_store.get_request_executor(None).await?;
let documents = executor
    .execute(&GetDocumentsCommand::by_ids(&["employees/1-A"]), None)
    .await?;
println!("{:?}", documents);

document_store.close().await?;
# Ok(())
# }
```
*/

mod document_store;

pub mod client_configuration;
pub mod cluster_topology;
pub mod database_topology;
pub mod document_conventions;
pub mod events;
pub mod exception_dispatcher;
pub mod http_cache;
pub mod node_selector;
pub mod node_status;
pub mod raven_command;
pub mod ravendb_error;
pub mod request_executor;
pub mod server_node;
pub mod tcp;
pub mod topology;

pub use document_store::*;

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use crate::{
    request_executor::{ClusterRequestExecutor, RequestExecutor},
    run_document_store_actor, DocumentStoreActor, DocumentStoreBuilder, DocumentStoreError,
    DocumentStoreInitialConfiguration, DocumentStoreMessage,
};

/**
This a handle to the actor.

Only one DocumentStoreActor should exist per database cluster when possible to reduce resource
usage. Cloning this handle is very cheap and will not instantiate a new actor in the background.
It is recommended to clone this handle to each component that needs to talk to the DocumentStoreActor.
When the last handle goes out of scope and it dropped, the backing actor will also be dropped
and every [`RequestExecutor`] it created is disposed.

```rust
# tokio_test::block_on(async {
use ravendb_client::DocumentStoreBuilder;

let document_store = DocumentStoreBuilder::new()
    .set_urls(&["http://localhost:8080"])
    .set_database_name("Northwind")
    .build()
    .unwrap();
let executor = document_store.get_request_executor(None).await.unwrap();
assert_eq!(executor.topology_source().database(), Some("Northwind"));
document_store.close().await.unwrap();
# })
```
*/
#[derive(Clone, Debug)]
pub struct DocumentStore {
    sender: mpsc::Sender<DocumentStoreMessage>,
}

impl DocumentStore {
    pub fn builder() -> DocumentStoreBuilder {
        DocumentStoreBuilder::default()
    }

    // This is pub(crate) so only the builder can crank it out
    pub(crate) fn new(initial_config: DocumentStoreInitialConfiguration) -> Self {
        let (sender, receiver) = mpsc::channel(8);
        let actor = DocumentStoreActor::new(receiver, initial_config);
        tokio::spawn(run_document_store_actor(actor));

        Self { sender }
    }

    /// Returns the [`RequestExecutor`] for `database_name`, or for the store's default database
    /// when `None`. Executors are created once per database and shared afterwards.
    #[instrument(
        level = "debug",
        name = "Actor Handle - Get Request Executor",
        skip(self)
    )]
    pub async fn get_request_executor(
        &self,
        database_name: Option<String>,
    ) -> Result<RequestExecutor, DocumentStoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DocumentStoreMessage::GetRequestExecutor {
                database_name,
                respond_to: tx,
            })
            .await
            .map_err(|_| DocumentStoreError::Closed)?;
        rx.await.context("DocumentStoreActor task has been killed")?
    }

    #[instrument(
        level = "debug",
        name = "Actor Handle - Get Cluster Request Executor",
        skip(self)
    )]
    pub async fn get_cluster_request_executor(
        &self,
    ) -> Result<ClusterRequestExecutor, DocumentStoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DocumentStoreMessage::GetClusterRequestExecutor { respond_to: tx })
            .await
            .map_err(|_| DocumentStoreError::Closed)?;
        rx.await.context("DocumentStoreActor task has been killed")?
    }

    /// The default database, if one was configured.
    pub async fn get_database(&self) -> Result<Option<String>, DocumentStoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DocumentStoreMessage::GetDatabase { respond_to: tx })
            .await
            .map_err(|_| DocumentStoreError::Closed)?;
        Ok(rx.await.context("DocumentStoreActor task has been killed")?)
    }

    /// Disposes every executor created by this store. Later requests for an executor fail with
    /// [`DocumentStoreError::Closed`].
    #[instrument(level = "debug", name = "Actor Handle - Close", skip(self))]
    pub async fn close(&self) -> Result<(), DocumentStoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DocumentStoreMessage::Close { respond_to: tx })
            .await
            .map_err(|_| DocumentStoreError::Closed)?;
        Ok(rx.await.context("DocumentStoreActor task has been killed")?)
    }
}

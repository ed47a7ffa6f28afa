use std::collections::HashMap;

use reqwest::Url;
use tokio::sync::mpsc;
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    document_conventions::DocumentConventions,
    request_executor::{ClusterRequestExecutor, RequestExecutor},
    DocumentStoreError, DocumentStoreInitialConfiguration, DocumentStoreMessage,
    DocumentStoreState,
};

pub struct DocumentStoreActor {
    cluster_request_executor: Option<ClusterRequestExecutor>,
    conventions: DocumentConventions,
    database_name: Option<String>,
    http_client: reqwest::Client,
    initial_urls: Vec<Url>,
    receiver: mpsc::Receiver<DocumentStoreMessage>,
    request_executors: HashMap<String, RequestExecutor>,
    state: DocumentStoreState,
}
impl DocumentStoreActor {
    pub fn new(
        receiver: mpsc::Receiver<DocumentStoreMessage>,
        initial_config: DocumentStoreInitialConfiguration,
    ) -> Self {
        Self {
            cluster_request_executor: None,
            conventions: initial_config.conventions,
            database_name: initial_config.database_name,
            http_client: initial_config.http_client,
            initial_urls: initial_config.initial_urls,
            receiver,
            request_executors: HashMap::default(),
            state: DocumentStoreState::Initialized,
        }
    }

    /// Message handler for the DocumentStoreActor
    #[instrument(
        level = "debug",
        name = "DocumentStore Actor - Handle Message",
        skip(self),
        fields(correlation_id)
    )]
    fn handle_message(&mut self, msg: DocumentStoreMessage) {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            DocumentStoreMessage::GetDatabase { respond_to } => {
                let _ = respond_to.send(self.database_name.clone());
            }
            DocumentStoreMessage::GetRequestExecutor {
                database_name,
                respond_to,
            } => {
                let result = self.get_request_executor(database_name);
                let _ = respond_to.send(result);
            }
            DocumentStoreMessage::GetClusterRequestExecutor { respond_to } => {
                let result = self.get_cluster_request_executor();
                let _ = respond_to.send(result);
            }
            DocumentStoreMessage::Close { respond_to } => {
                self.close();
                let _ = respond_to.send(());
            }
        }
    }

    /// See doc comments for [`DocumentStore`](crate::DocumentStore::get_request_executor)
    #[instrument(level = "debug", skip(self))]
    fn get_request_executor(
        &mut self,
        database: Option<String>,
    ) -> Result<RequestExecutor, DocumentStoreError> {
        if self.state == DocumentStoreState::Closed {
            return Err(DocumentStoreError::Closed);
        }

        // Get the database name that was passed in, or from the document store
        let database = match database.or_else(|| self.database_name.clone()) {
            Some(db) => db,
            None => return Err(DocumentStoreError::MissingDatabaseError),
        };

        // See if there is a stored executor for the database
        if let Some(executor) = self.request_executors.get(&database) {
            return Ok(executor.clone());
        }

        let executor = if self.conventions.disable_topology_updates() {
            // Talks to a single, specific server, ignoring topology
            let url = self
                .initial_urls
                .first()
                .cloned()
                .ok_or(DocumentStoreError::MissingUrlsError)?;
            RequestExecutor::create_for_single_node_with_configuration_updates(
                url,
                &database,
                self.conventions.clone(),
                self.http_client.clone(),
            )
        } else {
            RequestExecutor::create(
                self.initial_urls.clone(),
                &database,
                self.conventions.clone(),
                self.http_client.clone(),
            )?
        };

        // Clone the executor handle store it in the document store
        self.request_executors.insert(database, executor.clone());

        // Send the executor handle back to the requestor
        Ok(executor)
    }

    #[instrument(level = "debug", skip(self))]
    fn get_cluster_request_executor(&mut self) -> Result<ClusterRequestExecutor, DocumentStoreError> {
        if self.state == DocumentStoreState::Closed {
            return Err(DocumentStoreError::Closed);
        }

        if let Some(executor) = &self.cluster_request_executor {
            return Ok(executor.clone());
        }

        let executor = if self.conventions.disable_topology_updates() {
            let url = self
                .initial_urls
                .first()
                .cloned()
                .ok_or(DocumentStoreError::MissingUrlsError)?;
            ClusterRequestExecutor::create_for_single_node(
                url,
                self.conventions.clone(),
                self.http_client.clone(),
            )
        } else {
            ClusterRequestExecutor::create(
                self.initial_urls.clone(),
                self.conventions.clone(),
                self.http_client.clone(),
            )?
        };

        self.cluster_request_executor = Some(executor.clone());
        Ok(executor)
    }

    fn close(&mut self) {
        if self.state == DocumentStoreState::Closed {
            return;
        }
        tracing::debug!(
            "Closing document store with {} request executor(s)",
            self.request_executors.len()
        );
        for (_, executor) in self.request_executors.drain() {
            executor.dispose();
        }
        if let Some(executor) = self.cluster_request_executor.take() {
            executor.dispose();
        }
        self.state = DocumentStoreState::Closed;
    }
}

#[instrument(level = "debug", name = "Running Document Store Actor", skip(actor))]
pub async fn run_document_store_actor(mut actor: DocumentStoreActor) {
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg);
    }
    // Every handle is gone
    actor.close();
}

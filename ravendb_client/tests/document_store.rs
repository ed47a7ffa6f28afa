#![allow(non_snake_case)]
mod common;

use common::{ReadDocument, TestCluster, DATABASE, DOCS_PATH};
use ravendb_client::{request_executor::RequestExecutorError, DocumentStoreBuilder, DocumentStoreError};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

#[tokio::test]
async fn document_store_hands_out_one_executor_per_database() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    let document_store = DocumentStoreBuilder::new()
        .set_urls(&[cluster.servers[0].uri()])
        .set_database_name(DATABASE)
        .build()
        .unwrap();

    // Act
    let first = document_store.get_request_executor(None).await.unwrap();
    let second = document_store
        .get_request_executor(Some(DATABASE.to_string()))
        .await
        .unwrap();
    let other = document_store
        .get_request_executor(Some("Orders".to_string()))
        .await
        .unwrap();

    // Assert
    assert_eq!(first.application_id(), second.application_id());
    assert_ne!(first.application_id(), other.application_id());
    assert_eq!(other.topology_source().database(), Some("Orders"));
}

#[tokio::test]
async fn document_store_requires_a_database_name() {
    let cluster = TestCluster::start(1).await;
    let document_store = DocumentStoreBuilder::new()
        .set_urls(&[cluster.servers[0].uri()])
        .build()
        .unwrap();

    let result = document_store.get_request_executor(None).await;

    assert!(matches!(result, Err(DocumentStoreError::MissingDatabaseError)));
}

#[tokio::test]
async fn closing_the_document_store_disposes_its_executors() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    Mock::given(method("GET"))
        .and(path(DOCS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&cluster.servers[0])
        .await;
    let document_store = DocumentStoreBuilder::new()
        .set_urls(&[cluster.servers[0].uri()])
        .set_database_name(DATABASE)
        .build()
        .unwrap();
    let executor = document_store.get_request_executor(None).await.unwrap();
    executor
        .execute(&ReadDocument::new("users/1"), None)
        .await
        .unwrap();

    // Act
    document_store.close().await.unwrap();

    // Assert
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;
    assert!(matches!(result, Err(RequestExecutorError::Disposed)));
    assert!(document_store.get_request_executor(None).await.is_err());
}

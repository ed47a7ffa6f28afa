#![allow(non_snake_case)]
mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{
    ReadAttachment, ReadDocument, StallingNode, TestCluster, WriteDocument, DATABASE, DOCS_PATH,
};
use ravendb_client::{
    document_conventions::{DocumentConventions, ReadBalanceBehavior},
    events::RequestEvent,
    raven_command::GetClientConfigurationCommand,
    ravendb_error::RavenDbError,
    request_executor::{
        RequestExecutor, RequestExecutorError, SessionInfo, UpdateTopologyParameters,
    },
    topology::SINGLE_NODE_TOPOLOGY_ETAG,
};
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, ResponseTemplate,
};

async fn mount_docs(cluster: &TestCluster, server: usize, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(DOCS_PATH))
        .respond_with(response)
        .mount(&cluster.servers[server])
        .await;
}

#[tokio::test]
async fn execute_reads_from_the_first_node_of_the_fetched_topology() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert_eq!(result.unwrap().body.as_deref(), Some("{}"));
    assert_eq!(executor.topology_etag(), Some(1));
    assert_eq!(executor.get_topology_nodes().unwrap(), vec![cluster.node(0), cluster.node(1)]);
    assert_eq!(executor.topology_taken_from_node(), Some(cluster.node(0)));
    assert_eq!(cluster.hits(1, DOCS_PATH).await, 0);
}

#[tokio::test]
async fn execute_fails_over_to_the_next_node_when_the_first_is_down() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(503)).await;
    mount_docs(&cluster, 1, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let first = executor.execute(&ReadDocument::new("users/1"), None).await;
    let second = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert!(first.is_ok());
    assert!(second.is_ok());
    // The failed node is skipped until its health check passes.
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 1);
    assert_eq!(cluster.hits(1, DOCS_PATH).await, 2);
}

#[tokio::test]
async fn execute_fails_over_at_most_once() {
    // Arrange
    let cluster = TestCluster::start(3).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(503)).await;
    mount_docs(&cluster, 1, ResponseTemplate::new(502)).await;
    mount_docs(&cluster, 2, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    match result {
        Err(RequestExecutorError::AllTopologyNodesDown { failures, .. }) => {
            let nodes = failures.iter().map(|f| f.node.clone()).collect::<Vec<_>>();
            assert_eq!(nodes, vec![cluster.node(0), cluster.node(1)]);
        }
        other => panic!("Expected AllTopologyNodesDown, got {:?}", other),
    }
    assert_eq!(cluster.hits(2, DOCS_PATH).await, 0);
}

#[tokio::test]
async fn all_nodes_down_error_names_every_failed_url() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(503)).await;
    mount_docs(&cluster, 1, ResponseTemplate::new(504)).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let error = executor
        .execute(&ReadDocument::new("users/1"), None)
        .await
        .unwrap_err();

    // Assert
    let message = error.to_string();
    assert!(message.contains(cluster.servers[0].uri().as_str()), "{}", message);
    assert!(message.contains(cluster.servers[1].uri().as_str()), "{}", message);
}

#[tokio::test]
async fn execute_fails_over_when_a_node_times_out() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200).set_delay(Duration::from_millis(800)),
    )
    .await;
    mount_docs(&cluster, 1, ResponseTemplate::new(200).set_body_string("{}")).await;
    let conventions =
        DocumentConventions::default().set_request_timeout(Duration::from_millis(200));
    let executor = cluster.executor(conventions);

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert_eq!(result.unwrap().body.as_deref(), Some("{}"));
}

#[tokio::test]
async fn not_modified_response_is_served_from_the_cache() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    Mock::given(method("GET"))
        .and(path(DOCS_PATH))
        .and(header("If-None-Match", "\"cv-1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&cluster.servers[0])
        .await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("ETag", "\"cv-1\"")
            .set_body_string(r#"{"Results":[]}"#),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());
    let command = ReadDocument::new("users/1");

    // Act
    let first = executor.execute(&command, None).await.unwrap();
    let second = executor.execute(&command, None).await.unwrap();

    // Assert
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.body, first.body);
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 2);
}

#[tokio::test]
async fn no_caching_session_leaves_the_cache_empty() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("ETag", "\"cv-1\"")
            .set_body_string("{}"),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());
    let mut session = SessionInfo::new(7);
    session.no_caching = true;

    // Act
    executor
        .execute(&ReadDocument::new("users/1"), Some(&session))
        .await
        .unwrap();

    // Assert
    assert_eq!(executor.cache().number_of_items(), 0);
}

#[tokio::test]
async fn not_found_is_cached_as_a_negative_result() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(404)).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor
        .execute(&ReadDocument::new("missing"), None)
        .await
        .unwrap();

    // Assert
    assert_eq!(result.body, None);
    let url = format!("{}/databases/{}/docs?id=missing", cluster.servers[0].uri(), DATABASE);
    assert!(executor.cache().get(&url).is_not_found());
}

#[tokio::test]
async fn forbidden_is_reported_without_failing_over() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(403).set_body_string("Forbidden")).await;
    mount_docs(&cluster, 1, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert!(matches!(
        result,
        Err(RequestExecutorError::Server(RavenDbError::BadAuthorization(_)))
    ));
    assert_eq!(cluster.hits(1, DOCS_PATH).await, 0);
}

#[tokio::test]
async fn gone_forces_one_topology_update_and_retries_on_the_new_preferred_node() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    Mock::given(method("GET"))
        .and(path("/topology"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cluster.topology_body(1, &[0, 1])))
        .up_to_n_times(1)
        .mount(&cluster.servers[0])
        .await;
    Mock::given(method("GET"))
        .and(path("/topology"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cluster.topology_body(2, &[1, 0])))
        .mount(&cluster.servers[0])
        .await;
    mount_docs(&cluster, 0, ResponseTemplate::new(410)).await;
    mount_docs(&cluster, 1, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(cluster.hits(0, "/topology").await, 2);
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 1);
    assert_eq!(executor.topology_etag(), Some(2));
    assert_eq!(executor.get_preferred_node().unwrap().current_node, cluster.node(1));
}

#[tokio::test]
async fn refresh_topology_header_triggers_a_topology_update() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("Refresh-Topology", "true")
            .set_body_string("{}"),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    executor
        .execute(&ReadDocument::new("users/1"), None)
        .await
        .unwrap();

    // Assert
    assert_eq!(cluster.wait_for_hits(0, "/topology", 2).await, 2);
}

#[tokio::test]
async fn first_topology_update_falls_back_to_the_initial_urls() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(executor.topology_etag(), Some(SINGLE_NODE_TOPOLOGY_ETAG));
    let nodes = executor.get_topology_nodes().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].cluster_tag, "!");
}

#[tokio::test]
async fn missing_database_fails_the_first_topology_update() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    Mock::given(method("GET"))
        .and(path("/topology"))
        .respond_with(ResponseTemplate::new(503).insert_header("Database-Missing", DATABASE))
        .mount(&cluster.servers[0])
        .await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    match result {
        Err(RequestExecutorError::FirstTopologyUpdate(e)) => assert!(matches!(
            *e,
            RequestExecutorError::Server(RavenDbError::DatabaseDoesNotExist(_))
        )),
        other => panic!("Expected a failed first topology update, got {:?}", other),
    }
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 0);
}

#[tokio::test]
async fn round_robin_keeps_a_session_on_its_node() {
    // Arrange
    let cluster = TestCluster::start(3).await;
    cluster.mount_topology(1).await;
    for server in 0..3 {
        mount_docs(&cluster, server, ResponseTemplate::new(200).set_body_string("{}")).await;
    }
    let conventions =
        DocumentConventions::default().set_read_balance_behavior(ReadBalanceBehavior::RoundRobin);
    let executor = cluster.executor(conventions);
    let session = SessionInfo::new(1);

    // Act
    for _ in 0..3 {
        executor
            .execute(&ReadDocument::new("users/1"), Some(&session))
            .await
            .unwrap();
    }

    // Assert
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 0);
    assert_eq!(cluster.hits(1, DOCS_PATH).await, 3);
    assert_eq!(cluster.hits(2, DOCS_PATH).await, 0);
}

#[tokio::test]
async fn fastest_node_is_elected_by_racing_reads() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .set_body_string("{}")
            .set_delay(Duration::from_millis(300)),
    )
    .await;
    mount_docs(&cluster, 1, ResponseTemplate::new(200).set_body_string("{}")).await;
    let conventions =
        DocumentConventions::default().set_read_balance_behavior(ReadBalanceBehavior::FastestNode);
    let executor = cluster.executor(conventions);

    // Act
    for _ in 0..10 {
        executor
            .execute(&ReadDocument::new("users/1"), None)
            .await
            .unwrap();
    }

    // Assert
    assert_eq!(executor.get_fastest_node().unwrap().current_node, cluster.node(1));
}

#[tokio::test]
async fn aggressive_caching_serves_fresh_responses_without_the_network() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("ETag", "\"cv-1\"")
            .set_body_string("{}"),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());
    let command = ReadDocument::new("users/1");
    executor.execute(&command, None).await.unwrap();

    // Act
    let cached = {
        let _guard = executor.aggressively_cache_for(Duration::from_secs(60));
        executor.execute(&command, None).await.unwrap()
    };
    executor.execute(&command, None).await.unwrap();

    // Assert
    assert!(cached.from_cache);
    // The third request went back to the server once the guard was dropped.
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 2);
}

#[tokio::test]
async fn listeners_are_told_about_failed_and_succeeded_requests() {
    // Arrange
    let cluster = TestCluster::start(2).await;
    cluster.mount_topology(1).await;
    mount_docs(&cluster, 0, ResponseTemplate::new(503)).await;
    mount_docs(&cluster, 1, ResponseTemplate::new(200).set_body_string("{}")).await;
    let executor = cluster.executor(DocumentConventions::default());
    executor.wait_for_first_topology_update().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    executor.events().register(move |event: &RequestEvent| {
        let name = match event {
            RequestEvent::FailedRequest { .. } => "failed",
            RequestEvent::SucceedRequest { .. } => "succeeded",
            RequestEvent::TopologyUpdated { .. } => "topology",
        };
        sink.lock().unwrap().push(name);
    });

    // Act
    executor
        .execute(&ReadDocument::new("users/1"), None)
        .await
        .unwrap();

    // Assert
    assert_eq!(*seen.lock().unwrap(), vec!["failed", "succeeded"]);
}

#[tokio::test]
async fn disposed_executor_refuses_to_execute() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("ETag", "\"cv-1\"")
            .set_body_string("{}"),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());
    executor
        .execute(&ReadDocument::new("users/1"), None)
        .await
        .unwrap();

    // Act
    executor.dispose();
    executor.dispose();
    let result = executor.execute(&ReadDocument::new("users/1"), None).await;

    // Assert
    assert!(executor.is_disposed());
    assert!(matches!(result, Err(RequestExecutorError::Disposed)));
    assert_eq!(executor.cache().number_of_items(), 0);
}

const CLIENT_CONFIGURATION_PATH: &str = "/databases/Northwind/configuration/client";

fn client_configuration_body(etag: i64) -> serde_json::Value {
    json!({
        "Etag": etag,
        "Configuration": {
            "Etag": etag,
            "Disabled": false,
            "ReadBalanceBehavior": "RoundRobin",
        }
    })
}

#[tokio::test]
async fn node_stalling_mid_body_times_out() {
    // Arrange
    let node = StallingNode::start().await;
    let conventions =
        DocumentConventions::default().set_request_timeout(Duration::from_millis(200));
    let executor = RequestExecutor::create_for_single_node_without_configuration_updates(
        node.url.clone(),
        DATABASE,
        conventions,
        reqwest::Client::new(),
    );

    // Act
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        executor.execute(&ReadDocument::new("users/1"), None),
    )
    .await
    .expect("execute should give up once the request timeout elapsed");

    // Assert
    match result {
        Err(RequestExecutorError::AllTopologyNodesDown { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert!(
                failures[0].error.is_server_down(),
                "{:?}",
                failures[0].error
            );
        }
        other => panic!("Expected AllTopologyNodesDown, got {:?}", other),
    }
}

#[tokio::test]
async fn error_body_that_stalls_is_reported_as_a_node_failure() {
    // Arrange
    let node = StallingNode::start_with_status("500 Internal Server Error").await;
    let conventions =
        DocumentConventions::default().set_request_timeout(Duration::from_millis(200));
    let executor = RequestExecutor::create_for_single_node_without_configuration_updates(
        node.url.clone(),
        DATABASE,
        conventions,
        reqwest::Client::new(),
    );

    // Act
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        executor.execute(&ReadDocument::new("users/1"), None),
    )
    .await
    .expect("execute should give up once the request timeout elapsed");

    // Assert
    match result {
        Err(RequestExecutorError::AllTopologyNodesDown { failures, .. }) => {
            assert!(matches!(
                failures[0].error,
                RequestExecutorError::Timeout { .. } | RequestExecutorError::Transport { .. }
            ));
        }
        other => panic!("Expected the body read failure, got {:?}", other),
    }
}

#[tokio::test]
async fn node_stalling_mid_body_is_failed_over() {
    // Arrange
    let stalling = StallingNode::start().await;
    let cluster = TestCluster::start(1).await;
    let topology = json!({
        "Etag": 1,
        "Nodes": [
            { "Url": stalling.url.as_str(), "ClusterTag": "A", "Database": DATABASE, "ServerRole": "Member" },
            { "Url": cluster.servers[0].uri(), "ClusterTag": "B", "Database": DATABASE, "ServerRole": "Member" },
        ]
    });
    Mock::given(method("GET"))
        .and(path("/topology"))
        .respond_with(ResponseTemplate::new(200).set_body_json(topology))
        .mount(&cluster.servers[0])
        .await;
    mount_docs(&cluster, 0, ResponseTemplate::new(200).set_body_string("{}")).await;
    let conventions =
        DocumentConventions::default().set_request_timeout(Duration::from_millis(200));
    let executor = cluster.executor(conventions);

    // Act
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        executor.execute(&ReadDocument::new("users/1"), None),
    )
    .await
    .expect("execute should give up on the stalled node");

    // Assert
    assert_eq!(result.unwrap().body.as_deref(), Some("{}"));
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 1);
}

#[tokio::test]
async fn raw_responses_are_handed_over_as_bytes_and_never_cached() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    let payload = vec![0u8, 159, 146, 150, 255];
    Mock::given(method("GET"))
        .and(path("/databases/Northwind/attachments"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"cv-1\"")
                .set_body_bytes(payload.clone()),
        )
        .mount(&cluster.servers[0])
        .await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    let result = executor
        .execute(&ReadAttachment::new("photo.jpg"), None)
        .await
        .unwrap();

    // Assert
    assert_eq!(result, payload);
    assert_eq!(executor.cache().number_of_items(), 0);
}

#[tokio::test]
async fn refresh_client_configuration_header_updates_conventions() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    Mock::given(method("GET"))
        .and(path(CLIENT_CONFIGURATION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(client_configuration_body(7)))
        .mount(&cluster.servers[0])
        .await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("Refresh-Client-Configuration", "true")
            .set_body_string("{}"),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());

    // Act
    executor
        .execute(&ReadDocument::new("users/1"), None)
        .await
        .unwrap();
    cluster.wait_for_hits(0, CLIENT_CONFIGURATION_PATH, 1).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while executor.client_configuration_etag() != 7 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Assert
    assert_eq!(executor.client_configuration_etag(), 7);
    assert_eq!(
        executor.conventions().read_balance_behavior(),
        ReadBalanceBehavior::RoundRobin
    );
}

#[tokio::test]
async fn concurrent_client_configuration_updates_collapse_into_one_fetch() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    Mock::given(method("GET"))
        .and(path(CLIENT_CONFIGURATION_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(client_configuration_body(3))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&cluster.servers[0])
        .await;
    let executor = cluster.executor(DocumentConventions::default());
    executor.wait_for_first_topology_update().await.unwrap();

    // Act
    let (first, second) = tokio::join!(
        executor.update_client_configuration(cluster.node(0)),
        executor.update_client_configuration(cluster.node(0)),
    );

    // Assert
    assert!(first.unwrap());
    assert!(!second.unwrap());
    assert_eq!(cluster.hits(0, CLIENT_CONFIGURATION_PATH).await, 1);
    assert_eq!(executor.client_configuration_etag(), 3);
}

#[tokio::test]
async fn update_topology_gives_up_when_another_update_outlasts_its_timeout() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    Mock::given(method("GET"))
        .and(path("/topology"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(cluster.topology_body(1, &[0]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&cluster.servers[0])
        .await;
    let executor = cluster.executor(DocumentConventions::default());
    executor.wait_for_first_topology_update().await.unwrap();

    // Act
    let (running, waiting) = tokio::join!(
        executor.update_topology(UpdateTopologyParameters::new(cluster.node(0))),
        executor.update_topology(
            UpdateTopologyParameters::new(cluster.node(0)).with_timeout(Duration::from_millis(50))
        ),
    );

    // Assert
    assert!(running.unwrap());
    assert!(!waiting.unwrap());
    // One fetch for the first topology update, one for the update that got through.
    assert_eq!(cluster.hits(0, "/topology").await, 2);
}

#[tokio::test]
async fn reading_client_configuration_keeps_aggressively_cached_responses() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    Mock::given(method("GET"))
        .and(path(CLIENT_CONFIGURATION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(client_configuration_body(1)))
        .mount(&cluster.servers[0])
        .await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("ETag", "\"cv-1\"")
            .set_body_string("{}"),
    )
    .await;
    let executor = cluster.executor(DocumentConventions::default());
    let read = ReadDocument::new("users/1");
    executor.execute(&read, None).await.unwrap();
    let _guard = executor.aggressively_cache_for(Duration::from_secs(60));

    // Act
    executor
        .execute(&GetClientConfigurationCommand, None)
        .await
        .unwrap();
    let cached = executor.execute(&read, None).await.unwrap();

    // Assert
    assert!(cached.from_cache);
    assert_eq!(cluster.hits(0, DOCS_PATH).await, 1);
}

#[tokio::test]
async fn writes_stop_serving_aggressively_cached_responses() {
    // Arrange
    let cluster = TestCluster::start(1).await;
    cluster.mount_topology(1).await;
    mount_docs(
        &cluster,
        0,
        ResponseTemplate::new(200)
            .insert_header("ETag", "\"cv-1\"")
            .set_body_string("{}"),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path(DOCS_PATH))
        .respond_with(ResponseTemplate::new(201))
        .mount(&cluster.servers[0])
        .await;
    let executor = cluster.executor(DocumentConventions::default());
    let read = ReadDocument::new("users/1");
    executor.execute(&read, None).await.unwrap();
    let _guard = executor.aggressively_cache_for(Duration::from_secs(60));

    // Act
    executor
        .execute(&WriteDocument::new("users/2"), None)
        .await
        .unwrap();
    executor.execute(&read, None).await.unwrap();

    // Assert
    // The cached entry may be stale after the write, so it was revalidated with the server.
    let gets = cluster.servers[0]
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == DOCS_PATH && r.method == wiremock::http::Method::Get)
        .count();
    assert_eq!(gets, 2);
}

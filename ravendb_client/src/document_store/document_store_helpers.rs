use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
};

use reqwest::{Identity, Url};
use tokio::sync::oneshot;
use tracing::instrument;

use crate::{
    document_conventions::DocumentConventions,
    request_executor::{ClusterRequestExecutor, RequestExecutor},
    DocumentStoreError,
};

pub type DnsOverrides = HashMap<String, IpAddr>;

#[derive(Debug)]
pub enum DocumentStoreMessage {
    /// Returns the cached [`RequestExecutor`] for the database, creating it on first use.
    GetRequestExecutor {
        database_name: Option<String>,
        respond_to: oneshot::Sender<Result<RequestExecutor, DocumentStoreError>>,
    },
    GetClusterRequestExecutor {
        respond_to: oneshot::Sender<Result<ClusterRequestExecutor, DocumentStoreError>>,
    },
    GetDatabase {
        respond_to: oneshot::Sender<Option<String>>,
    },
    /// Disposes every executor created by the store.
    Close { respond_to: oneshot::Sender<()> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentStoreState {
    /// [`DocumentStore`](crate::DocumentStore) was initialized but has since been closed.
    Closed,

    /// [`DocumentStore`](crate::DocumentStore) is initialized.
    Initialized,
}

/// Everything the [`DocumentStoreActor`](crate::DocumentStoreActor) needs to create executors.
#[derive(Debug)]
pub struct DocumentStoreInitialConfiguration {
    pub(crate) conventions: DocumentConventions,
    pub(crate) database_name: Option<String>,
    pub(crate) http_client: reqwest::Client,
    pub(crate) initial_urls: Vec<Url>,
}

/// Builds the http client shared by every executor of a store.
///
/// The client keeps its own connection pool, so it is built once and cloned.
#[instrument(level = "debug", skip(client_identity))]
pub fn build_http_client(
    client_identity: Option<Identity>,
    dns_overrides: Option<DnsOverrides>,
    proxy_address: Option<String>,
) -> anyhow::Result<reqwest::Client> {
    let mut client = reqwest::Client::builder();

    if let Some(identity) = client_identity {
        client = client.identity(identity).use_rustls_tls();
    }

    // Convert Option<HashMap<String, IpAddr>> into HashMap<String,SocketAddr>
    let overrides = dns_overrides
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, SocketAddr::new(v, 0)))
        .collect::<HashMap<String, SocketAddr>>();

    for (domain, address) in overrides {
        tracing::trace!("Adding `{}->{}` to dns overrides.", domain, address);
        client = client.resolve(domain.as_str(), address);
    }

    if let Some(proxy) = proxy_address {
        tracing::trace!("Proxy set to `{}`", &proxy);
        client = client.proxy(reqwest::Proxy::all(proxy)?);
    } else {
        tracing::trace!("No proxy defined. Using system settings.");
    }

    Ok(client.build()?)
}

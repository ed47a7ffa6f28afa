use serde::Deserialize;

use crate::server_node::ServerNode;

use super::{database_url, CommandRequest, RavenCommand};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetDocumentsResult {
    pub results: Vec<serde_json::Value>,
    pub includes: serde_json::Map<String, serde_json::Value>,
    pub next_page_start: Option<i64>,
}

/// Loads documents, either by id or a page of all documents in the database.
#[derive(Debug, Clone, Default)]
pub struct GetDocumentsCommand {
    ids: Vec<String>,
    start: Option<i64>,
    page_size: Option<i64>,
}

impl GetDocumentsCommand {
    pub fn by_ids<T: AsRef<str>>(ids: &[T]) -> Self {
        Self {
            ids: ids.iter().map(|id| id.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn paged(start: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            ids: Vec::new(),
            start,
            page_size,
        }
    }
}

impl RavenCommand for GetDocumentsCommand {
    /// `None` when none of the requested documents exist.
    type Output = Option<GetDocumentsResult>;

    fn is_read_request(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> anyhow::Result<CommandRequest> {
        let mut url = database_url(node, "/docs")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(start) = self.start {
                query.append_pair("start", &start.to_string());
            }
            if let Some(page_size) = self.page_size {
                query.append_pair("pageSize", &page_size.to_string());
            }
            for id in &self.ids {
                query.append_pair("id", id);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(CommandRequest::get(url))
    }

    fn set_response(
        &self,
        response: Option<&str>,
        _from_cache: bool,
    ) -> anyhow::Result<Self::Output> {
        response
            .map(serde_json::from_str::<GetDocumentsResult>)
            .transpose()
            .map_err(Into::into)
    }
}

use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

mod apis;
mod citation;
mod config;
mod error;
mod library;
mod ratelimit;
mod resolve;
mod store;
#[cfg(test)]
mod testing;

use apis::PaperRecord;
use config::{Config, DEFAULT_OWNER_ID};
use error::LibraryError;
use library::Library;
use store::PaperStore;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Search query string")]
    query: String,
    #[schemars(description = "Maximum results to return (default 10, max 100)")]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperInput {
    #[schemars(description = "External identifier (arXiv id or DOI)")]
    id: String,
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    #[schemars(description = "Four-digit publication year")]
    publication_year: String,
    #[serde(default)]
    doi: String,
}

impl From<PaperInput> for PaperRecord {
    fn from(input: PaperInput) -> Self {
        PaperRecord {
            external_id: input.id,
            title: input.title,
            authors: input.authors,
            abstract_text: input.abstract_text,
            publication_year: input.publication_year,
            doi: input.doi,
            owner_id: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SavePaperParams {
    #[schemars(description = "Paper metadata, typically taken from a search result")]
    paper: PaperInput,
    #[schemars(description = "Reading list to file the paper under")]
    reading_list_id: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SavePaperByIdParams {
    #[schemars(description = "arXiv id of the paper; metadata is fetched automatically")]
    id: String,
    #[schemars(description = "Reading list to file the paper under")]
    reading_list_id: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperIdParams {
    #[schemars(description = "External identifier of the paper")]
    id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListPapersParams {
    #[schemars(description = "Only list papers in this reading list")]
    reading_list_id: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CitationParams {
    #[schemars(description = "External identifier of the paper (saved or not)")]
    id: String,
    #[schemars(description = "One of APA, MLA, Chicago, Harvard, IEEE, BibTeX")]
    format: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RelatedPapersParams {
    #[schemars(description = "External identifier of the paper (saved or not)")]
    id: String,
    #[schemars(description = "Maximum related papers to return (default 5, max 100)")]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateReadingListParams {
    #[schemars(description = "Name of the reading list")]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadingListIdParams {
    #[schemars(description = "Reading list id")]
    id: i64,
}

#[derive(Serialize)]
struct SaveResponse<'a> {
    id: &'a str,
    outcome: store::SaveOutcome,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PaperLibraryServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    library: Arc<Library>,
}

#[tool_router]
impl PaperLibraryServer {
    pub async fn create() -> anyhow::Result<Self> {
        let config = Config::from_env();
        let store = PaperStore::open(&config.data_dir)?;
        let source = config.build_source()?;
        let citations = config.build_citations()?;
        let library = Library::new(store, source, citations, config.build_rate_limiter());

        tracing::info!(
            "Library ready, data_dir={}, citations {}",
            config.data_dir.display(),
            if library.citations_enabled() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            library: Arc::new(library),
        })
    }

    #[tool(description = "Show storage location, citation backend and rate limit settings")]
    async fn server_status(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.config.status())
    }

    #[tool(description = "Search arXiv for papers matching a free-text query")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let results = self
            .library
            .search(DEFAULT_OWNER_ID, &params.query, params.max_results)
            .await
            .map_err(to_mcp_error)?;
        json_result(&results)
    }

    #[tool(description = "Save a paper into your library. Saving the same paper twice is a no-op.")]
    async fn save_paper(
        &self,
        Parameters(params): Parameters<SavePaperParams>,
    ) -> Result<CallToolResult, McpError> {
        let record = PaperRecord::from(params.paper);
        let outcome = self
            .library
            .save(DEFAULT_OWNER_ID, &record, params.reading_list_id)
            .await
            .map_err(to_mcp_error)?;
        json_result(&SaveResponse {
            id: record.external_id.trim(),
            outcome,
        })
    }

    #[tool(description = "Save a paper into your library by arXiv id, fetching its metadata")]
    async fn save_paper_by_id(
        &self,
        Parameters(params): Parameters<SavePaperByIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let (outcome, record) = self
            .library
            .save_by_id(
                DEFAULT_OWNER_ID,
                DEFAULT_OWNER_ID,
                &params.id,
                params.reading_list_id,
            )
            .await
            .map_err(to_mcp_error)?;
        json_result(&SaveResponse {
            id: &record.external_id,
            outcome,
        })
    }

    #[tool(description = "Get a paper from your library")]
    async fn get_paper(
        &self,
        Parameters(params): Parameters<PaperIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let paper = self
            .library
            .get(DEFAULT_OWNER_ID, &params.id)
            .await
            .map_err(to_mcp_error)?;
        json_result(&paper)
    }

    #[tool(description = "List the papers in your library, most recently saved first")]
    async fn list_papers(
        &self,
        Parameters(params): Parameters<ListPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let papers = self
            .library
            .list(DEFAULT_OWNER_ID, params.reading_list_id)
            .await
            .map_err(to_mcp_error)?;
        json_result(&papers)
    }

    #[tool(description = "Remove a paper from your library")]
    async fn delete_paper(
        &self,
        Parameters(params): Parameters<PaperIdParams>,
    ) -> Result<CallToolResult, McpError> {
        self.library
            .delete(DEFAULT_OWNER_ID, &params.id)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Deleted: {}",
            params.id
        ))]))
    }

    #[tool(description = "Generate a formatted citation for a saved paper or any arXiv id")]
    async fn generate_citation(
        &self,
        Parameters(params): Parameters<CitationParams>,
    ) -> Result<CallToolResult, McpError> {
        let citation = self
            .library
            .cite(DEFAULT_OWNER_ID, DEFAULT_OWNER_ID, &params.id, &params.format)
            .await
            .map_err(to_mcp_error)?;
        json_result(&citation)
    }

    #[tool(description = "Find papers related to a saved paper or any arXiv id")]
    async fn related_papers(
        &self,
        Parameters(params): Parameters<RelatedPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let papers = self
            .library
            .related(DEFAULT_OWNER_ID, DEFAULT_OWNER_ID, &params.id, params.max_results)
            .await
            .map_err(to_mcp_error)?;
        json_result(&papers)
    }

    #[tool(description = "Create a reading list to file saved papers under")]
    async fn create_reading_list(
        &self,
        Parameters(params): Parameters<CreateReadingListParams>,
    ) -> Result<CallToolResult, McpError> {
        let list = self
            .library
            .create_reading_list(DEFAULT_OWNER_ID, &params.name, &params.description)
            .await
            .map_err(to_mcp_error)?;
        json_result(&list)
    }

    #[tool(description = "List your reading lists with their paper counts")]
    async fn list_reading_lists(&self) -> Result<CallToolResult, McpError> {
        let lists = self
            .library
            .reading_lists(DEFAULT_OWNER_ID)
            .await
            .map_err(to_mcp_error)?;
        json_result(&lists)
    }

    #[tool(description = "Get a reading list and the papers filed under it")]
    async fn get_reading_list(
        &self,
        Parameters(params): Parameters<ReadingListIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let detail = self
            .library
            .get_reading_list(DEFAULT_OWNER_ID, params.id)
            .await
            .map_err(to_mcp_error)?;
        json_result(&detail)
    }

    #[tool(description = "Delete a reading list. Its papers stay in your library.")]
    async fn delete_reading_list(
        &self,
        Parameters(params): Parameters<ReadingListIdParams>,
    ) -> Result<CallToolResult, McpError> {
        self.library
            .delete_reading_list(DEFAULT_OWNER_ID, params.id)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Deleted reading list: {}",
            params.id
        ))]))
    }

    #[tool(description = "List supported citation formats")]
    async fn list_citation_formats(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.library.formats())
    }
}

fn json_result<T: Serialize + ?Sized>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Map a library failure to an MCP error, carrying the HTTP-style status in `data`.
fn to_mcp_error(err: LibraryError) -> McpError {
    let status = err.status_code();
    let data = Some(serde_json::json!({ "status": status }));
    let message = err.to_string();
    match status {
        400 => McpError::invalid_params(message, data),
        404 => McpError::resource_not_found(message, data),
        403 | 429 => McpError::invalid_request(message, data),
        _ => {
            tracing::warn!("Request failed: {}", message);
            McpError::internal_error(message, data)
        }
    }
}

#[tool_handler]
impl ServerHandler for PaperLibraryServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Search arXiv, keep a personal library of papers organised in reading lists, \
                 find related papers, and generate citations (APA, MLA, Chicago, Harvard, \
                 IEEE, BibTeX) for saved papers or any arXiv id."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting paper-library MCP server");

    let server = PaperLibraryServer::create().await?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::SourceError;

    #[test]
    fn test_error_mapping_keeps_status() {
        let err = to_mcp_error(LibraryError::Forbidden("nope".into()));
        assert_eq!(err.data, Some(serde_json::json!({ "status": 403 })));
        assert_eq!(err.code, ErrorCode::INVALID_REQUEST);

        let err = to_mcp_error(LibraryError::NotFound("gone".into()));
        assert_eq!(err.code, ErrorCode::RESOURCE_NOT_FOUND);

        let err = to_mcp_error(LibraryError::Validation("empty".into()));
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = to_mcp_error(LibraryError::Source(SourceError::Parse("bad".into())));
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(err.data, Some(serde_json::json!({ "status": 500 })));
    }

    #[test]
    fn test_paper_input_defaults() {
        let input: PaperInput =
            serde_json::from_str(r#"{"id": "1706.03762", "title": "Attention"}"#).unwrap();
        let record = PaperRecord::from(input);
        assert_eq!(record.external_id, "1706.03762");
        assert!(record.authors.is_empty());
        assert_eq!(record.doi, "");
    }
}

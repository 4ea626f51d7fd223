use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vops_core::request::{HostRequest, HttpMethod};
use vops_engine::{ClusterOp, ErrorJoin, ExecContext, OpBase, OpError};

#[derive(Serialize)]
struct DownloadFileRequest<'a> {
    source_file_path: &'a str,
    destination_file_path: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    catalog_path: &'a str,
    #[serde(skip_serializing_if = "no_parameters")]
    parameters: &'a BTreeMap<String, String>,
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

fn no_parameters(p: &&BTreeMap<String, String>) -> bool {
    p.is_empty()
}

/// Fetch a file through the management agent of one host and stream it to
/// a local path.
pub struct NmaDownloadFileOp {
    base: OpBase,
    source_file_path: String,
    destination_file_path: String,
    catalog_path: String,
    parameters: BTreeMap<String, String>,
    local_path: PathBuf,
}

impl NmaDownloadFileOp {
    /// The lowest-sorting host of `hosts` serves the download.
    pub fn new(
        hosts: &[String],
        source_file_path: &str,
        destination_file_path: &str,
        local_path: &Path,
    ) -> Self {
        let file_name = Path::new(source_file_path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_file_path.to_string());
        let initiator = hosts.iter().min().cloned().into_iter().collect();
        Self {
            base: OpBase::new("NMADownloadFileOp", &format!("Download {file_name}"), initiator),
            source_file_path: source_file_path.to_string(),
            destination_file_path: destination_file_path.to_string(),
            catalog_path: String::new(),
            parameters: BTreeMap::new(),
            local_path: local_path.to_path_buf(),
        }
    }

    pub fn with_catalog_path(mut self, catalog_path: &str) -> Self {
        self.catalog_path = catalog_path.to_string();
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    fn request_body(&self) -> Result<String, OpError> {
        let request = DownloadFileRequest {
            source_file_path: &self.source_file_path,
            destination_file_path: &self.destination_file_path,
            catalog_path: &self.catalog_path,
            parameters: &self.parameters,
        };
        serde_json::to_string(&request).map_err(|e| {
            OpError::Config(format!(
                "[{}] fail to marshal request data to JSON string, detail {e}",
                self.base.name
            ))
        })
    }
}

#[async_trait]
impl ClusterOp for NmaDownloadFileOp {
    fn base(&self) -> &OpBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OpBase {
        &mut self.base
    }

    async fn prepare(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        let Some(host) = self.base.hosts.first().cloned() else {
            return Err(OpError::Config(format!(
                "[{}] no host available to download {}",
                self.base.name, self.source_file_path
            )));
        };
        let destinations = BTreeMap::from([(host.clone(), self.local_path.clone())]);
        ctx.dispatcher.setup_download(&destinations);

        let body = self.request_body()?;
        self.base.cluster_request.insert(
            &host,
            HostRequest::nma(HttpMethod::Post, "vertica/download-file").with_body(body),
        );
        Ok(())
    }

    async fn process_result(&mut self, ctx: &mut ExecContext) -> Result<(), OpError> {
        let mut errors = ErrorJoin::new();
        for (host, result) in &self.base.cluster_request.results {
            self.base.log_response(host, result);
            if result.is_passing() {
                tracing::info!(
                    "[{}] downloaded {} from {host} to {}",
                    self.base.name,
                    self.source_file_path,
                    self.local_path.display()
                );
                ctx.downloaded_files
                    .insert(host.clone(), self.local_path.clone());
                return Ok(());
            }
            if let Some(err) = self.base.host_error(host, result) {
                errors.push(err);
            }
        }
        errors.into_result()
    }
}

use tonic::{Request, Response, Status};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::proto::backup::backup_service_server::BackupService;
use crate::proto::backup::{
    ExportRequest, ExportResponse, ImportRequest, ImportResponse, RestoreSummary as ProtoSummary,
};
use crate::snapshot::{ExportArtifact, Operator, RestoreSummary, SnapshotLoader, SnapshotWriter};

/// Backup actions. Failures are returned as `success: false` responses;
/// only a missing session becomes a gRPC error.
pub struct BackupServiceImpl {
    writer: SnapshotWriter,
    loader: SnapshotLoader,
}

impl BackupServiceImpl {
    pub fn new(writer: SnapshotWriter, loader: SnapshotLoader) -> Self {
        Self { writer, loader }
    }

    fn get_authenticated_user<T>(request: &Request<T>) -> Result<AuthenticatedUser, Status> {
        request
            .extensions()
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated.into())
    }

    fn export_response(action: &str, result: AppResult<ExportArtifact>) -> ExportResponse {
        match result {
            Ok(artifact) => ExportResponse {
                success: true,
                data: artifact.data,
                filename: artifact.filename,
                counts: artifact
                    .counts
                    .into_iter()
                    .map(|(key, count)| (key, count as u64))
                    .collect(),
                assets: artifact.assets as u64,
                ..Default::default()
            },
            Err(e) => {
                tracing::error!("{} failed: {}", action, e);
                ExportResponse {
                    success: false,
                    error: e.to_string(),
                    error_kind: e.kind().as_str().to_string(),
                    ..Default::default()
                }
            }
        }
    }

    fn import_response(action: &str, result: AppResult<RestoreSummary>) -> ImportResponse {
        match result {
            Ok(summary) => ImportResponse {
                success: true,
                summary: Some(summary_to_proto(summary)),
                ..Default::default()
            },
            Err(e) => {
                tracing::error!("{} failed: {}", action, e);
                ImportResponse {
                    success: false,
                    error: e.to_string(),
                    error_kind: e.kind().as_str().to_string(),
                    ..Default::default()
                }
            }
        }
    }
}

fn summary_to_proto(summary: RestoreSummary) -> ProtoSummary {
    ProtoSummary {
        mode: summary.mode.map(|m| m.as_str().to_string()).unwrap_or_default(),
        wiped: summary.wiped,
        written: summary
            .written
            .into_iter()
            .map(|(key, count)| (key, count as u64))
            .collect(),
        skipped_users: summary.skipped_users as u64,
        assets_restored: summary.assets_restored as u64,
        assets_ignored: summary.assets_ignored as u64,
    }
}

fn operator_of(user: AuthenticatedUser) -> Operator {
    Operator {
        user_id: user.user_id,
        username: user.username,
    }
}

#[tonic::async_trait]
impl BackupService for BackupServiceImpl {
    async fn export_lightweight(
        &self,
        request: Request<ExportRequest>,
    ) -> Result<Response<ExportResponse>, Status> {
        let auth_user = Self::get_authenticated_user(&request)?;
        tracing::info!("ExportLightweight requested by {}", auth_user.username);

        let result = self.writer.export_lightweight().await;
        Ok(Response::new(Self::export_response("ExportLightweight", result)))
    }

    async fn export_full(
        &self,
        request: Request<ExportRequest>,
    ) -> Result<Response<ExportResponse>, Status> {
        let auth_user = Self::get_authenticated_user(&request)?;
        tracing::info!("ExportFull requested by {}", auth_user.username);

        let result = self.writer.export_full().await;
        Ok(Response::new(Self::export_response("ExportFull", result)))
    }

    async fn import_lightweight(
        &self,
        request: Request<ImportRequest>,
    ) -> Result<Response<ImportResponse>, Status> {
        let auth_user = Self::get_authenticated_user(&request)?;
        let req = request.into_inner();
        tracing::info!(
            "ImportLightweight requested by {}: wipe_first={}",
            auth_user.username,
            req.wipe_first
        );

        let result = self
            .loader
            .import_lightweight(&req.data, req.wipe_first, Some(operator_of(auth_user)))
            .await;
        Ok(Response::new(Self::import_response("ImportLightweight", result)))
    }

    async fn import_full(
        &self,
        request: Request<ImportRequest>,
    ) -> Result<Response<ImportResponse>, Status> {
        let auth_user = Self::get_authenticated_user(&request)?;
        let req = request.into_inner();
        tracing::info!(
            "ImportFull requested by {}: wipe_first={}",
            auth_user.username,
            req.wipe_first
        );

        let result = self
            .loader
            .import_full(&req.data, req.wipe_first, Some(operator_of(auth_user)))
            .await;
        Ok(Response::new(Self::import_response("ImportFull", result)))
    }
}

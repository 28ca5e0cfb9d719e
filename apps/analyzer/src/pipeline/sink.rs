use async_trait::async_trait;
use tracing::info;

use crate::pipeline::orchestrator::AnalysisReport;

/// Destination for finished analyses. Failures are logged by the caller and
/// never fail the request.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, report: &AnalysisReport) -> anyhow::Result<()>;
}

/// Logs a one-line summary per analysis.
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn store(&self, report: &AnalysisReport) -> anyhow::Result<()> {
        let succeeded = report.results.values().filter(|r| r.success).count();
        let total_ms: u64 = report.results.values().map(|r| r.elapsed_ms).sum();
        info!(
            analysis_id = %report.analysis_id,
            owner_id = %report.owner_id,
            document_id = %report.document_id,
            "Analysis stored: {succeeded}/{} phases succeeded in {total_ms}ms",
            report.results.len()
        );
        Ok(())
    }
}

// OCR facade - queue `ocr-process`, job `process`
//
// Loads the uploaded scan from the file store and runs the OCR engine. A
// placeholder extraction (`__mock`) counts as a failed attempt.

use super::JobQueue;
use crate::application::backend::BackendStrategy;
use crate::application::retry::RetryPolicy;
use crate::application::stats::StatsSource;
use crate::domain::{JobDomain, JobError, OcrJobData, OcrResult, QueueStats};
use crate::error::Result;
use crate::port::{FileStore, OcrEngine, OcrInput};
use std::sync::Arc;

pub const SOURCE_NOT_FOUND: &str = "source file for OCR not found";
pub const EXTRACTION_FAILED: &str = "OCR extraction failed";

pub struct OcrJobs {
    queue: Arc<JobQueue<OcrJobData, OcrResult>>,
}

impl OcrJobs {
    pub fn new(
        backend: Arc<dyn BackendStrategy>,
        policy: RetryPolicy,
        files: Arc<dyn FileStore>,
        engine: Arc<dyn OcrEngine>,
    ) -> Result<Self> {
        let queue = JobQueue::new(JobDomain::Ocr, policy, backend, move |data: OcrJobData| {
            let files = Arc::clone(&files);
            let engine = Arc::clone(&engine);
            async move { extract(files.as_ref(), engine.as_ref(), data).await }
        })?;
        Ok(Self {
            queue: Arc::new(queue),
        })
    }

    /// Extract invoice fields from an uploaded scan
    pub async fn process(&self, data: &OcrJobData) -> std::result::Result<OcrResult, JobError> {
        self.queue.submit(data).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub fn stats_source(&self) -> Arc<dyn StatsSource> {
        self.queue.clone()
    }
}

/// OCR job body
pub async fn extract(
    files: &dyn FileStore,
    engine: &dyn OcrEngine,
    data: OcrJobData,
) -> std::result::Result<OcrResult, JobError> {
    let bytes = files
        .read(&data.source_location)
        .await?
        .ok_or_else(|| JobError::transient(SOURCE_NOT_FOUND))?;

    let result = engine
        .extract(OcrInput {
            bytes,
            filename: data.filename,
            mimetype: data.mimetype,
        })
        .await?;

    if result.mock {
        let message = result
            .error_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| EXTRACTION_FAILED.to_string());
        return Err(JobError::transient(message));
    }
    Ok(result)
}

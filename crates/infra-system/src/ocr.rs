// Command-backed OCR engine
//
// The scan goes to stdin as raw bytes; filename and mimetype travel in
// FAKTURACE_OCR_FILENAME / FAKTURACE_OCR_MIMETYPE. The command prints the
// extraction as JSON.

use crate::command::{CommandRunner, ExecutionError};
use async_trait::async_trait;
use fakturace_core::domain::OcrResult;
use fakturace_core::error::Result;
use fakturace_core::port::{OcrEngine, OcrInput};
use tracing::debug;

pub struct CommandOcrEngine {
    runner: CommandRunner,
}

impl CommandOcrEngine {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl OcrEngine for CommandOcrEngine {
    async fn extract(&self, input: OcrInput) -> Result<OcrResult> {
        let mut env = Vec::new();
        if let Some(filename) = input.filename {
            env.push(("FAKTURACE_OCR_FILENAME", filename));
        }
        if let Some(mimetype) = input.mimetype {
            env.push(("FAKTURACE_OCR_MIMETYPE", mimetype));
        }

        debug!(bytes = input.bytes.len(), "Running OCR command");
        let stdout = self.runner.run(&input.bytes, &env).await?;
        let result = serde_json::from_slice::<OcrResult>(&stdout)
            .map_err(|e| ExecutionError::InvalidOutput(e.to_string()))?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fakturace_core::error::AppError;
    use serde_json::json;
    use std::time::Duration;

    fn engine(script: &str) -> CommandOcrEngine {
        CommandOcrEngine::new(CommandRunner::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        ))
    }

    fn input() -> OcrInput {
        OcrInput {
            bytes: b"%PDF-1.4 scan".to_vec(),
            filename: Some("faktura.pdf".to_string()),
            mimetype: Some("application/pdf".to_string()),
        }
    }

    #[tokio::test]
    async fn test_extract_parses_fields() {
        let engine = engine(
            "wc -c > /dev/null; printf '{\"invoiceNumber\":\"%s\",\"mime\":\"%s\"}' \"$FAKTURACE_OCR_FILENAME\" \"$FAKTURACE_OCR_MIMETYPE\"",
        );
        let result = engine.extract(input()).await.unwrap();
        assert!(!result.mock);
        assert_eq!(result.fields["invoiceNumber"], json!("faktura.pdf"));
        assert_eq!(result.fields["mime"], json!("application/pdf"));
    }

    #[tokio::test]
    async fn test_placeholder_answer_is_passed_through() {
        let engine = engine("cat > /dev/null; echo '{\"__mock\":true,\"errorMessage\":\"unreadable\"}'");
        let result = engine.extract(input()).await.unwrap();
        assert!(result.mock);
        assert_eq!(result.error_message.as_deref(), Some("unreadable"));
    }

    #[tokio::test]
    async fn test_garbage_output_is_collaborator_error() {
        let engine = engine("cat > /dev/null; echo 'not json'");
        let err = engine.extract(input()).await.unwrap_err();
        assert!(matches!(err, AppError::Collaborator(_)));
    }
}

// Fakturace Infrastructure - System Adapters
// Implements: PdfRenderer, AccountingExporter, IsdocExporter, OcrEngine
// (external commands) and FileStore (local storage root)

pub mod command;
pub mod file_store;
pub mod ocr;
pub mod renderer;

pub use command::{CommandRunner, ExecutionError};
pub use file_store::LocalFileStore;
pub use ocr::CommandOcrEngine;
pub use renderer::CommandRenderer;

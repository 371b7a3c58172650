//! Text extraction from attached files.

use crate::error::{Result, SearchError};
use std::fs;
use std::path::Path;

/// Turns an attached file into indexable text.
///
/// Implementations for PDF or office formats live with the caller; the index
/// only needs plain text back. Errors are reported as
/// [`SearchError::DocumentExtraction`] and cause the file to be skipped.
pub trait DocumentReader: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Reads files as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextReader;

impl DocumentReader for PlainTextReader {
    fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path).map_err(|e| SearchError::DocumentExtraction {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        String::from_utf8(bytes).map_err(|e| SearchError::DocumentExtraction {
            path: path.to_path_buf(),
            message: format!("not valid UTF-8: {}", e.utf8_error()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("paper.txt");
        fs::write(&path, "Über Quantenmechanik").unwrap();

        assert_eq!(
            PlainTextReader.extract_text(&path).unwrap(),
            "Über Quantenmechanik"
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.pdf");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x9f]).unwrap();

        let err = PlainTextReader.extract_text(&path).unwrap_err();
        assert!(matches!(err, SearchError::DocumentExtraction { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = PlainTextReader
            .extract_text(Path::new("/nonexistent/paper.txt"))
            .unwrap_err();
        assert!(matches!(err, SearchError::DocumentExtraction { .. }));
    }
}

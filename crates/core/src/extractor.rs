use crate::error::IngestError;
use crate::models::PageDocument;
use lopdf::Document;
use std::path::Path;

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageDocument>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageDocument>, IngestError> {
        let source = source_name(path)?;
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        // `get_pages` is keyed by the 1-based physical page number.
        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(format!("page {page_no}: {error}")))?;

            if !text.trim().is_empty() {
                pages.push(PageDocument {
                    text,
                    source: source.clone(),
                    page: page_no,
                });
            }
        }

        Ok(pages)
    }
}

/// Extracts the non-blank pages of one PDF.
pub fn extract(path: &Path) -> Result<Vec<PageDocument>, IngestError> {
    LopdfExtractor.extract_pages(path)
}

pub fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_pdf;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_keep_physical_numbering() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nda-review.pdf");
        write_pdf(&path, &["Clinical review summary", "", "Benefit risk assessment"])?;

        let pages = extract(&path)?;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert!(pages[0].text.contains("Clinical review summary"));
        assert_eq!(pages[1].page, 3);
        assert!(pages[1].text.contains("Benefit risk assessment"));
        assert!(pages.iter().all(|page| page.source == "nda-review.pdf"));
        Ok(())
    }

    #[test]
    fn blank_pdf_yields_no_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blank.pdf");
        write_pdf(&path, &["", ""])?;

        let pages = extract(&path)?;
        assert!(pages.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_file_is_an_extraction_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        assert!(matches!(extract(&path), Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn extraction_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("label.pdf");
        write_pdf(&path, &["Dosage and administration"])?;

        assert_eq!(extract(&path)?, extract(&path)?);
        Ok(())
    }
}

use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::config::Settings;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::index::IndexStore;
use crate::models::Chunk;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub documents: usize,
    pub pages: usize,
    pub chunks: Vec<Chunk>,
    pub skipped_files: Vec<SkippedPdf>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub documents: usize,
    pub pages: usize,
    pub chunks: usize,
    pub skipped_files: Vec<SkippedPdf>,
    /// Entries in the index after the build, including appended-to ones.
    pub indexed_total: usize,
}

/// Extracts and chunks every PDF under `folder`. Files that fail to extract
/// are recorded in `skipped_files` and do not stop the run.
pub fn ingest_folder_best_effort(
    folder: &Path,
    config: ChunkingConfig,
    extractor: &dyn PdfExtractor,
) -> Result<IngestionReport, IngestError> {
    config.validate()?;

    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(IngestError::NoInput(folder.display().to_string()));
    }
    info!(folder = %folder.display(), files = files.len(), "found pdf files");

    let mut report = IngestionReport::default();
    for path in files {
        let pages = match extractor.extract_pages(&path) {
            Ok(pages) => pages,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable pdf");
                report.skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let chunks = chunk_pages(&pages, config)?;
        info!(
            path = %path.display(),
            pages = pages.len(),
            chunks = chunks.len(),
            "processed pdf"
        );
        report.documents += 1;
        report.pages += pages.len();
        report.chunks.extend(chunks);
    }

    Ok(report)
}

/// Ingests `source_dir` into the index configured in `settings`.
pub fn build_index(
    source_dir: &Path,
    reset: bool,
    settings: &Settings,
    embedder: &dyn Embedder,
) -> Result<BuildSummary, IngestError> {
    build_index_with(source_dir, reset, settings, embedder, &LopdfExtractor)
}

pub fn build_index_with(
    source_dir: &Path,
    reset: bool,
    settings: &Settings,
    embedder: &dyn Embedder,
    extractor: &dyn PdfExtractor,
) -> Result<BuildSummary, IngestError> {
    settings.validate()?;

    let report = ingest_folder_best_effort(source_dir, settings.chunking(), extractor)?;
    info!(
        documents = report.documents,
        chunks = report.chunks.len(),
        model = %embedder.model_id(),
        reset,
        "embedding chunks"
    );

    let store = IndexStore::new(&settings.index_dir);
    let index = store.build(&report.chunks, reset, embedder)?;

    Ok(BuildSummary {
        documents: report.documents,
        pages: report.pages,
        chunks: report.chunks.len(),
        skipped_files: report.skipped_files,
        indexed_total: index.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::IndexError;
    use crate::extractor::fixtures::write_pdf;
    use crate::models::PageDocument;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    /// Serves canned pages by file name instead of parsing PDFs.
    #[derive(Default)]
    struct CannedExtractor {
        pages: HashMap<String, Vec<(u32, String)>>,
    }

    impl PdfExtractor for CannedExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageDocument>, IngestError> {
            let name = crate::extractor::source_name(path)?;
            let pages = self
                .pages
                .get(&name)
                .ok_or_else(|| IngestError::PdfParse(format!("no canned pages for {name}")))?;
            Ok(pages
                .iter()
                .map(|(page, text)| PageDocument {
                    text: text.clone(),
                    source: name.clone(),
                    page: *page,
                })
                .collect())
        }
    }

    fn settings_for(dir: &Path) -> Settings {
        Settings {
            index_dir: dir.join("index"),
            ..Settings::default()
        }
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn empty_directory_is_no_input() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;

        let result = build_index(
            &data,
            false,
            &settings_for(dir.path()),
            &CharacterNgramEmbedder::default(),
        );
        assert!(matches!(result, Err(IngestError::NoInput(_))));
        Ok(())
    }

    #[test]
    fn bad_chunk_config_fails_before_any_work() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let settings = Settings {
            chunk_size: 100,
            chunk_overlap: 150,
            ..settings_for(dir.path())
        };

        let result = build_index(
            &dir.path().join("missing"),
            true,
            &settings,
            &CharacterNgramEmbedder::default(),
        );
        assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
        assert!(!settings.index_dir.exists());
        Ok(())
    }

    #[test]
    fn best_effort_skips_unreadable_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        write_pdf(&dir.path().join("review.pdf"), &["Approval letter text"])?;

        let config = Settings::default().chunking();
        let report = ingest_folder_best_effort(dir.path(), config, &LopdfExtractor)?;

        assert_eq!(report.documents, 1);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }

    #[test]
    fn build_reports_counts_and_leaves_queryable_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("clinical.pdf"), b"placeholder")?;
        fs::write(data.join("cmc.pdf"), b"placeholder")?;

        let mut extractor = CannedExtractor::default();
        extractor.pages.insert(
            "clinical.pdf".to_string(),
            vec![
                (1, "abcd ".repeat(300)),
                (2, "abcd ".repeat(80)),
                (3, "abcd ".repeat(300)),
            ],
        );
        extractor
            .pages
            .insert("cmc.pdf".to_string(), vec![(4, "Specifications were met.".to_string())]);

        let settings = settings_for(dir.path());
        let embedder = CharacterNgramEmbedder::default();
        let summary = build_index_with(&data, false, &settings, &embedder, &extractor)?;

        assert_eq!(summary.documents, 2);
        assert_eq!(summary.pages, 4);
        assert_eq!(summary.chunks, 6);
        assert_eq!(summary.indexed_total, 6);
        assert!(summary.skipped_files.is_empty());

        let index = IndexStore::new(&settings.index_dir).load(&embedder)?;
        assert_eq!(index.len(), 6);

        let again = build_index_with(&data, false, &settings, &embedder, &extractor)?;
        assert_eq!(again.indexed_total, 12);
        let reset = build_index_with(&data, true, &settings, &embedder, &extractor)?;
        assert_eq!(reset.indexed_total, 6);
        Ok(())
    }

    #[test]
    fn blank_documents_cannot_seed_an_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        write_pdf(&data.join("scan.pdf"), &["", "", ""])?;

        let settings = settings_for(dir.path());
        let result = build_index(&data, false, &settings, &CharacterNgramEmbedder::default());

        assert!(matches!(
            result,
            Err(IngestError::Index(IndexError::EmptyBuild))
        ));
        Ok(())
    }
}

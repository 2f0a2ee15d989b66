//! The foreshadowing ledger: long- and short-range threads per chapter.

use super::layout::{self, ChapterBlock, Section};
use crate::chapter::ChapterRange;
use crate::error::{ParseError, StorageError};
use crate::project::ProjectPaths;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

static SHORT_ANALYSIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)【短线伏笔】[：:]\s*(.*?)\s*(?:【长线伏笔】|$)")
        .expect("short analysis pattern is valid")
});

static LONG_ANALYSIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)【长线伏笔】[：:]\s*(.*?)\s*(?:-{3,}|【短线伏笔】|$)")
        .expect("long analysis pattern is valid")
});

/// Values a model writes when it has nothing to record.
const SENTINELS: [&str; 6] = ["none", "无", "暂无", "没有", "n/a", "null"];

/// Whether `content` carries anything worth recording.
///
/// Blank text and sentinel answers ("无", "暂无。", "None") are not.
pub fn is_meaningful(content: &str) -> bool {
    let text = content.trim();
    if text.is_empty() {
        return false;
    }

    let lowered = text.to_lowercase();
    let bare = lowered.trim_end_matches(['。', '.', '！', '!']).trim();
    if SENTINELS.contains(&bare) {
        return false;
    }

    // short hedges like "无。" or "(none)" but not real notes that happen to contain 无
    let short = text.chars().count() < 6;
    !(short && SENTINELS.iter().any(|s| lowered.contains(s)))
}

/// Split a chapter-analysis response into `(short, long)` foreshadowing text.
///
/// A missing part comes back empty.
pub fn parse_analysis(response: &str) -> (String, String) {
    let capture = |re: &Regex| {
        re.captures(response)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };
    (capture(&SHORT_ANALYSIS), capture(&LONG_ANALYSIS))
}

/// What an upsert did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Content was blank or a sentinel; nothing changed.
    Skipped,
    /// A new chapter block was appended to the section.
    Inserted,
    /// An existing chapter block was replaced in place.
    Replaced,
    /// The document could not be parsed or read; the content was appended raw.
    Addendum(ParseError),
}

/// Long- and short-range narrative threads, stored as editable text.
///
/// The document is kept exactly as read so hand edits survive. Upserts
/// splice one block at a time; when the document cannot be parsed the
/// content is appended as a labeled addendum instead of being dropped.
///
/// A backing file that exists but cannot be read is never rewritten. New
/// content is appended to it as addenda, and [`ForeshadowingLedger::save`]
/// refuses to run.
#[derive(Debug, Clone, Default)]
pub struct ForeshadowingLedger {
    path: Option<PathBuf>,
    document: String,
    /// Why the backing file could not be read, if it could not.
    unreadable: Option<String>,
}

impl ForeshadowingLedger {
    /// Create an empty ledger with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing ledger text with no backing file.
    pub fn from_text(document: impl Into<String>) -> Self {
        Self {
            path: None,
            document: document.into(),
            unreadable: None,
        }
    }

    /// Open the ledger stored at `path`. This never fails.
    ///
    /// A missing or unreadable file reads as an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (document, unreadable) = match fs::read_to_string(&path) {
            Ok(document) => (document, None),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No foreshadowing ledger at {}, starting empty", path.display());
                (String::new(), None)
            }
            Err(e) => {
                let reason = StorageError::io(&path, e).to_string();
                warn!("Foreshadowing ledger unreadable, new records will be appended: {reason}");
                (String::new(), Some(reason))
            }
        };

        Self {
            path: Some(path),
            document,
            unreadable,
        }
    }

    /// Open the ledger of a project.
    pub fn for_project(paths: &ProjectPaths) -> Self {
        Self::open(paths.foreshadowing_file())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The stored text, exactly as it will be written.
    ///
    /// For an unreadable backing file this holds only the addenda appended
    /// since it was opened.
    pub fn raw(&self) -> &str {
        &self.document
    }

    /// Whether the backing file was read, or did not exist yet.
    pub fn is_readable(&self) -> bool {
        self.unreadable.is_none()
    }

    /// Write the document to its backing file.
    ///
    /// Fails without touching the file if the file could not be read.
    pub fn save(&self) -> Result<(), StorageError> {
        let path = self.path.as_ref().ok_or(StorageError::Detached)?;
        if self.unreadable.is_some() {
            return Err(StorageError::Unreadable { path: path.clone() });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(path, &self.document).map_err(|e| StorageError::io(path, e))
    }

    /// Write the empty section template if the ledger holds nothing yet.
    pub fn initialize(&mut self) -> Result<(), StorageError> {
        if self.document.trim().is_empty() && self.unreadable.is_none() {
            self.document = layout::template();
        }
        self.save()
    }

    fn persist(&self) {
        if self.path.is_none() || self.unreadable.is_some() {
            return;
        }
        match self.save() {
            Ok(()) => debug!("Foreshadowing ledger saved"),
            Err(e) => error!("Failed to save foreshadowing ledger: {e}"),
        }
    }

    /// Document to splice into; an empty ledger starts from the bare template.
    fn working_copy(&self) -> String {
        if self.document.trim().is_empty() {
            layout::template()
        } else {
            self.document.clone()
        }
    }

    fn append_addendum(&mut self, chapter: u32, label: Option<&str>, body: &str) {
        let record = addendum_record(chapter, label, body);
        if !self.document.is_empty() && !self.document.ends_with('\n') {
            self.document.push('\n');
        }
        self.document.push_str(&record);
    }

    /// Append an addendum straight onto an unreadable backing file.
    fn append_to_unreadable(
        &mut self,
        chapter: u32,
        label: Option<&str>,
        body: &str,
        reason: String,
    ) -> UpsertOutcome {
        let record = addendum_record(chapter, label, body);
        match self.append_to_file(&record) {
            Ok(()) => info!("Appended chapter {chapter} to unreadable foreshadowing ledger"),
            Err(e) => error!("Failed to append to foreshadowing ledger: {e}"),
        }
        self.document.push_str(&record);
        UpsertOutcome::Addendum(ParseError::Undecodable(reason))
    }

    fn append_to_file(&self, record: &str) -> Result<(), StorageError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;
        file.write_all(record.as_bytes())
            .map_err(|e| StorageError::io(path, e))
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert or replace the block for `chapter` in `section`.
    ///
    /// Blank and sentinel content is ignored. A malformed document gets the
    /// content appended as an addendum. The ledger is saved afterwards.
    pub fn upsert(&mut self, chapter: u32, section: Section, content: &str) -> UpsertOutcome {
        if !is_meaningful(content) {
            debug!("Nothing to record for chapter {chapter} ({})", section.label());
            return UpsertOutcome::Skipped;
        }
        if let Some(reason) = self.unreadable.clone() {
            return self.append_to_unreadable(chapter, Some(section.label()), content, reason);
        }

        let working = self.working_copy();
        let outcome = match layout::splice_block(&working, section, chapter, content) {
            Ok(spliced) => {
                self.document = spliced.document;
                if spliced.replaced {
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Inserted
                }
            }
            Err(e) => {
                warn!(
                    "Foreshadowing ledger not parseable ({e}), \
                     appending chapter {chapter} as an addendum"
                );
                self.append_addendum(chapter, Some(section.label()), content);
                UpsertOutcome::Addendum(e)
            }
        };

        info!("Recorded {} foreshadowing for chapter {chapter}: {outcome:?}", section.label());
        self.persist();
        outcome
    }

    /// Record both sections for a chapter in one write.
    ///
    /// Either both blocks are spliced in or, if the document is malformed,
    /// one addendum carries both texts.
    pub fn record_chapter(&mut self, chapter: u32, long: &str, short: &str) -> UpsertOutcome {
        let parts: Vec<(Section, &str)> = [(Section::Long, long), (Section::Short, short)]
            .into_iter()
            .filter(|(_, text)| is_meaningful(text))
            .collect();
        if parts.is_empty() {
            debug!("Chapter {chapter} analysis carried no foreshadowing");
            return UpsertOutcome::Skipped;
        }
        if let Some(reason) = self.unreadable.clone() {
            let body = combined_body(&parts);
            return self.append_to_unreadable(chapter, None, &body, reason);
        }

        let mut document = self.working_copy();
        let mut replaced = false;
        let mut failure = None;
        for (section, text) in &parts {
            match layout::splice_block(&document, *section, chapter, text) {
                Ok(spliced) => {
                    replaced |= spliced.replaced;
                    document = spliced.document;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let outcome = match failure {
            None => {
                self.document = document;
                if replaced {
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Inserted
                }
            }
            Some(e) => {
                warn!(
                    "Foreshadowing ledger not parseable ({e}), \
                     appending chapter {chapter} as an addendum"
                );
                self.append_addendum(chapter, None, &combined_body(&parts));
                UpsertOutcome::Addendum(e)
            }
        };

        info!("Recorded foreshadowing for chapter {chapter}: {outcome:?}");
        self.persist();
        outcome
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The canonical view of the ledger.
    ///
    /// Falls back to the raw text when the document cannot be parsed.
    pub fn render(&self) -> String {
        match layout::render(&self.document) {
            Ok(text) => text,
            Err(e) => {
                warn!("Rendering raw foreshadowing ledger: {e}");
                self.document.clone()
            }
        }
    }

    /// The last `max_chars` characters of the stored text.
    pub fn tail_excerpt(&self, max_chars: usize) -> &str {
        let total = self.document.chars().count();
        if total <= max_chars {
            return &self.document;
        }
        let start = self
            .document
            .char_indices()
            .nth(total - max_chars)
            .map_or(0, |(i, _)| i);
        &self.document[start..]
    }

    /// Chapter blocks of one section, in stored order.
    pub fn blocks(&self, section: Section) -> Result<Vec<ChapterBlock>, ParseError> {
        if self.document.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed = layout::Layout::parse(&self.document)?;
        Ok(parsed.blocks(&self.document, section))
    }

    /// Chapter blocks of one section within a chapter range.
    pub fn blocks_in_range(
        &self,
        section: Section,
        range: ChapterRange,
    ) -> Result<Vec<ChapterBlock>, ParseError> {
        Ok(self
            .blocks(section)?
            .into_iter()
            .filter(|b| range.contains(b.chapter))
            .collect())
    }

    /// Number of blocks recorded for a chapter in a section.
    pub fn block_count(&self, section: Section, chapter: u32) -> Result<usize, ParseError> {
        if self.document.trim().is_empty() {
            return Ok(0);
        }
        Ok(layout::Layout::parse(&self.document)?.count_chapter(section, chapter))
    }

    /// Chapters that were recorded as raw addenda, in file order.
    pub fn addenda(&self) -> Vec<u32> {
        layout::addendum_chapters(&self.document)
    }
}

/// `【第N章补录】` record, with the section label when there is one.
fn addendum_record(chapter: u32, label: Option<&str>, body: &str) -> String {
    let marker = match label {
        Some(label) => format!("【第{chapter}章补录】（{label}）"),
        None => format!("【第{chapter}章补录】"),
    };
    format!("\n{marker}\n{}\n", body.trim())
}

fn combined_body(parts: &[(Section, &str)]) -> String {
    parts
        .iter()
        .map(|(section, text)| format!("{}：{}", section.label(), text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreshadowing::layout::{LONG_HEADER, SHORT_HEADER};
    use tempfile::TempDir;

    #[test]
    fn test_sentinels() {
        assert!(!is_meaningful(""));
        assert!(!is_meaningful("   \n"));
        assert!(!is_meaningful("none"));
        assert!(!is_meaningful("None."));
        assert!(!is_meaningful("无"));
        assert!(!is_meaningful("暂无。"));
        assert!(!is_meaningful("(无)"));
        assert!(is_meaningful("X"));
        assert!(is_meaningful("无名剑客的身世之谜"));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut ledger = ForeshadowingLedger::new();
        assert_eq!(ledger.upsert(3, Section::Long, "X"), UpsertOutcome::Inserted);
        assert_eq!(ledger.upsert(3, Section::Long, "Y"), UpsertOutcome::Replaced);

        let blocks = ledger.blocks(Section::Long).unwrap();
        assert_eq!(blocks, vec![ChapterBlock { chapter: 3, content: "Y".to_string() }]);
        assert!(!ledger.raw().contains('X'));
        assert!(ledger.blocks(Section::Short).unwrap().is_empty());
    }

    #[test]
    fn test_sentinel_upsert_is_noop() {
        let mut ledger = ForeshadowingLedger::new();
        ledger.upsert(1, Section::Short, "三日之约");
        let before = ledger.raw().to_string();

        assert_eq!(ledger.upsert(1, Section::Short, ""), UpsertOutcome::Skipped);
        assert_eq!(ledger.upsert(1, Section::Short, "none"), UpsertOutcome::Skipped);
        assert_eq!(ledger.raw(), before);
    }

    #[test]
    fn test_blocks_keep_insertion_order() {
        let mut ledger = ForeshadowingLedger::new();
        ledger.upsert(5, Section::Long, "五");
        ledger.upsert(2, Section::Long, "二");
        ledger.upsert(9, Section::Long, "九");
        ledger.upsert(2, Section::Long, "二改");

        let chapters: Vec<u32> = ledger
            .blocks(Section::Long)
            .unwrap()
            .iter()
            .map(|b| b.chapter)
            .collect();
        assert_eq!(chapters, vec![5, 2, 9]);

        let range = ChapterRange::new(2, 5).unwrap();
        let in_range = ledger.blocks_in_range(Section::Long, range).unwrap();
        assert_eq!(in_range.len(), 2);
        assert_eq!(in_range[1].content, "二改");
    }

    #[test]
    fn test_malformed_document_gets_addenda() {
        let mut ledger = ForeshadowingLedger::from_text("手写笔记：玉佩要在后面用上\n");

        let outcome = ledger.upsert(4, Section::Long, "玉佩裂纹");
        assert!(matches!(outcome, UpsertOutcome::Addendum(ParseError::MissingSection(_))));
        ledger.upsert(4, Section::Long, "玉佩裂纹加深");

        // prior text survives and the same chapter may appear twice
        assert!(ledger.raw().starts_with("手写笔记：玉佩要在后面用上"));
        assert_eq!(ledger.addenda(), vec![4, 4]);
        assert!(ledger.raw().contains("【第4章补录】（长线）\n玉佩裂纹\n"));
        assert!(ledger.raw().contains("玉佩裂纹加深"));
    }

    #[test]
    fn test_out_of_order_headers_fall_back() {
        let doc = format!("{SHORT_HEADER}\n\n第1章：\nA\n\n{LONG_HEADER}\n\n第1章：\nB\n");
        let mut ledger = ForeshadowingLedger::from_text(doc.clone());

        let outcome = ledger.upsert(2, Section::Short, "C线索");
        assert_eq!(outcome, UpsertOutcome::Addendum(ParseError::SectionOrder));
        assert!(ledger.raw().starts_with(&doc));
        assert_eq!(ledger.render(), ledger.raw());
    }

    #[test]
    fn test_record_chapter_writes_both_sections() {
        let mut ledger = ForeshadowingLedger::new();
        let outcome = ledger.record_chapter(6, "封印松动", "暂无");
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(ledger.blocks(Section::Long).unwrap().len(), 1);
        assert!(ledger.blocks(Section::Short).unwrap().is_empty());

        assert_eq!(ledger.record_chapter(7, "无", ""), UpsertOutcome::Skipped);
    }

    #[test]
    fn test_parse_analysis() {
        let response = "本章分析如下\n【短线伏笔】：\n1. 林婉赴约\n【长线伏笔】：\n1. 玉佩来历\n---\n其余说明";
        let (short, long) = parse_analysis(response);
        assert_eq!(short, "1. 林婉赴约");
        assert_eq!(long, "1. 玉佩来历");

        let (short, long) = parse_analysis("没有结构的回答");
        assert!(short.is_empty());
        assert!(long.is_empty());
    }

    #[test]
    fn test_tail_excerpt_counts_characters() {
        let ledger = ForeshadowingLedger::from_text("一二三四五");
        assert_eq!(ledger.tail_excerpt(2), "四五");
        assert_eq!(ledger.tail_excerpt(10), "一二三四五");
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreshadowing_records.txt");

        let mut ledger = ForeshadowingLedger::open(&path);
        ledger.upsert(1, Section::Long, "玉佩来历");
        ledger.upsert(1, Section::Short, "三日之约");

        let reloaded = ForeshadowingLedger::open(&path);
        assert_eq!(reloaded.raw(), ledger.raw());
        assert_eq!(reloaded.blocks(Section::Short).unwrap()[0].content, "三日之约");
    }

    #[test]
    fn test_initialize_writes_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreshadowing_records.txt");

        ForeshadowingLedger::open(&path).initialize().unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(LONG_HEADER));
        assert!(written.contains(SHORT_HEADER));
    }

    #[test]
    fn test_unreadable_file_is_appended_not_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreshadowing_records.txt");
        // GBK-encoded notes: not valid UTF-8
        let original: &[u8] = b"=== notes ===\n\xD3\xF1\xC5\xE5 must pay off\n";
        fs::write(&path, original).unwrap();

        let mut ledger = ForeshadowingLedger::open(&path);
        assert!(!ledger.is_readable());

        let outcome = ledger.upsert(3, Section::Long, "封印松动的线索");
        assert!(matches!(outcome, UpsertOutcome::Addendum(ParseError::Undecodable(_))));
        let outcome = ledger.record_chapter(4, "北境异动", "林婉赴约");
        assert!(matches!(outcome, UpsertOutcome::Addendum(ParseError::Undecodable(_))));

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(original));
        let appended = String::from_utf8(bytes[original.len()..].to_vec()).unwrap();
        assert!(appended.contains("【第3章补录】（长线）\n封印松动的线索\n"));
        assert!(appended.contains("【第4章补录】\n长线：北境异动\n短线：林婉赴约\n"));
        assert_eq!(ledger.addenda(), vec![3, 4]);

        assert!(matches!(ledger.save(), Err(StorageError::Unreadable { .. })));
        assert!(matches!(ledger.initialize(), Err(StorageError::Unreadable { .. })));
        assert!(fs::read(&path).unwrap().starts_with(original));
    }

    #[test]
    fn test_detached_save_reports_error() {
        let ledger = ForeshadowingLedger::new();
        assert!(matches!(ledger.save(), Err(StorageError::Detached)));
    }
}

//! Parse and splice the human-editable foreshadowing ledger text.
//!
//! The ledger file looks like this and is meant to be edited by hand:
//!
//! ```text
//! === 【长线伏笔】 ===
//!
//! 第3章：
//! 玉佩上的裂纹与北境封印有关
//!
//!
//! === 【短线伏笔】 ===
//!
//! 第3章：
//! 林婉答应三日后赴约
//!
//! 【第4章补录】（长线）
//! ...
//! ```
//!
//! Nothing here rewrites text it does not own: upserts splice a single
//! block's byte span and leave every other byte of the document alone.

use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use std::str::FromStr;

pub const LONG_HEADER: &str = "=== 【长线伏笔】 ===";
pub const SHORT_HEADER: &str = "=== 【短线伏笔】 ===";

static CHAPTER_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*第[ \t]*([^\s章]+)[ \t]*章[：:][ \t]*\r?$")
        .expect("chapter header pattern is valid")
});

static ADDENDUM_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*【第[ \t]*(\d+)[ \t]*章补录】[^\n]*$")
        .expect("addendum header pattern is valid")
});

/// Which partition of the ledger a thread belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Threads paid off many chapters later.
    Long,
    /// Threads paid off within the next few chapters.
    Short,
}

impl Section {
    pub fn header(&self) -> &'static str {
        match self {
            Section::Long => LONG_HEADER,
            Section::Short => SHORT_HEADER,
        }
    }

    /// Label used in addendum records.
    pub fn label(&self) -> &'static str {
        match self {
            Section::Long => "长线",
            Section::Short => "短线",
        }
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "长线" | "长线伏笔" => Ok(Section::Long),
            "short" | "短线" | "短线伏笔" => Ok(Section::Short),
            other => Err(format!("unknown section '{other}', expected long or short")),
        }
    }
}

/// One chapter's foreshadowing text within a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterBlock {
    pub chapter: u32,
    pub content: String,
}

/// Byte span of a chapter block: header line start to the next header.
#[derive(Debug, Clone)]
struct BlockSpan {
    chapter: u32,
    span: Range<usize>,
    /// End of the header line, where the body starts.
    body_start: usize,
}

#[derive(Debug, Clone)]
struct SectionLayout {
    /// From the end of the section header line to the section's end.
    body: Range<usize>,
    blocks: Vec<BlockSpan>,
}

impl SectionLayout {
    fn parse(doc: &str, body: Range<usize>) -> Result<Self, ParseError> {
        let text = &doc[body.clone()];
        let mut headers = Vec::new();
        for caps in CHAPTER_HEADER.captures_iter(text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let chapter = number
                .as_str()
                .parse::<u32>()
                .map_err(|_| ParseError::MalformedHeader(whole.as_str().trim().to_string()))?;
            headers.push((chapter, body.start + whole.start(), body.start + whole.end()));
        }

        let blocks = headers
            .iter()
            .enumerate()
            .map(|(i, &(chapter, start, header_end))| {
                let end = headers.get(i + 1).map_or(body.end, |next| next.1);
                BlockSpan {
                    chapter,
                    span: start..end,
                    body_start: header_end,
                }
            })
            .collect();

        Ok(Self { body, blocks })
    }

    fn preamble<'a>(&self, doc: &'a str) -> &'a str {
        let end = self.blocks.first().map_or(self.body.end, |b| b.span.start);
        doc[self.body.start..end].trim()
    }
}

/// Located sections of a ledger document.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    long: SectionLayout,
    short: SectionLayout,
    /// Start of the addendum records after the short section.
    tail_start: usize,
}

impl Layout {
    pub(crate) fn parse(doc: &str) -> Result<Self, ParseError> {
        let long = find_header_line(doc, LONG_HEADER)?;
        let short = find_header_line(doc, SHORT_HEADER)?;
        if long.start > short.start {
            return Err(ParseError::SectionOrder);
        }

        let tail_start = ADDENDUM_HEADER
            .find(&doc[short.end..])
            .map_or(doc.len(), |m| short.end + m.start());

        Ok(Self {
            long: SectionLayout::parse(doc, long.end..short.start)?,
            short: SectionLayout::parse(doc, short.end..tail_start)?,
            tail_start,
        })
    }

    fn section(&self, section: Section) -> &SectionLayout {
        match section {
            Section::Long => &self.long,
            Section::Short => &self.short,
        }
    }

    /// Count of blocks in a section carrying a chapter number.
    pub(crate) fn count_chapter(&self, section: Section, chapter: u32) -> usize {
        self.section(section)
            .blocks
            .iter()
            .filter(|b| b.chapter == chapter)
            .count()
    }

    pub(crate) fn blocks(&self, doc: &str, section: Section) -> Vec<ChapterBlock> {
        self.section(section)
            .blocks
            .iter()
            .map(|b| ChapterBlock {
                chapter: b.chapter,
                content: doc[b.body_start..b.span.end].trim().to_string(),
            })
            .collect()
    }
}

/// Locate the single line holding `header`.
///
/// Returns the line's start and the end of its text (before the newline).
fn find_header_line(doc: &str, header: &'static str) -> Result<Range<usize>, ParseError> {
    let mut found: Option<Range<usize>> = None;
    let mut offset = 0;

    for line in doc.split_inclusive('\n') {
        if line.trim() == header {
            if found.is_some() {
                return Err(ParseError::DuplicateSection(header));
            }
            let text_len = line.trim_end_matches(['\n', '\r']).len();
            found = Some(offset..offset + text_len);
        }
        offset += line.len();
    }

    found.ok_or(ParseError::MissingSection(header))
}

/// The document a fresh ledger starts from.
pub(crate) fn template() -> String {
    format!("{LONG_HEADER}\n\n\n{SHORT_HEADER}\n\n")
}

/// Reject content that would be read back as ledger structure.
pub(crate) fn check_content(content: &str) -> Result<(), ParseError> {
    for line in content.lines() {
        let text = line.trim();
        if text == LONG_HEADER
            || text == SHORT_HEADER
            || CHAPTER_HEADER.is_match(line)
            || ADDENDUM_HEADER.is_match(line)
        {
            return Err(ParseError::EmbeddedHeader(text.to_string()));
        }
    }
    Ok(())
}

/// Result of splicing a block into a document.
#[derive(Debug)]
pub(crate) struct Spliced {
    pub document: String,
    pub replaced: bool,
}

/// Replace or append the block for `chapter` in `section`.
pub(crate) fn splice_block(
    doc: &str,
    section: Section,
    chapter: u32,
    content: &str,
) -> Result<Spliced, ParseError> {
    check_content(content)?;
    let layout = Layout::parse(doc)?;
    let target = layout.section(section);
    let block = format!("第{chapter}章：\n{}", content.trim());

    let mut out = String::with_capacity(doc.len() + block.len() + 4);

    if let Some(existing) = target.blocks.iter().find(|b| b.chapter == chapter) {
        let old = &doc[existing.span.clone()];
        let trailing = &old[old.trim_end().len()..];
        let trailing = if trailing.is_empty() && existing.span.end < doc.len() {
            "\n\n"
        } else {
            trailing
        };

        out.push_str(&doc[..existing.span.start]);
        out.push_str(&block);
        out.push_str(trailing);
        out.push_str(&doc[existing.span.end..]);
        return Ok(Spliced {
            document: out,
            replaced: true,
        });
    }

    let section_text = &doc[target.body.clone()];
    let insert_at = target.body.start + section_text.trim_end().len();
    let rest = &doc[insert_at..];

    out.push_str(&doc[..insert_at]);
    out.push_str("\n\n");
    out.push_str(&block);
    if rest.is_empty() {
        out.push('\n');
    } else if !rest.starts_with('\n') && !rest.starts_with("\r\n") {
        out.push_str("\n\n");
    }
    out.push_str(rest);

    Ok(Spliced {
        document: out,
        replaced: false,
    })
}

/// Canonical view: both headers, every block, blank-line separated.
///
/// Hand-written notes ahead of a section's first block and any addendum
/// records are carried through so the view never hides data.
pub(crate) fn render(doc: &str) -> Result<String, ParseError> {
    let owned;
    let doc = if doc.trim().is_empty() {
        owned = template();
        owned.as_str()
    } else {
        doc
    };
    let layout = Layout::parse(doc)?;

    let mut out = String::new();
    for section in [Section::Long, Section::Short] {
        if section == Section::Short {
            out.push('\n');
        }
        out.push_str(section.header());
        out.push('\n');

        let preamble = layout.section(section).preamble(doc);
        if !preamble.is_empty() {
            out.push('\n');
            out.push_str(preamble);
            out.push('\n');
        }
        for block in layout.blocks(doc, section) {
            out.push_str(&format!("\n第{}章：\n{}\n", block.chapter, block.content));
        }
    }

    let tail = doc[layout.tail_start..].trim();
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(tail);
        out.push('\n');
    }
    Ok(out)
}

/// Chapter numbers of the addendum records in a document, in file order.
pub(crate) fn addendum_chapters(doc: &str) -> Vec<u32> {
    ADDENDUM_HEADER
        .captures_iter(doc)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect()
}

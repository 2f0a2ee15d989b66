//! Chapter metadata and chapter ranges.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// An inclusive range of chapter numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRange {
    start: u32,
    end: u32,
}

impl ChapterRange {
    /// Create a range, rejecting an end chapter before the start chapter.
    pub fn new(start: u32, end: u32) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering a single chapter.
    pub fn single(chapter: u32) -> Self {
        Self {
            start: chapter,
            end: chapter,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, chapter: u32) -> bool {
        (self.start..=self.end).contains(&chapter)
    }
}

/// Planning metadata for a chapter that is about to be written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub number: u32,
    pub title: String,
    /// Narrative role of the chapter (setup, climax, transition...).
    pub role: String,
    pub purpose: String,
    pub summary: String,
    pub characters: String,
    pub items: String,
    pub location: String,
    /// Foreshadowing the outline asks this chapter to plant or pay off.
    pub foreshadowing: String,
}

impl ChapterInfo {
    /// Create metadata for a chapter with a title.
    pub fn new(number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_characters(mut self, characters: impl Into<String>) -> Self {
        self.characters = characters.into();
        self
    }

    pub fn with_items(mut self, items: impl Into<String>) -> Self {
        self.items = items.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_foreshadowing(mut self, foreshadowing: impl Into<String>) -> Self {
        self.foreshadowing = foreshadowing.into();
        self
    }

    /// Render the metadata block used inside generation prompts.
    ///
    /// Missing fields are filled with a placeholder so the prompt layout
    /// never changes shape.
    pub fn render(&self) -> String {
        format!(
            "章节编号：第{}章\n\
             章节标题：《{}》\n\
             章节定位：{}\n\
             核心作用：{}\n\
             主要人物：{}\n\
             关键道具：{}\n\
             场景地点：{}\n\
             伏笔设计：{}\n\
             章节简述：{}\n",
            self.number,
            or_placeholder(&self.title, "未知"),
            or_placeholder(&self.role, "未知"),
            or_placeholder(&self.purpose, "未知"),
            or_placeholder(&self.characters, "未指定"),
            or_placeholder(&self.items, "未指定"),
            or_placeholder(&self.location, "未指定"),
            or_placeholder(&self.foreshadowing, "无"),
            or_placeholder(&self.summary, "未提供"),
        )
    }
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_rejects_reversed_bounds() {
        let err = ChapterRange::new(7, 3).unwrap_err();
        assert_eq!(err, ValidationError::InvalidRange { start: 7, end: 3 });
    }

    #[test]
    fn test_range_is_inclusive() {
        let range = ChapterRange::new(2, 4).unwrap();
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert!(ChapterRange::single(3).contains(3));
    }

    #[test]
    fn test_render_fills_missing_fields() {
        let info = ChapterInfo::new(12, "百草堂夜谈")
            .with_characters("杨尘, 林婉")
            .with_location("百草堂");
        let text = info.render();

        assert!(text.contains("第12章"));
        assert!(text.contains("《百草堂夜谈》"));
        assert!(text.contains("主要人物：杨尘, 林婉"));
        assert!(text.contains("关键道具：未指定"));
        assert!(text.contains("章节简述：未提供"));
    }
}

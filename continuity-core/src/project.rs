//! File locations under a novel project root.

use crate::error::{ProjectError, StorageError, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};

const ENTITY_FILE: &str = "entity_attributes.json";
const FORESHADOWING_FILE: &str = "foreshadowing_records.txt";
const CHAPTERS_DIR: &str = "chapters";
const CHARACTER_STATE_FILE: &str = "character_state.txt";
const GLOBAL_SUMMARY_FILE: &str = "global_summary.txt";

/// Paths of every file the engine reads or writes for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_file(&self) -> PathBuf {
        self.root.join(ENTITY_FILE)
    }

    pub fn foreshadowing_file(&self) -> PathBuf {
        self.root.join(FORESHADOWING_FILE)
    }

    pub fn chapters_dir(&self) -> PathBuf {
        self.root.join(CHAPTERS_DIR)
    }

    pub fn chapter_file(&self, chapter: u32) -> PathBuf {
        self.chapters_dir().join(format!("chapter_{chapter}.txt"))
    }

    pub fn character_state_file(&self) -> PathBuf {
        self.root.join(CHARACTER_STATE_FILE)
    }

    pub fn global_summary_file(&self) -> PathBuf {
        self.root.join(GLOBAL_SUMMARY_FILE)
    }

    /// Create the project root and its chapters directory.
    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        let chapters = self.chapters_dir();
        fs::create_dir_all(&chapters).map_err(|e| StorageError::io(&chapters, e))
    }

    /// Read the finalized text of a chapter.
    pub fn read_chapter(&self, chapter: u32) -> Result<String, StorageError> {
        let path = self.chapter_file(chapter);
        fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))
    }

    /// Write the finalized text of a chapter. Chapter numbers start at 1.
    pub fn write_chapter(&self, chapter: u32, text: &str) -> Result<(), ProjectError> {
        if chapter == 0 {
            return Err(ValidationError::ZeroChapter.into());
        }
        self.ensure_dirs()?;
        let path = self.chapter_file(chapter);
        fs::write(&path, text).map_err(|e| StorageError::io(&path, e))?;
        Ok(())
    }

    /// Read a plain-text state file, treating a missing file as empty.
    pub fn read_state(&self, path: &Path) -> Result<String, StorageError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Numbers of the chapters saved as `chapters/chapter_N.txt`, ascending.
    ///
    /// A missing chapters directory means no chapters yet.
    pub fn chapter_numbers(&self) -> Result<Vec<u32>, StorageError> {
        let dir = self.chapters_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix("chapter_"))
                .and_then(|n| n.strip_suffix(".txt"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            numbers.push(number);
        }
        numbers.sort_unstable();
        Ok(numbers)
    }
}

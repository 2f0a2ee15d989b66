//! Long- and short-range foreshadowing threads.

mod layout;
mod ledger;

pub use layout::{ChapterBlock, Section, LONG_HEADER, SHORT_HEADER};
pub use ledger::{is_meaningful, parse_analysis, ForeshadowingLedger, UpsertOutcome};

/// Characters of the ledger tail handed to chapter-analysis prompts.
pub const ANALYSIS_TAIL_CHARS: usize = 3000;

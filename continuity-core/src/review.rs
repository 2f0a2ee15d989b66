//! Consistency review of a drafted chapter.
//!
//! After a chapter is drafted, the reviewer hands the text to the model
//! together with everything the project remembers: the global summary,
//! character state, the entity lock list and open foreshadowing threads.
//! The model answers with a list of contradictions, or "无明显冲突".

use crate::error::{StorageError, UpstreamError};
use crate::foreshadowing::{ForeshadowingLedger, ANALYSIS_TAIL_CHARS};
use crate::ledger::EntityLedger;
use crate::project::ProjectPaths;
use crate::services::{clean_response, TextGenerator};
use std::fmt;
use tracing::{debug, error, info};

/// The model's answer when it finds nothing wrong.
pub const NO_CONFLICTS: &str = "无明显冲突";

/// Longer answers that merely start with [`NO_CONFLICTS`] are read as reports.
const NO_CONFLICTS_MAX_CHARS: usize = 30;

/// Project memory a chapter is reviewed against.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    pub global_summary: String,
    pub character_state: String,
    pub lock_list: String,
    /// Open plot threads, typically the tail of the foreshadowing ledger.
    pub plot_arcs: String,
}

impl ReviewContext {
    /// Gather the review context of a project.
    ///
    /// Missing summary and state files read as empty.
    pub fn from_project(
        paths: &ProjectPaths,
        entities: &EntityLedger,
        threads: &ForeshadowingLedger,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            global_summary: paths.read_state(&paths.global_summary_file())?,
            character_state: paths.read_state(&paths.character_state_file())?,
            lock_list: entities.generate_lock_list(),
            plot_arcs: threads.tail_excerpt(ANALYSIS_TAIL_CHARS).to_string(),
        })
    }

    pub fn with_global_summary(mut self, global_summary: impl Into<String>) -> Self {
        self.global_summary = global_summary.into();
        self
    }

    pub fn with_character_state(mut self, character_state: impl Into<String>) -> Self {
        self.character_state = character_state.into();
        self
    }

    pub fn with_lock_list(mut self, lock_list: impl Into<String>) -> Self {
        self.lock_list = lock_list.into();
        self
    }

    pub fn with_plot_arcs(mut self, plot_arcs: impl Into<String>) -> Self {
        self.plot_arcs = plot_arcs.into();
        self
    }
}

/// Result of reviewing a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The model's report of contradictions and risks.
    Issues(String),
    /// The model found no contradiction.
    NoConflicts,
    /// The review could not run; the chapter was not checked.
    Degraded(String),
}

impl ReviewOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ReviewOutcome::Degraded(_))
    }

    pub fn has_issues(&self) -> bool {
        matches!(self, ReviewOutcome::Issues(_))
    }
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewOutcome::Issues(report) => f.write_str(report),
            ReviewOutcome::NoConflicts => f.write_str(NO_CONFLICTS),
            ReviewOutcome::Degraded(reason) => {
                write!(f, "（一致性审校暂不可用，本章未经审校：{reason}）")
            }
        }
    }
}

/// Reviews drafted chapters against project memory.
pub struct ConsistencyChecker<G> {
    generator: G,
}

impl<G: TextGenerator> ConsistencyChecker<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    /// Review a chapter. Never fails.
    pub async fn check(&self, context: &ReviewContext, chapter_text: &str) -> ReviewOutcome {
        let outcome = match self.try_check(context, chapter_text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Consistency review failed: {e}");
                ReviewOutcome::Degraded(e.to_string())
            }
        };
        info!(
            "Consistency review: {}",
            match &outcome {
                ReviewOutcome::Issues(_) => "issues found",
                ReviewOutcome::NoConflicts => "no conflicts",
                ReviewOutcome::Degraded(_) => "degraded",
            }
        );
        outcome
    }

    /// Review a chapter, reporting upstream failures.
    ///
    /// An empty answer is a parse error.
    pub async fn try_check(
        &self,
        context: &ReviewContext,
        chapter_text: &str,
    ) -> Result<ReviewOutcome, UpstreamError> {
        let response = self
            .generator
            .generate(&review_prompt(context, chapter_text))
            .await?;
        debug!("Review response: {response}");
        parse_review(&response)
    }
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "（无）"
    } else {
        text.trim()
    }
}

fn review_prompt(context: &ReviewContext, chapter_text: &str) -> String {
    format!(
        "你是一名长篇小说的逻辑审校员。请对照下方的前文记忆，检查新章节是否与之矛盾。\n\
         重点核查：\n\
         1. 实体属性：人物身份与职位、道具颜色与状态、场景布局是否与锁定清单一致\n\
         2. 时间线：事件先后、持续时间、\"三天前\"与\"昨天\"之类的表述是否冲突\n\
         3. 因果与动机：新出现的因果关系和人物动机是否有前文依据\n\
         4. 能力体系与人物关系：能力的规则与代价、人物间的关系是否延续前文\n\
         5. 伏笔：已埋下的线索是否被遗忘或被矛盾地回收\n\n\
         【前文摘要】\n{}\n\n\
         【角色状态档案】\n{}\n\n\
         【实体属性锁定清单】\n{}\n\n\
         【未回收的伏笔与剧情要点】\n{}\n\n\
         【章节正文】\n{}\n\n\
         请按严重程度列出发现的逻辑错误，每条写明错误类型、问题位置、与前文的冲突和修改建议。\n\
         如果没有明显问题，请只回复\"{NO_CONFLICTS}\"。",
        or_none(&context.global_summary),
        or_none(&context.character_state),
        or_none(&context.lock_list),
        or_none(&context.plot_arcs),
        chapter_text.trim(),
    )
}

/// Classify the model's answer.
pub fn parse_review(response: &str) -> Result<ReviewOutcome, UpstreamError> {
    let text = clean_response(response);
    let text = text.trim();
    if text.is_empty() {
        return Err(UpstreamError::Parse("empty review response".to_string()));
    }

    let bare = text.trim_end_matches(['。', '.', '！', '!']).trim();
    if bare == NO_CONFLICTS
        || (bare.starts_with(NO_CONFLICTS) && bare.chars().count() <= NO_CONFLICTS_MAX_CHARS)
    {
        return Ok(ReviewOutcome::NoConflicts);
    }
    Ok(ReviewOutcome::Issues(text.to_string()))
}

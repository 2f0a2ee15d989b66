//! Active verification: risk questions, retrieval, constraint synthesis.
//!
//! Before a chapter is written the verifier asks the model which facts the
//! chapter is most likely to contradict, looks those facts up in earlier
//! chapters, and turns each hit into one concrete writing constraint.
//!
//! [`ActiveVerifier::run`] never fails. Every outcome, including a failed
//! upstream call, is a [`VerificationOutcome`] whose text says which case
//! occurred.

use crate::chapter::ChapterInfo;
use crate::error::UpstreamError;
use crate::relevance::{RelevanceExtractor, DEFAULT_STEP, DEFAULT_WINDOW_SIZE};
use crate::services::{clean_response, PassageIndex, TextGenerator};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NO_RISK_POINTS: &str = "（主动验证：未识别出具体风险点，按大纲正常创作）";
const NO_CONFLICTS: &str = "（主动验证：未发现与前文冲突之处，可自由发挥）";
const NO_CONSTRAINT_SENTINELS: [&str; 4] = ["无需约束", "无约束", "none", "无"];

/// Tunables for [`ActiveVerifier`].
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Risk questions checked per chapter.
    pub max_questions: usize,
    /// Passages retrieved per question.
    pub retrieval_k: usize,
    pub window_size: usize,
    pub step: usize,
    /// Shorter rules are discarded as noise.
    pub min_rule_chars: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_questions: 5,
            retrieval_k: 2,
            window_size: DEFAULT_WINDOW_SIZE,
            step: DEFAULT_STEP,
            min_rule_chars: 5,
        }
    }
}

impl VerificationConfig {
    pub fn with_max_questions(mut self, max_questions: usize) -> Self {
        self.max_questions = max_questions;
        self
    }

    pub fn with_retrieval_k(mut self, retrieval_k: usize) -> Self {
        self.retrieval_k = retrieval_k;
        self
    }

    pub fn with_window(mut self, window_size: usize, step: usize) -> Self {
        self.window_size = window_size;
        self.step = step;
        self
    }

    pub fn with_min_rule_chars(mut self, min_rule_chars: usize) -> Self {
        self.min_rule_chars = min_rule_chars;
        self
    }
}

/// A writing constraint and the risk question it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub question: String,
    pub rule: String,
}

/// Result of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Rules the chapter must respect.
    Constraints(Vec<Constraint>),
    /// The model named no risk points.
    NoRiskPoints,
    /// Risk points were checked and none needs a constraint.
    NoConflicts,
    /// A service failed; the chapter was not checked.
    Degraded(String),
}

impl VerificationOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, VerificationOutcome::Degraded(_))
    }

    pub fn constraints(&self) -> &[Constraint] {
        match self {
            VerificationOutcome::Constraints(constraints) => constraints,
            _ => &[],
        }
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Constraints(constraints) => {
                writeln!(f, "【主动验证约束】（以下设定来自前文，必须遵守）")?;
                for (i, c) in constraints.iter().enumerate() {
                    writeln!(f, "{}. {}（核查问题：{}）", i + 1, c.rule, c.question)?;
                }
                Ok(())
            }
            VerificationOutcome::NoRiskPoints => f.write_str(NO_RISK_POINTS),
            VerificationOutcome::NoConflicts => f.write_str(NO_CONFLICTS),
            VerificationOutcome::Degraded(reason) => {
                write!(f, "（主动验证暂不可用，本章未经连续性核查：{reason}）")
            }
        }
    }
}

/// Runs the risk, retrieval and synthesis steps for one chapter at a time.
pub struct ActiveVerifier {
    generator: Arc<dyn TextGenerator>,
    index: Arc<dyn PassageIndex>,
    config: VerificationConfig,
}

impl ActiveVerifier {
    pub fn new(generator: Arc<dyn TextGenerator>, index: Arc<dyn PassageIndex>) -> Self {
        Self {
            generator,
            index,
            config: VerificationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VerificationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Verify a chapter plan. Never fails.
    pub async fn run(&self, chapter: &ChapterInfo) -> VerificationOutcome {
        let outcome = match self.try_run(chapter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Active verification failed for chapter {}: {e}", chapter.number);
                VerificationOutcome::Degraded(e.to_string())
            }
        };
        info!(
            "Chapter {} verification: {} constraints{}",
            chapter.number,
            outcome.constraints().len(),
            if outcome.is_degraded() { " (degraded)" } else { "" }
        );
        outcome
    }

    /// [`ActiveVerifier::run`] rendered as prompt text.
    pub async fn run_text(&self, chapter: &ChapterInfo) -> String {
        self.run(chapter).await.to_string()
    }

    /// Verify a chapter plan, reporting upstream failures.
    pub async fn try_run(
        &self,
        chapter: &ChapterInfo,
    ) -> Result<VerificationOutcome, UpstreamError> {
        let questions = self.enumerate_risks(chapter).await?;
        if questions.is_empty() {
            return Ok(VerificationOutcome::NoRiskPoints);
        }

        let extractor = RelevanceExtractor::new(self.config.window_size, self.config.step);
        let mut constraints = Vec::new();

        for question in questions.into_iter().take(self.config.max_questions) {
            let passages = self.index.search(&question, self.config.retrieval_k).await?;
            if passages.is_empty() {
                debug!("No passages for risk question: {question}");
                continue;
            }

            let context = extractor.extract(&passages.join("\n\n"), &question);
            if let Some(rule) = self.synthesize_rule(chapter, &question, &context).await? {
                constraints.push(Constraint { question, rule });
            }
        }

        Ok(if constraints.is_empty() {
            VerificationOutcome::NoConflicts
        } else {
            VerificationOutcome::Constraints(constraints)
        })
    }

    async fn enumerate_risks(&self, chapter: &ChapterInfo) -> Result<Vec<String>, UpstreamError> {
        let prompt = format!(
            "你是一名长篇小说的连续性审校员。下一章即将动笔，请根据章节信息，\
             列出最容易与前文设定发生矛盾的具体问题（例如人物身份与职位、道具状态、场景布局、时间线）。\n\n\
             【章节信息】\n{}\n\
             请只输出一个 JSON 字符串数组，每个元素是一个需要查证的问题，最多 {} 个，例如：\n\
             [\"杨尘现在的职位是什么？\", \"百草堂内部的陈设是怎样的？\"]",
            chapter.render(),
            self.config.max_questions
        );
        let response = self.generator.generate(&prompt).await?;
        debug!("Risk enumeration response: {response}");

        let questions = parse_questions(&response);
        debug!("Parsed {} risk questions", questions.len());
        Ok(questions)
    }

    async fn synthesize_rule(
        &self,
        chapter: &ChapterInfo,
        question: &str,
        context: &str,
    ) -> Result<Option<String>, UpstreamError> {
        let prompt = format!(
            "你是一名长篇小说的连续性审校员。下面是即将创作的章节信息、一个需要核查的问题，以及从前文检索到的相关片段。\n\n\
             【章节信息】\n{}\n\
             【核查问题】\n{question}\n\n\
             【前文片段】\n{context}\n\n\
             如果前文片段对该问题有明确设定，请用一句话写出本章必须遵守的具体约束；\
             如果前文没有相关设定或不存在冲突风险，请只回答“无需约束”。",
            chapter.render()
        );
        let response = self.generator.generate(&prompt).await?;
        Ok(accept_rule(&response, self.config.min_rule_chars))
    }
}

/// Keep a synthesized rule unless it is empty, a sentinel, or too short.
fn accept_rule(response: &str, min_chars: usize) -> Option<String> {
    let rule = clean_response(response);
    let rule = rule.trim();
    let lowered = rule.to_lowercase();
    let bare = lowered.trim_end_matches(['。', '.']);

    if rule.is_empty()
        || NO_CONSTRAINT_SENTINELS.contains(&bare)
        || rule.contains(NO_CONSTRAINT_SENTINELS[0])
        || rule.chars().count() < min_chars
    {
        debug!("Discarding rule: {rule:?}");
        return None;
    }
    Some(rule.to_string())
}

/// Parse risk questions from a model response.
///
/// A bracketed list is read as a JSON array of strings, or failing that as
/// a list of quoted strings. Text is never evaluated. Without a list, lines
/// containing a question mark are kept. A list that cannot be read yields
/// no questions.
pub fn parse_questions(response: &str) -> Vec<String> {
    let body = clean_response(response);

    let questions = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            let literal = &body[start..=end];
            match serde_json::from_str::<Vec<String>>(literal)
                .ok()
                .or_else(|| parse_quoted_list(literal))
            {
                Some(items) => items,
                None => {
                    warn!("Risk list unreadable, treating as no risk points: {literal}");
                    Vec::new()
                }
            }
        }
        _ => body
            .lines()
            .filter(|line| line.contains('?') || line.contains('？'))
            .map(strip_list_marker)
            .map(str::to_string)
            .collect(),
    };

    questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Read `['a', "b"]`: quoted strings separated by commas, nothing else.
fn parse_quoted_list(literal: &str) -> Option<Vec<String>> {
    let inner = literal.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(quote) = chars.next() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return None;
        }

        let mut item = String::new();
        loop {
            match chars.next()? {
                '\\' => item.push(chars.next()?),
                c if c == quote => break,
                c => item.push(c),
            }
        }
        items.push(item);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some(',') | None => {}
            Some(_) => return None,
        }
    }

    Some(items)
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest
            .strip_prefix('.')
            .or_else(|| rest.strip_prefix('、'))
            .or_else(|| rest.strip_prefix(')'))
        {
            return rest.trim_start();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_questions_json() {
        let response = "```json\n[\"杨尘的职位？\", \" \", \"光罩的颜色？\"]\n```";
        assert_eq!(parse_questions(response), vec!["杨尘的职位？", "光罩的颜色？"]);
    }

    #[test]
    fn test_parse_questions_single_quoted() {
        let response = "风险如下：['杨尘的职位？', '百草堂\\'s 陈设？']";
        assert_eq!(parse_questions(response), vec!["杨尘的职位？", "百草堂's 陈设？"]);
    }

    #[test]
    fn test_parse_questions_never_evaluates() {
        assert!(parse_questions("[__import__('os').system('rm -rf /')]").is_empty());
        assert!(parse_questions("[1, 2]").is_empty());
    }

    #[test]
    fn test_parse_questions_line_fallback() {
        let response = "需要核查：\n1. 杨尘现在是什么职位？\n- 光罩是什么颜色?\n其余无";
        assert_eq!(
            parse_questions(response),
            vec!["杨尘现在是什么职位？", "光罩是什么颜色?"]
        );
        assert!(parse_questions("没有风险").is_empty());
    }

    #[test]
    fn test_accept_rule() {
        assert_eq!(accept_rule("无需约束", 5), None);
        assert_eq!(accept_rule("无需约束。前文未提及", 5), None);
        assert_eq!(accept_rule("NONE", 5), None);
        assert_eq!(accept_rule("", 5), None);
        assert_eq!(accept_rule("保持原样", 5), None);
        assert_eq!(
            accept_rule("杨尘的职位必须是术研院主事", 5).as_deref(),
            Some("杨尘的职位必须是术研院主事")
        );
    }

    #[test]
    fn test_outcome_texts_are_distinct() {
        let texts = [
            VerificationOutcome::NoRiskPoints.to_string(),
            VerificationOutcome::NoConflicts.to_string(),
            VerificationOutcome::Degraded("timeout".to_string()).to_string(),
        ];
        assert_ne!(texts[0], texts[1]);
        assert_ne!(texts[1], texts[2]);
        assert_ne!(texts[0], texts[2]);
        assert!(texts[2].contains("timeout"));

        let constraints = VerificationOutcome::Constraints(vec![Constraint {
            question: "杨尘的职位？".to_string(),
            rule: "杨尘是术研院主事".to_string(),
        }]);
        assert!(constraints
            .to_string()
            .contains("1. 杨尘是术研院主事（核查问题：杨尘的职位？）"));
    }
}

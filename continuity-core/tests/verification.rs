//! Tests for the active verification pipeline with scripted services.

use continuity_core::testing::{FailingGenerator, ScriptedGenerator, ScriptedReply, StaticIndex};
use continuity_core::{ActiveVerifier, ChapterInfo, VerificationConfig, VerificationOutcome};
use std::sync::Arc;

fn chapter() -> ChapterInfo {
    ChapterInfo::new(12, "百草堂夜谈")
        .with_role("过渡")
        .with_characters("杨尘, 林婉")
        .with_location("百草堂")
        .with_summary("杨尘夜访百草堂，向林婉打听玉佩来历")
}

fn index() -> StaticIndex {
    StaticIndex::new()
        .with_passages("杨尘", ["第三章：杨尘升任术研院主事，掌管典籍。"])
        .with_passages("百草堂", ["第五章：百草堂前厅摆着三排药柜，后院种着灵草。"])
}

// =============================================================================
// Successful runs
// =============================================================================

#[tokio::test]
async fn test_constraints_tagged_with_questions() {
    let generator = Arc::new(ScriptedGenerator::new([
        r#"["杨尘现在的职位是什么？", "林婉的师承？", "百草堂的陈设？"]"#,
        "杨尘的职位是术研院主事，不得写成其他职务",
        "百草堂前厅有三排药柜，后院种有灵草",
    ]));
    let verifier = ActiveVerifier::new(generator.clone(), Arc::new(index()));

    let outcome = verifier.run(&chapter()).await;
    let constraints = outcome.constraints();
    assert_eq!(constraints.len(), 2);
    assert_eq!(constraints[0].question, "杨尘现在的职位是什么？");
    assert!(constraints[1].rule.contains("三排药柜"));

    // the question with no passages never reached the model
    assert_eq!(generator.call_count().await, 3);
    let prompts = generator.prompts().await;
    assert!(prompts[0].contains("百草堂夜谈"));
    assert!(prompts[1].contains("术研院主事"));

    let text = outcome.to_string();
    assert!(text.contains("杨尘的职位是术研院主事"));
    assert!(text.contains("（核查问题：百草堂的陈设？）"));
}

#[tokio::test]
async fn test_question_limit() {
    let questions: Vec<String> = (1..=8).map(|i| format!("杨尘的第{i}个问题？")).collect();
    let mut script = vec![serde_json::to_string(&questions).unwrap()];
    script.extend((1..=8).map(|i| format!("第{i}条约束：杨尘保持原有职位")));
    let generator = Arc::new(ScriptedGenerator::new(script));

    let verifier = ActiveVerifier::new(generator.clone(), Arc::new(index()))
        .with_config(VerificationConfig::default().with_max_questions(3));
    let outcome = verifier.run(&chapter()).await;

    assert_eq!(outcome.constraints().len(), 3);
    assert_eq!(generator.call_count().await, 4);
}

#[tokio::test]
async fn test_sentinel_rules_mean_no_conflicts() {
    let generator = Arc::new(ScriptedGenerator::new([
        "需要核查：\n1. 杨尘现在的职位？\n2. 百草堂的布局？",
        "无需约束",
        "好",
    ]));
    let verifier = ActiveVerifier::new(generator, Arc::new(index()));

    assert_eq!(verifier.run(&chapter()).await, VerificationOutcome::NoConflicts);
}

#[tokio::test]
async fn test_no_risk_points() {
    for reply in ["本章没有风险。", "[]", "[1, 2, 3]"] {
        let generator = Arc::new(ScriptedGenerator::new([reply]));
        let verifier = ActiveVerifier::new(generator.clone(), Arc::new(index()));

        assert_eq!(verifier.run(&chapter()).await, VerificationOutcome::NoRiskPoints);
        assert_eq!(generator.call_count().await, 1);
    }
}

// =============================================================================
// Degraded runs
// =============================================================================

#[tokio::test]
async fn test_risk_call_failure_degrades() {
    let verifier = ActiveVerifier::new(Arc::new(FailingGenerator), Arc::new(index()));
    let outcome = verifier.run(&chapter()).await;

    assert!(outcome.is_degraded());
    let text = verifier.run_text(&chapter()).await;
    assert_ne!(text, VerificationOutcome::NoRiskPoints.to_string());
    assert_ne!(text, VerificationOutcome::NoConflicts.to_string());
    assert!(verifier.try_run(&chapter()).await.is_err());
}

#[tokio::test]
async fn test_search_failure_degrades() {
    let generator = Arc::new(ScriptedGenerator::new([r#"["杨尘的职位？"]"#]));
    let verifier = ActiveVerifier::new(generator, Arc::new(StaticIndex::failing()));

    assert!(verifier.run(&chapter()).await.is_degraded());
}

#[tokio::test]
async fn test_rule_call_failure_degrades() {
    let generator = Arc::new(ScriptedGenerator::from_script([
        ScriptedReply::Text(r#"["杨尘的职位？"]"#.to_string()),
        ScriptedReply::Failure("rate limited".to_string()),
    ]));
    let verifier = ActiveVerifier::new(generator, Arc::new(index()));

    match verifier.run(&chapter()).await {
        VerificationOutcome::Degraded(reason) => assert!(reason.contains("rate limited")),
        other => panic!("expected degraded outcome, got {other:?}"),
    }
}

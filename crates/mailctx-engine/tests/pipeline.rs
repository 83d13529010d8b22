//! Context pipeline scenarios across the inference, engine and store crates.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mailctx_core::errors::InferenceError;
use mailctx_core::ids::{EmailId, ThreadId};
use mailctx_core::signal::{AnalysisSignal, TopicSignal};
use mailctx_engine::{
    merger, Backoff, BatchItem, ConfidenceGate, ContextAnalyzer, ContextBuilder, EngineError, RecordingSleeper,
    RetryPolicy,
};
use mailctx_inference::mock::{FnExtractor, Scripted, ScriptedExtractor};
use mailctx_inference::KeywordExtractor;
use mailctx_store::{ContextRepo, Database};

const Q4_UPDATE: &str = "Important project update for Q4 sales targets. Meeting with stakeholders tomorrow.";

fn gate(max_attempts: u32) -> ConfidenceGate {
    ConfidenceGate::new(0.75, RetryPolicy::new(max_attempts, Backoff::Fixed(Duration::from_millis(50))))
        .with_sleeper(Arc::new(RecordingSleeper::new()))
}

fn signal(confidence: f64, topic: &str) -> AnalysisSignal {
    AnalysisSignal {
        confidence: Some(confidence),
        topics: Some(vec![TopicSignal {
            text: topic.to_string(),
            importance: 0.9,
        }]),
        ..Default::default()
    }
}

#[tokio::test]
async fn q4_sales_update_end_to_end() {
    let lexical = KeywordExtractor::new();
    let extractor = Arc::new(FnExtractor::new(move |text: &str| {
        let mut signal = lexical.extract(text)?;
        signal.confidence = Some(0.96);
        Ok(signal)
    }));
    let analyzer = ContextAnalyzer::new(extractor.clone(), ContextBuilder::new(0.75), gate(3));

    let ctx = analyzer
        .analyze(&EmailId::from_raw("email-q4"), Q4_UPDATE, &ThreadId::from_raw("thread-q4"))
        .await
        .unwrap();

    assert_eq!(ctx.confidence_score, 0.96);
    assert!(!ctx.project_contexts.is_empty());
    assert!(ctx.project_contexts.iter().all(|p| !p.key_terms.is_empty()));
    assert!(!ctx.relationship_contexts.is_empty());
    assert!(ctx.topics.iter().any(|t| t.contains("sales")));
    assert_eq!(extractor.call_count(), 1);
    mailctx_engine::validator::validate(&ctx).unwrap();
}

#[tokio::test]
async fn batch_isolates_failing_item() {
    let extractor = Arc::new(FnExtractor::new(|text: &str| {
        if text == "body-3" {
            Err(InferenceError::MalformedOutput("unparseable".into()))
        } else {
            Ok(signal(0.9, text))
        }
    }));
    let analyzer = ContextAnalyzer::new(extractor, ContextBuilder::new(0.75), gate(3));
    let items: Vec<_> = (1..=5)
        .map(|i| BatchItem::new(format!("email-{i}"), format!("body-{i}"), format!("thread-{i}")))
        .collect();

    let outcome = analyzer.analyze_batch(items, &CancellationToken::new()).await;

    assert_eq!(outcome.succeeded.len(), 4);
    assert_eq!(outcome.failed.len(), 1);
    let (failed_id, err) = &outcome.failed[0];
    assert_eq!(failed_id.as_str(), "email-3");
    assert_eq!(err.error_kind(), "inference");
    let ok_ids: Vec<_> = outcome.succeeded.iter().map(|c| c.email_id.as_str().to_string()).collect();
    assert_eq!(ok_ids, ["email-1", "email-2", "email-4", "email-5"]);
}

#[tokio::test]
async fn retry_ceiling_is_exact() {
    let extractor = Arc::new(FnExtractor::new(|text: &str| Ok(signal(0.0, text))));
    let analyzer = ContextAnalyzer::new(extractor.clone(), ContextBuilder::new(0.75), gate(3));

    let err = analyzer
        .analyze(&EmailId::from_raw("email-1"), "budget", &ThreadId::from_raw("thread-1"))
        .await
        .unwrap_err();

    assert_eq!(extractor.call_count(), 3);
    assert!(matches!(
        err,
        EngineError::ConfidenceNotReached { attempts: 3, best_confidence, .. } if best_confidence == 0.0
    ));
}

#[tokio::test]
async fn incomplete_signals_exhaust_retries() {
    let extractor = Arc::new(ScriptedExtractor::always(AnalysisSignal {
        confidence: Some(0.9),
        topics: None,
        ..Default::default()
    }));
    let analyzer = ContextAnalyzer::new(extractor.clone(), ContextBuilder::new(0.75), gate(2));
    let err = analyzer
        .analyze(&EmailId::from_raw("email-1"), "text", &ThreadId::from_raw("thread-1"))
        .await
        .unwrap_err();
    assert_eq!(extractor.call_count(), 2);
    match err {
        EngineError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, EngineError::IncompleteSignal("topics")));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn slow_extraction_hits_deadline() {
    let extractor = Arc::new(ScriptedExtractor::new(vec![Scripted::delayed(
        Duration::from_secs(60),
        Scripted::Ok(signal(0.9, "budget")),
    )]));
    let gate = ConfidenceGate::new(
        0.75,
        RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(1))).with_deadline(Duration::from_secs(30)),
    );
    let analyzer = ContextAnalyzer::new(extractor, ContextBuilder::new(0.75), gate);

    let err = analyzer
        .analyze(&EmailId::from_raw("email-1"), "text", &ThreadId::from_raw("thread-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_secs(30)));
}

#[tokio::test]
async fn merging_real_analyses_is_idempotent() {
    let extractor = Arc::new(FnExtractor::new(|text: &str| {
        let mut s = KeywordExtractor::new().extract(text)?;
        s.confidence = Some(0.9);
        Ok(s)
    }));
    let analyzer = ContextAnalyzer::new(extractor, ContextBuilder::new(0.75), gate(1));
    let thread = ThreadId::from_raw("thread-1");
    let ctx = analyzer
        .analyze(&EmailId::from_raw("email-1"), Q4_UPDATE, &thread)
        .await
        .unwrap();

    let mut merged = analyzer.merge(&ctx, &ctx).unwrap();
    assert_eq!(merged.update_count_raw(), Some("1"));
    merged.metadata.remove("update_count");
    assert_eq!(merged, ctx);
}

#[tokio::test]
async fn union_fields_commute() {
    let extractor = Arc::new(FnExtractor::new(|text: &str| {
        let mut s = KeywordExtractor::new().extract(text)?;
        s.confidence = Some(0.9);
        Ok(s)
    }));
    let analyzer = ContextAnalyzer::new(extractor, ContextBuilder::new(0.75), gate(1));
    let thread = ThreadId::from_raw("thread-1");
    let a = analyzer
        .analyze(&EmailId::from_raw("email-1"), "Budget review with the client.", &thread)
        .await
        .unwrap();
    let b = analyzer
        .analyze(&EmailId::from_raw("email-2"), "Hiring plan, ask the team.", &thread)
        .await
        .unwrap();

    let ab = merger::merge(&a, &b).unwrap();
    let ba = merger::merge(&b, &a).unwrap();

    let set = |topics: &[String]| topics.iter().cloned().collect::<std::collections::BTreeSet<_>>();
    assert_eq!(set(&ab.topics), set(&ba.topics));
    let keys = |c: &mailctx_core::context::Context| {
        c.project_contexts
            .iter()
            .map(|p| p.project_id.clone())
            .collect::<std::collections::BTreeSet<_>>()
    };
    assert_eq!(keys(&ab), keys(&ba));
    assert_eq!(ab.confidence_score, ba.confidence_score);
}

#[tokio::test]
async fn thread_context_accumulates_across_emails() {
    let extractor = Arc::new(FnExtractor::new(|text: &str| Ok(signal(0.9, text))));
    let repo = ContextRepo::new(Database::in_memory().unwrap());
    let analyzer =
        ContextAnalyzer::new(extractor, ContextBuilder::new(0.75), gate(3)).with_store(repo.clone());
    let thread = ThreadId::from_raw("thread-acc");

    for (i, topic) in ["budget", "hiring", "budget"].iter().enumerate() {
        analyzer
            .analyze_and_store(&EmailId::from_raw(format!("email-{i}")), topic, &thread)
            .await
            .unwrap();
    }

    let stored = repo.get_by_thread(&thread).unwrap().unwrap();
    assert_eq!(stored.revision, 3);
    assert_eq!(stored.context.topics, vec!["budget".to_string(), "hiring".to_string()]);
    assert_eq!(stored.context.update_count_raw(), Some("2"));
    assert_eq!(repo.history(&stored.context.context_id).unwrap().len(), 3);
}

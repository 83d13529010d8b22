//! From analyzed email to stored reply and a customised variant of it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mailctx_core::context::Context;
use mailctx_core::ids::{EmailId, ThreadId};
use mailctx_core::response::{lineage, ContextData, Customization, Preferences};
use mailctx_core::template::NewTemplate;
use mailctx_core::wire::{ResponseStatus, ResponseTone};
use mailctx_engine::generator::{EMAIL_CONTENT, THREAD_ID};
use mailctx_engine::{
    Backoff, ConfidenceGate, ContextAnalyzer, ContextBuilder, EngineError, RecordingSleeper, ResponseGenerator,
    ResponseRules, ResponseValidator, RetryPolicy, TemplateRules, TemplateStore,
};
use mailctx_inference::mock::{FixedScorer, FnExtractor, MockGenerator};
use mailctx_inference::KeywordExtractor;
use mailctx_store::{Database, ResponseRepo, TemplateRepo};

const EMAIL: &str = "Important project update for Q4 sales targets. Meeting with stakeholders tomorrow.";
const REPLY: &str = "Dear team,\n\nThank you for the update. I would like to review the sales figures \
                     regarding Q4 before the meeting. Please share the latest numbers.\n\nBest regards,\nSam";

fn generator(db: &Database, llm: Arc<MockGenerator>) -> ResponseGenerator {
    let scorer = Arc::new(FixedScorer::new(0.85));
    ResponseGenerator::new(
        TemplateStore::new(TemplateRepo::new(db.clone()), scorer.clone(), TemplateRules::default()),
        llm,
        ResponseValidator::new(ResponseRules::default(), scorer),
        ResponseRepo::new(db.clone()),
        RetryPolicy::new(2, Backoff::Fixed(Duration::from_millis(10))),
    )
    .with_sleeper(Arc::new(RecordingSleeper::new()))
}

async fn analyze() -> Context {
    let extractor = Arc::new(FnExtractor::new(|text: &str| {
        let mut s = KeywordExtractor::new().extract(text)?;
        s.confidence = Some(0.96);
        Ok(s)
    }));
    let gate = ConfidenceGate::new(0.75, RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(10))))
        .with_sleeper(Arc::new(RecordingSleeper::new()));
    ContextAnalyzer::new(extractor, ContextBuilder::new(0.75), gate)
        .analyze(&EmailId::from_raw("email-q4"), EMAIL, &ThreadId::from_raw("thread-q4"))
        .await
        .unwrap()
}

fn context_data(ctx: &Context) -> ContextData {
    let mut data = ContextData::new();
    data.insert(EMAIL_CONTENT.into(), json!(EMAIL));
    data.insert(THREAD_ID.into(), json!(ctx.thread_id.as_str()));
    data.insert("topics".into(), json!(ctx.topics));
    if let Some(project) = ctx.project_contexts.first() {
        data.insert("project".into(), json!(project.name));
    }
    data
}

#[tokio::test]
async fn analyzed_email_gets_a_templated_reply() {
    let ctx = analyze().await;
    let db = Database::in_memory().unwrap();
    let llm = Arc::new(MockGenerator::always(REPLY));
    let generator = generator(&db, llm.clone());
    let template = generator
        .templates()
        .create(NewTemplate {
            name: "project update ack".into(),
            content: "Dear team, thank you for the update on {project}. I would like to review it before we meet."
                .into(),
            tone: ResponseTone::Professional,
            ..Default::default()
        })
        .await
        .unwrap();

    let reply = generator
        .generate_response(
            &EmailId::from_raw("email-q4"),
            &context_data(&ctx),
            ResponseTone::Professional,
            &Preferences::default(),
        )
        .await
        .unwrap();

    assert_eq!(reply.status, ResponseStatus::Generated);
    assert_eq!(reply.thread_id.as_ref(), Some(&ctx.thread_id));
    assert_eq!(reply.template_id.as_ref(), Some(&template.template_id));
    assert!(!llm.prompts()[0].contains("{project}"));
    let usage = generator.templates().get(&template.template_id).unwrap().usage_metrics;
    assert_eq!(usage.usage_count, 1);
}

#[tokio::test]
async fn customizing_keeps_the_original() {
    let ctx = analyze().await;
    let db = Database::in_memory().unwrap();
    let generator = generator(&db, Arc::new(MockGenerator::always(REPLY)));
    let original = generator
        .generate_response(
            &EmailId::from_raw("email-q4"),
            &context_data(&ctx),
            ResponseTone::Professional,
            &Preferences {
                signature: Some("Sam Lee, Sales Ops".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(original.content.ends_with("Sam Lee, Sales Ops"));

    let custom = generator
        .customize_response(
            &original.response_id,
            Customization {
                replacements: vec![("latest numbers".into(), "final Q4 numbers".into())],
                ..Default::default()
            },
            true,
        )
        .await
        .unwrap();

    assert_ne!(custom.response_id, original.response_id);
    assert_eq!(custom.status, ResponseStatus::Customized);
    assert!(custom.content.contains("final Q4 numbers"));
    assert_eq!(custom.original_response_id(), Some(original.response_id.as_str()));
    assert_eq!(custom.context_data, original.context_data);
    assert_eq!(custom.metadata[lineage::ORIGINAL_CONTENT], json!(original.content));

    let stored_original = generator.get_response(&original.response_id).unwrap();
    assert_eq!(stored_original.content, original.content);
    assert_eq!(stored_original.status, ResponseStatus::Generated);
}

#[tokio::test]
async fn reply_with_prohibited_terms_is_rejected() {
    let ctx = analyze().await;
    let db = Database::in_memory().unwrap();
    let leaky = format!("{REPLY}\nThis figure is confidential.");
    let generator = generator(&db, Arc::new(MockGenerator::always(leaky)));

    let err = generator
        .generate_response(
            &EmailId::from_raw("email-q4"),
            &context_data(&ctx),
            ResponseTone::Professional,
            &Preferences::default(),
        )
        .await
        .unwrap_err();

    match err {
        EngineError::ResponseRejected { reason, confidence } => {
            assert!(reason.contains("confidential"));
            assert_eq!(confidence, 0.85);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::backend::{BackendKind, Fragment, StreamBackend};
use crate::core::error::{BackendError, PipelineError, TransportError};
use crate::core::memory::ConversationStore;
use crate::core::message::{ConversationId, Role};
use crate::core::pipeline::{Pipeline, PipelineSettings, TurnOutcome, FAILURE_NOTICE};
use crate::core::render::render;
use crate::core::templates::{PromptRendering, Template, TemplateSet};
use crate::utils::test_utils::{scripted, RecordingTransport, ScriptedBackend};

fn test_templates() -> TemplateSet {
    TemplateSet::from_templates(vec![Template {
        name: "test".to_string(),
        system_prompt: "SYS".to_string(),
        header: "{system_prompt}\n".to_string(),
        user: "USER: {input}\n".to_string(),
        output: "ASSISTANT: {output}\n".to_string(),
        max_context_chars: None,
    }])
}

fn pipeline_with(
    backend: Arc<dyn StreamBackend>,
    transport: Arc<RecordingTransport>,
    settings: PipelineSettings,
) -> Pipeline {
    let store = Arc::new(ConversationStore::new(test_templates(), "test"));
    Pipeline::new(store, backend, transport, settings)
}

fn text(value: &str) -> Fragment {
    Fragment::Text(value.to_string())
}

#[tokio::test(start_paused = true)]
async fn fragments_are_coalesced_into_one_periodic_and_one_final_flush() {
    let (_, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "a"), (100, "b"), (200, "c"), (600, "d")],
        600,
    ));
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());
    let start = Instant::now();

    let outcome = pipeline
        .handle_user_turn(&ConversationId::from("c1"), "go")
        .await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "abcd".to_string()
        }
    );
    let edits = transport.recorded_edits();
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[0].text, "abc");
    assert_eq!(edits[0].at - start, Duration::from_millis(500));
    assert_eq!(edits[1].text, "abcd");
}

#[tokio::test(start_paused = true)]
async fn completed_reply_is_committed_to_memory() {
    let (backend_handle, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "hel"), (10, "lo")],
        20,
    ));
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());
    let id = ConversationId::from("c1");

    pipeline.handle_user_turn(&id, "hi").await;

    let turns = pipeline.store().turns(&id);
    let roles: Vec<Role> = turns.iter().map(|turn| turn.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(turns[2].content, "hello");
    assert_eq!(transport.edits(), vec!["hello"]);

    let requests = backend_handle.requests();
    assert_eq!(
        requests[0].input,
        PromptRendering::Text("SYS\nUSER: hi\nASSISTANT: ".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn second_turn_prompt_contains_the_first_exchange() {
    let (backend_handle, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "reply")],
        0,
    ));
    let pipeline = pipeline_with(
        backend,
        Arc::new(RecordingTransport::new()),
        PipelineSettings::default(),
    );
    let id = ConversationId::from("c1");

    pipeline.handle_user_turn(&id, "one").await;
    pipeline.handle_user_turn(&id, "two").await;

    let requests = backend_handle.requests();
    assert_eq!(
        requests[1].input.clone().into_text(),
        "SYS\nUSER: one\nASSISTANT: reply\nUSER: two\nASSISTANT: "
    );
}

#[tokio::test(start_paused = true)]
async fn messages_backends_receive_structured_history() {
    let (backend_handle, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::OpenAi,
        &[(0, "ok")],
        0,
    ));
    let pipeline = pipeline_with(
        backend,
        Arc::new(RecordingTransport::new()),
        PipelineSettings::default(),
    );

    pipeline
        .handle_user_turn(&ConversationId::from("c1"), "hi")
        .await;

    let messages = backend_handle.requests()[0].input.clone().into_messages();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["system", "user"]);
}

#[tokio::test(start_paused = true)]
async fn mid_stream_error_shows_partial_text_and_reports() {
    let (_, backend) = scripted(ScriptedBackend::new(
        BackendKind::Cumulative,
        vec![
            (Duration::ZERO, text("par")),
            (Duration::from_millis(10), text("tial")),
            (
                Duration::from_millis(20),
                Fragment::Error(BackendError::ConnectionClosed),
            ),
        ],
    ));
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());
    let id = ConversationId::from("c1");

    let outcome = pipeline.handle_user_turn(&id, "hi").await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            partial: "partial".to_string(),
            error: PipelineError::Backend(BackendError::ConnectionClosed),
        }
    );
    assert_eq!(transport.edits(), vec!["partial"]);
    let errors = transport.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, id);
    assert!(errors[0].1.contains("closed the connection"));
    assert!(pipeline.store().turns(&id)[2].is_placeholder());
}

#[tokio::test(start_paused = true)]
async fn failure_before_any_text_shows_notice() {
    let (_, backend) = scripted(ScriptedBackend::new(
        BackendKind::OpenAi,
        vec![(
            Duration::ZERO,
            Fragment::Error(BackendError::Status {
                code: 503,
                body: "overloaded".to_string(),
            }),
        )],
    ));
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());

    let outcome = pipeline
        .handle_user_turn(&ConversationId::from("c1"), "hi")
        .await;

    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: PipelineError::Backend(BackendError::Status { code: 503, .. }),
            ..
        }
    ));
    assert_eq!(
        transport.edits(),
        vec![render(FAILURE_NOTICE).display_text()]
    );
    assert!(transport.errors()[0].1.contains("503"));
}

#[tokio::test(start_paused = true)]
async fn missing_template_fails_the_turn_without_calling_the_backend() {
    let (backend_handle, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::OpenAi,
        &[(0, "unused")],
        0,
    ));
    let transport = Arc::new(RecordingTransport::new());
    let store = Arc::new(ConversationStore::new(test_templates(), "missing"));
    let pipeline = Pipeline::new(store, backend, transport.clone(), PipelineSettings::default());
    let id = ConversationId::from("c1");

    let outcome = pipeline.handle_user_turn(&id, "hi").await;

    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: PipelineError::Template(_),
            ..
        }
    ));
    assert!(backend_handle.requests().is_empty());
    assert!(!pipeline.store().has_history(&id));
    assert!(transport.errors()[0].1.contains("template 'missing' not found"));
    assert_eq!(transport.edits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn placeholder_failure_fails_before_recording_the_turn() {
    let (_, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::OpenAi,
        &[(0, "unused")],
        0,
    ));
    let transport = Arc::new(RecordingTransport::failing_placeholders());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());
    let id = ConversationId::from("c1");

    let outcome = pipeline.handle_user_turn(&id, "hi").await;

    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: PipelineError::Transport(TransportError::Delivery(_)),
            ..
        }
    ));
    assert!(!pipeline.store().has_history(&id));
    assert_eq!(transport.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_updates_and_leaves_placeholder_empty() {
    let (_, backend) = scripted(
        ScriptedBackend::new(
            BackendKind::Cumulative,
            vec![(Duration::ZERO, text("started"))],
        )
        .hanging(),
    );
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());
    let id = ConversationId::from("c1");
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });
    let outcome = pipeline.handle_user_turn_until(&id, "hi", &cancel).await;

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(transport.edits(), vec!["started"]);
    assert!(transport.errors().is_empty());
    assert!(pipeline.store().turns(&id)[2].is_placeholder());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.edits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn bot_mention_is_stripped_before_recording() {
    let (backend_handle, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "ok")],
        0,
    ));
    let settings = PipelineSettings {
        bot_username: Some("@relay_bot".to_string()),
        ..PipelineSettings::default()
    };
    let pipeline = pipeline_with(backend, Arc::new(RecordingTransport::new()), settings);
    let id = ConversationId::from("group");

    pipeline.handle_user_turn(&id, "@relay_bot  what's up").await;

    assert_eq!(pipeline.store().turns(&id)[1].content, "what's up");
    let prompt = backend_handle.requests()[0].input.clone().into_text();
    assert!(!prompt.contains("@relay_bot"));
}

#[tokio::test(start_paused = true)]
async fn snapshot_backends_update_on_every_fragment() {
    let (_, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Buffered,
        &[(0, "Hi"), (10, "Hi there")],
        10,
    ));
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());

    let outcome = pipeline
        .handle_user_turn(&ConversationId::from("c1"), "hello")
        .await;

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "Hi there".to_string()
        }
    );
    assert_eq!(transport.edits(), vec!["Hi", "Hi there"]);
}

#[tokio::test(start_paused = true)]
async fn slow_display_never_loses_fragments() {
    let steps: Vec<(u64, String)> = (0..40).map(|n| (n * 50, format!("{n} "))).collect();
    let step_refs: Vec<(u64, &str)> = steps.iter().map(|(ms, s)| (*ms, s.as_str())).collect();
    let (_, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &step_refs,
        2000,
    ));
    let transport = Arc::new(RecordingTransport::with_edit_delay(Duration::from_millis(
        700,
    )));
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());

    let outcome = pipeline
        .handle_user_turn(&ConversationId::from("c1"), "count")
        .await;

    let expected: String = steps.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: expected.clone()
        }
    );
    let edits = transport.recorded_edits();
    assert_eq!(edits.last().unwrap().text, expected);
    for pair in edits.windows(2) {
        assert!(pair[1].text.starts_with(&pair[0].text));
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(500));
    }
}

#[tokio::test(start_paused = true)]
async fn conversations_stream_concurrently() {
    let (_, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "x"), (300, "y")],
        300,
    ));
    let transport = Arc::new(RecordingTransport::new());
    let pipeline = pipeline_with(backend, transport.clone(), PipelineSettings::default());
    let a = ConversationId::from("a");
    let b = ConversationId::from("b");
    let start = Instant::now();

    let (first, second) = tokio::join!(
        pipeline.handle_user_turn(&a, "one"),
        pipeline.handle_user_turn(&b, "two")
    );

    assert_eq!(Instant::now() - start, Duration::from_millis(300));
    assert_eq!(first, TurnOutcome::Completed { text: "xy".into() });
    assert_eq!(second, TurnOutcome::Completed { text: "xy".into() });
    assert_eq!(pipeline.store().turns(&a)[2].content, "xy");
    assert_eq!(pipeline.store().turns(&b)[2].content, "xy");
}

#[tokio::test(start_paused = true)]
async fn wiping_history() {
    let (_, backend) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "ok")],
        0,
    ));
    let pipeline = pipeline_with(
        backend,
        Arc::new(RecordingTransport::new()),
        PipelineSettings::default(),
    );
    let id = ConversationId::from("c1");

    assert!(!pipeline.wipe_history(&ConversationId::from("never-seen")));
    pipeline.handle_user_turn(&id, "hi").await;
    assert!(pipeline.wipe_history(&id));
    assert!(!pipeline.wipe_history(&id));
    assert!(!pipeline.store().has_history(&id));
}

#[tokio::test(start_paused = true)]
async fn replaced_backend_serves_the_next_turn() {
    let (first_handle, first) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "one")],
        0,
    ));
    let (second_handle, second) = scripted(ScriptedBackend::timed_text(
        BackendKind::Cumulative,
        &[(0, "two")],
        0,
    ));
    let pipeline = pipeline_with(
        first,
        Arc::new(RecordingTransport::new()),
        PipelineSettings::default(),
    );
    let id = ConversationId::from("c1");

    pipeline.handle_user_turn(&id, "a").await;
    pipeline.set_backend(second);
    let outcome = pipeline.handle_user_turn(&id, "b").await;

    assert_eq!(outcome, TurnOutcome::Completed { text: "two".into() });
    assert_eq!(first_handle.requests().len(), 1);
    assert_eq!(second_handle.requests().len(), 1);
}

use super::*;
use crate::settings::EngineSettings;
use crate::tests::mocks::{
    complete_calls, create_test_task, registry_with, Behavior, Gate, MockTool, MockUI,
};
use crate::tools::core::ToolKind;
use crate::types::{InvocationRef, StructuredToolResult, TranscriptEntry};
use crate::ui::AskResponse;
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

fn text(text: &str) -> StreamEvent {
    StreamEvent::Text {
        text: text.to_string(),
    }
}

fn start(id: &str, name: &str, arguments: serde_json::Value) -> StreamEvent {
    StreamEvent::ToolCallStart {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

fn delta(id: &str, fragment: &str) -> StreamEvent {
    StreamEvent::ToolCallDelta {
        id: id.to_string(),
        fragment: fragment.to_string(),
    }
}

fn stop(id: &str) -> StreamEvent {
    StreamEvent::ToolCallStop { id: id.to_string() }
}

async fn run_turn(turn: &Turn, events: &[StreamEvent]) -> Result<()> {
    for event in events {
        turn.handle_event(event).await?;
    }
    turn.finish_stream().await?;
    Ok(())
}

fn tool_result(entry: &TranscriptEntry) -> &StructuredToolResult {
    match entry {
        TranscriptEntry::ToolResult(result) => result,
        other => panic!("Expected tool result, got {other:?}"),
    }
}

fn entry_text(entry: &TranscriptEntry) -> &str {
    match entry {
        TranscriptEntry::Text { text } => text,
        other => panic!("Expected text entry, got {other:?}"),
    }
}

#[tokio::test]
async fn test_text_only_turn() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(ui.clone(), registry_with(vec![]), EngineSettings::default());
    let turn = task.begin_turn();

    turn.handle_event(&text("Hello")).await?;
    assert!(!turn.is_outbound_ready());
    turn.finish_stream().await?;

    assert_eq!(
        ui.texts(),
        vec![("Hello".to_string(), true), ("Hello".to_string(), false)]
    );
    assert!(turn.is_outbound_ready());
    assert!(turn.transcript().is_empty());
    assert!(!turn.should_interrupt_stream());
    assert!(!turn.cursor().locked);
    Ok(())
}

#[tokio::test]
async fn test_partial_text_hides_dangling_tag() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(ui.clone(), registry_with(vec![]), EngineSettings::default());
    let turn = task.begin_turn();

    turn.handle_event(&text("Let me look <read_fi")).await?;

    assert_eq!(ui.texts(), vec![("Let me look".to_string(), true)]);
    Ok(())
}

#[tokio::test]
async fn test_only_first_tool_executes() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("print('a')");
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[text(
            "<read_file><path>a.py</path></read_file><read_file><path>b.py</path></read_file>",
        )],
    )
    .await?;

    let executed = complete_calls(&calls);
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].param("path"), Some("a.py"));

    let transcript = turn.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(
        entry_text(&transcript[0]),
        "[read_file for 'a.py'] Result:\nprint('a')"
    );

    let outcomes = turn.outcomes();
    assert_eq!(
        outcomes[0].reference,
        InvocationRef::Tag {
            name: "read_file".to_string(),
            block_index: 0
        }
    );
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].is_error);

    let cursor = turn.cursor();
    assert_eq!(cursor.index, cursor.blocks.len());
    assert!(turn.is_outbound_ready());
    assert!(turn.should_interrupt_stream());
    assert_eq!(task.tool_usage(), vec![(ToolKind::ReadFile, 1)]);
    Ok(())
}

#[tokio::test]
async fn test_text_after_tool_is_not_displayed() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, MockTool::responding("ok"))]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[
            text("Reading.\n<read_file><path>a.py</path></read_file>"),
            text("\nDone reading"),
        ],
    )
    .await?;

    let texts: Vec<String> = ui.texts().into_iter().map(|(text, _)| text).collect();
    assert!(texts.iter().all(|text| !text.contains("Done reading")), "{texts:?}");
    assert!(texts.iter().any(|text| text.contains("Reading.")));
    Ok(())
}

#[tokio::test]
async fn test_structured_call_is_bridged() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("written");
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::WriteToFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[
            start("t1", "write_to_file", json!({})),
            delta("t1", r#"{"path":"x"#),
            delta("t1", r#".txt","content":"hi"}"#),
            stop("t1"),
        ],
    )
    .await?;

    let executed = complete_calls(&calls);
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].param("path"), Some("x.txt"));
    assert_eq!(executed[0].param("content"), Some("hi"));

    assert_eq!(
        turn.transcript(),
        vec![TranscriptEntry::ToolResult(StructuredToolResult {
            tool_use_id: "t1".to_string(),
            content: "written".to_string(),
            is_error: false,
        })]
    );
    assert!(turn.is_outbound_ready());
    Ok(())
}

#[tokio::test]
async fn test_structured_name_is_sanitized() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("contents");
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(&turn, &[start("t1", "read.file", json!({"path": "a.py"})), stop("t1")]).await?;

    let executed = complete_calls(&calls);
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].name, "read_file");
    assert_eq!(executed[0].param("path"), Some("a.py"));

    let transcript = turn.transcript();
    assert_eq!(transcript.len(), 1);
    let result = tool_result(&transcript[0]);
    assert_eq!(result.tool_use_id, "t1");
    assert_eq!(result.content, "contents");
    assert!(!result.is_error);
    Ok(())
}

#[tokio::test]
async fn test_second_structured_call_leaves_no_result() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("contents");
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[
            start("t1", "read_file", json!({"path": "a.py"})),
            stop("t1"),
            start("t2", "read_file", json!({"path": "b.py"})),
            stop("t2"),
        ],
    )
    .await?;

    assert_eq!(complete_calls(&calls).len(), 1);
    let transcript = turn.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(tool_result(&transcript[0]).tool_use_id, "t1");
    assert_eq!(turn.outcomes().len(), 1);
    assert!(turn.is_outbound_ready());
    Ok(())
}

#[tokio::test]
async fn test_mode_refusal_carries_call_id() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("written");
    let calls = tool.calls();
    let settings = EngineSettings {
        mode: "ask".to_string(),
        ..EngineSettings::default()
    };
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::WriteToFile, tool)]),
        settings,
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[
            start("t1", "write_to_file", json!({"path": "x.txt", "content": "hi"})),
            stop("t1"),
        ],
    )
    .await?;

    assert!(calls.lock().unwrap().is_empty());
    let transcript = turn.transcript();
    assert_eq!(transcript.len(), 1);
    let result = tool_result(&transcript[0]);
    assert_eq!(result.tool_use_id, "t1");
    assert!(result.is_error);
    assert!(result.content.contains("not allowed in ask mode"), "{}", result.content);
    assert_eq!(task.consecutive_mistakes(), 1);
    Ok(())
}

#[tokio::test]
async fn test_file_restriction_checked_on_complete_call() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("written");
    let calls = tool.calls();
    let settings = EngineSettings {
        mode: "architect".to_string(),
        ..EngineSettings::default()
    };
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::WriteToFile, tool)]),
        settings,
    );

    let turn = task.begin_turn();
    run_turn(
        &turn,
        &[text("<write_to_file><path>main.rs</path><content>fn main() {}</content></write_to_file>")],
    )
    .await?;
    assert!(complete_calls(&calls).is_empty());
    assert!(turn.outcomes()[0].is_error);

    let turn = task.begin_turn();
    run_turn(
        &turn,
        &[text("<write_to_file><path>plan.md</path><content># Plan</content></write_to_file>")],
    )
    .await?;
    assert_eq!(complete_calls(&calls).len(), 1);
    assert!(!turn.outcomes()[0].is_error);
    Ok(())
}

#[tokio::test]
async fn test_handler_error_releases_lock() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(
            ToolKind::ReadFile,
            MockTool::new(Behavior::Fail("disk unavailable".to_string())),
        )]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(&turn, &[start("t1", "read_file", json!({"path": "a.py"})), stop("t1")]).await?;

    let transcript = turn.transcript();
    let result = tool_result(&transcript[0]);
    assert!(result.is_error);
    assert_eq!(
        result.content,
        "The tool execution failed with the following error:\n<error>\ndisk unavailable\n</error>"
    );
    assert_eq!(ui.errors(), vec!["Error executing read_file:\ndisk unavailable".to_string()]);
    assert!(!turn.cursor().locked);
    assert!(turn.is_outbound_ready());
    // Execution failures are not model mistakes
    assert_eq!(task.consecutive_mistakes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_handler_panic_is_contained() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(
            ToolKind::ReadFile,
            MockTool::new(Behavior::Panic("boom".to_string())),
        )]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;

    let outcomes = turn.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_error);
    assert!(outcomes[0].result_text.contains("panicked: boom"));
    assert!(!turn.cursor().locked);
    assert!(turn.is_outbound_ready());

    // The task stays usable
    let turn = task.begin_turn();
    run_turn(&turn, &[text("Still here")]).await?;
    assert!(turn.is_outbound_ready());
    Ok(())
}

#[tokio::test]
async fn test_handler_without_result_gets_empty_result() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ListFiles, MockTool::new(Behavior::Silent))]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(&turn, &[start("t1", "list_files", json!({"path": "."})), stop("t1")]).await?;

    let transcript = turn.transcript();
    assert_eq!(
        tool_result(&transcript[0]),
        &StructuredToolResult {
            tool_use_id: "t1".to_string(),
            content: String::new(),
            is_error: false,
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_denial_skips_remaining_tools() -> Result<()> {
    let ui = Arc::new(MockUI::with_responses(vec![AskResponse::Denied {
        feedback: Some("read b.py instead".to_string()),
    }]));
    let tool = MockTool::new(Behavior::AskApproval("contents".to_string()));
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[text(
            "<read_file><path>a.py</path></read_file>\nAnd then <read_file><path>b.py</path></read_file>",
        )],
    )
    .await?;

    assert_eq!(ui.asks().len(), 1);
    let outcomes = turn.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].is_error);
    assert!(outcomes[0].result_text.contains("denied"));
    assert!(outcomes[0].result_text.contains("read b.py instead"));
    let transcript = turn.transcript();
    assert_eq!(transcript.len(), 1);
    assert!(!entry_text(&transcript[0]).contains("b.py'"));
    assert!(ui.texts().is_empty());
    assert!(turn.should_interrupt_stream());
    Ok(())
}

#[tokio::test]
async fn test_approval_feedback_is_appended() -> Result<()> {
    let ui = Arc::new(MockUI::with_responses(vec![AskResponse::Approved {
        feedback: Some("skip the tests".to_string()),
    }]));
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(
            ToolKind::ReadFile,
            MockTool::new(Behavior::AskApproval("contents".to_string())),
        )]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;

    let outcome = &turn.outcomes()[0];
    assert!(outcome.result_text.starts_with("contents\n\n"));
    assert!(outcome.result_text.contains("<feedback>\nskip the tests\n</feedback>"));
    assert!(!outcome.is_error);
    Ok(())
}

#[tokio::test]
async fn test_auto_approval_skips_prompt() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let mut settings = EngineSettings::default();
    settings.auto_approval.read_only = true;
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(
            ToolKind::ReadFile,
            MockTool::new(Behavior::AskApproval("contents".to_string())),
        )]),
        settings,
    );
    let turn = task.begin_turn();

    run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;

    assert!(ui.asks().is_empty());
    assert_eq!(turn.outcomes()[0].result_text, "contents");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_updates_coalesce() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let gate = Gate::default();
    let tool = MockTool::new(Behavior::Gated(gate.clone(), "contents".to_string()));
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    let tool_text = text("<read_file><path>a.py</path></read_file>");
    let first = turn.handle_event(&tool_text);
    let updates = async {
        gate.started.notified().await;
        assert!(turn.cursor().locked);
        // Both return immediately while the handler is running
        turn.handle_event(&text(" more")).await?;
        turn.handle_event(&text(" text")).await?;
        assert!(turn.cursor().pending_rerun);
        gate.release.notify_one();
        Ok::<(), DispatchError>(())
    };
    let (first, updates) = tokio::join!(first, updates);
    first?;
    updates?;

    let cursor = turn.cursor();
    assert!(!cursor.locked);
    assert!(!cursor.pending_rerun);
    assert_eq!(cursor.index, cursor.blocks.len());
    assert_eq!(complete_calls(&calls).len(), 1);
    assert!(ui.texts().is_empty());

    turn.finish_stream().await?;
    assert!(turn.is_outbound_ready());
    assert_eq!(turn.transcript().len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_updates_present_latest_blocks() -> Result<()> {
    for _ in 0..20 {
        let ui = Arc::new(MockUI::new());
        let task = create_test_task(ui.clone(), registry_with(vec![]), EngineSettings::default());
        let turn = Arc::new(task.begin_turn());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let turn = turn.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        turn.handle_event(&text("ab ")).await?;
                    }
                    Ok::<(), DispatchError>(())
                })
            })
            .collect();
        for handle in handles {
            handle.await??;
        }

        let cursor = turn.cursor();
        assert!(!cursor.locked);
        assert!(!cursor.pending_rerun);
        assert_eq!(cursor.blocks, turn.blocks());

        let (last, partial) = ui.texts().pop().expect("text was displayed");
        assert!(partial);
        assert_eq!(last.trim_end(), "ab ".repeat(80).trim_end());
    }
    Ok(())
}

#[tokio::test]
async fn test_abort_stops_presentation() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("contents");
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();
    task.abort();

    let err = turn
        .handle_event(&text("Hi <read_file><path>a.py</path></read_file>"))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        DispatchError::Aborted { task_id, turn_id } if task_id == "t" && turn_id == "t-1"
    ));
    assert!(ui.says().is_empty());
    assert!(calls.lock().unwrap().is_empty());
    assert!(!turn.cursor().locked);
    assert!(turn.finish_stream().await.is_err());
    assert!(!turn.is_outbound_ready());
    Ok(())
}

#[tokio::test]
async fn test_truncated_structured_call() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("contents");
    let calls = tool.calls();
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        EngineSettings::default(),
    );
    let turn = task.begin_turn();

    run_turn(
        &turn,
        &[start("t1", "read_file", json!({})), delta("t1", r#"{"path": "a."#)],
    )
    .await?;

    assert!(complete_calls(&calls).is_empty());
    let transcript = turn.transcript();
    assert_eq!(transcript.len(), 1);
    let result = tool_result(&transcript[0]);
    assert_eq!(result.tool_use_id, "t1");
    assert!(result.is_error);
    assert!(result.content.contains("truncated"));
    assert_eq!(task.consecutive_mistakes(), 1);
    assert!(turn.is_outbound_ready());
    Ok(())
}

#[tokio::test]
async fn test_unknown_structured_tool() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(ui.clone(), registry_with(vec![]), EngineSettings::default());
    let turn = task.begin_turn();

    run_turn(&turn, &[start("t1", "format_disk", json!({})), stop("t1")]).await?;

    let transcript = turn.transcript();
    let result = tool_result(&transcript[0]);
    assert_eq!(result.tool_use_id, "t1");
    assert!(result.is_error);
    assert!(result.content.contains("Unknown tool 'format_disk'"));
    Ok(())
}

#[tokio::test]
async fn test_repeated_calls_are_refused() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let tool = MockTool::responding("contents");
    let calls = tool.calls();
    let settings = EngineSettings {
        repetition_limit: 1,
        ..EngineSettings::default()
    };
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![(ToolKind::ReadFile, tool)]),
        settings,
    );

    for _ in 0..2 {
        let turn = task.begin_turn();
        run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;
    }
    assert_eq!(complete_calls(&calls).len(), 1);
    assert_eq!(task.consecutive_mistakes(), 1);

    // The guard resets after refusing
    let turn = task.begin_turn();
    run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;
    assert_eq!(complete_calls(&calls).len(), 2);
    assert_eq!(task.consecutive_mistakes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_mistakes_reset_after_success() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let settings = EngineSettings {
        mode: "ask".to_string(),
        ..EngineSettings::default()
    };
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![
            (ToolKind::ReadFile, MockTool::responding("contents")),
            (ToolKind::ExecuteCommand, MockTool::responding("ran")),
        ]),
        settings,
    );

    let turn = task.begin_turn();
    run_turn(&turn, &[text("<execute_command><command>ls</command></execute_command>")]).await?;
    assert_eq!(task.consecutive_mistakes(), 1);

    let turn = task.begin_turn();
    run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;
    assert_eq!(task.consecutive_mistakes(), 0);

    task.set_mode("code");
    let turn = task.begin_turn();
    run_turn(&turn, &[text("<execute_command><command>ls</command></execute_command>")]).await?;
    assert_eq!(turn.outcomes()[0].result_text, "ran");
    Ok(())
}

#[tokio::test]
async fn test_browser_session_closed_for_other_tools() -> Result<()> {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(
        ui.clone(),
        registry_with(vec![
            (ToolKind::ReadFile, MockTool::responding("contents")),
            (ToolKind::BrowserAction, MockTool::responding("clicked")),
        ]),
        EngineSettings::default(),
    );

    let turn = task.begin_turn();
    run_turn(&turn, &[text("<browser_action><action>click</action></browser_action>")]).await?;
    assert_eq!(ui.browser_closes(), 0);

    let turn = task.begin_turn();
    run_turn(&turn, &[text("<read_file><path>a.py</path></read_file>")]).await?;
    assert_eq!(ui.browser_closes(), 1);
    Ok(())
}

#[tokio::test]
async fn test_turn_ids_are_sequential() {
    let ui = Arc::new(MockUI::new());
    let task = create_test_task(ui, registry_with(vec![]), EngineSettings::default());
    assert_eq!(task.begin_turn().turn_id(), "t-1");
    assert_eq!(task.begin_turn().turn_id(), "t-2");
}

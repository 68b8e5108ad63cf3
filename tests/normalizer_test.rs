use conduit::mode::ProtocolVersion;
use conduit::normalizer::*;
use conduit::specs::envelope::{FragmentRole, MessageFragment};
use conduit::types::ConduitError;
use serde_json::json;

fn envelope(n: Normalized) -> conduit::specs::envelope::ResponseEnvelope {
    match n {
        Normalized::Envelope(e) => e,
        other => panic!("Expected envelope, got {:?}", other),
    }
}

#[test]
fn test_buffered_retrieval_response() {
    let raw = json!({
        "id": "chatcmpl-1",
        "model": "gpt-35-turbo",
        "created": 1700000000,
        "object": "extensions.chat.completion",
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "answer",
                "context": {"messages": [{"role": "tool", "content": "cite"}]}
            },
            "end_turn": true
        }]
    });

    let normalized = match normalize_extension_completion(&raw) {
        Ok(n) => n,
        Err(e) => panic!("Normalization failed: {:?}", e),
    };
    let env = envelope(normalized);
    assert_eq!(
        env.fragments(),
        &[MessageFragment::tool("cite"), MessageFragment::assistant("answer")]
    );
    assert_eq!(env.model, "gpt-35-turbo");
    assert_eq!(env.created, 1700000000);
    assert_eq!(env.object, "extensions.chat.completion");
}

#[test]
fn test_buffered_retrieval_without_context_is_protocol_error() {
    let raw = json!({"choices": [{"message": {"role": "assistant", "content": "answer"}}]});
    match normalize_extension_completion(&raw) {
        Err(e) => assert!(matches!(e.inner, ConduitError::Protocol(_))),
        Ok(n) => panic!("Expected protocol error, got {:?}", n),
    }
}

#[test]
fn test_error_payload_is_forwarded_exactly() {
    let raw = json!({"error": {"code": "x"}});
    for kind in [
        StreamKind::Extensions(ProtocolVersion::Current),
        StreamKind::Extensions(ProtocolVersion::Legacy),
        StreamKind::Chat,
    ] {
        match normalize_chunk(&raw, kind) {
            Normalized::UpstreamError(e) => {
                assert_eq!(serde_json::to_value(&e).unwrap(), json!({"error": {"code": "x"}}))
            }
            other => panic!("Expected upstream error for {:?}, got {:?}", kind, other),
        }
    }

    match normalize_chat_completion(&raw) {
        Ok(Normalized::UpstreamError(e)) => assert_eq!(e.error, json!({"code": "x"})),
        other => panic!("Expected upstream error, got {:?}", other),
    }
}

#[test]
fn test_passthrough_metadata_is_copied() {
    let line = r#"data: {"id":"up-9","model":"m","created":1,"object":"o","choices":[{"delta":{"content":"x"}}]}"#;
    let env = envelope(normalize_line(line, StreamKind::Extensions(ProtocolVersion::Current)));
    assert_eq!(env.id, "up-9");
    assert_eq!(env.model, "m");
    assert_eq!(env.created, 1);
    assert_eq!(env.object, "o");
    assert!(env.apim_request_id.is_none());
}

#[test]
fn test_each_streamed_event_yields_one_fragment() {
    let kind = StreamKind::Extensions(ProtocolVersion::Current);
    let events = [
        (json!({"choices": [{"delta": {"context": {"messages": [{"role": "tool", "content": "c"}]}}}]}), FragmentRole::Tool, "c"),
        (json!({"choices": [{"delta": {"role": "assistant"}}]}), FragmentRole::Assistant, ""),
        (json!({"choices": [{"delta": {"content": "text"}}]}), FragmentRole::Assistant, "text"),
        (json!({"choices": [{"delta": {"content": ""}}]}), FragmentRole::Assistant, ""),
        (json!({"choices": [{"delta": {}, "end_turn": true}]}), FragmentRole::Assistant, "[DONE]"),
    ];

    for (raw, role, content) in events {
        let env = envelope(normalize_chunk(&raw, kind));
        assert_eq!(env.choices.len(), 1);
        assert_eq!(env.fragments().len(), 1);
        assert_eq!(env.fragments()[0].role, role);
        assert_eq!(env.fragments()[0].content, content);
    }
}

#[test]
fn test_chat_chunk_with_role_and_content_keeps_text() {
    let line = r#"data: {"id":"c1","model":"gpt-4","created":1,"object":"chat.completion.chunk","choices":[{"delta":{"role":"assistant","content":"Hello"}}]}"#;
    let env = envelope(normalize_line(line, StreamKind::Chat));
    assert_eq!(env.fragments(), &[MessageFragment::assistant("Hello")][..]);

    let announce = json!({"choices": [{"delta": {"role": "assistant", "content": ""}}]});
    let env = envelope(normalize_chunk(&announce, StreamKind::Chat));
    assert_eq!(env.fragments()[0].role, FragmentRole::Assistant);
    assert_eq!(env.fragments()[0].content, "");
}

#[test]
fn test_empty_choices_is_skipped() {
    let raw = json!({"choices": [], "prompt_filter_results": []});
    assert_eq!(
        normalize_chunk(&raw, StreamKind::Chat),
        Normalized::Skip(SkipReason::NoChoices)
    );
    assert_eq!(
        normalize_chunk(&raw, StreamKind::Extensions(ProtocolVersion::Current)),
        Normalized::Skip(SkipReason::NoChoices)
    );
}

#[test]
fn test_done_frame_is_not_reemitted() {
    assert_eq!(
        normalize_line("data: [DONE]", StreamKind::Chat),
        Normalized::Skip(SkipReason::DoneMarker)
    );
}

#[test]
fn test_chat_function_call_sequence() {
    let name = json!({"choices": [{"delta": {"role": "assistant", "function_call": {"name": "send_mail", "arguments": ""}}}]});
    let args = json!({"choices": [{"delta": {"function_call": {"arguments": "{\"to\":"}}}]});
    let done = json!({"choices": [{"delta": {}, "finish_reason": "function_call"}]});

    match normalize_chunk(&name, StreamKind::Chat) {
        Normalized::Function {
            signal: FunctionSignal::Fragment { name, .. },
            ..
        } => assert_eq!(name.as_deref(), Some("send_mail")),
        other => panic!("Expected function fragment, got {:?}", other),
    }
    match normalize_chunk(&args, StreamKind::Chat) {
        Normalized::Function {
            signal: FunctionSignal::Fragment { name, arguments },
            ..
        } => {
            assert!(name.is_none());
            assert_eq!(arguments.as_deref(), Some("{\"to\":"));
        }
        other => panic!("Expected function fragment, got {:?}", other),
    }
    match normalize_chunk(&done, StreamKind::Chat) {
        Normalized::Function {
            signal: FunctionSignal::Invoke,
            ..
        } => {}
        other => panic!("Expected invoke, got {:?}", other),
    }
}

#[test]
fn test_buffered_chat_completion() {
    let plain = json!({
        "id": "c", "model": "gpt-4", "created": 3, "object": "chat.completion",
        "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}]
    });
    let env = match normalize_chat_completion(&plain) {
        Ok(n) => envelope(n),
        Err(e) => panic!("Normalization failed: {:?}", e),
    };
    assert_eq!(env.fragments(), &[MessageFragment::assistant("Hello")]);

    let call = json!({
        "choices": [{"message": {"role": "assistant", "content": null,
            "function_call": {"name": "get_nda_document", "arguments": "{}"}}}]
    });
    match normalize_chat_completion(&call) {
        Ok(Normalized::Function {
            signal: FunctionSignal::Call { name, arguments },
            ..
        }) => {
            assert_eq!(name, "get_nda_document");
            assert_eq!(arguments, "{}");
        }
        other => panic!("Expected function call, got {:?}", other),
    }
}

use bytes::Bytes;
use futures_util::StreamExt;
use conduit::blob::FsDocumentStore;
use conduit::functions::FunctionRuntime;
use conduit::logging::StreamMetric;
use conduit::mode::ProtocolVersion;
use conduit::normalizer::StreamKind;
use conduit::settings::StorageSettings;
use conduit::streaming::{StreamHandler, StreamSession};
use conduit::types::CorrelationId;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

fn session(kind: StreamKind) -> StreamSession {
    StreamSession {
        correlation: CorrelationId("corr-1".to_string()),
        history_metadata: json!({"conversation_id": "conv-1"}),
        kind,
        functions: None,
    }
}

async fn collect(
    chunks: Vec<std::io::Result<Bytes>>,
    session: &StreamSession,
) -> (Vec<Value>, StreamMetric) {
    let body = futures_util::stream::iter(chunks);
    let (tx, mut rx) = mpsc::channel::<Bytes>(64);
    let metric = StreamHandler::handle_stream(body, session, Some("apim-1".to_string()), &tx).await;
    drop(tx);

    let mut out = Vec::new();
    while let Some(line) = rx.recv().await {
        assert!(line.ends_with(b"\n"), "every item must end with a newline");
        match serde_json::from_slice::<Value>(&line) {
            Ok(v) => out.push(v),
            Err(e) => panic!("Emitted line is not JSON: {:?}", e),
        }
    }
    (out, metric)
}

fn lines(raw: &[&str]) -> Vec<std::io::Result<Bytes>> {
    raw.iter()
        .map(|l| Ok(Bytes::from(format!("data: {}\n", l))))
        .collect()
}

fn fragments(envelope: &Value) -> Value {
    envelope["choices"][0]["messages"].clone()
}

#[tokio::test]
async fn test_retrieval_stream_end_to_end() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let input = lines(&[
        r#"{"id":"u1","model":"m","created":1,"object":"o","choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"id":"u2","model":"m","created":1,"object":"o","choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"{"id":"u3","model":"m","created":1,"object":"o","choices":[{"delta":{"content":"lo"}}]}"#,
        r#"{"id":"u4","model":"m","created":1,"object":"o","choices":[{"delta":{},"end_turn":true}]}"#,
    ]);

    let (out, metric) = collect(input, &s).await;
    assert_eq!(out.len(), 4);
    assert_eq!(fragments(&out[0]), json!([{"role": "assistant", "content": ""}]));
    assert_eq!(fragments(&out[1]), json!([{"role": "assistant", "content": "Hel"}]));
    assert_eq!(fragments(&out[2]), json!([{"role": "assistant", "content": "lo"}]));
    assert_eq!(fragments(&out[3]), json!([{"role": "assistant", "content": "[DONE]"}]));

    for envelope in &out {
        assert_eq!(envelope["id"], "corr-1");
        assert_eq!(envelope["model"], "m");
        assert_eq!(envelope["created"], 1);
        assert_eq!(envelope["object"], "o");
        assert_eq!(envelope["history_metadata"], json!({"conversation_id": "conv-1"}));
        assert_eq!(envelope["apim-request-id"], "apim-1");
    }
    assert_eq!(metric.envelopes, 4);
    assert_eq!(metric.text_chars, 5);
    assert!(!metric.interrupted);
}

#[tokio::test]
async fn test_lines_split_across_chunks_are_reassembled() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let input = vec![
        Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"con")),
        Ok(Bytes::from_static(b"tent\":\"A\"}}]}\n\ndata: {\"choices\":[{\"delta\"")),
        Ok(Bytes::from_static(b":{\"content\":\"B\"}}]}\n")),
    ];

    let (out, _) = collect(input, &s).await;
    assert_eq!(out.len(), 2);
    assert_eq!(fragments(&out[0])[0]["content"], "A");
    assert_eq!(fragments(&out[1])[0]["content"], "B");
}

#[tokio::test]
async fn test_citations_are_forwarded_verbatim() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let citation = r#"{\"citations\":[{\"content\":\"clause 4.2\",\"title\":\"nda.docx\"}],\"intent\":\"[]\"}"#;
    let raw = format!(
        r#"{{"choices":[{{"delta":{{"role":"tool","context":{{"messages":[{{"role":"tool","content":"{}"}}]}}}}}}]}}"#,
        citation
    );
    let (out, metric) = collect(lines(&[raw.as_str()]), &s).await;

    assert_eq!(out.len(), 1);
    let frag = fragments(&out[0]);
    assert_eq!(frag[0]["role"], "tool");
    assert_eq!(
        frag[0]["content"],
        r#"{"citations":[{"content":"clause 4.2","title":"nda.docx"}],"intent":"[]"}"#
    );
    assert_eq!(metric.tool_fragments, 1);
}

#[tokio::test]
async fn test_malformed_line_is_dropped_and_stream_continues() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let input = lines(&[
        r#"{"choices":[{"delta":{"content":"before"}}]}"#,
        r#"{"choices":[{"delta":{"content": oops"#,
        r#"{"choices":[{"delta":{"content":"after"}}]}"#,
        "[DONE]",
    ]);

    let (out, metric) = collect(input, &s).await;
    assert_eq!(out.len(), 2);
    assert_eq!(fragments(&out[0])[0]["content"], "before");
    assert_eq!(fragments(&out[1])[0]["content"], "after");
    assert_eq!(metric.dropped_frames, 1, "only the malformed frame counts as dropped");
    assert_eq!(metric.lines, 4);
}

#[tokio::test]
async fn test_upstream_error_is_forwarded_and_reading_continues() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let input = lines(&[
        r#"{"error":{"code":"x"}}"#,
        r#"{"choices":[{"delta":{"content":"still here"}}]}"#,
    ]);

    let (out, metric) = collect(input, &s).await;
    assert_eq!(out.len(), 2);
    assert_eq!(out[0], json!({"error": {"code": "x"}}));
    assert_eq!(fragments(&out[1])[0]["content"], "still here");
    assert_eq!(metric.upstream_errors, 1);
}

#[tokio::test]
async fn test_transport_failure_ends_stream_with_error_envelope() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let mut input = lines(&[r#"{"choices":[{"delta":{"content":"partial"}}]}"#]);
    input.push(Err(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    )));
    input.extend(lines(&[r#"{"choices":[{"delta":{"content":"never"}}]}"#]));

    let (out, metric) = collect(input, &s).await;
    assert_eq!(out.len(), 2);
    assert_eq!(fragments(&out[0])[0]["content"], "partial");
    assert_eq!(out[1]["error"]["code"], "stream_interrupted");
    assert!(out[1]["error"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("connection reset")));
    assert!(metric.interrupted);
}

#[tokio::test]
async fn test_over_long_line_interrupts_stream() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let huge = "x".repeat(conduit::constants::MAX_STREAM_LINE_BYTES + 16);
    let input = vec![Ok(Bytes::from(huge)), Ok(Bytes::from_static(b"\n"))];

    let (out, metric) = collect(input, &s).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["error"]["code"], "stream_interrupted");
    assert!(metric.interrupted);
}

#[tokio::test]
async fn test_legacy_stream_shape() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Legacy));
    let input = lines(&[
        r#"{"choices":[{"messages":[{"delta":{"role":"tool","content":"cite"}}]}]}"#,
        r#"{"choices":[{"messages":[{"delta":{"role":"assistant"}}]}]}"#,
        r#"{"choices":[{"messages":[{"delta":{"content":"answer"}}]}]}"#,
    ]);

    let (out, _) = collect(input, &s).await;
    assert_eq!(out.len(), 3);
    assert_eq!(fragments(&out[0]), json!([{"role": "tool", "content": "cite"}]));
    assert_eq!(fragments(&out[1]), json!([{"role": "assistant", "content": ""}]));
    assert_eq!(fragments(&out[2]), json!([{"role": "assistant", "content": "answer"}]));
}

#[tokio::test]
async fn test_chat_stream_skips_prompt_filter_chunk() {
    let s = session(StreamKind::Chat);
    let input = lines(&[
        r#"{"id":"","model":"","created":0,"object":"","choices":[],"prompt_filter_results":[]}"#,
        r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);

    let (out, metric) = collect(input, &s).await;
    let contents: Vec<Value> = out.iter().map(|e| fragments(e)[0]["content"].clone()).collect();
    assert_eq!(contents, vec![json!(""), json!("Hi"), json!("[DONE]")]);
    assert_eq!(metric.dropped_frames, 0);
}

#[tokio::test]
async fn test_chat_stream_runs_requested_function() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let templates = dir.path().join("templates");
    if let Err(e) = std::fs::create_dir_all(&templates) {
        panic!("Failed to create container: {:?}", e);
    }
    if let Err(e) = std::fs::write(templates.join("mutual.txt"), "Mutual NDA template") {
        panic!("Failed to write template: {:?}", e);
    }

    let storage = StorageSettings {
        blob_root: dir.path().to_path_buf(),
        templates_container: Some("templates".to_string()),
        agreements_container: None,
    };
    let mut s = session(StreamKind::Chat);
    s.functions = Some(FunctionRuntime::new(
        Arc::new(FsDocumentStore::new(dir.path())),
        &storage,
        vec!["mutual.txt".to_string()],
        Vec::new(),
    ));

    let input = lines(&[
        r#"{"model":"gpt","created":7,"object":"chat.completion.chunk","choices":[{"delta":{"role":"assistant","content":null,"function_call":{"name":"get_nda_template","arguments":""}}}]}"#,
        r#"{"choices":[{"delta":{"function_call":{"arguments":"{"}}}]}"#,
        r#"{"choices":[{"delta":{"function_call":{"arguments":"}"}}}]}"#,
        r#"{"model":"gpt","created":7,"object":"chat.completion.chunk","choices":[{"delta":{},"finish_reason":"function_call"}]}"#,
    ]);

    let (out, metric) = collect(input, &s).await;
    assert_eq!(out.len(), 1, "fragments are buffered until the call is complete");
    assert_eq!(
        fragments(&out[0]),
        json!([{"role": "assistant", "content": "Mutual NDA template"}])
    );
    assert_eq!(out[0]["id"], "corr-1");
    assert_eq!(out[0]["model"], "gpt");
    assert_eq!(metric.function_calls, vec!["get_nda_template".to_string()]);
}

#[tokio::test]
async fn test_function_failure_becomes_error_envelope() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let storage = StorageSettings {
        blob_root: dir.path().to_path_buf(),
        templates_container: None,
        agreements_container: None,
    };
    let mut s = session(StreamKind::Chat);
    s.functions = Some(FunctionRuntime::new(
        Arc::new(FsDocumentStore::new(dir.path())),
        &storage,
        Vec::new(),
        Vec::new(),
    ));

    let input = lines(&[
        r#"{"choices":[{"delta":{"role":"assistant","function_call":{"name":"get_nda_template","arguments":"{}"}}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"function_call"}]}"#,
    ]);

    let (out, _) = collect(input, &s).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["error"]["code"], "function_error");
}

#[tokio::test]
async fn test_client_disconnect_stops_reading() {
    let s = session(StreamKind::Extensions(ProtocolVersion::Current));
    let input = lines(&[
        r#"{"choices":[{"delta":{"content":"one"}}]}"#,
        r#"{"choices":[{"delta":{"content":"two"}}]}"#,
        r#"{"choices":[{"delta":{"content":"three"}}]}"#,
    ]);
    let body = futures_util::stream::iter(input);
    let (tx, rx) = mpsc::channel::<Bytes>(4);
    drop(rx);

    let metric = StreamHandler::handle_stream(body, &s, None, &tx).await;
    assert_eq!(metric.lines, 0, "a closed channel ends the read loop before any read");
}

#[tokio::test]
async fn test_client_disconnect_during_silent_upstream() {
    let s = session(StreamKind::Chat);
    let keepalives = lines(&[r#"{"choices":[],"prompt_filter_results":[]}"#, "[DONE]"]);
    let body = futures_util::stream::iter(keepalives).chain(futures_util::stream::pending());
    let (tx, rx) = mpsc::channel::<Bytes>(4);

    let handle = tokio::spawn(async move {
        StreamHandler::handle_stream(Box::pin(body), &s, None, &tx).await
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(rx);

    match tokio::time::timeout(std::time::Duration::from_secs(2), handle).await {
        Ok(Ok(metric)) => assert_eq!(metric.lines, 2),
        Ok(Err(e)) => panic!("stream task panicked: {:?}", e),
        Err(_) => panic!("read loop kept waiting on the upstream after the client left"),
    }
}

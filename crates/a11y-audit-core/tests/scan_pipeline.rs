use std::{path::PathBuf, sync::Arc, time::Duration};

use a11y_audit_core::{
    AbortReason, GateConfig, LlmSettings, OpenAiClient, RateGate, ScanOptions, ScanOrchestrator,
    Severity, SourceFile,
};
use httpmock::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn settings(base_url: String) -> LlmSettings {
    LlmSettings {
        provider: "openai".into(),
        api_key: "test-key".into(),
        endpoint: Some(base_url),
        model: "gpt-test".into(),
        timeout_secs: 5,
        max_retries: 3,
    }
}

fn fast_orchestrator(base_url: String) -> ScanOrchestrator {
    let client = Arc::new(OpenAiClient::new(&settings(base_url)).unwrap());
    let gate = Arc::new(RateGate::new(GateConfig {
        concurrency_cap: 3,
        min_interval: Duration::ZERO,
    }));
    ScanOrchestrator::new(client, gate).unwrap()
}

fn fast_options() -> ScanOptions {
    ScanOptions {
        inter_batch_delay: Duration::ZERO,
        ..ScanOptions::default()
    }
}

fn completion(content: &str) -> String {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }).to_string()
}

fn sources() -> Vec<SourceFile> {
    ["f1.uxml", "f2.uxml", "f3.uxml"]
        .into_iter()
        .map(|path| SourceFile::in_memory(path, "<ui:Button text=\"Play\" style=\"color: #777\"/>"))
        .collect()
}

#[tokio::test]
#[ignore = "requires loopback networking"]
async fn openai_backed_scan_attributes_findings() {
    let server = MockServer::start();
    let with_issue = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_contains("## File: f1.uxml");
        then.status(200).body(completion(
            "Findings:\n[{\"line\": 5, \"severity\": \"Critical\", \"description\": \"Low contrast button\", \"recommendation\": \"Use darker text color\", \"wcag_rule\": \"WCAG 1.4.3\"}]",
        ));
    });
    let clean = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_contains("## File: f2.uxml");
        then.status(200).body(completion("[]"));
    });
    let clean_too = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_contains("## File: f3.uxml");
        then.status(200).body(completion("No issues found: []"));
    });

    let outcome = fast_orchestrator(server.base_url())
        .start_scan(sources(), "test-key", &fast_options(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.findings.len(), 1);
    assert_eq!(outcome.findings[0].file_path, PathBuf::from("f1.uxml"));
    assert_eq!(outcome.findings[0].severity, Severity::Critical);
    assert_eq!(outcome.scanned_files.len(), 3);
    with_issue.assert();
    clean.assert();
    clean_too.assert();
}

#[tokio::test]
#[ignore = "requires loopback networking"]
async fn rejected_key_aborts_after_first_attempt() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(401).body(
            json!({ "error": { "message": "Incorrect API key provided: sk-bad" } }).to_string(),
        );
    });

    let options = ScanOptions {
        batch_size: 1,
        ..fast_options()
    };
    let outcome = fast_orchestrator(server.base_url())
        .start_scan(sources(), "sk-bad", &options, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.findings.is_empty());
    assert!(matches!(outcome.abort, Some(AbortReason::AuthFailure { .. })));
    mock.assert_hits(1);
}

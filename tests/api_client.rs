//! JSON envelope endpoints against a mock server.

use mockito::{Matcher, Server};
use notes_stream::api::ApiClient;
use notes_stream::config::Endpoints;
use notes_stream::{ClientConfig, Error, HttpTransport, StaticCsrf};
use std::sync::Arc;

fn api(base_url: String) -> ApiClient {
    let config = ClientConfig::default().with_base_url(base_url);
    let transport = HttpTransport::new(&config, Arc::new(StaticCsrf("csrf-1".into()))).unwrap();
    ApiClient::new(Arc::new(transport), Endpoints::default())
}

#[tokio::test]
async fn test_generate_quiz_returns_task_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/notes/12/quiz/generate")
        .match_header("x-csrf-token", "csrf-1")
        .match_body(Matcher::Json(serde_json::json!({})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"data":{"task_id":"abc","message":"queued"}}"#)
        .create_async()
        .await;

    let handle = api(server.url()).generate_quiz("12").await.unwrap();

    mock.assert_async().await;
    assert_eq!(handle.task_id, "abc");
}

#[tokio::test]
async fn test_error_envelope_maps_to_api_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/notes/12/quiz/generate")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"success":false,"error":{"code":"NOTE_TOO_SHORT","message":"Note is too short","field":"content"}}"#,
        )
        .create_async()
        .await;

    let err = api(server.url()).generate_quiz("12").await.unwrap_err();
    match err {
        Error::Api {
            code,
            message,
            status,
            field,
        } => {
            assert_eq!(code, "NOTE_TOO_SHORT");
            assert_eq!(message, "Note is too short");
            assert_eq!(status, 422);
            assert_eq!(field.as_deref(), Some("content"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_error_body_uses_defaults() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/tasks/t9")
        .with_status(502)
        .with_body("<html>bad gateway</html>")
        .create_async()
        .await;

    let err = api(server.url()).get_task("t9").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Api { ref code, status: 502, .. } if code == "UNKNOWN_ERROR"
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_get_and_cancel_task() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/tasks/t1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"data":{"state":"PROGRESS","result":null}}"#)
        .create_async()
        .await;
    let cancel = server
        .mock("DELETE", "/tasks/t1")
        .match_header("x-csrf-token", "csrf-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"message":"Task cancelled"}"#)
        .create_async()
        .await;

    let client = api(server.url());
    let info = client.get_task("t1").await.unwrap();
    assert_eq!(info.state, "PROGRESS");
    client.cancel_task("t1").await.unwrap();
    cancel.assert_async().await;
}

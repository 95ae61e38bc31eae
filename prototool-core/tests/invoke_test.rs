use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET, GreeterServer};
use echo_service_impl::EchoServiceImpl;
use futures_util::StreamExt;
use greeter_service_impl::GreeterImpl;
use prototool_core::codec::{self, CodecError};
use prototool_core::descriptor::LookupError;
use prototool_core::grpc::{
    CallInvoker, CallOptions, GrpcRequestError, InvokeError, RequestSource, ResponseStream,
};
use prototool_core::DescriptorSet;
use serde_json::{Value, json};
use std::io::Cursor;
use std::time::Duration;


fn invoker() -> CallInvoker {
    let set = DescriptorSet::from_bytes(FILE_DESCRIPTOR_SET).expect("Failed to load descriptor set");
    CallInvoker::new(set)
}

fn stdin(text: &'static str) -> RequestSource {
    RequestSource::Reader(Box::new(Cursor::new(text.as_bytes())))
}

async fn collect(stream: ResponseStream) -> Vec<Result<Value, InvokeError>> {
    stream
        .map(|item| item.map(|message| codec::to_value(&message).unwrap()))
        .collect()
        .await
}

async fn echo(method: &str, request: RequestSource) -> Vec<Result<Value, InvokeError>> {
    let stream = invoker()
        .invoke_with_service(
            method,
            EchoServiceServer::new(EchoServiceImpl),
            request,
            &CallOptions::default(),
        )
        .await
        .unwrap();
    collect(stream).await
}

#[tokio::test]
async fn test_unary_say_hello() {
    let stream = invoker()
        .invoke_with_service(
            "pkg.Greeter/SayHello",
            GreeterServer::new(GreeterImpl),
            RequestSource::Text(r#"{"name":"x"}"#.to_string()),
            &CallOptions::default(),
        )
        .await
        .unwrap();

    let responses: Vec<Value> = collect(stream)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(responses, vec![json!({ "message": "hello x" })]);
}

#[tokio::test]
async fn test_unary_reads_the_whole_input() {
    let responses = echo("echo.EchoService/UnaryEcho", stdin("{\n  \"message\": \"multi-line\"\n}\n")).await;

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].as_ref().unwrap()["message"], "multi-line");
}

#[tokio::test]
async fn test_server_streaming_in_order() {
    let responses = echo(
        "echo.EchoService/ServerStreamingEcho",
        RequestSource::Text(r#"{"message":"s"}"#.to_string()),
    )
    .await;

    let messages: Vec<_> = responses
        .into_iter()
        .map(|r| r.unwrap()["message"].clone())
        .collect();
    assert_eq!(messages, ["s - seq 0", "s - seq 1", "s - seq 2"]);
}

#[tokio::test]
async fn test_server_stream_failure_keeps_received_responses() {
    let responses = echo(
        "echo.EchoService/ServerStreamingEcho",
        RequestSource::Text(r#"{"message":"f","fail_after":2}"#.to_string()),
    )
    .await;

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].as_ref().unwrap()["message"], "f - seq 0");
    assert_eq!(responses[1].as_ref().unwrap()["message"], "f - seq 1");
    assert!(matches!(
        &responses[2],
        Err(InvokeError::Status(status)) if status.code() == tonic::Code::Unavailable
    ));
}

#[tokio::test]
async fn test_client_streaming_from_data_and_stdin() {
    let from_data = echo(
        "echo.EchoService/ClientStreamingEcho",
        RequestSource::Text("{\"message\":\"X\"}\n{\"message\":\"Y\"}".to_string()),
    )
    .await;
    assert_eq!(from_data.len(), 1);
    assert_eq!(from_data[0].as_ref().unwrap()["message"], "XY");

    let from_stdin = echo(
        "echo.EchoService/ClientStreamingEcho",
        stdin("{\"message\":\"A\"}\n\n{\"message\":\"B\"}\n{\"message\":\"C\"}\n"),
    )
    .await;
    assert_eq!(from_stdin.len(), 1);
    assert_eq!(from_stdin[0].as_ref().unwrap()["message"], "ABC");
}

#[tokio::test]
async fn test_bidirectional_streaming() {
    let responses = echo(
        "echo.EchoService/BidirectionalEcho",
        stdin("{\"message\":\"ping\"}\n{\"message\":\"pong\"}\n"),
    )
    .await;

    let messages: Vec<_> = responses
        .into_iter()
        .map(|r| r.unwrap()["message"].clone())
        .collect();
    assert_eq!(messages, ["echo: ping", "echo: pong"]);
}

#[tokio::test]
async fn test_bad_stdin_line_is_reported_after_responses() {
    let responses = echo(
        "echo.EchoService/BidirectionalEcho",
        stdin("{\"message\":\"ok\"}\n{\"nope\":1}\n{\"message\":\"never sent\"}\n"),
    )
    .await;

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].as_ref().unwrap()["message"], "echo: ok");
    assert!(matches!(
        &responses[1],
        Err(InvokeError::Codec(CodecError::Parse { .. }))
    ));
}

#[tokio::test]
async fn test_invalid_data_fails_before_the_call() {
    let result = invoker()
        .invoke_with_service(
            "echo.EchoService/ClientStreamingEcho",
            EchoServiceServer::new(EchoServiceImpl),
            RequestSource::Text("{\"message\":\"X\"}\n{\"unknown\":true}".to_string()),
            &CallOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(InvokeError::Codec(_))));
}

#[tokio::test]
async fn test_invalid_header_is_rejected() {
    let options = CallOptions {
        headers: vec![("bad key".to_string(), "v".to_string())],
        ..CallOptions::default()
    };

    let result = invoker()
        .invoke_with_service(
            "echo.EchoService/UnaryEcho",
            EchoServiceServer::new(EchoServiceImpl),
            RequestSource::Text(r#"{"message":"m"}"#.to_string()),
            &options,
        )
        .await;

    assert!(matches!(
        result,
        Err(InvokeError::Request(GrpcRequestError::InvalidMetadataKey { .. }))
    ));
}

#[tokio::test]
async fn test_unknown_method_never_connects() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let result = invoker()
        .invoke(
            "echo.EchoService/Ghost",
            &address,
            RequestSource::Text("{}".to_string()),
            &CallOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(InvokeError::Lookup(LookupError::MethodNotFound { .. }))
    ));

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "no connection should have been attempted");
}

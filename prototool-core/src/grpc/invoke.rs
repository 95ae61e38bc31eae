//! # Call Invoker
//!
//! Runs one RPC against a method resolved from a [`DescriptorSet`].
//!
//! Whatever the method's [`StreamingCardinality`], the caller gets back a
//! [`ResponseStream`]: unary and client-streaming calls produce a single item,
//! server and bidirectional streaming produce one item per response as it
//! arrives. An error ends the stream and is always its last item, so responses
//! received before a failure are never lost.
//!
//! The call timeout is a single deadline covering call setup and every receive.
//! Connection establishment is bounded separately by [`SessionOptions`].
use super::client::{GrpcClient, GrpcRequestError, RequestMetadata};
use super::session::{CallSession, SessionError, SessionOptions};
use crate::BoxError;
use crate::codec::{self, CodecError};
use crate::descriptor::{DescriptorSet, LookupError, StreamingCardinality};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::{Instant, timeout_at};
use tokio_stream::wrappers::LinesStream;
use tonic::Streaming;
use tonic::client::GrpcService;
use tracing::debug;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error("gRPC call failed: {} ({})", .0.message(), .0.code())]
    Status(tonic::Status),
    #[error("Call did not complete within {0:?}")]
    Timeout(Duration),
    #[error("No request message was provided")]
    MissingRequest,
    #[error("Failed to read request input: '{0}'")]
    Input(#[from] std::io::Error),
}

/// Where request messages come from.
pub enum RequestSource {
    /// Structured text given up front. Streaming methods accept any number of
    /// concatenated JSON objects (typically one per line).
    Text(String),
    /// A reader yielding one JSON object per line, consumed lazily for
    /// client and bidirectional streaming.
    Reader(Box<dyn AsyncBufRead + Send + Unpin>),
}

impl std::fmt::Debug for RequestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestSource::Text(text) => f.debug_tuple("Text").field(text).finish(),
            RequestSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub headers: Vec<(String, String)>,
    pub call_timeout: Duration,
    pub session: SessionOptions,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            session: SessionOptions::default(),
        }
    }
}

/// Responses in arrival order, possibly ending with one error.
pub type ResponseStream = BoxStream<'static, Result<DynamicMessage, InvokeError>>;

/// Invokes methods described by a single descriptor set.
#[derive(Debug, Clone)]
pub struct CallInvoker {
    set: DescriptorSet,
}

impl CallInvoker {
    pub fn new(set: DescriptorSet) -> Self {
        Self { set }
    }

    /// Resolves `package.Service/Method`.
    pub fn method(&self, method_path: &str) -> Result<MethodDescriptor, InvokeError> {
        Ok(self.set.method(method_path)?)
    }

    /// Connects to `address` and performs the call.
    ///
    /// The method is resolved before any connection is attempted.
    pub async fn invoke(
        &self,
        method_path: &str,
        address: &str,
        request: RequestSource,
        options: &CallOptions,
    ) -> Result<ResponseStream, InvokeError> {
        let method = self.method(method_path)?;
        let session = CallSession::connect(address, &options.session).await?;
        dispatch(GrpcClient::new(session.channel()), method, request, options).await
    }

    /// Performs the call over an already established transport (e.g. an in-process server).
    pub async fn invoke_with_service<S>(
        &self,
        method_path: &str,
        service: S,
        request: RequestSource,
        options: &CallOptions,
    ) -> Result<ResponseStream, InvokeError>
    where
        S: GrpcService<tonic::body::Body>,
        S::Error: Into<BoxError>,
        S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
        <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    {
        let method = self.method(method_path)?;
        dispatch(GrpcClient::new(service), method, request, options).await
    }
}

async fn dispatch<S>(
    mut client: GrpcClient<S>,
    method: MethodDescriptor,
    request: RequestSource,
    options: &CallOptions,
) -> Result<ResponseStream, InvokeError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let shape = StreamingCardinality::of(&method);
    let timeout = options.call_timeout;
    let metadata = RequestMetadata {
        headers: options.headers.clone(),
        timeout: Some(timeout),
    };

    debug!(method = %method.full_name(), %shape, ?timeout, "dispatching call");

    if !shape.streams_requests() {
        let payload = single_request(method.input(), request).await?;
        let deadline = Instant::now() + timeout;

        return match shape {
            StreamingCardinality::Unary => {
                let response = timeout_at(deadline, client.unary(&method, payload, &metadata))
                    .await
                    .map_err(|_| InvokeError::Timeout(timeout))??
                    .map_err(InvokeError::Status)?;
                Ok(stream::iter([Ok(response)]).boxed())
            }
            _ => {
                let streaming =
                    timeout_at(deadline, client.server_streaming(&method, payload, &metadata))
                        .await
                        .map_err(|_| InvokeError::Timeout(timeout))??
                        .map_err(InvokeError::Status)?;
                Ok(responses(streaming, deadline, timeout, InputFailure::default()))
            }
        };
    }

    let failure = InputFailure::default();
    let requests = request_stream(method.input(), request, failure.clone())?;
    let deadline = Instant::now() + timeout;

    match shape {
        StreamingCardinality::ClientStream => {
            let outcome = timeout_at(deadline, client.client_streaming(&method, requests, &metadata))
                .await
                .map_err(|_| InvokeError::Timeout(timeout))??;

            let items: Vec<_> = match outcome {
                Ok(response) => std::iter::once(Ok(response))
                    .chain(failure.take().map(Err))
                    .collect(),
                Err(status) => vec![Err(superseded(status, &failure))],
            };
            Ok(stream::iter(items).boxed())
        }
        _ => {
            let streaming = timeout_at(
                deadline,
                client.bidirectional_streaming(&method, requests, &metadata),
            )
            .await
            .map_err(|_| InvokeError::Timeout(timeout))??
            .map_err(|status| superseded(status, &failure))?;

            Ok(responses(streaming, deadline, timeout, failure))
        }
    }
}

/// The first error hit while lazily reading requests.
///
/// The request stream simply ends at that point; the error is reported after
/// whatever the server sent back.
#[derive(Clone, Default)]
struct InputFailure(Arc<Mutex<Option<InvokeError>>>);

impl InputFailure {
    fn set(&self, err: InvokeError) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(err);
        }
    }

    fn take(&self) -> Option<InvokeError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// A failed request line outranks the status it provoked; the status is only logged.
fn superseded(status: tonic::Status, failure: &InputFailure) -> InvokeError {
    match failure.take() {
        Some(err) => {
            debug!(
                code = ?status.code(),
                message = status.message(),
                "server status superseded by request input failure"
            );
            err
        }
        None => InvokeError::Status(status),
    }
}

enum Receive {
    Open(Streaming<DynamicMessage>),
    Closed,
}

fn responses(
    streaming: Streaming<DynamicMessage>,
    deadline: Instant,
    timeout: Duration,
    failure: InputFailure,
) -> ResponseStream {
    stream::unfold(Receive::Open(streaming), move |state| {
        let failure = failure.clone();
        async move {
            let Receive::Open(mut inner) = state else {
                return None;
            };

            match timeout_at(deadline, inner.message()).await {
                Ok(Ok(Some(message))) => Some((Ok(message), Receive::Open(inner))),
                Ok(Ok(None)) => failure.take().map(|err| (Err(err), Receive::Closed)),
                Ok(Err(status)) => Some((Err(superseded(status, &failure)), Receive::Closed)),
                Err(_) => Some((Err(InvokeError::Timeout(timeout)), Receive::Closed)),
            }
        }
    })
    .boxed()
}

/// Reads exactly one request message.
async fn single_request(
    descriptor: MessageDescriptor,
    request: RequestSource,
) -> Result<DynamicMessage, InvokeError> {
    let text = match request {
        RequestSource::Text(text) => text,
        RequestSource::Reader(mut reader) => {
            let mut text = String::new();
            reader.read_to_string(&mut text).await?;
            text
        }
    };

    if text.trim().is_empty() {
        return Err(InvokeError::MissingRequest);
    }

    Ok(codec::parse_message(descriptor, &text)?)
}

/// Builds the outgoing request stream for client and bidirectional streaming.
///
/// Text input is validated completely before the call starts. Reader input is
/// parsed line by line as the transport pulls it.
fn request_stream(
    descriptor: MessageDescriptor,
    request: RequestSource,
    failure: InputFailure,
) -> Result<impl Stream<Item = DynamicMessage> + Send + 'static, InvokeError> {
    match request {
        RequestSource::Text(text) => {
            let messages = parse_many(&descriptor, &text)?;
            Ok(stream::iter(messages).left_stream())
        }
        RequestSource::Reader(reader) => {
            let lines = LinesStream::new(reader.lines());
            // Returning `None` from `scan` ends the request stream at the first bad line
            let parsed = lines.scan((), move |_, line| {
                let item = match line {
                    Ok(line) if line.trim().is_empty() => Some(None),
                    Ok(line) => match codec::parse_message(descriptor.clone(), &line) {
                        Ok(message) => Some(Some(message)),
                        Err(err) => {
                            failure.set(err.into());
                            None
                        }
                    },
                    Err(err) => {
                        failure.set(err.into());
                        None
                    }
                };
                futures_util::future::ready(item)
            });
            Ok(parsed.filter_map(futures_util::future::ready).right_stream())
        }
    }
}

/// Parses every JSON object in `text`, in order.
fn parse_many(
    descriptor: &MessageDescriptor,
    text: &str,
) -> Result<Vec<DynamicMessage>, InvokeError> {
    let values = serde_json::Deserializer::from_str(text)
        .into_iter::<serde_json::Value>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CodecError::Parse {
            message: descriptor.full_name().to_string(),
            source,
        })?;

    values
        .into_iter()
        .map(|value| Ok(codec::from_value(descriptor.clone(), value)?))
        .collect()
}

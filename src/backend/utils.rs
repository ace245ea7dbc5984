#[cfg(test)]
#[path = "utils_test.rs"]
mod tests;

use std::time::Duration;

use futures::TryStreamExt;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::{
    backend::FragmentStream,
    config::user_agent,
    error::{ProviderError, Result},
};

/// Outcome of parsing one line of a streamed response body.
#[derive(Debug, PartialEq)]
pub(crate) enum Line {
    Skip,
    Fragment(String),
    Done,
    Error(ProviderError),
}

pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub(crate) fn post(url: impl reqwest::IntoUrl) -> reqwest::RequestBuilder {
    client()
        .post(url)
        .header("Content-Type", "application/json")
        .header("User-Agent", user_agent())
}

/// Sends the request and waits at most `timeout` for the response head.
/// Non-success statuses are classified into a [`ProviderError`].
pub(crate) async fn send(
    req: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<reqwest::Response, ProviderError> {
    let res = tokio::time::timeout(timeout, req.send())
        .await
        .map_err(|_| ProviderError::timeout(format!("no response after {:?}", timeout)))??;

    if !res.status().is_success() {
        return Err(error_from_response(res).await);
    }
    Ok(res)
}

pub(crate) async fn error_from_response(res: reqwest::Response) -> ProviderError {
    let status = res.status().as_u16();
    let body = match res.text().await {
        Ok(body) => body,
        Err(err) => return ProviderError::from(err).with_status(status),
    };
    log::error!("Error response ({}): {}", status, body);
    ProviderError::from_status(status, error_message(&body))
}

/// Pulls the human readable message out of the error bodies the providers
/// return. Falls back to the raw body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };

    let message = match &value["error"] {
        Value::String(message) => Some(message.as_str()),
        Value::Object(error) => error.get("message").and_then(Value::as_str),
        _ => value["message"].as_str(),
    };
    message.unwrap_or(body.trim()).to_string()
}

/// How a provider signals that a streamed response is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// Closing the body ends the stream.
    Eof,
    /// A [`Line::Done`] is required. Closing the body before it is an error.
    Marker,
}

/// Turns a line oriented response body into a [`FragmentStream`]. Each
/// line read must arrive within `idle_timeout`.
pub(crate) fn fragment_stream<F>(
    res: reqwest::Response,
    idle_timeout: Duration,
    end: StreamEnd,
    parse: F,
) -> FragmentStream
where
    F: FnMut(&str) -> Line + Send + 'static,
{
    let body = res
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()));
    let lines = StreamReader::new(body).lines();

    let stream = futures::stream::unfold(Some((lines, parse)), move |state| async move {
        let (mut lines, mut parse) = state?;
        loop {
            let line = match tokio::time::timeout(idle_timeout, lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) if end == StreamEnd::Marker => {
                    let err = ProviderError::unknown("stream ended before end-of-stream");
                    return Some((Err(err), None));
                }
                Ok(Ok(None)) => return None,
                Ok(Err(err)) => return Some((Err(ProviderError::unknown(err.to_string())), None)),
                Err(_) => {
                    let err = ProviderError::timeout(format!(
                        "stream idle for more than {:?}",
                        idle_timeout
                    ));
                    return Some((Err(err), None));
                }
            };

            let line = line.trim();
            log::trace!("streaming response: {}", line);
            match parse(line) {
                Line::Skip => continue,
                Line::Fragment(text) => return Some((Ok(text), Some((lines, parse)))),
                Line::Done => return None,
                Line::Error(err) => return Some((Err(err), None)),
            }
        }
    });
    Box::pin(stream)
}

/// Payload of a server-sent `data:` line, `None` for any other line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

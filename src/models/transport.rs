use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::Client;

use crate::error::TransportError;

pub const HTTP_PARTIAL_CONTENT: u16 = 206;
pub const HTTP_RANGE_NOT_SATISFIABLE: u16 = 416;

/// Streaming body of a remote response, read chunk by chunk.
#[async_trait]
pub trait RemoteBody: Send {
    /// `Ok(None)` marks the end of the body.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

pub struct RemoteResponse {
    pub status: u16,
    /// Length of this response's body, not of the whole remote file.
    pub content_length: Option<u64>,
    pub body: Box<dyn RemoteBody>,
}

impl RemoteResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Range-aware GET. Servers may ignore the range and answer with the full body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, resume_from: Option<u64>)
        -> Result<RemoteResponse, TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            read: Duration::from_secs(60),
            write: Duration::from_secs(60),
        }
    }
}

pub const DEFAULT_USER_AGENT: &str = concat!("model-center/", env!("CARGO_PKG_VERSION"));

pub struct HttpTransport {
    client: Client,
    timeouts: Timeouts,
}

impl HttpTransport {
    pub fn new(timeouts: Timeouts, user_agent: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .user_agent(user_agent)
            .build()
            .map_err(|err| TransportError::Request(format!("create http client: {err}")))?;
        Ok(Self { client, timeouts })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        resume_from: Option<u64>,
    ) -> Result<RemoteResponse, TransportError> {
        let mut request = self.client.get(url);
        if let Some(offset) = resume_from {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        // the write ceiling covers sending the request and receiving headers
        let response = tokio::time::timeout(self.timeouts.write, request.send())
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "sending request",
                secs: self.timeouts.write.as_secs(),
            })?
            .map_err(|err| TransportError::Request(err.to_string()))?;

        Ok(RemoteResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(HttpBody {
                response,
                read_timeout: self.timeouts.read,
            }),
        })
    }
}

struct HttpBody {
    response: reqwest::Response,
    read_timeout: Duration,
}

#[async_trait]
impl RemoteBody for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let chunk = tokio::time::timeout(self.read_timeout, self.response.chunk())
            .await
            .map_err(|_| TransportError::Timeout {
                phase: "reading response body",
                secs: self.read_timeout.as_secs(),
            })?
            .map_err(|err| TransportError::Body(err.to_string()))?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::*;

    #[derive(Clone)]
    pub(crate) enum Route {
        /// Serves `content`; range requests get 206 only when `honor_range`.
        Serve { content: Vec<u8>, honor_range: bool },
        Status(u16),
        Refuse,
        /// Streams the first `cut` bytes of `content`, then drops the connection.
        DropAfter { content: Vec<u8>, cut: usize },
        /// Waits for `gate` before answering like `Serve`.
        Stall { content: Vec<u8>, gate: Arc<Notify> },
    }

    #[derive(Default)]
    pub(crate) struct FakeTransport {
        routes: Mutex<HashMap<String, Route>>,
        requests: Mutex<Vec<(String, Option<u64>)>>,
        chunk_size: usize,
    }

    impl FakeTransport {
        pub(crate) fn new() -> Self {
            Self {
                chunk_size: 256,
                ..Self::default()
            }
        }

        pub(crate) fn route(self, url: &str, route: Route) -> Self {
            self.routes.lock().insert(url.to_string(), route);
            self
        }

        pub(crate) fn set_route(&self, url: &str, route: Route) {
            self.routes.lock().insert(url.to_string(), route);
        }

        pub(crate) fn requests(&self) -> Vec<(String, Option<u64>)> {
            self.requests.lock().clone()
        }

        pub(crate) fn requests_for(&self, url: &str) -> Vec<Option<u64>> {
            self.requests
                .lock()
                .iter()
                .filter(|(requested, _)| requested == url)
                .map(|(_, offset)| *offset)
                .collect()
        }

        fn serve(
            &self,
            content: Vec<u8>,
            honor_range: bool,
            resume_from: Option<u64>,
        ) -> RemoteResponse {
            match resume_from {
                Some(offset) if honor_range && offset as usize >= content.len() => RemoteResponse {
                    status: HTTP_RANGE_NOT_SATISFIABLE,
                    content_length: Some(0),
                    body: Box::new(ChunkedBody::new(vec![], self.chunk_size, None)),
                },
                Some(offset) if honor_range => {
                    let rest = content[offset as usize..].to_vec();
                    RemoteResponse {
                        status: HTTP_PARTIAL_CONTENT,
                        content_length: Some(rest.len() as u64),
                        body: Box::new(ChunkedBody::new(rest, self.chunk_size, None)),
                    }
                }
                _ => RemoteResponse {
                    status: 200,
                    content_length: Some(content.len() as u64),
                    body: Box::new(ChunkedBody::new(content, self.chunk_size, None)),
                },
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get(
            &self,
            url: &str,
            resume_from: Option<u64>,
        ) -> Result<RemoteResponse, TransportError> {
            self.requests.lock().push((url.to_string(), resume_from));
            let route = self.routes.lock().get(url).cloned();
            match route {
                None | Some(Route::Refuse) => {
                    Err(TransportError::Request(format!("connection refused: {url}")))
                }
                Some(Route::Status(status)) => Ok(RemoteResponse {
                    status,
                    content_length: None,
                    body: Box::new(ChunkedBody::new(vec![], self.chunk_size, None)),
                }),
                Some(Route::Serve {
                    content,
                    honor_range,
                }) => Ok(self.serve(content, honor_range, resume_from)),
                Some(Route::DropAfter { content, cut }) => Ok(RemoteResponse {
                    status: 200,
                    content_length: Some(content.len() as u64),
                    body: Box::new(ChunkedBody::new(
                        content[..cut].to_vec(),
                        self.chunk_size,
                        Some("connection reset".into()),
                    )),
                }),
                Some(Route::Stall { content, gate }) => {
                    gate.notified().await;
                    Ok(self.serve(content, true, resume_from))
                }
            }
        }
    }

    struct ChunkedBody {
        data: Vec<u8>,
        position: usize,
        chunk_size: usize,
        trailing_error: Option<String>,
    }

    impl ChunkedBody {
        fn new(data: Vec<u8>, chunk_size: usize, trailing_error: Option<String>) -> Self {
            Self {
                data,
                position: 0,
                chunk_size,
                trailing_error,
            }
        }
    }

    #[async_trait]
    impl RemoteBody for ChunkedBody {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            if self.position >= self.data.len() {
                return match self.trailing_error.take() {
                    Some(message) => Err(TransportError::Body(message)),
                    None => Ok(None),
                };
            }
            let end = (self.position + self.chunk_size).min(self.data.len());
            let chunk = self.data[self.position..end].to_vec();
            self.position = end;
            Ok(Some(chunk))
        }
    }

    pub(crate) fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }
}

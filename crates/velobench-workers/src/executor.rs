//! HTTP request execution with fine-grained timing

use eventsource_stream::EventStream;
use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use velobench_core::config::EndpointConfig;
use velobench_core::types::{FinishReason, ParsedResponse, ResponseChunk, TokenUsage};
use velobench_core::{Error, MonoClock, Result};
use velobench_endpoints::{FormattedRequest, RequestCodec};

/// Outcome of one completed exchange.
#[derive(Debug)]
pub struct ExecOutcome {
    pub status: u16,
    /// First body byte time for streaming responses; the worker sets
    /// `ack_ns = end_ns` for unary ones.
    pub ack_ns: Option<u64>,
    pub response: ParsedResponse,
}

/// Shared HTTP executor: one pooled client, one codec, timing against the
/// run's monotonic clock.
pub struct RequestExecutor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    user_headers: Vec<(String, String)>,
    timeout_secs: f64,
    codec: Arc<dyn RequestCodec>,
    clock: MonoClock,
}

impl RequestExecutor {
    pub fn new(
        endpoint: &EndpointConfig,
        codec: Arc<dyn RequestCodec>,
        clock: MonoClock,
    ) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs_f64(endpoint.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            // Expire idle connections before inference servers close them,
            // so a run never reuses a dead pooled connection.
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            user_headers: endpoint.headers.clone(),
            timeout_secs: endpoint.request_timeout_secs,
            codec,
            clock,
        })
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::RequestTimeout(self.timeout_secs)
        } else {
            Error::Transport(err.to_string())
        }
    }

    /// Send one formatted request and parse the response, stamping the
    /// first-byte ack and every delta's receive time.
    pub async fn execute(
        &self,
        formatted: &FormattedRequest,
        x_request_id: &str,
        x_correlation_id: &str,
    ) -> Result<ExecOutcome> {
        let url = format!("{}{}", self.base_url, formatted.path);
        let mut builder = self
            .client
            .post(&url)
            .header("X-Request-ID", x_request_id)
            .header("X-Correlation-ID", x_correlation_id)
            .json(&formatted.body);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {api_key}"));
        }
        for (name, value) in &self.user_headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut message = body.trim().to_string();
            if message.len() > 200 {
                let mut end = 200;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            return Err(Error::Http {
                status: status.as_u16(),
                message,
            });
        }

        if formatted.streaming {
            self.consume_stream(response, status.as_u16()).await
        } else {
            let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
            let response = self.codec.parse_response(&bytes)?;
            Ok(ExecOutcome {
                status: status.as_u16(),
                ack_ns: None,
                response,
            })
        }
    }

    async fn consume_stream(&self, response: reqwest::Response, status: u16) -> Result<ExecOutcome> {
        // Stamp the ack on the first body bytes, before SSE framing.
        let first_byte_ns = Arc::new(AtomicU64::new(0));
        let tap = {
            let first_byte_ns = Arc::clone(&first_byte_ns);
            let clock = self.clock;
            response.bytes_stream().inspect(move |_| {
                let _ = first_byte_ns.compare_exchange(
                    0,
                    clock.now_ns().max(1),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            })
        };

        let mut chunks: Vec<ResponseChunk> = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let mut finish_reason: Option<FinishReason> = None;

        let mut events = Box::pin(EventStream::new(tap));
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| Error::ResponseParse(format!("SSE stream: {e}")))?;
            if event.data == "[DONE]" {
                break;
            }
            let Some(delta) = self.codec.parse_stream_event(&event.data)? else {
                continue;
            };
            if let Some(u) = delta.usage {
                usage = Some(u);
            }
            if let Some(f) = delta.finish_reason {
                finish_reason = Some(f);
            }
            if delta.delta_text.is_some() || delta.delta_reasoning.is_some() {
                chunks.push(ResponseChunk {
                    received_ns: self.clock.now_ns(),
                    delta_text: delta.delta_text,
                    delta_reasoning: delta.delta_reasoning,
                    finish_reason: delta.finish_reason,
                });
            }
        }

        debug!(chunks = chunks.len(), "stream consumed");
        let mut parsed = ParsedResponse {
            final_text: None,
            reasoning_text: None,
            chunks,
            finish_reason,
            usage,
        };
        let text = parsed.output_text();
        if !text.is_empty() {
            parsed.final_text = Some(text);
        }
        let reasoning = parsed.reasoning_output_text();
        if !reasoning.is_empty() {
            parsed.reasoning_text = Some(reasoning);
        }

        let ack = first_byte_ns.load(Ordering::SeqCst);
        Ok(ExecOutcome {
            status,
            ack_ns: (ack != 0).then_some(ack),
            response: parsed,
        })
    }
}

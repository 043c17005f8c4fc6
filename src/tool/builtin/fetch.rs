use crate::tool::builtin::{optional_u64, require_str};
use crate::tool::{
    ErrorKind, Invocation, ProgressSink, Tool, ToolKind, ToolOutput, ValidationError,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default response cap in bytes.
const DEFAULT_MAX_BYTES: u64 = 50_000;

/// Refuse URLs pointing at private or internal addresses.
fn is_private_or_internal(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    if host == "localhost"
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host == "metadata.google.internal"
    {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(ipv4) => {
                ipv4.is_loopback()
                    || ipv4.is_private()
                    || ipv4.is_link_local()
                    || ipv4.is_broadcast()
                    || ipv4.is_unspecified()
            }
            std::net::IpAddr::V6(ipv6) => {
                if let Some(mapped) = ipv6.to_ipv4_mapped() {
                    return mapped.is_loopback() || mapped.is_private() || mapped.is_link_local();
                }
                let segments = ipv6.segments();
                ipv6.is_loopback()
                    || ipv6.is_unspecified()
                    || (segments[0] & 0xfe00) == 0xfc00
                    || (segments[0] & 0xffc0) == 0xfe80
            }
        };
    }
    false
}

pub struct FetchTool {
    client: Client,
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchTool {
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("axon/0.1")
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Network
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "max_bytes": {
                    "type": "integer",
                    "description": "Maximum response length in bytes (default: 50000)"
                }
            },
            "required": ["url"]
        })
    }

    fn build(&self, params: Value) -> Result<Arc<dyn Invocation>, ValidationError> {
        let raw = require_str(&params, "url")?;
        let url = Url::parse(&raw).map_err(|err| {
            ValidationError::invalid("url", "valid URL", raw.clone(), format!("invalid URL: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::invalid(
                "url",
                "http or https URL",
                url.scheme(),
                "only http and https URLs are supported",
            ));
        }
        let max_bytes = optional_u64(&params, "max_bytes")?.unwrap_or(DEFAULT_MAX_BYTES);
        Ok(Arc::new(FetchInvocation {
            client: self.client.clone(),
            url,
            max_bytes,
        }))
    }

    fn signature_content(&self, params: &Value) -> String {
        let host = params
            .get("url")
            .and_then(Value::as_str)
            .and_then(|raw| Url::parse(raw).ok())
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        format!("domain:{host}")
    }

    // Approvals generalize to the whole host.
    fn permission_pattern(&self, params: &Value) -> String {
        self.signature_content(params)
    }
}

struct FetchInvocation {
    client: Client,
    url: Url,
    max_bytes: u64,
}

#[async_trait]
impl Invocation for FetchInvocation {
    fn describe(&self) -> String {
        format!("Fetch {}", self.url)
    }

    fn affected_paths(&self) -> Vec<std::path::PathBuf> {
        Vec::new()
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _progress: Option<ProgressSink>,
    ) -> ToolOutput {
        if is_private_or_internal(&self.url) {
            return ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("Refusing to fetch private or internal address: {}", self.url),
            );
        }

        let response = tokio::select! {
            result = self.client.get(self.url.clone()).send() => match result {
                Ok(response) => response,
                Err(err) => {
                    return ToolOutput::failure(
                        ErrorKind::ExecutionError,
                        format!("Request failed: {err}"),
                    );
                }
            },
            () = cancel.cancelled() => {
                return ToolOutput::failure(ErrorKind::Cancelled, "Fetch cancelled");
            }
        };

        let status = response.status();
        let body = tokio::select! {
            result = response.text() => match result {
                Ok(body) => body,
                Err(err) => {
                    return ToolOutput::failure(
                        ErrorKind::ExecutionError,
                        format!("Failed to read response body: {err}"),
                    );
                }
            },
            () = cancel.cancelled() => {
                return ToolOutput::failure(ErrorKind::Cancelled, "Fetch cancelled");
            }
        };

        let mut body = body;
        let cap = usize::try_from(self.max_bytes).unwrap_or(usize::MAX);
        if body.len() > cap {
            body.truncate(cap);
            body.push_str("\n[response truncated]");
        }

        if status.is_success() {
            ToolOutput::success(body)
                .with_display(format!("Fetched {} ({status})", self.url))
                .with_metadata("status", status.as_u16())
        } else {
            ToolOutput::failure(
                ErrorKind::ExecutionError,
                format!("Request to {} returned {status}", self.url),
            )
            .with_details(json!({"status": status.as_u16(), "body": body}))
            .with_metadata("status", status.as_u16())
        }
    }
}

//! Degraded response written in place of a suppressed operation.

use tracing::{error, info};

use crate::config::FallbackConfig;
use crate::context::{CallContext, ResponseCarrier};

/// Writes the fixed fallback body to a call's response channel.
#[derive(Debug, Clone)]
pub struct FallbackRenderer {
    body: String,
    content_type: String,
}

impl FallbackRenderer {
    pub fn new(body: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(config.body.clone(), config.content_type.clone())
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Write the fallback to `ctx`'s response and close it.
    ///
    /// The channel is closed even when the write fails. Failures are logged
    /// and not returned, so they cannot mask the denial itself. Returns
    /// whether the body reached the response.
    pub fn render(&self, ctx: &CallContext) -> bool {
        let response = ctx.response();
        response.set_header("Content-Type", &self.content_type);

        let written = match response.write(self.body.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to write fallback response");
                false
            }
        };

        if let Err(e) = response.close() {
            error!(error = %e, "Failed to close fallback response");
        }

        if written {
            info!("Served fallback response");
        }
        written
    }
}

impl Default for FallbackRenderer {
    fn default() -> Self {
        Self::from_config(&FallbackConfig::default())
    }
}

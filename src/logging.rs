use std::fmt;

/// Request-scoped logger.
///
/// Every event carries the request ID and, once resolved, the configuration
/// the request targets. Borrowed from the request metadata so it cannot
/// outlive the request.
#[derive(Debug, Clone, Copy)]
pub struct RequestLog<'a> {
    request_id: &'a str,
    config_id: &'a str,
}

impl<'a> RequestLog<'a> {
    /// Creates a logger for one request.
    pub fn new(request_id: &'a str, config_id: &'a str) -> Self {
        Self {
            request_id,
            config_id,
        }
    }

    /// Returns the request ID associated with this logger.
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Returns the configuration ID associated with this logger.
    pub fn config_id(&self) -> &str {
        self.config_id
    }

    /// Logs an info-level message.
    ///
    /// ```
    /// # use ucon_core::RequestLog;
    /// let log = RequestLog::new("req-1", "cfg-1");
    /// log.info(format_args!("policy loaded"));
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(request_id = %self.request_id, config_id = %self.config_id, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(request_id = %self.request_id, config_id = %self.config_id, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(request_id = %self.request_id, config_id = %self.config_id, "{}", args);
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(request_id = %self.request_id, config_id = %self.config_id, "{}", args);
    }
}

/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

use std::fmt::Display;

mod status_code;

pub use status_code::StatusCode;

/// Represents a gRPC status: a code plus a human readable message.
///
/// Statuses flow through the load balancing machinery to describe why a
/// subchannel or channel is failing.  An OK status carries no message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    /// Create a new `Status` with the given code and message.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// The OK status.
    pub fn ok() -> Self {
        Status::new(StatusCode::Ok, "")
    }

    /// Shorthand for a status with code `UNAVAILABLE`.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Status::new(StatusCode::Unavailable, message)
    }

    /// Shorthand for a status with code `INTERNAL`.
    pub fn internal(message: impl Into<String>) -> Self {
        Status::new(StatusCode::Internal, message)
    }

    /// Shorthand for a status with code `INVALID_ARGUMENT`.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Status::new(StatusCode::InvalidArgument, message)
    }

    /// Get the `StatusCode` of this `Status`.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Get the message of this `Status`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the code is `OK`.
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Returns a copy of this status with `prefix` prepended to the message.
    pub(crate) fn with_message_prefix(&self, prefix: &str) -> Self {
        Status::new(self.code, format!("{prefix}{}", self.message))
    }

    /// Returns a copy of this status with `suffix` appended to the message.
    pub(crate) fn with_message_suffix(&self, suffix: &str) -> Self {
        Status::new(self.code, format!("{}{suffix}", self.message))
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::ok()
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_new() {
        let status = Status::new(StatusCode::Unavailable, "no backends");
        assert_eq!(status.code(), StatusCode::Unavailable);
        assert_eq!(status.message(), "no backends");
        assert!(!status.is_ok());
    }

    #[test]
    fn test_status_ok_is_default() {
        assert!(Status::default().is_ok());
        assert_eq!(Status::default(), Status::ok());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::ok().to_string(), "OK");
        assert_eq!(
            Status::unavailable("connection refused").to_string(),
            "UNAVAILABLE: connection refused"
        );
    }

    #[test]
    fn test_status_message_decoration() {
        let status = Status::unavailable("refused")
            .with_message_prefix("ipv4:10.0.0.1:80: ")
            .with_message_suffix(" (resolver note)");
        assert_eq!(status.code(), StatusCode::Unavailable);
        assert_eq!(status.message(), "ipv4:10.0.0.1:80: refused (resolver note)");
    }
}

// Copyright (c) 2024 Manifold contributors
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::sync::Mutex;

/// A line-oriented log sink, injected by the caller rather than assumed to be a
/// process-global logger.
///
/// The GUI (or any other host) hands the server a closure that appends a line to
/// whatever it displays; the core never assumes that closure is safe to call from
/// multiple threads at once, so every call is serialized through an internal lock.
pub struct Logger {
    sink: Mutex<Box<dyn FnMut(&str) + Send>>,
}

impl Logger {
    /// Wraps an arbitrary `FnMut(&str)` as a `Logger`.
    pub fn new<F>(sink: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        Logger { sink: Mutex::new(Box::new(sink)) }
    }

    /// A logger that discards every line. Useful for tests that don't care about
    /// log output.
    pub fn noop() -> Self { Logger::new(|_line: &str| {}) }

    /// Delivers a pre-formatted line to the sink.
    ///
    /// Callers should prefer [`Logger::info`], [`Logger::debug`], [`Logger::warn`],
    /// and [`Logger::error`], which add the severity tag the original tool's log
    /// pane expects.
    pub fn line(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        (sink)(line);
    }

    pub fn info(&self, msg: &str) { self.line(&format!("[INFO] {}", msg)); }

    pub fn debug(&self, msg: &str) { self.line(&format!("[DEBUG] {}", msg)); }

    pub fn warn(&self, msg: &str) { self.line(&format!("[WARN] {}", msg)); }

    pub fn error(&self, msg: &str) { self.line(&format!("[ERR] {}", msg)); }
}

/// Builds a [`Logger`] that forwards every line to the `log` facade at the
/// matching level, stripping the redundant severity tag this crate adds to its
/// formatted lines.
///
/// This is what the standalone binary wires up by default, behind whatever
/// backend (`slog-stdlog`, in this crate's case) has installed itself as the
/// `log` facade's implementation.
pub fn log_crate_sink() -> Logger {
    Logger::new(|line: &str| {
        if let Some(rest) = line.strip_prefix("[DEBUG] ") {
            log::debug!("{}", rest);
        } else if let Some(rest) = line.strip_prefix("[WARN] ") {
            log::warn!("{}", rest);
        } else if let Some(rest) = line.strip_prefix("[ERR] ") {
            log::error!("{}", rest);
        } else if let Some(rest) = line.strip_prefix("[ERROR] ") {
            log::error!("{}", rest);
        } else if let Some(rest) = line.strip_prefix("[INFO] ") {
            log::info!("{}", rest);
        } else {
            log::info!("{}", line);
        }
    })
}

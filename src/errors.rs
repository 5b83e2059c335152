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
use std::io;

/// Failures that can occur while building or starting a [`crate::Server`].
#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    /// The backend list given to the dispatcher was empty after parsing.
    #[error("no backends selected")]
    NoBackends,

    /// The server was asked to start while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The listen address or port could not be bound.
    #[error("failed to bind listener on {addr}: {source}")]
    Listen { addr: String, #[source] source: io::Error },
}

/// Failures that can occur while dialing a backend.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// The backend's configured address string did not parse as a socket address.
    #[error("invalid backend address {0:?}")]
    InvalidAddress(String),

    /// The connect attempt did not complete within the allotted deadline.
    #[error("connect to {0} timed out")]
    Timeout(String),

    /// The underlying OS call failed (refused, unreachable, permission denied, ...).
    #[error("connect to {addr} failed: {source}")]
    Io { addr: String, #[source] source: io::Error },
}

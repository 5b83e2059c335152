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

//! Multi-homed TCP forwarding proxy.
//!
//! Given a host with several outbound network interfaces, `manifold` dispatches
//! each new TCP flow through one of them according to a weighted round-robin
//! policy, either by speaking SOCKS5 CONNECT to clients or by blindly tunneling
//! every accepted connection to one of a configured set of remote targets.
//!
//! The crate is organized around the data flow of a single flow: a connection is
//! accepted by [`server::Server`], handed to [`socks5`] or [`tunnel`] depending on
//! the configured mode, which consults the [`dispatcher::Dispatcher`] and
//! [`dialer::Dialer`] to pick and open an outbound connection, then hands both
//! sockets to [`relay::relay`].

pub mod backend;
pub mod dialer;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod relay;
pub mod server;
pub mod socks5;
pub mod tunnel;

pub use backend::Backend;
pub use dispatcher::Dispatcher;
pub use errors::{CreationError, DialError};
pub use logging::Logger;
pub use server::{Mode, Server};

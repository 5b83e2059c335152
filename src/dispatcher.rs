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
use crate::backend::Backend;
use crate::errors::CreationError;
use std::sync::Mutex;

/// A set of indices already marked as failed for one client flow.
///
/// Backends are few (one per NIC), so a plain integer bitset is sufficient; any
/// representation with "mark" and "contains" operations would satisfy the
/// contract, the integer here is just the simplest one. Supports up to 128
/// backends, which is far beyond any realistic NIC count.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureBitmap(u128);

impl FailureBitmap {
    pub fn new() -> Self { FailureBitmap(0) }

    pub fn mark(&mut self, index: usize) { self.0 |= 1u128 << index; }

    pub fn contains(&self, index: usize) -> bool { self.0 & (1u128 << index) != 0 }
}

struct Slot {
    backend: Backend,
    current_connections: u32,
}

struct Inner {
    slots: Vec<Slot>,
    index: usize,
}

/// Thread-safe weighted round-robin selector across a fixed set of backends.
///
/// `Next` and `NextAvoiding` are the only two operations; both are serialized
/// through a single mutex. The critical section is O(N) in the number of
/// backends, which is acceptable since N is the NIC count, not a request count.
pub struct Dispatcher {
    inner: Mutex<Inner>,
}

impl Dispatcher {
    /// Builds a dispatcher over `backends`, with the rotation starting at the
    /// first backend. Refuses to build over an empty list: a dispatcher with no
    /// backends is not a valid running state.
    pub fn new(backends: Vec<Backend>) -> Result<Self, CreationError> {
        if backends.is_empty() {
            return Err(CreationError::NoBackends);
        }

        let slots = backends.into_iter().map(|backend| Slot { backend, current_connections: 0 }).collect();
        Ok(Dispatcher { inner: Mutex::new(Inner { slots, index: 0 }) })
    }

    pub fn len(&self) -> usize { self.inner.lock().unwrap().slots.len() }

    /// Selects the current head-of-rotation backend, advancing the rotation once
    /// its contention ratio has been exhausted.
    pub fn next(&self) -> (Backend, usize) {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.index;
        let num_slots = inner.slots.len();

        let slot = &mut inner.slots[index];
        slot.current_connections += 1;
        let backend = slot.backend.clone();

        if slot.current_connections >= slot.backend.contention_ratio {
            slot.current_connections = 0;
            inner.index = (index + 1) % num_slots;
        }

        (backend, index)
    }

    /// Scans forward from the current rotation head, wrapping around, for the
    /// first backend whose index isn't set in `failed`. Unlike [`Dispatcher::next`],
    /// this does not advance the rotation or touch any counters -- it's a pure
    /// inspection used by the tunnel handler's retry loop.
    pub fn next_avoiding(&self, failed: FailureBitmap) -> Option<(Backend, usize)> {
        let inner = self.inner.lock().unwrap();
        let num_slots = inner.slots.len();

        (0..num_slots)
            .map(|offset| (inner.index + offset) % num_slots)
            .find(|index| !failed.contains(*index))
            .map(|index| (inner.slots[index].backend.clone(), index))
    }
}

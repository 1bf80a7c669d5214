//! Re-buffering of raw fragments into fixed-size parts
//!
//! Fragments are copied into a pooled buffer until it holds `part_size`
//! bytes; the full buffer is frozen and emitted whole, so every emitted
//! part owns its allocation and can be reclaimed after upload.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::storage::ByteBufferPool;

pub struct ChunkAssembler {
    part_size: usize,
    buffers: Arc<ByteBufferPool>,
    current: BytesMut,
    ready: VecDeque<Bytes>,
    total_bytes: u64,
    finished: bool,
}

impl ChunkAssembler {
    pub fn new(part_size: usize, buffers: Arc<ByteBufferPool>) -> Self {
        let part_size = part_size.max(1);
        let current = buffers.acquire();
        Self {
            part_size,
            buffers,
            current,
            ready: VecDeque::new(),
            total_bytes: 0,
            finished: false,
        }
    }

    /// Append a fragment; a fragment may complete several parts
    pub fn push(&mut self, fragment: &[u8]) {
        debug_assert!(!self.finished, "push after finish");
        self.total_bytes += fragment.len() as u64;

        let mut rest = fragment;
        while !rest.is_empty() {
            let room = self.part_size - self.current.len();
            let take = room.min(rest.len());
            self.current.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.current.len() == self.part_size {
                let full = std::mem::replace(&mut self.current, self.buffers.acquire());
                self.ready.push_back(full.freeze());
            }
        }
    }

    /// Next complete part, if one is ready
    pub fn next_part(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    /// End of input: queue the remainder as the final part
    ///
    /// Drain the remaining parts with [`next_part`](Self::next_part).
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let remainder = std::mem::take(&mut self.current);
        if remainder.is_empty() {
            self.buffers.release(remainder);
        } else {
            self.ready.push_back(remainder.freeze());
        }
    }

    /// Bytes pushed so far
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes waiting in the partial buffer
    pub fn buffered(&self) -> usize {
        self.current.len()
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }
}

/// Adapt a fragment stream into a stream of parts
///
/// The sequence is lazy and finite. An error item is passed through and
/// ends the stream; buffered bytes are discarded in that case.
pub fn assemble<S, E>(input: S, assembler: ChunkAssembler) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    stream::unfold(
        (input, Some(assembler), false),
        |(mut input, mut assembler, mut ended)| async move {
            // None once an error has been passed through
            let parts = assembler.as_mut()?;
            loop {
                if let Some(part) = parts.next_part() {
                    return Some((Ok(part), (input, assembler, ended)));
                }
                if ended {
                    return None;
                }
                match input.next().await {
                    Some(Ok(fragment)) => parts.push(&fragment),
                    Some(Err(e)) => return Some((Err(e), (input, None, true))),
                    None => {
                        parts.finish();
                        ended = true;
                    }
                }
            }
        },
    )
}

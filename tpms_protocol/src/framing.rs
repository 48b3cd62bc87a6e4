// framing.rs: preamble/sync framing and sync-word search over noisy buffers
use crate::{PREAMBLE, Rejection, SYNC_WORD};

/// Lazy scan for the sync word. Yields every offset (overlapping included) in
/// ascending order; the body of a candidate starts at `offset + 2`.
#[derive(Debug, Clone)]
pub struct SyncOffsets<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Iterator for SyncOffsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.pos + 1 < self.buf.len() {
            let i = self.pos;
            self.pos += 1;
            if self.buf[i] == SYNC_WORD[0] && self.buf[i + 1] == SYNC_WORD[1] {
                return Some(i);
            }
        }
        None
    }
}

/// Buffers shorter than the marker plus one byte never yield a candidate.
pub fn sync_offsets(buf: &[u8]) -> SyncOffsets<'_> {
    let pos = if buf.len() < SYNC_WORD.len() + 1 { buf.len() } else { 0 };
    SyncOffsets { buf, pos }
}

pub fn find_sync(buf: &[u8]) -> Option<usize> {
    sync_offsets(buf).next()
}

#[derive(Default, Clone, Copy, Debug)]
pub struct Framer;

impl Framer {
    /// Preamble ‖ Sync ‖ body
    pub fn frame(&self, body: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(PREAMBLE.len() + SYNC_WORD.len() + body.len());
        framed.extend_from_slice(&PREAMBLE);
        framed.extend_from_slice(&SYNC_WORD);
        framed.extend_from_slice(body);
        framed
    }

    /// Every sync offset paired with the bytes that follow the marker.
    pub fn candidates<'a>(self, buf: &'a [u8]) -> impl Iterator<Item = (usize, &'a [u8])> + 'a {
        sync_offsets(buf).map(move |off| (off, &buf[off + SYNC_WORD.len()..]))
    }

    /// First sync word, then exactly `body_len` bytes of body.
    pub fn deframe<'a>(&self, buf: &'a [u8], body_len: usize) -> Result<&'a [u8], Rejection> {
        let off = find_sync(buf).ok_or(Rejection::NoSyncWord)?;
        let rest = &buf[off + SYNC_WORD.len()..];
        if rest.len() < body_len {
            return Err(Rejection::TooShort {
                needed: body_len,
                available: rest.len(),
            });
        }
        Ok(&rest[..body_len])
    }
}

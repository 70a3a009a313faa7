//! Parser for the container runtime's multiplexed stdout/stderr stream.
//!
//! Non-TTY exec and log output arrives as a sequence of frames:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+=========+
//! | stream |   0    |   0    |   0    |        payload length (u32 BE)    | payload |
//! +--------+--------+--------+--------+--------+--------+--------+--------+=========+
//! ```
//!
//! Anything left over that cannot form a header is passed through verbatim.

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    Unknown(u8),
}

impl From<u8> for StreamKind {
    fn from(tag: u8) -> Self {
        match tag {
            0 => StreamKind::Stdin,
            1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            other => StreamKind::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk<'a> {
    /// A framed payload. The payload is clamped to the bytes actually available.
    Frame { stream: StreamKind, payload: &'a [u8] },
    /// Trailing bytes too short to hold a header
    Remainder(&'a [u8]),
}

impl<'a> Chunk<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        match self {
            Chunk::Frame { payload, .. } => payload,
            Chunk::Remainder(bytes) => bytes,
        }
    }
}

/// Iterator over the chunks of a multiplexed buffer
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    buf: &'a [u8],
}

impl<'a> Frames<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }

        if self.buf.len() < HEADER_LEN {
            let rest = std::mem::take(&mut self.buf);
            return Some(Chunk::Remainder(rest));
        }

        let stream = StreamKind::from(self.buf[0]);
        let declared = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        let body = &self.buf[HEADER_LEN..];
        let take = declared.min(body.len());

        let (payload, rest) = body.split_at(take);
        self.buf = rest;
        Some(Chunk::Frame { stream, payload })
    }
}

/// Concatenate every payload in order, appending any unframed tail as-is.
pub fn demux(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len());
    for chunk in Frames::new(buf) {
        out.extend_from_slice(chunk.bytes());
    }
    out
}

#[cfg(test)]
pub(crate) fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![stream, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

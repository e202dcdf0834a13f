//! Serialized script state.
//!
//! A script's serialize section sees a [`StateFile`]: an in-memory stream of
//! little-endian f64 values that is either being written (save) or read
//! (load). The same section code handles both directions through
//! [`StateFile::exchange`].
//!
//! Saved state is framed with [`encode_chunk`]: a 4-byte little-endian
//! length followed by the payload.

use crate::error::StateError;

/// Bytes in a chunk length prefix.
pub const CHUNK_HEADER_LEN: usize = 4;

/// Direction of a [`StateFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// Values are appended.
    Write,
    /// Values are consumed from the front.
    Read,
}

/// In-memory value stream handed to the serialize section.
#[derive(Debug, Clone)]
pub struct StateFile {
    data: Vec<u8>,
    pos: usize,
    mode: StateMode,
}

impl StateFile {
    /// Empty stream for saving.
    pub fn writer() -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
            mode: StateMode::Write,
        }
    }

    /// Stream over previously saved bytes.
    pub fn reader(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            mode: StateMode::Read,
        }
    }

    /// Current direction.
    pub fn mode(&self) -> StateMode {
        self.mode
    }

    /// Whether this stream is being written.
    pub fn is_writing(&self) -> bool {
        self.mode == StateMode::Write
    }

    /// Values left to read. Zero while writing.
    pub fn available(&self) -> usize {
        match self.mode {
            StateMode::Write => 0,
            StateMode::Read => (self.data.len() - self.pos) / 8,
        }
    }

    /// Append a value. Ignored while reading.
    pub fn write(&mut self, value: f64) {
        if self.mode == StateMode::Write {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Consume a value. `None` when exhausted or while writing.
    pub fn read(&mut self) -> Option<f64> {
        if self.mode != StateMode::Read {
            return None;
        }
        let bytes = self.data.get(self.pos..self.pos + 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        self.pos += 8;
        Some(f64::from_le_bytes(raw))
    }

    /// Write `value` when saving, or read a value when loading.
    ///
    /// Returns what the variable should hold afterwards: `value` itself when
    /// saving or when the stream is exhausted, the stored value otherwise.
    pub fn exchange(&mut self, value: f64) -> f64 {
        match self.mode {
            StateMode::Write => {
                self.write(value);
                value
            }
            StateMode::Read => self.read().unwrap_or(value),
        }
    }

    /// Bytes written so far.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Frame `payload` with a 4-byte little-endian length.
pub fn encode_chunk(payload: &[u8]) -> Result<Vec<u8>, StateError> {
    let len = u32::try_from(payload.len()).map_err(|_| StateError::TooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split one framed chunk off the front of `bytes`.
///
/// Returns the payload and the remaining bytes.
pub fn decode_chunk(bytes: &[u8]) -> Result<(&[u8], &[u8]), StateError> {
    let Some(header) = bytes.get(..CHUNK_HEADER_LEN) else {
        return Err(StateError::Truncated {
            expected: CHUNK_HEADER_LEN,
            found: bytes.len(),
        });
    };
    let mut raw = [0u8; CHUNK_HEADER_LEN];
    raw.copy_from_slice(header);
    let len = u32::from_le_bytes(raw) as usize;
    let body = &bytes[CHUNK_HEADER_LEN..];
    if body.len() < len {
        return Err(StateError::Truncated {
            expected: len,
            found: body.len(),
        });
    }
    Ok(body.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_round_trip() {
        let mut w = StateFile::writer();
        assert_eq!(w.exchange(1.5), 1.5);
        assert_eq!(w.exchange(-2.0), -2.0);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 16);

        let mut r = StateFile::reader(bytes);
        assert_eq!(r.available(), 2);
        assert_eq!(r.exchange(0.0), 1.5);
        assert_eq!(r.exchange(0.0), -2.0);
        assert_eq!(r.exchange(7.0), 7.0);
    }

    #[test]
    fn reader_ignores_writes() {
        let mut r = StateFile::reader(Vec::new());
        r.write(3.0);
        assert_eq!(r.available(), 0);
        assert_eq!(r.read(), None);
    }

    #[test]
    fn chunk_framing() {
        let framed = encode_chunk(b"abc").unwrap();
        assert_eq!(framed, vec![3, 0, 0, 0, b'a', b'b', b'c']);

        let mut two = framed.clone();
        two.extend_from_slice(&encode_chunk(b"").unwrap());
        let (first, rest) = decode_chunk(&two).unwrap();
        assert_eq!(first, b"abc");
        let (second, rest) = decode_chunk(rest).unwrap();
        assert!(second.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn truncated_chunks_are_rejected() {
        assert!(matches!(
            decode_chunk(&[1, 0]),
            Err(StateError::Truncated { expected: 4, found: 2 })
        ));
        assert!(matches!(
            decode_chunk(&[5, 0, 0, 0, 1]),
            Err(StateError::Truncated { expected: 5, found: 1 })
        ));
    }
}

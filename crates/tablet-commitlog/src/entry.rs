//! Wire format of a single binlog record: the [`LogEntry`] payload framed by
//! [`crate::segment`] as `CRC32(payload) || varint len || payload`.

use crate::error::DecodeError;

/// Whether a [`LogEntry`] represents a write or a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Put,
    Delete,
}

impl Method {
    fn tag(self) -> u8 {
        match self {
            Method::Put => 0,
            Method::Delete => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Method::Put),
            1 => Ok(Method::Delete),
            other => Err(DecodeError::InvalidMethod(other)),
        }
    }
}

/// One dimension of a multi-index put: the inner-index position and the key
/// bytes for that index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub inner_pos: u32,
    pub key: Vec<u8>,
}

/// One timestamp-column value attached to a put, keyed by `ts_idx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsDimension {
    pub ts_idx: u32,
    pub ts: i64,
}

/// A single replicated write or delete, as appended to the binlog and shipped
/// to followers via `AppendEntries`.
///
/// `offset` is strictly monotonic within a partition (spec.md §3, *Binlog
/// entry*); `term` is the leader term under which the entry was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: u64,
    pub offset: u64,
    pub method: Method,
    pub dimensions: Vec<Dimension>,
    pub ts_dimensions: Vec<TsDimension>,
    pub value: Vec<u8>,
}

impl LogEntry {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.term.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.push(self.method.tag());

        out.extend_from_slice(&(self.dimensions.len() as u32).to_le_bytes());
        for d in &self.dimensions {
            out.extend_from_slice(&d.inner_pos.to_le_bytes());
            out.extend_from_slice(&(d.key.len() as u32).to_le_bytes());
            out.extend_from_slice(&d.key);
        }

        out.extend_from_slice(&(self.ts_dimensions.len() as u32).to_le_bytes());
        for t in &self.ts_dimensions {
            out.extend_from_slice(&t.ts_idx.to_le_bytes());
            out.extend_from_slice(&t.ts.to_le_bytes());
        }

        out.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.value);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(buf);
        let term = cur.get_u64()?;
        let offset = cur.get_u64()?;
        let method = Method::from_tag(cur.get_u8()?)?;

        let n_dims = cur.get_u32()?;
        let mut dimensions = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            let inner_pos = cur.get_u32()?;
            let len = cur.get_u32()? as usize;
            let key = cur.get_bytes(len)?.to_vec();
            dimensions.push(Dimension { inner_pos, key });
        }

        let n_ts = cur.get_u32()?;
        let mut ts_dimensions = Vec::with_capacity(n_ts as usize);
        for _ in 0..n_ts {
            let ts_idx = cur.get_u32()?;
            let ts = cur.get_i64()?;
            ts_dimensions.push(TsDimension { ts_idx, ts });
        }

        let len = cur.get_u32()? as usize;
        let value = cur.get_bytes(len)?.to_vec();

        Ok(Self {
            term,
            offset,
            method,
            dimensions,
            ts_dimensions,
            value,
        })
    }
}

/// A tiny forward-only byte cursor, standing in for the internal buffer
/// crate the teacher uses (`spacetimedb_sats::buffer`).
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::BufferLength {
                wanted: n,
                have: self.buf.len() - self.pos,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn get_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn get_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn get_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let entry = LogEntry {
            term: 7,
            offset: 42,
            method: Method::Put,
            dimensions: vec![
                Dimension {
                    inner_pos: 0,
                    key: b"pk-a".to_vec(),
                },
                Dimension {
                    inner_pos: 1,
                    key: b"pk-b".to_vec(),
                },
            ],
            ts_dimensions: vec![TsDimension { ts_idx: 0, ts: 12345 }],
            value: b"row-bytes".to_vec(),
        };
        let mut buf = Vec::new();
        entry.encode(&mut buf);
        let decoded = LogEntry::decode(&buf).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let entry = LogEntry {
            term: 1,
            offset: 1,
            method: Method::Delete,
            dimensions: vec![],
            ts_dimensions: vec![],
            value: vec![],
        };
        let mut buf = Vec::new();
        entry.encode(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(LogEntry::decode(&buf).is_err());
    }
}

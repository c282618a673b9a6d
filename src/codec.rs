//! Page Codec (spec.md §4.1): pure functions between a [`Page`] and a byte
//! blob. No I/O happens here — that is the Disk Store's job.

use crate::page::{Page, PageId, Row, RowId};

/// # Page wire format
///
/// - 8 bytes: `page_id`
/// - 8 bytes: `lsn`
/// - 8 bytes: `capacity`
/// - 8 bytes: row count `n`
/// - `n` times:
///   - 8 bytes: `row_id`
///   - 8 bytes: payload length `m`
///   - `m` bytes: payload
pub fn encode_page(page: &Page) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&page.page_id.0.to_le_bytes());
    buf.extend_from_slice(&page.lsn.to_le_bytes());
    buf.extend_from_slice(&(page.capacity() as u64).to_le_bytes());
    buf.extend_from_slice(&(page.rows.len() as u64).to_le_bytes());
    for row in &page.rows {
        buf.extend_from_slice(&row.id.0.to_le_bytes());
        buf.extend_from_slice(&(row.payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&row.payload);
    }
    buf
}

pub fn decode_page(bytes: &[u8]) -> Option<Page> {
    let mut cur = Cursor::new(bytes);
    let page_id = PageId(cur.read_u64()?);
    let lsn = cur.read_u64()?;
    let capacity = cur.read_u64()? as usize;
    let row_count = cur.read_u64()?;

    let mut page = Page::empty(page_id, capacity);
    page.lsn = lsn;
    for _ in 0..row_count {
        let row_id = RowId(cur.read_u64()?);
        let len = cur.read_u64()? as usize;
        let payload = cur.read_bytes(len)?.to_vec();
        page.rows.push(Row::new(row_id, payload));
    }
    Some(page)
}

/// A tiny cursor over a byte slice, just enough for the fixed-width fields
/// the codecs in this crate need (pages, index nodes, redo/undo/dwb
/// records). Kept local rather than pulling in a byte-parsing crate, since
/// the wire format itself is intentionally minimal (spec.md treats encoding
/// as an opaque concern external to the core).
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        let b = self.read_bytes(8)?;
        Some(u64::from_le_bytes(b.try_into().ok()?))
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = self.read_bytes(1)?;
        Some(b[0])
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn write_bytes(buf: &mut Vec<u8>, v: &[u8]) {
    write_u64(buf, v.len() as u64);
    buf.extend_from_slice(v);
}

pub fn read_bytes_field(cur: &mut Cursor) -> Option<Vec<u8>> {
    let len = cur.read_u64()? as usize;
    Some(cur.read_bytes(len)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_round_trips_through_the_codec() {
        let mut page = Page::empty(PageId(7), 16);
        page.lsn = 42;
        page.push(Row::new(RowId(1), b"alice".to_vec()));
        page.push(Row::new(RowId(2), b"bob".to_vec()));

        let bytes = encode_page(&page);
        let decoded = decode_page(&bytes).unwrap();

        assert_eq!(decoded.page_id, page.page_id);
        assert_eq!(decoded.lsn, page.lsn);
        assert_eq!(decoded.capacity(), page.capacity());
        assert_eq!(decoded.rows, page.rows);
    }

    #[test]
    fn empty_page_round_trips() {
        let page = Page::empty(PageId(1), 16);
        let bytes = encode_page(&page);
        let decoded = decode_page(&bytes).unwrap();
        assert!(decoded.rows.is_empty());
    }
}

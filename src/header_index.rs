//! Ordered, linked index over the header lines of a message living in a
//! `Ring` (spec.md §4.2 HeaderIndex).
//!
//! Grounded on the teacher's `table.rs` `Table<T>` — an ordered collection
//! searchable case-insensitively — generalized from an owned `Vec` of
//! `(Bstr, T)` pairs to a dense arena of fixed-size entries linked by
//! `next` indices, per spec.md §9 "Header index as arena+indices": no
//! pointers into the buffer are ever cached across a mutating call, only
//! entry indices and lengths that get corrected by the returned delta.

use crate::error::{Error, Result};
use crate::ring::Ring;

/// One header line: `{ len, cr, next }` from spec.md §3.
#[derive(Copy, Clone, Debug, Default)]
struct Entry {
    /// Length of the line from its first byte to its last non-CR/LF byte.
    len: usize,
    /// Whether the line terminator is CRLF (`true`) or bare LF (`false`).
    cr: bool,
    /// Index of the next entry in display/wire order, or `0` (sentinel) if
    /// this is the last entry.
    next: usize,
    /// `false` once the entry has been freed by `remove` and is eligible
    /// for reuse; distinguished from an in-use zero-length header by this
    /// flag rather than by `len == 0` alone, since a header can legally be
    /// empty (`Name.new(...)` with `Flags::VALUE_EMPTY`).
    in_use: bool,
}

/// An opaque handle into the index, returned by `find` and consumed by
/// `iterate_value`/`remove`. Never outlives a mutating call on the index it
/// came from.
#[derive(Copy, Clone, Debug)]
pub struct Context {
    idx: usize,
    pred: usize,
    /// Offset of the start of this header's value, relative to message start.
    pub val_offset: usize,
    /// Length of the current value (a single comma-list element when
    /// iterating, the whole value otherwise).
    pub vlen: usize,
    /// Count of trailing whitespace bytes included in `vlen` that the
    /// caller should trim before comparing/returning the value.
    pub tws: usize,
}

pub struct HeaderIndex {
    entries: Vec<Entry>,
    /// Offset of the first header's first byte, relative to start-of-message.
    first_header_offset: usize,
    /// Index of the first real entry, or `0` if there are none yet.
    first_idx: usize,
    used: usize,
    capacity: usize,
}

impl HeaderIndex {
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity + 1);
        entries.push(Entry::default()); // sentinel at index 0
        Self {
            entries,
            first_header_offset: 0,
            first_idx: 0,
            used: 0,
            capacity,
        }
    }

    /// Records the offset of the first header line, relative to
    /// start-of-message (spec.md §4.2 `start`).
    pub fn start(&mut self, end_of_start_line: usize) {
        self.first_header_offset = end_of_start_line;
        self.first_idx = 0;
        self.used = 0;
        self.entries.truncate(1);
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn eol_len(cr: bool) -> usize {
        if cr {
            2
        } else {
            1
        }
    }

    /// Absolute (message-relative) offset of the first byte of entry `idx`.
    fn offset_of(&self, idx: usize) -> usize {
        let mut offset = self.first_header_offset;
        let mut cur = self.first_idx;
        while cur != 0 && cur != idx {
            let e = &self.entries[cur];
            offset += e.len + Self::eol_len(e.cr);
            cur = e.next;
        }
        offset
    }

    fn free_slot(&mut self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, e)| !e.in_use)
            .map(|(i, _)| i)
    }

    /// Appends a new header entry and links it after `after_idx` (usually
    /// the current tail, `0` meaning "make it the first entry").
    pub fn add(&mut self, length: usize, cr: bool, after_idx: usize) -> Result<usize> {
        if self.used >= self.capacity {
            return Err(Error::NoSpace);
        }
        let new_entry = Entry {
            len: length,
            cr,
            next: self.entries[after_idx].next,
            in_use: true,
        };
        let new_idx = if let Some(slot) = self.free_slot() {
            self.entries[slot] = new_entry;
            slot
        } else {
            self.entries.push(new_entry);
            self.entries.len() - 1
        };
        self.entries[after_idx].next = new_idx;
        if after_idx == 0 {
            self.first_idx = new_idx;
        }
        self.used += 1;
        Ok(new_idx)
    }

    fn tail_idx(&self) -> usize {
        let mut cur = self.first_idx;
        if cur == 0 {
            return 0;
        }
        while self.entries[cur].next != 0 {
            cur = self.entries[cur].next;
        }
        cur
    }

    /// Appends at the current tail; convenience wrapper over `add`.
    pub fn push(&mut self, length: usize, cr: bool) -> Result<usize> {
        let tail = self.tail_idx();
        self.add(length, cr, tail)
    }

    /// Case-insensitive search for a header named `name`, starting after
    /// `from` (`None` to search from the first header). Returns a `Context`
    /// describing the whole value (not yet split on commas).
    pub fn find(&self, ring: &Ring, name: &[u8], from: Option<Context>) -> Option<Context> {
        let mut pred = 0usize;
        let mut cur = match from {
            Some(ctx) => {
                pred = ctx.idx;
                self.entries[ctx.idx].next
            }
            None => self.first_idx,
        };
        while cur != 0 {
            let e = self.entries[cur];
            let start = self.offset_of(cur);
            let line = ring.copy_out(start, e.len);
            if let Some(colon) = line.iter().position(|&b| b == b':') {
                if eq_ignore_case(&line[..colon], name) {
                    let mut val_start = colon + 1;
                    while val_start < line.len() && is_lws(line[val_start]) {
                        val_start += 1;
                    }
                    let mut val_end = line.len();
                    let mut tws = 0;
                    while val_end > val_start && is_lws(line[val_end - 1]) {
                        val_end -= 1;
                        tws += 1;
                    }
                    return Some(Context {
                        idx: cur,
                        pred,
                        val_offset: start + val_start,
                        vlen: val_end - val_start + tws,
                        tws,
                    });
                }
            }
            pred = cur;
            cur = e.next;
        }
        None
    }

    /// For a comma-listed header value, advances `ctx` to the next
    /// comma-separated value on the same line; `None` if `ctx` was the last
    /// value. Honors RFC 2616 §2.2 quoted strings and backslash escapes.
    pub fn iterate_value(&self, ring: &Ring, ctx: Context) -> Option<Context> {
        let e = self.entries[ctx.idx];
        let line_start = self.offset_of(ctx.idx);
        let line_end = line_start + e.len;
        let cur_val_end = ctx.val_offset + ctx.vlen - ctx.tws;
        let mut pos = cur_val_end;
        // Skip to the comma that ends the current value, respecting quotes.
        let mut in_quotes = false;
        while pos < line_end {
            let b = ring.read_at(pos).unwrap_or(0);
            if in_quotes {
                if b == b'\\' {
                    pos += 2;
                    continue;
                }
                if b == b'"' {
                    in_quotes = false;
                }
            } else {
                if b == b'"' {
                    in_quotes = true;
                } else if b == b',' {
                    break;
                }
            }
            pos += 1;
        }
        if pos >= line_end {
            return None;
        }
        let mut val_start = pos + 1;
        while val_start < line_end && is_lws(ring.read_at(val_start).unwrap_or(0)) {
            val_start += 1;
        }
        let mut val_end = val_start;
        let mut in_quotes = false;
        while val_end < line_end {
            let b = ring.read_at(val_end).unwrap_or(0);
            if in_quotes {
                if b == b'\\' {
                    val_end += 2;
                    continue;
                }
                if b == b'"' {
                    in_quotes = false;
                }
            } else {
                if b == b'"' {
                    in_quotes = true;
                } else if b == b',' {
                    break;
                }
            }
            val_end += 1;
        }
        let mut trimmed_end = val_end;
        let mut tws = 0;
        while trimmed_end > val_start && is_lws(ring.read_at(trimmed_end - 1).unwrap_or(0)) {
            trimmed_end -= 1;
            tws += 1;
        }
        Some(Context {
            idx: ctx.idx,
            pred: ctx.pred,
            val_offset: val_start,
            vlen: trimmed_end - val_start + tws,
            tws,
        })
    }

    /// Removes the whole header line that `ctx` points into. Returns the
    /// displacement (negative) to apply to `eoh` and any other offset held
    /// past the removed line.
    pub fn remove_line(&mut self, ring: &mut Ring, ctx: Context) -> isize {
        let e = self.entries[ctx.idx];
        let start = self.offset_of(ctx.idx);
        let total_len = e.len + Self::eol_len(e.cr);
        let delta = ring.delete(start, total_len);
        self.entries[ctx.pred].next = e.next;
        if ctx.pred == 0 {
            self.first_idx = e.next;
        }
        self.entries[ctx.idx] = Entry::default();
        self.used -= 1;
        delta
    }

    /// Shrinks/grows the in-memory length bookkeeping for `idx` by `delta`
    /// bytes (the header's text in the ring has already been edited by the
    /// caller via `Ring::replace`/`insert`/`delete`).
    pub fn adjust_len(&mut self, idx: usize, delta: isize) {
        let e = &mut self.entries[idx];
        e.len = (e.len as isize + delta).max(0) as usize;
    }

    /// Updates which line-ending entry `idx` is recorded as using, e.g.
    /// after an obsolete line fold adopts the continuation's terminator.
    pub fn set_terminator(&mut self, idx: usize, cr: bool) {
        self.entries[idx].cr = cr;
    }

    /// Absolute (message-relative) offset just past the last header line,
    /// i.e. where a newly appended header line belongs (right before the
    /// blank line ending the header block).
    pub fn end_offset(&self) -> usize {
        self.offset_of(0)
    }

    /// Lets a caller outside this module (one holding a `Context` from
    /// `find`/`iterate_value`, not a raw entry index) account for a ring
    /// edit it made to that header's value.
    pub fn apply_value_edit(&mut self, ctx: Context, delta: isize) {
        self.adjust_len(ctx.idx, delta);
    }

    /// Returns the absolute bounds of the value region (everything after
    /// the colon) and the offsets of every top-level (not inside quotes)
    /// comma in it, for `remove` to decide how much of the line to take.
    fn value_region(&self, ring: &Ring, idx: usize) -> (usize, usize, Vec<usize>) {
        let e = self.entries[idx];
        let start = self.offset_of(idx);
        let line = ring.copy_out(start, e.len);
        let colon = line.iter().position(|&b| b == b':').unwrap_or(line.len());
        let mut commas = Vec::new();
        let mut in_quotes = false;
        let mut i = colon + 1;
        while i < line.len() {
            let b = line[i];
            if in_quotes {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == b'"' {
                    in_quotes = false;
                }
            } else if b == b'"' {
                in_quotes = true;
            } else if b == b',' {
                commas.push(start + i);
            }
            i += 1;
        }
        (start + colon + 1, start + line.len(), commas)
    }

    /// Deletes one value or the whole header (spec.md §4.2 `remove`): if
    /// `ctx` is the only comma-separated value on its line, the entire line
    /// (including its CR/LF) is removed; otherwise just that value and one
    /// surrounding comma are removed, leaving the rest of the list intact.
    /// Returns the displacement to apply to every offset held past the edit.
    pub fn remove(&mut self, ring: &mut Ring, ctx: Context) -> isize {
        let (region_start, region_end, commas) = self.value_region(ring, ctx.idx);
        if commas.is_empty() {
            return self.remove_line(ring, ctx);
        }
        let val_end = ctx.val_offset + ctx.vlen - ctx.tws;
        let comma_before = commas.iter().rev().find(|&&c| c < ctx.val_offset).copied();
        let comma_after = commas.iter().find(|&&c| c >= val_end).copied();
        let (del_start, del_end) = match (comma_before, comma_after) {
            (Some(before), Some(after)) => (before, after),
            (Some(before), None) => (before, region_end),
            (None, Some(after)) => (region_start, after + 1),
            (None, None) => (region_start, region_end),
        };
        let delta = ring.delete(del_start, del_end - del_start);
        self.adjust_len(ctx.idx, delta);
        delta
    }
}

fn is_lws(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

#[cfg(test)]
mod test {
    use super::*;

    fn build(lines: &[&[u8]]) -> (Ring, HeaderIndex) {
        let mut ring = Ring::new(256, 8);
        let mut idx = HeaderIndex::new(16);
        idx.start(0);
        for line in lines {
            ring.fill(line).unwrap();
            ring.fill(b"\r\n").unwrap();
            idx.push(line.len(), true).unwrap();
        }
        (ring, idx)
    }

    #[test]
    fn find_is_case_insensitive() {
        let (ring, idx) = build(&[b"Host: example.com", b"content-length: 5"]);
        let ctx = idx.find(&ring, b"HOST", None).expect("found");
        assert_eq!(ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws), b"example.com");
        let ctx2 = idx.find(&ring, b"Content-Length", None).expect("found");
        assert_eq!(ring.copy_out(ctx2.val_offset, ctx2.vlen - ctx2.tws), b"5");
    }

    #[test]
    fn iterate_value_splits_on_commas() {
        let (ring, idx) = build(&[b"Accept-Encoding: gzip, deflate, br"]);
        let first = idx.find(&ring, b"accept-encoding", None).unwrap();
        assert_eq!(ring.copy_out(first.val_offset, first.vlen - first.tws), b"gzip");
        let second = idx.iterate_value(&ring, first).unwrap();
        assert_eq!(ring.copy_out(second.val_offset, second.vlen - second.tws), b"deflate");
        let third = idx.iterate_value(&ring, second).unwrap();
        assert_eq!(ring.copy_out(third.val_offset, third.vlen - third.tws), b"br");
        assert!(idx.iterate_value(&ring, third).is_none());
    }

    #[test]
    fn remove_line_unlinks_and_deletes() {
        let (mut ring, mut idx) = build(&[b"A: 1", b"B: 2", b"C: 3"]);
        let ctx = idx.find(&ring, b"B", None).unwrap();
        let delta = idx.remove_line(&mut ring, ctx);
        assert_eq!(delta, -("B: 2\r\n".len() as isize));
        assert!(idx.find(&ring, b"B", None).is_none());
        assert!(idx.find(&ring, b"A", None).is_some());
        assert!(idx.find(&ring, b"C", None).is_some());
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn remove_drops_whole_line_when_value_has_no_other_elements() {
        let (mut ring, mut idx) = build(&[b"A: 1", b"B: 2"]);
        let ctx = idx.find(&ring, b"B", None).unwrap();
        idx.remove(&mut ring, ctx);
        assert!(idx.find(&ring, b"B", None).is_none());
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_drops_only_one_comma_value_from_a_list() {
        let (mut ring, mut idx) = build(&[b"Accept-Encoding: gzip, deflate, br"]);
        let first = idx.find(&ring, b"accept-encoding", None).unwrap();
        let second = idx.iterate_value(&ring, first).unwrap();
        idx.remove(&mut ring, second);
        let ctx = idx.find(&ring, b"accept-encoding", None).unwrap();
        assert_eq!(ring.copy_out(ctx.val_offset, ctx.vlen - ctx.tws), b"gzip, br");
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn end_offset_points_past_the_last_header() {
        let (_ring, idx) = build(&[b"A: 1", b"B: 22"]);
        assert_eq!(idx.end_offset(), "A: 1\r\n".len() + "B: 22\r\n".len());
    }

    #[test]
    fn quoted_comma_is_not_a_separator() {
        let (ring, idx) = build(&[br#"X-Thing: "a, b", c"#]);
        let first = idx.find(&ring, b"x-thing", None).unwrap();
        assert_eq!(ring.copy_out(first.val_offset, first.vlen - first.tws), br#""a, b""#);
        let second = idx.iterate_value(&ring, first).unwrap();
        assert_eq!(ring.copy_out(second.val_offset, second.vlen - second.tws), b"c");
    }
}

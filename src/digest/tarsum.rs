// Tarsum v1: a content hash over a tar stream's logical contents rather
// than its raw bytes. Each archive member is digested individually over a
// fixed subset of its header fields (uid, gid and mtime zeroed) plus its
// file data; the per-entry sums are then sorted and hashed together, so the
// result is invariant under entry ordering and the masked metadata.

use sha2::{Digest as _, Sha256};
use tar::Header;

const BLOCK_SIZE: usize = 512;

enum State {
    /// Collecting the next 512-byte header block.
    Header,
    /// Streaming an entry's file data into its per-entry hasher.
    Data,
    /// Skipping the zero padding that rounds an entry up to a full block.
    Pad,
}

pub struct TarSumV1 {
    state: State,
    block: [u8; BLOCK_SIZE],
    filled: usize,
    data_remaining: u64,
    pad_remaining: u64,
    entry: Option<Sha256>,
    sums: Vec<String>,
}

impl TarSumV1 {
    pub fn new() -> Self {
        TarSumV1 {
            state: State::Header,
            block: [0u8; BLOCK_SIZE],
            filled: 0,
            data_remaining: 0,
            pad_remaining: 0,
            entry: None,
            sums: Vec::new(),
        }
    }

    pub fn update(&mut self, mut chunk: &[u8]) {
        while !chunk.is_empty() {
            match self.state {
                State::Header => {
                    let want = BLOCK_SIZE - self.filled;
                    let take = want.min(chunk.len());
                    self.block[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
                    self.filled += take;
                    chunk = &chunk[take..];
                    if self.filled == BLOCK_SIZE {
                        self.filled = 0;
                        self.consume_header_block();
                    }
                }
                State::Data => {
                    let take = (self.data_remaining.min(chunk.len() as u64)) as usize;
                    if let Some(entry) = self.entry.as_mut() {
                        entry.update(&chunk[..take]);
                    }
                    self.data_remaining -= take as u64;
                    chunk = &chunk[take..];
                    if self.data_remaining == 0 {
                        self.finish_entry();
                        self.state = if self.pad_remaining > 0 {
                            State::Pad
                        } else {
                            State::Header
                        };
                    }
                }
                State::Pad => {
                    let take = (self.pad_remaining.min(chunk.len() as u64)) as usize;
                    self.pad_remaining -= take as u64;
                    chunk = &chunk[take..];
                    if self.pad_remaining == 0 {
                        self.state = State::Header;
                    }
                }
            }
        }
    }

    /// Sorted per-entry sums hashed together. Trailing partial input (a
    /// truncated header block or short file data) is dropped, which makes a
    /// truncated archive hash differently from the complete one.
    pub fn finalize(mut self) -> String {
        self.sums.sort_unstable();
        let mut h = Sha256::new();
        for sum in &self.sums {
            h.update(sum.as_bytes());
        }
        hex::encode(h.finalize())
    }

    fn consume_header_block(&mut self) {
        if self.block.iter().all(|&b| b == 0) {
            // end-of-archive marker blocks
            return;
        }

        let mut header = Header::new_gnu();
        header.as_mut_bytes().copy_from_slice(&self.block);

        let mut entry = Sha256::new();
        let mut field = |key: &str, value: &[u8]| {
            entry.update(key.as_bytes());
            entry.update(value);
        };

        field("name", &header.path_bytes());
        field(
            "mode",
            header.mode().unwrap_or(0).to_string().as_bytes(),
        );
        field("uid", b"0");
        field("gid", b"0");
        let size = header.entry_size().unwrap_or(0);
        field("size", size.to_string().as_bytes());
        field("mtime", b"0");
        field("typeflag", &[header.entry_type().as_byte()]);
        field(
            "linkname",
            header.link_name_bytes().as_deref().unwrap_or_default(),
        );
        field("uname", header.username_bytes().unwrap_or_default());
        field("gname", header.groupname_bytes().unwrap_or_default());
        let devmajor = header.device_major().ok().flatten().unwrap_or(0);
        field("devmajor", devmajor.to_string().as_bytes());
        let devminor = header.device_minor().ok().flatten().unwrap_or(0);
        field("devminor", devminor.to_string().as_bytes());

        self.entry = Some(entry);
        if size > 0 {
            self.data_remaining = size;
            self.pad_remaining = (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;
            self.state = State::Data;
        } else {
            self.finish_entry();
            self.state = State::Header;
        }
    }

    fn finish_entry(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.sums.push(hex::encode(entry.finalize()));
        }
    }
}

impl Default for TarSumV1 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(entries: &[(&str, &[u8], u64, u64)]) -> Vec<u8> {
        // entries: (path, data, uid, mtime)
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data, uid, mtime) in entries {
            let mut header = Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_uid(*uid);
            header.set_gid(*uid);
            header.set_mtime(*mtime);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn sum_of(bytes: &[u8]) -> String {
        let mut ts = TarSumV1::new();
        ts.update(bytes);
        ts.finalize()
    }

    #[test]
    fn deterministic() {
        let a = archive(&[("etc/hosts", b"127.0.0.1 localhost\n", 0, 0)]);
        assert_eq!(sum_of(&a), sum_of(&a));
    }

    #[test]
    fn invariant_under_uid_and_mtime() {
        let a = archive(&[("bin/sh", b"#!/bin/sh\n", 0, 0)]);
        let b = archive(&[("bin/sh", b"#!/bin/sh\n", 1000, 1_700_000_000)]);
        assert_eq!(sum_of(&a), sum_of(&b));
    }

    #[test]
    fn invariant_under_entry_order() {
        let a = archive(&[("a", b"one", 0, 0), ("b", b"two", 0, 0)]);
        let b = archive(&[("b", b"two", 0, 0), ("a", b"one", 0, 0)]);
        assert_eq!(sum_of(&a), sum_of(&b));
    }

    #[test]
    fn content_changes_the_sum() {
        let a = archive(&[("a", b"one", 0, 0)]);
        let b = archive(&[("a", b"two", 0, 0)]);
        assert_ne!(sum_of(&a), sum_of(&b));
    }

    #[test]
    fn name_changes_the_sum() {
        let a = archive(&[("a", b"one", 0, 0)]);
        let b = archive(&[("b", b"one", 0, 0)]);
        assert_ne!(sum_of(&a), sum_of(&b));
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let a = archive(&[("a", b"one", 0, 0), ("b", &[7u8; 1000], 0, 0)]);
        let whole = sum_of(&a);
        let mut ts = TarSumV1::new();
        for piece in a.chunks(17) {
            ts.update(piece);
        }
        assert_eq!(ts.finalize(), whole);
    }
}

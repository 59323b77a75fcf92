#![forbid(unsafe_code)]

use crate::domain::MAX_PATTERN_LEN;
use crate::stores::PatternStore;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

/// Scan a whole file for patterns, `chunk` bytes at a time.
///
/// Consecutive windows overlap by `MAX_PATTERN_LEN - 1` bytes, so a pattern
/// straddling a chunk boundary is still found. Reads are positional and do
/// not move the file offset.
pub fn scan_file(store: &PatternStore, file: &File, chunk: usize) -> io::Result<bool> {
    const CARRY: usize = MAX_PATTERN_LEN - 1;

    let chunk = chunk.max(MAX_PATTERN_LEN);
    let mut window = vec![0u8; CARRY + chunk];
    let mut carried = 0usize;
    let mut offset = 0u64;

    loop {
        let n = match file.read_at(&mut window[carried..], offset) {
            Ok(0) => return Ok(false),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        offset += n as u64;

        let filled = carried + n;
        if store.contains_any(&window[..filled]) {
            return Ok(true);
        }

        let keep = filled.min(CARRY);
        window.copy_within(filled - keep..filled, 0);
        carried = keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pattern;
    use std::io::Write;

    fn file_with(content: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn finds_pattern_across_chunk_boundary() {
        let store = PatternStore::new();
        store.add(Pattern::try_from("boundary").unwrap()).unwrap();

        let mut content = vec![b'.'; MAX_PATTERN_LEN - 3];
        content.extend_from_slice(b"boundary");
        content.extend(vec![b'.'; 1000]);
        let file = file_with(&content);

        assert!(scan_file(&store, &file, MAX_PATTERN_LEN).unwrap());
    }

    #[test]
    fn finds_pattern_deep_in_large_file() {
        let store = PatternStore::new();
        store.add(Pattern::try_from("needle").unwrap()).unwrap();

        let mut content = vec![b'h'; 1 << 20];
        content.extend_from_slice(b"needle");
        let file = file_with(&content);

        assert!(scan_file(&store, &file, 4096).unwrap());
    }

    #[test]
    fn clean_and_empty_files() {
        let store = PatternStore::new();
        store.add(Pattern::try_from("needle").unwrap()).unwrap();

        assert!(!scan_file(&store, &file_with(&vec![b'h'; 10_000]), 512).unwrap());
        assert!(!scan_file(&store, &file_with(b""), 512).unwrap());
    }
}

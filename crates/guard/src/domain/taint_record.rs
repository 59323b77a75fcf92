#![forbid(unsafe_code)]

/// Value of the removal counter before the first removal ever happened.
pub const REMOVAL_COUNT_INIT: u64 = 0;

const RECORD_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaintStatus {
    #[default]
    Unmarked,
    Bad,
}

/// Persisted verdict of a scanned file.
///
/// `rc_snapshot` is the removal counter at the time the file was flagged;
/// the record only proves the file is still bad while it equals the current
/// counter. Both fields are encoded into one attribute value so a single
/// write updates them together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaintRecord {
    pub status: TaintStatus,
    pub rc_snapshot: u64,
}

impl TaintRecord {
    pub const fn bad(rc_snapshot: u64) -> Self {
        Self {
            status: TaintStatus::Bad,
            rc_snapshot,
        }
    }

    pub fn is_bad(&self) -> bool {
        self.status == TaintStatus::Bad
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0] = match self.status {
            TaintStatus::Unmarked => 0,
            TaintStatus::Bad => 1,
        };
        out[1..].copy_from_slice(&self.rc_snapshot.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != RECORD_LEN {
            return Err(format!(
                "expected {RECORD_LEN} bytes, found {}",
                bytes.len()
            ));
        }
        let status = match bytes[0] {
            0 => TaintStatus::Unmarked,
            1 => TaintStatus::Bad,
            other => return Err(format!("unknown status {other}")),
        };
        let rc_snapshot = decode_counter(&bytes[1..])?;
        Ok(Self {
            status,
            rc_snapshot,
        })
    }
}

pub fn encode_counter(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn decode_counter(bytes: &[u8]) -> Result<u64, String> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| format!("expected 8 bytes, found {}", bytes.len()))?;
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_status_and_snapshot() {
        let record = TaintRecord::decode(&[1, 7, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(record, TaintRecord::bad(7));
        assert_eq!(TaintRecord::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(TaintRecord::decode(&[1, 2, 3]).is_err());
        assert!(TaintRecord::decode(&[9, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(decode_counter(&[0; 4]).is_err());
    }
}

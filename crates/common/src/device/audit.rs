use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Encoded size of one [`AuditRecord`]
pub const AUDIT_RECORD_SIZE: usize = 7;
pub const DEFAULT_LOG_CAPACITY: usize = 100;
/// Most bytes of records returned by one `PROCESS` step
pub const LOG_BATCH_SIZE: usize = 128;

/// Id written in place of an absent object id
const NO_ID: u16 = 0xFFFF;

/// `ins | id1(2) | id2(2) | status(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ins: u8,
    pub id1: u16,
    pub id2: u16,
    pub status: u16,
}

impl AuditRecord {
    pub fn new(ins: u8, id1: Option<u16>, id2: Option<u16>, status: u16) -> Self {
        AuditRecord {
            ins,
            id1: id1.unwrap_or(NO_ID),
            id2: id2.unwrap_or(NO_ID),
            status,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.ins);
        out.extend_from_slice(&self.id1.to_be_bytes());
        out.extend_from_slice(&self.id2.to_be_bytes());
        out.extend_from_slice(&self.status.to_be_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < AUDIT_RECORD_SIZE {
            return None;
        }
        Some(AuditRecord {
            ins: bytes[0],
            id1: u16::from_be_bytes([bytes[1], bytes[2]]),
            id2: u16::from_be_bytes([bytes[3], bytes[4]]),
            status: u16::from_be_bytes([bytes[5], bytes[6]]),
        })
    }
}

/// Ring of the most recent sensitive operations.
///
/// Long-running operations open a *pending* record with status 0 and settle
/// it once they complete or fail. Reading walks from the newest record to
/// the oldest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    capacity: usize,
    records: VecDeque<AuditRecord>,
    total: u16,
    #[serde(skip)]
    pending: bool,
    #[serde(skip)]
    cursor: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        AuditLog {
            capacity: capacity.max(1),
            records: VecDeque::with_capacity(capacity),
            total: 0,
            pending: false,
            cursor: 0,
        }
    }

    /// Records ever written, saturating
    pub fn total(&self) -> u16 {
        self.total
    }

    /// Records still held by the ring
    pub fn available(&self) -> u16 {
        self.records.len() as u16
    }

    pub fn latest(&self) -> Option<&AuditRecord> {
        self.records.back()
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Append a finished record
    pub fn append(&mut self, record: AuditRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total = self.total.saturating_add(1);
        self.pending = false;
    }

    /// Open a pending record for an operation that is starting
    pub fn begin(&mut self, ins: u8, id1: Option<u16>, id2: Option<u16>) {
        self.append(AuditRecord::new(ins, id1, id2, 0));
        self.pending = true;
    }

    /// Complete the pending record, filling in the ids known by now
    pub fn complete(&mut self, id1: Option<u16>, id2: Option<u16>, status: u16) {
        if !self.pending {
            return;
        }
        if let Some(record) = self.records.back_mut() {
            *record = AuditRecord::new(record.ins, id1, id2, status);
        }
        self.pending = false;
    }

    /// Close the pending record, if any, with the status of a failure
    pub fn fail_pending(&mut self, status: u16) {
        if !self.pending {
            return;
        }
        if let Some(record) = self.records.back_mut() {
            record.status = status;
        }
        self.pending = false;
    }

    /// `total(2) | available(2) | [newest record]`, rewinding the cursor
    pub fn first(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + AUDIT_RECORD_SIZE);
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.available().to_be_bytes());
        if let Some(record) = self.latest() {
            record.encode_into(&mut out);
            self.cursor = 1;
        } else {
            self.cursor = 0;
        }
        out
    }

    /// Older records following the cursor, at most [`LOG_BATCH_SIZE`] bytes
    pub fn next_batch(&mut self) -> Vec<u8> {
        let per_batch = LOG_BATCH_SIZE / AUDIT_RECORD_SIZE;
        let mut out = Vec::with_capacity(per_batch * AUDIT_RECORD_SIZE);
        for record in self.records.iter().rev().skip(self.cursor).take(per_batch) {
            record.encode_into(&mut out);
            self.cursor += 1;
        }
        out
    }

    /// Decode a `PROCESS` response back into records
    pub fn decode_batch(bytes: &[u8]) -> Vec<AuditRecord> {
        bytes
            .chunks_exact(AUDIT_RECORD_SIZE)
            .filter_map(AuditRecord::decode)
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

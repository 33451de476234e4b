// ID Generator - Snowflake-style ids for store-assigned documents
// Ids grow with time, so sorting by id matches creation order for documents
// created by the same store node.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 64-bit id layout: [timestamp_ms:42][node_id:10][sequence:12]
/// 1024 nodes, 4096 ids per millisecond per node.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    state: Mutex<GeneratorState>,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

const SEQUENCE_MASK: u64 = 0xFFF;
const NODE_MASK: u64 = 0x3FF;
const TIMESTAMP_MASK: u64 = 0x3FF_FFFF_FFFF;

impl IdGenerator {
    /// Node ids above 1023 are folded into the 10-bit node field
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: (u64::from(node_id) & NODE_MASK) as u16,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    pub fn next_id(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Never step backwards, even if the wall clock does
        if now > state.last_timestamp {
            state.last_timestamp = now;
            state.sequence = 0;
        } else {
            state.sequence += 1;
            if state.sequence > SEQUENCE_MASK {
                // Sequence exhausted: borrow the next millisecond
                state.last_timestamp += 1;
                state.sequence = 0;
            }
        }

        let id = ((state.last_timestamp & TIMESTAMP_MASK) << 22)
            | (u64::from(self.node_id) << 12)
            | (state.sequence & SEQUENCE_MASK);
        id as i64
    }

    pub fn next_string_id(&self) -> String {
        self.next_id().to_string()
    }

    pub fn extract_node_id(id: i64) -> u16 {
        (((id as u64) >> 12) & NODE_MASK) as u16
    }

    pub fn extract_sequence(id: i64) -> u16 {
        ((id as u64) & SEQUENCE_MASK) as u16
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }
}

//! Global transaction identifier for two-phase commit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `{formatId, globalTxId, branchQualifier}` per the X/Open XA standard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_tx_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.format_id,
            hex(&self.global_tx_id),
            hex(&self.branch_qualifier)
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Flags accepted by `xaStart`/`xaEnd`, named directly from the X/Open spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XaStartFlag {
    NoFlags,
    Join,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XaEndFlag {
    Success,
    Fail,
    Suspend,
}

/// Lifecycle state of an [`Xid`] binding, per §4.I's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XaState {
    Idle,
    Started,
    Ended,
    Prepared,
    Completed,
}

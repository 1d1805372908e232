//! Chunk location encoding.
//!
//! A chunk sourced from a snapshot lives at an opaque S3 data-chunk key;
//! a chunk sourced from a live file lives at a byte offset into the
//! destination volume. `Location` tags the two apart instead of
//! overloading one string for both, with `encode`/`decode` as the one
//! pair of functions both chunk creation and chunk recovery agree on.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    /// Snapshot-sourced chunk: an opaque S3 data-chunk key.
    S3 { key: String },
    /// File-sourced chunk: a byte offset into the destination volume.
    Curve { file_name: String, offset: u64 },
}

const S3_PREFIX: &str = "s3://";
const CURVE_PREFIX: &str = "cc://";

impl Location {
    pub fn s3(key: impl Into<String>) -> Self {
        Location::S3 { key: key.into() }
    }

    pub fn curve(file_name: impl Into<String>, offset: u64) -> Self {
        Location::Curve {
            file_name: file_name.into(),
            offset,
        }
    }

    /// Wire encoding: `s3://<key>` or `cc://<file>:<offset>`.
    pub fn encode(&self) -> String {
        match self {
            Location::S3 { key } => format!("{S3_PREFIX}{key}"),
            Location::Curve { file_name, offset } => {
                format!("{CURVE_PREFIX}{file_name}:{offset}")
            }
        }
    }

    pub fn decode(s: &str) -> Option<Location> {
        if let Some(key) = s.strip_prefix(S3_PREFIX) {
            return Some(Location::S3 { key: key.to_string() });
        }
        if let Some(rest) = s.strip_prefix(CURVE_PREFIX) {
            let (file_name, offset) = rest.rsplit_once(':')?;
            let offset = offset.parse().ok()?;
            return Some(Location::Curve {
                file_name: file_name.to_string(),
                offset,
            });
        }
        None
    }
}

//! `relaynodes.conf`: relays this wallet controls.
//!
//! One relay per line:
//!
//! ```text
//! alias address privkey txhash outidx [rewardaddr[:percent]]
//! ```

use std::path::Path;

/// One configured relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayNodeEntry {
    pub alias: String,
    /// `host:port` the relay listens on.
    pub address: String,
    pub private_key: String,
    pub tx_hash: String,
    pub output_index: String,
    /// Share of the relay payment redirected elsewhere.
    pub reward: Option<RewardSplit>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardSplit {
    pub address: String,
    /// 0..=100. Defaults to 100.
    pub percent: u8,
}

/// Error types for relay list parsing.
#[derive(Debug, thiserror::Error)]
pub enum RelayNodesError {
    /// A line does not have 5 or 6 fields.
    #[error("line {line}: expected 5 or 6 fields, got {fields}")]
    FieldCount {
        /// 1-based line number.
        line: usize,
        fields: usize,
    },

    /// The reward percent is not an integer in 0..=100.
    #[error("line {line}: invalid reward percent {value:?}")]
    InvalidPercent {
        /// 1-based line number.
        line: usize,
        value: String,
    },

    #[error("line {line}: empty reward address")]
    EmptyRewardAddress { line: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse the relay list. Blank lines are skipped.
pub fn parse(content: &str) -> Result<Vec<RelayNodeEntry>, RelayNodesError> {
    let mut entries = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let reward = match fields.as_slice() {
            [_, _, _, _, _] => None,
            [_, _, _, _, _, reward] => Some(parse_reward(line, reward)?),
            _ => {
                return Err(RelayNodesError::FieldCount {
                    line,
                    fields: fields.len(),
                })
            }
        };
        entries.push(RelayNodeEntry {
            alias: fields[0].to_string(),
            address: fields[1].to_string(),
            private_key: fields[2].to_string(),
            tx_hash: fields[3].to_string(),
            output_index: fields[4].to_string(),
            reward,
        });
    }
    Ok(entries)
}

fn parse_reward(line: usize, field: &str) -> Result<RewardSplit, RelayNodesError> {
    let (address, percent) = match field.split_once(':') {
        Some((address, pct)) => {
            let percent = pct
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= 100)
                .ok_or_else(|| RelayNodesError::InvalidPercent {
                    line,
                    value: pct.to_string(),
                })?;
            (address, percent)
        }
        None => (field, 100),
    };
    if address.is_empty() {
        return Err(RelayNodesError::EmptyRewardAddress { line });
    }
    Ok(RewardSplit {
        address: address.to_string(),
        percent,
    })
}

/// Read the relay list at `path`. A missing file is an empty list.
pub fn load(path: &Path) -> Result<Vec<RelayNodeEntry>, RelayNodesError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entries() {
        let content = "\
mn1 10.0.0.1:9999 key1 aaaa 0

mn2 10.0.0.2:9999 key2 bbbb 1 Xaddr
mn3 10.0.0.3:9999 key3 cccc 2 Yaddr:25
";
        let entries = parse(content).expect("parse");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].alias, "mn1");
        assert!(entries[0].reward.is_none());
        assert_eq!(
            entries[1].reward,
            Some(RewardSplit {
                address: "Xaddr".to_string(),
                percent: 100
            })
        );
        assert_eq!(entries[2].reward.as_ref().map(|r| r.percent), Some(25));
        assert_eq!(entries[2].output_index, "2");
    }

    #[test]
    fn test_field_count_reports_line() {
        let err = parse("mn1 a b c d\nmn2 a b c\n").expect_err("short line");
        assert!(matches!(err, RelayNodesError::FieldCount { line: 2, fields: 4 }));
        let err = parse("mn1 a b c d e f\n").expect_err("long line");
        assert!(matches!(err, RelayNodesError::FieldCount { line: 1, fields: 7 }));
    }

    #[test]
    fn test_invalid_percent() {
        let err = parse("mn1 a b c d addr:101\n").expect_err("percent");
        assert!(matches!(err, RelayNodesError::InvalidPercent { line: 1, .. }));
        let err = parse("mn1 a b c d addr:x\n").expect_err("percent");
        assert!(matches!(err, RelayNodesError::InvalidPercent { .. }));
        let err = parse("mn1 a b c d :50\n").expect_err("address");
        assert!(matches!(err, RelayNodesError::EmptyRewardAddress { line: 1 }));
        let ok = parse("mn1 a b c d addr:0\n").expect("zero percent");
        assert_eq!(ok[0].reward.as_ref().map(|r| r.percent), Some(0));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let entries = load(Path::new("/nonexistent/darkmix/relaynodes.conf")).expect("missing ok");
        assert!(entries.is_empty());
    }
}

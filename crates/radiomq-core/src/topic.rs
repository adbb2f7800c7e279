//! Topic naming convention
//!
//! Each radio owns `<prefix>/rx` and `<prefix>/tx`. Routing modules publish
//! below their configured prefix, appending `/<nodeId>` or `/<payloadType>`.

use crate::message::PayloadKind;

/// Suffix of a radio's receive topic
pub const RX_SUFFIX: &str = "/rx";

/// Suffix of a radio's transmit topic
pub const TX_SUFFIX: &str = "/tx";

/// Receive topic of the radio at `prefix`
pub fn rx(prefix: &str) -> String {
    format!("{prefix}{RX_SUFFIX}")
}

/// Transmit topic of the radio at `prefix`
pub fn tx(prefix: &str) -> String {
    format!("{prefix}{TX_SUFFIX}")
}

/// Append a `/<suffix>` level
pub fn child(base: &str, suffix: impl std::fmt::Display) -> String {
    format!("{}/{}", base.trim_end_matches('/'), suffix)
}

/// Payload kind implied by a raw radio topic
///
/// Only `<prefix>/rx` and `<prefix>/tx` of a radio listed in `radios` are
/// raw. Other topics carry whatever their publisher chose, even when they
/// end in `/rx` or `/tx`.
pub fn raw_kind<S: AsRef<str>>(topic: &str, radios: &[S]) -> Option<PayloadKind> {
    radios.iter().find_map(|prefix| {
        let rest = topic.strip_prefix(prefix.as_ref())?;
        match rest {
            RX_SUFFIX => Some(PayloadKind::RawRx),
            TX_SUFFIX => Some(PayloadKind::RawTx),
            _ => None,
        }
    })
}

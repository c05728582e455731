use serde::Serialize;
use std::collections::BTreeSet;

use crate::stores::PeerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryRefusal {
    Ambiguous,
    NoStores,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub store: Option<PeerSnapshot>,
    pub reason: Option<RecoveryRefusal>,
}

pub fn describe_stores(peers: &[PeerSnapshot]) -> String {
    peers
        .iter()
        .map(|peer| peer.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Peers must all carry the same fingerprint; any disagreement is refused.
pub fn resolve_recovery(peers: &[PeerSnapshot]) -> RecoveryResult {
    let candidates = peers
        .iter()
        .filter(|peer| peer.tokens.has_any_token())
        .collect::<Vec<_>>();
    let fingerprints = candidates
        .iter()
        .filter_map(|peer| peer.tokens.fingerprint_source())
        .collect::<BTreeSet<_>>();

    if fingerprints.len() > 1 {
        return RecoveryResult {
            store: None,
            reason: Some(RecoveryRefusal::Ambiguous),
        };
    }
    // Ties keep the earlier peer, so the native CLI is preferred.
    let mut chosen: Option<&PeerSnapshot> = None;
    for peer in candidates {
        let newer = match chosen {
            Some(best) => {
                peer.tokens.expires_ms.unwrap_or(i64::MIN) > best.tokens.expires_ms.unwrap_or(i64::MIN)
            }
            None => true,
        };
        if newer {
            chosen = Some(peer);
        }
    }
    match chosen {
        Some(peer) => RecoveryResult {
            store: Some(peer.clone()),
            reason: None,
        },
        None => RecoveryResult {
            store: None,
            reason: Some(RecoveryRefusal::NoStores),
        },
    }
}

//! Reverse-sync decision: does a peer hold a newer copy of the active credential?

use serde::Serialize;

use crate::account::TokenSet;
use crate::stores::PeerSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessResult {
    pub fresher: bool,
    pub store: Option<PeerSnapshot>,
}

impl FreshnessResult {
    fn stale() -> Self {
        Self {
            fresher: false,
            store: None,
        }
    }
}

/// Known beats unknown; two unknowns are never later.
pub fn expires_later(candidate: Option<i64>, current: Option<i64>) -> bool {
    match (candidate, current) {
        (Some(candidate), Some(current)) => candidate > current,
        (Some(_), None) => true,
        _ => false,
    }
}

/// With `assume_peer_fresher_without_expiry`, a same-refresh peer whose
/// access token differs wins when neither side knows its expiry.
pub fn resolve_fresher(
    active: &TokenSet,
    peers: &[PeerSnapshot],
    assume_peer_fresher_without_expiry: bool,
) -> FreshnessResult {
    let Some(active_refresh) = active.refresh.as_deref() else {
        return FreshnessResult::stale();
    };

    let mut best: Option<&PeerSnapshot> = None;
    let mut best_expiry = active.expires_ms;
    for peer in peers {
        if peer.tokens.refresh.as_deref() != Some(active_refresh) {
            continue;
        }
        if expires_later(peer.tokens.expires_ms, best_expiry) {
            best_expiry = peer.tokens.expires_ms;
            best = Some(peer);
        }
    }
    if let Some(peer) = best {
        return FreshnessResult {
            fresher: true,
            store: Some(peer.clone()),
        };
    }

    if assume_peer_fresher_without_expiry && active.expires_ms.is_none() {
        let heuristic = peers.iter().find(|peer| {
            peer.tokens.refresh.as_deref() == Some(active_refresh)
                && peer.tokens.expires_ms.is_none()
                && peer.tokens.access.is_some()
                && peer.tokens.access != active.access
        });
        if let Some(peer) = heuristic {
            return FreshnessResult {
                fresher: true,
                store: Some(peer.clone()),
            };
        }
    }
    FreshnessResult::stale()
}

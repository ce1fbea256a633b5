use crate::session::Session;
use qmux_core::token::RESET_TOKEN_LEN;
use qmux_core::Cid;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Two-level connection-id routing table.
///
/// `primary` maps the id a session is registered under to the session;
/// `alias` maps any additional id the peer may use (the client's original
/// DCID, later-issued ids) back to the primary. Aliases are retired
/// together with their primary so a lookup can never land on a gone
/// session.
#[derive(Default)]
pub(crate) struct CidTable {
    primary: HashMap<Cid, Arc<dyn Session>>,
    alias: HashMap<Cid, Cid>,
}

impl CidTable {
    pub(crate) fn insert(&mut self, cid: Cid, session: Arc<dyn Session>) {
        self.primary.insert(cid, session);
    }

    pub(crate) fn lookup(&self, cid: &Cid) -> Option<Arc<dyn Session>> {
        if let Some(session) = self.primary.get(cid) {
            return Some(Arc::clone(session));
        }
        let primary = self.alias.get(cid)?;
        self.primary.get(primary).map(Arc::clone)
    }

    /// Register `alias` as another route to `primary`. Ignored when the
    /// primary is not present, which keeps the no-dangling-alias invariant
    /// even against misordered callers.
    pub(crate) fn associate(&mut self, alias: Cid, primary: Cid) -> bool {
        if !self.primary.contains_key(&primary) {
            return false;
        }
        self.alias.insert(alias, primary);
        true
    }

    pub(crate) fn disassociate(&mut self, alias: &Cid) {
        self.alias.remove(alias);
    }

    /// Remove a primary id and every alias pointing at it.
    pub(crate) fn remove(&mut self, cid: &Cid) -> Option<Arc<dyn Session>> {
        let session = self.primary.remove(cid)?;
        self.alias.retain(|_, primary| primary != cid);
        Some(session)
    }

    pub(crate) fn session_count(&self) -> usize {
        self.primary.len()
    }

    #[cfg(test)]
    fn alias_count(&self) -> usize {
        self.alias.len()
    }
}

/// Stateless-reset token table: trailing-sixteen-byte candidate to the
/// session that issued the token.
#[derive(Default)]
pub(crate) struct ResetTokenTable {
    tokens: HashMap<[u8; RESET_TOKEN_LEN], Arc<dyn Session>>,
}

impl ResetTokenTable {
    pub(crate) fn insert(&mut self, token: [u8; RESET_TOKEN_LEN], session: Arc<dyn Session>) {
        self.tokens.insert(token, session);
    }

    pub(crate) fn lookup(&self, token: &[u8; RESET_TOKEN_LEN]) -> Option<Arc<dyn Session>> {
        self.tokens.get(token).map(Arc::clone)
    }

    pub(crate) fn remove(&mut self, token: &[u8; RESET_TOKEN_LEN]) {
        self.tokens.remove(token);
    }

    /// Drop every token owned by `session`, by identity.
    pub(crate) fn remove_session(&mut self, session: &Arc<dyn Session>) {
        self.tokens
            .retain(|_, owner| !Arc::ptr_eq(owner, session));
    }
}

/// Per-peer counters keyed by IP address only.
///
/// Port is deliberately excluded: the caps these counters enforce defend
/// the server, and an attacker controls its own source ports. Peers behind
/// one NAT consequently share a counter.
#[derive(Default)]
pub(crate) struct PeerCounters {
    counts: HashMap<IpAddr, usize>,
}

impl PeerCounters {
    pub(crate) fn get(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).copied().unwrap_or(0)
    }

    pub(crate) fn increment(&mut self, ip: IpAddr) -> usize {
        let count = self.counts.entry(ip).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn decrement(&mut self, ip: IpAddr) {
        if let Some(count) = self.counts.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&ip);
            }
        }
    }
}

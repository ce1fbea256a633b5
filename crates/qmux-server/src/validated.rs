use lru::LruCache;
use std::net::IpAddr;
use std::num::NonZeroUsize;

/// How many recently validated source addresses are remembered.
pub const VALIDATED_ADDRESS_CAPACITY: usize = 10;

/// Bounded LRU of source IPs that recently completed retry validation.
///
/// Keyed by IP only, like the peer counters: a NAT'd pool of clients shares
/// one entry, which trades a little precision for not letting an attacker
/// grow the cache with ports.
pub(crate) struct ValidatedAddressCache {
    cache: LruCache<IpAddr, ()>,
}

impl ValidatedAddressCache {
    pub(crate) fn new() -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(VALIDATED_ADDRESS_CAPACITY).expect("nonzero capacity"),
            ),
        }
    }

    pub(crate) fn mark(&mut self, ip: IpAddr) {
        self.cache.put(ip, ());
    }

    /// Membership check that also refreshes recency.
    pub(crate) fn contains(&mut self, ip: IpAddr) -> bool {
        self.cache.get(&ip).is_some()
    }

    /// Read-only membership check for inspection paths.
    pub(crate) fn peek(&self, ip: IpAddr) -> bool {
        self.cache.peek(&ip).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from(Ipv4Addr::new(203, 0, 113, last))
    }

    #[test]
    fn marks_and_reports_membership() {
        let mut cache = ValidatedAddressCache::new();
        assert!(!cache.contains(ip(1)));
        cache.mark(ip(1));
        assert!(cache.contains(ip(1)));
        assert!(cache.peek(ip(1)));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ValidatedAddressCache::new();
        for last in 0..VALIDATED_ADDRESS_CAPACITY as u8 {
            cache.mark(ip(last));
        }
        // Touch the oldest so the second-oldest becomes the victim.
        assert!(cache.contains(ip(0)));
        cache.mark(ip(200));

        assert!(cache.contains(ip(0)));
        assert!(!cache.contains(ip(1)));
        assert!(cache.contains(ip(200)));
    }
}

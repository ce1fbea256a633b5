use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha3::{Digest, Sha3_512};
use std::sync::Mutex;
use std::time::{Duration, Instant};

static MIXER: Lazy<Mutex<Mixer>> = Lazy::new(|| {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    Mutex::new(Mixer::new(seed))
});

const RESEED_INTERVAL: Duration = Duration::from_secs(1);

struct Mixer {
    rng: ChaCha20Rng,
    last_reseed: Instant,
}

impl Mixer {
    fn new(seed: [u8; 32]) -> Self {
        Self {
            rng: ChaCha20Rng::from_seed(seed),
            last_reseed: Instant::now(),
        }
    }

    fn reseed_if_needed(&mut self) {
        if self.last_reseed.elapsed() < RESEED_INTERVAL {
            return;
        }
        // Fold fresh OS entropy and timer jitter through SHA3 so a
        // compromised pool recovers on the next interval.
        let mut os = [0u8; 64];
        OsRng.fill_bytes(&mut os);
        let jitter = self.last_reseed.elapsed().as_nanos();

        let mut hasher = Sha3_512::new();
        hasher.update(os);
        hasher.update(jitter.to_le_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[0..32]);
        self.rng = ChaCha20Rng::from_seed(seed);
        self.last_reseed = Instant::now();
    }

    fn fill(&mut self, buf: &mut [u8]) {
        self.reseed_if_needed();
        self.rng.fill_bytes(buf);
    }
}

/// Fill the provided buffer with mixed entropy.
///
/// Backs connection-id generation, stateless-reset padding, and secret
/// generation for the socket.
pub fn fill_bytes(buf: &mut [u8]) {
    let mut guard = MIXER.lock().expect("entropy mixer");
    guard.fill(buf);
}

/// Produce a fresh vector of random bytes of the requested length.
pub fn random_vec(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    fill_bytes(&mut out);
    out
}

/// Produce a fixed-size array of random bytes.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_fills_differ() {
        let a = random_vec(32);
        let b = random_vec(32);
        assert_ne!(a, b);
    }
}

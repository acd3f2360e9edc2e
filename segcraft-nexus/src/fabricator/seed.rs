//! Deterministic random streams for candidate selection
//!
//! A re-craft of the same segment must make the same choices when the library
//! has not changed, so every stream is derived from stable identifiers.

use rand::SeedableRng;
use rand_pcg::Pcg32;
use uuid::Uuid;

/// RNG for one selection track ("macro", "main") of one segment
pub fn selection_rng(chain_id: Uuid, offset: i64, track: &str) -> Pcg32 {
    let mut input = Vec::with_capacity(16 + 8 + track.len() + 2);
    input.extend_from_slice(chain_id.as_bytes());
    input.push(0);
    input.extend_from_slice(&offset.to_le_bytes());
    input.push(0);
    input.extend_from_slice(track.as_bytes());

    let hash = blake3::hash(&input);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    Pcg32::seed_from_u64(u64::from_le_bytes(bytes))
}

//! Deterministic rollout bucket assignment (spec §4.E).
//!
//! Pure and deterministic on purpose: the same `(client_unique_id,
//! rollout_percent, release_tag)` triple must land on the same side of the
//! rollout for as long as the release exists, independent of process
//! restarts or which instance answers the request.

/// The fixed 32-bit hash recurrence the specification pins down exactly.
/// This is deliberately not "improved": changing it would silently
/// reshuffle every client already inside or outside a live rollout.
fn string_hash(s: &str) -> i32 {
    let mut h: i32 = 0;
    for c in s.chars() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32);
    }
    h
}

/// Returns true iff `client_unique_id` falls inside `rollout_percent` of
/// clients for the release identified by `release_tag` (a package's label
/// or package hash).
///
/// `rollout_percent` is expected in `[1, 100]`; a percent of 100 always
/// returns true since `|h| mod 100` never reaches 100.
pub fn is_client_in_rollout(client_unique_id: &str, rollout_percent: u8, release_tag: &str) -> bool {
    let identifier = format!("{client_unique_id}-{release_tag}");
    let h = string_hash(&identifier);
    let bucket = (h as i64).unsigned_abs() % 100;
    bucket < rollout_percent as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_for_fixed_inputs() {
        let a = is_client_in_rollout("client-1", 50, "v3");
        let b = is_client_in_rollout("client-1", 50, "v3");
        assert_eq!(a, b);
    }

    #[test]
    fn full_rollout_always_admits() {
        for client in ["a", "b", "c", "d", "e", "client-12345"] {
            assert!(is_client_in_rollout(client, 100, "v1"));
        }
    }

    #[test]
    fn distribution_is_roughly_uniform() {
        let admitted = (0..10_000)
            .filter(|i| is_client_in_rollout(&format!("client-{i}"), 50, "v7"))
            .count();
        let ratio = admitted as f64 / 10_000.0;
        assert!((0.45..0.55).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn distinct_releases_partition_independently() {
        let in_v1 = is_client_in_rollout("client-42", 50, "v1");
        let in_v2 = is_client_in_rollout("client-42", 50, "v2");
        let disagreements = (0..2_000)
            .filter(|i| {
                let client = format!("client-{i}");
                is_client_in_rollout(&client, 50, "v1") != is_client_in_rollout(&client, 50, "v2")
            })
            .count();
        assert!(disagreements > 0, "different release tags should not always agree");
        let _ = (in_v1, in_v2);
    }
}

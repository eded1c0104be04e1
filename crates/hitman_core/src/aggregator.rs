//! # Hit Aggregation
//!
//! Pure functions that fold the hits on one target into a [`CombinedHit`].
//! Integer fixed-point addition is associative and commutative, so the sum
//! is bit-identical for any ordering of the same multiset of hits.

use std::collections::BTreeMap;

use crate::error::{HitError, HitResult};
use crate::hit::{CombinedHit, Hit, PlayerId};

/// Sums the bounties of `hits` for `target_player_id`.
///
/// # Errors
///
/// - `HitError::EmptyInput` if `hits` is empty. Callers check for "no hits"
///   first; an absent combined hit is never a zero-valued one.
/// - `HitError::ArithmeticOverflow` if the sum leaves the decimal(18,2) range.
pub fn combine<'a, I>(target_player_id: &str, hits: I) -> HitResult<CombinedHit>
where
    I: IntoIterator<Item = &'a Hit>,
{
    let mut iter = hits.into_iter().peekable();
    if iter.peek().is_none() {
        return Err(HitError::EmptyInput);
    }

    let mut bounty = crate::Bounty::ZERO;
    let mut hit_ids = Vec::new();
    for hit in iter {
        debug_assert_eq!(hit.target_player_id, target_player_id);
        bounty = bounty.safe_add(hit.bounty)?;
        hit_ids.push(hit.id);
    }
    hit_ids.sort_unstable();

    Ok(CombinedHit {
        target_player_id: target_player_id.to_owned(),
        bounty,
        hit_ids,
    })
}

/// Groups `hits` by target and combines each group.
///
/// # Errors
///
/// Returns `HitError::ArithmeticOverflow` if any group's sum overflows.
pub fn combine_all(hits: &[Hit]) -> HitResult<BTreeMap<PlayerId, CombinedHit>> {
    let mut groups: BTreeMap<&str, Vec<&Hit>> = BTreeMap::new();
    for hit in hits {
        groups.entry(hit.target_player_id.as_str()).or_default().push(hit);
    }

    groups
        .into_iter()
        .map(|(target, group)| {
            combine(target, group.iter().copied()).map(|combined| (target.to_owned(), combined))
        })
        .collect()
}

/// Orders combined hits for the leaderboard: highest bounty first, ties by
/// target id so the order is deterministic.
pub fn sort_for_leaderboard(hits: &mut [CombinedHit]) {
    hits.sort_by(|a, b| {
        b.bounty
            .cmp(&a.bounty)
            .then_with(|| a.target_player_id.cmp(&b.target_player_id))
    });
}

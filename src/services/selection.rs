use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::SelectionError,
    session::{ParticipantId, Peer},
};

/// Source of uniform picks, substitutable so selection can be seeded in tests.
pub trait RandomSource: Send {
    /// Uniform index in `0..len`. `len` is never zero.
    fn pick_index(&mut self, len: usize) -> usize;
}

impl<R: Rng + Send> RandomSource for R {
    fn pick_index(&mut self, len: usize) -> usize {
        self.random_range(0..len)
    }
}

/// Entropy-seeded generator used outside of tests.
pub fn os_random() -> Box<dyn RandomSource> {
    Box::new(StdRng::from_os_rng())
}

/// Deterministic generator for replays and tests.
pub fn seeded_random(seed: u64) -> Box<dyn RandomSource> {
    Box::new(StdRng::seed_from_u64(seed))
}

/// Pick the next seeker from the live roster.
///
/// With more than one peer the previous seeker is left out of the draw when
/// `avoid_last` is set; if that would leave nobody, the full roster is used.
pub fn choose_seeker(
    peers: &[Peer],
    last: Option<ParticipantId>,
    avoid_last: bool,
    rng: &mut dyn RandomSource,
) -> Result<Peer, SelectionError> {
    let live: Vec<&Peer> = peers.iter().filter(|peer| peer.id.is_valid()).collect();
    if live.is_empty() {
        return Err(SelectionError::EmptyPool);
    }

    let mut pool = live.clone();
    if let Some(last) = last.filter(|_| avoid_last && live.len() > 1) {
        pool.retain(|peer| peer.id != last);
        if pool.is_empty() {
            pool = live;
        }
    }

    let index = rng.pick_index(pool.len());
    Ok(pool[index].clone())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn roster(ids: &[i64]) -> Vec<Peer> {
        ids.iter()
            .map(|id| Peer::named(*id, format!("P{id}")))
            .collect()
    }

    #[test]
    fn never_repeats_the_last_seeker_when_others_exist() {
        let peers = roster(&[1, 2, 3]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<i64, usize> = HashMap::new();

        for _ in 0..1000 {
            let chosen = choose_seeker(&peers, Some(ParticipantId(1)), true, &mut rng).unwrap();
            *counts.entry(chosen.id.0).or_default() += 1;
        }

        assert_eq!(counts.get(&1), None);
        let b = counts[&2];
        let c = counts[&3];
        assert_eq!(b + c, 1000);
        assert!((400..=600).contains(&b), "skewed draw: {b} vs {c}");
    }

    #[test]
    fn single_peer_is_always_chosen() {
        let peers = roster(&[7]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let chosen = choose_seeker(&peers, Some(ParticipantId(7)), true, &mut rng).unwrap();
            assert_eq!(chosen.id, ParticipantId(7));
        }
    }

    #[test]
    fn unknown_last_seeker_leaves_pool_intact() {
        let peers = roster(&[1, 2]);
        let mut rng = StdRng::seed_from_u64(9);
        let mut seen = [false; 2];
        for _ in 0..200 {
            let chosen = choose_seeker(&peers, Some(ParticipantId(99)), true, &mut rng).unwrap();
            seen[(chosen.id.0 - 1) as usize] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn empty_roster_is_an_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = choose_seeker(&[], None, true, &mut rng).unwrap_err();
        assert_eq!(err, SelectionError::EmptyPool);

        let invalid = vec![Peer {
            id: ParticipantId(0),
            display_name: None,
        }];
        let err = choose_seeker(&invalid, None, true, &mut rng).unwrap_err();
        assert_eq!(err, SelectionError::EmptyPool);
    }
}

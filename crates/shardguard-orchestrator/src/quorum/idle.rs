use shardguard_common::{Error, InstanceId, ReplicaSet, Result};

use super::{filter, Options};

/// Chooses the follower with the minimum upstream idle, i.e. the one that
/// heard from the master most recently.
pub(super) fn choose_master(set: &ReplicaSet, opts: &Options) -> Result<InstanceId> {
    let followers = filter(set.alive_followers(), opts);
    if followers.is_empty() {
        return Err(Error::NoAliveFollowers);
    }

    let mut min_idle = f64::INFINITY;
    let mut min_uuid = None;
    for follower in &followers {
        if follower.idle() < min_idle {
            min_idle = follower.idle();
            min_uuid = Some(follower.uuid.clone());
        }
    }

    min_uuid.ok_or(Error::NoCandidateFound)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{follower, master, set};
    use super::*;

    #[test]
    fn test_picks_minimum_idle() {
        let rs = set(vec![
            master("m"),
            follower("f1", 0.5, 0, 0),
            follower("f2", 0.05, 0, 0),
            follower("f3", 1.2, 0, 0),
        ]);
        let chosen = choose_master(&rs, &Options::default()).unwrap();
        assert_eq!(chosen, "f2");
    }

    #[test]
    fn test_no_alive_followers() {
        let rs = set(vec![master("m")]);
        assert!(matches!(
            choose_master(&rs, &Options::default()),
            Err(Error::NoAliveFollowers)
        ));
    }

    #[test]
    fn test_followers_without_upstream_lose() {
        let mut blind = follower("f1", 0.0, 0, 0);
        blind.upstream = None;
        blind.downstream = Some(shardguard_common::Downstream {
            status: shardguard_common::DownstreamStatus::Follow,
        });
        let rs = set(vec![master("m"), blind, follower("f2", 3.0, 0, 0)]);
        let chosen = choose_master(&rs, &Options::default()).unwrap();
        assert_eq!(chosen, "f2");
    }

    #[test]
    fn test_ignores_priorities() {
        let rs = set(vec![
            master("m"),
            follower("f1", 0.5, 0, 100),
            follower("f2", 0.05, 0, 0),
        ]);
        let chosen = choose_master(&rs, &Options::default()).unwrap();
        assert_eq!(chosen, "f2");
    }

    #[test]
    fn test_excluded_candidates() {
        let rs = set(vec![
            master("m"),
            follower("f1", 0.05, 0, -1),
            follower("f2", 0.5, 0, 0),
        ]);
        let chosen = choose_master(&rs, &Options::default()).unwrap();
        assert_eq!(chosen, "f2");
    }
}

//! Successor election strategies.
//!
//! Both electors share one candidate filter and differ only in how they
//! rank the survivors: the idle elector picks the freshest follower, the
//! smart elector weighs configuration consistency, replication state and
//! operator priorities.

mod idle;
mod smart;

use shardguard_common::{Error, Instance, InstanceId, ReplicaSet, Result};

/// Election strategy name accepted by the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Smart,
}

impl Mode {
    /// Parses a configuration token. Only `idle` and `smart` exist; any
    /// other value, including the retired `delay` token, is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Mode::Idle),
            "smart" => Ok(Mode::Smart),
            other => Err(Error::ConfigInvalid(format!(
                "option 'elector' has a wrong value: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Smart => "smart",
        }
    }
}

/// Limits applied to every candidate before ranking. A zero value
/// disables the corresponding filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Largest tolerated `lsn_behind_master` of a candidate.
    pub reasonable_follower_lsn_lag: i64,

    /// Largest tolerated upstream idle of a candidate, in seconds.
    pub reasonable_follower_idle: f64,
}

/// Pluggable successor-selection strategy.
#[derive(Debug, Clone, Copy)]
pub enum Elector {
    Idle(Options),
    Smart(Options),
}

impl Elector {
    pub fn new(mode: Mode, opts: Options) -> Self {
        match mode {
            Mode::Idle => Elector::Idle(opts),
            Mode::Smart => Elector::Smart(opts),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Elector::Idle(_) => Mode::Idle,
            Elector::Smart(_) => Mode::Smart,
        }
    }

    /// Selects the new master of the set and returns its uuid.
    pub fn choose_master(&self, set: &ReplicaSet) -> Result<InstanceId> {
        match self {
            Elector::Idle(opts) => idle::choose_master(set, opts),
            Elector::Smart(opts) => smart::choose_master(set, opts),
        }
    }
}

/// Applies the election limits to the alive followers of a set.
///
/// A candidate survives iff its priority is not negative, its LSN lag is
/// within the configured bound and its upstream idle is within the
/// configured bound.
fn filter(followers: Vec<Instance>, opts: &Options) -> Vec<Instance> {
    followers
        .into_iter()
        .filter(|inst| inst.priority >= 0)
        .filter(|inst| {
            opts.reasonable_follower_lsn_lag == 0
                || inst.lsn_behind_master <= opts.reasonable_follower_lsn_lag
        })
        .filter(|inst| {
            opts.reasonable_follower_idle == 0.0 || inst.idle() <= opts.reasonable_follower_idle
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::{follower, master, set};
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("idle").unwrap(), Mode::Idle);
        assert_eq!(Mode::parse("smart").unwrap(), Mode::Smart);
        assert!(Mode::parse("delay").is_err());
        assert!(Mode::parse("").is_err());
    }

    #[test]
    fn test_filter_excludes_negative_priority() {
        let followers = vec![follower("f1", 0.1, 0, -1), follower("f2", 0.1, 0, 0)];
        let survivors = filter(followers, &Options::default());
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].uuid, "f2");
    }

    #[test]
    fn test_filter_lsn_lag_bound() {
        let opts = Options {
            reasonable_follower_lsn_lag: 100,
            ..Options::default()
        };
        let followers = vec![follower("f1", 0.1, 101, 0), follower("f2", 0.1, 100, 0)];
        let survivors = filter(followers, &opts);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].uuid, "f2");
    }

    #[test]
    fn test_filter_idle_bound() {
        let opts = Options {
            reasonable_follower_idle: 10.0,
            ..Options::default()
        };
        let followers = vec![follower("f1", 60.0, 0, 0), follower("f2", 0.1, 0, 0)];
        let survivors = filter(followers, &opts);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].uuid, "f2");
    }

    #[test]
    fn test_filter_zero_disables_bounds() {
        let followers = vec![follower("f1", 1e9, i64::MAX, 0)];
        let survivors = filter(followers, &Options::default());
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn test_electors_agree_on_empty_set() {
        let rs = set(vec![master("m")]);
        for elector in [
            Elector::new(Mode::Idle, Options::default()),
            Elector::new(Mode::Smart, Options::default()),
        ] {
            assert!(matches!(
                elector.choose_master(&rs),
                Err(Error::NoAliveFollowers)
            ));
        }
    }

    #[test]
    fn test_elector_mode() {
        assert_eq!(Elector::new(Mode::Idle, Options::default()).mode(), Mode::Idle);
        assert_eq!(
            Elector::new(Mode::Smart, Options::default()).mode(),
            Mode::Smart
        );
    }
}

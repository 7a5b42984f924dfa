use std::collections::HashMap;
use std::sync::RwLock;

use crate::analysis::ReplicationAnalysis;

/// Log level chosen by the sampler for one analysis record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLevel {
    Info,
    Debug,
}

/// Demotes repeated identical analyses to debug level so the log stream
/// only carries one info line per distinct set state.
pub struct Sampler {
    enabled: bool,
    fingerprints: RwLock<HashMap<String, String>>,
}

impl Sampler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            fingerprints: RwLock::new(HashMap::new()),
        }
    }

    pub fn sample(&self, analysis: &ReplicationAnalysis) -> SampleLevel {
        if !self.enabled {
            return SampleLevel::Info;
        }

        let fingerprint = analysis.fingerprint();
        let set_uuid = analysis.set.uuid.clone();

        {
            let fingerprints = self.fingerprints.read().unwrap();
            if fingerprints.get(&set_uuid) == Some(&fingerprint) {
                return SampleLevel::Debug;
            }
        }

        self.fingerprints
            .write()
            .unwrap()
            .insert(set_uuid, fingerprint);

        SampleLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use shardguard_common::{HealthCode, Instance, ReplicaSet, StorageInfo};

    fn analysis(valid: bool) -> ReplicationAnalysis {
        let master = Instance {
            id: 1,
            uuid: "m".into(),
            uri: "m:3301".into(),
            readonly: false,
            last_check_valid: valid,
            lsn: 0,
            lsn_behind_master: 0,
            upstream: None,
            downstream: None,
            storage_info: StorageInfo {
                status: HealthCode::Green,
                ..StorageInfo::default()
            },
            vshard_fingerprint: 0,
            priority: 0,
        };
        let set = ReplicaSet {
            uuid: "set-1".into(),
            master_uuid: "m".into(),
            master_uri: "m:3301".into(),
            instances: vec![master],
        };
        analyze(&set).unwrap()
    }

    #[test]
    fn test_repeated_analysis_is_demoted() {
        let sampler = Sampler::new(true);
        assert_eq!(sampler.sample(&analysis(true)), SampleLevel::Info);
        assert_eq!(sampler.sample(&analysis(true)), SampleLevel::Debug);
    }

    #[test]
    fn test_state_change_promotes_again() {
        let sampler = Sampler::new(true);
        assert_eq!(sampler.sample(&analysis(true)), SampleLevel::Info);
        assert_eq!(sampler.sample(&analysis(false)), SampleLevel::Info);
        assert_eq!(sampler.sample(&analysis(false)), SampleLevel::Debug);
    }

    #[test]
    fn test_disabled_sampler_passes_everything() {
        let sampler = Sampler::new(false);
        assert_eq!(sampler.sample(&analysis(true)), SampleLevel::Info);
        assert_eq!(sampler.sample(&analysis(true)), SampleLevel::Info);
    }
}

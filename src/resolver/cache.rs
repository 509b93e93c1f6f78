use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::types::*;

/// Caching for `ResourceRecord`s.
///
/// One record per (name, type) key: inserting over an existing key
/// replaces the record and refreshes its timestamp.  Real resolvers
/// keep RR sets; a single entry is enough for this server and keeps
/// the bookkeeping obvious.
///
/// The clock is always passed in, never read here, so expiry is
/// exercisable in tests without sleeping.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    entries: HashMap<(DomainName, RecordType), (ResourceRecord, Instant)>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert a record at key (name, type), timestamped `now`.
    pub fn put(&mut self, record: &ResourceRecord, now: Instant) {
        self.entries
            .insert((record.name.clone(), record.rtype()), (record.clone(), now));
    }

    /// Get the record at (name, type), unless it has expired.
    pub fn get(&self, name: &DomainName, rtype: RecordType, now: Instant) -> Option<&ResourceRecord> {
        match self.entries.get(&(name.clone(), rtype)) {
            Some((record, inserted)) if !expired(record, *inserted, now) => Some(record),
            _ => None,
        }
    }

    /// Drop all expired entries.
    pub fn sweep(&mut self, now: Instant) {
        self.entries
            .retain(|_, (record, inserted)| !expired(record, *inserted, now));
    }

    /// All unexpired records, for synthesising responses from cache.
    pub fn snapshot(&self, now: Instant) -> Vec<ResourceRecord> {
        self.entries
            .values()
            .filter(|(record, inserted)| !expired(record, *inserted, now))
            .map(|(record, _)| record.clone())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A record is expired once strictly more than its TTL has elapsed
/// since insertion.
fn expired(record: &ResourceRecord, inserted: Instant, now: Instant) -> bool {
    now.saturating_duration_since(inserted) > Duration::from_secs(record.ttl.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_record(name: &str, ttl: u32) -> ResourceRecord {
        ResourceRecord {
            name: DomainName::from_dotted_string(name).unwrap(),
            rtype_with_data: RecordTypeWithData::A {
                address: "10.0.0.1".parse().unwrap(),
            },
            rclass: RecordClass::IN,
            ttl,
        }
    }

    #[test]
    fn put_then_get() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let rr = a_record("example.com.", 300);
        cache.put(&rr, now);

        assert_eq!(Some(&rr), cache.get(&rr.name, RecordType::A, now));
        assert_eq!(None, cache.get(&rr.name, RecordType::NS, now));
    }

    #[test]
    fn get_respects_ttl() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let rr = a_record("example.com.", 300);
        cache.put(&rr, now);

        assert!(cache
            .get(&rr.name, RecordType::A, now + Duration::from_secs(300))
            .is_some());
        assert!(cache
            .get(&rr.name, RecordType::A, now + Duration::from_secs(301))
            .is_none());
    }

    #[test]
    fn put_overwrites_and_refreshes() {
        let now = Instant::now();
        let later = now + Duration::from_secs(200);
        let mut cache = Cache::new();
        let rr = a_record("example.com.", 300);

        cache.put(&rr, now);
        cache.put(&rr, later);

        // refreshed at `later`, so still alive 301s after `now`
        assert!(cache
            .get(&rr.name, RecordType::A, now + Duration::from_secs(301))
            .is_some());
        assert_eq!(1, cache.len());
    }

    #[test]
    fn sweep_drops_expired() {
        let now = Instant::now();
        let mut cache = Cache::new();
        cache.put(&a_record("short.example.com.", 1), now);
        cache.put(&a_record("long.example.com.", 600), now);

        cache.sweep(now + Duration::from_secs(2));
        assert_eq!(1, cache.len());

        let snapshot = cache.snapshot(now + Duration::from_secs(2));
        assert_eq!(1, snapshot.len());
        assert_eq!(
            DomainName::from_dotted_string("long.example.com.").unwrap(),
            snapshot[0].name
        );
    }

    #[test]
    fn zero_ttl_lives_only_within_the_same_instant() {
        let now = Instant::now();
        let mut cache = Cache::new();
        let rr = a_record("example.com.", 0);
        cache.put(&rr, now);

        assert!(cache.get(&rr.name, RecordType::A, now).is_some());
        assert!(cache
            .get(&rr.name, RecordType::A, now + Duration::from_millis(1))
            .is_none());
    }
}

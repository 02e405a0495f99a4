//! The ban store: every K-line, D-line, X-line and RESV known to this server.
//!
//! # Architecture
//!
//! - One list per [`BanKind`], keyed by [`BanId`] (insertion order)
//! - A per-kind pattern map rejects duplicates on the normalized pattern
//! - K-lines and D-lines are additionally filed in the [`AddressTable`]
//! - Persisted records are written to the [`BanJournal`] on every change;
//!   configuration-defined records live only in memory
//!
//! A record is in its kind's list if and only if it is reachable through
//! the pattern map, and, for address kinds, through the address table.

use super::address_table::{AddressEntry, AddressTable};
use super::persistence::{BanJournal, JournalEntry};
use super::xlines::{BanId, BanKind, BanMatch, BanPattern, BanRecord, Timestamp, UserContext};
use crate::error::{BanError, PermissionError, PersistError};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct BanList {
    records: BTreeMap<BanId, BanRecord>,
    /// Normalized pattern -> owner.
    patterns: HashMap<String, BanId>,
}

/// All bans known to this server.
#[derive(Debug, Default)]
pub struct BanStore {
    lists: [BanList; 5],
    kinds: HashMap<BanId, BanKind>,
    addresses: AddressTable,
    next_id: u64,
    journal: Option<BanJournal>,
}

impl BanStore {
    /// Create an empty, memory-only store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `journal`, loading every persisted ban that
    /// has not expired by `now`.
    pub fn open(journal: BanJournal, now: Timestamp) -> Result<Self, PersistError> {
        let entries = journal.load()?;
        let mut store = Self {
            journal: Some(journal),
            ..Self::default()
        };

        let mut skipped = 0usize;
        for entry in entries {
            if entry.expires_at.is_some_and(|at| at <= now) {
                skipped += 1;
                continue;
            }
            let pattern = match BanPattern::from_fields(entry.kind, &entry.fields) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!(kind = ?entry.kind, fields = ?entry.fields, error = %e, "Skipping unreadable journal entry");
                    skipped += 1;
                    continue;
                }
            };
            let record = BanRecord {
                pattern,
                reason: entry.reason,
                created_at: entry.created_at,
                expires_at: entry.expires_at,
                persisted: true,
            };
            let key = record.normalized();
            if store.lists[record.kind().index()].patterns.contains_key(&key) {
                skipped += 1;
                continue;
            }
            store.insert(record, key);
        }

        info!(loaded = store.len(), skipped, "Ban journal loaded");
        Ok(store)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Number of records of one kind.
    pub fn count(&self, kind: BanKind) -> usize {
        self.lists[kind.index()].records.len()
    }

    /// Add a record, returning its handle.
    ///
    /// Fails with [`BanError::Duplicate`] if a record of the same kind with
    /// the same normalized pattern already exists.
    pub fn add(&mut self, record: BanRecord) -> Result<BanId, BanError> {
        let key = record.normalized();
        if let Some(&existing) = self.lists[record.kind().index()].patterns.get(&key) {
            return Err(BanError::Duplicate {
                existing,
                pattern: record.describe(),
            });
        }

        let persisted = record.persisted;
        let id = self.insert(record, key);
        if persisted {
            self.persist();
        }
        Ok(id)
    }

    /// Remove a persisted record.
    ///
    /// Configuration-defined records cannot be removed this way; they go
    /// away only through [`BanStore::reload_static`].
    pub fn remove(&mut self, id: BanId) -> Result<BanRecord, BanError> {
        let record = self.get(id).ok_or_else(|| BanError::NotFound(id.to_string()))?;
        if !record.is_persisted() {
            return Err(PermissionError::NotPersisted(record.describe()).into());
        }

        let record = self
            .unlink(id)
            .ok_or_else(|| BanError::NotFound(id.to_string()))?;
        self.persist();
        Ok(record)
    }

    /// Remove the persisted record with exactly this pattern.
    pub fn remove_by_pattern(&mut self, pattern: &BanPattern) -> Result<BanRecord, BanError> {
        let id = self
            .find_exact(pattern)
            .ok_or_else(|| BanError::NotFound(pattern.describe()))?;
        self.remove(id)
    }

    pub fn get(&self, id: BanId) -> Option<&BanRecord> {
        let kind = self.kinds.get(&id)?;
        self.lists[kind.index()].records.get(&id)
    }

    /// Handle of the record with exactly this (normalized) pattern.
    pub fn find_exact(&self, pattern: &BanPattern) -> Option<BanId> {
        self.lists[pattern.kind().index()]
            .patterns
            .get(&pattern.normalized())
            .copied()
    }

    /// Most specific K-line or D-line matching the client.
    pub fn find_by_address(
        &self,
        kind: BanKind,
        user: &UserContext<'_>,
    ) -> Option<(BanId, &BanRecord)> {
        debug_assert!(kind.is_address_based());
        let entry = self.addresses.find(kind, user)?;
        self.get(entry.owner).map(|record| (entry.owner, record))
    }

    /// Most recent X-line matching a realname.
    pub fn find_xline(&self, realname: &str) -> Option<(BanId, &BanRecord)> {
        let user = UserContext {
            realname,
            ..Default::default()
        };
        self.find_newest(BanKind::Xline, |record| record.matches(&user))
    }

    /// Most recent reservation covering a nickname.
    pub fn find_resv_nick(&self, nick: &str) -> Option<(BanId, &BanRecord)> {
        self.find_resv(BanKind::ResvNick, nick)
    }

    /// Most recent reservation covering a channel name.
    pub fn find_resv_channel(&self, channel: &str) -> Option<(BanId, &BanRecord)> {
        self.find_resv(BanKind::ResvChannel, channel)
    }

    fn find_resv(&self, kind: BanKind, name: &str) -> Option<(BanId, &BanRecord)> {
        self.find_newest(kind, |record| match &record.pattern {
            BanPattern::ResvChannel(r) | BanPattern::ResvNick(r) => r.matches_name(name),
            _ => false,
        })
    }

    fn find_newest<F>(&self, kind: BanKind, mut pred: F) -> Option<(BanId, &BanRecord)>
    where
        F: FnMut(&BanRecord) -> bool,
    {
        self.lists[kind.index()]
            .records
            .iter()
            .rev()
            .find(|(_, record)| pred(record))
            .map(|(id, record)| (*id, record))
    }

    /// Remove every temporary record whose expiry time has been reached.
    pub fn sweep_expired(&mut self, now: Timestamp) -> Vec<BanRecord> {
        let expired: Vec<BanId> = self
            .lists
            .iter()
            .flat_map(|list| list.records.iter())
            .filter(|(_, record)| record.is_expired(now))
            .map(|(id, _)| *id)
            .collect();

        let removed: Vec<BanRecord> = expired.into_iter().filter_map(|id| self.unlink(id)).collect();
        for record in &removed {
            info!(
                kind = record.kind().name(),
                mask = %record.describe(),
                "Temporary ban expired"
            );
        }
        if removed.iter().any(BanRecord::is_persisted) {
            self.persist();
        }
        removed
    }

    /// Replace every configuration-defined record with `records`.
    ///
    /// Persisted records are untouched. A configured ban that duplicates an
    /// existing record is skipped. Returns the number of records loaded.
    pub fn reload_static(&mut self, records: Vec<BanRecord>) -> usize {
        let stale: Vec<BanId> = self
            .lists
            .iter()
            .flat_map(|list| list.records.iter())
            .filter(|(_, record)| !record.persisted)
            .map(|(id, _)| *id)
            .collect();
        let cleared = stale.len();
        for id in stale {
            self.unlink(id);
        }

        let mut loaded = 0;
        for mut record in records {
            record.persisted = false;
            let key = record.normalized();
            if self.lists[record.kind().index()].patterns.contains_key(&key) {
                warn!(kind = record.kind().name(), mask = %record.describe(), "Duplicate configured ban skipped");
                continue;
            }
            self.insert(record, key);
            loaded += 1;
        }

        debug!(cleared, loaded, "Configured bans reloaded");
        loaded
    }

    /// Records of one kind, oldest first.
    pub fn iter(&self, kind: BanKind) -> impl Iterator<Item = (BanId, &BanRecord)> {
        self.lists[kind.index()]
            .records
            .iter()
            .map(|(id, record)| (*id, record))
    }

    /// Enumerate the address index for one kind, keeping only permanent or
    /// only temporary records.
    pub fn address_entries(
        &self,
        kind: BanKind,
        temporary: bool,
    ) -> impl Iterator<Item = (BanId, &BanRecord)> {
        self.addresses
            .iter()
            .filter(move |entry| entry.kind == kind)
            .filter_map(move |entry| self.get(entry.owner).map(|record| (entry.owner, record)))
            .filter(move |(_, record)| record.is_temporary() == temporary)
    }

    fn insert(&mut self, record: BanRecord, key: String) -> BanId {
        self.next_id += 1;
        let id = BanId(self.next_id);
        let kind = record.kind();

        if let Some(mask) = record.pattern.host_mask() {
            let username = match &record.pattern {
                BanPattern::Kline(k) => Some(k.user.clone()),
                _ => None,
            };
            self.addresses
                .insert(AddressEntry::new(id, kind, mask, username));
        }

        let list = &mut self.lists[kind.index()];
        list.patterns.insert(key, id);
        list.records.insert(id, record);
        self.kinds.insert(id, kind);

        self.check_invariants();
        id
    }

    fn unlink(&mut self, id: BanId) -> Option<BanRecord> {
        let kind = self.kinds.remove(&id)?;
        let list = &mut self.lists[kind.index()];
        let record = list.records.remove(&id)?;
        list.patterns.remove(&record.normalized());
        if let Some(mask) = record.pattern.host_mask() {
            self.addresses.remove(id, &mask);
        }

        self.check_invariants();
        Some(record)
    }

    fn persist(&self) {
        let Some(journal) = &self.journal else {
            return;
        };
        let mut persisted: Vec<(BanId, &BanRecord)> = self
            .lists
            .iter()
            .flat_map(|list| list.records.iter())
            .filter(|(_, record)| record.persisted)
            .map(|(id, record)| (*id, record))
            .collect();
        persisted.sort_by_key(|(id, _)| *id);

        let entries = persisted
            .into_iter()
            .map(|(_, record)| JournalEntry::from(record))
            .collect();
        if let Err(e) = journal.save(entries) {
            error!(path = %journal.path().display(), error = %e, "Failed to save ban journal");
        }
    }

    fn check_invariants(&self) {
        if cfg!(debug_assertions) {
            let records: usize = self.lists.iter().map(|l| l.records.len()).sum();
            let patterns: usize = self.lists.iter().map(|l| l.patterns.len()).sum();
            let addressed: usize = BanKind::ALL
                .iter()
                .filter(|k| k.is_address_based())
                .map(|k| self.lists[k.index()].records.len())
                .sum();
            assert_eq!(records, self.kinds.len());
            assert_eq!(records, patterns);
            assert_eq!(addressed, self.addresses.len());
        }
    }
}

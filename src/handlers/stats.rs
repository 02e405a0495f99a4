//! STATS reports over the ban store.
//!
//! `STATS <letter>`: upper case lists permanent bans, lower case temporary
//! ones. `K` K-lines, `D` D-lines, `X` X-lines, `Q` reservations, `E` the
//! scheduled events. Reports never mutate the store.

use crate::event::EventQueue;
use crate::security::{BanKind, BanMatch, BanRecord, BanStore, Timestamp};

/// One line of a ban report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsEntry {
    pub letter: char,
    pub mask: String,
    pub reason: String,
    /// Seconds left on a temporary ban.
    pub expires_in: Option<i64>,
}

impl StatsEntry {
    fn new(letter: char, record: &BanRecord, now: Timestamp) -> Self {
        Self {
            letter,
            mask: record.describe(),
            reason: record.reason.clone(),
            expires_in: record.remaining(now),
        }
    }
}

/// One line of the `E` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEntry {
    pub name: &'static str,
    pub next_in: i64,
}

/// Ban report for `letter`. Unknown letters yield nothing.
pub fn report(store: &BanStore, letter: char, now: Timestamp) -> Vec<StatsEntry> {
    let temporary = letter.is_ascii_lowercase();
    let entry = |(_, record): (_, &BanRecord)| StatsEntry::new(letter, record, now);

    match letter.to_ascii_uppercase() {
        'K' => store
            .address_entries(BanKind::Kline, temporary)
            .map(entry)
            .collect(),
        'D' => store
            .address_entries(BanKind::Dline, temporary)
            .map(entry)
            .collect(),
        'X' => store
            .iter(BanKind::Xline)
            .filter(|(_, record)| record.is_temporary() == temporary)
            .map(entry)
            .collect(),
        'Q' => store
            .iter(BanKind::ResvChannel)
            .chain(store.iter(BanKind::ResvNick))
            .filter(|(_, record)| record.is_temporary() == temporary)
            .map(entry)
            .collect(),
        _ => Vec::new(),
    }
}

/// Scheduled events, soonest first.
pub fn events<C>(queue: &EventQueue<C>, now: Timestamp) -> Vec<EventEntry> {
    queue
        .pending(now)
        .into_iter()
        .map(|(name, next_in)| EventEntry { name, next_in })
        .collect()
}

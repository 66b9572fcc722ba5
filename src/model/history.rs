use chrono::{NaiveDateTime, Utc};

use super::{HistoryId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: UserId::default(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub id: HistoryId,
    pub name: String,
    pub user: Option<UserId>,
    /// Next hid handed out by [`History::reserve_hids`].
    pub hid_counter: u32,
    pub genome_build: Option<String>,
    pub tags: Vec<String>,
    pub deleted: bool,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl History {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: HistoryId::default(),
            name: name.into(),
            user: None,
            hid_counter: 1,
            genome_build: None,
            tags: Vec::new(),
            deleted: false,
            create_time: now,
            update_time: now,
        }
    }

    /// Reserve `count` contiguous hids with one counter increment; returns the
    /// first, or `None` when the block would run past the largest hid.
    pub fn reserve_hids(&mut self, count: u32) -> Option<u32> {
        let start = self.hid_counter;
        self.hid_counter = start.checked_add(count)?;
        Some(start)
    }

    /// Whether `hid` can be assigned explicitly and still leave the counter a next value.
    pub fn accepts_hid(hid: u32) -> bool {
        hid.checked_add(1).is_some()
    }

    /// Keep the counter ahead of an explicitly assigned hid.
    pub(crate) fn observe_hid(&mut self, hid: u32) {
        self.hid_counter = self.hid_counter.max(hid.saturating_add(1));
    }
}

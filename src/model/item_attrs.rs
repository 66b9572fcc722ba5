//! Per-user annotations and ratings attached to model items.

use std::collections::HashMap;

use super::{CollectionInstanceId, HistoryId, InstanceId, LibraryId, UserId};

/// An item that can carry annotations and ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemRef {
    History(HistoryId),
    Dataset(InstanceId),
    Collection(CollectionInstanceId),
    Library(LibraryId),
}

/// Narrow annotation contract used by the export and import stores.
pub trait AnnotationStore {
    fn get_annotation_string(&self, user: UserId, item: ItemRef) -> Option<String>;
    fn add_annotation(&mut self, user: UserId, item: ItemRef, text: &str);
}

#[derive(Debug, Default, Clone)]
pub struct ItemAttributes {
    annotations: HashMap<(UserId, ItemRef), String>,
    ratings: HashMap<(UserId, ItemRef), u8>,
}

/// Collapse runs of whitespace and strip control characters.
fn normalize_annotation(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl AnnotationStore for ItemAttributes {
    fn get_annotation_string(&self, user: UserId, item: ItemRef) -> Option<String> {
        self.annotations.get(&(user, item)).cloned()
    }

    fn add_annotation(&mut self, user: UserId, item: ItemRef, text: &str) {
        let annotation = normalize_annotation(text);
        if annotation.is_empty() {
            self.annotations.remove(&(user, item));
        } else {
            self.annotations.insert((user, item), annotation);
        }
    }
}

impl ItemAttributes {
    /// Store a 1-5 rating, replacing any earlier rating by the same user.
    pub fn rate_item(&mut self, user: UserId, item: ItemRef, rating: u8) -> u8 {
        let rating = rating.clamp(1, 5);
        self.ratings.insert((user, item), rating);
        rating
    }

    pub fn get_user_item_rating(&self, user: UserId, item: ItemRef) -> Option<u8> {
        self.ratings.get(&(user, item)).copied()
    }

    /// Average rating and number of ratings for an item.
    pub fn get_ave_item_rating_data(&self, item: ItemRef) -> (f64, usize) {
        let ratings: Vec<u8> = self
            .ratings
            .iter()
            .filter(|((_, rated), _)| *rated == item)
            .map(|(_, rating)| *rating)
            .collect();
        if ratings.is_empty() {
            return (0.0, 0);
        }
        let total: u32 = ratings.iter().map(|r| u32::from(*r)).sum();
        (f64::from(total) / ratings.len() as f64, ratings.len())
    }
}

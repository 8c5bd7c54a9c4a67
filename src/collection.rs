use std::collections::HashSet;
use std::hash::Hash;

use tracing::debug;

use crate::sort::SortDirection;

/// Items stored in a [`LiveCollection`] expose a stable identity key.
///
/// Selection is tracked by key, not index, so it survives inserts,
/// removals and reorders happening around the selected items.
pub trait Keyed {
    type Key: Clone + Eq + Hash;

    fn key(&self) -> Self::Key;
}

/// Device class the view runs on. Decides how sticky the explicit
/// multi-select mode is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormFactor {
    #[default]
    Desktop,
    Tablet,
    Phone,
}

impl FormFactor {
    /// Parse a form factor name from config. Unknown values fall back
    /// to desktop.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tablet" => Self::Tablet,
            "phone" | "mobile" => Self::Phone,
            _ => Self::Desktop,
        }
    }
}

/// A single change notification, raised once per mutation.
#[derive(Clone)]
pub enum CollectionChange<T: Keyed> {
    Inserted { index: usize, item: T },
    Updated { index: usize, item: T },
    Removed { index: usize, key: T::Key },
    Cleared,
    SelectionChanged,
    OrderInverted,
}

pub type Listener<T> = Box<dyn FnMut(&CollectionChange<T>) + Send>;

/// Token returned by [`LiveCollection::subscribe`], used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(usize);

/// An ordered, observable collection with identity-based selection.
///
/// Invariants held across every operation:
/// - the selection set only ever contains keys of present items;
/// - `all_selected` is recomputed from sizes, never cached;
/// - each mutation raises exactly one change notification.
///
/// All mutation is expected to happen on the single task that owns the
/// view; the collection itself is not internally synchronized.
pub struct LiveCollection<T: Keyed> {
    items: Vec<T>,
    selected: HashSet<T::Key>,
    /// Explicit multi-select mode, as opposed to the implicit mode
    /// that kicks in while more than one item is selected.
    explicit_multi: bool,
    direction: SortDirection,
    form_factor: FormFactor,
    listeners: Vec<(usize, Listener<T>)>,
    next_listener: usize,
}

impl<T: Keyed + Clone> LiveCollection<T> {
    pub fn new(form_factor: FormFactor) -> Self {
        Self {
            items: Vec::new(),
            selected: HashSet::new(),
            explicit_multi: false,
            direction: SortDirection::Ascending,
            form_factor,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    // ── access ──────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[allow(dead_code)]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Display position of the item with `key`, if present.
    pub fn position(&self, key: &T::Key) -> Option<usize> {
        self.items.iter().position(|item| item.key() == *key)
    }

    pub fn contains_key(&self, key: &T::Key) -> bool {
        self.position(key).is_some()
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    // ── observers ───────────────────────────────────────────────────

    pub fn subscribe(&mut self, listener: Listener<T>) -> Subscription {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, listener));
        Subscription(id)
    }

    #[allow(dead_code)]
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.listeners.retain(|(id, _)| *id != subscription.0);
    }

    fn notify(&mut self, change: &CollectionChange<T>) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(change);
        }
    }

    // ── mutation ────────────────────────────────────────────────────

    /// Append one item. The caller keeps keys unique; see [`append`]
    /// for the deduplicating batch variant.
    ///
    /// [`append`]: LiveCollection::append
    pub fn push(&mut self, item: T) {
        let index = self.items.len();
        self.items.push(item.clone());
        self.notify(&CollectionChange::Inserted { index, item });
    }

    /// Insert at `index`, clamped to the valid range.
    pub fn insert(&mut self, index: usize, item: T) {
        let index = index.min(self.items.len());
        self.items.insert(index, item.clone());
        self.notify(&CollectionChange::Inserted { index, item });
    }

    /// Append a fetched batch, skipping keys already present. A key can
    /// already be present when a live change event landed while the
    /// listing that contains the same node was still in flight.
    pub fn append(&mut self, batch: Vec<T>) {
        for item in batch {
            if self.contains_key(&item.key()) {
                debug!("skipping batch item already present");
                continue;
            }
            self.push(item);
        }
    }

    /// Apply `apply` to the item with `key`, raising a single Updated
    /// notification. Returns false when the key is absent.
    pub fn update<F>(&mut self, key: &T::Key, apply: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let Some(index) = self.position(key) else {
            return false;
        };
        apply(&mut self.items[index]);
        let item = self.items[index].clone();
        self.notify(&CollectionChange::Updated { index, item });
        true
    }

    /// Remove the item with `key`. A selected item leaves the selection
    /// set as part of the same mutation.
    pub fn remove_by_key(&mut self, key: &T::Key) -> Option<T> {
        let index = self.position(key)?;
        let item = self.items.remove(index);
        if self.selected.remove(key) {
            self.after_selection_shrink();
        }
        self.notify(&CollectionChange::Removed {
            index,
            key: key.clone(),
        });
        Some(item)
    }

    /// Drop every item and reset selection state. This is the
    /// navigation reset: the explicit multi-select mode ends with the
    /// folder it was started in.
    pub fn clear(&mut self) {
        self.items.clear();
        self.selected.clear();
        self.explicit_multi = false;
        self.notify(&CollectionChange::Cleared);
    }

    /// Flip the presentation order without touching the items. The next
    /// listing fetch is expected to come back in the new order.
    pub fn invert_order(&mut self) {
        self.direction = self.direction.inverted();
        self.notify(&CollectionChange::OrderInverted);
    }

    /// Align the direction flag with a newly applied sort, without a
    /// notification. Used when a navigation re-reads preferences.
    pub fn set_direction(&mut self, direction: SortDirection) {
        self.direction = direction;
    }
}

// ── selection ───────────────────────────────────────────────────────

#[allow(dead_code)]
impl<T: Keyed + Clone> LiveCollection<T> {
    /// Select or deselect the item with `key`. Keys of absent items are
    /// refused so the selection can never outgrow the items.
    pub fn set_selected(&mut self, key: &T::Key, on: bool) -> bool {
        if !self.contains_key(key) {
            return false;
        }
        let changed = if on {
            self.selected.insert(key.clone())
        } else {
            let removed = self.selected.remove(key);
            if removed {
                self.after_selection_shrink();
            }
            removed
        };
        if changed {
            self.notify(&CollectionChange::SelectionChanged);
        }
        changed
    }

    pub fn is_selected(&self, key: &T::Key) -> bool {
        self.selected.contains(key)
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Selected items in display order.
    pub fn selected_items(&self) -> impl Iterator<Item = &T> {
        self.items
            .iter()
            .filter(|item| self.selected.contains(&item.key()))
    }

    /// Select everything, or clear the selection set entirely.
    pub fn select_all(&mut self, on: bool) {
        if on {
            self.selected = self.items.iter().map(|item| item.key()).collect();
        } else {
            self.selected.clear();
            self.after_selection_shrink();
        }
        self.notify(&CollectionChange::SelectionChanged);
    }

    /// True only when every present item is selected; recomputed from
    /// sizes, and always false while the collection is empty.
    pub fn all_selected(&self) -> bool {
        !self.items.is_empty() && self.selected.len() == self.items.len()
    }

    pub fn toggle_multi_select(&mut self) {
        self.explicit_multi = !self.explicit_multi;
    }

    /// The explicit mode flag, regardless of how many items are
    /// currently selected.
    pub fn multi_select_mode(&self) -> bool {
        self.explicit_multi
    }

    /// Effective multi-select: the explicit mode, or more than one item
    /// selected.
    pub fn multi_select_active(&self) -> bool {
        self.explicit_multi || self.selected.len() > 1
    }

    /// Desktop drops out of explicit multi-select as soon as the
    /// selection shrinks back to at most one item; touch form factors
    /// stay in the mode until it is toggled off.
    fn after_selection_shrink(&mut self) {
        if self.form_factor == FormFactor::Desktop
            && self.explicit_multi
            && self.selected.len() <= 1
        {
            self.explicit_multi = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        id: u32,
        label: String,
    }

    impl Entry {
        fn new(id: u32, label: &str) -> Self {
            Self {
                id,
                label: label.to_string(),
            }
        }
    }

    impl Keyed for Entry {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    fn collection_with(ids: &[u32]) -> LiveCollection<Entry> {
        let mut c = LiveCollection::new(FormFactor::Desktop);
        for id in ids {
            c.push(Entry::new(*id, &format!("e{id}")));
        }
        c
    }

    fn change_log(c: &mut LiveCollection<Entry>) -> Arc<Mutex<Vec<&'static str>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        c.subscribe(Box::new(move |change| {
            let tag = match change {
                CollectionChange::Inserted { .. } => "inserted",
                CollectionChange::Updated { .. } => "updated",
                CollectionChange::Removed { .. } => "removed",
                CollectionChange::Cleared => "cleared",
                CollectionChange::SelectionChanged => "selection",
                CollectionChange::OrderInverted => "inverted",
            };
            sink.lock().unwrap().push(tag);
        }));
        log
    }

    #[test]
    fn selection_tracks_identity_not_position() {
        let mut c = collection_with(&[1, 2, 3]);
        c.set_selected(&2, true);
        c.remove_by_key(&1);
        assert!(c.is_selected(&2));
        assert_eq!(c.position(&2), Some(0));
    }

    #[test]
    fn removing_selected_item_shrinks_selection() {
        let mut c = collection_with(&[1, 2]);
        c.set_selected(&1, true);
        c.set_selected(&2, true);
        c.remove_by_key(&1);
        assert_eq!(c.selected_count(), 1);
        assert!(!c.is_selected(&1));
    }

    #[test]
    fn selecting_absent_key_is_refused() {
        let mut c = collection_with(&[1]);
        assert!(!c.set_selected(&99, true));
        assert_eq!(c.selected_count(), 0);
    }

    #[test]
    fn all_selected_recomputed_from_sizes() {
        let mut c = collection_with(&[1, 2]);
        assert!(!c.all_selected());
        c.select_all(true);
        assert!(c.all_selected());
        c.push(Entry::new(3, "late"));
        assert!(!c.all_selected());
    }

    #[test]
    fn empty_collection_is_never_all_selected() {
        let mut c = collection_with(&[]);
        assert!(!c.all_selected());
        c.select_all(true);
        assert!(!c.all_selected());
    }

    #[test]
    fn second_selection_activates_multi_select() {
        let mut c = collection_with(&[1, 2]);
        c.set_selected(&1, true);
        assert!(!c.multi_select_active());
        c.set_selected(&2, true);
        assert!(c.multi_select_active());
    }

    #[test]
    fn desktop_leaves_explicit_mode_when_selection_shrinks() {
        let mut c = collection_with(&[1, 2]);
        c.toggle_multi_select();
        c.set_selected(&1, true);
        c.set_selected(&2, true);
        c.set_selected(&2, false);
        assert!(!c.multi_select_mode());
        assert!(!c.multi_select_active());
    }

    #[test]
    fn tablet_keeps_explicit_mode_when_selection_shrinks() {
        let mut c = LiveCollection::new(FormFactor::Tablet);
        c.push(Entry::new(1, "a"));
        c.push(Entry::new(2, "b"));
        c.toggle_multi_select();
        c.set_selected(&1, true);
        c.set_selected(&2, true);
        c.set_selected(&2, false);
        assert!(c.multi_select_mode());
        assert!(c.multi_select_active());
    }

    #[test]
    fn select_all_off_clears_set() {
        let mut c = collection_with(&[1, 2, 3]);
        c.select_all(true);
        c.select_all(false);
        assert_eq!(c.selected_count(), 0);
        assert!(!c.all_selected());
    }

    #[test]
    fn each_mutation_raises_one_notification() {
        let mut c = collection_with(&[]);
        let log = change_log(&mut c);
        c.push(Entry::new(1, "a"));
        c.insert(0, Entry::new(2, "b"));
        c.update(&1, |e| e.label = "a2".into());
        c.set_selected(&1, true);
        c.remove_by_key(&2);
        c.invert_order();
        c.clear();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "inserted",
                "inserted",
                "updated",
                "selection",
                "removed",
                "inverted",
                "cleared"
            ]
        );
    }

    #[test]
    fn append_skips_duplicate_keys() {
        let mut c = collection_with(&[1]);
        c.append(vec![Entry::new(1, "dup"), Entry::new(2, "new")]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(0).unwrap().label, "e1");
    }

    #[test]
    fn insert_clamps_past_end() {
        let mut c = collection_with(&[1]);
        c.insert(42, Entry::new(2, "tail"));
        assert_eq!(c.position(&2), Some(1));
    }

    #[test]
    fn invert_order_flips_direction_only() {
        let mut c = collection_with(&[1, 2]);
        assert_eq!(c.direction(), SortDirection::Ascending);
        c.invert_order();
        assert_eq!(c.direction(), SortDirection::Descending);
        assert_eq!(c.position(&1), Some(0));
        assert_eq!(c.position(&2), Some(1));
    }

    #[test]
    fn clear_resets_selection_and_mode() {
        let mut c = LiveCollection::new(FormFactor::Tablet);
        c.push(Entry::new(1, "a"));
        c.toggle_multi_select();
        c.set_selected(&1, true);
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.selected_count(), 0);
        assert!(!c.multi_select_mode());
    }

    #[test]
    fn unsubscribe_detaches_listener() {
        let mut c = collection_with(&[]);
        let log = change_log(&mut c);
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        let sub = c.subscribe(Box::new(move |_| *sink.lock().unwrap() += 1));
        c.push(Entry::new(1, "a"));
        c.unsubscribe(sub);
        c.push(Entry::new(2, "b"));
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn update_reports_missing_keys() {
        let mut c = collection_with(&[1]);
        assert!(c.update(&1, |e| e.label = "new".into()));
        assert!(!c.update(&9, |e| e.label = "never".into()));
        assert_eq!(c.get(0).unwrap().label, "new");
    }

    #[test]
    fn selected_items_follow_display_order() {
        let mut c = collection_with(&[3, 1, 2]);
        c.set_selected(&2, true);
        c.set_selected(&3, true);
        let ids: Vec<u32> = c.selected_items().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }
}

use std::collections::BTreeMap;
use std::fmt;

use crate::console::sink::ViewObserver;
use crate::data::{EventLog, SubscriberCursor};

/// Opaque handle held by a plot view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewHandle(u64);

impl fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Open plot views and their cursors. Handles are never reused.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    views: BTreeMap<ViewHandle, SubscriberCursor>,
    next_id: u64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, cursor: SubscriberCursor) -> ViewHandle {
        let handle = ViewHandle(self.next_id);
        self.next_id += 1;
        self.views.insert(handle, cursor);
        handle
    }

    /// Drops the view's cursor immediately, returning it if it existed.
    pub fn unsubscribe(&mut self, handle: ViewHandle) -> Option<SubscriberCursor> {
        self.views.remove(&handle)
    }

    pub fn unsubscribe_all(&mut self) {
        self.views.clear();
    }

    pub fn get(&self, handle: ViewHandle) -> Option<&SubscriberCursor> {
        self.views.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ViewHandle) -> Option<&mut SubscriberCursor> {
        self.views.get_mut(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ViewHandle, &SubscriberCursor)> {
        self.views.iter().map(|(h, c)| (*h, c))
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Refreshes every cursor against `log`, then notifies the observer once
    /// per view. All cursors are brought up to date before the first
    /// notification. Returns the number of views refreshed.
    pub fn broadcast(&mut self, log: &EventLog, observer: Option<&mut dyn ViewObserver>) -> usize {
        for cursor in self.views.values_mut() {
            cursor.refresh(log);
        }
        if let Some(observer) = observer {
            for (handle, cursor) in &self.views {
                observer.refresh(*handle, cursor);
            }
        }
        self.views.len()
    }
}

use tracing::{debug, warn};

use crate::cache::{DeactivationListener, MemberListener};
use crate::event::MapEvent;
use crate::listener::MapListener;
use crate::state::ViewState;
use crate::view::WeakCacheView;
use crate::{Data, Key};

/// The view's subscription to the add stream: events whose new value belongs
/// in the view. Applies the event to the local store (which republishes it to
/// user listeners), or defers it into the sync log while a synchronization is
/// collecting initial content.
pub(crate) struct AddListener<K: Key, V: Data> {
    view: WeakCacheView<K, V>,
}

impl<K: Key, V: Data> AddListener<K, V> {
    pub(crate) fn new(view: WeakCacheView<K, V>) -> Self { Self { view } }

    fn apply(&self, event: &MapEvent<K, V>) {
        let Some(view) = self.view.upgrade() else { return };
        if view.defer_event(&event.key) {
            return;
        }
        let value = event.new_value.clone().map(|v| view.transform(v));
        view.0.store.put(event.key.clone(), value);
    }
}

impl<K: Key, V: Data> MapListener<K, V> for AddListener<K, V> {
    fn entry_inserted(&self, event: &MapEvent<K, V>) { self.apply(event) }

    fn entry_updated(&self, event: &MapEvent<K, V>) { self.apply(event) }

    fn entry_deleted(&self, event: &MapEvent<K, V>) {
        // the add stream's mask excludes deletions
        warn!("unexpected deletion on the add stream: {}", event);
    }
}

/// The view's subscription to the remove stream: deletions, and updates that
/// move an entry out of the view. Always registered lite; the local store
/// supplies the old value for the user-visible deletion it emits.
pub(crate) struct RemoveListener<K: Key, V: Data> {
    view: WeakCacheView<K, V>,
}

impl<K: Key, V: Data> RemoveListener<K, V> {
    pub(crate) fn new(view: WeakCacheView<K, V>) -> Self { Self { view } }

    fn apply(&self, event: &MapEvent<K, V>) {
        let Some(view) = self.view.upgrade() else { return };
        if view.defer_event(&event.key) {
            return;
        }
        view.0.store.remove(&event.key);
    }
}

impl<K: Key, V: Data> MapListener<K, V> for RemoveListener<K, V> {
    fn entry_inserted(&self, event: &MapEvent<K, V>) {
        // the remove stream's mask excludes insertions
        warn!("unexpected insertion on the remove stream: {}", event);
    }

    fn entry_updated(&self, event: &MapEvent<K, V>) { self.apply(event) }

    fn entry_deleted(&self, event: &MapEvent<K, V>) { self.apply(event) }
}

/// Invalidation channel for server-side destroy and truncate.
pub(crate) struct ViewDeactivationListener<K: Key, V: Data> {
    view: WeakCacheView<K, V>,
}

impl<K: Key, V: Data> ViewDeactivationListener<K, V> {
    pub(crate) fn new(view: WeakCacheView<K, V>) -> Self { Self { view } }
}

impl<K: Key, V: Data> DeactivationListener for ViewDeactivationListener<K, V> {
    fn cache_destroyed(&self) {
        let Some(view) = self.view.upgrade() else { return };
        debug!("backing cache of view {} destroyed", view.cache_name());
        if let Err(e) = view.0.state.transition(ViewState::Disconnected) {
            warn!("deactivation: {}", e);
        }
        // observers see one synthetic deletion per entry the view held
        view.0.store.clear();
        view.0.indexes.reset_entries();
        view.notify_lifecycle(|l| l.view_destroyed());
    }

    fn cache_truncated(&self) {
        let Some(view) = self.view.upgrade() else { return };
        debug!("backing cache of view {} truncated", view.cache_name());
        // mirrors the server: the view empties without per-entry events and
        // stays synchronized
        view.0.store.truncate();
        view.0.indexes.reset_entries();
        view.notify_lifecycle(|l| l.view_truncated());
    }
}

/// Invalidates the view when the service member serving it leaves; the next
/// access resynchronizes, reconnect interval permitting.
pub(crate) struct ViewMemberListener<K: Key, V: Data> {
    view: WeakCacheView<K, V>,
}

impl<K: Key, V: Data> ViewMemberListener<K, V> {
    pub(crate) fn new(view: WeakCacheView<K, V>) -> Self { Self { view } }
}

impl<K: Key, V: Data> MemberListener for ViewMemberListener<K, V> {
    fn member_left(&self) {
        let Some(view) = self.view.upgrade() else { return };
        debug!("service member left, disconnecting view {}", view.cache_name());
        if let Err(e) = view.0.state.transition(ViewState::Disconnected) {
            warn!("member departure: {}", e);
        }
    }
}

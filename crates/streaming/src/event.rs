//! Events that carry their own routing key.

use corelib::RoutingKey;

/// An event routed by one of its fields.
///
/// Two events with equal routing keys always reach the same member while the
/// live set is unchanged.
pub trait RoutableEvent {
    type Key: RoutingKey + ?Sized;

    fn routing_key(&self) -> &Self::Key;
}

impl RoutableEvent for str {
    type Key = str;

    fn routing_key(&self) -> &str {
        self
    }
}

impl RoutableEvent for String {
    type Key = str;

    fn routing_key(&self) -> &str {
        self.as_str()
    }
}

impl<T: RoutableEvent + ?Sized> RoutableEvent for &T {
    type Key = T::Key;

    fn routing_key(&self) -> &T::Key {
        (**self).routing_key()
    }
}

/// `(routing key, payload)` pairs route by their first element.
impl<K: RoutingKey, V> RoutableEvent for (K, V) {
    type Key = K;

    fn routing_key(&self) -> &K {
        &self.0
    }
}

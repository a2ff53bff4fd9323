//! Connectivity monitoring.

use tokio::sync::watch;

/// Kind of network link the device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// No link.
    None,
    /// Wi-Fi.
    Wifi,
    /// Cellular data.
    Cellular,
    /// Wired ethernet.
    Ethernet,
    /// Connected, link kind unknown.
    Other,
}

impl LinkType {
    /// Whether this link can carry traffic.
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Reports whether the device is online.
///
/// The client only reads the synchronous snapshot before each request.
pub trait ConnectivityMonitor: Send + Sync {
    /// Current online state.
    fn is_online(&self) -> bool;

    /// Current link type.
    fn link_type(&self) -> LinkType {
        if self.is_online() {
            LinkType::Other
        } else {
            LinkType::None
        }
    }

    /// Live signal of link changes, if the monitor provides one.
    fn subscribe(&self) -> Option<watch::Receiver<LinkType>> {
        None
    }
}

/// Monitor that always reports an unknown, online link.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityMonitor for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Monitor driven by whoever owns the platform callbacks.
#[derive(Debug)]
pub struct WatchConnectivity {
    tx: watch::Sender<LinkType>,
}

impl WatchConnectivity {
    /// Create a monitor with an initial link.
    pub fn new(initial: LinkType) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Report a link change.
    pub fn set_link(&self, link: LinkType) {
        self.tx.send_if_modified(|current| {
            if *current == link {
                false
            } else {
                tracing::debug!(from = ?*current, to = ?link, "Link changed");
                *current = link;
                true
            }
        });
    }
}

impl ConnectivityMonitor for WatchConnectivity {
    fn is_online(&self) -> bool {
        self.tx.borrow().is_online()
    }

    fn link_type(&self) -> LinkType {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> Option<watch::Receiver<LinkType>> {
        Some(self.tx.subscribe())
    }
}

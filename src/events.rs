//! Change notification: publish-after-mutation plus external-watcher
//! bridging (spec §4.7).

use tokio::sync::broadcast;

use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
}

/// Published after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: String,
    pub kind: FsEventKind,
}

/// Raw change notification from a host `DiskFileWatcher`, disk-root-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFileEvent {
    pub path: String,
    pub kind: FsEventKind,
}

/// Multi-subscriber publish/subscribe over [`FsEvent`]s. Slow subscribers
/// never block publishers: `tokio::sync::broadcast`'s bounded ring buffer
/// drops the oldest unread event for a lagging receiver, which is exactly
/// the overflow rule spec §4.7 asks for.
pub struct EventBus {
    sender: broadcast::Sender<FsEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Best-effort publish; a bus with no subscribers simply drops the event.
    pub fn publish(&self, event: FsEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event whose path is `prefix` or lies beneath it.
    pub fn subscribe(&self, prefix: impl Into<String>) -> EventSubscription {
        EventSubscription { receiver: self.sender.subscribe(), prefix: prefix.into() }
    }

    /// Translate a disk-relative watcher event into a virtual-path `FsEvent`
    /// by prefixing the owning mount's virtual path.
    pub fn translate_disk_event(mount_virtual_path: &str, event: DiskFileEvent) -> FsEvent {
        let virtual_path = if event.path == "/" {
            mount_virtual_path.to_string()
        } else {
            path::normalize(&path::join(mount_virtual_path, &event.path))
        };
        FsEvent { path: virtual_path, kind: event.kind }
    }
}

/// A single subscriber's filtered view of the bus.
pub struct EventSubscription {
    receiver: broadcast::Receiver<FsEvent>,
    prefix: String,
}

impl EventSubscription {
    /// Await the next event matching this subscription's prefix, silently
    /// skipping lag gaps and non-matching events.
    pub async fn recv(&mut self) -> Option<FsEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if event.path == self.prefix || path::is_prefixed_by(&event.path, &self.prefix) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_matching_events() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("/a");
        bus.publish(FsEvent { path: "/b/x".into(), kind: FsEventKind::Created });
        bus.publish(FsEvent { path: "/a/x".into(), kind: FsEventKind::Modified });
        let event = sub.recv().await.unwrap();
        assert_eq!(event.path, "/a/x");
        assert_eq!(event.kind, FsEventKind::Modified);
    }

    #[test]
    fn translate_prefixes_mount_path() {
        let disk_event = DiskFileEvent { path: "/sub/file.txt".into(), kind: FsEventKind::Modified };
        let fs_event = EventBus::translate_disk_event("/mnt", disk_event);
        assert_eq!(fs_event.path, "/mnt/sub/file.txt");
    }

    #[test]
    fn translate_root_disk_event() {
        let disk_event = DiskFileEvent { path: "/".into(), kind: FsEventKind::Created };
        let fs_event = EventBus::translate_disk_event("/mnt", disk_event);
        assert_eq!(fs_event.path, "/mnt");
    }
}

use tokio::sync::broadcast;

/// Fan-out of the host's free-text log stream.
///
/// The host pushes every line it logs; each interested component holds its own
/// receiver. Lagging receivers lose lines, which the gate tolerates because the
/// next level change produces a fresh line.
pub struct LogHub {
    sender: broadcast::Sender<String>,
}

impl LogHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent lines.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Send a line to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, line: impl Into<String>) {
        let _ = self.sender.send(line.into());
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_only_see_lines_after_subscribing() {
        let hub = LogHub::new(8);
        hub.publish("before anyone listens");

        let mut rx = hub.subscribe();
        hub.publish("Changed level to: Level - Forest");

        assert_eq!(rx.try_recv().unwrap(), "Changed level to: Level - Forest");
        assert!(rx.try_recv().is_err());
    }
}

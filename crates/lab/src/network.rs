use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A message queued on the [`Network`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dst: String,
    pub payload: Value,
}

/// In-memory message queue with an optional adjacency topology.
///
/// Delivery is not simulated: messages stay queued in send order until
/// drained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    topology: BTreeMap<String, Vec<String>>,
    messages: Vec<Message>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topology(topology: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            topology,
            messages: Vec::new(),
        }
    }

    pub fn send(&mut self, src: impl Into<String>, dst: impl Into<String>, payload: Value) {
        self.messages.push(Message {
            src: src.into(),
            dst: dst.into(),
            payload,
        });
    }

    /// Take every queued message, in send order.
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    pub fn pending(&self) -> usize {
        self.messages.len()
    }

    pub fn neighbors(&self, id: &str) -> &[String] {
        self.topology.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drain_returns_in_send_order_and_clears() {
        let mut net = Network::new();
        net.send("a", "b", json!(1));
        net.send("b", "a", json!({"x": 2}));
        assert_eq!(net.pending(), 2);

        let msgs = net.drain();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].src, "a");
        assert_eq!(msgs[1].payload["x"], 2);
        assert_eq!(net.pending(), 0);
        assert!(net.drain().is_empty());
    }

    #[test]
    fn neighbors_from_topology() {
        let mut topo = BTreeMap::new();
        topo.insert("a".to_string(), vec!["b".to_string(), "c".to_string()]);
        let net = Network::with_topology(topo);
        assert_eq!(net.neighbors("a"), ["b", "c"]);
        assert!(net.neighbors("z").is_empty());
    }
}

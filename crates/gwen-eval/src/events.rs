//! The node-event bus.
//!
//! A synchronous publish mechanism: `before` events are delivered in
//! listener registration order, the subject evaluates, then `after`
//! events are delivered in reverse order. Listener failures are logged
//! and swallowed so a broken reporter can never affect evaluation.

use gwen_syntax::{EvalStatus, NodeType};
use tracing::warn;
use uuid::Uuid;

/// Delivery phase of a node event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Before,
    After,
}

/// A node lifecycle event.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub phase: EventPhase,
    pub node_type: NodeType,
    /// Display name of the source node.
    pub name: String,
    pub uuid: Uuid,
    pub status: EvalStatus,
    /// Ancestor nodes from the root down to (excluding) the source.
    pub call_chain: Vec<(NodeType, String)>,
}

/// A subscriber to node events. `ignored` masks out node types the
/// listener does not care about.
pub trait NodeEventListener: Send {
    fn ignored(&self) -> &[NodeType] {
        &[]
    }

    fn on_event(&mut self, event: &NodeEvent) -> anyhow::Result<()>;
}

/// Registration-ordered listener collection plus the current ancestor
/// chain, maintained by the engine as it walks the tree.
pub struct NodeEventBus {
    listeners: Vec<Box<dyn NodeEventListener>>,
    call_chain: Vec<(NodeType, String)>,
}

impl NodeEventBus {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            call_chain: Vec::new(),
        }
    }

    pub fn register(&mut self, listener: Box<dyn NodeEventListener>) {
        self.listeners.push(listener);
    }

    /// Pushes an ancestor onto the call chain for nested publishes.
    pub fn push_node(&mut self, node_type: NodeType, name: impl Into<String>) {
        self.call_chain.push((node_type, name.into()));
    }

    pub fn pop_node(&mut self) {
        self.call_chain.pop();
    }

    /// The current ancestor chain, root first.
    pub fn call_chain(&self) -> &[(NodeType, String)] {
        &self.call_chain
    }

    pub fn publish_before(
        &mut self,
        node_type: NodeType,
        name: &str,
        uuid: Uuid,
        status: EvalStatus,
    ) {
        let event = self.event(EventPhase::Before, node_type, name, uuid, status);
        for listener in self.listeners.iter_mut() {
            deliver(listener.as_mut(), &event);
        }
    }

    pub fn publish_after(
        &mut self,
        node_type: NodeType,
        name: &str,
        uuid: Uuid,
        status: EvalStatus,
    ) {
        let event = self.event(EventPhase::After, node_type, name, uuid, status);
        for listener in self.listeners.iter_mut().rev() {
            deliver(listener.as_mut(), &event);
        }
    }

    fn event(
        &self,
        phase: EventPhase,
        node_type: NodeType,
        name: &str,
        uuid: Uuid,
        status: EvalStatus,
    ) -> NodeEvent {
        NodeEvent {
            phase,
            node_type,
            name: name.to_string(),
            uuid,
            status,
            call_chain: self.call_chain.clone(),
        }
    }
}

impl Default for NodeEventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(listener: &mut dyn NodeEventListener, event: &NodeEvent) {
    if listener.ignored().contains(&event.node_type) {
        return;
    }
    if let Err(error) = listener.on_event(event) {
        warn!(?event.node_type, %error, "node event listener failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        ignored: Vec<NodeType>,
        fail: bool,
    }

    impl NodeEventListener for Recorder {
        fn ignored(&self) -> &[NodeType] {
            &self.ignored
        }

        fn on_event(&mut self, event: &NodeEvent) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("listener broke");
            }
            let phase = match event.phase {
                EventPhase::Before => "before",
                EventPhase::After => "after",
            };
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}:{}", self.label, phase, event.name));
            Ok(())
        }
    }

    fn recorder(
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        ignored: Vec<NodeType>,
    ) -> Box<Recorder> {
        Box::new(Recorder {
            label,
            log: Arc::clone(log),
            ignored,
            fail: false,
        })
    }

    #[test]
    fn before_in_order_after_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NodeEventBus::new();
        bus.register(recorder("a", &log, vec![]));
        bus.register(recorder("b", &log, vec![]));

        let uuid = Uuid::new_v4();
        bus.publish_before(NodeType::Step, "s", uuid, EvalStatus::Pending);
        bus.publish_after(NodeType::Step, "s", uuid, EvalStatus::passed(1));

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec!["a:before:s", "b:before:s", "b:after:s", "a:after:s"]
        );
    }

    #[test]
    fn mask_filters_node_types() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NodeEventBus::new();
        bus.register(recorder("a", &log, vec![NodeType::Step]));

        bus.publish_before(NodeType::Step, "s", Uuid::new_v4(), EvalStatus::Pending);
        bus.publish_before(NodeType::Scenario, "sc", Uuid::new_v4(), EvalStatus::Pending);

        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["a:before:sc"]);
    }

    #[test]
    fn listener_failures_are_swallowed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NodeEventBus::new();
        bus.register(Box::new(Recorder {
            label: "broken",
            log: Arc::clone(&log),
            ignored: vec![],
            fail: true,
        }));
        bus.register(recorder("ok", &log, vec![]));

        bus.publish_before(NodeType::Step, "s", Uuid::new_v4(), EvalStatus::Pending);
        assert_eq!(*log.lock().unwrap(), vec!["ok:before:s"]);
    }

    #[test]
    fn call_chain_is_carried_on_events() {
        struct ChainCheck {
            seen: Arc<Mutex<Vec<Vec<String>>>>,
        }
        impl NodeEventListener for ChainCheck {
            fn on_event(&mut self, event: &NodeEvent) -> anyhow::Result<()> {
                self.seen
                    .lock()
                    .unwrap()
                    .push(event.call_chain.iter().map(|(_, n)| n.clone()).collect());
                Ok(())
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NodeEventBus::new();
        bus.register(Box::new(ChainCheck { seen: Arc::clone(&seen) }));

        bus.push_node(NodeType::Root, "spec");
        bus.push_node(NodeType::Scenario, "sc");
        bus.publish_before(NodeType::Step, "s", Uuid::new_v4(), EvalStatus::Pending);
        bus.pop_node();
        bus.pop_node();

        assert_eq!(*seen.lock().unwrap(), vec![vec!["spec", "sc"]]);
    }
}

//! Typed lifecycle events. Each event name carries a fixed payload shape and
//! handlers receive it by reference; there is no implicit call context.

use crate::state::State;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    DataRequested,
    DataRendered,
    StateChanged,
    LayoutChanged,
    ElementClicked,
    PanelRemoved,
}

#[derive(Clone, Debug)]
pub enum Event {
    /// A refresh batch started fetching; `generation` identifies the batch.
    DataRequested { generation: u64 },
    /// Every panel of the batch settled successfully.
    DataRendered { generation: u64 },
    StateChanged { state: State },
    LayoutChanged,
    ElementClicked {
        panel_id: String,
        layer_id: String,
        record: Map<String, Value>,
        tooltip: Option<String>,
    },
    PanelRemoved { panel_id: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DataRequested { .. } => EventKind::DataRequested,
            Event::DataRendered { .. } => EventKind::DataRendered,
            Event::StateChanged { .. } => EventKind::StateChanged,
            Event::LayoutChanged => EventKind::LayoutChanged,
            Event::ElementClicked { .. } => EventKind::ElementClicked,
            Event::PanelRemoved { .. } => EventKind::PanelRemoved,
        }
    }
}

type Handler = Box<dyn Fn(&Event)>;

#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl EventBus {
    pub fn on(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn emit(&self, event: &Event) {
        if let Some(handlers) = self.handlers.get(&event.kind()) {
            for handler in handlers {
                handler(event);
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, |h| h.len())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut counts: Vec<String> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| format!("{kind:?}: {}", handlers.len()))
            .collect();
        counts.sort();
        write!(f, "EventBus {{ {} }}", counts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn handlers_only_see_their_event_kind() {
        let seen = Rc::new(RefCell::new(vec![]));
        let mut bus = EventBus::default();
        let sink = seen.clone();
        bus.on(
            EventKind::DataRendered,
            Box::new(move |event| {
                if let Event::DataRendered { generation } = event {
                    sink.borrow_mut().push(*generation);
                }
            }),
        );
        bus.emit(&Event::DataRequested { generation: 1 });
        bus.emit(&Event::DataRendered { generation: 1 });
        bus.emit(&Event::DataRendered { generation: 2 });
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }
}

//! Operator events and the FIFO queue feeding the render engine
//!
//! Widgets hold an [`EventSender`]; the engine drains the queue one event at
//! a time, so each cascade finishes before the next event is looked at.

use crate::debounce::Debouncer;
use crate::types::ItemId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One operator action
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A field value was committed
    FieldChanged {
        /// Field key
        key: String,
        /// New value
        value: Value,
    },
    /// Focus left a field
    FieldBlurred {
        /// Field key
        key: String,
    },
    /// "Add row" on a repeating list
    AddItem {
        /// List key
        list: String,
    },
    /// "Remove row" on one item
    RemoveItem {
        /// List key
        list: String,
        /// Item to remove
        item: ItemId,
    },
    /// Drag of one item to a new position
    MoveItem {
        /// List key
        list: String,
        /// Item to move
        item: ItemId,
        /// Target position
        position: usize,
    },
    /// A cell of one item was committed
    ItemFieldChanged {
        /// List key
        list: String,
        /// Item
        item: ItemId,
        /// Column key
        column: String,
        /// New value
        value: Value,
    },
    /// Group header clicked
    ToggleGroup {
        /// Group id
        group: String,
    },
    /// Option filter text of a searchable field (already debounced)
    Search {
        /// Field key
        key: String,
        /// Filter text
        query: String,
    },
    /// "Reset form"
    Reset,
}

/// Sending half handed to widgets
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<UiEvent>,
    delay: Duration,
    // one debouncer per field, so typing in one field never cancels another
    debouncers: Arc<Mutex<HashMap<String, Debouncer>>>,
}

impl EventSender {
    /// Queue an event; false if the engine side is gone
    pub fn send(&self, event: UiEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    fn debouncer(&self, key: &str) -> Debouncer {
        let mut debouncers = self.debouncers.lock().unwrap_or_else(PoisonError::into_inner);
        debouncers
            .entry(key.to_string())
            .or_insert_with(|| Debouncer::new(self.delay))
            .clone()
    }

    /// Queue a search after the debounce delay unless a newer keystroke in
    /// the same field arrives
    ///
    /// The returned task yields whether the search was queued.
    pub fn search(&self, key: impl Into<String>, query: impl Into<String>) -> JoinHandle<bool> {
        let key = key.into();
        let debouncer = self.debouncer(&key);
        let ticket = debouncer.ticket();
        let tx = self.tx.clone();
        let event = UiEvent::Search {
            key,
            query: query.into(),
        };
        tokio::spawn(async move {
            if debouncer.settle(ticket).await {
                tx.send(event).is_ok()
            } else {
                false
            }
        })
    }
}

/// Receiving half owned by the engine loop
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<UiEvent>,
    sender: EventSender,
}

impl EventQueue {
    /// Create queue; searches settle after `search_delay` without a newer keystroke
    #[must_use]
    pub fn new(search_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            sender: EventSender {
                tx,
                delay: search_delay,
                debouncers: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }

    /// A sender for widgets
    #[must_use]
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Wait for the next event
    pub async fn next(&mut self) -> Option<UiEvent> {
        self.rx.recv().await
    }

    /// Every event queued right now, in arrival order
    pub fn drain(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

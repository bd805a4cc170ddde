//! The notification bus.
//!
//! Every channel is an [`Event`]: an ordered list of handlers invoked
//! synchronously on the emitting thread, in the order they were connected.
//! Emitting reports whether anyone was listening, which is how the
//! orchestrator decides whether an error was handled or must propagate.

use crate::config::TestDefinition;
use crate::error::Error;
use crate::remote::TransportDescriptor;
use crate::report::ReportDirectory;
use crate::stages::CommandOutcome;
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of emitting a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No handler is connected to the channel.
    Unattached,
    /// The notification was delivered to this many handlers.
    Delivered(usize),
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }
}

type Handler<A> = Box<dyn FnMut(&A)>;

/// A single named notification channel.
pub struct Event<A: ?Sized> {
    handlers: RefCell<Vec<Handler<A>>>,
}

impl<A: ?Sized> Event<A> {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
        }
    }

    /// Connects a handler; handlers run in connection order.
    pub fn connect<F>(&self, handler: F)
    where
        F: FnMut(&A) + 'static,
    {
        self.handlers.borrow_mut().push(Box::new(handler));
    }

    /// Invokes every connected handler with `arg`.
    ///
    /// The handler list is detached while it runs. A handler connected
    /// during the emit is kept and runs from the next emit on; a nested
    /// emit on the same channel reaches no one.
    pub fn emit(&self, arg: &A) -> Delivery {
        let mut running = std::mem::take(&mut *self.handlers.borrow_mut());
        if running.is_empty() {
            return Delivery::Unattached;
        }
        for handler in running.iter_mut() {
            handler(arg);
        }

        let delivered = running.len();
        let mut handlers = self.handlers.borrow_mut();
        let connected_meanwhile = std::mem::replace(&mut *handlers, running);
        handlers.extend(connected_meanwhile);
        Delivery::Delivered(delivered)
    }

    pub fn is_attached(&self) -> bool {
        !self.handlers.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

impl Event<()> {
    /// Emits on a channel that carries no payload.
    pub fn fire(&self) -> Delivery {
        self.emit(&())
    }
}

impl<A: ?Sized> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

/// Payload of `data_transfer`: an item is about to be copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferNotice {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Payload of `data_transfer_progress`: bytes copied so far for the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

/// The fixed set of channels a pipeline emits into.
#[derive(Debug, Default)]
pub struct Events {
    pub file_load_started: Event<Path>,
    pub file_load_completed: Event<TestDefinition>,
    pub report_dir_create_started: Event<Path>,
    pub report_dir_create_completed: Event<ReportDirectory>,
    pub protocol_read_started: Event<str>,
    pub protocol_read_completed: Event<TransportDescriptor>,

    pub deploy_read_started: Event<()>,
    pub deploy_read_completed: Event<serde_yaml::Value>,
    pub execute_read_started: Event<()>,
    pub execute_read_completed: Event<serde_yaml::Value>,
    pub collect_read_started: Event<()>,
    pub collect_read_completed: Event<serde_yaml::Value>,

    pub deploy_started: Event<()>,
    pub deploy_completed: Event<()>,
    pub execute_started: Event<()>,
    pub execute_completed: Event<()>,
    pub collect_started: Event<()>,
    pub collect_completed: Event<()>,

    pub data_transfer: Event<TransferNotice>,
    pub data_transfer_progress: Event<Progress>,

    pub cleanup_started: Event<()>,
    pub cleanup_target_path: Event<Path>,
    pub cleanup_completed: Event<()>,

    pub command_started: Event<str>,
    pub command_output_line: Event<str>,
    pub command_completed: Event<CommandOutcome>,

    pub unhandled_error: Event<Error>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_emit_without_handlers_is_unattached() {
        let event: Event<str> = Event::new();
        assert_eq!(event.emit("nobody"), Delivery::Unattached);
        assert!(!event.is_attached());
    }

    #[test]
    fn test_handlers_run_in_connection_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let event: Event<str> = Event::new();

        for tag in ["first", "second", "third"] {
            let seen = Rc::clone(&seen);
            event.connect(move |msg: &str| seen.borrow_mut().push(format!("{}:{}", tag, msg)));
        }

        assert_eq!(event.emit("x"), Delivery::Delivered(3));
        assert_eq!(
            *seen.borrow(),
            vec!["first:x", "second:x", "third:x"]
        );
    }

    #[test]
    fn test_handler_may_connect_to_its_own_channel() {
        let event: Rc<Event<()>> = Rc::new(Event::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let inner = Rc::clone(&event);
            let seen = Rc::clone(&seen);
            let mut connected = false;
            event.connect(move |_| {
                seen.borrow_mut().push("outer");
                if !connected {
                    connected = true;
                    let seen = Rc::clone(&seen);
                    inner.connect(move |_| seen.borrow_mut().push("late"));
                }
            });
        }

        assert_eq!(event.fire(), Delivery::Delivered(1));
        assert_eq!(event.len(), 2);
        assert_eq!(event.fire(), Delivery::Delivered(2));
        assert_eq!(*seen.borrow(), vec!["outer", "outer", "late"]);
    }

    #[test]
    fn test_fire_unit_event() {
        let count = Rc::new(RefCell::new(0));
        let events = Events::new();
        {
            let count = Rc::clone(&count);
            events.deploy_started.connect(move |_| *count.borrow_mut() += 1);
        }

        assert!(events.deploy_started.fire().is_delivered());
        assert!(!events.deploy_completed.fire().is_delivered());
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_payload_is_passed_by_reference() {
        let last = Rc::new(RefCell::new(None));
        let events = Events::new();
        {
            let last = Rc::clone(&last);
            events
                .data_transfer_progress
                .connect(move |p: &Progress| *last.borrow_mut() = Some(*p));
        }

        events.data_transfer_progress.emit(&Progress {
            current: 10,
            total: 20,
        });
        assert_eq!(
            *last.borrow(),
            Some(Progress {
                current: 10,
                total: 20
            })
        );
    }
}

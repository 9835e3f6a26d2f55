//! The three-method message contract a syncer talks through, plus the
//! in-process and channel-backed implementations of it

use crate::error::SyncError;
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tokio::sync::mpsc;

/// Callback invoked with each raw inbound payload
pub type MessageHandler = Box<dyn FnMut(&str) -> Result<(), SyncError>>;

/// Anything that can carry text frames to a peer.
///
/// Implementations use interior mutability so one transport can be shared by
/// a syncer and the loop that feeds it.
pub trait Transport {
    fn add_message_handler(&self, handler: MessageHandler);
    fn remove_message_handler(&self);
    fn post_message(&self, payload: String) -> Result<(), SyncError>;
}

/// Holds the registered handler for a transport.
///
/// The handler is taken out while it runs, so it may remove itself (or
/// install a replacement) without aliasing. It is only put back if nothing
/// changed the slot in the meantime.
#[derive(Default)]
pub struct HandlerSlot {
    handler: RefCell<Option<MessageHandler>>,
    generation: Cell<u64>,
}

impl HandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handler: MessageHandler) {
        *self.handler.borrow_mut() = Some(handler);
        self.bump();
    }

    pub fn clear(&self) {
        self.handler.borrow_mut().take();
        self.bump();
    }

    pub fn is_set(&self) -> bool {
        self.handler.borrow().is_some()
    }

    /// Runs the handler on `payload`. Frames arriving with no handler
    /// installed are dropped.
    pub fn dispatch(&self, payload: &str) -> Result<(), SyncError> {
        let taken = self.handler.borrow_mut().take();
        let mut handler = match taken {
            Some(handler) => handler,
            None => {
                debug!("Dropping frame with no handler installed");
                return Ok(());
            }
        };

        let generation = self.generation.get();
        let result = handler(payload);

        if self.generation.get() == generation {
            *self.handler.borrow_mut() = Some(handler);
        }
        result
    }

    fn bump(&self) {
        self.generation.set(self.generation.get() + 1);
    }
}

/// One end of an in-process link.
///
/// Posting only enqueues into the peer's mailbox; nothing is delivered until
/// the peer calls [`pump`](Self::pump). This keeps delivery on the caller's
/// schedule, the way a worker's message queue would.
pub struct LocalLink {
    inbox: Rc<RefCell<VecDeque<String>>>,
    peer_inbox: Rc<RefCell<VecDeque<String>>>,
    closed: Rc<Cell<bool>>,
    handler: HandlerSlot,
}

impl LocalLink {
    pub fn pair() -> (Rc<LocalLink>, Rc<LocalLink>) {
        let left_inbox = Rc::new(RefCell::new(VecDeque::new()));
        let right_inbox = Rc::new(RefCell::new(VecDeque::new()));
        let closed = Rc::new(Cell::new(false));

        let left = LocalLink {
            inbox: Rc::clone(&left_inbox),
            peer_inbox: Rc::clone(&right_inbox),
            closed: Rc::clone(&closed),
            handler: HandlerSlot::new(),
        };
        let right = LocalLink {
            inbox: right_inbox,
            peer_inbox: left_inbox,
            closed,
            handler: HandlerSlot::new(),
        };
        (Rc::new(left), Rc::new(right))
    }

    /// Delivers the frames that were waiting when the call started. Stops at
    /// the first handler error, leaving later frames queued.
    pub fn pump(&self) -> Result<usize, SyncError> {
        let waiting = self.inbox.borrow().len();
        let mut delivered = 0;

        for _ in 0..waiting {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(payload) = next else {
                break;
            };
            delivered += 1;
            self.handler.dispatch(&payload)?;
        }
        Ok(delivered)
    }

    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }

    /// Closes both ends. Later posts fail with `TransportClosed`.
    pub fn close(&self) {
        self.closed.set(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Transport for LocalLink {
    fn add_message_handler(&self, handler: MessageHandler) {
        self.handler.set(handler);
    }

    fn remove_message_handler(&self) {
        self.handler.clear();
    }

    fn post_message(&self, payload: String) -> Result<(), SyncError> {
        if self.closed.get() {
            return Err(SyncError::TransportClosed);
        }
        self.peer_inbox.borrow_mut().push_back(payload);
        Ok(())
    }
}

/// Upper bound on rounds in [`pump_all`] before the links are considered
/// stuck in a feedback loop
const MAX_PUMP_ROUNDS: usize = 1_000;

/// Pumps every link until all mailboxes are empty. Returns the number of
/// frames delivered.
pub fn pump_all(links: &[&LocalLink]) -> Result<usize, SyncError> {
    let mut total = 0;
    for _ in 0..MAX_PUMP_ROUNDS {
        let mut delivered = 0;
        for link in links {
            delivered += link.pump()?;
        }
        if delivered == 0 {
            return Ok(total);
        }
        total += delivered;
    }
    warn!("Links still busy after {} pump rounds", MAX_PUMP_ROUNDS);
    Ok(total)
}

/// Bridges a syncer to a task that owns the actual socket.
///
/// Outbound frames go into an unbounded channel drained by the writer task.
/// The event loop hands inbound frames to [`deliver`](Self::deliver).
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<String>,
    handler: HandlerSlot,
}

impl ChannelTransport {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound,
            handler: HandlerSlot::new(),
        }
    }

    pub fn deliver(&self, payload: &str) -> Result<(), SyncError> {
        self.handler.dispatch(payload)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl Transport for ChannelTransport {
    fn add_message_handler(&self, handler: MessageHandler) {
        self.handler.set(handler);
    }

    fn remove_message_handler(&self) {
        self.handler.clear();
    }

    fn post_message(&self, payload: String) -> Result<(), SyncError> {
        self.outbound
            .send(payload)
            .map_err(|_| SyncError::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, MessageHandler) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handler: MessageHandler = Box::new(move |payload: &str| -> Result<(), SyncError> {
            sink.borrow_mut().push(payload.to_string());
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn test_local_link_delivers_on_pump() {
        let (a, b) = LocalLink::pair();
        let (seen, handler) = recorder();
        b.add_message_handler(handler);

        a.post_message("one".into()).unwrap();
        a.post_message("two".into()).unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(b.pending(), 2);

        assert_eq!(b.pump().unwrap(), 2);
        assert_eq!(*seen.borrow(), vec!["one", "two"]);
        assert_eq!(a.pump().unwrap(), 0);
    }

    #[test]
    fn test_closed_link_rejects_posts() {
        let (a, b) = LocalLink::pair();
        b.close();
        assert!(a.is_closed());
        assert_eq!(a.post_message("x".into()), Err(SyncError::TransportClosed));
    }

    #[test]
    fn test_pump_stops_at_first_error() {
        let (a, b) = LocalLink::pair();
        b.add_message_handler(Box::new(|payload: &str| {
            if payload == "bad" {
                Err(SyncError::MalformedMessage(payload.to_string()))
            } else {
                Ok(())
            }
        }));

        a.post_message("bad".into()).unwrap();
        a.post_message("good".into()).unwrap();

        assert!(b.pump().is_err());
        assert_eq!(b.pending(), 1);
        assert_eq!(b.pump().unwrap(), 1);
    }

    #[test]
    fn test_handler_may_remove_itself() {
        let slot = Rc::new(HandlerSlot::new());
        let inner = Rc::clone(&slot);
        slot.set(Box::new(move |_: &str| -> Result<(), SyncError> {
            inner.clear();
            Ok(())
        }));

        slot.dispatch("x").unwrap();
        assert!(!slot.is_set());
        slot.dispatch("y").unwrap();
    }

    #[test]
    fn test_pump_all_follows_replies() {
        let (a, b) = LocalLink::pair();
        let (seen, handler) = recorder();
        a.add_message_handler(handler);

        let reply_to = Rc::clone(&b);
        b.add_message_handler(Box::new(move |payload: &str| {
            reply_to.post_message(format!("re: {}", payload))
        }));

        a.post_message("ping".into()).unwrap();
        assert_eq!(pump_all(&[&*a, &*b]).unwrap(), 2);
        assert_eq!(*seen.borrow(), vec!["re: ping"]);
    }

    #[tokio::test]
    async fn test_channel_transport_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport::new(tx);
        let (seen, handler) = recorder();
        transport.add_message_handler(handler);

        transport.post_message("out".into()).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("out"));

        transport.deliver("in").unwrap();
        assert_eq!(*seen.borrow(), vec!["in"]);

        drop(rx);
        assert!(transport.is_closed());
        assert_eq!(
            transport.post_message("lost".into()),
            Err(SyncError::TransportClosed)
        );
    }
}

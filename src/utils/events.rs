use tokio::sync::mpsc;

/// Fire-and-forget sender for progress events.
///
/// Emitting never blocks and never fails: a listener that went away simply
/// stops receiving.
#[derive(Debug)]
pub struct EventSink<E> {
    tx: Option<mpsc::UnboundedSender<E>>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> Default for EventSink<E> {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl<E> EventSink<E> {
    pub fn new(tx: mpsc::UnboundedSender<E>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink with nobody listening.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: E) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

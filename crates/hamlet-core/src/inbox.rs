//! Inbox — FIFO hand-off between the receive loop and the reactor.

use tokio::sync::mpsc;

use crate::types::InboundMessage;

/// Create a connected producer/consumer pair.
pub fn inbox() -> (InboxSender, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InboxSender { tx }, Inbox { rx })
}

/// Producer half, owned by the receive loop.
#[derive(Debug)]
pub struct InboxSender {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl InboxSender {
    /// Append to the tail. Never blocks; the only failure mode is a consumer
    /// that has already gone away, in which case the message is returned.
    pub fn enqueue(&self, message: InboundMessage) -> Result<(), InboundMessage> {
        self.tx.send(message).map_err(|e| e.0)
    }
}

/// Consumer half, owned by the reactor.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl Inbox {
    /// Oldest pending message, or `None` when nothing is waiting.
    pub fn try_dequeue(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    fn msg(topic: &str, content: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.into(),
            payload: Payload::new(content, "Bob"),
            sender: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_empty_inbox_yields_nothing() {
        let (_tx, mut inbox) = inbox();
        assert!(inbox.is_empty());
        assert!(inbox.try_dequeue().is_none());
    }

    #[test]
    fn test_dequeue_order_matches_enqueue_order() {
        let (tx, mut inbox) = inbox();
        let contents: Vec<String> = (0..50).map(|i| format!("m{}", i)).collect();
        for (i, c) in contents.iter().enumerate() {
            let topic = if i % 2 == 0 { "town_hall" } else { "garden" };
            tx.enqueue(msg(topic, c)).unwrap();
        }
        assert_eq!(inbox.len(), 50);

        let drained: Vec<String> = std::iter::from_fn(|| inbox.try_dequeue())
            .map(|m| m.payload.content)
            .collect();
        assert_eq!(drained, contents);
        assert!(inbox.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_producer_keeps_order() {
        let (tx, mut inbox) = inbox();
        let producer = tokio::spawn(async move {
            for i in 0..1000 {
                tx.enqueue(msg("town_hall", &i.to_string())).unwrap();
                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            match inbox.try_dequeue() {
                Some(m) => seen.push(m.payload.content.parse::<u32>().unwrap()),
                None => tokio::task::yield_now().await,
            }
        }
        producer.await.unwrap();

        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_after_consumer_dropped_returns_message() {
        let (tx, inbox) = inbox();
        drop(inbox);
        let back = tx.enqueue(msg("town_hall", "late")).unwrap_err();
        assert_eq!(back.payload.content, "late");
    }
}

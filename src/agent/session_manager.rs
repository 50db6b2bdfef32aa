//! Per-session workers.
//!
//! Every session gets its own queue and a worker task that feeds the desk in
//! arrival order. Sessions never wait on each other. A worker exits as soon
//! as its queue drains and is re-spawned by the next message.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::channels::{Channel, IncomingMessage};
use crate::conversation::{InboundEvent, IncidentDesk, Participant};

struct Worker {
    tx: mpsc::UnboundedSender<IncomingMessage>,
    handle: JoinHandle<()>,
}

type WorkerMap = Arc<Mutex<HashMap<String, Worker>>>;

/// Routes inbound messages to per-session workers.
pub struct SessionManager {
    desk: Arc<IncidentDesk>,
    channel: Arc<dyn Channel>,
    workers: WorkerMap,
}

impl SessionManager {
    pub fn new(desk: Arc<IncidentDesk>, channel: Arc<dyn Channel>) -> Self {
        Self {
            desk,
            channel,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `msg` behind earlier messages of the same session.
    pub async fn dispatch(&self, msg: IncomingMessage) {
        let key = msg.session_key();
        let mut workers = self.workers.lock().await;

        // Workers only leave the map while holding the lock, so a sender
        // found here still has a live receiver.
        let msg = match workers.get(&key) {
            Some(worker) => match worker.tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(msg).is_err() {
            tracing::error!(session = %key, "Session queue closed before worker start");
            return;
        }

        let handle = tokio::spawn(run_worker(
            key.clone(),
            rx,
            Arc::clone(&self.desk),
            Arc::clone(&self.channel),
            Arc::clone(&self.workers),
        ));
        workers.insert(key.clone(), Worker { tx, handle });
        tracing::debug!(session = %key, "Session worker spawned");
    }

    /// Number of sessions with a live worker.
    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Close every queue and wait for queued messages to be handled.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Worker)> = self.workers.lock().await.drain().collect();
        for (key, worker) in drained {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                tracing::error!(session = %key, error = %e, "Session worker panicked");
            }
        }
    }
}

async fn run_worker(
    key: String,
    mut rx: mpsc::UnboundedReceiver<IncomingMessage>,
    desk: Arc<IncidentDesk>,
    channel: Arc<dyn Channel>,
    workers: WorkerMap,
) {
    while let Some(msg) = rx.recv().await {
        handle_message(&desk, channel.as_ref(), &msg).await;

        let mut map = workers.lock().await;
        if rx.is_empty() {
            map.remove(&key);
            tracing::debug!(session = %key, "Session worker idle, exiting");
            return;
        }
    }
}

async fn handle_message(desk: &IncidentDesk, channel: &dyn Channel, msg: &IncomingMessage) {
    let who = Participant::from(msg);
    let event = InboundEvent::from_message(msg);
    tracing::debug!(
        session = %who.session_id,
        event = event.kind(),
        message_id = %msg.id,
        "Inbound event"
    );

    let turn = desk.handle(&who, event).await;
    for reply in turn.replies {
        if let Err(e) = channel.respond(msg, reply).await {
            tracing::error!(session = %who.session_id, error = %e, "Failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::attachments::AttachmentStore;
    use crate::channels::{MessageStream, OutgoingResponse};
    use crate::conversation::prompts;
    use crate::error::{AttachmentError, ChannelError, DeliveryError};
    use crate::mail::{MailDispatcher, OutgoingMail};

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, OutgoingResponse)>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "test"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn respond(
            &self,
            msg: &IncomingMessage,
            response: OutgoingResponse,
        ) -> Result<(), ChannelError> {
            self.sent.lock().await.push((msg.user_id.clone(), response));
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    struct NoStore;

    #[async_trait]
    impl AttachmentStore for NoStore {
        async fn store(
            &self,
            _file_ref: &str,
            _owner: &str,
            _at: DateTime<Utc>,
        ) -> Result<PathBuf, AttachmentError> {
            Ok(PathBuf::from("/tmp/shot.jpg"))
        }
    }

    struct NoMail;

    #[async_trait]
    impl MailDispatcher for NoMail {
        async fn send(&self, _mail: &OutgoingMail) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn manager() -> (SessionManager, Arc<RecordingChannel>, Arc<IncidentDesk>) {
        let channel = Arc::new(RecordingChannel::default());
        let desk = Arc::new(IncidentDesk::new(Arc::new(NoStore), Arc::new(NoMail)));
        let manager = SessionManager::new(Arc::clone(&desk), channel.clone());
        (manager, channel, desk)
    }

    async fn wait_idle(manager: &SessionManager) {
        for _ in 0..200 {
            if manager.active_workers().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session workers never drained");
    }

    #[tokio::test]
    async fn messages_of_one_session_handled_in_order() {
        let (manager, channel, desk) = manager();

        for text in ["/empezar", "Alta", "/saltar"] {
            manager
                .dispatch(IncomingMessage::new("test", "7", text).with_thread("7"))
                .await;
        }
        wait_idle(&manager).await;

        let sent = channel.sent.lock().await;
        let replies: Vec<_> = sent.iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(
            replies,
            vec![
                prompts::severity_prompt(),
                prompts::attachment_prompt(),
                prompts::description_prompt_no_attachment(),
            ]
        );
        assert_eq!(desk.open_conversations().await, 1);
    }

    #[tokio::test]
    async fn ignored_events_produce_no_reply() {
        let (manager, channel, _desk) = manager();

        manager
            .dispatch(IncomingMessage::new("test", "7", "hola"))
            .await;
        wait_idle(&manager).await;

        assert!(channel.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_drains_queued_messages() {
        let (manager, channel, _desk) = manager();

        manager
            .dispatch(IncomingMessage::new("test", "1", "/empezar"))
            .await;
        manager
            .dispatch(IncomingMessage::new("test", "2", "/empezar"))
            .await;
        manager.shutdown().await;

        assert_eq!(channel.sent.lock().await.len(), 2);
        assert_eq!(manager.active_workers().await, 0);
    }
}

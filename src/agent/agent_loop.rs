//! Main dispatch loop.
//!
//! Pulls messages off the channel stream and hands them to the session
//! manager until Ctrl+C or the stream ends, then drains the workers and
//! shuts the channel down.

use std::sync::Arc;

use futures::StreamExt;

use crate::agent::session_manager::SessionManager;
use crate::channels::Channel;
use crate::conversation::IncidentDesk;
use crate::error;

/// The bot: one channel, one desk, one worker per session.
pub struct Agent {
    channel: Arc<dyn Channel>,
    sessions: SessionManager,
}

impl Agent {
    pub fn new(channel: Arc<dyn Channel>, desk: Arc<IncidentDesk>) -> Self {
        let sessions = SessionManager::new(desk, Arc::clone(&channel));
        Self { channel, sessions }
    }

    /// Run until Ctrl+C or until the channel stops producing messages.
    pub async fn run(self) -> error::Result<()> {
        let mut message_stream = self.channel.start().await?;

        tracing::info!(channel = self.channel.name(), "Incident bot ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("Channel stream ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.sessions.dispatch(message).await;
        }

        self.sessions.shutdown().await;
        self.channel.shutdown().await?;
        tracing::info!("Incident bot stopped");
        Ok(())
    }
}

//! Long-lived topic consumers
//!
//! A consumer subscribes to one topic and hands every message to its
//! handler until shutdown. On shutdown it keeps draining whatever the
//! dispatcher still delivers, then exits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::data::topics::{Topic, TopicError, TopicMessage};

/// How long a draining consumer waits for one more message
const DRAIN_RECV_TIMEOUT_MS: u64 = 100;

#[async_trait]
pub trait TopicHandler<T: TopicMessage>: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn handle(&self, msg: T);
}

/// Subscribe `handler` to `topic` and run it on its own task
///
/// The subscription is taken before this returns, so messages published
/// afterwards are never missed.
pub fn spawn_consumer<T, H>(
    handler: H,
    topic: &Topic<T>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: TopicMessage,
    H: TopicHandler<T>,
{
    let mut subscriber = topic.subscribe();
    let topic_name = topic.name().to_string();

    tokio::spawn(async move {
        let name = handler.name();
        tracing::debug!(consumer = name, topic = %topic_name, "Consumer started");

        let mut shutdown_requested = false;
        loop {
            if shutdown_requested {
                match tokio::time::timeout(
                    Duration::from_millis(DRAIN_RECV_TIMEOUT_MS),
                    subscriber.recv(),
                )
                .await
                {
                    Ok(Ok(msg)) => {
                        handler.handle(msg).await;
                        continue;
                    }
                    Ok(Err(TopicError::Lagged(n))) => {
                        tracing::warn!(consumer = name, lagged = n, "Consumer lagged during drain");
                        continue;
                    }
                    _ => break,
                }
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!(consumer = name, "Consumer received shutdown, draining...");
                        shutdown_requested = true;
                    }
                }
                result = subscriber.recv() => {
                    match result {
                        Ok(msg) => handler.handle(msg).await,
                        Err(TopicError::Lagged(n)) => {
                            tracing::warn!(consumer = name, lagged = n, "Consumer lagged");
                        }
                        Err(TopicError::ChannelClosed) => break,
                        Err(e) => {
                            tracing::error!(consumer = name, error = %e, "Consumer receive error");
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!(consumer = name, "Consumer shutdown complete");
    })
}

//! Concurrent fan-out of alerts to notification channels
//!
//! Every selected channel is sent to on its own task, each under its own
//! timeout, all bounded by one overall deadline. A send that blocks its
//! thread therefore cannot stall the other channels or the timers, as long
//! as the runtime has another worker. The tasks are owned by the `dispatch`
//! future: dropping it aborts every in-flight send, and nothing outlives it.

use super::router::AlertRouter;
use super::{Channel, ChannelError, ChannelResult, NotificationEnvelope};
use crate::config::DispatchConfig;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Transport for one notification channel
///
/// Implemented by the embedding application per transport (email, chat
/// webhook, SMS, push, realtime socket).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Which channel this implementation serves
    fn channel(&self) -> Channel;

    /// Deliver one envelope
    async fn send(&self, envelope: &NotificationEnvelope) -> Result<(), ChannelError>;
}

/// Explicitly constructed set of channel implementations
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    channels: BTreeMap<Channel, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation, replacing any previous one for its channel
    pub fn register(mut self, channel: impl NotificationChannel + 'static) -> Self {
        self.channels.insert(channel.channel(), Arc::new(channel));
        self
    }

    /// Register an already shared implementation
    pub fn register_shared(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.channel(), channel);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.get(&channel)
    }

    /// Registered channels in order
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Routes an envelope and fans it out to every selected channel
pub struct ChannelDispatcher {
    router: AlertRouter,
    registry: ChannelRegistry,
    config: DispatchConfig,
}

impl ChannelDispatcher {
    pub fn new(router: AlertRouter, registry: ChannelRegistry, config: DispatchConfig) -> Self {
        Self {
            router,
            registry,
            config,
        }
    }

    pub fn router(&self) -> &AlertRouter {
        &self.router
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Send to every channel the router selects, one result per channel
    ///
    /// Never fails and never waits past the overall deadline. Results are
    /// in channel order.
    pub async fn dispatch(&self, envelope: &NotificationEnvelope) -> Vec<ChannelResult> {
        let selected = self.router.channels_for(envelope.severity);
        if selected.is_empty() {
            tracing::debug!(
                notification = %envelope.id,
                severity = %envelope.severity,
                "No channels routed for severity"
            );
            return Vec::new();
        }

        let deadline = Instant::now() + self.config.deadline();
        let shared = Arc::new(envelope.clone());
        let attempts = selected
            .into_iter()
            .map(|channel| self.attempt(channel, &shared, deadline));
        let results = join_all(attempts).await;

        let failed = results.iter().filter(|r| !r.succeeded).count();
        if failed == results.len() {
            tracing::error!(
                notification = %envelope.id,
                subject = %envelope.subject_entity_id,
                severity = %envelope.severity,
                channels = results.len(),
                "Notification failed on every channel"
            );
        } else {
            tracing::debug!(
                notification = %envelope.id,
                severity = %envelope.severity,
                channels = results.len(),
                failed,
                "Notification dispatched"
            );
        }

        results
    }

    /// Run one channel send as its own task and wait for it within its limit
    ///
    /// The task is aborted when the limit passes or when this future is
    /// dropped, so a send that never yields cannot hold up the caller.
    async fn attempt(
        &self,
        channel: Channel,
        envelope: &Arc<NotificationEnvelope>,
        deadline: Instant,
    ) -> ChannelResult {
        let Some(sender) = self.registry.get(channel) else {
            tracing::warn!(%channel, notification = %envelope.id, "Routed channel is not registered");
            return ChannelResult::skipped(channel, ChannelError::NotRegistered);
        };

        let started = Instant::now();
        let limit = deadline.min(started + self.config.channel_timeout());

        let mut task = JoinSet::new();
        let (sender, payload) = (sender.clone(), envelope.clone());
        task.spawn(async move { sender.send(&payload).await });

        let timed_out = || ChannelError::Timeout(limit.saturating_duration_since(started));
        let outcome = match tokio::time::timeout_at(limit, task.join_next()).await {
            Ok(Some(Ok(_))) if Instant::now() > limit => Err(timed_out()),
            Ok(Some(Ok(sent))) => sent,
            Ok(Some(Err(e))) if e.is_panic() => {
                Err(ChannelError::Panicked(panic_message(&*e.into_panic())))
            }
            Ok(Some(Err(e))) => Err(ChannelError::Send(format!("send task ended: {}", e))),
            Ok(None) => Err(ChannelError::Send("send task missing".to_string())),
            Err(_) => Err(timed_out()),
        };
        let latency = started.elapsed();

        match outcome {
            Ok(()) => {
                tracing::debug!(%channel, notification = %envelope.id, ?latency, "Channel send succeeded");
                ChannelResult::success(channel, latency)
            }
            Err(error) => {
                tracing::warn!(
                    %channel,
                    notification = %envelope.id,
                    error = %error,
                    ?latency,
                    "Channel send failed"
                );
                ChannelResult::failure(channel, error, latency)
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Notification system for gate events.
//!
//! Hailstorm can send real-time alerts when a gate denies a request or the
//! privacy check finds sensitive data. Notifications are **fire-and-forget**:
//! the [`Dispatcher`] spawns each send as a background task so it never holds
//! up the request path.
//!
//! The [`Notifier`] trait abstracts over backends. The only shipped backend is
//! [`telegram::TelegramNotifier`].
//!
//! # Supported Events
//!
//! - [`NotificationEvent::GateDenied`]: a check denied a prompt or response
//! - [`NotificationEvent::SensitiveData`]: the privacy check found a secret or PII
//! - [`NotificationEvent::GatewayStarted`]: the HTTP service is listening
//! - [`NotificationEvent::GatewayShutdown`]: the HTTP service is stopping

pub mod telegram;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::check::Stage;
use crate::config::NotificationConfig;
use crate::error::Result;

/// Something worth telling an operator about.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    /// A check denied the text crossing a gate.
    GateDenied {
        stage: Stage,
        agent_id: String,
        check: String,
        reason: String,
    },
    /// The privacy check found sensitive data.
    SensitiveData {
        stage: Stage,
        agent_id: String,
        pattern_name: String,
        severity: String,
    },
    GatewayStarted { listen_addr: String },
    GatewayShutdown,
}

impl NotificationEvent {
    /// Kind name used by the `events` filter in the notification config.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::GateDenied { .. } => "gate_denied",
            NotificationEvent::SensitiveData { .. } => "sensitive_data",
            NotificationEvent::GatewayStarted { .. } | NotificationEvent::GatewayShutdown => {
                "lifecycle"
            }
        }
    }
}

/// A destination for [`NotificationEvent`]s.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
    /// Backend name (e.g., `"telegram"`).
    fn name(&self) -> &str;
}

/// Markdown rendering used by chat notifiers.
pub fn format_message(event: &NotificationEvent) -> String {
    match event {
        NotificationEvent::GateDenied {
            stage,
            agent_id,
            check,
            reason,
        } => format!(
            "🚫 *Gate Denied* ({stage})\nAgent: `{agent_id}`\nCheck: {check}\nReason: {reason}"
        ),
        NotificationEvent::SensitiveData {
            stage,
            agent_id,
            pattern_name,
            severity,
        } => format!(
            "🔍 *Sensitive Data* ({severity})\nAgent: `{agent_id}` at {stage} gate\nPattern: {pattern_name}"
        ),
        NotificationEvent::GatewayStarted { listen_addr } => {
            format!("✅ *Hailstorm Started*\nListening on `{listen_addr}`")
        }
        NotificationEvent::GatewayShutdown => "⏹ *Hailstorm Shutdown*".to_string(),
    }
}

/// Fans events out to the configured notifiers in the background.
///
/// Cloning is cheap; every clone shares the same notifier list.
#[derive(Clone, Default)]
pub struct Dispatcher {
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    events: Arc<Vec<String>>,
}

impl Dispatcher {
    /// A dispatcher that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build a dispatcher from explicit notifiers and an event filter
    /// (empty = every event kind).
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, events: Vec<String>) -> Self {
        Self {
            notifiers: Arc::new(notifiers),
            events: Arc::new(events),
        }
    }

    /// Build the dispatcher described by the `notification` config section.
    pub fn from_config(config: Option<&NotificationConfig>) -> Self {
        let Some(config) = config.filter(|c| c.enabled) else {
            return Self::disabled();
        };
        match &config.telegram {
            Some(tg) => Self::new(
                vec![Arc::new(telegram::TelegramNotifier::new(
                    tg.bot_token.clone(),
                    tg.chat_id.clone(),
                ))],
                tg.events.clone(),
            ),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.notifiers.is_empty()
    }

    fn wants(&self, event: &NotificationEvent) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event.kind())
    }

    /// Send `event` to every notifier without waiting for delivery.
    ///
    /// Outside a tokio runtime the event is dropped with a debug log.
    pub fn dispatch(&self, event: NotificationEvent) {
        if !self.is_enabled() || !self.wants(&event) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, dropping {} notification", event.kind());
            return;
        };
        for notifier in self.notifiers.iter() {
            let notifier = notifier.clone();
            let event = event.clone();
            handle.spawn(async move {
                if let Err(e) = notifier.notify(&event).await {
                    warn!("{} notification failed: {}", notifier.name(), e);
                }
            });
        }
    }

    /// Send `event` and wait for every notifier to finish. Used for shutdown,
    /// where a spawned task would not outlive the runtime.
    pub async fn dispatch_and_wait(&self, event: NotificationEvent) {
        if !self.wants(&event) {
            return;
        }
        for notifier in self.notifiers.iter() {
            if let Err(e) = notifier.notify(&event).await {
                warn!("{} notification failed: {}", notifier.name(), e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every event it receives.
    pub struct MockNotifier {
        pub events: Arc<Mutex<Vec<NotificationEvent>>>,
    }

    impl MockNotifier {
        pub fn new() -> (Self, Arc<Mutex<Vec<NotificationEvent>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    events: events.clone(),
                },
                events,
            )
        }
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn notify(&self, event: &NotificationEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn denied() -> NotificationEvent {
        NotificationEvent::GateDenied {
            stage: Stage::Input,
            agent_id: "Agent1".to_string(),
            check: "misuse".to_string(),
            reason: "prompt matches misuse pattern 'developer-mode'".to_string(),
        }
    }

    #[test]
    fn format_deny_message() {
        let msg = format_message(&denied());
        assert!(msg.contains("Gate Denied"));
        assert!(msg.contains("(input)"));
        assert!(msg.contains("Agent1"));
        assert!(msg.contains("developer-mode"));
    }

    #[test]
    fn format_sensitive_data_message() {
        let event = NotificationEvent::SensitiveData {
            stage: Stage::Output,
            agent_id: "Agent2".to_string(),
            pattern_name: "openai-api-key".to_string(),
            severity: "Critical".to_string(),
        };
        let msg = format_message(&event);
        assert!(msg.contains("Sensitive Data"));
        assert!(msg.contains("Critical"));
        assert!(msg.contains("output gate"));
        assert!(msg.contains("openai-api-key"));
    }

    #[test]
    fn format_start_message() {
        let event = NotificationEvent::GatewayStarted {
            listen_addr: "127.0.0.1:18090".to_string(),
        };
        let msg = format_message(&event);
        assert!(msg.contains("Started"));
        assert!(msg.contains("127.0.0.1:18090"));
    }

    #[test]
    fn event_kinds() {
        assert_eq!(denied().kind(), "gate_denied");
        assert_eq!(NotificationEvent::GatewayShutdown.kind(), "lifecycle");
    }

    #[tokio::test]
    async fn dispatch_reaches_notifier() {
        let (mock, events) = MockNotifier::new();
        let dispatcher = Dispatcher::new(vec![Arc::new(mock)], vec![]);
        dispatcher.dispatch(denied());

        for _ in 0..50 {
            if !events.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn event_filter_drops_unwanted_kinds() {
        let (mock, events) = MockNotifier::new();
        let dispatcher = Dispatcher::new(vec![Arc::new(mock)], vec!["lifecycle".to_string()]);
        dispatcher.dispatch_and_wait(denied()).await;
        dispatcher
            .dispatch_and_wait(NotificationEvent::GatewayShutdown)
            .await;

        let collected = events.lock().unwrap();
        assert_eq!(collected.len(), 1);
        assert!(matches!(collected[0], NotificationEvent::GatewayShutdown));
    }

    #[test]
    fn disabled_config_builds_empty_dispatcher() {
        assert!(!Dispatcher::from_config(None).is_enabled());
        let config = NotificationConfig {
            enabled: false,
            telegram: None,
        };
        assert!(!Dispatcher::from_config(Some(&config)).is_enabled());
    }

    #[test]
    fn dispatch_without_runtime_is_a_no_op() {
        let (mock, events) = MockNotifier::new();
        let dispatcher = Dispatcher::new(vec![Arc::new(mock)], vec![]);
        dispatcher.dispatch(denied());
        assert!(events.lock().unwrap().is_empty());
    }
}

use crate::error::StoreFault;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies the data provider an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Uuid,
    pub backend: &'static str,
}

impl fmt::Display for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} data provider {}", self.backend, self.id)
    }
}

/// Notifications a data provider sends to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The provider connected and is ready for use.
    Init(ProviderInfo),
    /// The provider closed its connection.
    Destroy(ProviderInfo),
    /// All data of a guild was cleared, or of the global scope when `None`.
    Clear(Option<String>),
    /// The store connection raised a fault outside of any operation.
    Error(StoreFault),
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::Init(_) => "dataProviderInit",
            ProviderEvent::Destroy(_) => "dataProviderDestroy",
            ProviderEvent::Clear(_) => "dataProviderClear",
            ProviderEvent::Error(_) => "error",
        }
    }
}

/// The host's event system, as seen by a data provider.
pub trait ClientEvents: Send + Sync {
    fn emit(&self, event: ProviderEvent);
}

impl<F> ClientEvents for F
where
    F: Fn(ProviderEvent) + Send + Sync,
{
    fn emit(&self, event: ProviderEvent) {
        self(event)
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl ClientEvents for LogEvents {
    fn emit(&self, event: ProviderEvent) {
        match &event {
            ProviderEvent::Init(info) => log::info!("{} initialized", info),
            ProviderEvent::Destroy(info) => log::info!("{} destroyed", info),
            ProviderEvent::Clear(Some(guild)) => log::info!("Cleared data for guild {}", guild),
            ProviderEvent::Clear(None) => log::info!("Cleared global data"),
            ProviderEvent::Error(fault) => log::error!("{}", fault),
        }
    }
}

/// Forwards events into a channel for the host to dispatch.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    sender: mpsc::UnboundedSender<ProviderEvent>,
}

impl ChannelEvents {
    pub fn new(sender: mpsc::UnboundedSender<ProviderEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProviderEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl ClientEvents for ChannelEvents {
    fn emit(&self, event: ProviderEvent) {
        if let Err(e) = self.sender.send(event) {
            log::warn!("Dropped {} event, receiver is gone", e.0.name());
        }
    }
}

// simbridge-core: connection lifecycle for the trading-simulator
// gateway. Owns the unified connection state, the recovery engine
// (backoff + circuit breaker), command-channel heartbeats, and the
// push-data cache, behind a single Gateway facade.

mod channel;

pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod recovery;
pub mod state;

pub use config::{Credentials, GatewayConfig};
pub use error::CoreError;
pub use event::GatewayEvent;
pub use gateway::{DisconnectReason, Gateway};
pub use recovery::{RecoveryOptions, ResilienceMode};
pub use state::{ChannelId, ChannelState, ChannelStatus, ConnectionSnapshot, Quality};

// Wire-facing types callers need to drive the facade.
pub use simbridge_api::TlsMode;
pub use simbridge_api::rest::models::{
    OrderAck, OrderSide, OrderStatus, OrderTicket, OrderType, SimulatorOptions, SimulatorRun,
};
pub use simbridge_api::wire::{ChannelFrame, ChannelMessage};

//! # beacon-core
//!
//! Channel routing and presence for the Beacon realtime bridge.
//!
//! This crate decides *which* bus keys a connection uses. It never touches
//! sockets or the bus wire protocol:
//!
//! - **Keys** - deterministic channel and presence key derivation
//! - **Audience** - the eight publish/subscribe flags a connection may request
//! - **Resolver** - audience + own identity into publish/subscribe key sets
//! - **Presence** - online users per facility, kept in the shared store
//! - **Session** - one multiplexed subscription per connection
//! - **Publisher** - fan a payload out to resolved keys
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Connection │────▶│  Resolver   │────▶│   Session    │◀──── bus
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Presence   │     │  Publisher  │────▶ bus
//! └─────────────┘     └─────────────┘
//! ```

pub mod audience;
pub mod identity;
pub mod keys;
pub mod presence;
pub mod publisher;
pub mod resolver;
pub mod session;

pub use audience::{AudienceFlag, AudienceSpec, Direction, UnknownFlag};
pub use identity::Identity;
pub use keys::{
    channel_key, parse_channel_key, presence_key, KeyError, ParsedKey, Scope,
};
pub use presence::PresenceTracker;
pub use publisher::Publisher;
pub use resolver::{ChannelResolver, ResolvedChannels, Target};
pub use session::{Readiness, SessionCloser, SessionError, SubscriptionSession};

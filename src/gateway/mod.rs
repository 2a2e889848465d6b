//! Axum routes that drive both DingTalk login flows.
//!
//! # Flows
//!
//! - **One-click**: the user's browser hits `{base}/login`, goes through
//!   DingTalk and lands on `{base}/callback` with `state = "J|"`. The gateway
//!   resolves the ZenTao account, relays a ZenTao session into the browser
//!   and redirects to the requested page.
//! - **Scan-to-login**: a desktop page asks `{base}/newticket` for a ticket
//!   and shows its `auth_url` as a QR code. The phone that scans it completes
//!   the callback with `state = "Q|<ticket>"`, which fulfils the ticket. The
//!   desktop polls `{base}/status` and then follows `{base}/complete`.
//!
//! ```rust,ignore
//! use zentao_sso::gateway::{GatewaySettings, GatewayState, gateway_routes};
//!
//! let state = GatewayState::new(settings, provider, resolver, target, tickets);
//! let app = gateway_routes(state);
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

mod config;
mod error;
mod extractor;
mod pages;
mod routes;
mod state;
mod types;

pub use config::GatewaySettings;
pub use error::GatewayError;
pub use routes::gateway_routes;
pub use state::GatewayState;
pub use types::FlowState;

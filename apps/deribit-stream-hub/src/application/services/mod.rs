//! Application Services
//!
//! - `MarketHub`: validates client requests and keeps the feed subscribed to
//!   exactly the live channel set
//! - `ClientSession`: per-connection wrapper with guaranteed cleanup
//! - `Dispatcher`: fans feed frames out to subscribers

mod dispatcher;
mod hub;
mod session;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use hub::MarketHub;
pub use session::ClientSession;

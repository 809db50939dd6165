pub mod events;
pub mod rate_limiter;
pub mod rest;
pub mod symbols;
pub mod ws;

pub use events::{decode_message, PushEvent};
pub use rate_limiter::{CallError, RateLimitError, RateLimiter, RequestOptions};
pub use rest::{AggTradesQuery, ExchangeError, RestClient, RestConfig, MAX_AGG_TRADE_LIMIT};
pub use symbols::{ExchangeInfo, ExchangeSymbol};
pub use ws::{Channel, PushClient, PushClientConfig, Subscription};

mod budget;
mod executor;
mod http_transport;

pub use budget::{parenthesized_numbers, BudgetPolicy};
pub use executor::{ByteStream, RequestExecutor};
pub use http_transport::HttpTransport;

pub(crate) use executor::upstream_error;

pub mod parser;
pub mod retry;

pub use parser::{parse_feedback, ParseResult};
pub use retry::{retry, RetryOptions};

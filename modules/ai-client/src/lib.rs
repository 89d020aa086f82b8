//! Provider-agnostic LLM client.
//!
//! Two providers (Claude, OpenAI), one shape: send a system + user prompt and
//! get back a value deserialized from the provider's structured-output channel.
//! Every failure is an [`AiError`] that knows whether retrying could help.

pub mod claude;
pub mod error;
pub mod openai;
pub mod schema;
pub mod util;

pub use claude::Claude;
pub use error::{AiError, Result};
pub use openai::OpenAi;
pub use schema::StructuredOutput;
pub use util::{strip_code_blocks, truncate_to_char_boundary};

pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiClient;
pub use provider::ChatProvider;
pub use types::{ChatMessage, ChatRequest};

pub mod core;
pub mod document;
pub mod llm;
pub mod pipeline;
pub mod rag;
pub mod server;
pub mod state;

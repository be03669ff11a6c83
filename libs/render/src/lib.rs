//! Template rendering for notifications and item filters.
//!
//! The watcher only depends on the [`Renderer`] contract: a template string
//! plus a JSON data value in, text or an error out. [`TemplateEngine`] is the
//! default implementation, a small pipeline language:
//!
//! ```text
//! {{ len .current }} -> {{ len .added }}
//! {{ .attributes.label | lower | bold }}
//! {{ round (mul .attributes.price 0.01) 2 }}
//! ```
//!
//! On top of the renderer this crate provides item filtering
//! ([`filter_items`]) and message composition for update frames
//! ([`compose_messages`]).

mod compose;
mod engine;
mod error;
mod filter;
mod functions;

pub use compose::{
    compose_messages, compose_test_messages, ComposeError, ComposedMessage, MessageOptions,
    MESSAGE_CHUNK_LIMIT,
};
pub use engine::TemplateEngine;
pub use error::RenderError;
pub use filter::{filter_items, parse_bool};

/// Template expansion contract.
pub trait Renderer: Send + Sync {
    /// Expand `template` against `data`.
    fn render(&self, template: &str, data: &serde_json::Value) -> Result<String, RenderError>;
}

//! Schema-driven extraction of typed values from XML-like LLM output.
//!
//! Models are asked (via [`generate_prompt_template`]) to answer in a tag
//! format described by a [`Descriptor`] tree, and [`parse`] turns whatever
//! text has arrived so far — truncated mid-tag, missing closers, stray
//! angle brackets and all — back into a typed value. Partial mode never
//! fails on incomplete data; Final mode validates coercions, required
//! fields and union resolution.
//!
//! ```
//! use llmxml::{parse_with, render_template, Descriptor, FieldDef, Mode, ScalarType};
//!
//! let movie = Descriptor::object(
//!     "movie",
//!     "Movie",
//!     "",
//!     vec![
//!         FieldDef::required(Descriptor::scalar("title", ScalarType::String, "The title")),
//!         FieldDef::required(Descriptor::scalar("director", ScalarType::String, "The director")),
//!     ],
//! );
//! let schema = Descriptor::object(
//!     "response",
//!     "Response",
//!     "",
//!     vec![FieldDef::required(Descriptor::list("movies", "Matching movies", movie))],
//! );
//!
//! // a stream cut off mid-word still yields everything seen so far
//! let text = "<response><movies><movie><title>The Matrix</title><director>The Wach";
//! let parsed = parse_with(&schema, text, Mode::Partial).unwrap();
//! let movies = parsed.root().unwrap().get("movies").as_list().unwrap();
//! let first = movies[0].as_object().unwrap();
//! assert_eq!(first.get("title").as_str(), Some("The Matrix"));
//! assert_eq!(first.get("director").as_str(), Some("The Wach"));
//! assert_eq!(parsed.open_path.as_deref(), Some("movies[0].director"));
//!
//! // the same tree drives the instructions shown to the model
//! let template = render_template(&schema, false);
//! assert!(template.contains("[type: list]"));
//! ```

pub mod error;
mod parser;
mod prompt;
pub mod schema;
pub mod value;
pub mod xml_tok;

pub use error::{DescriptorError, ParseError};
pub use prompt::render_template;
pub use schema::{
    descriptor_of, Descriptor, DescriptorKind, FieldDef, ObjectSchema, ScalarType, Schema,
};
pub use value::{FieldState, ObjectValue, Parsed, UnionValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Best-effort parse of possibly-incomplete input; never fails on
    /// unset, invalid or unresolved positions.
    Partial,
    /// The text is complete: unmet required fields, unresolved unions and
    /// coercion failures are errors.
    Final,
}

/// Parse `text` against the cached descriptor tree of `T`.
pub fn parse<T: Schema>(text: &str, mode: Mode) -> Result<Parsed, ParseError> {
    let desc = descriptor_of::<T>()?;
    parser::run(&desc, text, mode)
}

/// Parse against an explicit descriptor tree (validated first).
pub fn parse_with(descriptor: &Descriptor, text: &str, mode: Mode) -> Result<Parsed, ParseError> {
    descriptor.validate()?;
    parser::run(descriptor, text, mode)
}

/// Render the prompt template for `T`'s schema.
pub fn generate_prompt_template<T: Schema>(
    include_instructions: bool,
) -> Result<String, DescriptorError> {
    let desc = descriptor_of::<T>()?;
    Ok(prompt::render_template(&desc, include_instructions))
}

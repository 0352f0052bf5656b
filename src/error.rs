use thiserror::Error;

/// A malformed descriptor tree supplied by the schema side. Always fatal:
/// it signals a contract violation upstream, not bad input text, so it is
/// surfaced immediately in both parse modes and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("invalid tag name {name:?}")]
    InvalidTagName { name: String },

    #[error("duplicate tag <{tag}> in {context}")]
    DuplicateTag { context: String, tag: String },

    #[error("union <{name}> has no alternatives")]
    EmptyUnion { name: String },

    #[error("descriptor tree under <{name}> exceeds the maximum nesting depth")]
    TooDeep { name: String },

    #[error("root descriptor <{name}> must describe an object")]
    RootNotObject { name: String },
}

/// Errors raised by Final-mode parsing. Partial mode never produces the
/// first three kinds; it encodes the same conditions as `Unset`/`Invalid`
/// field states instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("cannot coerce {raw:?} in <{field}>: {reason}")]
    TypeCoercion {
        field: String,
        raw: String,
        reason: String,
    },

    #[error("missing required field <{field}> in <{parent}>")]
    MissingRequiredField { parent: String, field: String },

    #[error("union <{field}> was not resolved to any of: {alternatives}")]
    UnresolvedUnion {
        field: String,
        alternatives: String,
    },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

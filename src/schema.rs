//! Descriptor trees: the immutable, type-erased description of a target
//! schema that drives both parsing and prompt generation.
//!
//! Construction is decoupled from the core: applications implement
//! [`Schema`] for their target types using the explicit constructors here,
//! and [`descriptor_of`] caches the validated tree per type for the life of
//! the process. The parser never introspects types.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::error::DescriptorError;
use crate::xml_tok::TAG_NAME_RE;

/// Degenerate trees (or schemas accidentally built with unbounded nesting)
/// are rejected rather than overflowing the parse stack.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarType {
    String,
    Int,
    Float,
    Bool,
    /// Coerces by literal match against the variant strings.
    Enum(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Tag name this position binds to.
    pub name: String,
    /// Free text, used only for prompt generation.
    pub description: String,
    pub kind: DescriptorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorKind {
    Scalar(ScalarType),
    Object(ObjectSchema),
    List(Box<Descriptor>),
    /// Ordered alternatives; tag names are unique within one union and the
    /// first matching (first-declared) alternative wins.
    Union(Vec<Descriptor>),
    Optional(Box<Descriptor>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    /// Display name of the record type (e.g. `CreateAction`), used by the
    /// prompt generator; the binding tag lives on the `Descriptor`.
    pub type_name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Absence at Final finalization is an error when set.
    pub required: bool,
    pub descriptor: Descriptor,
}

impl FieldDef {
    pub fn required(descriptor: Descriptor) -> Self {
        Self {
            required: true,
            descriptor,
        }
    }

    pub fn optional(descriptor: Descriptor) -> Self {
        Self {
            required: false,
            descriptor,
        }
    }
}

impl Descriptor {
    pub fn scalar(
        name: impl Into<String>,
        ty: ScalarType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: DescriptorKind::Scalar(ty),
        }
    }

    pub fn object(
        name: impl Into<String>,
        type_name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: DescriptorKind::Object(ObjectSchema {
                type_name: type_name.into(),
                fields,
            }),
        }
    }

    pub fn list(
        name: impl Into<String>,
        description: impl Into<String>,
        element: Descriptor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: DescriptorKind::List(Box::new(element)),
        }
    }

    pub fn union(
        name: impl Into<String>,
        description: impl Into<String>,
        alternatives: Vec<Descriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: DescriptorKind::Union(alternatives),
        }
    }

    pub fn optional(inner: Descriptor) -> Self {
        Self {
            name: inner.name.clone(),
            description: inner.description.clone(),
            kind: DescriptorKind::Optional(Box::new(inner)),
        }
    }

    /// The descriptor with any `Optional` wrappers stripped.
    pub fn effective(&self) -> &Descriptor {
        let mut d = self;
        while let DescriptorKind::Optional(inner) = &d.kind {
            d = inner;
        }
        d
    }

    pub fn is_optional(&self) -> bool {
        matches!(self.kind, DescriptorKind::Optional(_))
    }

    /// Full-tree validation plus the object-root requirement. All
    /// violations are fatal: they indicate a broken schema supplier, not
    /// malformed input text.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if !matches!(self.effective().kind, DescriptorKind::Object(_)) {
            return Err(DescriptorError::RootNotObject {
                name: self.name.clone(),
            });
        }
        self.check(0)
    }

    fn check(&self, depth: usize) -> Result<(), DescriptorError> {
        if depth > MAX_DEPTH {
            return Err(DescriptorError::TooDeep {
                name: self.name.clone(),
            });
        }
        if !TAG_NAME_RE.is_match(&self.name) {
            return Err(DescriptorError::InvalidTagName {
                name: self.name.clone(),
            });
        }
        match &self.kind {
            DescriptorKind::Scalar(_) => Ok(()),
            DescriptorKind::Object(schema) => {
                let mut seen = HashSet::new();
                for f in &schema.fields {
                    if !seen.insert(f.descriptor.name.as_str()) {
                        return Err(DescriptorError::DuplicateTag {
                            context: format!("object <{}>", self.name),
                            tag: f.descriptor.name.clone(),
                        });
                    }
                }
                for f in &schema.fields {
                    f.descriptor.check(depth + 1)?;
                }
                Ok(())
            }
            DescriptorKind::List(elem) => elem.check(depth + 1),
            DescriptorKind::Union(alts) => {
                if alts.is_empty() {
                    return Err(DescriptorError::EmptyUnion {
                        name: self.name.clone(),
                    });
                }
                let mut seen = HashSet::new();
                for a in alts {
                    if !seen.insert(a.name.as_str()) {
                        return Err(DescriptorError::DuplicateTag {
                            context: format!("union <{}>", self.name),
                            tag: a.name.clone(),
                        });
                    }
                }
                for a in alts {
                    a.check(depth + 1)?;
                }
                Ok(())
            }
            DescriptorKind::Optional(inner) => inner.check(depth + 1),
        }
    }
}

/// Supplies the descriptor tree for a target type. The returned tree is
/// validated and cached on first use; construction must be side-effect
/// free, since a racing builder's tree may be discarded.
pub trait Schema: 'static {
    fn descriptor() -> Descriptor;
}

static REGISTRY: Lazy<RwLock<HashMap<TypeId, Arc<Descriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Read-through cache over `T::descriptor()`, keyed by type identity.
/// Safe for concurrent callers: a race to populate the same entry builds
/// twice and keeps whichever tree lands first.
pub fn descriptor_of<T: Schema>() -> Result<Arc<Descriptor>, DescriptorError> {
    let key = TypeId::of::<T>();
    {
        let reg = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
        if let Some(d) = reg.get(&key) {
            return Ok(Arc::clone(d));
        }
    }
    let built = T::descriptor();
    built.validate()?;
    let built = Arc::new(built);
    let mut reg = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    Ok(Arc::clone(reg.entry(key).or_insert(built)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie() -> Descriptor {
        Descriptor::object(
            "movie",
            "Movie",
            "",
            vec![
                FieldDef::required(Descriptor::scalar(
                    "title",
                    ScalarType::String,
                    "The title of the movie",
                )),
                FieldDef::required(Descriptor::scalar(
                    "director",
                    ScalarType::String,
                    "The director of the movie",
                )),
            ],
        )
    }

    #[test]
    fn test_valid_tree() {
        let root = Descriptor::object(
            "response",
            "Response",
            "",
            vec![FieldDef::required(Descriptor::list("movies", "", movie()))],
        );
        assert!(root.validate().is_ok());
    }

    #[test]
    fn test_root_must_be_object() {
        let root = Descriptor::scalar("answer", ScalarType::String, "");
        assert_eq!(
            root.validate(),
            Err(DescriptorError::RootNotObject {
                name: "answer".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_tag_name() {
        let root = Descriptor::object(
            "root",
            "Root",
            "",
            vec![FieldDef::required(Descriptor::scalar(
                "9lives",
                ScalarType::String,
                "",
            ))],
        );
        assert!(matches!(
            root.validate(),
            Err(DescriptorError::InvalidTagName { .. })
        ));
    }

    #[test]
    fn test_duplicate_field_tags() {
        let root = Descriptor::object(
            "root",
            "Root",
            "",
            vec![
                FieldDef::required(Descriptor::scalar("x", ScalarType::String, "")),
                FieldDef::optional(Descriptor::scalar("x", ScalarType::Int, "")),
            ],
        );
        assert_eq!(
            root.validate(),
            Err(DescriptorError::DuplicateTag {
                context: "object <root>".to_string(),
                tag: "x".to_string()
            })
        );
    }

    #[test]
    fn test_empty_union() {
        let root = Descriptor::object(
            "root",
            "Root",
            "",
            vec![FieldDef::required(Descriptor::union("pet", "", vec![]))],
        );
        assert!(matches!(
            root.validate(),
            Err(DescriptorError::EmptyUnion { .. })
        ));
    }

    #[test]
    fn test_duplicate_union_alternatives() {
        let root = Descriptor::object(
            "root",
            "Root",
            "",
            vec![FieldDef::required(Descriptor::union(
                "pet",
                "",
                vec![movie(), movie()],
            ))],
        );
        assert!(matches!(
            root.validate(),
            Err(DescriptorError::DuplicateTag { .. })
        ));
    }

    #[test]
    fn test_effective_strips_optional() {
        let d = Descriptor::optional(Descriptor::optional(Descriptor::scalar(
            "x",
            ScalarType::Bool,
            "",
        )));
        assert!(d.is_optional());
        assert!(matches!(
            d.effective().kind,
            DescriptorKind::Scalar(ScalarType::Bool)
        ));
    }

    struct CachedType;

    impl Schema for CachedType {
        fn descriptor() -> Descriptor {
            Descriptor::object(
                "cached",
                "Cached",
                "",
                vec![FieldDef::required(Descriptor::scalar(
                    "x",
                    ScalarType::String,
                    "",
                ))],
            )
        }
    }

    #[test]
    fn test_registry_returns_same_tree() {
        let a = descriptor_of::<CachedType>().unwrap();
        let b = descriptor_of::<CachedType>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

//! Declared-type syntax and the per-type descriptor registry.
//!
//! `@type` carries a small wire syntax instead of reflective class names:
//! scalar names (`int`, `double`, `boolean`, `string`), `[]` suffix for
//! arrays, `List<T>` / `Set<T>` / `SortedSet<T>` / `Map<K,V>` /
//! `SortedMap<K,V>` for containers, and bare names for registered records and
//! enums. The registry is the reflection substitute: every record type the
//! resolver can populate is described up front by its field table.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};

// ------------------------------ TypeRef ----------------------------------- //

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Any,
    Bool,
    Int,
    Float,
    Str,
    Array(Box<TypeRef>),
    List(Box<TypeRef>),
    Set(Box<TypeRef>),
    SortedSet(Box<TypeRef>),
    Map(Box<TypeRef>, Box<TypeRef>),
    SortedMap(Box<TypeRef>, Box<TypeRef>),
    Named(String),
}

impl TypeRef {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TypeRef::Bool | TypeRef::Int | TypeRef::Float | TypeRef::Str
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeRef::Array(_))
    }

    /// Collections append; arrays index.
    pub fn is_collection_kind(&self) -> bool {
        matches!(
            self,
            TypeRef::List(_) | TypeRef::Set(_) | TypeRef::SortedSet(_)
        )
    }

    pub fn is_set_kind(&self) -> bool {
        matches!(self, TypeRef::Set(_) | TypeRef::SortedSet(_))
    }

    pub fn is_map_kind(&self) -> bool {
        matches!(self, TypeRef::Map(_, _) | TypeRef::SortedMap(_, _))
    }

    /// Element type of arrays and collections, `Any` when unparameterized.
    pub fn component(&self) -> TypeRef {
        match self {
            TypeRef::Array(c) | TypeRef::List(c) | TypeRef::Set(c) | TypeRef::SortedSet(c) => {
                (**c).clone()
            }
            _ => TypeRef::Any,
        }
    }

    /// Head name used for coercion-table and factory lookups: `Map` for
    /// `Map<string,int>`, the bare name for named types, the scalar name
    /// otherwise.
    pub fn head_name(&self) -> String {
        match self {
            TypeRef::Any => "any".into(),
            TypeRef::Bool => "boolean".into(),
            TypeRef::Int => "int".into(),
            TypeRef::Float => "double".into(),
            TypeRef::Str => "string".into(),
            TypeRef::Array(_) => "array".into(),
            TypeRef::List(_) => "List".into(),
            TypeRef::Set(_) => "Set".into(),
            TypeRef::SortedSet(_) => "SortedSet".into(),
            TypeRef::Map(_, _) => "Map".into(),
            TypeRef::SortedMap(_, _) => "SortedMap".into(),
            TypeRef::Named(n) => n.clone(),
        }
    }

    /// Sorted containers downgrade to their insertion-ordered equivalents;
    /// there is no tree-backed container on the resolved side.
    pub fn insertion_ordered_fallback(self) -> TypeRef {
        match self {
            TypeRef::SortedSet(c) => TypeRef::Set(c),
            TypeRef::SortedMap(k, v) => TypeRef::Map(k, v),
            other => other,
        }
    }

    pub fn parse(s: &str) -> Result<TypeRef> {
        let mut p = Parser { src: s, pos: 0 };
        let ty = p.parse_type()?;
        p.skip_ws();
        if p.pos != s.len() {
            return Err(Error::Parse(format!(
                "trailing input in type `{s}` at offset {}",
                p.pos
            )));
        }
        Ok(ty)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Any => write!(f, "any"),
            TypeRef::Bool => write!(f, "boolean"),
            TypeRef::Int => write!(f, "int"),
            TypeRef::Float => write!(f, "double"),
            TypeRef::Str => write!(f, "string"),
            TypeRef::Array(c) => write!(f, "{c}[]"),
            TypeRef::List(c) => write!(f, "List<{c}>"),
            TypeRef::Set(c) => write!(f, "Set<{c}>"),
            TypeRef::SortedSet(c) => write!(f, "SortedSet<{c}>"),
            TypeRef::Map(k, v) => write!(f, "Map<{k},{v}>"),
            TypeRef::SortedMap(k, v) => write!(f, "SortedMap<{k},{v}>"),
            TypeRef::Named(n) => write!(f, "{n}"),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.src[self.pos..].starts_with(' ') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: char) -> Result<()> {
        self.skip_ws();
        if self.src[self.pos..].starts_with(token) {
            self.pos += token.len_utf8();
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "expected `{token}` in type `{}` at offset {}",
                self.src, self.pos
            )))
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let src: &'a str = self.src;
        let rest = &src[self.pos..];
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(Error::Parse(format!(
                "expected type name in `{}` at offset {}",
                self.src, self.pos
            )));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn parse_type(&mut self) -> Result<TypeRef> {
        let name = self.ident()?;
        let mut ty = match name {
            "any" | "object" => TypeRef::Any,
            "boolean" | "bool" => TypeRef::Bool,
            "int" | "long" => TypeRef::Int,
            "double" | "float" => TypeRef::Float,
            "string" => TypeRef::Str,
            "List" => TypeRef::List(Box::new(self.opt_param()?)),
            "Set" => TypeRef::Set(Box::new(self.opt_param()?)),
            "SortedSet" => TypeRef::SortedSet(Box::new(self.opt_param()?)),
            "Map" => {
                let (k, v) = self.opt_two_params()?;
                TypeRef::Map(Box::new(k), Box::new(v))
            }
            "SortedMap" => {
                let (k, v) = self.opt_two_params()?;
                TypeRef::SortedMap(Box::new(k), Box::new(v))
            }
            other => TypeRef::Named(other.to_string()),
        };
        // array suffixes bind outermost: `int[]`, `Point[]`
        loop {
            self.skip_ws();
            if self.src[self.pos..].starts_with("[]") {
                self.pos += 2;
                ty = TypeRef::Array(Box::new(ty));
            } else {
                break;
            }
        }
        Ok(ty)
    }

    fn at_angle(&mut self) -> bool {
        self.skip_ws();
        self.src[self.pos..].starts_with('<')
    }

    /// Unparameterized heads are legal (`"List"` means `List<any>`); the
    /// coercion table is written in terms of bare heads.
    fn opt_param(&mut self) -> Result<TypeRef> {
        if !self.at_angle() {
            return Ok(TypeRef::Any);
        }
        self.eat('<')?;
        let t = self.parse_type()?;
        self.eat('>')?;
        Ok(t)
    }

    fn opt_two_params(&mut self) -> Result<(TypeRef, TypeRef)> {
        if !self.at_angle() {
            return Ok((TypeRef::Any, TypeRef::Any));
        }
        self.eat('<')?;
        let k = self.parse_type()?;
        self.eat(',')?;
        let v = self.parse_type()?;
        self.eat('>')?;
        Ok((k, v))
    }
}

// ----------------------------- Registry ----------------------------------- //

#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Record(RecordDescriptor),
    Enum(EnumDescriptor),
}

/// Field table of a record type, in declaration order. Stands in for
/// reflective field access: the resolver consults it for coercion targets and
/// for deciding which source fields are missing.
#[derive(Debug, Clone, Default)]
pub struct RecordDescriptor {
    pub fields: IndexMap<String, TypeRef>,
}

#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub variants: Vec<String>,
}

impl EnumDescriptor {
    pub fn has_variant(&self, name: &str) -> bool {
        self.variants.iter().any(|v| v == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_record<N, F>(&mut self, name: N, fields: F) -> &mut Self
    where
        N: Into<String>,
        F: IntoIterator<Item = (&'static str, TypeRef)>,
    {
        let descriptor = RecordDescriptor {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        self.types
            .insert(name.into(), TypeDescriptor::Record(descriptor));
        self
    }

    pub fn register_enum<N>(&mut self, name: N, variants: &[&str]) -> &mut Self
    where
        N: Into<String>,
    {
        self.types.insert(
            name.into(),
            TypeDescriptor::Enum(EnumDescriptor {
                variants: variants.iter().map(|v| v.to_string()).collect(),
            }),
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn record(&self, name: &str) -> Option<&RecordDescriptor> {
        match self.types.get(name) {
            Some(TypeDescriptor::Record(r)) => Some(r),
            _ => None,
        }
    }

    /// The enum class behind a type, if any.
    pub fn enum_class<'a>(&'a self, ty: &TypeRef) -> Option<(&'a str, &'a EnumDescriptor)> {
        match ty {
            TypeRef::Named(n) => match self.types.get(n.as_str()) {
                Some(TypeDescriptor::Enum(e)) => {
                    let (name, _) = self.types.get_key_value(n.as_str()).unwrap();
                    Some((name.as_str(), e))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Pass a declared type through the user coercion table. Exact rendered-name
/// matches win; otherwise a head-name match substitutes the head and keeps
/// container parameters (`SortedMap -> Map` leaves `<K,V>` alone).
pub fn coerce(ty: TypeRef, coercions: &IndexMap<String, String>) -> Result<TypeRef> {
    if coercions.is_empty() {
        return Ok(ty);
    }
    if let Some(subst) = coercions.get(&ty.to_string()) {
        return TypeRef::parse(subst);
    }
    if let Some(subst) = coercions.get(&ty.head_name()) {
        let head = TypeRef::parse(subst)?;
        return Ok(reparameterize(head, &ty));
    }
    Ok(ty)
}

fn reparameterize(head: TypeRef, original: &TypeRef) -> TypeRef {
    match (head, original) {
        (TypeRef::List(_), _) => TypeRef::List(Box::new(original.component())),
        (TypeRef::Set(_), _) => TypeRef::Set(Box::new(original.component())),
        (TypeRef::SortedSet(_), _) => TypeRef::SortedSet(Box::new(original.component())),
        (TypeRef::Map(_, _), TypeRef::Map(k, v) | TypeRef::SortedMap(k, v)) => {
            TypeRef::Map(k.clone(), v.clone())
        }
        (TypeRef::SortedMap(_, _), TypeRef::Map(k, v) | TypeRef::SortedMap(k, v)) => {
            TypeRef::SortedMap(k.clone(), v.clone())
        }
        (other, _) => other,
    }
}

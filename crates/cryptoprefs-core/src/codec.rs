//! Conversion between typed scalars and the canonical text the store persists.
//!
//! The supported set is closed: text, booleans, signed integers of 8 to 64 bits and
//! both float widths. Anything else is the caller's job, either by implementing
//! [`Preference`] for its own type or by converting to one of the supported kinds first.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures converting between text and scalars.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Stored text is not a valid encoding of the requested kind.
    #[error("cannot read [{value}] as {kind}")]
    TypeCoercion { kind: ScalarKind, value: String },
    /// Requested kind is outside the supported set.
    #[error(
        "unsupported preference type [{kind}]; convert it to a supported scalar or implement `Preference` for it"
    )]
    UnsupportedType { kind: String },
}

/// The closed set of kinds a preference value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Text,
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 8] = [
        ScalarKind::Text,
        ScalarKind::Bool,
        ScalarKind::I8,
        ScalarKind::I16,
        ScalarKind::I32,
        ScalarKind::I64,
        ScalarKind::F32,
        ScalarKind::F64,
    ];

    /// Resolve a kind from a user-facing name (`i32`, `int`, `double`, ...).
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "text" | "string" | "str" => ScalarKind::Text,
            "bool" | "boolean" => ScalarKind::Bool,
            "i8" | "byte" => ScalarKind::I8,
            "i16" | "short" => ScalarKind::I16,
            "i32" | "int" => ScalarKind::I32,
            "i64" | "long" => ScalarKind::I64,
            "f32" | "float" => ScalarKind::F32,
            "f64" | "double" => ScalarKind::F64,
            _ => {
                return Err(CodecError::UnsupportedType {
                    kind: name.to_string(),
                })
            }
        };
        Ok(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Text => "text",
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// A single preference value of runtime-known kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Text(_) => ScalarKind::Text,
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::I8(_) => ScalarKind::I8,
            Scalar::I16(_) => ScalarKind::I16,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::I64(_) => ScalarKind::I64,
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::F64(_) => ScalarKind::F64,
        }
    }

    /// Canonical text form.
    pub fn encode(&self) -> String {
        match self {
            Scalar::Text(v) => v.encode(),
            Scalar::Bool(v) => v.encode(),
            Scalar::I8(v) => v.encode(),
            Scalar::I16(v) => v.encode(),
            Scalar::I32(v) => v.encode(),
            Scalar::I64(v) => v.encode(),
            Scalar::F32(v) => v.encode(),
            Scalar::F64(v) => v.encode(),
        }
    }

    /// Parse `text` as `kind`, failing instead of truncating or saturating.
    pub fn decode(text: &str, kind: ScalarKind) -> Result<Self, CodecError> {
        let scalar = match kind {
            ScalarKind::Text => Scalar::Text(String::decode(text)?),
            ScalarKind::Bool => Scalar::Bool(bool::decode(text)?),
            ScalarKind::I8 => Scalar::I8(i8::decode(text)?),
            ScalarKind::I16 => Scalar::I16(i16::decode(text)?),
            ScalarKind::I32 => Scalar::I32(i32::decode(text)?),
            ScalarKind::I64 => Scalar::I64(i64::decode(text)?),
            ScalarKind::F32 => Scalar::F32(f32::decode(text)?),
            ScalarKind::F64 => Scalar::F64(f64::decode(text)?),
        };
        Ok(scalar)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A statically typed value that can live in the preference store.
///
/// Implemented for every supported scalar. Types outside that set can implement it to
/// provide their own text mapping.
pub trait Preference: Sized {
    /// Kind reported in coercion errors.
    const KIND: ScalarKind;

    fn encode(&self) -> String;

    fn decode(text: &str) -> Result<Self, CodecError>;
}

impl Preference for String {
    const KIND: ScalarKind = ScalarKind::Text;

    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(text.to_string())
    }
}

impl Preference for bool {
    const KIND: ScalarKind = ScalarKind::Bool;

    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(text: &str) -> Result<Self, CodecError> {
        match text {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(coercion(Self::KIND, text)),
        }
    }
}

macro_rules! numeric_preference {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl Preference for $ty {
                const KIND: ScalarKind = $kind;

                fn encode(&self) -> String {
                    self.to_string()
                }

                fn decode(text: &str) -> Result<Self, CodecError> {
                    text.parse::<$ty>().map_err(|_| coercion(Self::KIND, text))
                }
            }
        )*
    };
}

numeric_preference! {
    i8 => ScalarKind::I8,
    i16 => ScalarKind::I16,
    i32 => ScalarKind::I32,
    i64 => ScalarKind::I64,
    f32 => ScalarKind::F32,
    f64 => ScalarKind::F64,
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Scalar::$variant(value)
                }
            }
        )*
    };
}

scalar_from! {
    String => Text,
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

fn coercion(kind: ScalarKind, text: &str) -> CodecError {
    CodecError::TypeCoercion {
        kind,
        value: text.to_string(),
    }
}

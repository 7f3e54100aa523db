//! Typed handles: the contract between a module and the values it
//! receives and returns.
//!
//! A [`Handle`] is a named, typed slot. Handles are built once per job
//! from a module interface descriptor via [`create_handle`], which looks
//! the type name up in an explicit registry. Every value bound to a
//! handle goes through [`Handle::validate`] first; a value with the wrong
//! container, element type, or width is rejected with an error naming
//! the handle.

use std::collections::BTreeSet;

use crate::error::HandleError;
use crate::types::{ArrayData, ColumnData, ElementType, Value};

/// Constructor keyword arguments, as parsed from a module descriptor.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// The role a handle plays for one module invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Value passed as an argument to the module.
    Input,
    /// Value returned by the module.
    Output,
}

/// The closed set of handle kinds with their kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleKind {
    /// 2D/3D unsigned 8- or 16-bit intensity image.
    IntensityImage {
        /// Store key.
        key: String,
    },
    /// 2D/3D signed 32-bit label image; zero is background.
    LabelImage {
        /// Store key.
        key: String,
    },
    /// 2D/3D boolean mask.
    BinaryImage {
        /// Store key.
        key: String,
    },
    /// Label image whose objects accumulate measurements and attributes.
    SegmentedObjects {
        /// Store key, also the name of the object set.
        key: String,
    },
    /// Literal int, float, string, or bool argument.
    Scalar {
        /// The configured value.
        value: Value,
        /// Allowed values; empty means unconstrained.
        options: Vec<Value>,
    },
    /// Literal list of ints, floats, or strings.
    Sequence {
        /// The configured elements.
        value: Vec<Value>,
    },
    /// Whether the module should produce a figure.
    Plot {
        /// The configured flag.
        value: bool,
    },
    /// Float feature table for an object set.
    Measurement {
        /// Key of the object set the features describe.
        objects_ref: String,
        /// Channel the features were extracted from.
        channel_ref: Option<String>,
    },
    /// Named per-object series for an object set.
    Attribute {
        /// Key of the object set the attribute describes.
        objects_ref: String,
    },
    /// Opaque figure markup.
    Figure,
}

impl HandleKind {
    /// The registry name of this kind.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::IntensityImage { .. } => "IntensityImage",
            Self::LabelImage { .. } => "LabelImage",
            Self::BinaryImage { .. } => "BinaryImage",
            Self::SegmentedObjects { .. } => "SegmentedObjects",
            Self::Scalar { .. } => "Scalar",
            Self::Sequence { .. } => "Sequence",
            Self::Plot { .. } => "Plot",
            Self::Measurement { .. } => "Measurement",
            Self::Attribute { .. } => "Attribute",
            Self::Figure => "Figure",
        }
    }

    /// Store key of pipeline handles, `None` for all other kinds.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::IntensityImage { key }
            | Self::LabelImage { key }
            | Self::BinaryImage { key }
            | Self::SegmentedObjects { key } => Some(key),
            _ => None,
        }
    }

    /// Whether a handle of this kind may appear in the given role.
    #[must_use]
    pub const fn allows(&self, role: Role) -> bool {
        match self {
            Self::IntensityImage { .. }
            | Self::LabelImage { .. }
            | Self::BinaryImage { .. }
            | Self::SegmentedObjects { .. } => true,
            Self::Scalar { .. } | Self::Sequence { .. } | Self::Plot { .. } => {
                matches!(role, Role::Input)
            }
            Self::Measurement { .. } | Self::Attribute { .. } | Self::Figure => {
                matches!(role, Role::Output)
            }
        }
    }
}

/// A named, typed slot for one module argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    name: String,
    help: String,
    kind: HandleKind,
}

impl Handle {
    /// Create a handle directly from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: HandleKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
        }
    }

    /// Handle name; matches a module parameter or output key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// The handle kind.
    #[must_use]
    pub const fn kind(&self) -> &HandleKind {
        &self.kind
    }

    /// Store key for pipeline handles.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.kind.key()
    }

    /// The configured value of a literal input handle.
    #[must_use]
    pub fn literal(&self) -> Option<Value> {
        match &self.kind {
            HandleKind::Scalar { value, .. } => Some(value.clone()),
            HandleKind::Sequence { value } => Some(Value::List(value.clone())),
            HandleKind::Plot { value } => Some(Value::Bool(*value)),
            _ => None,
        }
    }

    /// Check that `value` satisfies this handle's contract.
    ///
    /// Binary images given as 0/1 `uint8` arrays are converted to boolean
    /// arrays; every other accepted value is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::TypeMismatch`] if the value has the wrong
    /// container or element type and [`HandleError::EmptyAttributeName`]
    /// for an unnamed attribute series.
    pub fn validate(&self, value: Value) -> Result<Value, HandleError> {
        match (&self.kind, value) {
            (HandleKind::IntensityImage { .. }, v @ Value::Array(ArrayData::U8(_) | ArrayData::U16(_)))
            | (
                HandleKind::LabelImage { .. } | HandleKind::SegmentedObjects { .. },
                v @ Value::Array(ArrayData::I32(_)),
            )
            | (HandleKind::BinaryImage { .. }, v @ Value::Array(ArrayData::Bool(_)))
            | (HandleKind::Plot { .. }, v @ Value::Bool(_))
            | (HandleKind::Figure, v @ Value::Str(_)) => Ok(v),
            (HandleKind::BinaryImage { .. }, Value::Array(ArrayData::U8(a)))
                if a.as_slice().iter().all(|&v| v <= 1) =>
            {
                Ok(Value::Array(ArrayData::Bool(a.map(|&v| v == 1))))
            }
            (HandleKind::Scalar { options, .. }, v) if is_scalar(&v) => {
                if options.is_empty() || options.contains(&v) {
                    Ok(v)
                } else {
                    Err(self.mismatch(format!("one of {}", describe(options)), &v))
                }
            }
            (HandleKind::Sequence { .. }, Value::List(items))
                if items.iter().all(is_sequence_element) =>
            {
                Ok(Value::List(items))
            }
            (HandleKind::Measurement { .. }, Value::Table(frame)) => {
                match frame.columns().iter().find(|c| !matches!(c.data, ColumnData::Float(_))) {
                    None => Ok(Value::Table(frame)),
                    Some(c) => Err(HandleError::TypeMismatch {
                        handle: self.name.clone(),
                        kind: self.kind.type_name(),
                        expected: self.expected(),
                        found: format!("table with {} column \"{}\"", c.data.type_name(), c.name),
                    }),
                }
            }
            (HandleKind::Attribute { .. }, Value::Series(series)) => {
                if series.name().is_empty() {
                    Err(HandleError::EmptyAttributeName {
                        handle: self.name.clone(),
                    })
                } else {
                    Ok(Value::Series(series))
                }
            }
            (_, v) => Err(self.mismatch(self.expected(), &v)),
        }
    }

    fn expected(&self) -> String {
        match &self.kind {
            HandleKind::IntensityImage { .. } => format!(
                "an array of {} or {}",
                ElementType::U8,
                ElementType::U16
            ),
            HandleKind::LabelImage { .. } | HandleKind::SegmentedObjects { .. } => {
                format!("an array of {}", ElementType::I32)
            }
            HandleKind::BinaryImage { .. } => {
                format!("an array of {} (or 0/1 {})", ElementType::Bool, ElementType::U8)
            }
            HandleKind::Scalar { .. } => "an int, float, str, or bool".to_string(),
            HandleKind::Sequence { .. } => "a list of ints, floats, or strs".to_string(),
            HandleKind::Plot { .. } => "a bool".to_string(),
            HandleKind::Measurement { .. } => "a table of float columns".to_string(),
            HandleKind::Attribute { .. } => "a named series".to_string(),
            HandleKind::Figure => "a str".to_string(),
        }
    }

    fn mismatch(&self, expected: String, found: &Value) -> HandleError {
        HandleError::TypeMismatch {
            handle: self.name.clone(),
            kind: self.kind.type_name(),
            expected,
            found: found.type_name(),
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}(name={:?}", self.kind.type_name(), self.name)?;
        match &self.kind {
            HandleKind::Measurement {
                objects_ref,
                channel_ref: Some(channel),
            } => write!(f, ", objects_ref={objects_ref:?}, channel_ref={channel:?}")?,
            HandleKind::Measurement { objects_ref, .. } | HandleKind::Attribute { objects_ref } => {
                write!(f, ", objects_ref={objects_ref:?}")?;
            }
            kind => {
                if let Some(key) = kind.key() {
                    write!(f, ", key={key:?}")?;
                }
            }
        }
        f.write_str(")>")
    }
}

const fn is_scalar(v: &Value) -> bool {
    matches!(
        v,
        Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Bool(_)
    )
}

const fn is_sequence_element(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Float(_) | Value::Str(_))
}

fn describe(values: &[Value]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Str(s) => format!("{s:?}"),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => x.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.type_name(),
        })
        .collect();
    format!("[{}]", items.join(", "))
}

// ───────────────────────────── Factory ─────────────────────────────

type Constructor = fn(&mut Arguments<'_>) -> Result<HandleKind, HandleError>;

/// Registered handle types, in documentation order.
const HANDLE_TYPES: &[(&str, Constructor)] = &[
    ("IntensityImage", |a| {
        Ok(HandleKind::IntensityImage {
            key: a.required_str("key")?,
        })
    }),
    ("LabelImage", |a| {
        Ok(HandleKind::LabelImage {
            key: a.required_str("key")?,
        })
    }),
    ("BinaryImage", |a| {
        Ok(HandleKind::BinaryImage {
            key: a.required_str("key")?,
        })
    }),
    ("SegmentedObjects", |a| {
        Ok(HandleKind::SegmentedObjects {
            key: a.required_str("key")?,
        })
    }),
    ("Scalar", build_scalar),
    ("Sequence", |a| {
        let value = match a.required_value("value")? {
            Value::List(items) if items.iter().all(is_sequence_element) => items,
            other => {
                return Err(a.invalid(format!(
                    "\"value\" must be a list of ints, floats, or strs, got {}",
                    other.type_name()
                )));
            }
        };
        Ok(HandleKind::Sequence { value })
    }),
    ("Plot", |a| {
        let value = match a.optional_value("value")? {
            None => false,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(a.invalid(format!(
                    "\"value\" must be a bool, got {}",
                    other.type_name()
                )));
            }
        };
        Ok(HandleKind::Plot { value })
    }),
    ("Measurement", |a| {
        Ok(HandleKind::Measurement {
            objects_ref: a.required_str("objects_ref")?,
            channel_ref: a.optional_str("channel_ref")?,
        })
    }),
    ("Attribute", |a| {
        Ok(HandleKind::Attribute {
            objects_ref: a.required_str("objects_ref")?,
        })
    }),
    ("Figure", |_| Ok(HandleKind::Figure)),
];

fn build_scalar(a: &mut Arguments<'_>) -> Result<HandleKind, HandleError> {
    let value = a.required_value("value")?;
    if !is_scalar(&value) {
        return Err(a.invalid(format!(
            "\"value\" must be an int, float, str, or bool, got {}",
            value.type_name()
        )));
    }
    let options = match a.optional_value("options")? {
        None => Vec::new(),
        Some(Value::List(items)) if items.iter().all(is_scalar) => items,
        Some(other) => {
            return Err(a.invalid(format!(
                "\"options\" must be a list of scalars, got {}",
                other.type_name()
            )));
        }
    };
    if !options.is_empty() && !options.contains(&value) {
        return Err(a.invalid(format!(
            "\"value\" must be one of {}",
            describe(&options)
        )));
    }
    Ok(HandleKind::Scalar { value, options })
}

/// Names of all registered handle types.
pub fn handle_types() -> impl Iterator<Item = &'static str> {
    HANDLE_TYPES.iter().map(|(name, _)| *name)
}

/// Construct a handle from a type name and keyword arguments.
///
/// Every handle requires `name`; `help` is optional. The remaining
/// keywords depend on the type (`key` for images and objects, `value`
/// for literals, `objects_ref` for measurements and attributes).
///
/// # Errors
///
/// Returns [`HandleError::UnknownType`] if `type_name` is not registered
/// and [`HandleError::InvalidArguments`] if a required keyword is
/// missing, has the wrong type, or an unexpected keyword is present.
pub fn create_handle(type_name: &str, kwargs: &Kwargs) -> Result<Handle, HandleError> {
    let constructor = HANDLE_TYPES
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| HandleError::UnknownType {
            type_name: type_name.to_string(),
        })?;

    let mut args = Arguments::new(type_name, kwargs);
    let name = args.required_str("name")?;
    let help = args.optional_str("help")?.unwrap_or_default();
    let kind = constructor(&mut args)?;
    args.finish()?;
    Ok(Handle { name, help, kind })
}

/// Keyword argument reader that remembers which keys were consumed.
struct Arguments<'a> {
    type_name: &'a str,
    kwargs: &'a Kwargs,
    consumed: BTreeSet<&'a str>,
}

impl<'a> Arguments<'a> {
    fn new(type_name: &'a str, kwargs: &'a Kwargs) -> Self {
        Self {
            type_name,
            kwargs,
            consumed: BTreeSet::new(),
        }
    }

    fn invalid(&self, reason: String) -> HandleError {
        HandleError::InvalidArguments {
            type_name: self.type_name.to_string(),
            reason,
        }
    }

    fn take(&mut self, key: &'a str) -> Option<&'a serde_json::Value> {
        self.consumed.insert(key);
        self.kwargs.get(key)
    }

    fn required_str(&mut self, key: &'a str) -> Result<String, HandleError> {
        self.optional_str(key)?
            .ok_or_else(|| self.invalid(format!("missing required argument \"{key}\"")))
    }

    fn optional_str(&mut self, key: &'a str) -> Result<Option<String>, HandleError> {
        match self.take(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(format!("argument \"{key}\" must be a string"))),
        }
    }

    fn required_value(&mut self, key: &'a str) -> Result<Value, HandleError> {
        self.optional_value(key)?
            .ok_or_else(|| self.invalid(format!("missing required argument \"{key}\"")))
    }

    fn optional_value(&mut self, key: &'a str) -> Result<Option<Value>, HandleError> {
        match self.take(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => value_from_json(v)
                .map(Some)
                .ok_or_else(|| self.invalid(format!("argument \"{key}\" must not be a mapping"))),
        }
    }

    fn finish(self) -> Result<(), HandleError> {
        let unexpected: Vec<&str> = self
            .kwargs
            .keys()
            .map(String::as_str)
            .filter(|k| !self.consumed.contains(k))
            .collect();
        if unexpected.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(format!(
                "unexpected argument(s) {}",
                unexpected.join(", ")
            )))
        }
    }
}

/// Convert a JSON literal into a [`Value`]. Mappings have no
/// counterpart and yield `None`.
#[must_use]
pub fn value_from_json(v: &serde_json::Value) -> Option<Value> {
    Some(match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64()?),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::List(items.iter().map(value_from_json).collect::<Option<_>>()?)
        }
        serde_json::Value::Object(_) => return None,
    })
}

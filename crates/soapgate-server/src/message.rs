//! Typed messages exchanged with the backend.
//!
//! Every input and output type declares its fields once, through
//! [`SoapMessage::FIELDS`]. The gateway never inspects a message any other
//! way: the descriptor table decides which fields merge across a multi-message
//! response and which field carries raw XML in pass-through mode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// How the gateway treats one message field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Taken once, from the first message of a response
    Scalar,
    /// Collected from every message of a response and merged
    Repeated,
    /// Carries an XML fragment verbatim in raw mode
    RawXml,
}

/// Name (as serialized) and role of one message field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub role: FieldRole,
}

impl FieldDescriptor {
    pub const fn scalar(name: &'static str) -> Self {
        Self { name, role: FieldRole::Scalar }
    }

    pub const fn repeated(name: &'static str) -> Self {
        Self { name, role: FieldRole::Repeated }
    }

    pub const fn raw_xml(name: &'static str) -> Self {
        Self { name, role: FieldRole::RawXml }
    }
}

/// A message type known to the backend.
///
/// ```ignore
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct ListOutput {
///     #[serde(rename = "Total")]
///     total: u32,
///     #[serde(rename = "Items")]
///     items: Vec<Item>,
/// }
///
/// impl SoapMessage for ListOutput {
///     const NAME: &'static str = "List_Output";
///     const FIELDS: &'static [FieldDescriptor] =
///         &[FieldDescriptor::scalar("Total"), FieldDescriptor::repeated("Items")];
/// }
/// ```
pub trait SoapMessage: Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static {
    /// Element name used when no other name is known
    const NAME: &'static str;
    /// Field table, in serialization order
    const FIELDS: &'static [FieldDescriptor];
}

/// Message conversion errors
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("XML decode: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("value conversion: {0}")]
    Value(#[from] serde_json::Error),

    #[error("{0} has no field to carry raw XML")]
    NoRawField(&'static str),
}

/// Object-safe view of a [`SoapMessage`]
pub trait DynMessage: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn fields(&self) -> &'static [FieldDescriptor];

    /// Replace the content with `element` decoded as XML
    fn decode_xml(&mut self, element: &str) -> Result<(), MessageError>;

    /// Store an XML fragment in the raw-XML field
    fn set_raw_xml(&mut self, raw: String) -> Result<(), MessageError>;

    /// Content of the raw-XML field
    fn raw_xml(&self) -> Option<String>;

    fn to_value(&self) -> Result<Value, MessageError>;

    /// Names of the fields merged across messages
    fn repeated_fields(&self) -> Vec<&'static str> {
        self.fields()
            .iter()
            .filter(|f| f.role == FieldRole::Repeated)
            .map(|f| f.name)
            .collect()
    }
}

pub type BoxMessage = Box<dyn DynMessage>;

/// The field raw XML goes into: the declared one, else the first field.
fn raw_field(fields: &'static [FieldDescriptor]) -> Option<&'static FieldDescriptor> {
    fields
        .iter()
        .find(|f| f.role == FieldRole::RawXml)
        .or_else(|| fields.first())
}

impl<T: SoapMessage> DynMessage for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn fields(&self) -> &'static [FieldDescriptor] {
        T::FIELDS
    }

    fn decode_xml(&mut self, element: &str) -> Result<(), MessageError> {
        match quick_xml::de::from_str::<T>(element) {
            Ok(value) => {
                *self = value;
                Ok(())
            }
            // an intentionally empty input message
            Err(quick_xml::DeError::UnexpectedEof) if T::FIELDS.is_empty() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn set_raw_xml(&mut self, raw: String) -> Result<(), MessageError> {
        let field = raw_field(T::FIELDS).ok_or(MessageError::NoRawField(T::NAME))?;
        let mut value = serde_json::to_value(&*self)?;
        let Value::Object(map) = &mut value else {
            return Err(MessageError::NoRawField(T::NAME));
        };
        map.insert(field.name.to_string(), Value::String(raw));
        *self = serde_json::from_value(value)?;
        Ok(())
    }

    fn raw_xml(&self) -> Option<String> {
        let field = raw_field(T::FIELDS)?;
        match serde_json::to_value(self).ok()?.get(field.name)? {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value, MessageError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Copy of `value` with only the non-repeated fields of `fields`
pub fn scalar_value(value: &Value, fields: &[FieldDescriptor]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| {
                    !fields
                        .iter()
                        .any(|f| f.role == FieldRole::Repeated && f.name == key.as_str())
                })
                .map(|(key, v)| (key.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

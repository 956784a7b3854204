//! Output shape contracts.
//!
//! A submission may carry an `output_schema`. When it looks like a JSON
//! Schema document (it has `type` or `$schema`), it must pass the draft-7
//! meta-schema and convert into a [`ShapeType`]; otherwise it is handed to
//! the engine untouched as an advisory hint.

use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::job::SchemaValidation;

/// Combined nesting and `$ref` depth accepted during conversion.
const MAX_DEPTH: usize = 64;

/// Keywords whose semantics have no structural-type equivalent.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "not",
    "if",
    "patternProperties",
    "dependencies",
    "dependentSchemas",
];

/// The output contract a job runs under.
#[derive(Debug, Clone)]
pub enum OutputShape {
    /// No constraint; the engine picks the shape.
    Free,
    /// Passed through to the engine as a hint, never validated.
    Advisory(Value),
    /// Enforceable schema document.
    Strict(StrictSchema),
}

impl OutputShape {
    pub fn is_strict(&self) -> bool {
        matches!(self, OutputShape::Strict(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputShape::Free => "free",
            OutputShape::Advisory(_) => "advisory",
            OutputShape::Strict(_) => "strict",
        }
    }
}

/// A validated schema document together with its converted type and a
/// compiled validator for result checks.
#[derive(Clone)]
pub struct StrictSchema {
    document: Value,
    shape: ShapeType,
    validator: Arc<Validator>,
}

impl StrictSchema {
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn shape(&self) -> &ShapeType {
        &self.shape
    }

    /// Check an extraction result. Never fails; a mismatch is reported in
    /// the returned value.
    pub fn check(&self, result: &Value) -> SchemaValidation {
        let errors: Vec<String> = self
            .validator
            .iter_errors(result)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            SchemaValidation::passed()
        } else {
            SchemaValidation::mismatch(errors.join("; "))
        }
    }
}

impl fmt::Debug for StrictSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrictSchema")
            .field("document", &self.document)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// True when `raw` carries schema markers (`type` or `$schema`).
pub fn is_schema_document(raw: &Value) -> bool {
    raw.as_object()
        .is_some_and(|m| m.contains_key("type") || m.contains_key("$schema"))
}

/// Validate a user-supplied output shape and turn it into an [`OutputShape`].
///
/// Schema documents that fail the meta-schema yield [`AppError::InvalidSchema`];
/// documents that are well-formed but use constructs with no structural
/// equivalent yield [`AppError::SchemaConversion`].
pub fn validate_and_convert(raw: Option<&Value>) -> Result<OutputShape, AppError> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(OutputShape::Free),
        Some(raw) => raw,
    };

    if !is_schema_document(raw) {
        return Ok(OutputShape::Advisory(raw.clone()));
    }

    jsonschema::draft7::meta::validate(raw)
        .map_err(|e| AppError::InvalidSchema(e.to_string()))?;

    let shape = ShapeType::from_schema(raw)?;

    let validator =
        jsonschema::draft7::new(raw).map_err(|e| AppError::SchemaConversion(e.to_string()))?;

    Ok(OutputShape::Strict(StrictSchema {
        document: raw.clone(),
        shape,
        validator: Arc::new(validator),
    }))
}

/// Check `result` against `shape`. Only strict shapes can report a mismatch.
pub fn check(result: &Value, shape: &OutputShape) -> SchemaValidation {
    match shape {
        OutputShape::Strict(schema) => schema.check(result),
        OutputShape::Free | OutputShape::Advisory(_) => SchemaValidation::passed(),
    }
}

// ---------------------------------------------------------------------------
// Structural types
// ---------------------------------------------------------------------------

/// Concrete structural type derived from a schema document.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeType {
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Enum(Vec<Value>),
    Array(Box<ShapeType>),
    Object(ObjectShape),
    Union(Vec<ShapeType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectShape {
    pub fields: Vec<Field>,
    /// False when the schema sets `additionalProperties: false`.
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: ShapeType,
    pub required: bool,
    pub description: Option<String>,
}

impl ShapeType {
    /// Convert a schema document. Local `$ref`s (`#/definitions/...`,
    /// `#/$defs/...`) are inlined; recursive references are rejected.
    pub fn from_schema(root: &Value) -> Result<Self, AppError> {
        Converter { root }.convert(root, 0)
    }

    /// Compact type signature, e.g. `{title: string, tags?: [string]}`.
    pub fn signature(&self) -> String {
        match self {
            ShapeType::Any => "any".to_string(),
            ShapeType::Null => "null".to_string(),
            ShapeType::Boolean => "boolean".to_string(),
            ShapeType::Integer => "integer".to_string(),
            ShapeType::Number => "number".to_string(),
            ShapeType::String => "string".to_string(),
            ShapeType::Enum(values) => values
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" | "),
            ShapeType::Array(inner) => format!("[{}]", inner.signature()),
            ShapeType::Object(object) => {
                let fields: Vec<String> = object
                    .fields
                    .iter()
                    .map(|f| {
                        let marker = if f.required { "" } else { "?" };
                        format!("{}{marker}: {}", f.name, f.ty.signature())
                    })
                    .collect();
                format!("{{{}}}", fields.join(", "))
            }
            ShapeType::Union(members) => format!(
                "({})",
                members
                    .iter()
                    .map(ShapeType::signature)
                    .collect::<Vec<_>>()
                    .join(" | ")
            ),
        }
    }
}

fn conversion(msg: impl Into<String>) -> AppError {
    AppError::SchemaConversion(msg.into())
}

struct Converter<'a> {
    root: &'a Value,
}

impl<'a> Converter<'a> {
    fn convert(&self, node: &'a Value, depth: usize) -> Result<ShapeType, AppError> {
        if depth > MAX_DEPTH {
            return Err(conversion(
                "schema is nested too deeply or contains a recursive $ref",
            ));
        }

        let map = match node {
            Value::Bool(true) => return Ok(ShapeType::Any),
            Value::Bool(false) => return Err(conversion("`false` schema can never be satisfied")),
            Value::Object(map) => map,
            other => return Err(conversion(format!("schema node must be an object, got {other}"))),
        };

        if let Some(keyword) = UNSUPPORTED_KEYWORDS.iter().find(|k| map.contains_key(**k)) {
            return Err(conversion(format!("keyword `{keyword}` is not supported")));
        }

        if let Some(reference) = map.get("$ref") {
            let target = self.resolve(reference)?;
            return self.convert(target, depth + 1);
        }
        if let Some(constant) = map.get("const") {
            return Ok(ShapeType::Enum(vec![constant.clone()]));
        }
        if let Some(Value::Array(values)) = map.get("enum") {
            return Ok(ShapeType::Enum(values.clone()));
        }
        if let Some(members) = map.get("allOf") {
            return self.all_of(map, members, depth);
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(members) = map.get(keyword) {
                return self.union(keyword, members, depth);
            }
        }

        match map.get("type") {
            Some(Value::String(ty)) => self.typed(ty, map, depth),
            Some(Value::Array(types)) => {
                let mut members = types
                    .iter()
                    .map(|t| {
                        let t = t
                            .as_str()
                            .ok_or_else(|| conversion("`type` entries must be strings"))?;
                        self.typed(t, map, depth)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if members.len() == 1 {
                    Ok(members.remove(0))
                } else {
                    Ok(ShapeType::Union(members))
                }
            }
            Some(_) => Err(conversion("`type` must be a string or an array of strings")),
            None if map.contains_key("properties") => self.object(map, depth),
            None if map.contains_key("items") => self.array(map, depth),
            None => Ok(ShapeType::Any),
        }
    }

    fn typed(
        &self,
        ty: &str,
        map: &'a Map<String, Value>,
        depth: usize,
    ) -> Result<ShapeType, AppError> {
        match ty {
            "string" => Ok(ShapeType::String),
            "integer" => Ok(ShapeType::Integer),
            "number" => Ok(ShapeType::Number),
            "boolean" => Ok(ShapeType::Boolean),
            "null" => Ok(ShapeType::Null),
            "object" => self.object(map, depth),
            "array" => self.array(map, depth),
            other => Err(conversion(format!("unknown type `{other}`"))),
        }
    }

    fn object(&self, map: &'a Map<String, Value>, depth: usize) -> Result<ShapeType, AppError> {
        let required: Vec<&str> = map
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = match map.get("properties") {
            None => Vec::new(),
            Some(Value::Object(props)) => props
                .iter()
                .map(|(name, sub)| {
                    Ok(Field {
                        name: name.clone(),
                        ty: self.convert(sub, depth + 1)?,
                        required: required.contains(&name.as_str()),
                        description: sub
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                    })
                })
                .collect::<Result<Vec<_>, AppError>>()?,
            Some(_) => return Err(conversion("`properties` must be an object")),
        };

        let open = !matches!(map.get("additionalProperties"), Some(Value::Bool(false)));
        Ok(ShapeType::Object(ObjectShape { fields, open }))
    }

    fn array(&self, map: &'a Map<String, Value>, depth: usize) -> Result<ShapeType, AppError> {
        match map.get("items") {
            None => Ok(ShapeType::Array(Box::new(ShapeType::Any))),
            Some(Value::Array(_)) => Err(conversion("tuple-style `items` arrays are not supported")),
            Some(items) => Ok(ShapeType::Array(Box::new(self.convert(items, depth + 1)?))),
        }
    }

    fn all_of(
        &self,
        map: &'a Map<String, Value>,
        members: &'a Value,
        depth: usize,
    ) -> Result<ShapeType, AppError> {
        let members = members
            .as_array()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| conversion("`allOf` must be a non-empty array"))?;

        let mut parts = Vec::with_capacity(members.len() + 1);
        if map.contains_key("properties") {
            parts.push(self.object(map, depth)?);
        }
        for member in members {
            parts.push(self.convert(member, depth + 1)?);
        }

        let mut merged = ObjectShape {
            fields: Vec::new(),
            open: true,
        };
        for part in parts {
            match part {
                ShapeType::Object(object) => {
                    merged.open &= object.open;
                    for field in object.fields {
                        match merged.fields.iter_mut().find(|f| f.name == field.name) {
                            Some(existing) => {
                                existing.required |= field.required;
                                existing.ty = field.ty;
                            }
                            None => merged.fields.push(field),
                        }
                    }
                }
                ShapeType::Any => {}
                other => {
                    return Err(conversion(format!(
                        "`allOf` can only combine object schemas, found {}",
                        other.signature()
                    )));
                }
            }
        }
        Ok(ShapeType::Object(merged))
    }

    fn union(&self, keyword: &str, members: &'a Value, depth: usize) -> Result<ShapeType, AppError> {
        let members = members
            .as_array()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| conversion(format!("`{keyword}` must be a non-empty array")))?;
        let mut converted = members
            .iter()
            .map(|m| self.convert(m, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        if converted.len() == 1 {
            Ok(converted.remove(0))
        } else {
            Ok(ShapeType::Union(converted))
        }
    }

    fn resolve(&self, reference: &Value) -> Result<&'a Value, AppError> {
        let reference = reference
            .as_str()
            .ok_or_else(|| conversion("`$ref` must be a string"))?;
        let pointer = reference.strip_prefix('#').ok_or_else(|| {
            conversion(format!("only local `$ref`s are supported, got `{reference}`"))
        })?;
        if pointer.is_empty() {
            return Ok(self.root);
        }
        self.root
            .pointer(pointer)
            .ok_or_else(|| conversion(format!("unresolvable `$ref` `{reference}`")))
    }
}

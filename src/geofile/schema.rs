use std::{fmt, str::FromStr};

/// Declared type of an attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Double,
    Single,
    Decimal,
    Bool,
    DateTime,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int32 => "Int32",
            FieldType::Int64 => "Int64",
            FieldType::Double => "Double",
            FieldType::Single => "Single",
            FieldType::Decimal => "Decimal",
            FieldType::Bool => "Boolean",
            FieldType::DateTime => "DateTime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFieldType(pub String);

impl fmt::Display for UnknownFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown field type '{}'", self.0)
    }
}

impl FromStr for FieldType {
    type Err = UnknownFieldType;

    /// Accepts .NET type names (`System.Double`), their C# keywords (`double`) and Esri
    /// field type strings (`esriFieldTypeDouble`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let name = lowered
            .strip_prefix("system.")
            .or_else(|| lowered.strip_prefix("esrifieldtype"))
            .unwrap_or(&lowered);
        match name {
            "string" | "str" | "text" | "char" | "guid" | "globalid" => Ok(FieldType::String),
            "int32" | "int" | "integer" | "smallinteger" | "int16" | "short" => {
                Ok(FieldType::Int32)
            }
            "int64" | "long" | "biginteger" | "oid" => Ok(FieldType::Int64),
            "double" | "number" => Ok(FieldType::Double),
            "single" | "float" => Ok(FieldType::Single),
            "decimal" => Ok(FieldType::Decimal),
            "boolean" | "bool" => Ok(FieldType::Bool),
            "datetime" | "date" => Ok(FieldType::DateTime),
            _ => Err(UnknownFieldType(trimmed.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    /// Parse a compact field spec, `"name"` or `"name;TypeName"`.
    ///
    /// A type name that cannot be resolved yields a `String` field together with the
    /// resolution error, so callers can warn and carry on.
    pub fn parse_spec(spec: &str) -> (Field, Option<UnknownFieldType>) {
        match spec.split_once(';') {
            Some((name, type_name)) => match type_name.parse::<FieldType>() {
                Ok(field_type) => (Field::new(name, field_type), None),
                Err(err) => (Field::new(name, FieldType::String), Some(err)),
            },
            None => (Field::new(spec, FieldType::String), None),
        }
    }
}

/// Ordered attribute columns shared by every feature of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    pub fields: Vec<Field>,
}

impl FieldSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Parse every spec string; unresolvable type names fall back to `String` and are
    /// returned alongside the field name.
    pub fn from_specs<S: AsRef<str>>(
        specs: &[S],
    ) -> (FieldSchema, Vec<(String, UnknownFieldType)>) {
        let mut fields = Vec::with_capacity(specs.len());
        let mut unresolved = Vec::new();
        for spec in specs {
            let (field, err) = Field::parse_spec(spec.as_ref());
            if let Some(err) = err {
                unresolved.push((field.name.clone(), err));
            }
            fields.push(field);
        }
        (FieldSchema { fields }, unresolved)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

//! Property trees: the tagged-union representation of a single piece of data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::reference::{Reference, SELF_REF, join_path};

// =============================================================================
// TEMPLATES
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    #[default]
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    String,
    Bool,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float,
    Double,
    Bytes,
    /// Untyped value whose type is only known at run time.
    #[default]
    Unknown,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Bytes => "bytes",
            ScalarType::Unknown => "unknown",
        }
    }

    /// Whether a literal JSON value fits this type. Untyped scalars take anything.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ScalarType::String | ScalarType::Bytes => value.is_string(),
            ScalarType::Bool => value.is_boolean(),
            ScalarType::Int32 | ScalarType::Int64 => value.is_i64(),
            ScalarType::Uint32 | ScalarType::Uint64 => value.is_u64(),
            ScalarType::Float | ScalarType::Double => value.is_number(),
            ScalarType::Unknown => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    #[serde(rename = "type", default)]
    pub kind: ScalarType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enum {
    pub name: String,
    #[serde(default)]
    pub keys: BTreeMap<String, i32>,
}

/// Exactly one shape per property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Scalar(Scalar),
    Message(BTreeMap<String, Property>),
    /// Element templates of a repeated value; every element shares the
    /// path of the repeated property.
    Repeated(Vec<Property>),
    Reference(Reference),
    Enum(Enum),
    OneOf(BTreeMap<String, Property>),
}

impl Template {
    pub fn type_name(&self) -> &'static str {
        match self {
            Template::Scalar(_) => "scalar",
            Template::Message(_) => "message",
            Template::Repeated(_) => "repeated",
            Template::Reference(_) => "reference",
            Template::Enum(_) => "enum",
            Template::OneOf(_) => "one_of",
        }
    }
}

// =============================================================================
// PROPERTY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub label: Label,
    #[serde(default)]
    pub position: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(flatten)]
    pub template: Template,
}

impl Property {
    pub fn new(template: Template) -> Self {
        Property {
            name: String::new(),
            path: String::new(),
            description: None,
            label: Label::Optional,
            position: 0,
            options: BTreeMap::new(),
            template,
        }
    }

    pub fn scalar(kind: ScalarType) -> Self {
        Property::new(Template::Scalar(Scalar {
            kind,
            default: None,
        }))
    }

    /// Message property; field names and positions follow iteration order.
    pub fn message<'a>(fields: impl IntoIterator<Item = (&'a str, Property)>) -> Self {
        let fields = fields
            .into_iter()
            .enumerate()
            .map(|(position, (key, mut field))| {
                field.name = key.to_string();
                field.position = position as i32 + 1;
                (key.to_string(), field)
            })
            .collect();

        let mut property = Property::new(Template::Message(fields));
        property.normalize();
        property
    }

    pub fn repeated(items: impl IntoIterator<Item = Property>) -> Self {
        Property::new(Template::Repeated(items.into_iter().collect()))
    }

    pub fn reference(reference: Reference) -> Self {
        Property::new(Template::Reference(reference))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.label = Label::Required;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        if let Template::Scalar(scalar) = &mut self.template {
            scalar.default = Some(value);
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.template.type_name()
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match &self.template {
            Template::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_reference_mut(&mut self) -> Option<&mut Reference> {
        match &mut self.template {
            Template::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn default_value(&self) -> Option<&serde_json::Value> {
        match &self.template {
            Template::Scalar(scalar) => scalar.default.as_ref(),
            _ => None,
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Property> {
        match &mut self.template {
            Template::Message(fields) | Template::OneOf(fields) => fields.values_mut().collect(),
            Template::Repeated(items) => items.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    fn children(&self) -> Vec<&Property> {
        match &self.template {
            Template::Message(fields) | Template::OneOf(fields) => fields.values().collect(),
            Template::Repeated(items) => items.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Make this property the root of its tree and recompute every path below.
    pub fn normalize(&mut self) {
        self.path.clear();
        self.assign_child_paths();
    }

    fn assign_child_paths(&mut self) {
        let base = self.path.clone();

        match &mut self.template {
            Template::Message(fields) | Template::OneOf(fields) => {
                for (key, field) in fields.iter_mut() {
                    if field.name.is_empty() {
                        field.name = key.clone();
                    }
                    field.path = join_path(&[&base, key]);
                    field.assign_child_paths();
                }
            }
            Template::Repeated(items) => {
                for item in items.iter_mut() {
                    item.path = base.clone();
                    item.assign_child_paths();
                }
            }
            _ => {}
        }
    }

    /// Find the property at `path` below (or at) this property.
    /// An empty path or `.` selects the property itself.
    pub fn lookup(&self, path: &str) -> Option<&Property> {
        if path.is_empty() || path == SELF_REF {
            return Some(self);
        }

        self.find(path)
    }

    fn find(&self, path: &str) -> Option<&Property> {
        if self.path == path {
            return Some(self);
        }

        self.children().into_iter().find_map(|child| child.find(path))
    }

    /// Merge a schema definition into this author-supplied tree.
    ///
    /// Fields missing from the tree are filled from the schema. A field the
    /// schema does not define is returned as `Err(path)`.
    pub fn define(&mut self, schema: &Property) -> Result<(), String> {
        let base = self.path.clone();
        let mut adopt_schema = false;

        match (&mut self.template, &schema.template) {
            (Template::Reference(_), _) => return Ok(()),
            (Template::Message(fields), Template::Message(defined)) => {
                for (key, field) in fields.iter_mut() {
                    let Some(definition) = defined.get(key) else {
                        return Err(join_path(&[&base, key]));
                    };
                    field.define(definition)?;
                }

                for (key, definition) in defined {
                    if !fields.contains_key(key) {
                        fields.insert(key.clone(), definition.clone());
                    }
                }
            }
            (Template::Message(fields), _) => {
                if let Some(key) = fields.keys().next() {
                    return Err(join_path(&[&base, key]));
                }
                adopt_schema = true;
            }
            (Template::Repeated(items), Template::Repeated(defined)) => {
                if let Some(element) = defined.first() {
                    for item in items.iter_mut() {
                        item.define(element)?;
                    }
                }
            }
            (Template::Scalar(scalar), Template::Scalar(definition)) => {
                if scalar.kind == ScalarType::Unknown {
                    scalar.kind = definition.kind;
                }
            }
            _ => {}
        }

        if adopt_schema {
            self.template = schema.template.clone();
        }
        self.label = schema.label;
        self.position = schema.position;
        if self.description.is_none() {
            self.description = schema.description.clone();
        }
        self.assign_child_paths();

        Ok(())
    }

    /// Visit this property and every property below it, parents first.
    /// Resolved reference targets are not descended into.
    pub fn walk_mut<E>(
        &mut self,
        visit: &mut impl FnMut(&mut Property) -> Result<(), E>,
    ) -> Result<(), E> {
        visit(self)?;
        for child in self.children_mut() {
            child.walk_mut(visit)?;
        }
        Ok(())
    }

    /// All references held in this tree.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        if let Template::Reference(reference) = &self.template {
            out.push(reference);
        }
        for child in self.children() {
            child.collect_references(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn greeting() -> Property {
        Property::message([
            ("name", Property::scalar(ScalarType::String).required()),
            (
                "address",
                Property::message([("city", Property::scalar(ScalarType::String))]),
            ),
        ])
    }

    #[test]
    fn message_assigns_nested_paths() {
        let property = greeting();
        assert_eq!(property.lookup("address.city").unwrap().name, "city");
        assert_eq!(property.lookup("name").unwrap().label, Label::Required);
        assert!(property.lookup("address.zip").is_none());
    }

    #[test]
    fn self_path_selects_root() {
        let property = greeting();
        assert_eq!(property.lookup(".").unwrap().type_name(), "message");
        assert_eq!(property.lookup("").unwrap().type_name(), "message");
    }

    #[test]
    fn repeated_elements_share_parent_path() {
        let mut property = Property::message([(
            "items",
            Property::repeated([Property::message([("sku", Property::scalar(ScalarType::String))])]),
        )]);
        property.normalize();
        assert_eq!(property.lookup("items.sku").unwrap().name, "sku");
    }

    #[test]
    fn define_fills_missing_fields() {
        let mut authored = Property::message([(
            "name",
            Property::scalar(ScalarType::Unknown).with_default(json!("world")),
        )]);

        authored.define(&greeting()).unwrap();

        let name = authored.lookup("name").unwrap();
        assert_eq!(name.default_value(), Some(&json!("world")));
        assert_eq!(name.label, Label::Required);
        assert!(authored.lookup("address.city").is_some());
    }

    #[test]
    fn define_rejects_unknown_fields() {
        let mut authored = Property::message([(
            "address",
            Property::message([("zip", Property::scalar(ScalarType::String))]),
        )]);

        assert_eq!(authored.define(&greeting()), Err("address.zip".to_string()));
    }

    #[test]
    fn walk_does_not_enter_reference_targets() {
        let mut reference = Reference::new("input", "name");
        reference.target = Some(Box::new(greeting()));
        let mut property = Property::message([("echo", Property::reference(reference))]);

        let mut visited = 0;
        property
            .walk_mut(&mut |_: &mut Property| -> Result<(), ()> {
                visited += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(visited, 2);
        assert_eq!(property.references().len(), 1);
    }
}

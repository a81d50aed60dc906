// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schema index: named content types extracted from schema-definition sources
//!
//! Two shapes are recognised, both carrying a string `name`, a string `type`
//! and an array `fields`:
//! - `defineType({ ... })`
//! - `export default { ... }`
//!
//! Anything that cannot be resolved statically marks the owning type
//! `partial` instead of failing the file.

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::model::{SchemaKind, SchemaType, StepResult, StepStatus};
use crate::scanner::SourceFile;

const TYPE_DEFINITION_CALLS: &[&str] = &["defineType"];
const FIELD_DEFINITION_CALLS: &[&str] = &["defineField", "defineArrayMember"];

/// All schema types discovered across the scanned schema files
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    pub types: BTreeMap<String, SchemaType>,
}

impl SchemaIndex {
    pub fn build(files: &[&SourceFile]) -> Result<Self> {
        let per_file: Vec<Vec<SchemaType>> = files
            .par_iter()
            .map(|file| extract_types(&file.text, &file.display, is_tsx(&file.relative)))
            .collect::<Result<_>>()?;

        let mut index = Self::default();
        for schema_type in per_file.into_iter().flatten() {
            index.insert(schema_type);
        }
        debug!("Schema index holds {} types", index.types.len());
        Ok(index)
    }

    /// Insert, unioning with any earlier discovery of the same name
    pub fn insert(&mut self, schema_type: SchemaType) {
        match self.types.get_mut(&schema_type.name) {
            Some(existing) => existing.merge(schema_type),
            None => {
                self.types.insert(schema_type.name.clone(), schema_type);
            }
        }
    }

    /// Every field name declared by any type
    pub fn field_union(&self) -> BTreeSet<String> {
        self.types.values().flat_map(|t| t.fields.iter().cloned()).collect()
    }

    pub fn documents(&self) -> impl Iterator<Item = &SchemaType> {
        self.types.values().filter(|t| t.kind == SchemaKind::Document)
    }

    pub fn to_step_result(&self, step: &str) -> StepResult {
        let partial: Vec<&str> = self
            .types
            .values()
            .filter(|t| t.partial)
            .map(|t| t.name.as_str())
            .collect();
        let status = if self.types.is_empty() {
            StepStatus::Warn
        } else {
            StepStatus::Pass
        };
        StepResult::new(
            step,
            status,
            false,
            json!({
                "types": self.types,
                "stats": {
                    "typeCount": self.types.len(),
                    "fieldCount": self.field_union().len(),
                    "partialTypes": partial,
                },
            }),
        )
    }
}

fn is_tsx(relative: &str) -> bool {
    relative.ends_with(".tsx") || relative.ends_with(".jsx")
}

fn new_parser(tsx: bool) -> Result<Parser> {
    let mut parser = Parser::new();
    let language = if tsx {
        tree_sitter_typescript::LANGUAGE_TSX
    } else {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT
    };
    parser
        .set_language(&language.into())
        .map_err(|e| anyhow!("Failed to set schema parser language: {}", e))?;
    Ok(parser)
}

/// Extract every schema type declared in one source text.
///
/// Fails only if the parser itself cannot be constructed.
pub fn extract_types(source: &str, file: &str, tsx: bool) -> Result<Vec<SchemaType>> {
    let mut parser = new_parser(tsx)?;
    let Some(tree) = parser.parse(source, None) else {
        debug!("Parser produced no tree for {}", file);
        return Ok(Vec::new());
    };

    let src = source.as_bytes();
    let mut found = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        match node.kind() {
            "call_expression" if is_call_to(node, src, TYPE_DEFINITION_CALLS) => {
                if let Some(object) = first_object_argument(node) {
                    if let Some(schema_type) = read_type(object, src, file) {
                        found.push(schema_type);
                    }
                }
            }
            "export_statement" if has_default_keyword(node) => {
                if let Some(object) = node.child_by_field_name("value").and_then(unwrap_object) {
                    if let Some(schema_type) = read_type(object, src, file) {
                        found.push(schema_type);
                    }
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

fn has_default_keyword(node: Node) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == "default");
    found
}

fn text<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn is_call_to(call: Node, src: &[u8], names: &[&str]) -> bool {
    let Some(function) = call.child_by_field_name("function") else {
        return false;
    };
    let callee = text(function, src);
    let last = callee.rsplit('.').next().unwrap_or(callee);
    names.contains(&last)
}

fn first_object_argument(call: Node) -> Option<Node> {
    let arguments = call.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    let first = arguments.named_children(&mut cursor).find(|c| c.kind() != "comment")?;
    unwrap_object(first)
}

/// Peel `( ... )`, `... as T` and `... satisfies T` down to an object literal
fn unwrap_object(node: Node) -> Option<Node> {
    match node.kind() {
        "object" => Some(node),
        "parenthesized_expression" | "as_expression" | "satisfies_expression" => {
            let mut cursor = node.walk();
            let inner = node.named_children(&mut cursor).next()?;
            unwrap_object(inner)
        }
        _ => None,
    }
}

/// `key -> value` for the plain pairs of an object literal
fn properties<'t>(object: Node<'t>, src: &[u8]) -> BTreeMap<String, Node<'t>> {
    let mut props = BTreeMap::new();
    let mut cursor = object.walk();
    for child in object.named_children(&mut cursor) {
        if child.kind() != "pair" {
            continue;
        }
        let (Some(key), Some(value)) = (child.child_by_field_name("key"), child.child_by_field_name("value")) else {
            continue;
        };
        let key = match key.kind() {
            "property_identifier" | "number" => text(key, src).to_string(),
            "string" => strip_quotes(text(key, src)),
            _ => continue,
        };
        props.insert(key, value);
    }
    props
}

fn strip_quotes(raw: &str) -> String {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

fn string_value(node: Node, src: &[u8]) -> Option<String> {
    match node.kind() {
        "string" => Some(strip_quotes(text(node, src))),
        "template_string" => {
            let mut cursor = node.walk();
            let interpolated = node
                .named_children(&mut cursor)
                .any(|c| c.kind() == "template_substitution");
            (!interpolated).then(|| strip_quotes(text(node, src)))
        }
        _ => None,
    }
}

fn read_type(object: Node, src: &[u8], file: &str) -> Option<SchemaType> {
    let props = properties(object, src);
    let name = string_value(*props.get("name")?, src)?;
    let type_name = string_value(*props.get("type")?, src)?;
    let fields = props.get("fields")?;

    let kind = if type_name == "document" {
        SchemaKind::Document
    } else {
        SchemaKind::Object
    };
    let mut schema_type = SchemaType::new(name, kind, file);

    if fields.kind() != "array" {
        debug!("{}: fields of '{}' are not an array literal", file, schema_type.name);
        schema_type.partial = true;
        return Some(schema_type);
    }

    let mut cursor = fields.walk();
    for element in fields.named_children(&mut cursor) {
        let field_object = match element.kind() {
            "comment" => continue,
            "object" => Some(element),
            "call_expression" if is_call_to(element, src, FIELD_DEFINITION_CALLS) => {
                first_object_argument(element)
            }
            _ => None,
        };

        let Some(field_object) = field_object else {
            schema_type.partial = true;
            continue;
        };

        match read_field(field_object, src) {
            Some(field) => {
                if field.composite {
                    schema_type.partial = true;
                }
                schema_type.add_field(field.name, field.required);
            }
            None => schema_type.partial = true,
        }
    }

    Some(schema_type)
}

struct FieldShape {
    name: String,
    required: bool,
    composite: bool,
}

fn read_field(object: Node, src: &[u8]) -> Option<FieldShape> {
    let props = properties(object, src);
    let name = string_value(*props.get("name")?, src)?;
    let required = props
        .get("validation")
        .map(|v| text(*v, src).contains("required"))
        .unwrap_or(false);
    let composite = props.get("fields").map(|f| contains_object(*f)).unwrap_or(false);
    Some(FieldShape {
        name,
        required,
        composite,
    })
}

fn contains_object(node: Node) -> bool {
    if node.kind() == "object" {
        return true;
    }
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).any(contains_object);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_SCHEMA: &str = r#"
import { defineField, defineType } from 'sanity'

export const order = defineType({
  name: 'order',
  title: 'Order',
  type: 'document',
  fields: [
    defineField({ name: 'status', type: 'string', validation: (Rule) => Rule.required() }),
    defineField({ name: 'total', type: 'number' }),
    { name: 'stripeSessionId', type: 'string' },
  ],
})
"#;

    #[test]
    fn test_define_type_call() {
        let types = extract_types(ORDER_SCHEMA, "studio/schemas/order.ts", false).unwrap();
        assert_eq!(types.len(), 1);
        let order = &types[0];
        assert_eq!(order.name, "order");
        assert_eq!(order.kind, SchemaKind::Document);
        let fields: Vec<_> = order.fields.iter().map(String::as_str).collect();
        assert_eq!(fields, vec!["status", "stripeSessionId", "total"]);
        assert!(order.required.contains("status"));
        assert_eq!(order.required.len(), 1);
        assert!(!order.partial);
    }

    #[test]
    fn test_export_default_object() {
        let source = r#"
export default {
  name: 'address',
  type: 'object',
  fields: [
    { name: 'line1', type: 'string', validation: Rule => Rule.required().min(2) },
    { name: 'city', type: 'string' },
  ],
}
"#;
        let types = extract_types(source, "studio/schemas/address.js", false).unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].kind, SchemaKind::Object);
        assert!(types[0].required.contains("line1"));
    }

    #[test]
    fn test_unresolvable_elements_mark_partial() {
        let source = r#"
import { sharedFields } from './shared'
export default defineType({
  name: 'customer',
  type: 'document',
  fields: [
    ...sharedFields,
    { name: 'email', type: 'string' },
    {
      name: 'shipping',
      type: 'object',
      fields: [{ name: 'street', type: 'string' }],
    },
  ],
})
"#;
        let types = extract_types(source, "studio/schemas/customer.ts", false).unwrap();
        assert_eq!(types.len(), 1);
        let customer = &types[0];
        assert!(customer.partial);
        assert!(customer.fields.contains("email"));
        assert!(customer.fields.contains("shipping"));
        assert!(!customer.fields.contains("street"));
    }

    #[test]
    fn test_non_literal_fields_still_register_type() {
        let source = "export default defineType({ name: 'product', type: 'document', fields: productFields })";
        let types = extract_types(source, "s/product.ts", false).unwrap();
        assert_eq!(types.len(), 1);
        assert!(types[0].partial);
        assert!(types[0].fields.is_empty());
    }

    #[test]
    fn test_malformed_source_does_not_fail() {
        let source = "export default defineType({ name: 'broken', type: 'document', fields: [ { name: 'a' ";
        assert!(extract_types(source, "s/broken.ts", false).is_ok());
    }

    #[test]
    fn test_index_merges_across_files() {
        let a = SourceFile::new(
            "studio",
            "schemas/order.ts",
            "export default { name: 'order', type: 'document', fields: [{ name: 'status', validation: r => r.required() }] }",
        );
        let b = SourceFile::new(
            "studio",
            "schemas/orderExtra.ts",
            "export const x = defineType({ name: 'order', type: 'document', fields: [{ name: 'total' }] })",
        );
        let index = SchemaIndex::build(&[&a, &b]).unwrap();
        let order = &index.types["order"];
        let fields: Vec<_> = order.fields.iter().map(String::as_str).collect();
        assert_eq!(fields, vec!["status", "total"]);
        assert!(order.required.is_subset(&order.fields));
        assert_eq!(order.sources.len(), 2);
    }
}

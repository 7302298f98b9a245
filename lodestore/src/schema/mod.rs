//! Per-context type tables, display names, and choice lists for options
//! properties. Contexts are element-type names; every property lookup that
//! interprets raw bytes goes through this module.

pub mod types;

pub use types::{AttributeDef, BranchDef, ChoiceDef, ContextDefinition, SchemaDefinition};

use crate::codec;
use crate::codec::PropKind;
use crate::element::Element;
use crate::error::{LodestoreError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Parse a schema YAML file.
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string. Beyond YAML shape, every options attribute
/// must declare a choice source: either an unconditional choice list or a
/// `depends_on` property with branches.
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let def: SchemaDefinition = serde_yaml::from_str(content)?;
    for (context, ctx) in &def.contexts {
        validate_attributes(context, &ctx.attributes)?;
    }
    Ok(def)
}

fn validate_attributes(context: &str, attributes: &HashMap<String, AttributeDef>) -> Result<()> {
    for (name, attr) in attributes {
        if attr.kind == PropKind::Options && attr.choices.is_none() && attr.depends_on.is_none() {
            return Err(LodestoreError::Schema(format!(
                "options property '{name}' in context '{context}' declares neither choices nor depends_on"
            )));
        }
        if attr.depends_on.is_some() && attr.branches.is_empty() {
            return Err(LodestoreError::Schema(format!(
                "property '{name}' in context '{context}' depends on another property but has no branches"
            )));
        }
        for branch in &attr.branches {
            validate_attributes(context, &branch.attributes)?;
        }
    }
    Ok(())
}

/// Resolved schema lookup API over a parsed definition.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    def: SchemaDefinition,
}

impl Schema {
    pub fn new(def: SchemaDefinition) -> Self {
        Schema { def }
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        Ok(Schema::new(parse_schema_str(content)?))
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.def
    }

    /// The context's attribute table, or an error for an unknown context.
    pub fn context(&self, context: &str) -> Result<&ContextDefinition> {
        self.def
            .contexts
            .get(context)
            .ok_or_else(|| LodestoreError::UnknownContext {
                context: context.to_string(),
            })
    }

    pub fn has_context(&self, context: &str) -> bool {
        self.def.contexts.contains_key(context)
    }

    /// Declared kind of a property within a context. Searches the context's
    /// attribute table and any attributes nested inside branch declarations.
    /// Unknown contexts and unknown properties both resolve to None: they
    /// are silent no-matches in queries, not structural errors.
    pub fn kind_of(&self, context: &str, prop: &str) -> Option<PropKind> {
        let ctx = self.def.contexts.get(context)?;
        find_attribute(&ctx.attributes, prop).map(|a| a.kind)
    }

    /// Declared properties of a context, branch-nested attributes included.
    pub fn prop_names(&self, context: &str) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(ctx) = self.def.contexts.get(context) {
            collect_names(&ctx.attributes, &mut names);
        }
        names.sort();
        names.dedup();
        names
    }

    /// Display name of a property. Unknown properties are a schema error.
    pub fn display_name(&self, context: &str, prop: &str) -> Result<String> {
        let ctx = self.context(context)?;
        let attr = find_attribute(&ctx.attributes, prop).ok_or_else(|| {
            LodestoreError::Schema(format!("Unknown property '{prop}' in context '{context}'"))
        })?;
        Ok(attr.name.clone().unwrap_or_else(|| prop.to_string()))
    }

    /// Resolve the choice list for an options property against the element's
    /// current properties. Unconditional choices win; otherwise the branch
    /// whose guard equals the source property's current string value is
    /// selected. No match resolves to an empty list.
    pub fn choices(&self, context: &str, prop: &str, element: &Element) -> Vec<ChoiceDef> {
        let Some(ctx) = self.def.contexts.get(context) else {
            return Vec::new();
        };
        let Some(attr) = find_attribute(&ctx.attributes, prop) else {
            return Vec::new();
        };

        if let Some(choices) = &attr.choices {
            return choices.clone();
        }

        let Some(source) = &attr.depends_on else {
            return Vec::new();
        };
        let Some(source_bytes) = element.prop(source) else {
            return Vec::new();
        };
        let source_kind = self.kind_of(context, source).unwrap_or(PropKind::Text);
        let current = codec::render(source_kind, source_bytes);

        attr.branches
            .iter()
            .find(|b| b.when == current)
            .map(|b| b.choices.clone())
            .unwrap_or_default()
    }

    /// Display label for a chosen value. Looking up a value that is not
    /// among the resolved choices is an error.
    pub fn choice_label(
        &self,
        context: &str,
        prop: &str,
        value: &str,
        element: &Element,
    ) -> Result<String> {
        self.choices(context, prop, element)
            .iter()
            .find(|c| c.value() == value)
            .map(|c| c.label().to_string())
            .ok_or_else(|| {
                LodestoreError::Schema(format!(
                    "Value '{value}' is not among the resolved choices for '{prop}' in context '{context}'"
                ))
            })
    }
}

fn find_attribute<'a>(
    attributes: &'a std::collections::HashMap<String, AttributeDef>,
    prop: &str,
) -> Option<&'a AttributeDef> {
    if let Some(attr) = attributes.get(prop) {
        return Some(attr);
    }
    for attr in attributes.values() {
        for branch in &attr.branches {
            if let Some(found) = find_attribute(&branch.attributes, prop) {
                return Some(found);
            }
        }
    }
    None
}

fn collect_names(
    attributes: &std::collections::HashMap<String, AttributeDef>,
    out: &mut Vec<String>,
) {
    for (name, attr) in attributes {
        out.push(name.clone());
        for branch in &attr.branches {
            collect_names(&branch.attributes, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Prop;
    use pretty_assertions::assert_eq;

    fn bike_schema() -> Schema {
        Schema::parse_str(
            r#"
contexts:
  bike:
    attributes:
      Name: { type: text, name: "Name" }
      MaxSpeed: { type: integer, name: "Maximum speed" }
      Kind:
        type: options
        name: "Kind"
        choices: [road, mountain]
      Gears:
        type: options
        name: "Gears"
        depends_on: Kind
        branches:
          - when: road
            choices:
              - { value: "18", name: "18-speed" }
              - { value: "22", name: "22-speed" }
          - when: mountain
            choices: ["21", "24"]
            attributes:
              Suspension: { type: switch, name: "Full suspension" }
"#,
        )
        .unwrap()
    }

    fn road_bike() -> Element {
        Element::new(
            "1",
            vec![Prop::text("Name", "Viper"), Prop::text("Kind", "road")],
        )
    }

    #[test]
    fn kind_lookup() {
        let schema = bike_schema();
        assert_eq!(schema.kind_of("bike", "MaxSpeed"), Some(PropKind::Integer));
        assert_eq!(schema.kind_of("bike", "Name"), Some(PropKind::Text));
        assert_eq!(schema.kind_of("bike", "Missing"), None);
        assert_eq!(schema.kind_of("car", "Name"), None);
    }

    #[test]
    fn kind_lookup_reaches_branch_attributes() {
        let schema = bike_schema();
        assert_eq!(schema.kind_of("bike", "Suspension"), Some(PropKind::Switch));
    }

    #[test]
    fn options_without_a_choice_source_is_rejected() {
        let result = Schema::parse_str(
            r#"
contexts:
  bike:
    attributes:
      Kind: { type: options }
"#,
        );
        assert!(matches!(result, Err(LodestoreError::Schema(_))));
    }

    #[test]
    fn depends_on_without_branches_is_rejected() {
        let result = Schema::parse_str(
            r#"
contexts:
  bike:
    attributes:
      Kind: { type: options, choices: [road, mountain] }
      Gears: { type: options, depends_on: Kind }
"#,
        );
        assert!(matches!(result, Err(LodestoreError::Schema(_))));
    }

    #[test]
    fn branch_nested_attributes_are_validated_too() {
        let result = Schema::parse_str(
            r#"
contexts:
  bike:
    attributes:
      Kind: { type: options, choices: [road, mountain] }
      Gears:
        type: options
        depends_on: Kind
        branches:
          - when: mountain
            choices: ["21"]
            attributes:
              Lockout: { type: options }
"#,
        );
        assert!(matches!(result, Err(LodestoreError::Schema(_))));
    }

    #[test]
    fn unknown_context_is_an_error() {
        let schema = bike_schema();
        assert!(matches!(
            schema.context("car"),
            Err(LodestoreError::UnknownContext { .. })
        ));
    }

    #[test]
    fn display_names() {
        let schema = bike_schema();
        assert_eq!(schema.display_name("bike", "MaxSpeed").unwrap(), "Maximum speed");
        assert!(schema.display_name("bike", "Missing").is_err());
    }

    #[test]
    fn unconditional_choices_win() {
        let schema = bike_schema();
        let choices = schema.choices("bike", "Kind", &road_bike());
        let values: Vec<&str> = choices.iter().map(|c| c.value()).collect();
        assert_eq!(values, vec!["road", "mountain"]);
    }

    #[test]
    fn depending_choices_follow_source_value() {
        let schema = bike_schema();

        let road = road_bike();
        let values: Vec<String> = schema
            .choices("bike", "Gears", &road)
            .iter()
            .map(|c| c.value().to_string())
            .collect();
        assert_eq!(values, vec!["18", "22"]);

        let mountain = Element::new("2", vec![Prop::text("Kind", "mountain")]);
        let values: Vec<String> = schema
            .choices("bike", "Gears", &mountain)
            .iter()
            .map(|c| c.value().to_string())
            .collect();
        assert_eq!(values, vec!["21", "24"]);
    }

    #[test]
    fn no_branch_match_resolves_empty() {
        let schema = bike_schema();
        let odd = Element::new("3", vec![Prop::text("Kind", "tandem")]);
        assert!(schema.choices("bike", "Gears", &odd).is_empty());

        let sourceless = Element::new("4", vec![Prop::text("Name", "Viper")]);
        assert!(schema.choices("bike", "Gears", &sourceless).is_empty());
    }

    #[test]
    fn choice_label_lookup() {
        let schema = bike_schema();
        let road = road_bike();
        assert_eq!(
            schema.choice_label("bike", "Gears", "18", &road).unwrap(),
            "18-speed"
        );
    }

    #[test]
    fn choice_label_outside_resolved_choices_is_an_error() {
        let schema = bike_schema();
        let road = road_bike();
        // "21" is a mountain choice; the element is a road bike.
        assert!(schema.choice_label("bike", "Gears", "21", &road).is_err());
    }
}

//! Template Module for Zenith Runtime
//!
//! Templates arrive from the markup layer as `TemplateSource` trees (already
//! parsed, bindings still as attribute strings). Materialization turns them
//! into `TemplateNode`s once per definition: every attribute is parsed into
//! a `Binding` and validated against the declaring definition.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::Application;
use crate::binding::Binding;
use crate::definition::ComponentDefinition;
use crate::error::{RuntimeError, RuntimeResult};
use crate::reference::ComponentReference;
use crate::validate::{
    ValidationRecord, VAL_MISSING_CONTENT, VAL_REQUIRED_BINDING, VAL_UNSUPPORTED_BINDING,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TemplateSource {
    Text {
        text: String,
    },
    Component {
        name: String,
        #[serde(default)]
        bindings: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<TemplateSource>,
    },
    /// Where the occurrence's own body goes.
    Content,
}

impl TemplateSource {
    pub fn text(text: &str) -> Self {
        TemplateSource::Text {
            text: text.to_string(),
        }
    }

    pub fn component(name: &str, bindings: &[(&str, &str)], children: Vec<TemplateSource>) -> Self {
        TemplateSource::Component {
            name: name.to_string(),
            bindings: bindings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children,
        }
    }

    pub fn parse_list(json: &str) -> RuntimeResult<Vec<TemplateSource>> {
        serde_json::from_str(json).map_err(|e| RuntimeError::Parse {
            text: json.chars().take(80).collect(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug)]
pub enum TemplateNode {
    Text(String),
    Component(Arc<ComponentReference>),
    Content,
}

#[derive(Debug, Default)]
pub struct Template {
    nodes: Vec<TemplateNode>,
}

impl Template {
    pub fn new(nodes: Vec<TemplateNode>) -> Self {
        Template { nodes }
    }

    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Every occurrence in this template, bodies included, in walk order.
    pub fn references(&self) -> Vec<Arc<ComponentReference>> {
        let mut found = Vec::new();
        collect_references(&self.nodes, &mut found);
        found
    }
}

fn collect_references(nodes: &[TemplateNode], found: &mut Vec<Arc<ComponentReference>>) {
    for node in nodes {
        if let TemplateNode::Component(reference) = node {
            found.push(reference.clone());
            collect_references(reference.body(), found);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MATERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds the nodes of `owner`'s template. Unknown component names and
/// unparsable attributes are fatal; binding problems are reported to the
/// application's validation context.
pub(crate) fn materialize(
    owner: &ComponentDefinition,
    sources: &[TemplateSource],
    app: &Application,
) -> RuntimeResult<Vec<TemplateNode>> {
    let env = app.parse_env();
    let static_exists = |name: &str| app.has_static(name);
    let mut nodes = Vec::with_capacity(sources.len());

    for source in sources {
        match source {
            TemplateSource::Text { text } => nodes.push(TemplateNode::Text(text.clone())),
            TemplateSource::Content => nodes.push(TemplateNode::Content),
            TemplateSource::Component {
                name,
                bindings,
                children,
            } => {
                let definition = app.definition(name)?;
                let mut parsed = BTreeMap::new();
                for (binding_name, attribute) in bindings {
                    let binding = Binding::parse(attribute, &env)?;
                    binding.validate(
                        definition.requirements().direction(binding_name),
                        owner,
                        binding_name,
                        &static_exists,
                        app.validation(),
                    )?;
                    parsed.insert(binding_name.clone(), Arc::new(binding));
                }
                check_requirements(owner, &definition, &parsed, app)?;

                let body = materialize(owner, children, app)?;
                if definition.requirements().requires_content && body.is_empty() {
                    app.validation().report(ValidationRecord::new(
                        VAL_MISSING_CONTENT,
                        &format!("<{}> requires content", definition.name()),
                        owner.name(),
                        None,
                    ))?;
                }

                let location = format!("<{}> in <{}>", definition.name(), owner.name());
                nodes.push(TemplateNode::Component(Arc::new(ComponentReference::new(
                    definition, parsed, body, location,
                ))));
            }
        }
    }
    Ok(nodes)
}

fn check_requirements(
    owner: &ComponentDefinition,
    definition: &ComponentDefinition,
    bindings: &BTreeMap<String, Arc<Binding>>,
    app: &Application,
) -> RuntimeResult<()> {
    let requirements = definition.requirements();
    for required in &requirements.required {
        if !bindings.contains_key(required) {
            app.validation().report(ValidationRecord::new(
                VAL_REQUIRED_BINDING,
                &format!("<{}> requires binding '{}'", definition.name(), required),
                owner.name(),
                Some(required),
            ))?;
        }
    }
    for name in bindings.keys() {
        if !requirements.is_supported(name) {
            app.validation().report(ValidationRecord::new(
                VAL_UNSUPPORTED_BINDING,
                &format!("<{}> does not support binding '{}'", definition.name(), name),
                owner.name(),
                Some(name),
            ))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_json() {
        let sources = TemplateSource::parse_list(
            r#"[
                {"type": "text", "text": "<h1>"},
                {"type": "component", "name": "String", "bindings": {"value": "$title"}},
                {"type": "content"}
            ]"#,
        )
        .unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(
            sources[1],
            TemplateSource::component("String", &[("value", "$title")], vec![])
        );
        assert_eq!(sources[2], TemplateSource::Content);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            TemplateSource::parse_list(r#"[{"type": "widget"}]"#),
            Err(RuntimeError::Parse { .. })
        ));
    }
}

//! Tool catalog records.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool as McpTool};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::tools::handler::Handler;
use crate::types::{PermissionTag, ToolName};

/// Everything the registry needs to know about one tool.
///
/// Immutable once registered; only the entry's `enabled` flag changes.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    /// Optional human-readable title for discovery UIs
    pub title: Option<String>,
    pub description: String,
    /// JSON Schema object describing accepted parameters
    pub parameter_schema: JsonObject,
    pub permission: PermissionTag,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    /// Initial enablement requested at registration
    pub enabled: bool,
    pub handler: Handler,
}

impl ToolSpec {
    /// Create a public, enabled tool accepting any object.
    pub fn new(name: impl Into<ToolName>, description: impl Into<String>, handler: Handler) -> Self {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));
        Self {
            name: name.into(),
            title: None,
            description: description.into(),
            parameter_schema: schema,
            permission: PermissionTag::Public,
            category: None,
            tags: BTreeSet::new(),
            enabled: true,
            handler,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_schema(mut self, schema: JsonObject) -> Self {
        self.parameter_schema = schema;
        self
    }

    pub fn with_permission(mut self, permission: PermissionTag) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Register the tool in the disabled state.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Handler-free view of this spec.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            parameter_schema: self.parameter_schema.clone(),
            permission: self.permission,
            category: self.category.clone(),
            tags: self.tags.clone(),
            streaming: self.handler.is_streaming(),
        }
    }
}

/// Serializable description of an enabled tool, for discovery surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: ToolName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub parameter_schema: JsonObject,
    pub permission: PermissionTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Whether the tool can emit partial results
    pub streaming: bool,
}

impl ToolDescriptor {
    /// Converts this descriptor to an `McpTool` for use in `list_tools`.
    pub fn to_mcp_tool(&self) -> McpTool {
        let mut tool = McpTool::new(
            Cow::Owned(self.name.to_string()),
            Cow::Owned(self.description.clone()),
            Arc::new(self.parameter_schema.clone()),
        );
        tool.title = self.title.clone();
        tool
    }
}

/// Criteria for [`ToolRegistry::enumerate`](crate::tools::ToolRegistry::enumerate).
///
/// Every criterion that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ToolFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub permission: Option<PermissionTag>,
}

impl ToolFilter {
    pub fn matches(&self, spec: &ToolSpec) -> bool {
        if let Some(category) = &self.category
            && spec.category.as_deref() != Some(category.as_str())
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !spec.tags.contains(tag)
        {
            return false;
        }
        if let Some(permission) = self.permission
            && spec.permission != permission
        {
            return false;
        }
        true
    }
}

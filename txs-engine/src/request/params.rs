// Typed operation parameters
// Built from the resolved parameter tree right before dispatch

use crate::registry::domain::ScopeKey;
use crate::request::models::Verb;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

fn default_true() -> bool {
    true
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Parent identifiers accepted next to `id` on get/update/delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<Uuid>,
}

impl ScopeIds {
    pub fn get(&self, key: ScopeKey) -> Option<Uuid> {
        match key {
            ScopeKey::Org => self.org_id,
            ScopeKey::Team => self.team_id,
            ScopeKey::Task => self.task_id,
            ScopeKey::Feature => self.feature_id,
            ScopeKey::Project => self.project_id,
            ScopeKey::Sprint => self.sprint_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateParams {
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetParams {
    pub id: Uuid,
    #[serde(flatten)]
    pub scope: ScopeIds,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriteria {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl Pagination {
    pub fn validate(&self) -> Result<(), String> {
        if self.page < 1 {
            return Err(format!("page must be >= 1, got {}", self.page));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            ));
        }
        Ok(())
    }

    /// Number of rows skipped before this page
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.page_size as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortCriteria>,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateParams {
    pub id: Uuid,
    #[serde(flatten)]
    pub scope: ScopeIds,
    pub data: Map<String, Value>,
    /// Partial updates merge `data`; full updates replace every payload field
    #[serde(default = "default_true")]
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteParams {
    pub id: Uuid,
    #[serde(flatten)]
    pub scope: ScopeIds,
    #[serde(default = "default_true")]
    pub soft_delete: bool,
}

/// Concrete, typed parameters handed to an operation handler
#[derive(Debug, Clone, PartialEq)]
pub enum OperationParams {
    Create(CreateParams),
    Get(GetParams),
    List(ListParams),
    Update(UpdateParams),
    Delete(DeleteParams),
}

impl OperationParams {
    /// Type a fully resolved parameter tree for the given verb
    pub fn from_value(verb: Verb, value: Value) -> Result<Self, String> {
        let value = match value {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let params = match verb {
            Verb::Create => serde_json::from_value(value).map(OperationParams::Create),
            Verb::Get => serde_json::from_value(value).map(OperationParams::Get),
            Verb::List => serde_json::from_value(value).map(OperationParams::List),
            Verb::Update => serde_json::from_value(value).map(OperationParams::Update),
            Verb::Delete => serde_json::from_value(value).map(OperationParams::Delete),
        }
        .map_err(|e| format!("invalid {} parameters: {}", verb, e))?;

        if let OperationParams::List(list) = &params {
            list.pagination.validate()?;
        }

        Ok(params)
    }

    pub fn verb(&self) -> Verb {
        match self {
            OperationParams::Create(_) => Verb::Create,
            OperationParams::Get(_) => Verb::Get,
            OperationParams::List(_) => Verb::List,
            OperationParams::Update(_) => Verb::Update,
            OperationParams::Delete(_) => Verb::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORG: &str = "7f1b1d1a-2222-4c1e-9a57-000000000001";
    const ROW: &str = "7f1b1d1a-2222-4c1e-9a57-0000000000aa";

    #[test]
    fn test_get_params_with_scope() {
        let params =
            OperationParams::from_value(Verb::Get, json!({"id": ROW, "org_id": ORG, "fields": ["name"]}))
                .unwrap();

        match params {
            OperationParams::Get(get) => {
                assert_eq!(get.id.to_string(), ROW);
                assert_eq!(get.scope.get(ScopeKey::Org).unwrap().to_string(), ORG);
                assert_eq!(get.scope.get(ScopeKey::Team), None);
                assert_eq!(get.fields, vec!["name".to_string()]);
            }
            other => panic!("expected get params, got {:?}", other),
        }
    }

    #[test]
    fn test_update_and_delete_defaults() {
        let update = OperationParams::from_value(Verb::Update, json!({"id": ROW, "data": {"name": "x"}})).unwrap();
        let delete = OperationParams::from_value(Verb::Delete, json!({"id": ROW})).unwrap();

        assert!(matches!(update, OperationParams::Update(UpdateParams { partial: true, .. })));
        assert!(matches!(delete, OperationParams::Delete(DeleteParams { soft_delete: true, .. })));
    }

    #[test]
    fn test_list_defaults() {
        let params = OperationParams::from_value(Verb::List, Value::Null).unwrap();
        match params {
            OperationParams::List(list) => {
                assert_eq!(list.pagination, Pagination::default());
                assert_eq!(list.pagination.page_size, DEFAULT_PAGE_SIZE);
                assert!(list.filters.is_empty());
            }
            other => panic!("expected list params, got {:?}", other),
        }
    }

    #[test]
    fn test_list_rejects_oversized_page() {
        let err = OperationParams::from_value(
            Verb::List,
            json!({"pagination": {"page": 1, "page_size": 5000}}),
        )
        .unwrap_err();
        assert!(err.contains("page_size"));
    }

    #[test]
    fn test_invalid_uuid_is_rejected() {
        let err = OperationParams::from_value(Verb::Get, json!({"id": "T1"})).unwrap_err();
        assert!(err.starts_with("invalid get parameters"));
    }

    #[test]
    fn test_pagination_offset() {
        let page = Pagination { page: 3, page_size: 20 };
        assert_eq!(page.offset(), 40);
        assert!(page.validate().is_ok());
        assert!(Pagination { page: 0, page_size: 20 }.validate().is_err());
    }

    #[test]
    fn test_sort_direction_parsing() {
        let params = OperationParams::from_value(
            Verb::List,
            json!({"sort": [{"field": "name"}, {"field": "created", "direction": "desc"}]}),
        )
        .unwrap();
        let OperationParams::List(list) = params else {
            panic!("expected list params");
        };
        assert_eq!(list.sort[0].direction, SortDirection::Asc);
        assert_eq!(list.sort[1].direction, SortDirection::Desc);
    }
}

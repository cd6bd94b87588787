// Request validator
// Shape checks that reject a whole request before anything executes

use crate::reference::whole_reference;
use crate::registry::domain::DomainObject;
use crate::request::error::{RequestError, RequestResult, ValidationIssue};
use crate::request::models::{is_valid_id, OpKey, Operation, TransactionGroup, TransactionsRequest, Verb};
use crate::request::params::MAX_PAGE_SIZE;

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Validator for parsed transaction requests
pub struct RequestValidator;

impl RequestValidator {
    /// Validate ids, structure and the reference-independent parameter shapes
    pub fn validate(request: &TransactionsRequest) -> RequestResult<()> {
        Self::check_unique_ids(request)?;

        let mut issues = Vec::new();

        if request.transactions.is_empty() {
            issues.push(ValidationIssue::new(
                "request must contain at least one transaction group",
                "transactions",
            ));
        }

        for (i, group) in request.transactions.iter().enumerate() {
            Self::validate_group(group, &format!("transactions[{}]", i), &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(RequestError::Invalid(issues))
        }
    }

    fn check_unique_ids(request: &TransactionsRequest) -> RequestResult<()> {
        let mut groups = HashSet::new();
        for group in &request.transactions {
            if !groups.insert(group.id.as_str()) {
                return Err(RequestError::DuplicateId {
                    scope: "transaction group",
                    id: group.id.clone(),
                });
            }

            let mut operations = HashSet::new();
            for op in &group.operations {
                if !operations.insert(op.id.as_str()) {
                    return Err(RequestError::DuplicateId {
                        scope: "operation",
                        id: OpKey::new(&group.id, &op.id).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_group(group: &TransactionGroup, path: &str, issues: &mut Vec<ValidationIssue>) {
        if !is_valid_id(&group.id) {
            issues.push(ValidationIssue::new(
                format!("invalid transaction group id '{}'", group.id),
                format!("{}.id", path),
            ));
        }

        if group.operations.is_empty() {
            issues.push(ValidationIssue::new(
                format!("transaction group '{}' has no operations", group.id),
                format!("{}.operations", path),
            ));
        }

        for (i, op) in group.operations.iter().enumerate() {
            Self::validate_operation(op, &format!("{}.operations[{}]", path, i), issues);
        }
    }

    fn validate_operation(op: &Operation, path: &str, issues: &mut Vec<ValidationIssue>) {
        if !is_valid_id(&op.id) {
            issues.push(ValidationIssue::new(
                format!("invalid operation id '{}'", op.id),
                format!("{}.id", path),
            ));
        }

        for dependency in &op.depends_on {
            // The group id only matters for the short form, which any valid id satisfies
            if OpKey::parse_dependency(dependency, "_").is_none() {
                issues.push(ValidationIssue::new(
                    format!("malformed dependency '{}'", dependency),
                    format!("{}.depends_on", path),
                ));
            }
        }

        let empty = Map::new();
        let params = match &op.params {
            Value::Object(params) => params,
            Value::Null => &empty,
            other => {
                issues.push(ValidationIssue::new(
                    format!("params must be an object, got {}", type_name(other)),
                    format!("{}.params", path),
                ));
                return;
            }
        };

        // Unknown objects fail their own operation at dispatch
        let Ok(domain) = op.domain_object.parse::<DomainObject>() else {
            return;
        };

        let mut check = ShapeCheck {
            path: format!("{}.params", path),
            issues,
        };
        match op.verb {
            Verb::Create => check.create(domain, params),
            Verb::Get => {
                check.target(domain, params);
                check.fields(params);
            }
            Verb::List => check.list(domain, params),
            Verb::Update => {
                check.target(domain, params);
                check.object(params, "data", true);
                check.boolean(params, "partial");
            }
            Verb::Delete => {
                check.target(domain, params);
                check.boolean(params, "soft_delete");
            }
        }
    }
}

/// Collects issues for one operation's parameters
struct ShapeCheck<'a> {
    path: String,
    issues: &'a mut Vec<ValidationIssue>,
}

impl ShapeCheck<'_> {
    fn push(&mut self, message: impl Into<String>, field: &str) {
        self.issues
            .push(ValidationIssue::new(message, format!("{}.{}", self.path, field)));
    }

    fn require<'v>(&mut self, params: &'v Map<String, Value>, key: &str) -> Option<&'v Value> {
        let value = params.get(key);
        if value.is_none() {
            self.push(format!("missing required '{}'", key), key);
        }
        value
    }

    /// Returns the object when `key` holds one; placeholders and absences yield None
    fn object<'v>(
        &mut self,
        params: &'v Map<String, Value>,
        key: &str,
        required: bool,
    ) -> Option<&'v Map<String, Value>> {
        let value = if required {
            self.require(params, key)?
        } else {
            params.get(key)?
        };

        match value {
            Value::Object(map) => Some(map),
            other if is_placeholder(other) => None,
            other => {
                self.push(format!("'{}' must be an object, got {}", key, type_name(other)), key);
                None
            }
        }
    }

    fn boolean(&mut self, params: &Map<String, Value>, key: &str) {
        match params.get(key) {
            None | Some(Value::Bool(_)) => {}
            Some(other) if is_placeholder(other) => {}
            Some(other) => {
                self.push(format!("'{}' must be a boolean, got {}", key, type_name(other)), key)
            }
        }
    }

    fn create(&mut self, domain: DomainObject, params: &Map<String, Value>) {
        let Some(data) = self.object(params, "data", true) else {
            return;
        };

        let scope = domain.scope_key().as_str();
        if !data.contains_key(scope) {
            self.push(format!("{} create requires '{}'", domain, scope), &format!("data.{}", scope));
        }
        if let Some(child) = domain.child_key() {
            if !data.contains_key(child.name) {
                self.push(
                    format!("{} create requires '{}'", domain, child.name),
                    &format!("data.{}", child.name),
                );
            }
        }
    }

    /// get/update/delete address one row by `id` plus its scope key
    fn target(&mut self, domain: DomainObject, params: &Map<String, Value>) {
        self.require(params, "id");
        self.require(params, domain.scope_key().as_str());
    }

    fn fields(&mut self, params: &Map<String, Value>) {
        match params.get("fields") {
            None => {}
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
            Some(other) if is_placeholder(other) => {}
            Some(_) => self.push("'fields' must be a list of strings", "fields"),
        }
    }

    fn list(&mut self, domain: DomainObject, params: &Map<String, Value>) {
        let scope = domain.scope_key().as_str();
        match params.get("filters") {
            None => self.push(format!("{} list requires 'filters.{}'", domain, scope), "filters"),
            Some(_) => {
                if let Some(filters) = self.object(params, "filters", false) {
                    if !filters.contains_key(scope) {
                        self.push(
                            format!("{} list requires 'filters.{}'", domain, scope),
                            &format!("filters.{}", scope),
                        );
                    }
                }
            }
        }

        self.sort(params);
        if let Some(pagination) = self.object(params, "pagination", false) {
            self.range(pagination, "page", 1, u32::MAX as u64);
            self.range(pagination, "page_size", 1, MAX_PAGE_SIZE as u64);
        }
        self.fields(params);
    }

    fn sort(&mut self, params: &Map<String, Value>) {
        let items = match params.get("sort") {
            None => return,
            Some(Value::Array(items)) => items,
            Some(other) if is_placeholder(other) => return,
            Some(other) => {
                self.push(format!("'sort' must be a list, got {}", type_name(other)), "sort");
                return;
            }
        };

        for (i, item) in items.iter().enumerate() {
            let field = format!("sort[{}]", i);
            let Value::Object(criteria) = item else {
                self.push("sort criteria must be an object", &field);
                continue;
            };
            if !criteria.get("field").map(Value::is_string).unwrap_or(false) {
                self.push("sort criteria requires a 'field' string", &field);
            }
            match criteria.get("direction") {
                None => {}
                Some(Value::String(direction)) if direction == "asc" || direction == "desc" => {}
                Some(other) => self.push(
                    format!("sort direction must be 'asc' or 'desc', got {}", other),
                    &format!("{}.direction", field),
                ),
            }
        }
    }

    fn range(&mut self, pagination: &Map<String, Value>, key: &str, min: u64, max: u64) {
        let field = format!("pagination.{}", key);
        match pagination.get(key) {
            None => {}
            Some(value) if is_placeholder(value) => {}
            Some(value) => match value.as_u64() {
                Some(n) if n >= min && n <= max => {}
                _ => self.push(
                    format!("'{}' must be an integer between {} and {}, got {}", key, min, max, value),
                    &field,
                ),
            },
        }
    }
}

fn is_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(s) if whole_reference(s).is_some())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::models::ErrorKind;
    use serde_json::json;

    const ORG: &str = "5d1c5f0e-7a43-4c0f-9b1e-3f2a00000001";

    fn request(value: Value) -> TransactionsRequest {
        serde_json::from_value(value).unwrap()
    }

    fn single(verb: &str, domain: &str, params: Value) -> TransactionsRequest {
        request(json!({
            "transactions": [{
                "id": "tx-001",
                "operations": [{"id": "op-001", "verb": verb, "domain_object": domain, "params": params}]
            }]
        }))
    }

    fn issues(request: &TransactionsRequest) -> Vec<ValidationIssue> {
        match RequestValidator::validate(request) {
            Err(RequestError::Invalid(issues)) => issues,
            other => panic!("expected validation issues, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_request() {
        let request = request(json!({
            "execution_mode": "parallel",
            "transactions": [{
                "id": "tx-001",
                "operations": [
                    {"id": "op-001", "verb": "create", "domain_object": "task",
                     "params": {"data": {"org_id": ORG, "team_id": "{{tx-000.op-001.result.id}}"}}},
                    {"id": "op-002", "verb": "create", "domain_object": "sprint_task",
                     "params": {"data": {"sprint_id": ORG, "task_id": "{{op-001.result.id}}"}}},
                    {"id": "op-003", "verb": "list", "domain_object": "team",
                     "params": {"filters": {"org_id": ORG}, "sort": [{"field": "name", "direction": "desc"}],
                                "pagination": {"page": 2, "page_size": 10}, "fields": ["id"]}},
                    {"id": "op-004", "verb": "delete", "domain_object": "doc",
                     "params": {"id": "{{op-001.result.id}}", "org_id": ORG, "soft_delete": false}}
                ]
            }]
        }));

        assert!(RequestValidator::validate(&request).is_ok());
    }

    #[test]
    fn test_empty_request() {
        let found = issues(&request(json!({"transactions": []})));
        assert_eq!(found[0].path, "transactions");
    }

    #[test]
    fn test_duplicate_ids() {
        let dup_group = request(json!({"transactions": [
            {"id": "tx", "operations": [{"id": "a", "verb": "get", "domain_object": "team"}]},
            {"id": "tx", "operations": [{"id": "b", "verb": "get", "domain_object": "team"}]}
        ]}));
        let err = RequestValidator::validate(&dup_group).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateId);
        assert_eq!(err.to_string(), "duplicate transaction group id 'tx'");

        let dup_op = request(json!({"transactions": [
            {"id": "tx", "operations": [
                {"id": "a", "verb": "get", "domain_object": "nope"},
                {"id": "a", "verb": "get", "domain_object": "nope"}
            ]}
        ]}));
        let err = RequestValidator::validate(&dup_op).unwrap_err();
        assert_eq!(err.to_string(), "duplicate operation id 'tx.a'");
    }

    #[test]
    fn test_structure_issues() {
        let request = request(json!({"transactions": [
            {"id": "bad id", "operations": []},
            {"id": "tx", "operations": [
                {"id": "op", "verb": "get", "domain_object": "team", "params": [1, 2],
                 "depends_on": ["a.b.c"]}
            ]}
        ]}));

        let paths: Vec<String> = issues(&request).into_iter().map(|i| i.path).collect();
        assert_eq!(
            paths,
            vec![
                "transactions[0].id",
                "transactions[0].operations",
                "transactions[1].operations[0].depends_on",
                "transactions[1].operations[0].params",
            ]
        );
    }

    #[test]
    fn test_create_requires_scope_and_child_keys() {
        let found = issues(&single("create", "sprint_task", json!({"data": {}})));
        let messages: Vec<&str> = found.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "sprint_task create requires 'sprint_id'",
                "sprint_task create requires 'task_id'",
            ]
        );

        let found = issues(&single("create", "team", json!({})));
        assert_eq!(found[0].path, "transactions[0].operations[0].params.data");
    }

    #[test]
    fn test_placeholders_skip_type_checks() {
        let request = single("create", "team", json!({"data": "{{tx-000.op-001.result}}"}));
        assert!(RequestValidator::validate(&request).is_ok());

        let request = single(
            "update",
            "team",
            json!({"id": "x", "org_id": ORG, "data": {}, "partial": "{{tx-000.op-001.result.flag}}"}),
        );
        assert!(RequestValidator::validate(&request).is_ok());
    }

    #[test]
    fn test_target_requires_id_and_scope() {
        let found = issues(&single("get", "team_member", json!({})));
        let paths: Vec<&str> = found.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "transactions[0].operations[0].params.id",
                "transactions[0].operations[0].params.team_id",
            ]
        );

        let found = issues(&single("delete", "doc", json!({"id": "x", "org_id": ORG, "soft_delete": "yes"})));
        assert!(found[0].message.contains("'soft_delete' must be a boolean"));
    }

    #[test]
    fn test_list_shape() {
        let found = issues(&single(
            "list",
            "task",
            json!({
                "filters": {"status": "Backlog"},
                "sort": [{"direction": "up"}],
                "pagination": {"page": 0, "page_size": 5000},
                "fields": [1]
            }),
        ));

        let paths: Vec<&str> = found.iter().map(|i| i.path.as_str()).collect();
        let prefix = "transactions[0].operations[0].params.";
        assert_eq!(
            paths.iter().map(|p| p.trim_start_matches(prefix)).collect::<Vec<_>>(),
            vec![
                "filters.org_id",
                "sort[0]",
                "sort[0].direction",
                "pagination.page",
                "pagination.page_size",
                "fields",
            ]
        );
    }

    #[test]
    fn test_page_beyond_u32_rejected() {
        let list = |page: u64| {
            single(
                "list",
                "doc",
                json!({"filters": {"org_id": ORG}, "pagination": {"page": page}}),
            )
        };

        assert!(RequestValidator::validate(&list(u32::MAX as u64)).is_ok());

        let found = issues(&list(5_000_000_000));
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("pagination.page"));
        assert!(found[0].message.contains("between 1 and 4294967295"));
    }

    #[test]
    fn test_unknown_domain_object_is_left_to_dispatch() {
        let request = single("create", "spaceship", json!({"anything": true}));
        assert!(RequestValidator::validate(&request).is_ok());
    }
}

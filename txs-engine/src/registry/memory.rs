// In-memory persistence backend
// Snapshot-per-unit-of-work tables and generic CRUD handlers for every domain object

use crate::execution::context::HandlerContext;
use crate::registry::domain::DomainObject;
use crate::registry::{
    DomainError, OperationHandler, OperationRegistry, Persistence, PersistenceError, UnitOfWork,
};
use crate::request::models::Verb;
use crate::request::params::{
    DeleteParams, GetParams, ListParams, OperationParams, ScopeIds, SortCriteria, SortDirection,
    UpdateParams,
};

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use uuid::Uuid;

type Row = Map<String, Value>;

/// Objects whose `name` must be unique within an organization
const UNIQUE_NAMES: [DomainObject; 3] = [
    DomainObject::Team,
    DomainObject::Project,
    DomainObject::DeploymentEnv,
];

/// Standard rows are keyed by (org, id); relationship rows by (parent, child)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RowKey {
    scope: Uuid,
    id: Uuid,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<DomainObject, BTreeMap<RowKey, Row>>,
}

impl Tables {
    fn get(&self, domain: DomainObject, key: RowKey) -> Option<&Row> {
        self.rows.get(&domain)?.get(&key)
    }

    fn live(&self, domain: DomainObject, key: RowKey) -> Option<&Row> {
        self.get(domain, key).filter(|row| is_live(row))
    }

    /// A live row by id regardless of scope
    fn find_live(&self, domain: DomainObject, id: Uuid) -> Option<(RowKey, &Row)> {
        self.rows
            .get(&domain)?
            .iter()
            .find(|(key, row)| key.id == id && is_live(row))
            .map(|(key, row)| (*key, row))
    }

    fn scan(&self, domain: DomainObject, scope: Uuid) -> impl Iterator<Item = (&RowKey, &Row)> {
        self.rows
            .get(&domain)
            .into_iter()
            .flat_map(|table| table.iter())
            .filter(move |(key, row)| key.scope == scope && is_live(row))
    }

    fn put(&mut self, domain: DomainObject, key: RowKey, row: Row) {
        self.rows.entry(domain).or_default().insert(key, row);
    }

    fn remove(&mut self, domain: DomainObject, key: RowKey) {
        if let Some(table) = self.rows.get_mut(&domain) {
            table.remove(&key);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    organizations: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    fail_next_commit: AtomicBool,
}

/// Shared store; every `begin` hands out an isolated session
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    shared: Arc<Shared>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or extend) an organization with the given members
    pub fn add_organization(&self, org_id: Uuid, members: impl IntoIterator<Item = Uuid>) {
        self.shared
            .organizations
            .write()
            .entry(org_id)
            .or_default()
            .extend(members);
    }

    /// Make the next commit fail with a persistence error
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, AtomicOrdering::SeqCst);
    }

    /// Committed row by id, including soft-deleted rows
    pub fn row(&self, domain: DomainObject, id: Uuid) -> Option<Value> {
        let tables = self.shared.tables.read();
        tables
            .rows
            .get(&domain)?
            .iter()
            .find(|(key, _)| key.id == id)
            .map(|(_, row)| Value::Object(row.clone()))
    }

    /// Number of committed, non-deleted rows
    pub fn count(&self, domain: DomainObject) -> usize {
        let tables = self.shared.tables.read();
        tables
            .rows
            .get(&domain)
            .map(|table| table.values().filter(|row| is_live(row)).count())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession, PersistenceError> {
        let working = self.shared.tables.read().clone();
        Ok(MemorySession {
            shared: self.shared.clone(),
            working,
            touched: BTreeMap::new(),
        })
    }
}

/// A unit of work: a private copy of the tables plus every row it touched,
/// as that row looked when the session first wrote it
pub struct MemorySession {
    shared: Arc<Shared>,
    working: Tables,
    touched: BTreeMap<(DomainObject, RowKey), Option<Row>>,
}

#[async_trait::async_trait]
impl UnitOfWork for MemorySession {
    async fn commit(&mut self) -> Result<(), PersistenceError> {
        if self.shared.fail_next_commit.swap(false, AtomicOrdering::SeqCst) {
            return Err(PersistenceError::new("commit rejected by storage"));
        }

        let mut tables = self.shared.tables.write();
        self.check_conflicts(&tables)?;

        for ((domain, key), _) in std::mem::take(&mut self.touched) {
            match self.working.get(domain, key) {
                Some(row) => tables.put(domain, key, row.clone()),
                None => tables.remove(domain, key),
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), PersistenceError> {
        self.touched.clear();
        self.working = self.shared.tables.read().clone();
        Ok(())
    }
}

impl MemorySession {
    pub fn create(
        &mut self,
        domain: DomainObject,
        data: Row,
        user: Uuid,
    ) -> Result<Value, DomainError> {
        let scope_key = domain.scope_key();
        let scope_id = uuid_field(&data, scope_key.as_str())?;
        let org_id = self.authorize_scope(domain, scope_id, user)?;

        let key = match domain.child_key() {
            Some(child) => {
                let child_id = uuid_field(&data, child.name)?;
                if let Some(child_domain) = child.domain {
                    self.require_in_org(child_domain, child_id, org_id)?;
                }
                let key = RowKey {
                    scope: scope_id,
                    id: child_id,
                };
                if self.working.live(domain, key).is_some() {
                    return Err(DomainError::AlreadyExists(format!(
                        "{} {} is already linked to {} {}",
                        child.name, child_id, scope_key, scope_id
                    )));
                }
                key
            }
            None => {
                self.check_references(domain, org_id, &data)?;
                if let Some(name) = self.duplicate_name(domain, org_id, &data, None) {
                    return Err(DomainError::AlreadyExists(format!(
                        "{} named '{}' already exists",
                        domain, name
                    )));
                }
                RowKey {
                    scope: org_id,
                    id: Uuid::new_v4(),
                }
            }
        };

        let now = timestamp();
        let mut row = data;
        row.insert("id".into(), json!(key.id));
        row.insert("org_id".into(), json!(org_id));
        row.insert("created".into(), json!(now));
        row.insert("created_by".into(), json!(user));
        row.insert("last_modified".into(), json!(now));
        row.insert("last_modified_by".into(), json!(user));
        row.insert("deleted_at".into(), Value::Null);

        tracing::debug!(domain = %domain, id = %key.id, "row created");
        self.write(domain, key, row.clone());
        Ok(Value::Object(row))
    }

    pub fn get(&self, domain: DomainObject, params: &GetParams, user: Uuid) -> Result<Value, DomainError> {
        let key = self.locate(domain, params.id, &params.scope, user)?;
        let row = self
            .working
            .live(domain, key)
            .ok_or_else(|| not_found(domain, params.id))?;
        Ok(project(row, &params.fields))
    }

    pub fn list(&self, domain: DomainObject, params: &ListParams, user: Uuid) -> Result<Value, DomainError> {
        let scope_key = domain.scope_key().as_str();
        let scope_id = uuid_field(&params.filters, scope_key)?;
        self.authorize_scope(domain, scope_id, user)?;

        let mut rows: Vec<&Row> = self
            .working
            .scan(domain, scope_id)
            .map(|(_, row)| row)
            .filter(|row| matches_filters(row, &params.filters, scope_key))
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, &params.sort));

        let total = rows.len();
        let items: Vec<Value> = rows
            .into_iter()
            .skip(params.pagination.offset())
            .take(params.pagination.page_size as usize)
            .map(|row| project(row, &params.fields))
            .collect();

        Ok(json!({
            "items": items,
            "total": total,
            "page": params.pagination.page,
            "page_size": params.pagination.page_size,
        }))
    }

    pub fn update(&mut self, domain: DomainObject, params: UpdateParams, user: Uuid) -> Result<Value, DomainError> {
        let key = self.locate(domain, params.id, &params.scope, user)?;
        let mut row = self
            .working
            .live(domain, key)
            .cloned()
            .ok_or_else(|| not_found(domain, params.id))?;

        if !domain.is_relationship() {
            self.check_references(domain, key.scope, &params.data)?;
            if let Some(name) = self.duplicate_name(domain, key.scope, &params.data, Some(key.id)) {
                return Err(DomainError::Conflict(format!(
                    "another {} is already named '{}'",
                    domain, name
                )));
            }
        }

        // Full updates arrive with every payload field, so both modes merge
        for (field, value) in params.data {
            row.insert(field, value);
        }
        row.insert("last_modified".into(), json!(timestamp()));
        row.insert("last_modified_by".into(), json!(user));

        self.write(domain, key, row.clone());
        Ok(Value::Object(row))
    }

    pub fn delete(&mut self, domain: DomainObject, params: &DeleteParams, user: Uuid) -> Result<Value, DomainError> {
        let key = self.locate(domain, params.id, &params.scope, user)?;

        if params.soft_delete {
            let mut row = self
                .working
                .live(domain, key)
                .cloned()
                .ok_or_else(|| not_found(domain, params.id))?;
            row.insert("deleted_at".into(), json!(timestamp()));
            row.insert("last_modified_by".into(), json!(user));
            self.write(domain, key, row);
        } else {
            self.touch(domain, key);
            self.working.remove(domain, key);
        }

        tracing::debug!(domain = %domain, id = %params.id, soft = params.soft_delete, "row deleted");
        Ok(json!({"deleted": true, "id": params.id}))
    }

    fn write(&mut self, domain: DomainObject, key: RowKey, row: Row) {
        self.touch(domain, key);
        self.working.put(domain, key, row);
    }

    fn touch(&mut self, domain: DomainObject, key: RowKey) {
        let working = &self.working;
        self.touched
            .entry((domain, key))
            .or_insert_with(|| working.get(domain, key).cloned());
    }

    /// Re-check this session's writes against what other sessions committed since `begin`
    fn check_conflicts(&self, committed: &Tables) -> Result<(), PersistenceError> {
        for ((domain, key), seen) in &self.touched {
            if committed.get(*domain, *key) != seen.as_ref() {
                return Err(PersistenceError::new(format!(
                    "write conflict: {} {} was changed by another transaction",
                    domain, key.id
                )));
            }
        }

        for (domain, key) in self.touched.keys() {
            if !UNIQUE_NAMES.contains(domain) {
                continue;
            }
            let Some(name) = self
                .working
                .live(*domain, *key)
                .and_then(|row| row.get("name"))
                .and_then(Value::as_str)
            else {
                continue;
            };

            let clash = committed.scan(*domain, key.scope).any(|(other, row)| {
                !self.touched.contains_key(&(*domain, *other))
                    && row.get("name").and_then(Value::as_str) == Some(name)
            });
            if clash {
                return Err(PersistenceError::new(format!(
                    "write conflict: another transaction committed a {} named '{}'",
                    domain, name
                )));
            }
        }

        Ok(())
    }

    /// Find a live row for get/update/delete after checking access to its scope
    fn locate(
        &self,
        domain: DomainObject,
        id: Uuid,
        scope: &ScopeIds,
        user: Uuid,
    ) -> Result<RowKey, DomainError> {
        let scope_key = domain.scope_key();
        let scope_id = scope
            .get(scope_key)
            .ok_or_else(|| DomainError::Validation(format!("missing required '{}'", scope_key)))?;
        self.authorize_scope(domain, scope_id, user)?;

        let key = RowKey { scope: scope_id, id };
        self.working
            .live(domain, key)
            .map(|_| key)
            .ok_or_else(|| not_found(domain, id))
    }

    /// Resolve the organization owning `scope_id` and check the user belongs to it
    fn authorize_scope(&self, domain: DomainObject, scope_id: Uuid, user: Uuid) -> Result<Uuid, DomainError> {
        let org_id = match domain.scope_key().parent() {
            None => scope_id,
            Some(parent) => {
                let (_, row) = self
                    .working
                    .find_live(parent, scope_id)
                    .ok_or_else(|| not_found(parent, scope_id))?;
                row_org(row).ok_or_else(|| not_found(parent, scope_id))?
            }
        };

        let organizations = self.shared.organizations.read();
        match organizations.get(&org_id) {
            None => Err(DomainError::NotFound(format!("organization {} not found", org_id))),
            Some(members) if !members.contains(&user) => Err(DomainError::Unauthorized(format!(
                "user {} is not a member of organization {}",
                user, org_id
            ))),
            Some(_) => Ok(org_id),
        }
    }

    fn require_in_org(&self, domain: DomainObject, id: Uuid, org_id: Uuid) -> Result<(), DomainError> {
        match self.working.find_live(domain, id) {
            Some((_, row)) if row_org(row) == Some(org_id) => Ok(()),
            _ => Err(not_found(domain, id)),
        }
    }

    /// Rows a standard object points at must exist in the same organization
    fn check_references(&self, domain: DomainObject, org_id: Uuid, data: &Row) -> Result<(), DomainError> {
        let reference = match domain {
            DomainObject::Task => data.get("team_id").map(|v| (DomainObject::Team, v)),
            DomainObject::Feature => data.get("parent").map(|v| (DomainObject::Feature, v)),
            _ => None,
        };

        match reference {
            Some((target, Value::String(raw))) => {
                let id = Uuid::parse_str(raw)
                    .map_err(|_| DomainError::Validation(format!("invalid {} id '{}'", target, raw)))?;
                self.require_in_org(target, id, org_id)
            }
            _ => Ok(()),
        }
    }

    fn duplicate_name(
        &self,
        domain: DomainObject,
        org_id: Uuid,
        data: &Row,
        exclude: Option<Uuid>,
    ) -> Option<String> {
        if !UNIQUE_NAMES.contains(&domain) {
            return None;
        }
        let name = data.get("name")?.as_str()?;
        self.working
            .scan(domain, org_id)
            .any(|(key, row)| Some(key.id) != exclude && row.get("name").and_then(Value::as_str) == Some(name))
            .then(|| name.to_string())
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_live(row: &Row) -> bool {
    matches!(row.get("deleted_at"), None | Some(Value::Null))
}

fn row_org(row: &Row) -> Option<Uuid> {
    row.get("org_id")?.as_str()?.parse().ok()
}

fn not_found(domain: DomainObject, id: Uuid) -> DomainError {
    DomainError::NotFound(format!("{} {} not found", domain, id))
}

fn uuid_field(data: &Row, key: &str) -> Result<Uuid, DomainError> {
    match data.get(key) {
        Some(Value::String(raw)) => Uuid::parse_str(raw)
            .map_err(|_| DomainError::Validation(format!("'{}' must be a UUID, got '{}'", key, raw))),
        Some(other) => Err(DomainError::Validation(format!(
            "'{}' must be a UUID string, got {}",
            key, other
        ))),
        None => Err(DomainError::Validation(format!("missing required '{}'", key))),
    }
}

fn matches_filters(row: &Row, filters: &Map<String, Value>, scope_key: &str) -> bool {
    filters
        .iter()
        .filter(|(field, _)| field.as_str() != scope_key)
        .all(|(field, expected)| match (row.get(field), expected) {
            (None, Value::Null) => true,
            (actual, expected) => actual == Some(expected),
        })
}

/// Rows sort by the given criteria, then by creation time and id
fn compare_rows(a: &Row, b: &Row, sort: &[SortCriteria]) -> Ordering {
    for criteria in sort {
        let ordering = compare_values(a.get(&criteria.field), b.get(&criteria.field));
        let ordering = match criteria.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    compare_values(a.get("created"), b.get("created"))
        .then_with(|| compare_values(a.get("id"), b.get("id")))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Keep only the requested fields; an empty list keeps everything
fn project(row: &Row, fields: &[String]) -> Value {
    if fields.is_empty() {
        return Value::Object(row.clone());
    }
    Value::Object(
        fields
            .iter()
            .filter_map(|field| row.get(field).map(|value| (field.clone(), value.clone())))
            .collect(),
    )
}

/// Generic handler serving every verb of one domain object
#[derive(Debug, Clone, Copy)]
pub struct MemoryHandler {
    domain: DomainObject,
}

impl MemoryHandler {
    pub fn new(domain: DomainObject) -> Self {
        Self { domain }
    }
}

#[async_trait::async_trait]
impl OperationHandler<MemorySession> for MemoryHandler {
    async fn call(
        &self,
        params: OperationParams,
        ctx: &HandlerContext,
        session: &mut MemorySession,
    ) -> Result<Value, DomainError> {
        let user = ctx.acting_user;
        match params {
            OperationParams::Create(create) => session.create(self.domain, create.data, user),
            OperationParams::Get(get) => session.get(self.domain, &get, user),
            OperationParams::List(list) => session.list(self.domain, &list, user),
            OperationParams::Update(update) => session.update(self.domain, update, user),
            OperationParams::Delete(delete) => session.delete(self.domain, &delete, user),
        }
    }
}

/// Registry with a memory handler for every domain object and verb
pub fn memory_registry() -> OperationRegistry<MemorySession> {
    let mut registry = OperationRegistry::new();
    for domain in DomainObject::ALL {
        for verb in Verb::ALL {
            registry.register(domain, verb, MemoryHandler::new(domain));
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::domain::PayloadKind;
    use crate::request::params::Pagination;

    struct Fixture {
        store: MemoryPersistence,
        org: Uuid,
        user: Uuid,
    }

    fn fixture() -> Fixture {
        let store = MemoryPersistence::new();
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        store.add_organization(org, [user]);
        Fixture { store, org, user }
    }

    fn data(domain: DomainObject, value: Value) -> Row {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        domain.validate_payload(map, PayloadKind::Create).unwrap()
    }

    fn id_of(value: &Value) -> Uuid {
        value["id"].as_str().unwrap().parse().unwrap()
    }

    fn scope(org: Uuid) -> ScopeIds {
        ScopeIds {
            org_id: Some(org),
            ..ScopeIds::default()
        }
    }

    #[tokio::test]
    async fn test_create_is_invisible_until_commit() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        let other = fx.store.begin().await.unwrap();

        let team = session
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"})), fx.user)
            .unwrap();
        let get = GetParams { id: id_of(&team), scope: scope(fx.org), fields: vec![] };

        assert!(session.get(DomainObject::Team, &get, fx.user).is_ok());
        assert!(matches!(other.get(DomainObject::Team, &get, fx.user), Err(DomainError::NotFound(_))));
        assert_eq!(fx.store.count(DomainObject::Team), 0);

        session.commit().await.unwrap();
        assert_eq!(fx.store.count(DomainObject::Team), 1);
        let fresh = fx.store.begin().await.unwrap();
        assert_eq!(fresh.get(DomainObject::Team, &get, fx.user).unwrap()["name"], json!("core"));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        session
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"})), fx.user)
            .unwrap();

        session.rollback().await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(fx.store.count(DomainObject::Team), 0);
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        session
            .create(DomainObject::Doc, data(DomainObject::Doc, json!({"org_id": fx.org, "name": "a", "content": "b"})), fx.user)
            .unwrap();

        fx.store.fail_next_commit();
        assert!(session.commit().await.is_err());
        assert_eq!(fx.store.count(DomainObject::Doc), 0);
    }

    #[tokio::test]
    async fn test_membership_checks() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        let stranger = Uuid::new_v4();

        let err = session
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "x"})), stranger)
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let err = session
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": Uuid::new_v4(), "name": "x"})), fx.user)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_task_requires_existing_team() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        let err = session
            .create(
                DomainObject::Task,
                data(DomainObject::Task, json!({"org_id": fx.org, "team_id": Uuid::new_v4()})),
                fx.user,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(msg) if msg.starts_with("team ")));
    }

    #[tokio::test]
    async fn test_duplicate_names() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        let create = |name: &str| data(DomainObject::Team, json!({"org_id": fx.org, "name": name}));

        session.create(DomainObject::Team, create("core"), fx.user).unwrap();
        let other = session.create(DomainObject::Team, create("infra"), fx.user).unwrap();
        assert!(matches!(
            session.create(DomainObject::Team, create("core"), fx.user),
            Err(DomainError::AlreadyExists(_))
        ));

        let mut rename = Map::new();
        rename.insert("name".into(), json!("core"));
        let err = session
            .update(
                DomainObject::Team,
                UpdateParams { id: id_of(&other), scope: scope(fx.org), data: rename, partial: true },
                fx.user,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_name_rejected_at_commit() {
        let fx = fixture();
        let create = || data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"}));
        let mut first = fx.store.begin().await.unwrap();
        let mut second = fx.store.begin().await.unwrap();

        first.create(DomainObject::Team, create(), fx.user).unwrap();
        second.create(DomainObject::Team, create(), fx.user).unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.message.contains("named 'core'"));
        assert_eq!(fx.store.count(DomainObject::Team), 1);

        second.rollback().await.unwrap();
        assert!(matches!(
            second.create(DomainObject::Team, create(), fx.user),
            Err(DomainError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_link_rejected_at_commit() {
        let fx = fixture();
        let mut setup = fx.store.begin().await.unwrap();
        let team = setup
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"})), fx.user)
            .unwrap();
        let sprint = setup
            .create(DomainObject::Sprint, data(DomainObject::Sprint, json!({"org_id": fx.org})), fx.user)
            .unwrap();
        setup.commit().await.unwrap();

        let link = || data(DomainObject::SprintTeam, json!({"sprint_id": sprint["id"], "team_id": team["id"]}));
        let mut first = fx.store.begin().await.unwrap();
        let mut second = fx.store.begin().await.unwrap();
        first.create(DomainObject::SprintTeam, link(), fx.user).unwrap();
        second.create(DomainObject::SprintTeam, link(), fx.user).unwrap();

        first.commit().await.unwrap();
        assert!(second.commit().await.is_err());
        assert_eq!(fx.store.count(DomainObject::SprintTeam), 1);
    }

    #[tokio::test]
    async fn test_concurrent_update_loses() {
        let fx = fixture();
        let mut setup = fx.store.begin().await.unwrap();
        let team = setup
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"})), fx.user)
            .unwrap();
        setup.commit().await.unwrap();

        let rename = |name: &str| {
            let mut patch = Map::new();
            patch.insert("name".into(), json!(name));
            UpdateParams { id: id_of(&team), scope: scope(fx.org), data: patch, partial: true }
        };
        let mut first = fx.store.begin().await.unwrap();
        let mut second = fx.store.begin().await.unwrap();
        first.update(DomainObject::Team, rename("platform"), fx.user).unwrap();
        second.update(DomainObject::Team, rename("infra"), fx.user).unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.message.contains("changed by another transaction"));
        assert_eq!(fx.store.row(DomainObject::Team, id_of(&team)).unwrap()["name"], json!("platform"));
    }

    #[tokio::test]
    async fn test_disjoint_sessions_both_commit() {
        let fx = fixture();
        let mut first = fx.store.begin().await.unwrap();
        let mut second = fx.store.begin().await.unwrap();
        first
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"})), fx.user)
            .unwrap();
        second
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "infra"})), fx.user)
            .unwrap();

        first.commit().await.unwrap();
        second.commit().await.unwrap();
        assert_eq!(fx.store.count(DomainObject::Team), 2);
    }

    #[tokio::test]
    async fn test_relationship_links() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        let team = session
            .create(DomainObject::Team, data(DomainObject::Team, json!({"org_id": fx.org, "name": "core"})), fx.user)
            .unwrap();
        let sprint = session
            .create(DomainObject::Sprint, data(DomainObject::Sprint, json!({"org_id": fx.org})), fx.user)
            .unwrap();
        let link = || {
            data(
                DomainObject::SprintTeam,
                json!({"sprint_id": sprint["id"], "team_id": team["id"]}),
            )
        };

        let row = session.create(DomainObject::SprintTeam, link(), fx.user).unwrap();
        assert_eq!(row["team_id"], team["id"]);
        assert!(matches!(
            session.create(DomainObject::SprintTeam, link(), fx.user),
            Err(DomainError::AlreadyExists(_))
        ));

        let mut filters = Map::new();
        filters.insert("sprint_id".into(), sprint["id"].clone());
        let listed = session
            .list(DomainObject::SprintTeam, &ListParams { filters, ..ListParams::default() }, fx.user)
            .unwrap();
        assert_eq!(listed["total"], json!(1));

        let delete = DeleteParams {
            id: id_of(&team),
            scope: ScopeIds { sprint_id: Some(id_of(&sprint)), ..ScopeIds::default() },
            soft_delete: true,
        };
        session.delete(DomainObject::SprintTeam, &delete, fx.user).unwrap();
        assert!(session.create(DomainObject::SprintTeam, link(), fx.user).is_ok());
    }

    #[tokio::test]
    async fn test_list_sort_page_and_project() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        for name in ["b", "c", "a"] {
            session
                .create(DomainObject::Project, data(DomainObject::Project, json!({"org_id": fx.org, "name": name})), fx.user)
                .unwrap();
        }

        let mut filters = Map::new();
        filters.insert("org_id".into(), json!(fx.org));
        let params = ListParams {
            filters,
            sort: vec![SortCriteria { field: "name".into(), direction: SortDirection::Desc }],
            pagination: Pagination { page: 1, page_size: 2 },
            fields: vec!["name".into()],
        };

        let listed = session.list(DomainObject::Project, &params, fx.user).unwrap();
        assert_eq!(listed["total"], json!(3));
        assert_eq!(listed["items"], json!([{"name": "c"}, {"name": "b"}]));
    }

    #[tokio::test]
    async fn test_soft_and_hard_delete() {
        let fx = fixture();
        let mut session = fx.store.begin().await.unwrap();
        let doc = |name: &str| data(DomainObject::Doc, json!({"org_id": fx.org, "name": name, "content": "x"}));
        let soft = id_of(&session.create(DomainObject::Doc, doc("a"), fx.user).unwrap());
        let hard = id_of(&session.create(DomainObject::Doc, doc("b"), fx.user).unwrap());

        for (id, soft_delete) in [(soft, true), (hard, false)] {
            let result = session
                .delete(DomainObject::Doc, &DeleteParams { id, scope: scope(fx.org), soft_delete }, fx.user)
                .unwrap();
            assert_eq!(result["deleted"], json!(true));
        }
        session.commit().await.unwrap();

        assert_eq!(fx.store.count(DomainObject::Doc), 0);
        assert!(fx.store.row(DomainObject::Doc, soft).unwrap()["deleted_at"].is_string());
        assert!(fx.store.row(DomainObject::Doc, hard).is_none());
    }

    #[test]
    fn test_registry_covers_everything() {
        let registry = memory_registry();
        assert_eq!(registry.len(), DomainObject::ALL.len() * Verb::ALL.len());
        assert!(registry.supports("sprint_task", Verb::Create));
    }
}

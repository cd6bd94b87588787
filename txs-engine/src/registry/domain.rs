// Domain object catalogue
// Scopes, relationship keys and typed create/update payloads for every domain object

use crate::request::params::OperationParams;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainObject {
    Task,
    Project,
    Team,
    Sprint,
    Feature,
    Doc,
    DeploymentEnv,
    TeamMember,
    TeamReviewer,
    TaskFeature,
    TaskDeploymentEnv,
    TaskOwner,
    TaskReviewer,
    FeatureDoc,
    ProjectTeam,
    SprintTeam,
    SprintTask,
}

/// The parent identifier an object lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Org,
    Team,
    Task,
    Feature,
    Project,
    Sprint,
}

impl ScopeKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKey::Org => "org_id",
            ScopeKey::Team => "team_id",
            ScopeKey::Task => "task_id",
            ScopeKey::Feature => "feature_id",
            ScopeKey::Project => "project_id",
            ScopeKey::Sprint => "sprint_id",
        }
    }

    /// Domain object holding the parent rows, `None` for organizations
    pub fn parent(&self) -> Option<DomainObject> {
        match self {
            ScopeKey::Org => None,
            ScopeKey::Team => Some(DomainObject::Team),
            ScopeKey::Task => Some(DomainObject::Task),
            ScopeKey::Feature => Some(DomainObject::Feature),
            ScopeKey::Project => Some(DomainObject::Project),
            ScopeKey::Sprint => Some(DomainObject::Sprint),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key naming the linked row of a relationship object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildKey {
    pub name: &'static str,
    /// `None` when the child is a principal managed outside this engine
    pub domain: Option<DomainObject>,
}

/// How an incoming payload is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Create,
    /// Full update: every payload field, scope and child keys excluded
    Replace,
    /// Partial update: any subset of payload fields
    Patch,
}

impl DomainObject {
    pub const ALL: [DomainObject; 17] = [
        DomainObject::Task,
        DomainObject::Project,
        DomainObject::Team,
        DomainObject::Sprint,
        DomainObject::Feature,
        DomainObject::Doc,
        DomainObject::DeploymentEnv,
        DomainObject::TeamMember,
        DomainObject::TeamReviewer,
        DomainObject::TaskFeature,
        DomainObject::TaskDeploymentEnv,
        DomainObject::TaskOwner,
        DomainObject::TaskReviewer,
        DomainObject::FeatureDoc,
        DomainObject::ProjectTeam,
        DomainObject::SprintTeam,
        DomainObject::SprintTask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainObject::Task => "task",
            DomainObject::Project => "project",
            DomainObject::Team => "team",
            DomainObject::Sprint => "sprint",
            DomainObject::Feature => "feature",
            DomainObject::Doc => "doc",
            DomainObject::DeploymentEnv => "deployment_env",
            DomainObject::TeamMember => "team_member",
            DomainObject::TeamReviewer => "team_reviewer",
            DomainObject::TaskFeature => "task_feature",
            DomainObject::TaskDeploymentEnv => "task_deployment_env",
            DomainObject::TaskOwner => "task_owner",
            DomainObject::TaskReviewer => "task_reviewer",
            DomainObject::FeatureDoc => "feature_doc",
            DomainObject::ProjectTeam => "project_team",
            DomainObject::SprintTeam => "sprint_team",
            DomainObject::SprintTask => "sprint_task",
        }
    }

    pub fn scope_key(&self) -> ScopeKey {
        match self {
            DomainObject::Task
            | DomainObject::Project
            | DomainObject::Team
            | DomainObject::Sprint
            | DomainObject::Feature
            | DomainObject::Doc
            | DomainObject::DeploymentEnv => ScopeKey::Org,
            DomainObject::TeamMember | DomainObject::TeamReviewer => ScopeKey::Team,
            DomainObject::TaskFeature
            | DomainObject::TaskDeploymentEnv
            | DomainObject::TaskOwner
            | DomainObject::TaskReviewer => ScopeKey::Task,
            DomainObject::FeatureDoc => ScopeKey::Feature,
            DomainObject::ProjectTeam => ScopeKey::Project,
            DomainObject::SprintTeam | DomainObject::SprintTask => ScopeKey::Sprint,
        }
    }

    pub fn child_key(&self) -> Option<ChildKey> {
        let (name, domain) = match self {
            DomainObject::TeamMember
            | DomainObject::TeamReviewer
            | DomainObject::TaskOwner
            | DomainObject::TaskReviewer => ("principal_id", None),
            DomainObject::TaskFeature => ("feature_id", Some(DomainObject::Feature)),
            DomainObject::TaskDeploymentEnv => {
                ("deployment_env_id", Some(DomainObject::DeploymentEnv))
            }
            DomainObject::FeatureDoc => ("doc_id", Some(DomainObject::Doc)),
            DomainObject::ProjectTeam | DomainObject::SprintTeam => {
                ("team_id", Some(DomainObject::Team))
            }
            DomainObject::SprintTask => ("task_id", Some(DomainObject::Task)),
            _ => return None,
        };
        Some(ChildKey { name, domain })
    }

    pub fn is_relationship(&self) -> bool {
        self.child_key().is_some()
    }

    /// Check and normalize create/update payloads before dispatch
    pub fn prepare(&self, params: OperationParams) -> Result<OperationParams, String> {
        match params {
            OperationParams::Create(mut create) => {
                create.data = self.validate_payload(create.data, PayloadKind::Create)?;
                Ok(OperationParams::Create(create))
            }
            OperationParams::Update(mut update) => {
                let kind = if update.partial {
                    PayloadKind::Patch
                } else {
                    PayloadKind::Replace
                };
                update.data = self.validate_payload(update.data, kind)?;
                Ok(OperationParams::Update(update))
            }
            other => Ok(other),
        }
    }

    /// Validate a payload against this object's schema, returning the normalized map
    pub fn validate_payload(
        &self,
        mut data: Map<String, Value>,
        kind: PayloadKind,
    ) -> Result<Map<String, Value>, String> {
        let mut keys = Vec::new();
        if kind == PayloadKind::Create {
            let scope = self.scope_key().as_str();
            keys.push((scope, take_uuid(&mut data, scope)?));
            if let Some(child) = self.child_key() {
                keys.push((child.name, take_uuid(&mut data, child.name)?));
            }
        }

        let mut normalized = match (self.is_relationship(), kind) {
            (true, PayloadKind::Patch) => typed::<LinkPatch>(data),
            (true, _) => typed::<LinkPayload>(data),
            (false, PayloadKind::Patch) => self.patch(data),
            (false, _) => self.full(data),
        }
        .map_err(|e| format!("invalid {} payload: {}", self, e))?;

        for (key, id) in keys {
            normalized.insert(key.to_string(), Value::String(id.to_string()));
        }
        Ok(normalized)
    }

    fn full(&self, data: Map<String, Value>) -> Result<Map<String, Value>, String> {
        match self {
            DomainObject::Task => typed::<TaskPayload>(data),
            DomainObject::Project => typed::<ProjectPayload>(data),
            DomainObject::Team => typed::<NamedPayload>(data),
            DomainObject::Sprint => typed::<SprintPayload>(data),
            DomainObject::Feature => typed::<FeaturePayload>(data),
            DomainObject::Doc => typed::<DocPayload>(data),
            DomainObject::DeploymentEnv => typed::<NamedPayload>(data),
            _ => typed::<LinkPayload>(data),
        }
    }

    fn patch(&self, data: Map<String, Value>) -> Result<Map<String, Value>, String> {
        match self {
            DomainObject::Task => typed::<TaskPatch>(data),
            DomainObject::Project => typed::<ProjectPatch>(data),
            DomainObject::Team => typed::<NamedPatch>(data),
            DomainObject::Sprint => typed::<SprintPatch>(data),
            DomainObject::Feature => typed::<FeaturePatch>(data),
            DomainObject::Doc => typed::<DocPatch>(data),
            DomainObject::DeploymentEnv => typed::<NamedPatch>(data),
            _ => typed::<LinkPatch>(data),
        }
    }
}

impl fmt::Display for DomainObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainObject {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainObject::ALL
            .iter()
            .copied()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| format!("unknown domain object '{}'", s))
    }
}

fn take_uuid(data: &mut Map<String, Value>, key: &str) -> Result<Uuid, String> {
    match data.remove(key) {
        Some(Value::String(raw)) => {
            Uuid::parse_str(&raw).map_err(|_| format!("'{}' must be a UUID, got '{}'", key, raw))
        }
        Some(other) => Err(format!("'{}' must be a UUID string, got {}", key, other)),
        None => Err(format!("missing required field '{}'", key)),
    }
}

fn typed<T: Payload>(data: Map<String, Value>) -> Result<Map<String, Value>, String> {
    let payload: T = serde_json::from_value(Value::Object(data)).map_err(|e| e.to_string())?;
    payload.check()?;
    match serde_json::to_value(&payload).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map),
        other => Err(format!("payload normalized to non-object {}", other)),
    }
}

fn positive(field: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if v <= 0.0 => Err(format!("'{}' must be greater than 0, got {}", field, v)),
        _ => Ok(()),
    }
}

// =============================================================================
// Payload Schemas
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Backlog,
    OnDeck,
    InProgress,
    Completed,
    Deployed,
    Review,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SprintStatus {
    #[default]
    Backlog,
    Active,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    Product,
    Engineering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewResult {
    Queued,
    Reviewing,
    Passed,
    Failed,
    Skipped,
}

trait Payload: DeserializeOwned + Serialize {
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskPayload {
    summary: Option<String>,
    description: Option<String>,
    team_id: Uuid,
    guestimate: Option<f64>,
    #[serde(default)]
    status: TaskStatus,
    review_result: Option<ReviewResult>,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for TaskPayload {
    fn check(&self) -> Result<(), String> {
        positive("guestimate", self.guestimate)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guestimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_result: Option<ReviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for TaskPatch {
    fn check(&self) -> Result<(), String> {
        positive("guestimate", self.guestimate)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectPayload {
    name: String,
    description: Option<String>,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for ProjectPayload {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for ProjectPatch {}

/// Teams and deployment environments carry only a name
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct NamedPayload {
    name: String,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for NamedPayload {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct NamedPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for NamedPatch {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SprintPayload {
    title: Option<String>,
    #[serde(default)]
    status: SprintStatus,
    end_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for SprintPayload {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SprintPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<SprintStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for SprintPatch {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeaturePayload {
    name: String,
    parent: Option<Uuid>,
    parent_path: Option<String>,
    feature_type: FeatureType,
    summary: Option<String>,
    details: Option<String>,
    guestimate: Option<f64>,
    derived_guestimate: Option<f64>,
    review_result: Option<ReviewResult>,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for FeaturePayload {
    fn check(&self) -> Result<(), String> {
        positive("guestimate", self.guestimate)?;
        positive("derived_guestimate", self.derived_guestimate)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeaturePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feature_type: Option<FeatureType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guestimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    derived_guestimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_result: Option<ReviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for FeaturePatch {
    fn check(&self) -> Result<(), String> {
        positive("guestimate", self.guestimate)?;
        positive("derived_guestimate", self.derived_guestimate)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocPayload {
    name: String,
    description: Option<String>,
    content: String,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for DocPayload {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for DocPatch {}

/// Relationship rows: the scope and child keys are handled separately
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkPayload {
    role: Option<String>,
    #[serde(default)]
    meta: Map<String, Value>,
}

impl Payload for LinkPayload {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Map<String, Value>>,
}

impl Payload for LinkPatch {}

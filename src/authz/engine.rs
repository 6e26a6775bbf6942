//! Authorization decisions.
//!
//! A check runs in four stages: build the evaluation context, resolve the
//! actor's effective roles, collect the permissions those roles reference, and
//! keep the permissions whose matchers and conditions accept the request.
//!
//! Missing permissions, resources and roles are skipped. Hierarchy integrity
//! errors and storage failures propagate. A malformed condition only
//! disqualifies the permission that carries it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::Value;

use crate::authz::cache::{NoopRoleCache, RoleCache, RoleCacheKey, RoleSet};
use crate::authz::clock::{Clock, SystemClock};
use crate::authz::condition::PolicyEvaluator;
use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::RoleHierarchyResolver;
use crate::authz::store::AuthzStore;
use crate::authz::types::{Actor, CheckRequest, Decision, Permission};
use crate::authz::value::{AttrValue, Attributes};
use crate::settings::EngineSettings;

const NO_ROLES_REASON: &str = "User has no roles assigned";

pub struct AuthzEngine {
    store: Arc<dyn AuthzStore>,
    settings: EngineSettings,
    hierarchy: RoleHierarchyResolver,
    evaluator: PolicyEvaluator,
    cache: Arc<dyn RoleCache>,
    clock: Arc<dyn Clock>,
}

/// Everything about the actor that does not depend on the request: looked up
/// once per check, or once per batch.
struct Subject {
    actor_id: String,
    actor: Option<Actor>,
    block: Attributes,
    /// `None` when the actor exists but is not active
    permissions: Option<Vec<Permission>>,
    has_roles: bool,
}

impl std::fmt::Debug for AuthzEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzEngine")
            .field("settings", &self.settings)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

impl AuthzEngine {
    /// The injected [`RoleCache`] is the only cache a check consults; parent
    /// chains are always read from storage when an actor's roles are resolved.
    pub fn new(store: Arc<dyn AuthzStore>, settings: EngineSettings) -> Self {
        let hierarchy = RoleHierarchyResolver::uncached(store.clone(), settings.max_depth);
        Self {
            store,
            settings,
            hierarchy,
            evaluator: PolicyEvaluator::new(),
            cache: Arc::new(NoopRoleCache),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn RoleCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn hierarchy(&self) -> &RoleHierarchyResolver {
        &self.hierarchy
    }

    /// Decide whether `actor_id` may perform `action` on `resource_type`
    /// (optionally a specific `resource_id`), given extra ABAC `context`.
    #[tracing::instrument(level = "debug", skip(self, context))]
    pub fn check(
        &self,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Option<&Attributes>,
    ) -> Result<Decision, AuthzError> {
        let subject = self.load_subject(actor_id, None)?;
        let now = self.clock.now();
        let empty = Attributes::new();
        self.decide(
            &subject,
            action,
            resource_type,
            resource_id,
            context.unwrap_or(&empty),
            now,
        )
    }

    /// Run several checks for one actor. Roles and permissions are resolved
    /// once and shared by every item; results come back in request order.
    #[tracing::instrument(level = "debug", skip(self, requests), fields(count = requests.len()))]
    pub fn batch_check(
        &self,
        actor_id: &str,
        requests: &[CheckRequest],
    ) -> Result<Vec<Decision>, AuthzError> {
        let subject = self.load_subject(actor_id, None)?;
        let now = self.clock.now();
        requests
            .iter()
            .map(|req| {
                self.decide(
                    &subject,
                    &req.action,
                    &req.resource_type,
                    req.resource_id.as_deref(),
                    &req.context,
                    now,
                )
            })
            .collect()
    }

    /// Permissions available to the actor, without condition evaluation.
    /// `domain` overrides the actor's own domain for role resolution.
    pub fn get_user_permissions(
        &self,
        actor_id: &str,
        resource_type: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Vec<Permission>, AuthzError> {
        let subject = self.load_subject(actor_id, domain)?;
        let permissions = subject.permissions.unwrap_or_default();
        Ok(match resource_type {
            Some(rt) => permissions
                .into_iter()
                .filter(|p| p.matches_resource_type(rt))
                .collect(),
            None => permissions,
        })
    }

    /// Distinct actions the actor may perform on `resource_type`, conditions
    /// evaluated. A wildcard grant shows up as `*`.
    pub fn allowed_actions(
        &self,
        actor_id: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Option<&Attributes>,
    ) -> Result<Vec<String>, AuthzError> {
        let subject = self.load_subject(actor_id, None)?;
        let Some(permissions) = &subject.permissions else {
            return Ok(Vec::new());
        };
        let empty = Attributes::new();
        let ctx = self.build_context(
            &subject,
            resource_type,
            resource_id,
            context.unwrap_or(&empty),
            self.clock.now(),
        )?;

        let actions: BTreeSet<String> = permissions
            .iter()
            .filter(|p| p.matches_resource_type(resource_type))
            .filter(|p| self.conditions_hold(p, &ctx))
            .map(|p| p.action.clone())
            .collect();
        Ok(actions.into_iter().collect())
    }

    pub fn is_allowed(
        &self,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Option<&Attributes>,
    ) -> Result<bool, AuthzError> {
        Ok(self
            .check(actor_id, action, resource_type, resource_id, context)?
            .allowed)
    }

    /// Like [`check`](Self::check), but a denial becomes
    /// `AuthzError::PermissionDenied`.
    pub fn require(
        &self,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Option<&Attributes>,
    ) -> Result<Decision, AuthzError> {
        let decision = self.check(actor_id, action, resource_type, resource_id, context)?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(AuthzError::PermissionDenied {
                actor_id: actor_id.to_string(),
                action: action.to_string(),
                resource_type: resource_type.to_string(),
                reason: decision.reason,
            })
        }
    }

    pub fn validate_conditions(&self, conditions: &Value) -> Result<(), AuthzError> {
        self.evaluator.validate_conditions(conditions)
    }

    /// Drop cached effective roles for one actor, or everything. The next
    /// check for an invalidated actor re-reads assignments and parent links.
    pub fn invalidate_cache(&self, actor_id: Option<&str>) {
        self.cache.invalidate(actor_id);
        tracing::debug!(actor_id, "authorization cache invalidated");
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn load_subject(&self, actor_id: &str, domain: Option<&str>) -> Result<Subject, AuthzError> {
        let actor = match self.store.get_actor(actor_id) {
            Ok(actor) => Some(actor),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let block = match &actor {
            Some(actor) => actor.context_block(),
            None => Attributes::from([("id".to_string(), AttrValue::from(actor_id))]),
        };

        if actor.as_ref().is_some_and(|a| !a.is_active()) {
            return Ok(Subject {
                actor_id: actor_id.to_string(),
                actor,
                block,
                permissions: None,
                has_roles: false,
            });
        }

        let domain = domain.or_else(|| actor.as_ref().and_then(|a| a.domain.as_deref()));
        let roles = self.effective_roles(actor_id, domain)?;
        let permissions = self.collect_permissions(&roles)?;

        Ok(Subject {
            actor_id: actor_id.to_string(),
            has_roles: !roles.is_empty(),
            actor,
            block,
            permissions: Some(permissions),
        })
    }

    fn effective_roles(&self, actor_id: &str, domain: Option<&str>) -> Result<RoleSet, AuthzError> {
        let key = RoleCacheKey::new(actor_id, domain);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let direct: Vec<String> = match self.store.get_direct_roles(actor_id, domain) {
            Ok(roles) => roles.into_iter().map(|r| r.id).collect(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let effective = if self.settings.enable_hierarchy && !direct.is_empty() {
            self.hierarchy.effective_roles(&direct, domain)?
        } else {
            direct.into_iter().collect()
        };

        let effective = Arc::new(effective);
        self.cache.set(key, effective.clone());
        Ok(effective)
    }

    /// Union of the roles' permission ids, resolved to records sorted by id.
    fn collect_permissions(&self, role_ids: &BTreeSet<String>) -> Result<Vec<Permission>, AuthzError> {
        let mut permission_ids = BTreeSet::new();
        for role_id in role_ids {
            match self.store.get_role(role_id) {
                Ok(role) => permission_ids.extend(role.permissions),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        let mut permissions = Vec::with_capacity(permission_ids.len());
        for id in &permission_ids {
            match self.store.get_permission(id) {
                Ok(permission) => permissions.push(permission),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(permission_id = %id, "skipping unknown permission");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(permissions)
    }

    fn build_context(
        &self,
        subject: &Subject,
        resource_type: &str,
        resource_id: Option<&str>,
        extra: &Attributes,
        now: DateTime<Utc>,
    ) -> Result<Attributes, AuthzError> {
        let mut ctx = extra.clone();
        ctx.insert("user".into(), AttrValue::Map(subject.block.clone()));

        let resource = match resource_id {
            Some(id) => match self.store.get_resource(id) {
                Ok(resource) => resource.context_block(),
                Err(e) if e.is_not_found() => Attributes::from([
                    ("id".to_string(), AttrValue::from(id)),
                    ("type".to_string(), AttrValue::from(resource_type)),
                ]),
                Err(e) => return Err(e),
            },
            None => Attributes::from([("type".to_string(), AttrValue::from(resource_type))]),
        };
        ctx.insert("resource".into(), AttrValue::Map(resource));
        ctx.insert("time".into(), AttrValue::Map(time_block(now)));
        Ok(ctx)
    }

    fn conditions_hold(&self, permission: &Permission, ctx: &Attributes) -> bool {
        if !self.settings.enable_abac || !permission.has_conditions() {
            return true;
        }
        match self.evaluator.evaluate(permission.conditions.as_ref(), ctx) {
            Ok(holds) => holds,
            Err(e) => {
                tracing::warn!(
                    permission_id = %permission.id,
                    error = %e,
                    "condition evaluation failed; treating permission as non-matching"
                );
                false
            }
        }
    }

    fn decide(
        &self,
        subject: &Subject,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        extra: &Attributes,
        now: DateTime<Utc>,
    ) -> Result<Decision, AuthzError> {
        let decision = |allowed: bool, reason: String, matched: Vec<String>| Decision {
            allowed,
            reason,
            matched_permission_ids: matched,
            actor_id: subject.actor_id.clone(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(str::to_string),
            timestamp: now,
        };

        let Some(permissions) = &subject.permissions else {
            let status = subject
                .actor
                .as_ref()
                .map(|a| a.status.as_str())
                .unwrap_or("unknown");
            let reason = format!("User {} is {status}", subject.actor_id);
            tracing::debug!(actor_id = %subject.actor_id, action, resource_type, %reason, "denied");
            return Ok(decision(false, reason, Vec::new()));
        };

        if !subject.has_roles {
            tracing::debug!(actor_id = %subject.actor_id, action, resource_type, "denied: no roles");
            return Ok(decision(false, NO_ROLES_REASON.to_string(), Vec::new()));
        }

        let ctx = self.build_context(subject, resource_type, resource_id, extra, now)?;
        let matched: Vec<String> = permissions
            .iter()
            .filter(|p| p.matches(resource_type, action))
            .filter(|p| self.conditions_hold(p, &ctx))
            .map(|p| p.id.clone())
            .collect();

        let result = if matched.is_empty() {
            decision(
                false,
                format!("No matching permission for {action} on {resource_type}"),
                matched,
            )
        } else {
            let reason = format!("Allowed by permission(s): {}", matched.join(", "));
            decision(true, reason, matched)
        };

        tracing::debug!(
            actor_id = %result.actor_id,
            action,
            resource_type,
            allowed = result.allowed,
            matched = ?result.matched_permission_ids,
            "authorization decision"
        );
        Ok(result)
    }
}

fn time_block(now: DateTime<Utc>) -> Attributes {
    Attributes::from([
        ("current".to_string(), AttrValue::Timestamp(now)),
        ("hour".to_string(), AttrValue::Int(i64::from(now.hour()))),
        (
            "day_of_week".to_string(),
            AttrValue::Int(i64::from(now.weekday().num_days_from_monday())),
        ),
        ("timestamp".to_string(), AttrValue::Int(now.timestamp())),
    ])
}

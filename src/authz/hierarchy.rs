//! Role inheritance.
//!
//! Each role has at most one parent, so a role's ancestry is a chain. Chains
//! are walked iteratively with a visited set and a depth bound; a revisit or a
//! chain that reaches `max_depth` is a configuration error and is returned to
//! the caller, never swallowed.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::store::AuthzStore;
use crate::authz::types::Role;

pub const DEFAULT_MAX_DEPTH: usize = 10;

type AncestorKey = (String, Option<String>);

pub struct RoleHierarchyResolver {
    store: Arc<dyn AuthzStore>,
    max_depth: usize,
    /// (role_id, domain) -> ancestors, immediate parent first. `None` when
    /// every walk must read storage.
    ancestors: Option<RwLock<HashMap<AncestorKey, Arc<Vec<String>>>>>,
}

impl std::fmt::Debug for RoleHierarchyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleHierarchyResolver")
            .field("max_depth", &self.max_depth)
            .field("cached", &self.ancestors.as_ref().map(|c| c.read().len()))
            .finish()
    }
}

impl RoleHierarchyResolver {
    /// Resolver that caches ancestor chains until [`clear_cache`](Self::clear_cache).
    pub fn new(store: Arc<dyn AuthzStore>, max_depth: usize) -> Self {
        Self {
            store,
            max_depth,
            ancestors: Some(RwLock::new(HashMap::new())),
        }
    }

    /// Resolver that walks storage on every call. Parent-link edits are
    /// visible immediately.
    pub fn uncached(store: Arc<dyn AuthzStore>, max_depth: usize) -> Self {
        Self {
            store,
            max_depth,
            ancestors: None,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Direct roles plus every ancestor reachable through parent links.
    /// Roles missing from storage contribute nothing beyond their own id.
    #[tracing::instrument(level = "debug", skip(self, direct_role_ids))]
    pub fn effective_roles<I, S>(
        &self,
        direct_role_ids: I,
        domain: Option<&str>,
    ) -> Result<BTreeSet<String>, AuthzError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut effective = BTreeSet::new();
        for role_id in direct_role_ids {
            let role_id = role_id.as_ref();
            effective.insert(role_id.to_string());
            let ancestors = self.ancestors(role_id, domain)?;
            effective.extend(ancestors.iter().cloned());
        }
        Ok(effective)
    }

    /// Ancestors of `role_id`, immediate parent first. On a caching resolver
    /// the chain is kept per `(role_id, domain)` until
    /// [`clear_cache`](Self::clear_cache).
    pub fn ancestors(&self, role_id: &str, domain: Option<&str>) -> Result<Arc<Vec<String>>, AuthzError> {
        let Some(cache) = &self.ancestors else {
            return Ok(Arc::new(self.walk_ancestors(role_id, domain)?));
        };

        let key = (role_id.to_string(), domain.map(str::to_string));
        if let Some(hit) = cache.read().get(&key) {
            return Ok(hit.clone());
        }

        let chain = Arc::new(self.walk_ancestors(role_id, domain)?);
        cache.write().insert(key, chain.clone());
        Ok(chain)
    }

    /// Uncached parent walk. Stops at a root, a missing role, or (with a
    /// domain) the first role outside that domain; the parent id that led to
    /// the stopping role is still included.
    fn walk_ancestors(&self, role_id: &str, domain: Option<&str>) -> Result<Vec<String>, AuthzError> {
        let mut ancestors = Vec::new();
        let mut visited = HashSet::new();
        let mut current = role_id.to_string();

        loop {
            if ancestors.len() >= self.max_depth {
                tracing::warn!(role_id, max_depth = self.max_depth, "role hierarchy too deep");
                return Err(AuthzError::MaxDepthExceeded {
                    role_id: role_id.to_string(),
                    depth: ancestors.len(),
                    max_depth: self.max_depth,
                });
            }
            if !visited.insert(current.clone()) {
                tracing::warn!(role_id, at = %current, "circular role hierarchy");
                return Err(AuthzError::CircularDependency { role_id: current });
            }

            let role = match self.store.get_role(&current) {
                Ok(role) => role,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };
            if domain.is_some() && role.domain.as_deref() != domain {
                break;
            }
            match role.parent_id {
                Some(parent) => {
                    ancestors.push(parent.clone());
                    current = parent;
                }
                None => break,
            }
        }

        Ok(ancestors)
    }

    /// Every role below `role_id`, breadth-first.
    pub fn descendants(&self, role_id: &str, domain: Option<&str>) -> Result<Vec<String>, AuthzError> {
        Ok(self
            .descendant_levels(role_id, domain)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Descendants paired with their distance below `role_id` (children are 1).
    fn descendant_levels(
        &self,
        role_id: &str,
        domain: Option<&str>,
    ) -> Result<Vec<(String, usize)>, AuthzError> {
        let roles = self.store.list_roles(domain)?;
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for role in &roles {
            if let Some(parent) = role.parent_id.as_deref() {
                children.entry(parent).or_default().push(role.id.as_str());
            }
        }

        let mut descendants = Vec::new();
        let mut seen = HashSet::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(role_id, 0usize)]);

        while let Some((current, level)) = queue.pop_front() {
            if !visited.insert(current) {
                return Err(AuthzError::CircularDependency {
                    role_id: current.to_string(),
                });
            }
            for &child in children.get(current).into_iter().flatten() {
                if seen.insert(child) {
                    descendants.push((child.to_string(), level + 1));
                    queue.push_back((child, level + 1));
                }
            }
        }

        Ok(descendants)
    }

    /// Whether `ancestor_id` appears in the parent chain of `role_id`.
    pub fn is_ancestor_of(&self, ancestor_id: &str, role_id: &str) -> Result<bool, AuthzError> {
        Ok(self
            .ancestors(role_id, None)?
            .iter()
            .any(|id| id == ancestor_id))
    }

    /// Must pass before `candidate_parent_id` is persisted as the parent of
    /// `role_id`. Reads storage directly, bypassing the ancestor cache.
    ///
    /// The depth bound applies to the whole subtree that moves under the new
    /// parent: the deepest descendant of `role_id` must still fit.
    pub fn validate_hierarchy(&self, role_id: &str, candidate_parent_id: &str) -> Result<(), AuthzError> {
        if role_id == candidate_parent_id {
            return Err(AuthzError::CircularDependency {
                role_id: role_id.to_string(),
            });
        }

        self.store.get_role(candidate_parent_id)?;
        let chain = self.walk_ancestors(candidate_parent_id, None)?;
        if chain.iter().any(|id| id == role_id) {
            return Err(AuthzError::CircularDependency {
                role_id: role_id.to_string(),
            });
        }

        let below = self
            .descendant_levels(role_id, None)?
            .into_iter()
            .map(|(_, level)| level)
            .max()
            .unwrap_or(0);
        let depth = chain.len() + 1 + below;
        if depth >= self.max_depth {
            return Err(AuthzError::MaxDepthExceeded {
                role_id: role_id.to_string(),
                depth,
                max_depth: self.max_depth,
            });
        }
        Ok(())
    }

    /// The role followed by its ancestors, leaf to root. Missing roles are
    /// skipped.
    pub fn role_chain(&self, role_id: &str) -> Result<Vec<Role>, AuthzError> {
        let mut chain = Vec::new();
        let ancestors = self.ancestors(role_id, None)?;
        for id in std::iter::once(role_id).chain(ancestors.iter().map(String::as_str)) {
            match self.store.get_role(id) {
                Ok(role) => chain.push(role),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(chain)
    }

    /// Number of ancestors; 0 for a root role.
    pub fn hierarchy_depth(&self, role_id: &str) -> Result<usize, AuthzError> {
        Ok(self.ancestors(role_id, None)?.len())
    }

    /// Permission ids granted by the role directly or through its ancestors.
    pub fn inherited_permissions(&self, role_id: &str) -> Result<BTreeSet<String>, AuthzError> {
        Ok(self
            .role_chain(role_id)?
            .into_iter()
            .flat_map(|role| role.permissions)
            .collect())
    }

    /// Forget cached ancestor chains. Required after any parent-link change.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.ancestors {
            cache.write().clear();
        }
    }
}

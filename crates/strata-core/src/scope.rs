//! Tenant scopes and the ambient scope stack.
//!
//! Every store call runs under an (organization, project) scope. Callers pass
//! a [`TenantScope`] explicitly, or read it from a [`ScopeContext`] carried
//! through a task. A context holds a base scope plus temporary overrides.
//! Each override is removed by its own guard and is visible only to the task
//! that pushed it, so overlapping overrides on one carrier never leak into
//! each other and the base becomes current again exactly once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::types::{OrganizationId, ProjectId};

/// A concrete (organization, project) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantScope {
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
}

impl TenantScope {
    pub fn new(organization_id: OrganizationId, project_id: ProjectId) -> Self {
        Self {
            organization_id,
            project_id,
        }
    }

    /// A fresh random tenant. Handy for tests.
    pub fn random() -> Self {
        Self::new(OrganizationId::new(), ProjectId::new())
    }
}

impl std::fmt::Display for TenantScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.project_id)
    }
}

/// The scope a unit of work runs under.
///
/// `Bootstrap` is the wildcard used by administrative paths: it sees every
/// row. Tenant-facing store operations and the public storage entry points
/// take a `&TenantScope`, never a `Scope`, so only the store's admin surface
/// can open a session under the wildcard. As a query scope it is still
/// narrowed by the session's policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    Tenant(TenantScope),
    Bootstrap,
}

impl Scope {
    /// Whether a row owned by `tenant` is inside this scope.
    pub fn covers(&self, tenant: &TenantScope) -> bool {
        match self {
            Self::Tenant(s) => s == tenant,
            Self::Bootstrap => true,
        }
    }

    pub fn as_tenant(&self) -> Option<&TenantScope> {
        match self {
            Self::Tenant(s) => Some(s),
            Self::Bootstrap => None,
        }
    }
}

impl From<TenantScope> for Scope {
    fn from(s: TenantScope) -> Self {
        Self::Tenant(s)
    }
}

impl From<&TenantScope> for Scope {
    fn from(s: &TenantScope) -> Self {
        Self::Tenant(*s)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tenant(s) => write!(f, "{s}"),
            Self::Bootstrap => write!(f, "*"),
        }
    }
}

// ── Ambient Context ───────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Frame {
    id: u64,
    scope: Scope,
}

/// Bookkeeping shared by every clone of a carrier.
struct ScopeStack {
    base: Scope,
    frames: Mutex<Vec<Frame>>,
    next_frame: AtomicU64,
    restorations: AtomicU64,
}

/// Overrides pushed along one line of execution. A view created by
/// [`ScopeContext::scoped`] falls back to its parent once its own frames end.
struct View {
    frames: Mutex<Vec<Frame>>,
    parent: Option<Arc<View>>,
}

impl View {
    fn root() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            parent: None,
        })
    }

    fn child(parent: Arc<View>) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            parent: Some(parent),
        })
    }

    fn innermost(&self) -> Option<Scope> {
        if let Some(frame) = self.frames.lock().last() {
            return Some(frame.scope);
        }
        self.parent.as_ref().and_then(|p| p.innermost())
    }
}

/// Cloneable carrier of the active scope for a unit of work.
///
/// Clones share the frame bookkeeping, but the current scope is resolved per
/// task: inside [`ScopeContext::scoped`] a task only sees its own overrides,
/// never ones pushed concurrently by another task on the same carrier.
#[derive(Clone)]
pub struct ScopeContext {
    inner: Arc<ScopeStack>,
    view: Arc<View>,
}

impl ScopeContext {
    pub fn new(base: impl Into<Scope>) -> Self {
        Self {
            inner: Arc::new(ScopeStack {
                base: base.into(),
                frames: Mutex::new(Vec::new()),
                next_frame: AtomicU64::new(1),
                restorations: AtomicU64::new(0),
            }),
            view: View::root(),
        }
    }

    pub fn base(&self) -> Scope {
        self.inner.base
    }

    /// The view of the running task: the installed carrier when it belongs
    /// to the same context, otherwise this carrier's own.
    fn active_view(&self) -> Arc<View> {
        CURRENT_SCOPE
            .try_with(|c| Arc::ptr_eq(&c.inner, &self.inner).then(|| Arc::clone(&c.view)))
            .ok()
            .flatten()
            .unwrap_or_else(|| Arc::clone(&self.view))
    }

    /// The innermost override active for the running task, or the base scope.
    pub fn current(&self) -> Scope {
        self.active_view().innermost().unwrap_or(self.inner.base)
    }

    /// The current scope as a tenant scope. Fails under the wildcard scope.
    pub fn current_tenant(&self) -> Result<TenantScope> {
        match self.current() {
            Scope::Tenant(s) => Ok(s),
            Scope::Bootstrap => Err(StrataError::TenantMismatch(
                "bootstrap scope cannot serve a tenant-facing call".to_string(),
            )),
        }
    }

    /// Number of active overrides across every task sharing this carrier.
    pub fn depth(&self) -> usize {
        self.inner.frames.lock().len()
    }

    /// How many times the base scope has become current again after the last
    /// override ended.
    pub fn restorations(&self) -> u64 {
        self.inner.restorations.load(Ordering::SeqCst)
    }

    /// Push a temporary override. The override ends when the guard drops.
    pub fn push(&self, scope: impl Into<Scope>) -> ScopeGuard {
        self.push_into(self.active_view(), scope.into())
    }

    fn push_into(&self, view: Arc<View>, scope: Scope) -> ScopeGuard {
        let id = self.inner.next_frame.fetch_add(1, Ordering::SeqCst);
        let frame = Frame { id, scope };
        let depth = {
            let mut frames = self.inner.frames.lock();
            frames.push(frame);
            frames.len()
        };
        view.frames.lock().push(frame);
        tracing::debug!(frame = id, depth, scope = %scope, "Scope override pushed");
        ScopeGuard {
            stack: Arc::clone(&self.inner),
            view,
            id,
        }
    }

    /// Run `fut` with `scope` pushed for its whole duration. The override is
    /// visible to `fut` only, not to other tasks sharing this carrier.
    pub async fn scoped<F>(&self, scope: impl Into<Scope>, fut: F) -> F::Output
    where
        F: Future,
    {
        let child = Self {
            inner: Arc::clone(&self.inner),
            view: View::child(self.active_view()),
        };
        let _guard = child.push_into(Arc::clone(&child.view), scope.into());
        CURRENT_SCOPE.scope(child, fut).await
    }
}

/// Removes exactly one override frame when dropped.
#[must_use = "the override ends as soon as the guard is dropped"]
pub struct ScopeGuard {
    stack: Arc<ScopeStack>,
    view: Arc<View>,
    id: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.view.frames.lock().retain(|f| f.id != self.id);
        let mut frames = self.stack.frames.lock();
        let Some(pos) = frames.iter().position(|f| f.id == self.id) else {
            return;
        };
        frames.remove(pos);
        if frames.is_empty() {
            self.stack.restorations.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(frame = self.id, base = %self.stack.base, "Base scope restored");
        }
    }
}

tokio::task_local! {
    static CURRENT_SCOPE: ScopeContext;
}

/// Run `fut` with `ctx` installed as the task's ambient scope carrier.
pub async fn with_context<F>(ctx: ScopeContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_SCOPE.scope(ctx, fut).await
}

/// The ambient carrier for the running task, if one is installed.
pub fn ambient() -> Option<ScopeContext> {
    CURRENT_SCOPE.try_with(|c| c.clone()).ok()
}

/// The scope currently in effect on the ambient carrier.
pub fn current_scope() -> Option<Scope> {
    ambient().map(|ctx| ctx.current())
}

/// The ambient tenant scope. Fails when no carrier is installed or the
/// ambient scope is the wildcard.
pub fn current_tenant() -> Result<TenantScope> {
    match ambient() {
        Some(ctx) => ctx.current_tenant(),
        None => Err(StrataError::TenantMismatch(
            "no tenant scope in context".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn nested_overrides_unwind_in_order() {
        let base = TenantScope::random();
        let a = TenantScope::random();
        let b = TenantScope::random();
        let ctx = ScopeContext::new(base);

        let ga = ctx.push(a);
        assert_eq!(ctx.current(), Scope::Tenant(a));
        {
            let _gb = ctx.push(b);
            assert_eq!(ctx.current(), Scope::Tenant(b));
            assert_eq!(ctx.depth(), 2);
        }
        assert_eq!(ctx.current(), Scope::Tenant(a));
        drop(ga);
        assert_eq!(ctx.current(), Scope::Tenant(base));
        assert_eq!(ctx.restorations(), 1);
    }

    #[test]
    fn out_of_order_release_keeps_inner_frame() {
        let base = TenantScope::random();
        let a = TenantScope::random();
        let b = TenantScope::random();
        let ctx = ScopeContext::new(base);

        let ga = ctx.push(a);
        let gb = ctx.push(b);
        drop(ga);
        // The outer override ended first; the inner one is still active.
        assert_eq!(ctx.current(), Scope::Tenant(b));
        assert_eq!(ctx.restorations(), 0);
        drop(gb);
        assert_eq!(ctx.current(), Scope::Tenant(base));
        assert_eq!(ctx.restorations(), 1);
    }

    #[test]
    fn bootstrap_is_not_a_tenant() {
        let ctx = ScopeContext::new(Scope::Bootstrap);
        assert!(ctx.current_tenant().is_err());
        assert!(Scope::Bootstrap.covers(&TenantScope::random()));

        let t = TenantScope::random();
        assert!(Scope::Tenant(t).covers(&t));
        assert!(!Scope::Tenant(t).covers(&TenantScope::random()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_overrides_restore_base_once() {
        let base = TenantScope::random();
        let ctx = ScopeContext::new(base);

        // Hold one override open while many short ones race on the same
        // carrier, so the base can only come back after all of them end.
        let outer = ctx.push(TenantScope::random());
        let mut handles = Vec::new();
        for i in 0..32u64 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let scope = TenantScope::random();
                let inner = ctx.clone();
                ctx.scoped(scope, async move {
                    tokio::time::sleep(Duration::from_millis(i % 5)).await;
                    let _nested = ctx_push_nested(&inner);
                    tokio::task::yield_now().await;
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(ctx.restorations(), 0);
        assert_eq!(ctx.depth(), 1);

        drop(outer);
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.current(), Scope::Tenant(base));
        assert_eq!(ctx.restorations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_overrides_stay_with_their_task() {
        let ctx = ScopeContext::new(TenantScope::random());
        let x = TenantScope::random();
        let y = TenantScope::random();

        let task = |scope: TenantScope, wait: u64| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let observer = ctx.clone();
                ctx.scoped(scope, async move {
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    (observer.current(), current_tenant().unwrap())
                })
                .await
            })
        };
        let a = task(x, 50);
        let b = task(y, 100);

        assert_eq!(a.await.unwrap(), (Scope::Tenant(x), x));
        assert_eq!(b.await.unwrap(), (Scope::Tenant(y), y));
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.restorations(), 1);
    }

    #[tokio::test]
    async fn nested_scoped_falls_back_to_outer_override() {
        let base = TenantScope::random();
        let outer = TenantScope::random();
        let inner = TenantScope::random();
        let ctx = ScopeContext::new(base);

        let seen = ctx
            .scoped(outer, async {
                let before = ctx.current();
                let during = ctx.scoped(inner, async { ctx.current() }).await;
                (before, during, ctx.current())
            })
            .await;
        assert_eq!(
            seen,
            (Scope::Tenant(outer), Scope::Tenant(inner), Scope::Tenant(outer))
        );
        assert_eq!(ctx.current(), Scope::Tenant(base));
        assert_eq!(ctx.restorations(), 1);
    }

    fn ctx_push_nested(ctx: &ScopeContext) -> ScopeGuard {
        ctx.push(TenantScope::random())
    }

    #[tokio::test]
    async fn ambient_context_visible_inside_task_scope() {
        let tenant = TenantScope::random();
        assert!(current_tenant().is_err());

        let ctx = ScopeContext::new(tenant);
        let override_scope = TenantScope::random();
        let (seen, inner) = with_context(ctx, async {
            let seen = current_tenant().unwrap();
            let carrier = ambient().unwrap();
            let inner = carrier
                .scoped(override_scope, async { current_scope() })
                .await;
            (seen, inner)
        })
        .await;
        assert_eq!(seen, tenant);
        assert_eq!(inner, Some(Scope::Tenant(override_scope)));
        assert!(current_scope().is_none());
    }
}

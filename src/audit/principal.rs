use crate::core::Value;
use std::sync::Arc;

/// The signed-in principal, as seen by the host application.
pub trait CurrentUser: Send + Sync {
    /// Dedicated id accessor; preferred when available.
    fn user_id(&self) -> Option<i64> {
        None
    }

    /// Generic field accessor, consulted for `id` when `user_id` yields nothing.
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// A principal with a fixed id, e.g. a system account for background jobs.
#[derive(Debug, Clone, Copy)]
pub struct FixedUser(pub i64);

impl CurrentUser for FixedUser {
    fn user_id(&self) -> Option<i64> {
        Some(self.0)
    }
}

/// Per-operation attribution carried alongside a record context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationScope {
    /// Wins over every other source of the acting principal.
    pub principal: Option<i64>,
    /// Free-form description of the request or job that caused the change.
    pub request: Option<String>,
}

impl OperationScope {
    pub fn request_or_default(&self) -> String {
        self.request
            .clone()
            .unwrap_or_else(|| std::env::args().collect::<Vec<_>>().join(" "))
    }
}

#[derive(Clone, Default)]
pub struct PrincipalResolver {
    current_user: Option<Arc<dyn CurrentUser>>,
}

impl PrincipalResolver {
    pub fn new(current_user: Option<Arc<dyn CurrentUser>>) -> Self {
        Self { current_user }
    }

    /// Scope override, then the caller's id, then the current user
    /// (dedicated accessor, then `id` field), then zero.
    pub fn resolve(&self, scope: &OperationScope, caller_id: Option<i64>) -> i64 {
        if let Some(id) = scope.principal.or(caller_id) {
            return id;
        }
        let Some(user) = &self.current_user else {
            return 0;
        };
        user.user_id()
            .or_else(|| user.field("id").and_then(|v| v.as_i64()))
            .unwrap_or(0)
    }
}

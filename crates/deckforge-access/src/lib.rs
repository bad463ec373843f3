//! Access middleware for deckforge commands.
//!
//! Every command passes through an [`AccessGuard`]: the caller's role is
//! checked against the [`AccessPolicy`], request text is screened by the
//! [`ContentFilter`], and the outcome lands in the [`AuditLog`]. The caller's
//! [`Identity`] comes from a session token checked by [`TokenSigner`].

mod audit;
mod auth;
mod filter;
mod masking;
mod memory;
mod roles;

use std::sync::Arc;
use std::time::Instant;

pub use audit::{AuditEntry, AuditLog, AuditOutcome, DETAIL_PREVIEW_CHARS};
pub use auth::{
    TokenSigner, UserRecord, UserStore, AUTH_SECRET_VAR, DEFAULT_TOKEN_TTL_SECS, EXPIRED_TOKEN,
    INVALID_CREDENTIALS, INVALID_TOKEN, MIN_PASSWORD_CHARS,
};
pub use filter::{ContentFilter, DEFAULT_BANNED_KEYWORDS};
pub use masking::{mask_presentation, mask_sensitive, preview};
pub use memory::{MemoryTurn, SessionMemory};
pub use roles::{AccessPolicy, Action, Identity, Role};

use deckforge_types::Result;

/// Policy check, content screening and auditing for one command.
pub struct AccessGuard {
    policy: AccessPolicy,
    filter: ContentFilter,
    audit: Option<Arc<AuditLog>>,
}

impl Default for AccessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGuard {
    pub fn new() -> Self {
        Self {
            policy: AccessPolicy::new(),
            filter: ContentFilter::default(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_filter(mut self, filter: ContentFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Authorize `action` and screen `request_text`. Refusals are audited
    /// before the error is returned.
    pub async fn admit(
        &self,
        identity: &Identity,
        action: Action,
        request_text: &str,
    ) -> Result<Admission> {
        let started = Instant::now();

        if let Err(err) = self.policy.authorize(identity, action) {
            tracing::warn!(subject = %identity.subject, role = %identity.role, action = %action, "access denied");
            self.audit(identity, action.as_str(), AuditOutcome::Denied, started, request_text)
                .await;
            return Err(err);
        }

        if let Err(err) = self.filter.check(request_text) {
            self.audit(identity, "blocked_content", AuditOutcome::BlockedContent, started, request_text)
                .await;
            return Err(err);
        }

        Ok(Admission {
            identity: identity.clone(),
            action,
            started,
        })
    }

    /// Record how an admitted command finished.
    pub async fn finish(&self, admission: Admission, outcome: AuditOutcome, detail: &str) {
        self.audit(
            &admission.identity,
            admission.action.as_str(),
            outcome,
            admission.started,
            detail,
        )
        .await;
    }

    async fn audit(
        &self,
        identity: &Identity,
        action: &str,
        outcome: AuditOutcome,
        started: Instant,
        detail: &str,
    ) {
        let Some(log) = &self.audit else {
            return;
        };
        let entry = AuditEntry::new(
            identity,
            action,
            outcome,
            started.elapsed().as_millis() as u64,
            detail,
        );
        // Audit failures must not change a command's result.
        if let Err(e) = log.record(&entry).await {
            tracing::error!(path = %log.path().display(), error = %e, "failed to write audit entry");
        }
    }
}

/// Proof that a command passed the guard; hand it back to [`AccessGuard::finish`].
#[derive(Debug)]
pub struct Admission {
    pub identity: Identity,
    pub action: Action,
    started: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckforge_types::DeckError;
    use tempfile::TempDir;

    fn guard_with_log(dir: &TempDir) -> (AccessGuard, Arc<AuditLog>) {
        let log = Arc::new(AuditLog::new(dir.path().join("audit.log")));
        (AccessGuard::new().with_audit(log.clone()), log)
    }

    #[tokio::test]
    async fn admitted_command_is_audited_on_finish() {
        let dir = TempDir::new().unwrap();
        let (guard, log) = guard_with_log(&dir);
        let exec = Identity::new("exec@example.com", Role::Executive).unwrap();

        let admission = guard.admit(&exec, Action::Generate, "AI in healthcare").await.unwrap();
        assert!(log.entries().await.unwrap().is_empty());

        guard
            .finish(admission, AuditOutcome::Success, "topic=AI in healthcare")
            .await;
        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "generate");
        assert_eq!(entries[0].subject, "exec@example.com");
        assert_eq!(entries[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn denied_request_is_audited() {
        let dir = TempDir::new().unwrap();
        let (guard, log) = guard_with_log(&dir);
        let junior = Identity::new("junior@example.com", Role::JuniorStaff).unwrap();

        let err = guard.admit(&junior, Action::Generate, "AI").await.unwrap_err();
        assert!(matches!(err, DeckError::AccessDenied { .. }));
        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert_eq!(entries[0].role, "Junior Staff");
    }

    #[tokio::test]
    async fn banned_topic_is_blocked_and_audited() {
        let dir = TempDir::new().unwrap();
        let (guard, log) = guard_with_log(&dir);
        let analyst = Identity::new("analyst@example.com", Role::Analyst).unwrap();

        let err = guard
            .admit(&analyst, Action::Generate, "classified merger plans")
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::ContentBlocked { .. }));
        let entries = log.entries().await.unwrap();
        assert_eq!(entries[0].action, "blocked_content");
        assert_eq!(entries[0].outcome, AuditOutcome::BlockedContent);
        assert_eq!(entries[0].detail, "classified merger plans");
    }

    #[tokio::test]
    async fn guard_without_audit_log_still_enforces() {
        let guard = AccessGuard::new();
        let junior = Identity::new("junior@example.com", Role::JuniorStaff).unwrap();
        assert!(guard.admit(&junior, Action::IndexDocuments, "").await.is_err());
        assert!(guard.admit(&junior, Action::Export, "").await.is_ok());
    }
}

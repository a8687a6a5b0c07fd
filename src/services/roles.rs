//! Domain-scoped role assignment.
//!
//! Exactly one superuser per domain, first successful writer wins. There is
//! no lock and no read-then-write: the storage partial unique constraint is
//! the arbiter, which keeps the algorithm correct across any number of
//! concurrent requests and server processes. At most two insert attempts
//! are ever made, then the existing row is read back.

use std::sync::Arc;
use uuid::Uuid;

use crate::db::{AuthStore, StoreError, DOMAIN_ROLES_PKEY, DOMAIN_ROLES_SUPERUSER_UNIQ};
use crate::error::{ErrorCode, ServiceError};
use crate::models::{DomainRole, RoleKind};
use crate::services::client_id::normalize_domain;
use crate::utils::Clock;

#[derive(Clone)]
pub struct DomainRoleService {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
}

impl DomainRoleService {
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Assign the user's role for the domain, creating it on first login:
    /// superuser if the domain has none yet, otherwise user. Idempotent for
    /// a user that already has a row.
    pub async fn ensure_role(
        &self,
        domain: &str,
        user_id: Uuid,
    ) -> Result<DomainRole, ServiceError> {
        let domain = normalize_domain(domain);
        let now = self.clock.now();

        let superuser = DomainRole::new(domain.clone(), user_id, RoleKind::Superuser, now);
        match self.store.insert_domain_role(&superuser).await {
            Ok(()) => {
                tracing::info!(domain = %domain, user_id = %user_id, "first login claimed superuser");
                return Ok(superuser);
            }
            Err(err) if err.is_unique_violation_of(DOMAIN_ROLES_SUPERUSER_UNIQ) => {
                // Someone else holds superuser; retry as plain user.
            }
            Err(err) if err.is_unique_violation_of(DOMAIN_ROLES_PKEY) => {
                return self.read_back(&domain, user_id).await;
            }
            Err(err) => return Err(err.into()),
        }

        let user_role = DomainRole::new(domain.clone(), user_id, RoleKind::User, now);
        match self.store.insert_domain_role(&user_role).await {
            Ok(()) => Ok(user_role),
            Err(StoreError::UniqueViolation { .. }) => {
                // A concurrent request inserted this same (domain, user).
                self.read_back(&domain, user_id).await
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_role(
        &self,
        domain: &str,
        user_id: Uuid,
    ) -> Result<Option<DomainRole>, ServiceError> {
        Ok(self
            .store
            .find_domain_role(&normalize_domain(domain), user_id)
            .await?)
    }

    async fn read_back(&self, domain: &str, user_id: Uuid) -> Result<DomainRole, ServiceError> {
        self.store
            .find_domain_role(domain, user_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal(
                    ErrorCode::StorageFailure,
                    format!("role row for {domain}/{user_id} vanished after conflict"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStore;
    use crate::utils::SystemClock;

    fn service(store: Arc<dyn AuthStore>) -> DomainRoleService {
        DomainRoleService::new(store, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn first_writer_gets_superuser_rest_get_user() {
        let service = service(Arc::new(MemStore::new()));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(
            service.ensure_role("tenant.example", first).await.unwrap().role(),
            RoleKind::Superuser
        );
        assert_eq!(
            service.ensure_role("tenant.example", second).await.unwrap().role(),
            RoleKind::User
        );
    }

    #[tokio::test]
    async fn repeat_login_returns_the_existing_role() {
        let service = service(Arc::new(MemStore::new()));
        let user = Uuid::new_v4();

        let initial = service.ensure_role("tenant.example", user).await.unwrap();
        let again = service.ensure_role("tenant.example", user).await.unwrap();
        assert_eq!(initial.role(), RoleKind::Superuser);
        assert_eq!(again.role(), RoleKind::Superuser);
    }

    #[tokio::test]
    async fn superuser_is_scoped_per_domain() {
        let service = service(Arc::new(MemStore::new()));
        let user = Uuid::new_v4();

        assert_eq!(
            service.ensure_role("a.example", user).await.unwrap().role(),
            RoleKind::Superuser
        );
        assert_eq!(
            service.ensure_role("b.example", user).await.unwrap().role(),
            RoleKind::Superuser
        );
    }

    #[tokio::test]
    async fn domain_is_normalized_before_assignment() {
        let service = service(Arc::new(MemStore::new()));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        service.ensure_role("Tenant.Example.", first).await.unwrap();
        let role = service.ensure_role("tenant.example", second).await.unwrap();
        assert_eq!(role.role(), RoleKind::User);
        assert_eq!(role.domain, "tenant.example");
    }
}

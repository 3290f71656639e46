//! Saved reconciliation rules.

use super::store::ReconStore;
use super::tasks::Caller;
use crate::engine::{FilterExpr, FilterSide};
use crate::error::ReconError;
use crate::models::{ReconConfig, ReconConfigDraft};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct ConfigService {
    store: Arc<dyn ReconStore>,
}

impl ConfigService {
    pub fn new(store: Arc<dyn ReconStore>) -> Self {
        Self { store }
    }

    /// Rules are validated in full, filters included, before they are stored.
    fn validate(draft: &ReconConfigDraft) -> Result<(), ReconError> {
        draft.validate()?;
        FilterExpr::compile(&draft.bank_filters, FilterSide::Bank)?;
        FilterExpr::compile(&draft.book_filters, FilterSide::Book)?;
        Ok(())
    }

    #[instrument(skip(self, draft), fields(tenant_id = %caller.tenant_id))]
    pub async fn create(
        &self,
        caller: &Caller,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        Self::validate(&draft)?;
        let config = self.store.create_config(caller.tenant_id, draft).await?;
        info!(config_id = %config.id, scope = config.scope.as_str(), "Recon config created");
        Ok(config)
    }

    /// Configs visible to the caller, defaults first.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<ReconConfig>, ReconError> {
        let mut configs: Vec<ReconConfig> = self
            .store
            .list_configs(caller.tenant_id)
            .await?
            .into_iter()
            .filter(|c| c.visible_to(caller.company_id, &caller.user_id))
            .collect();
        configs.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
        Ok(configs)
    }

    pub async fn get(&self, caller: &Caller, id: Uuid) -> Result<ReconConfig, ReconError> {
        let config = self.store.get_config(caller.tenant_id, id).await?;
        if !config.visible_to(caller.company_id, &caller.user_id) {
            return Err(ReconError::not_found("recon config", id));
        }
        Ok(config)
    }

    #[instrument(skip(self, draft), fields(tenant_id = %caller.tenant_id, config_id = %id))]
    pub async fn update(
        &self,
        caller: &Caller,
        id: Uuid,
        draft: ReconConfigDraft,
    ) -> Result<ReconConfig, ReconError> {
        self.get(caller, id).await?;
        Self::validate(&draft)?;
        self.store.update_config(caller.tenant_id, id, draft).await
    }

    #[instrument(skip(self), fields(tenant_id = %caller.tenant_id, config_id = %id))]
    pub async fn delete(&self, caller: &Caller, id: Uuid) -> Result<(), ReconError> {
        self.get(caller, id).await?;
        self.store.delete_config(caller.tenant_id, id).await?;
        info!("Recon config deleted");
        Ok(())
    }
}

use std::collections::BTreeSet;
use tracing::debug;

use crate::database_ops::error::StoreError;
use crate::database_ops::models::{AppId, RefId, RefKind};
use crate::database_ops::store::CatalogTx;

/// Minimal edit turning the stored association set into the target set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub add: Vec<RefId>,
    pub remove: Vec<RefId>,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub fn plan_sync(current: &BTreeSet<RefId>, target: &BTreeSet<RefId>) -> SyncPlan {
    SyncPlan {
        add: target.difference(current).copied().collect(),
        remove: current.difference(target).copied().collect(),
    }
}

/// Makes the `(app_id, kind)` junction rows equal `target`. An empty target clears them.
pub async fn sync_associations(
    tx: &mut dyn CatalogTx,
    app_id: AppId,
    kind: RefKind,
    target: &BTreeSet<RefId>,
) -> Result<SyncPlan, StoreError> {
    let current = tx.associated_ids(app_id, kind).await?;
    let plan = plan_sync(&current, target);
    if plan.is_noop() {
        return Ok(plan);
    }
    if !plan.remove.is_empty() {
        tx.unlink(app_id, kind, &plan.remove).await?;
    }
    if !plan.add.is_empty() {
        tx.link(app_id, kind, &plan.add).await?;
    }
    debug!(
        app_id = app_id.0,
        %kind,
        added = plan.add.len(),
        removed = plan.remove.len(),
        "associations reconciled"
    );
    Ok(plan)
}

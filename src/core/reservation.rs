//! Composite reservation protocol.
//!
//! A composite walks `Empty -> Reserving -> Ready` while its components are
//! claimed `Free -> Assigned` concurrently. The walk is all-or-nothing: when
//! a required component cannot be claimed, or fewer than
//! `min_required_components` end up assigned, every component claimed by
//! this call is freed again and the composite returns to `Empty`.

use std::sync::Arc;

use futures::future::join_all;

use crate::core::error::{EngineError, EngineResult, EntityKind};
use crate::core::model::{CompositeResource, CompositeUnitLink, Holder, UnitResource};
use crate::core::state::{transition, CompositeResourceState, UnitResourceState};
use crate::core::store::{composite_unit_links, Store};
use crate::util::serde::{CompositeResourceId, UnitResourceId};

/// Claim a `Free` unit resource for `holder`.
///
/// Fails with [`EngineError::ResourceAllocation`] naming the resource when it
/// is not `Free`, and with [`EngineError::ConcurrencyConflict`] when another
/// writer claimed it between the read and the write.
pub(crate) async fn claim_unit(
    store: &dyn Store,
    id: UnitResourceId,
    holder: Holder,
) -> EngineResult<UnitResource> {
    let mut unit = store.unit_resources().fetch(id).await?;
    if !unit.state.is_available() {
        return Err(EngineError::ResourceAllocation(format!(
            "unit resource {id} ({}) is {}, expected free",
            unit.name, unit.state
        )));
    }
    transition(&mut unit, UnitResourceState::Assigned)?;
    unit.holder = Some(holder);
    store.unit_resources().update(&unit).await
}

/// Return a unit resource held by `holder` to `Free`.
///
/// Returns `Ok(None)` when the unit is held by someone else or is not in a
/// releasable state; that is not an error.
pub(crate) async fn free_unit(
    store: &dyn Store,
    id: UnitResourceId,
    holder: Holder,
) -> EngineResult<Option<UnitResource>> {
    let mut unit = store.unit_resources().fetch(id).await?;
    if !unit.is_held_by(holder) || !unit.state.is_releasable() {
        return Ok(None);
    }
    transition(&mut unit, UnitResourceState::Free)?;
    store.unit_resources().update(&unit).await.map(Some)
}

/// Undo claims made earlier in a failed call. Failures are logged, never
/// returned, so the original error reaches the caller.
pub(crate) async fn rollback_units(store: &dyn Store, ids: &[UnitResourceId], holder: Holder) {
    let results = join_all(ids.iter().map(|&id| free_unit(store, id, holder))).await;
    for (id, result) in ids.iter().zip(results) {
        if let Err(err) = result {
            tracing::warn!(resource_id = id, error = %err, "rollback of unit resource failed");
        }
    }
}

fn ensure_held(composite: &CompositeResource, holder: Holder) -> EngineResult<()> {
    if composite.is_held_by(holder) {
        return Ok(());
    }
    let owner = composite
        .holder
        .map_or_else(|| "nobody".to_string(), |h| h.to_string());
    Err(EngineError::BusinessLogic(format!(
        "composite resource {} is held by {owner}, not {holder}",
        composite.id
    )))
}

/// Drives composites and their components through reserve, use and release.
#[derive(Clone)]
pub struct CompositeReservation {
    store: Arc<dyn Store>,
}

impl CompositeReservation {
    /// Create the protocol over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Whether the composite can currently be reserved: `Empty`, every
    /// required component `Free`, and enough `Free` components to satisfy
    /// `min_required_components`.
    pub async fn is_available(&self, composite: &CompositeResource) -> EngineResult<bool> {
        if !composite.state.is_available_for_reservation() {
            return Ok(false);
        }
        let links = composite_unit_links(self.store.as_ref(), composite.id).await?;
        let mut free = 0_u32;
        for link in &links {
            let unit = self.store.unit_resources().fetch(link.unit_resource_id).await?;
            if unit.state.is_available() {
                free += 1;
            } else if link.required {
                return Ok(false);
            }
        }
        Ok(free >= composite.min_required_components.unwrap_or(0))
    }

    /// Reserve the composite on behalf of `holder`.
    ///
    /// On success the composite is `Ready`, held by `holder`, and each claimed
    /// component is `Assigned` and held by the composite.
    pub async fn reserve(
        &self,
        id: CompositeResourceId,
        holder: Holder,
    ) -> EngineResult<CompositeResource> {
        let store = self.store.as_ref();
        let mut composite = store.composite_resources().fetch(id).await?;
        transition(&mut composite, CompositeResourceState::Reserving)?;
        composite.holder = Some(holder);
        // The versioned write is the claim on the composite itself.
        let mut composite = store.composite_resources().update(&composite).await?;

        let links = composite_unit_links(store, id).await?;
        let owner = Holder::Composite(id);
        let results = join_all(
            links
                .iter()
                .map(|link| claim_unit(store, link.unit_resource_id, owner)),
        )
        .await;

        let mut claimed = Vec::with_capacity(links.len());
        let mut failure = None;
        for (link, result) in links.iter().zip(results) {
            match result {
                Ok(unit) => claimed.push(unit.id),
                Err(err) if link.required => {
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    tracing::debug!(
                        composite_id = id,
                        resource_id = link.unit_resource_id,
                        error = %err,
                        "optional component skipped"
                    );
                }
            }
        }

        let minimum = composite.min_required_components.unwrap_or(0);
        if failure.is_none() && claimed.len() < minimum as usize {
            failure = Some(EngineError::ResourceAllocation(format!(
                "composite resource {id} assigned {} of at least {minimum} components",
                claimed.len()
            )));
        }

        if let Some(err) = failure {
            rollback_units(store, &claimed, owner).await;
            self.abandon(&mut composite).await;
            tracing::warn!(composite_id = id, error = %err, "composite reservation failed");
            return Err(err);
        }

        transition(&mut composite, CompositeResourceState::Ready)?;
        match store.composite_resources().update(&composite).await {
            Ok(composite) => {
                tracing::debug!(
                    composite_id = id,
                    components = claimed.len(),
                    "composite reserved"
                );
                Ok(composite)
            }
            Err(err) => {
                rollback_units(store, &claimed, owner).await;
                match store.composite_resources().fetch(id).await {
                    Ok(mut current) if current.state == CompositeResourceState::Reserving => {
                        self.abandon(&mut current).await;
                    }
                    Ok(_) => {}
                    Err(fetch_err) => {
                        tracing::error!(composite_id = id, error = %fetch_err, "cannot abandon reservation");
                    }
                }
                tracing::warn!(composite_id = id, error = %err, "composite reservation failed");
                Err(err)
            }
        }
    }

    /// Put a `Ready` composite held by `holder` to use: the composite becomes
    /// `Assigned` and each component it holds becomes `InUse`.
    ///
    /// If a component cannot be moved the whole composite is released and
    /// the error is returned.
    pub async fn use_composite(
        &self,
        id: CompositeResourceId,
        holder: Holder,
    ) -> EngineResult<CompositeResource> {
        let store = self.store.as_ref();
        let mut composite = store.composite_resources().fetch(id).await?;
        transition(&mut composite, CompositeResourceState::Assigned)?;
        ensure_held(&composite, holder)?;
        let composite = store.composite_resources().update(&composite).await?;

        let links = composite_unit_links(store, id).await?;
        let owner = Holder::Composite(id);
        let results = join_all(links.iter().map(|link| async move {
            let mut unit = store.unit_resources().fetch(link.unit_resource_id).await?;
            if !unit.is_held_by(owner) || unit.state != UnitResourceState::Assigned {
                return Ok::<_, EngineError>(());
            }
            transition(&mut unit, UnitResourceState::InUse)?;
            store.unit_resources().update(&unit).await.map(|_| ())
        }))
        .await;
        if let Err(err) = results.into_iter().collect::<EngineResult<Vec<()>>>() {
            tracing::warn!(composite_id = id, error = %err, "composite use failed, releasing");
            if let Err(release_err) = self.release(id, holder).await {
                tracing::error!(composite_id = id, error = %release_err, "cannot release composite");
            }
            return Err(err);
        }
        Ok(composite)
    }

    /// Release a `Ready` or `Assigned` composite held by `holder`: each
    /// component it holds returns to `Free`, then the composite returns to
    /// `Empty`.
    ///
    /// Fails with [`EngineError::InvalidStateTransition`] from any other
    /// state, including `Reserving`, and with [`EngineError::BusinessLogic`]
    /// when another context holds the composite.
    pub async fn release(
        &self,
        id: CompositeResourceId,
        holder: Holder,
    ) -> EngineResult<CompositeResource> {
        let store = self.store.as_ref();
        let mut composite = store.composite_resources().fetch(id).await?;
        if !composite.state.is_releasable() {
            return Err(EngineError::InvalidStateTransition {
                entity: EntityKind::CompositeResource,
                id,
                from: composite.state.to_string(),
                to: CompositeResourceState::Empty.to_string(),
            });
        }
        ensure_held(&composite, holder)?;

        let links = composite_unit_links(store, id).await?;
        let component_ids: Vec<_> = links.iter().map(|l| l.unit_resource_id).collect();
        let results = join_all(
            component_ids
                .iter()
                .map(|&uid| free_unit(store, uid, Holder::Composite(id))),
        )
        .await;
        let freed = results
            .into_iter()
            .collect::<EngineResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .count();

        transition(&mut composite, CompositeResourceState::Empty)?;
        let composite = store.composite_resources().update(&composite).await?;
        tracing::debug!(composite_id = id, freed, "composite released");
        Ok(composite)
    }

    /// Components of the composite, in link order.
    pub async fn components(&self, id: CompositeResourceId) -> EngineResult<Vec<UnitResource>> {
        let links: Vec<CompositeUnitLink> = composite_unit_links(self.store.as_ref(), id).await?;
        let mut units = Vec::with_capacity(links.len());
        for link in links {
            units.push(self.store.unit_resources().fetch(link.unit_resource_id).await?);
        }
        Ok(units)
    }

    async fn abandon(&self, composite: &mut CompositeResource) {
        if let Err(err) = transition(composite, CompositeResourceState::Empty) {
            tracing::error!(composite_id = composite.id, error = %err, "cannot abandon reservation");
            return;
        }
        if let Err(err) = self.store.composite_resources().update(composite).await {
            tracing::error!(composite_id = composite.id, error = %err, "cannot abandon reservation");
        }
    }
}

//! One convergence pass: provision, reconcile, build.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::exec::CommandRunner;
use crate::fleet::Fleet;
use crate::keygen::KeyGenerator;
use crate::matrix;
use crate::physical::PhysicalSpec;
use crate::provision::{KeyProvisioner, ProvisionOutcome};
use crate::reconcile::{ReconcileReport, reconcile};

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassOutcome {
    /// Provisioning result of every reachable endpoint.
    pub provisioned: BTreeMap<String, ProvisionOutcome>,
    /// Preshared key reconciliation.
    pub reconciled: ReconcileReport,
    /// Configuration for every ready endpoint.
    pub spec: PhysicalSpec,
}

/// Runs a full pass over `fleet`.
///
/// Every reachable endpoint is provisioned in name order before preshared
/// keys are reconciled, and the peer matrix is only built once both are
/// done. The fleet keeps any key material stored before a failure, so the
/// caller should persist [`Fleet::key_state`] even when the pass fails.
///
/// # Errors
///
/// Returns the first provisioning, reconciliation or validation failure.
pub async fn converge<R, G>(fleet: &mut Fleet, provisioner: &KeyProvisioner<R, G>) -> Result<PassOutcome>
where
    R: CommandRunner,
    G: KeyGenerator,
{
    let reachable: Vec<String> = fleet
        .machines()
        .filter(|m| m.is_reachable())
        .map(|m| m.name.clone())
        .collect();

    let mut provisioned = BTreeMap::new();
    for name in reachable {
        let outcome = provisioner.ensure_keys(fleet, &name).await?;
        provisioned.insert(name, outcome);
    }

    let reconciled = reconcile(fleet, provisioner).await?;
    let spec = matrix::build(fleet, provisioner.config())?;

    info!(
        endpoints = spec.len(),
        rewritten = reconciled.rewritten.len(),
        "convergence pass complete"
    );

    Ok(PassOutcome {
        provisioned,
        reconciled,
        spec,
    })
}

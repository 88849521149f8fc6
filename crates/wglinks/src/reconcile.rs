//! Preshared key reconciliation across the fleet.
//!
//! Every link uses one fleet-wide preshared key, but machines provisioned at
//! different times (or restored from different state) can disagree on it.
//! The most common value wins and the minority is rewritten in place.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::exec::CommandRunner;
use crate::fleet::Fleet;
use crate::keygen::KeyGenerator;
use crate::provision::KeyProvisioner;

/// What one reconciliation did.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// The value every endpoint should hold; `None` if nobody holds one.
    #[serde(skip)]
    pub canonical: Option<String>,
    /// Endpoints rewritten to the canonical value.
    pub rewritten: Vec<String>,
    /// Endpoints out of sync that could not be reached.
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    /// Returns `true` if nothing had to be rewritten or skipped.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.rewritten.is_empty() && self.skipped.is_empty()
    }
}

impl fmt::Debug for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileReport")
            .field("canonical", &self.canonical.as_ref().map(|_| "[REDACTED]"))
            .field("rewritten", &self.rewritten)
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Most frequent value; ties go to the lexicographically smallest.
fn majority<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Brings every reachable endpoint's preshared key in line with the majority.
///
/// Only endpoints with complete key material vote. Out-of-sync endpoints
/// that are down, excluded or without a public address are reported as
/// skipped and keep their value until a later pass.
///
/// # Errors
///
/// Returns the first upload failure; endpoints rewritten before it keep
/// their new value.
pub async fn reconcile<R, G>(fleet: &mut Fleet, provisioner: &KeyProvisioner<R, G>) -> Result<ReconcileReport>
where
    R: CommandRunner,
    G: KeyGenerator,
{
    let voters: Vec<(String, String)> = fleet
        .machines()
        .filter_map(|m| {
            let keypair = fleet.keypair(&m.name)?;
            if !keypair.is_ready() {
                return None;
            }
            Some((m.name.clone(), keypair.material.psk()?.to_string()))
        })
        .collect();

    let Some(canonical) = majority(voters.iter().map(|(_, psk)| psk.as_str())).map(str::to_string) else {
        debug!("no preshared keys to reconcile");
        return Ok(ReconcileReport::default());
    };

    let mut report = ReconcileReport {
        canonical: Some(canonical.clone()),
        ..ReconcileReport::default()
    };

    if voters.iter().all(|(_, psk)| *psk == canonical) {
        debug!(endpoints = voters.len(), "preshared keys are in sync");
        return Ok(report);
    }

    for (name, psk) in &voters {
        if *psk == canonical {
            continue;
        }
        let Some(machine) = fleet.machine(name).filter(|m| m.is_reachable()).cloned() else {
            warn!(endpoint = %name, "preshared key out of sync but machine is not reachable, skipping");
            report.skipped.push(name.clone());
            continue;
        };
        let Some(keypair) = fleet.keypair_mut(name) else {
            continue;
        };

        let mut material = keypair.material.clone();
        material.psk = Some(canonical.clone());
        provisioner.upload(&machine, &material).await?;
        keypair.material = material;

        info!(endpoint = %name, "rewrote preshared key to the fleet majority");
        report.rewritten.push(name.clone());
    }

    Ok(report)
}

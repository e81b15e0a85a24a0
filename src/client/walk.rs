//! Subtree walks and index discovery.
//!
//! v1 devices are walked with GETNEXT; v2c and v3 use GETBULK. Both walks
//! stop at the first varbind outside the requested subtree, on an
//! endOfMibView exception, or when the agent returns OIDs that do not
//! advance (a guard against broken agents that would loop forever).

use tracing::instrument;

use crate::error::Result;
use crate::message::Version;
use crate::oid::Oid;
use crate::transport::Transport;
use crate::value::Value;
use crate::varbind::VarBind;

use super::Client;

/// Upper bound on per-port index discovery.
///
/// Port tables are capped so a misbehaving agent cannot inflate a device
/// into thousands of entities.
pub const MAX_PORTS: usize = 50;

impl<T: Transport> Client<T> {
    /// Walk every varbind under `root`, in lexicographic OID order.
    ///
    /// On v1 a noSuchName error from the agent ends the walk cleanly (that
    /// is how v1 signals running past the last instance). Varbinds whose
    /// OIDs leave the subtree are discarded, not returned.
    #[instrument(skip(self), err, fields(snmp.target = %self.peer_addr(), snmp.root = %root))]
    pub async fn walk_subtree(&self, root: &Oid) -> Result<Vec<(Oid, Value)>> {
        let mut results = Vec::new();
        let mut current = root.clone();

        loop {
            let varbinds = match self.walk_step(&current).await {
                Ok(varbinds) => varbinds,
                // v1 agents answer noSuchName when the walk runs off the
                // end of the MIB view
                Err(e) if self.config().credentials.version() == Version::V1
                    && e.is_no_such_object() =>
                {
                    break;
                }
                Err(e) => return Err(e),
            };

            if varbinds.is_empty() {
                break;
            }

            let mut done = false;
            for vb in varbinds {
                if vb.value == Value::EndOfMibView || !vb.oid.starts_with(root) {
                    done = true;
                    break;
                }
                // Non-advancing OIDs would loop forever
                if vb.oid.arcs() <= current.arcs() {
                    tracing::warn!(
                        snmp.oid = %vb.oid,
                        "agent returned non-increasing OID, stopping walk"
                    );
                    done = true;
                    break;
                }
                current = vb.oid.clone();
                results.push((vb.oid, vb.value));
            }

            if done {
                break;
            }
        }

        tracing::debug!(snmp.count = results.len(), "walk complete");
        Ok(results)
    }

    async fn walk_step(&self, current: &Oid) -> Result<Vec<VarBind>> {
        if self.config().credentials.version() == Version::V1 {
            Ok(vec![self.probe_next(current).await?])
        } else {
            self.get_bulk(
                std::slice::from_ref(current),
                0,
                self.config().max_repetitions,
            )
            .await
        }
    }

    /// Discover the instance indices directly under `root`.
    ///
    /// Only scalar children count: an OID of the form `root.N` yields the
    /// index `N`, while deeper or non-numeric suffixes end discovery. At
    /// most `max` indices are returned.
    #[instrument(skip(self), err, fields(snmp.target = %self.peer_addr(), snmp.root = %root))]
    pub async fn discover_indices(&self, root: &Oid, max: usize) -> Result<Vec<u32>> {
        let mut indices = Vec::new();
        let mut current = root.clone();

        while indices.len() < max {
            let vb = match self.probe_next(&current).await {
                Ok(vb) => vb,
                Err(e) if e.is_no_such_object() => break,
                Err(e) => return Err(e),
            };

            if vb.value.is_exception() || !vb.oid.starts_with(root) {
                break;
            }

            match vb.oid.single_index_after(root) {
                Some(index) => indices.push(index),
                // Deeper suffix means we walked into a sub-table
                None => break,
            }

            current = vb.oid;
        }

        tracing::debug!(snmp.count = indices.len(), "index discovery complete");
        Ok(indices)
    }
}

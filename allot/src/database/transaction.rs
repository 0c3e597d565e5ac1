//! Transactional writes.
//!
//! Persisting an allocation and deleting a reservation tree touch several
//! tables and must be atomic. The executor tick opens its own transaction
//! through [`Database::begin_tick`] and runs the regular queries inside it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction, TransactionBehavior};

use crate::error::{Error, Result};
use crate::executable::{ExecutableId, ExecutableRef};
use crate::reservation::{NodeId, ReservationId};
use crate::scheduler::Allocation;

use super::connection::Database;
use super::operations::to_millis;
use super::schema::{
    DELETE_RESERVATION, INSERT_DEPENDENCY, INSERT_EXECUTABLE, INSERT_MIGRATION, INSERT_RESERVATION,
    INSERT_SERVICE, SELECT_SUBTREE_IDS, TRUNCATE_SUBTREE_EXECUTABLES,
};

/// Database ids assigned to a persisted [`Allocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAllocation {
    /// Id of the root reservation.
    pub root: ReservationId,
    /// Reservation id of every allocation node, indexed by node.
    pub reservations: Vec<ReservationId>,
    /// Executable id of every new executable, indexed like
    /// [`Allocation::executables`].
    pub executables: Vec<ExecutableId>,
}

impl StoredAllocation {
    /// Returns the reservation id assigned to `node`.
    #[must_use]
    pub fn reservation(&self, node: NodeId) -> Option<ReservationId> {
        self.reservations.get(node.index()).copied()
    }
}

impl Database {
    /// Opens the transaction of one executor tick.
    ///
    /// The transaction borrows the connection immutably, so every query of
    /// the database runs inside it until it is committed or dropped; a
    /// dropped transaction rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the database is
    /// locked past the busy timeout.
    pub fn begin_tick(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?)
    }

    /// Persists a whole scheduler result: the reservation tree, its
    /// executables with their dependencies and services, and migrations.
    ///
    /// This operation is atomic.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation references a node or executable
    /// it does not contain, or if any insert fails.
    pub fn store_allocation(&mut self, allocation: &Allocation, description: Option<&str>) -> Result<StoredAllocation> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let created_at = to_millis(Utc::now());
        let tree = &allocation.reservations;

        let mut reservation_ids: Vec<Option<ReservationId>> = vec![None; tree.len()];
        {
            let mut insert = tx.prepare(INSERT_RESERVATION)?;
            for root in tree.roots() {
                // subtree() is pre-order, so parents are inserted first
                for node_id in tree.subtree(root) {
                    let node = tree.get(node_id);
                    let parent_id = node
                        .parent
                        .map(|parent| {
                            reservation_ids[parent.index()]
                                .ok_or_else(|| Error::Internal(format!("parent of node {} not stored", node_id.index())))
                        })
                        .transpose()?;
                    let root_description = if node_id == allocation.root { description } else { None };
                    insert.execute(params![
                        parent_id.map(|id| id.0),
                        to_millis(node.slot.start()),
                        to_millis(node.slot.end()),
                        serde_json::to_string(&node.kind)?,
                        root_description,
                        created_at,
                    ])?;
                    reservation_ids[node_id.index()] = Some(ReservationId(tx.last_insert_rowid()));
                }
            }
        }
        let reservations = reservation_ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| id.ok_or_else(|| Error::Internal(format!("reservation node {index} not stored"))))
            .collect::<Result<Vec<_>>>()?;

        let mut owners: HashMap<usize, ReservationId> = HashMap::new();
        for (node_id, node) in tree.iter() {
            if let Some(index) = node.executable {
                owners.insert(index, reservations[node_id.index()]);
            }
        }

        let mut executables = Vec::with_capacity(allocation.executables.len());
        {
            let mut insert = tx.prepare(INSERT_EXECUTABLE)?;
            for (index, executable) in allocation.executables.iter().enumerate() {
                insert.execute(params![
                    owners.get(&index).map(|id| id.0),
                    serde_json::to_string(&executable.kind)?,
                    to_millis(executable.slot.start()),
                    to_millis(executable.slot.end()),
                ])?;
                executables.push(ExecutableId(tx.last_insert_rowid()));
            }
        }

        let resolve = |reference: ExecutableRef| match reference {
            ExecutableRef::Stored(id) => Ok(id),
            ExecutableRef::New(index) => executables
                .get(index)
                .copied()
                .ok_or_else(|| Error::Internal(format!("unknown new executable {index}"))),
        };

        {
            let mut dependency = tx.prepare(INSERT_DEPENDENCY)?;
            let mut service = tx.prepare(INSERT_SERVICE)?;
            for (executable, id) in allocation.executables.iter().zip(&executables) {
                for reference in &executable.dependencies {
                    dependency.execute(params![id.0, resolve(*reference)?.0])?;
                }
                for new_service in &executable.services {
                    service.execute(params![
                        id.0,
                        serde_json::to_string(&new_service.kind)?,
                        to_millis(new_service.slot.start()),
                        to_millis(new_service.slot.end()),
                    ])?;
                }
            }

            let mut migration = tx.prepare(INSERT_MIGRATION)?;
            for new_migration in &allocation.migrations {
                let target = resolve(ExecutableRef::New(new_migration.target))?;
                migration.execute(params![new_migration.source.0, target.0])?;
            }
        }

        tx.commit()?;
        let root = reservations
            .get(allocation.root.index())
            .copied()
            .ok_or_else(|| Error::Internal("allocation root not stored".to_string()))?;
        log::debug!(
            "Stored allocation {root}: {} reservations, {} executables",
            reservations.len(),
            executables.len()
        );
        Ok(StoredAllocation {
            root,
            reservations,
            executables,
        })
    }

    /// Deletes a reservation together with its descendants.
    ///
    /// Executables created for the deleted reservations are kept, with their
    /// slot truncated at `now`: running ones become due for stop and ones
    /// not yet started are never started. Returns the number of deleted
    /// reservations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the reservation does not exist, or a
    /// database error.
    pub fn delete_reservation(&mut self, id: ReservationId, now: DateTime<Utc>) -> Result<usize> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let subtree = {
            let mut stmt = tx.prepare(SELECT_SUBTREE_IDS)?;
            let ids = stmt
                .query_map(params![id.0], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        if subtree.is_empty() {
            return Err(Error::NotFound {
                resource: id.to_string(),
            });
        }

        let truncated = tx.execute(TRUNCATE_SUBTREE_EXECUTABLES, params![id.0, to_millis(now)])?;
        tx.execute(DELETE_RESERVATION, params![id.0])?;
        tx.commit()?;

        log::debug!(
            "Deleted {id} with {} descendants; truncated {truncated} executables",
            subtree.len() - 1
        );
        Ok(subtree.len())
    }
}

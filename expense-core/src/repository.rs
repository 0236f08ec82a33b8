//! Persistence boundary
//!
//! Every save is a compare-and-set on the record version. A writer that read
//! version `n` may only store over version `n`; the stored copy comes back
//! at `n + 1`. Stale writers (a timed-out settlement finishing late, a
//! concurrent approver) get [`Error::Conflict`] instead of clobbering newer
//! state.

use crate::types::{Expense, ExpenseStatus, Receipt, Reimbursement, ReimbursementStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Lookup filters understood by repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every record
    All,
    /// Records belonging to an expense (receipts, reimbursements)
    ByExpense(Uuid),
    /// Expenses (or reimbursements) of a submitter
    BySubmitter(String),
    /// Expenses in a status
    ByExpenseStatus(ExpenseStatus),
    /// Reimbursements in a status
    ByReimbursementStatus(ReimbursementStatus),
    /// Processed reimbursements not yet acknowledged by payroll
    AwaitingPayroll,
}

/// Persisted record
pub trait Entity: Clone + Send + Sync + 'static {
    /// Record kind for error messages
    const KIND: &'static str;

    /// Record id
    fn id(&self) -> Uuid;

    /// Stored version (0 for a record never saved)
    fn version(&self) -> u64;

    /// Overwrite the version (repository use only)
    fn set_version(&mut self, version: u64);

    /// Whether the record satisfies a query
    fn matches(&self, query: &Query) -> bool;
}

impl Entity for Expense {
    const KIND: &'static str = "expense";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::All => true,
            Query::BySubmitter(id) => &self.submitter_id == id,
            Query::ByExpenseStatus(status) => &self.status == status,
            _ => false,
        }
    }
}

impl Entity for Receipt {
    const KIND: &'static str = "receipt";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::All => true,
            Query::ByExpense(id) => &self.expense_id == id,
            _ => false,
        }
    }
}

impl Entity for Reimbursement {
    const KIND: &'static str = "reimbursement";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::All => true,
            Query::ByExpense(id) => &self.expense_id == id,
            Query::BySubmitter(id) => &self.employee_id == id,
            Query::ByReimbursementStatus(status) => &self.status == status,
            Query::AwaitingPayroll => self.awaiting_payroll(),
            _ => false,
        }
    }
}

/// Storage for one record kind
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Load a record
    async fn get(&self, id: Uuid) -> Result<T>;

    /// Compare-and-set save; returns the stored copy with its new version
    async fn save(&self, entity: T) -> Result<T>;

    /// All records matching a query, ordered by id
    async fn find_by_query(&self, query: &Query) -> Result<Vec<T>>;

    /// Remove a record, provided it is still at the version the caller holds
    async fn delete(&self, entity: &T) -> Result<()>;
}

/// In-process repository backed by a concurrent map
#[derive(Debug)]
pub struct InMemoryRepository<T: Entity> {
    records: Arc<DashMap<Uuid, T>>,
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<T: Entity> InMemoryRepository<T> {
    /// Empty repository
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the repository is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: Uuid) -> Result<T> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found(T::KIND, id))
    }

    async fn save(&self, mut entity: T) -> Result<T> {
        let id = entity.id();
        let expected = entity.version();

        // Entry holds the shard lock, so check and write are atomic
        match self.records.entry(id) {
            Entry::Occupied(mut occupied) => {
                let found = occupied.get().version();
                if found != expected {
                    return Err(Error::Conflict {
                        entity: T::KIND,
                        id: id.to_string(),
                        expected,
                        found,
                    });
                }
                entity.set_version(expected + 1);
                occupied.insert(entity.clone());
            }
            Entry::Vacant(vacant) => {
                if expected != 0 {
                    return Err(Error::Conflict {
                        entity: T::KIND,
                        id: id.to_string(),
                        expected,
                        found: 0,
                    });
                }
                entity.set_version(1);
                vacant.insert(entity.clone());
            }
        }

        debug!(kind = T::KIND, %id, version = entity.version(), "Saved record");
        Ok(entity)
    }

    async fn find_by_query(&self, query: &Query) -> Result<Vec<T>> {
        let mut found: Vec<T> = self
            .records
            .iter()
            .filter(|r| r.value().matches(query))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.id());
        Ok(found)
    }

    async fn delete(&self, entity: &T) -> Result<()> {
        let id = entity.id();
        let expected = entity.version();

        match self.records.entry(id) {
            Entry::Occupied(occupied) => {
                let found = occupied.get().version();
                if found != expected {
                    return Err(Error::Conflict {
                        entity: T::KIND,
                        id: id.to_string(),
                        expected,
                        found,
                    });
                }
                occupied.remove();
            }
            Entry::Vacant(_) => return Err(Error::not_found(T::KIND, id)),
        }

        debug!(kind = T::KIND, %id, "Deleted record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpenseDraft;

    fn draft(submitter: &str) -> Expense {
        Expense::new_draft(ExpenseDraft {
            submitter_id: submitter.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_save_bumps_version() {
        let repo = InMemoryRepository::<Expense>::new();
        let saved = repo.save(draft("emp-1")).await.unwrap();
        assert_eq!(saved.version, 1);

        let loaded = repo.get(saved.id).await.unwrap();
        assert_eq!(loaded.version, 1);

        let again = repo.save(loaded).await.unwrap();
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let repo = InMemoryRepository::<Expense>::new();
        let saved = repo.save(draft("emp-1")).await.unwrap();
        let id = saved.id;

        let stale = saved.clone();
        let mut fresh = saved;
        fresh.status = ExpenseStatus::Validated;
        repo.save(fresh).await.unwrap();

        let result = repo.save(stale).await;
        assert!(matches!(
            result,
            Err(Error::Conflict {
                expected: 1,
                found: 2,
                ..
            })
        ));
        assert_eq!(repo.get(id).await.unwrap().status, ExpenseStatus::Validated);
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let repo = InMemoryRepository::<Expense>::new();
        let expense = draft("emp-1");
        repo.save(expense.clone()).await.unwrap();
        assert!(matches!(
            repo.save(expense).await,
            Err(Error::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_checks_version() {
        let repo = InMemoryRepository::<Expense>::new();
        let saved = repo.save(draft("emp-1")).await.unwrap();
        let newer = repo.save(saved.clone()).await.unwrap();

        assert!(matches!(
            repo.delete(&saved).await,
            Err(Error::Conflict {
                expected: 1,
                found: 2,
                ..
            })
        ));
        assert_eq!(repo.len(), 1);

        repo.delete(&newer).await.unwrap();
        assert!(repo.is_empty());
        assert!(matches!(
            repo.delete(&newer).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let repo = InMemoryRepository::<Receipt>::new();
        assert!(matches!(
            repo.get(Uuid::new_v4()).await,
            Err(Error::NotFound { entity: "receipt", .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_submitter_and_status() {
        let repo = InMemoryRepository::<Expense>::new();
        repo.save(draft("emp-1")).await.unwrap();
        repo.save(draft("emp-1")).await.unwrap();
        repo.save(draft("emp-2")).await.unwrap();

        let mine = repo
            .find_by_query(&Query::BySubmitter("emp-1".to_string()))
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);

        let drafts = repo
            .find_by_query(&Query::ByExpenseStatus(ExpenseStatus::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 3);

        let none = repo
            .find_by_query(&Query::ByExpense(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}

use super::{finish_listing, WorkflowStore};
use crate::types::{Workflow, WorkflowFilter, WorkflowId};
use anyhow::{anyhow, Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const WORKFLOWS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("workflows");

/// Workflow store backed by a redb database file.
///
/// Records are stored as JSON keyed by the workflow id string; redb write
/// transactions make each replace atomic.
#[derive(Clone)]
pub struct RedbWorkflowStore {
    db: Arc<Database>,
}

impl RedbWorkflowStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create index directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _workflows_table = write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open workflows table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn write(&self, workflow: &Workflow, must_exist: bool) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open table")?;

            let key = workflow.id.as_str();
            let exists = table
                .get(key)
                .context("Failed to look up workflow")?
                .is_some();
            if exists != must_exist {
                return Err(if must_exist {
                    anyhow!("Workflow {} does not exist", workflow.id)
                } else {
                    anyhow!("Workflow {} already exists", workflow.id)
                });
            }

            let value = serde_json::to_vec(workflow).context("Failed to serialize workflow")?;
            table
                .insert(key, value.as_slice())
                .context("Failed to insert workflow")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }
}

impl WorkflowStore for RedbWorkflowStore {
    fn create(&self, workflow: &Workflow) -> Result<()> {
        self.write(workflow, false)
    }

    fn get(&self, id: &WorkflowId) -> Result<Option<Workflow>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(WORKFLOWS_TABLE)
            .context("Failed to open table")?;

        let value = table.get(id.as_str()).context("Failed to get workflow")?;

        match value {
            Some(guard) => {
                let workflow: Workflow = serde_json::from_slice(guard.value())
                    .context("Failed to deserialize workflow")?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    fn replace(&self, workflow: &Workflow) -> Result<()> {
        self.write(workflow, true)
    }

    fn list(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(WORKFLOWS_TABLE)
            .context("Failed to open table")?;

        let mut workflows = Vec::new();
        for item in table.iter().context("Failed to iterate workflows")? {
            let (_key, value) = item.context("Failed to read item")?;
            let workflow: Workflow = serde_json::from_slice(value.value())
                .context("Failed to deserialize workflow")?;
            if filter.matches(&workflow) {
                workflows.push(workflow);
            }
        }

        Ok(finish_listing(workflows, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{WorkflowStatus, WorkflowStep};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn workflow(name: &str, status: WorkflowStatus, age_secs: i64) -> Workflow {
        Workflow {
            id: WorkflowId::new(),
            name: name.to_string(),
            description: None,
            session_id: None,
            status,
            cancel_requested: false,
            steps: Vec::<WorkflowStep>::new(),
            results: BTreeMap::new(),
            created_at: Utc::now() - Duration::seconds(age_secs),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_redb_workflow_store() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = RedbWorkflowStore::new(temp_file.path().to_path_buf()).unwrap();

        let mut wf = workflow("first", WorkflowStatus::Pending, 0);
        store.create(&wf).unwrap();

        let retrieved = store.get(&wf.id).unwrap().unwrap();
        assert_eq!(retrieved.id, wf.id);
        assert_eq!(retrieved.name, "first");

        wf.status = WorkflowStatus::Completed;
        wf.completed_at = Some(Utc::now());
        store.replace(&wf).unwrap();
        let updated = store.get(&wf.id).unwrap().unwrap();
        assert_eq!(updated.status, WorkflowStatus::Completed);
        assert!(updated.completed_at.is_some());

        assert!(store.get(&WorkflowId::from("missing")).unwrap().is_none());
    }

    #[test]
    fn test_create_and_replace_guards() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = RedbWorkflowStore::new(temp_file.path().to_path_buf()).unwrap();

        let wf = workflow("dup", WorkflowStatus::Pending, 0);
        store.create(&wf).unwrap();
        assert!(store.create(&wf).is_err());

        let unknown = workflow("ghost", WorkflowStatus::Pending, 0);
        assert!(store.replace(&unknown).is_err());
    }

    #[test]
    fn test_list_filters_and_orders() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = RedbWorkflowStore::new(temp_file.path().to_path_buf()).unwrap();

        store.create(&workflow("old", WorkflowStatus::Completed, 30)).unwrap();
        store.create(&workflow("mid", WorkflowStatus::Running, 20)).unwrap();
        store.create(&workflow("new", WorkflowStatus::Pending, 10)).unwrap();

        let all = store.list(WorkflowFilter::default()).unwrap();
        let names: Vec<_> = all.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);

        let active = store.list(WorkflowFilter::active()).unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|w| !w.is_terminal()));

        let limited = store
            .list(WorkflowFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].name, "new");
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        let wf = workflow("durable", WorkflowStatus::Pending, 0);
        {
            let store = RedbWorkflowStore::new(path.clone()).unwrap();
            store.create(&wf).unwrap();
        }
        let reopened = RedbWorkflowStore::new(path).unwrap();
        assert_eq!(reopened.get(&wf.id).unwrap().unwrap().name, "durable");
    }
}

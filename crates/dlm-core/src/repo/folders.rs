//! Hierarchical folder records for organizing tasks.

use anyhow::Result;
use chrono::Utc;
use sqlx::Row;

use super::db::TaskStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

impl TaskStore {
    pub async fn create_folder(&self, name: &str, parent_id: Option<i64>) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO folders (name, parent_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(name)
        .bind(parent_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_folder(&self, id: i64) -> Result<Option<FolderRecord>> {
        let row = sqlx::query("SELECT id, name, parent_id FROM folders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| FolderRecord {
            id: r.get("id"),
            name: r.get("name"),
            parent_id: r.get("parent_id"),
        }))
    }

    pub async fn get_folder_by_name(
        &self,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Option<FolderRecord>> {
        let row = match parent_id {
            Some(pid) => {
                sqlx::query("SELECT id, name, parent_id FROM folders WHERE name = ?1 AND parent_id = ?2")
                    .bind(name)
                    .bind(pid)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id, name, parent_id FROM folders WHERE name = ?1 AND parent_id IS NULL")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.map(|r| FolderRecord {
            id: r.get("id"),
            name: r.get("name"),
            parent_id: r.get("parent_id"),
        }))
    }

    /// Child folders of `parent_id` (root folders when None).
    pub async fn child_folders(&self, parent_id: Option<i64>) -> Result<Vec<FolderRecord>> {
        let rows = match parent_id {
            Some(pid) => {
                sqlx::query("SELECT id, name, parent_id FROM folders WHERE parent_id = ?1 ORDER BY name")
                    .bind(pid)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id, name, parent_id FROM folders WHERE parent_id IS NULL ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|r| FolderRecord {
                id: r.get("id"),
                name: r.get("name"),
                parent_id: r.get("parent_id"),
            })
            .collect())
    }

    pub async fn delete_folder(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM folders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn folder_hierarchy_roundtrip() {
        let store = TaskStore::open_memory().await.unwrap();
        let root = store.create_folder("media", None).await.unwrap();
        let child = store.create_folder("isos", Some(root)).await.unwrap();

        let got = store.get_folder(child).await.unwrap().unwrap();
        assert_eq!(got.name, "isos");
        assert_eq!(got.parent_id, Some(root));

        let children = store.child_folders(Some(root)).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child);

        let by_name = store
            .get_folder_by_name("media", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, root);

        store.delete_folder(child).await.unwrap();
        assert!(store.get_folder(child).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tasks_filter_by_folder() {
        let store = TaskStore::open_memory().await.unwrap();
        let folder = store.create_folder("f", None).await.unwrap();
        let mut inside = crate::task::DownloadTask::new("a");
        inside.folder_id = Some(folder);
        let outside = crate::task::DownloadTask::new("b");
        store.save(&inside).await.unwrap();
        store.save(&outside).await.unwrap();

        let in_folder = store.get_by_folder(Some(folder)).await.unwrap();
        assert_eq!(in_folder.len(), 1);
        assert_eq!(in_folder[0].id, inside.id);
        let at_root = store.get_by_folder(None).await.unwrap();
        assert_eq!(at_root.len(), 1);
        assert_eq!(at_root[0].id, outside.id);
    }
}

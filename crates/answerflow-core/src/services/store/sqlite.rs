//! SQLite implementation of [`StatusStore`].
//!
//! Migrations under `./migrations` are embedded at compile time and run by
//! [`SqliteStatusStore::connect`]. Queries use the runtime-checked
//! `sqlx::query` form so no `DATABASE_URL` is needed to build.
//!
//! Combined answer + status updates run in one transaction. The write path
//! refuses to move a task out of DONE, FAILED or a cancellation.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use super::{Answer, AnswerUpdate, StatusStore, StoreError, TaskStatusUpdate, merge_media};
use crate::mentor::MentorImage;
use crate::runtime::types::{Media, SubmissionKey, Task, TaskKind, TaskSet, TaskStatus, WorkflowStatus};

#[derive(Clone, Debug)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Open (or create) the database at `url` and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Set one attribute on a question record, creating the record if needed.
    pub async fn set_question_attribute(
        &self,
        question: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let raw: Option<String> = sqlx::query_scalar("SELECT attributes FROM questions WHERE id = ?1")
            .bind(question)
            .fetch_optional(&mut *tx)
            .await?;
        let mut attributes = match raw {
            Some(raw) => decode_attributes(&raw)?,
            None => Map::new(),
        };
        attributes.insert(attribute.to_owned(), Value::String(value.to_owned()));
        sqlx::query("INSERT OR REPLACE INTO questions (id, attributes) VALUES (?1, ?2)")
            .bind(question)
            .bind(Value::Object(attributes).to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_mentor_image(
        &self,
        mentor: &str,
        image: MentorImage,
    ) -> Result<Option<String>, StoreError> {
        let path = sqlx::query_scalar("SELECT path FROM mentor_images WHERE mentor = ?1 AND image = ?2")
            .bind(mentor)
            .bind(image.as_ref())
            .fetch_optional(&self.pool)
            .await?;
        Ok(path)
    }

    /// Drop the task set for a key, as a client does after a failed upload.
    pub async fn delete_task_set(&self, key: &SubmissionKey) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM upload_task_items WHERE mentor = ?1 AND question = ?2")
            .bind(&key.mentor)
            .bind(&key.question)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM upload_tasks WHERE mentor = ?1 AND question = ?2")
            .bind(&key.mentor)
            .bind(&key.question)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn decode_media(raw: &str) -> Result<Vec<Media>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode(format!("media column: {e}")))
}

fn encode_media(media: &[Media]) -> Result<String, StoreError> {
    serde_json::to_string(media).map_err(|e| StoreError::Decode(format!("media column: {e}")))
}

fn decode_attributes(raw: &str) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode(format!("question attributes: {e}")))
}

async fn apply_answer(conn: &mut SqliteConnection, update: &AnswerUpdate) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let key = &update.key;
    sqlx::query(
        "INSERT OR IGNORE INTO answers (mentor, question, media, updated_at) VALUES (?1, ?2, '[]', ?3)",
    )
    .bind(&key.mentor)
    .bind(&key.question)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    if !update.media.is_empty() {
        let raw: String =
            sqlx::query_scalar("SELECT media FROM answers WHERE mentor = ?1 AND question = ?2")
                .bind(&key.mentor)
                .bind(&key.question)
                .fetch_one(&mut *conn)
                .await?;
        let mut media = decode_media(&raw)?;
        merge_media(&mut media, &update.media);
        sqlx::query("UPDATE answers SET media = ?1 WHERE mentor = ?2 AND question = ?3")
            .bind(encode_media(&media)?)
            .bind(&key.mentor)
            .bind(&key.question)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        "UPDATE answers SET transcript = COALESCE(?1, transcript), \
         has_edited_transcript = COALESCE(?2, has_edited_transcript), updated_at = ?3 \
         WHERE mentor = ?4 AND question = ?5",
    )
    .bind(&update.transcript)
    .bind(update.has_edited_transcript)
    .bind(&now)
    .bind(&key.mentor)
    .bind(&key.question)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_status(conn: &mut SqliteConnection, update: &TaskStatusUpdate) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let key = &update.key;

    let umbrella: Option<String> =
        sqlx::query_scalar("SELECT status FROM upload_tasks WHERE mentor = ?1 AND question = ?2")
            .bind(&key.mentor)
            .bind(&key.question)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(umbrella) = umbrella else {
        warn!(key = %key, "status update for a task set that no longer exists");
        return Ok(());
    };

    if let Some(kind) = update.kind {
        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM upload_task_items WHERE mentor = ?1 AND question = ?2 AND kind = ?3",
        )
        .bind(&key.mentor)
        .bind(&key.question)
        .bind(kind.as_ref())
        .fetch_optional(&mut *conn)
        .await?;

        match current {
            None => warn!(key = %key, kind = %kind, "status update for unknown task"),
            Some(raw) => {
                let current = TaskStatus::from_str(&raw).map_err(|e| StoreError::Decode(e.to_string()))?;
                if let Some(next) = &update.status {
                    if current.can_transition_to(next) {
                        sqlx::query(
                            "UPDATE upload_task_items SET status = ?1, updated_at = ?2 \
                             WHERE mentor = ?3 AND question = ?4 AND kind = ?5",
                        )
                        .bind(next.as_str())
                        .bind(&now)
                        .bind(&key.mentor)
                        .bind(&key.question)
                        .bind(kind.as_ref())
                        .execute(&mut *conn)
                        .await?;
                    } else {
                        warn!(key = %key, kind = %kind, from = %current, to = %next, "refusing task status transition");
                    }
                }
                if let Some(payload) = &update.payload {
                    sqlx::query(
                        "UPDATE upload_task_items SET payload = ?1 \
                         WHERE mentor = ?2 AND question = ?3 AND kind = ?4",
                    )
                    .bind(payload)
                    .bind(&key.mentor)
                    .bind(&key.question)
                    .bind(kind.as_ref())
                    .execute(&mut *conn)
                    .await?;
                }
            }
        }
    }

    if let Some(next) = update.workflow {
        let current = WorkflowStatus::from_str(&umbrella).map_err(|e| StoreError::Decode(e.to_string()))?;
        if current.is_terminal() {
            warn!(key = %key, from = %current, to = %next, "umbrella status already final");
        } else {
            sqlx::query("UPDATE upload_tasks SET status = ?1 WHERE mentor = ?2 AND question = ?3")
                .bind(next.as_ref())
                .bind(&key.mentor)
                .bind(&key.question)
                .execute(&mut *conn)
                .await?;
        }
    }

    if !update.media.is_empty() {
        let raw: String =
            sqlx::query_scalar("SELECT media FROM upload_tasks WHERE mentor = ?1 AND question = ?2")
                .bind(&key.mentor)
                .bind(&key.question)
                .fetch_one(&mut *conn)
                .await?;
        let mut media = decode_media(&raw)?;
        merge_media(&mut media, &update.media);
        sqlx::query("UPDATE upload_tasks SET media = ?1 WHERE mentor = ?2 AND question = ?3")
            .bind(encode_media(&media)?)
            .bind(&key.mentor)
            .bind(&key.question)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        "UPDATE upload_tasks SET transcript = COALESCE(?1, transcript), updated_at = ?2 \
         WHERE mentor = ?3 AND question = ?4",
    )
    .bind(&update.transcript)
    .bind(&now)
    .bind(&key.mentor)
    .bind(&key.question)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn fetch_task_set(&self, key: &SubmissionKey) -> Result<Option<TaskSet>, StoreError> {
        let row: Option<(String, Option<String>, String)> = sqlx::query_as(
            "SELECT status, transcript, media FROM upload_tasks WHERE mentor = ?1 AND question = ?2",
        )
        .bind(&key.mentor)
        .bind(&key.question)
        .fetch_optional(&self.pool)
        .await?;
        let Some((status, transcript, media)) = row else {
            return Ok(None);
        };

        let items: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT kind, task_id, status, payload FROM upload_task_items \
             WHERE mentor = ?1 AND question = ?2 ORDER BY position",
        )
        .bind(&key.mentor)
        .bind(&key.question)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(items.len());
        for (kind, task_id, status, payload) in items {
            tasks.push(Task {
                id: task_id,
                kind: TaskKind::from_str(&kind).map_err(|e| StoreError::Decode(format!("task kind '{kind}': {e}")))?,
                status: TaskStatus::from_str(&status).map_err(|e| StoreError::Decode(e.to_string()))?,
                payload,
                transcript: None,
                media: None,
            });
        }

        Ok(Some(TaskSet {
            mentor: key.mentor.clone(),
            question: key.question.clone(),
            status: WorkflowStatus::from_str(&status).map_err(|e| StoreError::Decode(e.to_string()))?,
            tasks,
            transcript,
            media: decode_media(&media)?,
        }))
    }

    async fn fetch_question_attribute(
        &self,
        question: &str,
        attribute: &str,
    ) -> Result<Option<String>, StoreError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT attributes FROM questions WHERE id = ?1")
            .bind(question)
            .fetch_optional(&self.pool)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(decode_attributes(&raw)?.remove(attribute).and_then(|value| match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }))
    }

    async fn fetch_answer(&self, key: &SubmissionKey) -> Result<Option<Answer>, StoreError> {
        let row: Option<(Option<String>, bool, String)> = sqlx::query_as(
            "SELECT transcript, has_edited_transcript, media FROM answers WHERE mentor = ?1 AND question = ?2",
        )
        .bind(&key.mentor)
        .bind(&key.question)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(transcript, has_edited_transcript, media)| {
            Ok(Answer {
                transcript,
                has_edited_transcript,
                media: decode_media(&media)?,
            })
        })
        .transpose()
    }

    async fn create_task_set(&self, answer: AnswerUpdate, set: &TaskSet) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        apply_answer(&mut *tx, &answer).await?;

        sqlx::query("DELETE FROM upload_task_items WHERE mentor = ?1 AND question = ?2")
            .bind(&set.mentor)
            .bind(&set.question)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR REPLACE INTO upload_tasks (mentor, question, status, transcript, media, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(&set.mentor)
        .bind(&set.question)
        .bind(set.status.as_ref())
        .bind(&set.transcript)
        .bind(encode_media(&set.media)?)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for (position, task) in set.tasks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO upload_task_items (mentor, question, kind, task_id, status, payload, position, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&set.mentor)
            .bind(&set.question)
            .bind(task.kind.as_ref())
            .bind(&task.id)
            .bind(task.status.as_str())
            .bind(&task.payload)
            .bind(position as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_task_status(&self, update: TaskStatusUpdate) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        apply_status(&mut *tx, &update).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_answer_and_task_status(
        &self,
        answer: AnswerUpdate,
        status: TaskStatusUpdate,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        apply_answer(&mut *tx, &answer).await?;
        apply_status(&mut *tx, &status).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_answer(&self, answer: AnswerUpdate) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        apply_answer(&mut *tx, &answer).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_mentor_image(
        &self,
        mentor: &str,
        image: MentorImage,
        path: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO mentor_images (mentor, image, path, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (mentor, image) DO UPDATE SET path = excluded.path, updated_at = excluded.updated_at",
        )
        .bind(mentor)
        .bind(image.as_ref())
        .bind(path)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::MediaTag;

    async fn memory_store() -> SqliteStatusStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        SqliteStatusStore::from_pool(pool).await.expect("migrate")
    }

    fn task_set(key: &SubmissionKey) -> TaskSet {
        TaskSet {
            mentor: key.mentor.clone(),
            question: key.question.clone(),
            status: WorkflowStatus::InProgress,
            tasks: vec![
                Task::queued(TaskKind::TranscodeWeb),
                Task::queued(TaskKind::Transcribe),
            ],
            transcript: Some(String::new()),
            media: vec![Media::video(MediaTag::Original, "videos/m/q/original.mp4")],
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let store = memory_store().await;
        let key = SubmissionKey::new("m", "q");
        let set = task_set(&key);
        store
            .create_task_set(AnswerUpdate::new(key.clone()).transcript(""), &set)
            .await
            .expect("create");

        let fetched = store.fetch_task_set(&key).await.expect("fetch").expect("present");
        assert_eq!(fetched, set);
        let answer = store.fetch_answer(&key).await.expect("answer").expect("present");
        assert_eq!(answer.transcript.as_deref(), Some(""));

        assert!(store.fetch_task_set(&SubmissionKey::new("m", "other")).await.expect("fetch").is_none());
    }

    #[tokio::test]
    async fn sparse_answer_update_keeps_untouched_fields() {
        let store = memory_store().await;
        let key = SubmissionKey::new("m", "q");
        store
            .update_answer(AnswerUpdate::new(key.clone()).transcript("hello").media(Media::video(MediaTag::Web, "w1")))
            .await
            .expect("first");
        store
            .update_answer(AnswerUpdate::new(key.clone()).media(Media::video(MediaTag::Mobile, "m1")))
            .await
            .expect("second");
        let answer = store.fetch_answer(&key).await.expect("fetch").expect("present");
        assert_eq!(answer.transcript.as_deref(), Some("hello"));
        assert_eq!(answer.media.len(), 2);
        assert_eq!(answer.media(MediaTag::Web).map(|m| m.url.as_str()), Some("w1"));
    }

    #[tokio::test]
    async fn terminal_tasks_are_not_rewritten() {
        let store = memory_store().await;
        let key = SubmissionKey::new("m", "q");
        store.create_task_set(AnswerUpdate::new(key.clone()), &task_set(&key)).await.expect("create");

        store
            .update_task_status(TaskStatusUpdate::task(key.clone(), TaskKind::TranscodeWeb, TaskStatus::Done))
            .await
            .expect("done");
        store
            .update_task_status(TaskStatusUpdate::task(key.clone(), TaskKind::TranscodeWeb, TaskStatus::InProgress))
            .await
            .expect("refused silently");
        store
            .update_task_status(TaskStatusUpdate::task(key.clone(), TaskKind::Transcribe, TaskStatus::cancelled()))
            .await
            .expect("cancel");
        store
            .update_task_status(
                TaskStatusUpdate::task(key.clone(), TaskKind::Transcribe, TaskStatus::Done).with_payload("late"),
            )
            .await
            .expect("refused silently");

        let set = store.fetch_task_set(&key).await.expect("fetch").expect("present");
        assert_eq!(set.task(TaskKind::TranscodeWeb).map(|t| &t.status), Some(&TaskStatus::Done));
        assert!(set.task(TaskKind::Transcribe).is_some_and(|t| t.status.is_cancelled()));
    }

    #[tokio::test]
    async fn combined_update_writes_answer_and_status_together() {
        let store = memory_store().await;
        let key = SubmissionKey::new("m", "q");
        store.create_task_set(AnswerUpdate::new(key.clone()), &task_set(&key)).await.expect("create");

        let vtt = Media::subtitles("videos/m/q/en.vtt");
        store
            .update_answer_and_task_status(
                AnswerUpdate::new(key.clone()).transcript("hi there").media(vtt.clone()),
                TaskStatusUpdate::task(key.clone(), TaskKind::Transcribe, TaskStatus::Done)
                    .with_transcript("hi there")
                    .with_media(vtt),
            )
            .await
            .expect("combined");

        let set = store.fetch_task_set(&key).await.expect("fetch").expect("present");
        assert_eq!(set.transcript.as_deref(), Some("hi there"));
        assert!(set.media(MediaTag::En).is_some());
        assert_eq!(set.task(TaskKind::Transcribe).map(|t| &t.status), Some(&TaskStatus::Done));
        let answer = store.fetch_answer(&key).await.expect("fetch").expect("present");
        assert_eq!(answer.transcript.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn question_attributes_and_deletion() {
        let store = memory_store().await;
        store.set_question_attribute("q-idle", "name", "_IDLE_").await.expect("set");
        assert!(store.is_idle_question("q-idle", "_IDLE_").await.expect("query"));
        assert!(!store.is_idle_question("q-other", "_IDLE_").await.expect("query"));

        let key = SubmissionKey::new("m", "q");
        store.create_task_set(AnswerUpdate::new(key.clone()), &task_set(&key)).await.expect("create");
        store.delete_task_set(&key).await.expect("delete");
        assert!(store.fetch_task_set(&key).await.expect("fetch").is_none());
        store
            .update_task_status(TaskStatusUpdate::task(key, TaskKind::TranscodeWeb, TaskStatus::Done))
            .await
            .expect("missing set is a no-op");
    }

    #[tokio::test]
    async fn mentor_images_keep_the_latest_path_per_kind() {
        let store = memory_store().await;
        assert!(
            store
                .fetch_mentor_image("mentor-1", MentorImage::Thumbnail)
                .await
                .expect("fetch")
                .is_none()
        );

        for path in ["mentor/thumbnails/mentor-1/a/thumbnail.png", "mentor/thumbnails/mentor-1/b/thumbnail.png"] {
            store
                .update_mentor_image("mentor-1", MentorImage::Thumbnail, path)
                .await
                .expect("update");
        }
        store
            .update_mentor_image("mentor-1", MentorImage::VirtualBackground, "mentor/vb.png")
            .await
            .expect("update");

        assert_eq!(
            store
                .fetch_mentor_image("mentor-1", MentorImage::Thumbnail)
                .await
                .expect("fetch")
                .as_deref(),
            Some("mentor/thumbnails/mentor-1/b/thumbnail.png")
        );
        assert_eq!(
            store
                .fetch_mentor_image("mentor-1", MentorImage::VirtualBackground)
                .await
                .expect("fetch")
                .as_deref(),
            Some("mentor/vb.png")
        );
    }
}

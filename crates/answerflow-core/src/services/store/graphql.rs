//! GraphQL client for the platform's content store.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{Answer, AnswerUpdate, StatusStore, StoreError, TaskStatusUpdate};
use crate::mentor::MentorImage;
use crate::runtime::types::{Media, MediaTag, SubmissionKey, Task, TaskKind, TaskSet, WorkflowStatus};

const MEDIA_FIELDS: &str = "type tag url needsTransfer duration hash transparentVideoUrl";

const MEDIA_TAGS: [MediaTag; 4] = [MediaTag::Original, MediaTag::Web, MediaTag::Mobile, MediaTag::En];

fn media_selection() -> String {
    MEDIA_TAGS
        .iter()
        .map(|tag| format!("{} {{ {MEDIA_FIELDS} }}", tag.field_name()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn task_selection() -> String {
    TaskKind::ALL
        .iter()
        .map(|kind| format!("{} {{ task_name task_id status payload }}", kind.field_name()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct GraphqlStoreConfig {
    pub endpoint: String,
    pub api_secret: String,
}

/// [`StatusStore`] backed by the content store's GraphQL API.
#[derive(Debug, Clone)]
pub struct GraphqlStatusStore {
    client: reqwest::Client,
    config: GraphqlStoreConfig,
}

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTaskData {
    upload_task: Option<UploadTaskRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTaskRecord {
    upload_status: Option<WorkflowStatus>,
    transcript: Option<String>,
    trim_upload_task: Option<Task>,
    transcode_web_task: Option<Task>,
    transcode_mobile_task: Option<Task>,
    transcribe_task: Option<Task>,
    #[serde(flatten)]
    media: MediaSlots,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MediaSlots {
    original_media: Option<Media>,
    web_media: Option<Media>,
    mobile_media: Option<Media>,
    vtt_media: Option<Media>,
}

impl MediaSlots {
    fn into_vec(self) -> Vec<Media> {
        [self.original_media, self.web_media, self.mobile_media, self.vtt_media]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[derive(Deserialize)]
struct QuestionData {
    question: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct AnswerData {
    answer: Option<AnswerRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerRecord {
    transcript: Option<String>,
    #[serde(default)]
    has_edited_transcript: Option<bool>,
    #[serde(flatten)]
    media: MediaSlots,
}

impl GraphqlStatusStore {
    pub fn new(config: GraphqlStoreConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: GraphqlStoreConfig) -> Self {
        Self { client, config }
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, StoreError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("mentor-graphql-req", "true")
            .header(AUTHORIZATION, format!("bearer {}", self.config.api_secret))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GraphqlResponse<T> = response.json().await?;
        if let Some(errors) = body.errors {
            return Err(StoreError::Rejected(errors.to_string()));
        }
        body.data
            .ok_or_else(|| StoreError::Decode("response carried no data".to_owned()))
    }

    async fn mutate(&self, query: &str, variables: Value) -> Result<(), StoreError> {
        let _: Value = self.execute(query, variables).await?;
        Ok(())
    }
}

fn key_variables(key: &SubmissionKey) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("mentorId".into(), Value::String(key.mentor.clone()));
    vars.insert("questionId".into(), Value::String(key.question.clone()));
    vars
}

fn media_value(media: &Media) -> Value {
    serde_json::to_value(media).unwrap_or(Value::Null)
}

fn answer_input(update: &AnswerUpdate) -> Value {
    let mut input = Map::new();
    if let Some(transcript) = &update.transcript {
        input.insert("transcript".into(), json!(transcript));
    }
    if let Some(edited) = update.has_edited_transcript {
        input.insert("hasEditedTranscript".into(), json!(edited));
    }
    for media in &update.media {
        input.insert(media.tag.field_name().into(), media_value(media));
    }
    Value::Object(input)
}

fn status_input(update: &TaskStatusUpdate) -> Value {
    let mut input = Map::new();
    if let Some(kind) = update.kind {
        let mut task = Map::new();
        task.insert("task_name".into(), json!(kind.task_name()));
        if let Some(status) = &update.status {
            task.insert("status".into(), json!(status.as_str()));
        }
        if let Some(payload) = &update.payload {
            task.insert("payload".into(), json!(payload));
        }
        input.insert(kind.field_name().into(), Value::Object(task));
    }
    if let Some(workflow) = update.workflow {
        input.insert("uploadStatus".into(), json!(workflow.as_ref()));
    }
    if let Some(transcript) = &update.transcript {
        input.insert("transcript".into(), json!(transcript));
    }
    for media in &update.media {
        input.insert(media.tag.field_name().into(), media_value(media));
    }
    Value::Object(input)
}

fn task_set_input(set: &TaskSet) -> Value {
    let mut input = Map::new();
    input.insert("uploadStatus".into(), json!(set.status.as_ref()));
    for task in &set.tasks {
        input.insert(
            task.kind.field_name().into(),
            json!({
                "task_name": task.kind.task_name(),
                "task_id": task.id,
                "status": task.status.as_str(),
            }),
        );
    }
    if let Some(transcript) = &set.transcript {
        input.insert("transcript".into(), json!(transcript));
    }
    for media in &set.media {
        input.insert(media.tag.field_name().into(), media_value(media));
    }
    Value::Object(input)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const UPDATE_STATUS: &str = "mutation UploadTaskStatusUpdate($mentorId: ID!, $questionId: ID!, $status: UploadTaskStatusUpdateInputType!) {
  api { uploadTaskStatusUpdate(mentorId: $mentorId, questionId: $questionId, uploadTaskStatus: $status) }
}";

const UPDATE_ANSWER: &str = "mutation UploadAnswer($mentorId: ID!, $questionId: ID!, $answer: UploadAnswerType!) {
  api { uploadAnswer(mentorId: $mentorId, questionId: $questionId, answer: $answer) }
}";

const UPDATE_ANSWER_AND_STATUS: &str = "mutation UploadAnswerAndTaskStatus($mentorId: ID!, $questionId: ID!, $answer: UploadAnswerType!, $status: UploadTaskStatusUpdateInputType!) {
  api {
    uploadAnswer(mentorId: $mentorId, questionId: $questionId, answer: $answer)
    uploadTaskStatusUpdate(mentorId: $mentorId, questionId: $questionId, uploadTaskStatus: $status)
  }
}";

const CREATE_TASK_SET: &str = "mutation UploadAnswerAndTaskUpdate($mentorId: ID!, $questionId: ID!, $answer: UploadAnswerType!, $task: UploadTaskInputType!) {
  api {
    uploadAnswer(mentorId: $mentorId, questionId: $questionId, answer: $answer)
    uploadTaskUpdate(mentorId: $mentorId, questionId: $questionId, uploadTask: $task)
  }
}";

const UPDATE_THUMBNAIL: &str = "mutation MentorThumbnailUpdate($mentorId: ID!, $thumbnail: String!) {
  api { mentorThumbnailUpdate(mentorId: $mentorId, thumbnail: $thumbnail) }
}";

const UPDATE_VIRTUAL_BACKGROUND: &str = "mutation MentorVbgUpdate($mentorId: ID!, $vbgPath: String!) {
  api { mentorVbgUpdate(mentorId: $mentorId, vbgPath: $vbgPath) }
}";

#[async_trait]
impl StatusStore for GraphqlStatusStore {
    async fn fetch_task_set(&self, key: &SubmissionKey) -> Result<Option<TaskSet>, StoreError> {
        let query = format!(
            "query UploadTask($mentorId: ID!, $questionId: ID!) {{ uploadTask(mentorId: $mentorId, questionId: $questionId) {{ uploadStatus transcript {} {} }} }}",
            task_selection(),
            media_selection()
        );
        let data: UploadTaskData = self
            .execute(&query, Value::Object(key_variables(key)))
            .await?;
        let Some(record) = data.upload_task else {
            debug!(key = %key, "no upload task recorded");
            return Ok(None);
        };
        let tasks = [
            record.trim_upload_task,
            record.transcode_web_task,
            record.transcode_mobile_task,
            record.transcribe_task,
        ]
        .into_iter()
        .flatten()
        .collect();
        Ok(Some(TaskSet {
            mentor: key.mentor.clone(),
            question: key.question.clone(),
            status: record.upload_status.unwrap_or(WorkflowStatus::InProgress),
            tasks,
            transcript: record.transcript,
            media: record.media.into_vec(),
        }))
    }

    async fn fetch_question_attribute(
        &self,
        question: &str,
        attribute: &str,
    ) -> Result<Option<String>, StoreError> {
        if !is_identifier(attribute) {
            return Err(StoreError::Decode(format!("invalid attribute name '{attribute}'")));
        }
        let query = format!("query Question($id: ID!) {{ question(id: $id) {{ {attribute} }} }}");
        let data: QuestionData = self.execute(&query, json!({ "id": question })).await?;
        Ok(data
            .question
            .and_then(|mut fields| fields.remove(attribute))
            .and_then(|value| match value {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }))
    }

    async fn fetch_answer(&self, key: &SubmissionKey) -> Result<Option<Answer>, StoreError> {
        let query = format!(
            "query Answer($mentorId: ID!, $questionId: ID!) {{ answer(mentor: $mentorId, question: $questionId) {{ transcript hasEditedTranscript {} }} }}",
            media_selection()
        );
        let data: AnswerData = self
            .execute(&query, Value::Object(key_variables(key)))
            .await?;
        Ok(data.answer.map(|record| Answer {
            transcript: record.transcript,
            has_edited_transcript: record.has_edited_transcript.unwrap_or(false),
            media: record.media.into_vec(),
        }))
    }

    async fn create_task_set(&self, answer: AnswerUpdate, set: &TaskSet) -> Result<(), StoreError> {
        let mut vars = key_variables(&answer.key);
        vars.insert("answer".into(), answer_input(&answer));
        vars.insert("task".into(), task_set_input(set));
        self.mutate(CREATE_TASK_SET, Value::Object(vars)).await
    }

    async fn update_task_status(&self, update: TaskStatusUpdate) -> Result<(), StoreError> {
        let mut vars = key_variables(&update.key);
        vars.insert("status".into(), status_input(&update));
        self.mutate(UPDATE_STATUS, Value::Object(vars)).await
    }

    async fn update_answer_and_task_status(
        &self,
        answer: AnswerUpdate,
        status: TaskStatusUpdate,
    ) -> Result<(), StoreError> {
        let mut vars = key_variables(&status.key);
        vars.insert("answer".into(), answer_input(&answer));
        vars.insert("status".into(), status_input(&status));
        self.mutate(UPDATE_ANSWER_AND_STATUS, Value::Object(vars)).await
    }

    async fn update_answer(&self, answer: AnswerUpdate) -> Result<(), StoreError> {
        let mut vars = key_variables(&answer.key);
        vars.insert("answer".into(), answer_input(&answer));
        self.mutate(UPDATE_ANSWER, Value::Object(vars)).await
    }

    async fn update_mentor_image(
        &self,
        mentor: &str,
        image: MentorImage,
        path: &str,
    ) -> Result<(), StoreError> {
        let (query, field) = match image {
            MentorImage::Thumbnail => (UPDATE_THUMBNAIL, "thumbnail"),
            MentorImage::VirtualBackground => (UPDATE_VIRTUAL_BACKGROUND, "vbgPath"),
        };
        let mut vars = Map::new();
        vars.insert("mentorId".into(), json!(mentor));
        vars.insert(field.into(), json!(path));
        self.mutate(query, Value::Object(vars)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::TaskStatus;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> GraphqlStatusStore {
        GraphqlStatusStore::new(GraphqlStoreConfig {
            endpoint: format!("{}/graphql", server.uri()),
            api_secret: "s3cret".into(),
        })
    }

    #[tokio::test]
    async fn fetch_task_set_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("mentor-graphql-req", "true"))
            .and(header("authorization", "bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "uploadTask": {
                    "uploadStatus": "IN_PROGRESS",
                    "transcript": null,
                    "transcodeWebTask": { "task_name": "transcoding-web", "task_id": "w1", "status": "DONE", "payload": null },
                    "transcribeTask": { "task_name": "transcribing", "task_id": "t1", "status": "CANCEL_PENDING", "payload": "corr" },
                    "webMedia": { "type": "video", "tag": "web", "url": "videos/m/q/web.mp4", "needsTransfer": false }
                }}
            })))
            .mount(&server)
            .await;

        let set = store(&server)
            .fetch_task_set(&SubmissionKey::new("m", "q"))
            .await
            .expect("fetch")
            .expect("set present");
        assert_eq!(set.tasks.len(), 2);
        assert_eq!(set.task(TaskKind::TranscodeWeb).map(|t| &t.status), Some(&TaskStatus::Done));
        let transcribe = set.task(TaskKind::Transcribe).expect("transcribe task");
        assert!(transcribe.status.is_cancelled());
        assert_eq!(transcribe.payload.as_deref(), Some("corr"));
        assert_eq!(set.media(MediaTag::Web).map(|m| m.url.as_str()), Some("videos/m/q/web.mp4"));
    }

    #[tokio::test]
    async fn missing_upload_task_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "uploadTask": null } })))
            .mount(&server)
            .await;
        let set = store(&server)
            .fetch_task_set(&SubmissionKey::new("m", "q"))
            .await
            .expect("fetch");
        assert!(set.is_none());
    }

    #[tokio::test]
    async fn errors_field_is_a_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "not authorized" }]
            })))
            .mount(&server)
            .await;
        let err = store(&server)
            .update_task_status(TaskStatusUpdate::task(
                SubmissionKey::new("m", "q"),
                TaskKind::Trim,
                TaskStatus::Done,
            ))
            .await
            .expect_err("errors field must fail");
        assert!(matches!(err, StoreError::Rejected(msg) if msg.contains("not authorized")));
    }

    #[tokio::test]
    async fn non_success_status_is_a_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;
        let err = store(&server)
            .fetch_answer(&SubmissionKey::new("m", "q"))
            .await
            .expect_err("502 must fail");
        assert!(matches!(err, StoreError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn combined_update_sends_only_changed_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "variables": {
                    "mentorId": "m",
                    "questionId": "q",
                    "answer": { "webMedia": { "url": "videos/m/q/web.mp4" } },
                    "status": { "transcodeWebTask": { "status": "DONE" } }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "api": {} } })))
            .expect(1)
            .mount(&server)
            .await;

        let key = SubmissionKey::new("m", "q");
        let media = Media::video(MediaTag::Web, "videos/m/q/web.mp4");
        let answer = AnswerUpdate::new(key.clone()).media(media.clone());
        let status = TaskStatusUpdate::task(key, TaskKind::TranscodeWeb, TaskStatus::Done).with_media(media);
        assert!(answer_input(&answer).get("transcript").is_none());
        store(&server)
            .update_answer_and_task_status(answer, status)
            .await
            .expect("update");
    }

    #[tokio::test]
    async fn mentor_images_use_their_own_mutations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "variables": { "mentorId": "mentor-1", "thumbnail": "mentor/thumbnails/mentor-1/t/thumbnail.png" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "api": {} } })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "variables": { "mentorId": "mentor-1", "vbgPath": "mentor/virtual_backgrounds/mentor-1/t/virtual_background.png" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "api": {} } })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        store
            .update_mentor_image("mentor-1", MentorImage::Thumbnail, "mentor/thumbnails/mentor-1/t/thumbnail.png")
            .await
            .expect("thumbnail");
        store
            .update_mentor_image(
                "mentor-1",
                MentorImage::VirtualBackground,
                "mentor/virtual_backgrounds/mentor-1/t/virtual_background.png",
            )
            .await
            .expect("virtual background");
    }

    #[tokio::test]
    async fn idle_question_detection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "question": { "name": "_IDLE_" } }
            })))
            .mount(&server)
            .await;
        let store = store(&server);
        assert!(store.is_idle_question("q", "_IDLE_").await.expect("query"));
        assert!(store.fetch_question_attribute("q", "name } x {").await.is_err());
    }
}

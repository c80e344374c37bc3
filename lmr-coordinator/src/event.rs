//! S3-style object-created notifications, the coordinator's trigger payload.

use serde::{Deserialize, Serialize};

use common::ObjectCreated;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// URL-encoded, as S3 delivers it.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl S3Event {
    pub fn from_created(created: &ObjectCreated) -> Self {
        let key = url::form_urlencoded::byte_serialize(created.key.as_bytes())
            .collect::<String>()
            .replace("%2F", "/");
        Self {
            records: vec![S3EventRecord {
                s3: S3Entity {
                    bucket: S3Bucket {
                        name: created.bucket.clone(),
                    },
                    object: S3Object { key, size: None },
                },
            }],
        }
    }

    /// Created objects, keys decoded.
    pub fn objects(&self) -> impl Iterator<Item = ObjectCreated> + '_ {
        self.records.iter().map(|record| ObjectCreated {
            bucket: record.s3.bucket.name.clone(),
            key: decode_key(&record.s3.object.key),
        })
    }
}

fn decode_key(raw: &str) -> String {
    if raw.contains(|c| c == '&' || c == '=') {
        return raw.to_string();
    }
    url::form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

/// Job a notification belongs to, when the key lies under `<job>/task`.
pub fn task_job(key: &str) -> Option<&str> {
    let (job, rest) = key.split_once('/')?;
    if job.is_empty() || !rest.starts_with("task") {
        return None;
    }
    Some(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_notification() {
        let raw = r#"{
            "Records": [{
                "eventVersion": "2.1",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "jobs", "arn": "arn:aws:s3:::jobs"},
                    "object": {"key": "my+job/task/mapper/1", "size": 42}
                }
            }]
        }"#;
        let event: S3Event = serde_json::from_str(raw).unwrap();
        let objects: Vec<ObjectCreated> = event.objects().collect();
        assert_eq!(
            objects,
            vec![ObjectCreated {
                bucket: "jobs".into(),
                key: "my job/task/mapper/1".into()
            }]
        );
    }

    #[test]
    fn created_objects_survive_encoding() {
        let created = ObjectCreated {
            bucket: "jobs".into(),
            key: "j 1/task/reducer/2/0".into(),
        };
        let event = S3Event::from_created(&created);
        assert_eq!(event.records[0].s3.object.key, "j+1/task/reducer/2/0");
        assert_eq!(event.objects().next(), Some(created));
    }

    #[test]
    fn only_task_keys_name_a_job() {
        assert_eq!(task_job("j/task/mapper/1"), Some("j"));
        assert_eq!(task_job("j/task/reducer/1/0"), Some("j"));
        assert_eq!(task_job("j/roundstate.1"), None);
        assert_eq!(task_job("j/result"), None);
        assert_eq!(task_job("j/jobdata"), None);
        assert_eq!(task_job("/task/mapper/1"), None);
    }
}

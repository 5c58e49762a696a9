use crate::error::DirectoryError;
use crate::model::{History, LiveStatus, UserDetails};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration as StdDuration;

const HISTORIES_EP: &str = "/api/histories";
const USERS_EP: &str = "/api/users";
const GROUPS_EP: &str = "/api/groups";
const HISTORY_KEYS: &str = "id,name,update_time,user_id,size";
const PAGE_LIMIT: usize = 100;

/// Contract with the remote Galaxy server. The reconciler and sweeper only
/// see this trait, so tests can drive them with stub directories.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// Drain every page of non-purged histories whose `update_time` is at
    /// least `older_than_days` old. Any non-2xx page aborts the listing.
    async fn list_histories(
        &self,
        older_than_days: i64,
        include_published: bool,
    ) -> Result<Vec<History>, DirectoryError>;

    async fn get_user(&self, user_id: &str) -> Result<UserDetails, DirectoryError>;

    /// Map of user id to the names of groups that user belongs to.
    async fn group_memberships(&self) -> Result<HashMap<String, Vec<String>>, DirectoryError>;

    /// Delete (or purge) one history. Soft failure: returns false.
    async fn delete_history(&self, history_id: &str, purge: bool) -> bool;

    /// Live deleted/purged flags; `None` when the status could not be read.
    async fn live_status(&self, history_id: &str) -> Option<LiveStatus>;
}

/// Galaxy REST client. Auth is a static API key query parameter.
pub struct GalaxyDirectory {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Group {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GroupMember {
    id: String,
}

impl GalaxyDirectory {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: Client::builder()
                .timeout(StdDuration::from_secs(120))
                .connect_timeout(StdDuration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let response = self
            .client
            .get(url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DirectoryApi for GalaxyDirectory {
    async fn list_histories(
        &self,
        older_than_days: i64,
        include_published: bool,
    ) -> Result<Vec<History>, DirectoryError> {
        let cutoff = (Utc::now() - Duration::days(older_than_days))
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let url = format!("{}{HISTORIES_EP}", self.base_url);

        let mut histories = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: Vec<History> = self
                .get_json(
                    &url,
                    &[
                        ("all", "true".to_string()),
                        ("q", "purged".to_string()),
                        ("qv", "False".to_string()),
                        ("q", "published".to_string()),
                        ("qv", if include_published { "True" } else { "False" }.to_string()),
                        ("q", "update_time-le".to_string()),
                        ("qv", cutoff.clone()),
                        ("keys", HISTORY_KEYS.to_string()),
                        ("limit", PAGE_LIMIT.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let drained = page.is_empty();
            histories.extend(page);
            tracing::debug!(received = histories.len(), "receiving histories");
            if drained {
                break;
            }
            offset += PAGE_LIMIT;
        }

        tracing::info!(count = histories.len(), "histories returned");
        Ok(histories)
    }

    async fn get_user(&self, user_id: &str) -> Result<UserDetails, DirectoryError> {
        let url = format!("{}{USERS_EP}/{user_id}", self.base_url);
        self.get_json(&url, &[]).await
    }

    async fn group_memberships(&self) -> Result<HashMap<String, Vec<String>>, DirectoryError> {
        let groups: Vec<Group> = self
            .get_json(&format!("{}{GROUPS_EP}", self.base_url), &[])
            .await?;

        let mut memberships: HashMap<String, Vec<String>> = HashMap::new();
        for (index, group) in groups.iter().enumerate() {
            tracing::debug!(
                group = %group.name,
                progress = format!("{}/{}", index + 1, groups.len()),
                "populating group"
            );
            let members: Vec<GroupMember> = self
                .get_json(
                    &format!("{}{GROUPS_EP}/{}/users", self.base_url, group.id),
                    &[],
                )
                .await?;
            for member in members {
                memberships.entry(member.id).or_default().push(group.name.clone());
            }
        }
        tracing::info!(groups = groups.len(), "groups queried");
        Ok(memberships)
    }

    async fn delete_history(&self, history_id: &str, purge: bool) -> bool {
        let url = format!("{}{HISTORIES_EP}/{history_id}", self.base_url);
        let result = self
            .client
            .delete(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("purge", if purge { "True" } else { "False" }),
            ])
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::warn!(history_id, %error, "delete request failed");
                false
            }
        }
    }

    async fn live_status(&self, history_id: &str) -> Option<LiveStatus> {
        let url = format!("{}{HISTORIES_EP}/{history_id}", self.base_url);
        match self.get_json::<LiveStatus>(&url, &[]).await {
            Ok(status) => Some(status),
            Err(error) => {
                tracing::warn!(history_id, %error, "live status query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history_json(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("history {id}"),
            "update_time": "2024-01-15T08:00:00.000000",
            "user_id": "u1",
            "size": 1024
        })
    }

    #[tokio::test]
    async fn list_histories_drains_all_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/histories"))
            .and(query_param("offset", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(vec![history_json("h1"), history_json("h2")]),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/histories"))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "test-key");
        let histories = directory.list_histories(90, false).await.unwrap();
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].id, "h1");
    }

    #[tokio::test]
    async fn list_histories_propagates_page_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/histories"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "test-key");
        let err = directory.list_histories(90, false).await.unwrap_err();
        match err {
            DirectoryError::Http { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_histories_sends_api_key_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/histories"))
            .and(query_param("key", "test-key"))
            .and(query_param("all", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "test-key");
        assert!(directory.list_histories(90, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_user_decodes_details_and_ignores_extras() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "u1",
                "username": "alice",
                "email": "alice@example.org",
                "is_admin": false,
                "total_disk_usage": 1024.0,
                "nice_total_disk_usage": "1.0 KB",
                "quota": "250 GB",
                "quota_percent": 0.4,
                "deleted": false,
                "purged": false,
                "tags_used": ["rna"],
                "preferences": {"theme": "dark"}
            })))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "k");
        let user = directory.get_user("u1").await.unwrap();
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.email.as_deref(), Some("alice@example.org"));
    }

    #[tokio::test]
    async fn missing_user_is_a_soft_error_for_the_caller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "k");
        assert!(directory.get_user("ghost").await.is_err());
    }

    #[tokio::test]
    async fn group_memberships_joins_groups_to_members() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "g1", "name": "keeplist"},
                {"id": "g2", "name": "trainers"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/groups/g1/users"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": "u1"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/groups/g2/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "u1"}, {"id": "u2"}
            ])))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "k");
        let memberships = directory.group_memberships().await.unwrap();
        assert_eq!(memberships["u1"], vec!["keeplist", "trainers"]);
        assert_eq!(memberships["u2"], vec!["trainers"]);
    }

    #[tokio::test]
    async fn delete_history_reports_success_and_failure() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/histories/good"))
            .and(query_param("purge", "False"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/histories/bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "k");
        assert!(directory.delete_history("good", false).await);
        assert!(!directory.delete_history("bad", false).await);
    }

    #[tokio::test]
    async fn live_status_reads_flags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/histories/h1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "h1",
                "deleted": true,
                "purged": false
            })))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "k");
        let status = directory.live_status("h1").await.unwrap();
        assert!(status.deleted);
        assert!(!status.purged);
    }

    #[tokio::test]
    async fn live_status_failure_is_unknown_not_guessed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/histories/h1"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let directory = GalaxyDirectory::new(&server.uri(), "k");
        assert!(directory.live_status("h1").await.is_none());
    }
}

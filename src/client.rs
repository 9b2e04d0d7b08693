//! HTTP client for a running MemoryOS API server
//!
//! Uses a long-lived reqwest::Client for connection pooling. Failed calls
//! come back as `MemoryOsError::Api` carrying the server's status and message.

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::api::{
    ApiResponse, ContextParams, CreateSharedRequest, GrantRequest, MemoryKey, PracticeRequest,
    RegisterSkillRequest, SearchParams, SharedKey, SkillParams, StoreMemoryRequest,
    UpdateSharedRequest,
};
use crate::config::MemoryOsConfig;
use crate::error::MemoryOsError;
use crate::models::{ContextArtifact, Memory, MemoryStats, MemoryType, SharedEntry, Skill};
use crate::shared::SharedValue;
use crate::Result;

#[derive(Clone)]
pub struct MemoryOsClient {
    client: Client,
    base_url: String,
}

impl MemoryOsClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL from `MEMORYOS_URL`, falling back to the local default
    pub fn from_env() -> Result<Self> {
        Self::new(MemoryOsConfig::from_env()?.api_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "response received");

        let text = response.text().await?;
        let envelope: ApiResponse = serde_json::from_str(&text).map_err(|_| MemoryOsError::Api {
            status: status.as_u16(),
            message: text.clone(),
        })?;

        if !status.is_success() || !envelope.success {
            return Err(MemoryOsError::Api {
                status: status.as_u16(),
                message: envelope
                    .error
                    .unwrap_or_else(|| status.to_string()),
            });
        }

        Ok(serde_json::from_value(envelope.data.unwrap_or(Value::Null))?)
    }

    async fn get<Q: Serialize, T: DeserializeOwned>(&self, path: &str, query: &Q) -> Result<T> {
        self.send(self.request(Method::GET, path).query(query)).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(method, path).json(body)).await
    }

    async fn call<B: Serialize>(&self, method: Method, path: &str, body: &B) -> Result<()> {
        let _: Value = self.send_json(method, path, body).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<bool> {
        let response = self.request(Method::GET, "/health").send().await?;
        Ok(response.status().is_success())
    }

    // =============================
    // Memories
    // =============================

    pub async fn store_memory(&self, request: &StoreMemoryRequest) -> Result<String> {
        let data: Value = self.send_json(Method::POST, "/memory", request).await?;
        data.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MemoryOsError::Api {
                status: 200,
                message: "response did not include an id".into(),
            })
    }

    pub async fn get_memory(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<Memory> {
        let key = MemoryKey {
            agent_id: agent_id.to_string(),
            memory_type,
            id: id.to_string(),
        };
        self.get("/memory", &key).await
    }

    pub async fn update_memory(&self, memory: &Memory) -> Result<()> {
        self.call(Method::PUT, "/memory", memory).await
    }

    pub async fn delete_memory(&self, agent_id: &str, memory_type: MemoryType, id: &str) -> Result<()> {
        let key = MemoryKey {
            agent_id: agent_id.to_string(),
            memory_type,
            id: id.to_string(),
        };
        let _: Value = self
            .send(self.request(Method::DELETE, "/memory").query(&key))
            .await?;
        Ok(())
    }

    pub async fn search(&self, agent_id: &str, query: &str, limit: Option<usize>) -> Result<Vec<Memory>> {
        let params = SearchParams {
            agent_id: agent_id.to_string(),
            query: query.to_string(),
            limit,
        };
        self.get("/memory/search", &params).await
    }

    pub async fn context(&self, params: &ContextParams) -> Result<ContextArtifact> {
        self.get("/context", params).await
    }

    pub async fn stats(&self, agent_id: &str) -> Result<MemoryStats> {
        self.get("/stats", &[("agent_id", agent_id)]).await
    }

    // =============================
    // Shared entries
    // =============================

    pub async fn create_shared(&self, request: &CreateSharedRequest) -> Result<SharedEntry> {
        self.send_json(Method::POST, "/shared", request).await
    }

    pub async fn read_shared(&self, key: &SharedKey) -> Result<SharedValue> {
        self.get("/shared", key).await
    }

    pub async fn update_shared(&self, request: &UpdateSharedRequest) -> Result<u64> {
        let data: Value = self.send_json(Method::PUT, "/shared/value", request).await?;
        data.get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| MemoryOsError::Api {
                status: 200,
                message: "response did not include a version".into(),
            })
    }

    pub async fn delete_shared(&self, key: &SharedKey) -> Result<()> {
        let _: Value = self
            .send(self.request(Method::DELETE, "/shared").query(key))
            .await?;
        Ok(())
    }

    pub async fn lock_shared(&self, key: &SharedKey) -> Result<()> {
        self.call(Method::POST, "/shared/lock", key).await
    }

    pub async fn unlock_shared(&self, key: &SharedKey) -> Result<()> {
        self.call(Method::POST, "/shared/unlock", key).await
    }

    pub async fn grant_shared(&self, request: &GrantRequest) -> Result<()> {
        self.call(Method::POST, "/shared/grant", request).await
    }

    // =============================
    // Skills
    // =============================

    pub async fn register_skill(&self, agent_id: &str, skill: Skill) -> Result<Skill> {
        let request = RegisterSkillRequest {
            agent_id: agent_id.to_string(),
            skill,
        };
        self.send_json(Method::POST, "/skill", &request).await
    }

    pub async fn get_skill(&self, agent_id: &str, name: &str) -> Result<Skill> {
        let params = SkillParams {
            agent_id: agent_id.to_string(),
            name: Some(name.to_string()),
            category: None,
        };
        self.get("/skill", &params).await
    }

    pub async fn list_skills(&self, agent_id: &str, category: Option<&str>) -> Result<Vec<Skill>> {
        let params = SkillParams {
            agent_id: agent_id.to_string(),
            name: None,
            category: category.map(str::to_string),
        };
        self.get("/skill", &params).await
    }

    pub async fn practice(&self, agent_id: &str, name: &str, success: bool) -> Result<Skill> {
        let request = PracticeRequest {
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            success,
        };
        self.send_json(Method::POST, "/skill/practice", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::serve;
    use crate::memory::InMemoryMemoryStore;
    use crate::service::MemoryOs;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_server() -> MemoryOsClient {
        let memoryos = MemoryOs::new(MemoryOsConfig::default(), Arc::new(InMemoryMemoryStore::new()))
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(Arc::new(memoryos), listener));

        MemoryOsClient::new(format!("http://{}/", addr)).unwrap()
    }

    fn shared_key(agent: &str) -> SharedKey {
        SharedKey {
            team_id: "t1".into(),
            key: "plan".into(),
            agent_id: agent.into(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let client = spawn_server().await;
        assert!(!client.base_url().ends_with('/'));
        assert!(client.health().await.unwrap());

        let id = client
            .store_memory(&StoreMemoryRequest {
                id: None,
                agent_id: "a1".into(),
                memory_type: MemoryType::Episodic,
                content: "Customer prefers email".into(),
                importance: Some(0.8),
                tags: vec!["crm".into()],
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let memory = client.get_memory("a1", MemoryType::Episodic, &id).await.unwrap();
        assert_eq!(memory.tags, vec!["crm".to_string()]);

        let hits = client.search("a1", "email", None).await.unwrap();
        assert_eq!(hits.len(), 1);

        let artifact = client
            .context(&ContextParams {
                agent_id: "a1".into(),
                max_tokens: Some(200),
                strategy: Some("headline".into()),
                query: None,
            })
            .await
            .unwrap();
        assert_eq!(artifact.strategy, "headline");
        assert_eq!(artifact.included_memories, vec![id]);

        let stats = client.stats("a1").await.unwrap();
        assert_eq!(stats.total_memories, 1);
    }

    #[tokio::test]
    async fn test_errors_carry_status() {
        let client = spawn_server().await;

        client
            .create_shared(&CreateSharedRequest {
                team_id: "t1".into(),
                key: "plan".into(),
                agent_id: "lead".into(),
                value: "v1".into(),
            })
            .await
            .unwrap();
        client.lock_shared(&shared_key("lead")).await.unwrap();

        let update = UpdateSharedRequest {
            team_id: "t1".into(),
            key: "plan".into(),
            agent_id: "lead".into(),
            value: "v2".into(),
            expected_version: 1,
        };
        assert_eq!(client.update_shared(&update).await.unwrap(), 2);

        match client.update_shared(&update).await {
            Err(MemoryOsError::Api { status, .. }) => assert_eq!(status, 409),
            other => panic!("expected conflict, got {:?}", other.map(|_| ())),
        }

        match client.read_shared(&shared_key("stranger")).await {
            Err(MemoryOsError::Api { status, .. }) => assert_eq!(status, 403),
            other => panic!("expected forbidden, got {:?}", other.map(|_| ())),
        }

        client.unlock_shared(&shared_key("lead")).await.unwrap();
        client.delete_shared(&shared_key("lead")).await.unwrap();

        match client.get_skill("a1", "missing").await {
            Err(MemoryOsError::Api { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected not found, got {:?}", other.map(|_| ())),
        }
    }
}

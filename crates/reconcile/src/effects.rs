//! External side effects run once when an account completes verification.
//!
//! Sinks are delivered in a fixed order: access list, role grant, reward,
//! notification. Each receives the same [`CompletionEvent`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    gatekeeper_config::CompletionConfig,
    serde::{Deserialize, Serialize},
    tokio::{
        fs::OpenOptions,
        io::AsyncWriteExt,
        sync::Mutex,
    },
    tracing::{debug, info},
};

use crate::{Error, Result, error::Context};

pub const ACCESS_LIST: &str = "access_list";
pub const ROLE_GRANT: &str = "role_grant";
pub const REWARD: &str = "reward";
pub const NOTIFY: &str = "notify";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub account_id: String,
    pub session_id: String,
    pub chat_account_id: Option<String>,
}

#[async_trait]
pub trait CompletionSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: &CompletionEvent) -> Result<()>;
}

/// Appends the account id to the server whitelist file unless it is already listed.
pub struct AccessListSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AccessListSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl CompletionSink for AccessListSink {
    fn name(&self) -> &str {
        ACCESS_LIST
    }

    async fn deliver(&self, event: &CompletionEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existing = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            },
        };
        if existing.lines().any(|l| l.trim() == event.account_id) {
            debug!(account_id = %event.account_id, "already on access list");
            return Ok(());
        }

        let mut entry = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            entry.push('\n');
        }
        entry.push_str(&event.account_id);
        entry.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        info!(account_id = %event.account_id, path = %self.path.display(), "added to access list");
        Ok(())
    }
}

/// POSTs the event as JSON; any non-2xx answer fails the delivery.
pub struct HttpSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl CompletionSink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &CompletionEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        info!(sink = %self.name, account_id = %event.account_id, "completion delivered");
        Ok(())
    }
}

/// Stands in for an unconfigured target.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl CompletionSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &CompletionEvent) -> Result<()> {
        info!(
            sink = %self.name,
            account_id = %event.account_id,
            session_id = %event.session_id,
            chat_account_id = ?event.chat_account_id,
            "completion (no target configured)"
        );
        Ok(())
    }
}

/// Build the ordered sink list from configuration.
pub fn sinks_from_config(config: &CompletionConfig) -> Result<Vec<Arc<dyn CompletionSink>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()?;

    let mut sinks: Vec<Arc<dyn CompletionSink>> = Vec::with_capacity(4);
    sinks.push(match &config.access_list_path {
        Some(path) => Arc::new(AccessListSink::new(path)),
        None => Arc::new(LogSink::new(ACCESS_LIST)),
    });
    for (name, url) in [
        (ROLE_GRANT, &config.role_grant_url),
        (REWARD, &config.reward_url),
        (NOTIFY, &config.notify_url),
    ] {
        sinks.push(match url {
            Some(url) => Arc::new(HttpSink::new(name, url, client.clone())),
            None => Arc::new(LogSink::new(name)),
        });
    }
    Ok(sinks)
}

/// Deliver to every sink in order, stopping at the first failure.
pub async fn deliver_all(sinks: &[Arc<dyn CompletionSink>], event: &CompletionEvent) -> Result<()> {
    for sink in sinks {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let result = sink.deliver(event).await;

        #[cfg(feature = "metrics")]
        {
            use gatekeeper_metrics::{completion, counter, histogram, labels};
            histogram!(completion::SINK_DURATION_SECONDS, labels::SINK => sink.name().to_string())
                .record(started.elapsed().as_secs_f64());
            if result.is_err() {
                counter!(completion::SINK_ERRORS_TOTAL, labels::SINK => sink.name().to_string())
                    .increment(1);
            }
        }

        result.map_err(|e| match e {
            Error::Sink { .. } => e,
            other => Error::sink(sink.name(), other),
        })?;
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn event(account_id: &str) -> CompletionEvent {
        CompletionEvent {
            account_id: account_id.into(),
            session_id: "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            chat_account_id: Some("chat-1".into()),
        }
    }

    #[tokio::test]
    async fn access_list_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");
        std::fs::write(&path, "76561198000000009").unwrap();
        let sink = AccessListSink::new(&path);

        sink.deliver(&event("76561198000000001")).await.unwrap();
        sink.deliver(&event("76561198000000001")).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "76561198000000009\n76561198000000001\n");
    }

    #[tokio::test]
    async fn access_list_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");
        AccessListSink::new(&path)
            .deliver(&event("a"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\n");
    }

    #[tokio::test]
    async fn http_sink_posts_event_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/reward")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "account_id": "a",
                "session_id": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "chat_account_id": "chat-1",
            })))
            .with_status(204)
            .create_async()
            .await;

        let sink = HttpSink::new(REWARD, format!("{}/reward", server.url()), reqwest::Client::new());
        sink.deliver(&event("a")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_status_fails_delivery() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/grant")
            .with_status(500)
            .create_async()
            .await;

        let sinks: Vec<Arc<dyn CompletionSink>> = vec![
            Arc::new(HttpSink::new(
                ROLE_GRANT,
                format!("{}/grant", server.url()),
                reqwest::Client::new(),
            )),
            Arc::new(LogSink::new(NOTIFY)),
        ];
        let err = deliver_all(&sinks, &event("a")).await.unwrap_err();
        assert!(matches!(err, Error::Sink { ref sink, .. } if sink == ROLE_GRANT));
    }

    #[test]
    fn unconfigured_targets_fall_back_to_log_sinks() {
        let sinks = sinks_from_config(&CompletionConfig::default()).unwrap();
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, [ACCESS_LIST, ROLE_GRANT, REWARD, NOTIFY]);
    }
}

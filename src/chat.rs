use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use url::Url;

use crate::dialogue::PendingRequest;

/// Shown in place of Steve's reply when the round trip fails for any reason.
pub const FALLBACK_LINE: &str = "System: Could not connect to Steve's thoughts...";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// How the room should react to Steve's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "Option<String>")]
pub enum VisualState {
    Dark,
    Bright,
    Considering,
    Dim,
    #[default]
    Other,
}

impl From<Option<String>> for VisualState {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            Some("dark") => Self::Dark,
            Some("bright") => Self::Bright,
            Some("considering") => Self::Considering,
            Some("dim") => Self::Dim,
            _ => Self::Other,
        }
    }
}

impl VisualState {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Bright => "bright",
            Self::Considering => "considering",
            Self::Dim => "dim",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub dialogue: String,
    #[serde(rename = "visualState", default)]
    pub visual_state: VisualState,
}

/// A finished round trip, tagged with the generation of the send that
/// started it.
#[derive(Debug)]
pub struct ChatOutcome {
    pub generation: u64,
    pub result: Result<ChatReply>,
}

/// `POST <endpoint>/chat` client for the conversation service.
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    http: Client,
    chat_url: Url,
}

impl HttpChatClient {
    pub fn new(endpoint: &Url, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            chat_url: chat_url(endpoint)?,
        })
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    pub async fn chat(&self, message: &str) -> Result<ChatReply> {
        debug!("chat: POST {} ({} chars)", self.chat_url, message.chars().count());
        let reply: ChatReply = self
            .http
            .post(self.chat_url.clone())
            .json(&ChatRequest { message })
            .send()
            .await
            .context("failed to reach the chat service")?
            .error_for_status()
            .context("chat service returned an error status")?
            .json()
            .await
            .context("failed to decode chat reply")?;
        Ok(reply)
    }
}

/// Appends `chat` to the endpoint path, keeping any existing prefix.
pub fn chat_url(endpoint: &Url) -> Result<Url> {
    let mut base = endpoint.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("chat")
        .map_err(|error| anyhow!("invalid chat endpoint {endpoint}: {error}"))
}

/// Runs chat round trips on a background runtime so a frame loop can keep
/// drawing. Finished round trips are collected with [`ChatLink::try_recv`].
pub struct ChatLink {
    runtime: Runtime,
    client: HttpChatClient,
    sender: mpsc::Sender<ChatOutcome>,
    receiver: mpsc::Receiver<ChatOutcome>,
}

impl ChatLink {
    pub fn new(client: HttpChatClient) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("stevesroom-chat")
            .enable_all()
            .build()
            .context("failed to start chat runtime")?;
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            runtime,
            client,
            sender,
            receiver,
        })
    }

    pub fn send(&self, request: PendingRequest) {
        let client = self.client.clone();
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            let result = client.chat(&request.message).await;
            let outcome = ChatOutcome {
                generation: request.generation,
                result,
            };
            if sender.send(outcome).is_err() {
                warn!("chat: reply for generation {} dropped, stage is gone", request.generation);
            }
        });
    }

    pub fn try_recv(&self) -> Option<ChatOutcome> {
        self.receiver.try_recv().ok()
    }

    /// One round trip on the calling thread.
    pub fn request_blocking(&self, message: &str) -> Result<ChatReply> {
        self.runtime.block_on(self.client.chat(message))
    }
}

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::images::ImageLoader;
use crate::llm::conversation::Conversation;
use crate::llm::{Grounding, LlmProvider, LlmResponse, Part};
use crate::museums::{Artwork, MuseumConfig};

pub mod websocket;

pub const SIDEBAR_TITLE: &str = "Art Piece";

/// Where an element is shown relative to the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    Side,
    Inline,
}

/// Content attached to a sidebar or a chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UiElement {
    Text {
        name: String,
        content: String,
        display: Display,
    },
    Image {
        name: String,
        url: String,
        display: Display,
    },
    /// Provider-rendered HTML (search suggestions), inserted verbatim
    Html { name: String, content: String },
    Link { title: String, url: String },
}

/// The chat UI as seen by a session.
#[async_trait::async_trait]
pub trait ChatSurface: Send {
    async fn set_sidebar(&mut self, title: &str, elements: Vec<UiElement>) -> Result<()>;

    async fn send_message(&mut self, content: &str, elements: Vec<UiElement>) -> Result<()>;
}

/// Turn search grounding into message elements. No grounding, no elements.
pub fn citation_elements(grounding: Option<&Grounding>) -> Vec<UiElement> {
    let Some(grounding) = grounding else {
        return Vec::new();
    };

    let mut elements = Vec::new();
    if let Some(html) = grounding
        .rendered_content
        .as_ref()
        .filter(|c| !c.trim().is_empty())
    {
        elements.push(UiElement::Html {
            name: "sources".to_string(),
            content: html.clone(),
        });
    }
    elements.extend(grounding.sources.iter().map(|s| UiElement::Link {
        title: s.title.clone().unwrap_or_else(|| s.uri.clone()),
        url: s.uri.clone(),
    }));
    elements
}

/// One user's conversation about one artwork.
pub struct DocentSession {
    id: Uuid,
    museum: Arc<dyn MuseumConfig>,
    llm: Arc<dyn LlmProvider>,
    images: ImageLoader,
    temperature: Option<f32>,
    artwork: Option<Artwork>,
    conversation: Option<Conversation>,
}

impl DocentSession {
    pub fn new(museum: Arc<dyn MuseumConfig>, llm: Arc<dyn LlmProvider>, images: ImageLoader) -> Self {
        Self {
            id: Uuid::new_v4(),
            museum,
            llm,
            images,
            temperature: None,
            artwork: None,
            conversation: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn museum(&self) -> &str {
        self.museum.name()
    }

    pub fn artwork(&self) -> Option<&Artwork> {
        self.artwork.as_ref()
    }

    /// Pick an artwork, show it, and let the model open the conversation.
    pub async fn on_chat_start(&mut self, surface: &mut dyn ChatSurface) -> Result<()> {
        let prompts = *self.museum.prompts();
        let artwork = self.museum.next_artwork().await?;
        info!(session = %self.id, museum = %self.museum.name(), image = %artwork.image_url, "session started");

        let sidebar = artwork.render(prompts.sidebar)?;
        surface
            .set_sidebar(
                SIDEBAR_TITLE,
                vec![
                    UiElement::Text {
                        name: "art piece".to_string(),
                        content: sidebar,
                        display: Display::Side,
                    },
                    UiElement::Image {
                        name: "image".to_string(),
                        url: artwork.image_url.clone(),
                        display: Display::Side,
                    },
                ],
            )
            .await?;

        let opening = artwork.render(prompts.opening)?;
        let image = self.images.load(&artwork.image_url).await?;
        self.artwork = Some(artwork);

        let conversation = self.conversation.insert(
            Conversation::new(self.llm.clone(), Some(prompts.system.to_string()))
                .with_temperature(self.temperature),
        );
        let response = conversation
            .send(vec![Part::text(opening), image.into_part()])
            .await?;

        self.reply(surface, response).await
    }

    /// Relay a user message verbatim within the session's conversation.
    pub async fn on_message(&mut self, text: &str, surface: &mut dyn ChatSurface) -> Result<()> {
        let conversation = self
            .conversation
            .as_mut()
            .context("chat session has not started")?;
        let response = conversation.send(vec![Part::text(text)]).await?;
        self.reply(surface, response).await
    }

    async fn reply(&self, surface: &mut dyn ChatSurface, response: LlmResponse) -> Result<()> {
        let elements = citation_elements(response.grounding.as_ref());
        debug!(
            session = %self.id,
            model = %response.model,
            tokens = response.usage.total_tokens,
            citations = elements.len(),
            "model replied"
        );
        surface.send_message(&response.content, elements).await
    }
}

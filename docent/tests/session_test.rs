use anyhow::Result;
use std::sync::{Arc, Mutex};

use docent::dataset::{CsvRowsSource, DatasetExhausted, DatasetStream};
use docent::images::ImageLoader;
use docent::llm::{
    Grounding, GroundingSource, LlmProvider, LlmRequest, LlmResponse, Part, Role, UsageMetadata,
};
use docent::museums::{rijks, MuseumConfig, MuseumKind};
use docent::sessions::{ChatSurface, DocentSession, UiElement, SIDEBAR_TITLE};

/// Provider that replays canned answers and keeps every request it saw.
struct ScriptedProvider {
    replies: Mutex<Vec<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<LlmResponse>) -> Self {
        let mut replies = replies;
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn reply(content: &str, grounding: Option<Grounding>) -> LlmResponse {
    LlmResponse {
        content: content.to_string(),
        usage: UsageMetadata::default(),
        model: "scripted".to_string(),
        grounding,
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    Sidebar(String, Vec<UiElement>),
    Message(String, Vec<UiElement>),
}

#[derive(Default)]
struct RecordingSurface {
    events: Vec<Event>,
}

#[async_trait::async_trait]
impl ChatSurface for RecordingSurface {
    async fn set_sidebar(&mut self, title: &str, elements: Vec<UiElement>) -> Result<()> {
        self.events.push(Event::Sidebar(title.to_string(), elements));
        Ok(())
    }

    async fn send_message(&mut self, content: &str, elements: Vec<UiElement>) -> Result<()> {
        self.events.push(Event::Message(content.to_string(), elements));
        Ok(())
    }
}

/// One usable artwork plus one row with a missing artist, which must never be drawn.
fn rijks_museum(dir: &tempfile::TempDir, image_url: &str) -> Arc<dyn MuseumConfig> {
    let path = dir.path().join("rijks.csv");
    let csv = format!(
        "original_id,image_url,title,description,artist_uri,artist_name\n\
         https://id.rijksmuseum.nl/1,{image_url},The Milkmaid,A maid pours milk,https://id.rijksmuseum.nl/a,Johannes Vermeer\n\
         https://id.rijksmuseum.nl/2,{image_url},Untitled,No known maker,,\n"
    );
    std::fs::write(&path, csv).unwrap();

    let source = CsvRowsSource::open(&path, 10).unwrap();
    let stream = DatasetStream::new(Box::new(source)).with_seed(7);
    MuseumKind::Rijks.collection(stream)
}

#[tokio::test]
async fn test_chat_start_then_follow_up() {
    let mut server = mockito::Server::new_async().await;
    let image = server
        .mock("GET", "/iiif/PJEZO/full/512,/0/default.jpg")
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body("hello")
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let image_url = format!("{}/iiif/PJEZO/full/max/0/default.jpg", server.url());
    let museum = rijks_museum(&dir, &image_url);

    let grounding = Grounding {
        rendered_content: Some("<div>chips</div>".to_string()),
        sources: vec![GroundingSource {
            title: Some("rijksmuseum.nl".to_string()),
            uri: "https://www.rijksmuseum.nl/en/collection/SK-A-2344".to_string(),
        }],
    };
    let provider = Arc::new(ScriptedProvider::new(vec![
        reply("Welcome! Look at the light on the wall.", Some(grounding)),
        reply("Johannes Vermeer painted it around 1658.", None),
    ]));

    let mut session = DocentSession::new(museum, provider.clone(), ImageLoader::new(5).unwrap())
        .with_temperature(Some(1.0));
    let mut surface = RecordingSurface::default();

    session.on_chat_start(&mut surface).await.expect("chat start");
    image.assert_async().await;

    assert_eq!(session.museum(), "rijks");
    assert_eq!(session.artwork().unwrap().image_url, image_url);

    // Sidebar first, then the model's opening message
    assert_eq!(surface.events.len(), 2);
    match &surface.events[0] {
        Event::Sidebar(title, elements) => {
            assert_eq!(title, SIDEBAR_TITLE);
            assert!(matches!(
                &elements[0],
                UiElement::Text { content, .. } if content.contains("Johannes Vermeer")
                    && content.contains("A maid pours milk")
            ));
            assert!(matches!(&elements[1], UiElement::Image { url, .. } if *url == image_url));
        }
        other => panic!("expected sidebar first, got {:?}", other),
    }
    match &surface.events[1] {
        Event::Message(content, elements) => {
            assert_eq!(content, "Welcome! Look at the light on the wall.");
            assert_eq!(elements.len(), 2);
            assert!(matches!(&elements[1], UiElement::Link { title, .. } if title == "rijksmuseum.nl"));
        }
        other => panic!("expected message second, got {:?}", other),
    }

    let requests = provider.requests();
    let opening = &requests[0];
    assert_eq!(opening.system_instruction.as_deref(), Some(rijks::SYSTEM_PROMPT));
    assert_eq!(opening.temperature, Some(1.0));
    assert_eq!(opening.turns.len(), 1);
    assert!(opening.turns[0].text().contains(&image_url));
    assert_eq!(
        opening.turns[0].parts[1],
        Part::Image {
            mime_type: "image/jpeg".to_string(),
            data: "aGVsbG8=".to_string(),
        }
    );

    session
        .on_message("Who painted it?", &mut surface)
        .await
        .expect("follow-up");

    assert_eq!(
        surface.events[2],
        Event::Message("Johannes Vermeer painted it around 1658.".to_string(), Vec::new())
    );

    let requests = provider.requests();
    let follow_up = &requests[1];
    assert_eq!(follow_up.turns.len(), 3);
    assert_eq!(follow_up.turns[1].role, Role::Model);
    assert_eq!(follow_up.turns[1].text(), "Welcome! Look at the light on the wall.");
    assert_eq!(follow_up.turns[2].parts, vec![Part::text("Who painted it?")]);
}

#[tokio::test]
async fn test_exhausted_collection_fails_session_start() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/iiif/PJEZO/full/512,/0/default.jpg")
        .with_status(200)
        .with_body("hello")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let image_url = format!("{}/iiif/PJEZO/full/max/0/default.jpg", server.url());
    let museum = rijks_museum(&dir, &image_url);
    let provider = Arc::new(ScriptedProvider::new(vec![reply("first", None)]));
    let images = ImageLoader::new(5).unwrap();

    let mut first = DocentSession::new(museum.clone(), provider.clone(), images.clone());
    first
        .on_chat_start(&mut RecordingSurface::default())
        .await
        .expect("only usable row");

    let mut second = DocentSession::new(museum, provider.clone(), images);
    let mut surface = RecordingSurface::default();
    let err = second.on_chat_start(&mut surface).await.unwrap_err();

    assert!(err.downcast_ref::<DatasetExhausted>().is_some());
    assert!(surface.events.is_empty());
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn test_image_failure_sends_no_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/iiif/PJEZO/full/512,/0/default.jpg")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let image_url = format!("{}/iiif/PJEZO/full/max/0/default.jpg", server.url());
    let museum = rijks_museum(&dir, &image_url);
    let provider = Arc::new(ScriptedProvider::new(vec![reply("unused", None)]));

    let mut session = DocentSession::new(museum, provider.clone(), ImageLoader::new(5).unwrap());
    let mut surface = RecordingSurface::default();
    let err = session.on_chat_start(&mut surface).await.unwrap_err();

    assert!(err.to_string().contains("404"));
    assert!(provider.requests().is_empty());
    assert!(surface
        .events
        .iter()
        .all(|e| !matches!(e, Event::Message(..))));
}

#[tokio::test]
async fn test_message_before_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let museum = rijks_museum(&dir, "https://iiif.micr.io/PJEZO/full/max/0/default.jpg");
    let provider = Arc::new(ScriptedProvider::new(Vec::new()));

    let mut session = DocentSession::new(museum, provider.clone(), ImageLoader::new(5).unwrap());
    let result = session
        .on_message("hello?", &mut RecordingSurface::default())
        .await;

    assert!(result.is_err());
    assert!(provider.requests().is_empty());
}

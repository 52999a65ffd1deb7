use serde::{Deserialize, Serialize};

use super::{ArtRecord, PromptBundle};

pub const SIDEBAR_PROMPT: &str = "Here's the art piece we are discussing today:

- **Title**: {Title}
- **Author**: {Artist}
- **MoMA link**: {URL}

Here is the image of the art piece. You can click on it to enlarge it.";

pub const OPENING_PROMPT: &str = "Here's the art piece we are discussing today:

- **Title**: {Title}
- **Author**: {Artist}
- **Image url**: {ImageURL}

Here is the image of the art piece.";

pub const SYSTEM_PROMPT: &str = "You are Artie, an art director with deep knowledge of modern art who enjoys guiding visitors through a collection.
Explore the selected art piece together with the user.
Point out what makes it interesting and keep the conversation lively.
You can show images to the user with html, e.g. <img src=url />.
When the user asks for another art piece, ask them to refresh the page to load a new one.";

pub const PROMPTS: PromptBundle = PromptBundle {
    sidebar: SIDEBAR_PROMPT,
    opening: OPENING_PROMPT,
    system: SYSTEM_PROMPT,
};

/// One row of the MoMA collection dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MomaRecord {
    pub title: String,
    pub artist: Vec<String>,
    pub artist_bio: Vec<String>,
    pub nationality: Vec<String>,
    pub begin_date: Vec<String>,
    pub end_date: Vec<String>,
    pub gender: Vec<String>,
    pub date: i64,
    pub medium: String,
    pub dimensions: String,
    pub credit_line: String,
    pub accession_number: String,
    pub classification: String,
    pub department: String,
    pub date_acquired: String,
    pub cataloged: String,
    #[serde(rename = "ObjectID")]
    pub object_id: i64,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "ImageURL")]
    pub image_url: String,
    pub on_view: String,
}

impl ArtRecord for MomaRecord {
    fn image_url(&self) -> &str {
        &self.image_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::museums::Artwork;
    use serde_json::json;

    fn starry_night() -> serde_json::Value {
        json!({
            "Title": "The Starry Night",
            "Artist": ["Vincent van Gogh"],
            "ArtistBio": ["(Dutch, 1853–1890)"],
            "Nationality": ["Dutch"],
            "BeginDate": ["1853"],
            "EndDate": ["1890"],
            "Gender": ["Male"],
            "Date": 1889,
            "Medium": "Oil on canvas",
            "Dimensions": "29 x 36 1/4\" (73.7 x 92.1 cm)",
            "CreditLine": "Acquired through the Lillie P. Bliss Bequest",
            "AccessionNumber": "472.1941",
            "Classification": "Painting",
            "Department": "Painting & Sculpture",
            "DateAcquired": "1941-01-01",
            "Cataloged": "Y",
            "ObjectID": 79802,
            "URL": "http://www.moma.org/collection/works/79802",
            "ImageURL": "http://www.moma.org/media/W1siZiIsIjQ2NzUxNyJdXQ.jpg",
            "OnView": "MoMA, Floor 5, 501",
        })
    }

    #[test]
    fn templates_render_against_record_fields() {
        let record: MomaRecord = serde_json::from_value(starry_night()).unwrap();
        let artwork = Artwork::from_record(&record).unwrap();

        let sidebar = artwork.render(PROMPTS.sidebar).unwrap();
        assert!(sidebar.contains("- **Title**: The Starry Night"));
        assert!(sidebar.contains("- **Author**: Vincent van Gogh"));
        assert!(sidebar.contains("http://www.moma.org/collection/works/79802"));

        let opening = artwork.render(PROMPTS.opening).unwrap();
        assert!(opening.contains("- **Image url**: http://www.moma.org/media/W1siZiIsIjQ2NzUxNyJdXQ.jpg"));
        assert_eq!(artwork.image_url, record.image_url);
    }

    #[test]
    fn rows_with_nulls_are_unusable() {
        let mut row = starry_night().as_object().cloned().unwrap();
        assert!(MomaRecord::is_usable(&row));
        row.insert("OnView".to_string(), serde_json::Value::Null);
        assert!(!MomaRecord::is_usable(&row));
    }
}

use serde::{Deserialize, Serialize};

use super::{ArtRecord, PromptBundle};

pub const SIDEBAR_PROMPT: &str = "Here's the art piece we are discussing today:

- **Author**: {artist_name}
- **Description**: {description}

Here is the image of the art piece. You can click on it to enlarge it.";

pub const OPENING_PROMPT: &str = "Here's the art piece we are discussing today:

- **Author**: {artist_name}
- **Description**: {description}
- **Image url**: {image_url}

Here is the image of the art piece.";

pub const SYSTEM_PROMPT: &str = "You are an outgoing art director with encyclopedic knowledge of the Rijksmuseum collection.
Entertain the user by pointing out what is remarkable about the selected art piece and keep the conversation going.
You can show images to the user with html, e.g. <img src=url />.
The images are served by https://iiif.micr.io/, an IIIF server that can scale, crop and zoom.
`https://iiif.micr.io/<ID>/full/512,/0/default.jpg` returns the image scaled to 512 pixels wide.
Use 512 pixels unless the user asks for a higher resolution.
To show a detail, request a region: `https://iiif.micr.io/<ID>/x,y,w,h/512,/0/default.jpg`.
x and y are the pixel offsets of the region's upper left corner from the image's upper left corner (0,0),
w and h are the region's width and height in pixels.
Use `pct:x,y,w,h` to give the region in percentages instead.";

pub const PROMPTS: PromptBundle = PromptBundle {
    sidebar: SIDEBAR_PROMPT,
    opening: OPENING_PROMPT,
    system: SYSTEM_PROMPT,
};

/// One row of the harvested Rijksmuseum dataset (the CSV the harvest job writes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RijksRecord {
    pub original_id: String,
    pub image_url: String,
    pub title: String,
    pub description: String,
    pub artist_uri: String,
    pub artist_name: String,
}

impl ArtRecord for RijksRecord {
    fn image_url(&self) -> &str {
        &self.image_url
    }
}

//! Block Kit message types.

use serde::{Deserialize, Serialize};

/// A structured chat message: fallback text, blocks and a colored attachment strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Fallback text for notifications and clients without block support
    pub text: String,
    /// Block Kit blocks
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Attachments (for the color strip)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    /// Create a message with only fallback text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Append a block.
    #[must_use]
    pub fn with_block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    /// Add a color strip attachment. `color` is `0xRRGGBB`.
    #[must_use]
    pub fn with_color(mut self, color: u32) -> Self {
        self.attachments.push(Attachment {
            color: format!("#{color:06x}"),
            fallback: Some(self.text.clone()),
        });
        self
    }

    /// Concatenated text of every block, for assertions and logs.
    #[must_use]
    pub fn plain_text(&self) -> String {
        let mut out = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Header { text } => out.push(text.as_str()),
                Block::Section { text, fields } => {
                    if let Some(text) = text {
                        out.push(text.as_str());
                    }
                    out.extend(fields.iter().map(Text::as_str));
                }
                Block::Context { elements } => out.extend(elements.iter().map(Text::as_str)),
                Block::Divider => {}
            }
        }
        out.join("\n")
    }
}

/// Block Kit layout block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Large header line
    Header { text: Text },
    /// Section with text and/or a two-column field grid
    Section {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<Text>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<Text>,
    },
    /// Small context line for metadata
    Context { elements: Vec<Text> },
    /// Divider line
    Divider,
}

impl Block {
    #[must_use]
    pub fn header(text: impl Into<String>) -> Self {
        Self::Header {
            text: Text::plain(text),
        }
    }

    #[must_use]
    pub fn section(text: Text) -> Self {
        Self::Section {
            text: Some(text),
            fields: Vec::new(),
        }
    }

    /// Section made of fields only. Slack renders at most 10 fields per section.
    #[must_use]
    pub fn fields(fields: Vec<Text>) -> Self {
        Self::Section { text: None, fields }
    }

    #[must_use]
    pub fn context(text: Text) -> Self {
        Self::Context {
            elements: vec![text],
        }
    }

    #[must_use]
    pub const fn divider() -> Self {
        Self::Divider
    }
}

/// Text object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Text {
    PlainText {
        text: String,
        #[serde(default)]
        emoji: bool,
    },
    Mrkdwn {
        text: String,
    },
}

impl Text {
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText {
            text: text.into(),
            emoji: true,
        }
    }

    #[must_use]
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PlainText { text, .. } | Self::Mrkdwn { text } => text,
        }
    }
}

/// Legacy attachment, used only for the color strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Hex color for the attachment strip
    pub color: String,
    /// Fallback text (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

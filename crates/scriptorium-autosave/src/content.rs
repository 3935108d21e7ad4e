//! Document content as a closed tree of blocks.
//!
//! The engine never interprets block text. It only needs to know which blocks
//! carry attachments and which blocks own children, so the tree is modelled as
//! a tagged enum and every traversal is an exhaustive match.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A single content block.
///
/// Serialises as `{"type": "image", "url": "..."}` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Block {
    Paragraph {
        #[serde(default)]
        text: String,
    },
    Image {
        url: SmolStr,
    },
    Video {
        url: SmolStr,
    },
    Audio {
        url: SmolStr,
    },
    File {
        url: SmolStr,
    },
    Container {
        #[serde(default)]
        children: Vec<Block>,
    },
}

impl Block {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph { text: text.into() }
    }

    pub fn image(url: impl Into<SmolStr>) -> Self {
        Block::Image { url: url.into() }
    }

    pub fn video(url: impl Into<SmolStr>) -> Self {
        Block::Video { url: url.into() }
    }

    pub fn audio(url: impl Into<SmolStr>) -> Self {
        Block::Audio { url: url.into() }
    }

    pub fn file(url: impl Into<SmolStr>) -> Self {
        Block::File { url: url.into() }
    }

    pub fn container(children: impl IntoIterator<Item = Block>) -> Self {
        Block::Container {
            children: children.into_iter().collect(),
        }
    }

    /// The attachment URL for media blocks.
    pub fn media_url(&self) -> Option<&SmolStr> {
        match self {
            Block::Image { url }
            | Block::Video { url }
            | Block::Audio { url }
            | Block::File { url } => Some(url),
            Block::Paragraph { .. } | Block::Container { .. } => None,
        }
    }

    pub fn children(&self) -> &[Block] {
        match self {
            Block::Container { children } => children,
            _ => &[],
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Block::Paragraph { text } => text.trim().is_empty(),
            Block::Container { children } => children.iter().all(Block::is_blank),
            _ => false,
        }
    }
}

/// The block tree of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(Vec<Block>);

impl Content {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self(blocks)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.0
    }

    pub fn push(&mut self, block: Block) {
        self.0.push(block);
    }

    /// True when no block carries text or media.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(Block::is_blank)
    }

    /// Visit every block depth-first, parents before their children.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Block)) {
        fn walk<'a>(blocks: &'a [Block], f: &mut impl FnMut(&'a Block)) {
            for block in blocks {
                f(block);
                walk(block.children(), f);
            }
        }
        walk(&self.0, f);
    }
}

impl From<Vec<Block>> for Content {
    fn from(blocks: Vec<Block>) -> Self {
        Self(blocks)
    }
}

impl FromIterator<Block> for Content {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

use bytes::{Buf, BufMut};

use super::error::TagError;
use super::value::{Tag, TagName};
use crate::codec;
use crate::constants::MAX_TAG_LIST_TAGS;

/// An ordered sequence of tags with a `u32` count prefix.
///
/// Duplicate names are allowed on the wire; lookups return the first
/// match while insertion order is preserved on re-encode.
///
/// # Examples
///
/// ```
/// use red2k::tag::{Tag, TagList};
///
/// let mut tags = TagList::new();
/// tags.push(Tag::new(0x01u8, "nickname"));
/// tags.push(Tag::new(0x11u8, 0x3Cu32));
///
/// assert_eq!(tags.get_by_id(0x11).unwrap().as_u32().unwrap(), 0x3C);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagList {
    tags: Vec<Tag>,
}

impl TagList {
    /// Creates an empty tag list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tag, keeping insertion order.
    pub fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    /// Number of tags in the list.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if the list holds no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates the tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Returns the tag at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::IndexOutOfRange`] past the end of the list.
    pub fn tag_at(&self, index: usize) -> Result<&Tag, TagError> {
        self.tags.get(index).ok_or(TagError::IndexOutOfRange(index))
    }

    /// Returns the first tag with the given name.
    pub fn get(&self, name: &TagName) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == *name)
    }

    /// Returns the first tag with the given numeric id.
    pub fn get_by_id(&self, id: u8) -> Option<&Tag> {
        self.get(&TagName::Id(id))
    }

    /// Returns the first tag with the given string name.
    pub fn get_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags
            .iter()
            .find(|t| matches!(&t.name, TagName::Name(n) if n == name))
    }

    /// Encodes the list: count prefix followed by each tag in order.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.tags.len() as u32);
        for tag in &self.tags {
            tag.encode(buf);
        }
    }

    /// Decodes a list from the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::TooManyTags`] when the declared count exceeds
    /// the sanity cap, so a forged count cannot force unbounded
    /// allocation.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, TagError> {
        let count = codec::get_u32(buf)?;
        if count > MAX_TAG_LIST_TAGS {
            return Err(TagError::TooManyTags(count));
        }

        let mut tags = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tags.push(Tag::decode(buf)?);
        }
        Ok(Self { tags })
    }
}

impl FromIterator<Tag> for TagList {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TagList {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.into_iter()
    }
}

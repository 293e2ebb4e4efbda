// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Topic names, topic filters and wildcard matching.
//!
//! Rules are defined in `MQTT chapter-4.7 Topic Names and Topic Filters`.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Maximum byte length of a topic name or topic filter on the wire.
pub const MAX_TOPIC_BYTES: usize = u16::MAX as usize;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TopicError {
    EmptyTopic,

    TooManyData,

    /// NUL byte, or a wildcard character at an invalid position.
    InvalidChar,

    /// Wildcard character in a topic name.
    ContainsWildChar,
}

impl Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for TopicError {}

/// Validate a topic filter.
///
/// The single level wildcard `+` must occupy an entire level; the multi level
/// wildcard `#` must be the last character and must occupy an entire level.
///
/// Note that the scan is byte oriented, as in most broker implementations;
/// wildcard bytes inside multi-byte UTF-8 sequences cannot occur because
/// both `+` and `#` are ASCII and UTF-8 continuation bytes have the high
/// bit set.
pub fn validate_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if filter.len() > MAX_TOPIC_BYTES {
        return Err(TopicError::TooManyData);
    }

    let bytes = filter.as_bytes();
    for (index, b) in bytes.iter().enumerate() {
        match b {
            0 => return Err(TopicError::InvalidChar),
            b'+' => {
                // Must be the first character or preceded by a level separator.
                if index > 0 && bytes[index - 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
                // Must be the last character or followed by a level separator.
                if index != bytes.len() - 1 && bytes[index + 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
            }
            b'#' => {
                // Must be the absolute last character, which also guarantees
                // it appears at most once.
                if index != bytes.len() - 1 {
                    return Err(TopicError::InvalidChar);
                }
                if index > 0 && bytes[index - 1] != b'/' {
                    return Err(TopicError::InvalidChar);
                }
            }
            _ => (),
        }
    }
    Ok(())
}

/// Validate a topic name.
///
/// Topic names must not contain wildcard characters or the NUL byte.
pub fn validate_name(name: &str) -> Result<(), TopicError> {
    if name.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if name.len() > MAX_TOPIC_BYTES {
        return Err(TopicError::TooManyData);
    }
    for b in name.as_bytes() {
        match b {
            0 => return Err(TopicError::InvalidChar),
            b'+' | b'#' => return Err(TopicError::ContainsWildChar),
            _ => (),
        }
    }
    Ok(())
}

/// A validated topic name a message is published to.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct TopicName(String);

impl TopicName {
    /// # Errors
    ///
    /// Returns error if `name` violates topic name rules.
    pub fn new(name: &str) -> Result<Self, TopicError> {
        validate_name(name)?;
        Ok(Self(name.to_string()))
    }

    #[must_use]
    pub fn is_sys(&self) -> bool {
        self.0.starts_with('$')
    }

    /// Iterate topic levels. Adjacent separators denote a zero-length level.
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated topic filter a client subscribes to, possibly containing
/// `+` and `#` wildcards.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// # Errors
    ///
    /// Returns error if `filter` violates topic filter rules.
    pub fn new(filter: &str) -> Result<Self, TopicError> {
        validate_filter(filter)?;
        Ok(Self(filter.to_string()))
    }

    /// Whether the first level of this filter is a wildcard.
    ///
    /// The broker must not match such filters against topics in the
    /// reserved `$` namespace; that exclusion lives in the routing path.
    #[must_use]
    pub fn starts_with_wildcard(&self) -> bool {
        matches!(self.0.as_bytes().first(), Some(b'+' | b'#'))
    }

    /// Iterate filter levels.
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Whether `name` matches this filter.
    ///
    /// Filter and name are consumed level by level, left to right. A plain
    /// level must equal the corresponding name level byte for byte. `+`
    /// matches exactly one level of any content. A trailing `#` matches the
    /// remainder of the name, including zero levels, so `a/#` matches `a`.
    /// Matching is case sensitive and a pure function of its inputs.
    #[must_use]
    pub fn matches(&self, name: &TopicName) -> bool {
        let mut filter_levels = self.levels();
        let mut name_levels = name.levels();
        loop {
            match (filter_levels.next(), name_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => (),
                (Some(level), Some(part)) => {
                    if level != part {
                        return false;
                    }
                }
                (Some(_), None) | (None, Some(_)) => return false,
                (None, None) => return true,
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

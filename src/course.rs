//! Course and library identifiers
//!
//! Keys follow the opaque-key string forms used by course authoring tools:
//! - `course-v1:{org}+{course}+{run}` (or the legacy `{org}/{course}/{run}`)
//! - `library-v1:{org}+{library}`
//!
//! Block locations inside a course are rendered as
//! `block-v1:{org}+{course}+{run}+type@{category}+block@{name}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of the container that directly holds leaf units
pub const LEAF_CONTAINER_CATEGORY: &str = "vertical";

/// Run name reported by libraries, which have no course run
pub const LIBRARY_RUN: &str = "library";

/// File marking the root of an extracted course tree
pub const COURSE_DESCRIPTOR: &str = "course.xml";

/// Descriptor written for exported libraries
pub const LIBRARY_DESCRIPTOR: &str = "library.xml";

/// Identifier parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid course key: {0}")]
    InvalidCourseKey(String),

    #[error("Invalid location: {0}")]
    InvalidLocation(String),
}

// ============================================================================
// Course-like keys
// ============================================================================

/// Key of a course run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseKey {
    pub org: String,
    pub course: String,
    pub run: String,
}

/// Key of a content library
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryKey {
    pub org: String,
    pub library: String,
}

/// Either a course or a library
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CourseLikeKey {
    Course(CourseKey),
    Library(LibraryKey),
}

impl CourseLikeKey {
    /// Build a course key, validating each component
    pub fn course(org: &str, course: &str, run: &str) -> Result<Self, KeyError> {
        let key = CourseKey {
            org: org.to_string(),
            course: course.to_string(),
            run: run.to_string(),
        };
        let rendered = format!("course-v1:{}+{}+{}", org, course, run);
        if [org, course, run].iter().all(|part| is_valid_component(part)) {
            Ok(Self::Course(key))
        } else {
            Err(KeyError::InvalidCourseKey(rendered))
        }
    }

    /// Build a library key, validating each component
    pub fn library(org: &str, library: &str) -> Result<Self, KeyError> {
        if is_valid_component(org) && is_valid_component(library) {
            Ok(Self::Library(LibraryKey {
                org: org.to_string(),
                library: library.to_string(),
            }))
        } else {
            Err(KeyError::InvalidCourseKey(format!(
                "library-v1:{}+{}",
                org, library
            )))
        }
    }

    pub fn is_library(&self) -> bool {
        matches!(self, Self::Library(_))
    }

    pub fn org(&self) -> &str {
        match self {
            Self::Course(key) => &key.org,
            Self::Library(key) => &key.org,
        }
    }

    /// Course name; the library name for libraries
    pub fn course_name(&self) -> &str {
        match self {
            Self::Course(key) => &key.course,
            Self::Library(key) => &key.library,
        }
    }

    pub fn run(&self) -> &str {
        match self {
            Self::Course(key) => &key.run,
            Self::Library(_) => LIBRARY_RUN,
        }
    }

    /// Name of the scratch directory used while importing into this key
    pub fn staging_dir_name(&self) -> String {
        format!("{}-{}-{}", self.org(), self.course_name(), self.run())
    }

    /// Location of a block that belongs to this course or library
    pub fn make_location(&self, category: impl Into<String>, name: impl Into<String>) -> Location {
        Location {
            course: self.clone(),
            category: category.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CourseLikeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Course(key) => write!(f, "course-v1:{}+{}+{}", key.org, key.course, key.run),
            Self::Library(key) => write!(f, "library-v1:{}+{}", key.org, key.library),
        }
    }
}

impl FromStr for CourseLikeKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::InvalidCourseKey(s.to_string());

        if let Some(rest) = s.strip_prefix("course-v1:") {
            let parts: Vec<&str> = rest.split('+').collect();
            return match parts.as_slice() {
                [org, course, run] => Self::course(org, course, run).map_err(|_| invalid()),
                _ => Err(invalid()),
            };
        }

        if let Some(rest) = s.strip_prefix("library-v1:") {
            let parts: Vec<&str> = rest.split('+').collect();
            return match parts.as_slice() {
                [org, library] => Self::library(org, library).map_err(|_| invalid()),
                _ => Err(invalid()),
            };
        }

        // Legacy slash-separated course id
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [org, course, run] => Self::course(org, course, run).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for CourseLikeKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CourseLikeKey> for String {
    fn from(key: CourseLikeKey) -> Self {
        key.to_string()
    }
}

// ============================================================================
// Block locations
// ============================================================================

/// Location of a single block within a course or library
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub course: CourseLikeKey,
    pub category: String,
    pub name: String,
}

impl Location {
    pub fn is_leaf_container(&self) -> bool {
        self.category == LEAF_CONTAINER_CATEGORY
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.course {
            CourseLikeKey::Course(key) => write!(
                f,
                "block-v1:{}+{}+{}+type@{}+block@{}",
                key.org, key.course, key.run, self.category, self.name
            ),
            CourseLikeKey::Library(key) => write!(
                f,
                "lib-block-v1:{}+{}+type@{}+block@{}",
                key.org, key.library, self.category, self.name
            ),
        }
    }
}

impl FromStr for Location {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::InvalidLocation(s.to_string());

        let (course, rest) = if let Some(rest) = s.strip_prefix("block-v1:") {
            let mut parts = rest.splitn(4, '+');
            let org = parts.next().ok_or_else(invalid)?;
            let course = parts.next().ok_or_else(invalid)?;
            let run = parts.next().ok_or_else(invalid)?;
            let rest = parts.next().ok_or_else(invalid)?;
            (CourseLikeKey::course(org, course, run).map_err(|_| invalid())?, rest)
        } else if let Some(rest) = s.strip_prefix("lib-block-v1:") {
            let mut parts = rest.splitn(3, '+');
            let org = parts.next().ok_or_else(invalid)?;
            let library = parts.next().ok_or_else(invalid)?;
            let rest = parts.next().ok_or_else(invalid)?;
            (CourseLikeKey::library(org, library).map_err(|_| invalid())?, rest)
        } else {
            return Err(invalid());
        };

        let (category, name) = rest
            .strip_prefix("type@")
            .and_then(|rest| rest.split_once("+block@"))
            .ok_or_else(invalid)?;

        if !is_valid_component(category) || !is_valid_component(name) {
            return Err(invalid());
        }

        Ok(Location {
            course,
            category: category.to_string(),
            name: name.to_string(),
        })
    }
}

/// Key components may only contain word characters, `-`, `.` and `~`
pub(crate) fn is_valid_component(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
}

// ============================================================================
// Tests
// ============================================================================

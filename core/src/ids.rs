use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt, ops::Deref, str::FromStr};

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::from(s))
            }
        }
    };
}

define_id_type!(UserId);
define_id_type!(RoomCode);
define_id_type!(CourseId);

/// Room codes are typed by hand on projectors and phones, so the alphabet
/// skips the characters people misread: 0/O, 1/I/L.
const ROOM_CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

pub fn mint_room_code(length: usize) -> RoomCode {
    let mut code = String::with_capacity(length);
    for _ in 0..length {
        let index = fastrand::usize(..ROOM_CODE_ALPHABET.len());
        code.push(ROOM_CODE_ALPHABET[index] as char);
    }
    RoomCode::new(code)
}

/// Lowercase alphanumeric slug with single hyphens between word runs.
pub fn course_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_gap = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_gap && !slug.is_empty() {
                slug.push('-');
            }
            pending_gap = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_gap = true;
        }
    }
    slug
}

/// Course identity derives from owner and name, so a duplicate name by the
/// same owner collides at the store's duplicate-key check.
pub fn course_id_for(owner: &UserId, name: &str) -> CourseId {
    CourseId::new(format!("{owner}:{slug}", slug = course_slug(name)))
}

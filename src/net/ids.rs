use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! define_id {
    ($name:ident) => {
        /// Cheaply cloneable, user-chosen identifier.
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(raw: impl AsRef<str>) -> Self {
                Self(Arc::from(raw.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, stringify!($name))?;
                f.debug_tuple("").field(&self.as_str()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }

        impl From<&$name> for $name {
            fn from(value: &$name) -> Self {
                value.clone()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                &*self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                &*self.0 == *other
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Ok(Self::from(raw))
            }
        }
    };
}

define_id!(PlaceId);
define_id!(TransitionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_compare_by_name() {
        let a = PlaceId::from("p0");
        let b = PlaceId::new(String::from("p0"));
        assert_eq!(a, b);
        assert_eq!(a, "p0");
        assert!(PlaceId::from("p0") < PlaceId::from("p1"));
        assert_eq!(format!("{a}"), "p0");
        assert_eq!(format!("{a:?}"), "PlaceId(\"p0\")");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = TransitionId::from("t0");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"t0\"");
        let back: TransitionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

//! Macro for non-empty string identifiers.
//!
//! Entity names, rule names and natural keys are all plain strings on the
//! wire but must never be mixed up or empty. The macro generates the wrapper
//! plus the conversions every call site needs.

/// Define a non-empty string newtype with serde, display and lookup support.
///
/// Generates `new()` (panics on empty), `try_new()`, `as_str()`,
/// `into_inner()`, `Display`, `AsRef<str>`, `Deref<Target = str>`,
/// `Borrow<str>` (so `HashMap<Name, _>` can be queried with `&str`),
/// `TryFrom<String>` and `PartialEq<str>`.
macro_rules! define_newtype_string {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        #[serde(transparent)]
        $vis struct $Name(String);

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $Name::try_new(s).ok_or_else(|| {
                    serde::de::Error::custom(concat!(stringify!($Name), " must not be empty"))
                })
            }
        }

        impl $Name {
            /// Create a new instance, panicking if the value is empty.
            ///
            /// Prefer [`try_new`](Self::try_new) for untrusted input.
            pub fn new(value: impl Into<String>) -> Self {
                let s = value.into();
                assert!(!s.is_empty(), concat!(stringify!($Name), " must not be empty"));
                Self(s)
            }

            /// Create a new instance, returning `None` if the value is empty.
            pub fn try_new(value: impl Into<String>) -> Option<Self> {
                let s = value.into();
                (!s.is_empty()).then_some(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $Name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $Name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $Name {
            type Error = &'static str;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                $Name::try_new(s).ok_or(concat!(stringify!($Name), " must not be empty"))
            }
        }

        impl PartialEq<str> for $Name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $Name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

pub(crate) use define_newtype_string;

//! Integer record identifiers.
//!
//! Ids are SQLite rowids, so they are plain `i64` newtypes rather than
//! strings. Ordering is derived: resolver tie-breaks and stable listings
//! rely on ascending id order being deterministic.

/// Generates an id newtype over an `i64` rowid.
///
/// Exported so sibling crates can mint their own record ids
/// (layers, features, import configs) with identical semantics.
#[macro_export]
macro_rules! impl_record_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {$(
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    )+};
}

impl_record_id! {
    /// A persisted highway route.
    RouteId
}

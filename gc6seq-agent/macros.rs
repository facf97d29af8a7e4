//! Declarative macros to reduce boilerplate across the gc6seq codebase

/// Define a named enum with automatic `name()`, `all()` and `FromStr`
/// implementations
///
/// # Example
/// ```
/// use gc6seq::named_enum;
///
/// named_enum! {
///     pub enum Phase {
///         Entry => "entry",
///         Exit => "exit",
///     }
/// }
///
/// // Usage
/// let phase = Phase::Entry;
/// assert_eq!(phase.name(), "entry");
/// assert_eq!(Phase::all().len(), 2);
/// assert_eq!("exit".parse::<Phase>(), Ok(Phase::Exit));
/// ```
///
/// Expands to:
/// - An enum with Debug, Clone, Copy, PartialEq, Eq, Hash derives
/// - A `name(&self) -> &'static str` method
/// - An `all() -> Vec<Self>` method
/// - `Display` and case-insensitive `FromStr` over the names
#[macro_export]
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $name::all()
                    .into_iter()
                    .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| {
                        let names: Vec<&str> = $name::all().iter().map(|v| v.name()).collect();
                        format!("unknown {} '{}', expected one of: {}", stringify!($name), s, names.join(", "))
                    })
            }
        }
    };
}

/// Define an enum with name() and all() methods, plus custom data per variant
///
/// # Example
/// ```
/// use gc6seq::enum_with_data;
///
/// enum_with_data! {
///     pub enum Lane: u8 {
///         X1 => ("x1", 1),
///         X16 => ("x16", 16),
///     }
///     impl width -> u8
/// }
///
/// let lane = Lane::X16;
/// assert_eq!(lane.name(), "x16");
/// assert_eq!(lane.width(), 16);
/// assert_eq!("x1".parse::<Lane>(), Ok(Lane::X1));
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($str:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $name::all()
                    .into_iter()
                    .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| {
                        let names: Vec<&str> = $name::all().iter().map(|v| v.name()).collect();
                        format!("unknown {} '{}', expected one of: {}", stringify!($name), s, names.join(", "))
                    })
            }
        }
    };
}

/// Implement `Serialize` as the variant name and `Deserialize` through
/// `FromStr` for an enum produced by [`named_enum!`] or [`enum_with_data!`]
#[macro_export]
macro_rules! serde_by_name {
    ($name:ident) => {
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

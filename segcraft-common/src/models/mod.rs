//! Data model shared by the fabrication engine and its stores
//!
//! Enumerations are persisted as their variant names (TEXT columns with
//! CHECK constraints), so each one round-trips through `as_str`/`FromStr`.

/// Implement `as_str`, `Display` and `FromStr` for a fieldless enum stored as text
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stored text form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::Error::InvalidInput(format!(
                        "Unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod chain;
pub mod library;
pub mod segment;

pub use chain::{Chain, ChainBinding, ChainBindingType, ChainState, ChainType};
pub use library::{
    Library, Program, ProgramMeme, ProgramSequence, ProgramSequenceBinding,
    ProgramSequenceBindingMeme, ProgramSequenceChord, ProgramType,
};
pub use segment::{
    Segment, SegmentChoice, SegmentChord, SegmentMeme, SegmentMessage, SegmentMessageType,
    SegmentState, SegmentType,
};

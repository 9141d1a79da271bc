pub mod ids;
pub mod node;
pub mod version;

pub use ids::Id;
pub use node::Node;
pub use version::{Version, VersionError};

/// Conversion from a binary row message into a domain value.
pub trait ProtoDeserializable<T> {
    fn from_proto(proto_obj: T) -> Result<Self, String>
    where
        Self: Sized;
}

/// Conversion from a domain value into a binary row message.
pub trait ProtoSerializable<T> {
    fn to_proto(&self) -> T;
}
